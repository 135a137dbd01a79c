// streaming.rs — Adapts transcoded chunks into named events on the socket.
//
// Each stream_* call makes sure a connection exists (acquiring and waiting
// up to the configured timeout), then fires the event. Sends are best
// effort: a failure is returned to the caller and logged, capture loops
// drop the chunk and keep going.

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Value};

use crate::connection::ConnectionManager;
use crate::types::{ChunkKind, ChunkSink, MediaChunk, StreamError};

/// Outbound event names understood by the backend.
const EVENT_AUDIO: &str = "stream_audio";
const EVENT_VIDEO: &str = "stream_video";
const EVENT_SCREEN: &str = "stream_screen";

// ─── Payload builders ──────────────────────────────────────────────────────────

fn audio_payload(pcm: &[u8], timestamp_ms: u64) -> Value {
    json!({
        "audio": BASE64.encode(pcm),
        "timestamp": timestamp_ms,
        "format": "audio/pcm",
    })
}

fn video_payload(jpeg: &[u8], timestamp_ms: u64) -> Value {
    json!({
        "frame": BASE64.encode(jpeg),
        "timestamp": timestamp_ms,
    })
}

fn screen_payload(jpeg: &[u8], timestamp_ms: u64, prompt: Option<&str>) -> Value {
    json!({
        "frame": BASE64.encode(jpeg),
        "timestamp": timestamp_ms,
        "prompt": prompt.unwrap_or_default(),
    })
}

// ─── Streamer ──────────────────────────────────────────────────────────────────

/// Per-media-kind streaming entry points over a shared connection.
pub struct Streamer {
    conn: Arc<ConnectionManager>,
}

impl Streamer {
    pub fn new(conn: Arc<ConnectionManager>) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.conn
    }

    /// Stream one PCM16 audio chunk.
    pub async fn stream_audio(&self, chunk: &MediaChunk) -> Result<(), StreamError> {
        self.ensure_connected().await;
        self.conn
            .send(EVENT_AUDIO, audio_payload(&chunk.payload, chunk.timestamp_ms))
            .await?;
        Ok(())
    }

    /// Stream one JPEG camera frame.
    pub async fn stream_video(&self, chunk: &MediaChunk) -> Result<(), StreamError> {
        self.ensure_connected().await;
        self.conn
            .send(EVENT_VIDEO, video_payload(&chunk.payload, chunk.timestamp_ms))
            .await?;
        Ok(())
    }

    /// Stream one JPEG screen frame, optionally with an analysis prompt.
    pub async fn stream_screen(
        &self,
        chunk: &MediaChunk,
        prompt: Option<&str>,
    ) -> Result<(), StreamError> {
        self.ensure_connected().await;
        self.conn
            .send(
                EVENT_SCREEN,
                screen_payload(&chunk.payload, chunk.timestamp_ms, prompt),
            )
            .await?;
        Ok(())
    }

    /// Acquire the connection if nobody has yet, and give it a bounded
    /// window to come up. A still-down socket is not an error here — the
    /// subsequent send reports the failure.
    async fn ensure_connected(&self) {
        self.conn.acquire().await;
        if !self.conn.is_connected() {
            let timeout = self.conn.connect_timeout();
            if !self.conn.wait_until_connected(timeout).await {
                log::debug!("[stream] socket still down after {timeout:?} wait");
            }
        }
    }
}

#[async_trait]
impl ChunkSink for Streamer {
    async fn deliver(&self, chunk: MediaChunk) -> Result<(), StreamError> {
        match chunk.kind {
            ChunkKind::AudioPcm16 => self.stream_audio(&chunk).await,
            ChunkKind::VideoFrame => self.stream_video(&chunk).await,
            ChunkKind::ScreenFrame => {
                self.stream_screen(&chunk, chunk.prompt.as_deref()).await
            }
        }
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────────
