use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

/// Which capture pipeline produced a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    /// 16-bit signed little-endian PCM audio.
    AudioPcm16,
    /// JPEG-encoded camera frame.
    VideoFrame,
    /// JPEG-encoded screen frame.
    ScreenFrame,
}

/// One transcoded unit of media, ready for transport.
///
/// Chunks are ephemeral: produced by a capture session, handed to a
/// [`ChunkSink`], and discarded. They are never queued or reordered.
#[derive(Debug, Clone)]
pub struct MediaChunk {
    pub kind: ChunkKind,
    /// Encoded payload bytes (PCM16-LE or JPEG depending on `kind`).
    pub payload: Vec<u8>,
    /// Capture time, milliseconds since the UNIX epoch.
    pub timestamp_ms: u64,
    /// Screen frames may carry a caller-supplied prompt the backend uses
    /// to contextualize analysis. Empty for audio and camera chunks.
    pub prompt: Option<String>,
}

impl MediaChunk {
    pub fn new(kind: ChunkKind, payload: Vec<u8>) -> Self {
        Self {
            kind,
            payload,
            timestamp_ms: epoch_millis(),
            prompt: None,
        }
    }

    pub fn with_prompt(mut self, prompt: Option<String>) -> Self {
        self.prompt = prompt;
        self
    }
}

/// Destination for transcoded chunks. The streaming facade implements this;
/// tests inject mocks to observe (or fail) deliveries.
#[async_trait]
pub trait ChunkSink: Send + Sync {
    /// Deliver a single chunk, best effort. A returned error means this
    /// chunk was dropped; callers log it and keep capturing.
    async fn deliver(&self, chunk: MediaChunk) -> Result<(), StreamError>;
}

/// Errors from the connection manager.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("socket is not connected")]
    NotConnected,
    #[error("connection permanently failed — release and re-acquire to retry")]
    Failed,
    #[error("outbound queue full, chunk dropped")]
    Busy,
    #[error("transport error: {0}")]
    Transport(String),
}

/// Errors from device acquisition and capture session setup.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("no capture device available: {0}")]
    NoDevice(String),
    #[error("device initialization failed: {0}")]
    DeviceInit(String),
    #[error("unsupported capture format: {0}")]
    Unsupported(String),
}

/// Errors from transcoding or streaming a single chunk. Never fatal to a
/// capture session.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("transcode failed: {0}")]
    Transcode(String),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Milliseconds since the UNIX epoch, for wire timestamps.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
