//! medialink — streams microphone audio, camera frames, and screen frames
//! to an AI backend over a persistent, auto-reconnecting WebSocket.
//!
//! Pipeline: capture session → transcode (PCM16 / JPEG) → streaming facade
//! → connection manager. Delivery is best effort: a chunk that cannot be
//! sent is dropped and capture keeps going.

pub mod capture;
pub mod connection;
pub mod settings;
pub mod streaming;
pub mod transcode;
pub mod types;

pub use capture::{CaptureController, CaptureState};
pub use connection::{ConnectionManager, ConnectionState, Connector, Transport, WsConnector};
pub use settings::Settings;
pub use streaming::Streamer;
pub use types::{
    CaptureError, ChunkKind, ChunkSink, ConnectionError, MediaChunk, StreamError,
};
