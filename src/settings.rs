use std::path::Path;
use std::time::Duration;
use std::{env, fs};

use serde::{Deserialize, Serialize};

/// Environment variable that overrides the configured backend endpoint.
pub const ENDPOINT_ENV: &str = "MEDIALINK_ENDPOINT";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Frames wider than this are downscaled before JPEG encoding.
    pub max_frame_width: u32,
    /// JPEG compression quality (1–100). Deliberately lossy to bound
    /// payload size.
    pub jpeg_quality: u8,
    pub connection: ConnectionSettings,
    pub audio: AudioSettings,
    pub camera: CameraSettings,
    pub screen: ScreenSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_frame_width: 1024,
            jpeg_quality: 70,
            connection: ConnectionSettings::default(),
            audio: AudioSettings::default(),
            camera: CameraSettings::default(),
            screen: ScreenSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Backend WebSocket endpoint.
    pub endpoint: String,
    /// Consecutive failed connect attempts before giving up for good.
    pub reconnect_attempts: u32,
    /// Fixed delay between connect attempts.
    pub reconnect_delay_ms: u64,
    /// How long the streaming facade waits for the socket to come up
    /// before reporting a chunk as dropped.
    pub connect_timeout_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:5000/stream".into(),
            reconnect_attempts: 5,
            reconnect_delay_ms: 1000,
            connect_timeout_ms: 5000,
        }
    }
}

impl ConnectionSettings {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    pub enabled: bool,
    /// Target PCM sample rate in Hz. The backend expects 16 kHz mono.
    pub sample_rate: u32,
    /// How many milliseconds of audio per emitted chunk.
    pub chunk_ms: u32,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_rate: 16_000,
            chunk_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    pub enabled: bool,
    /// Requested capture resolution; the device picks the closest match.
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Milliseconds between frame grabs (5 Hz keeps bandwidth bounded).
    pub frame_interval_ms: u64,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            width: 1280,
            height: 720,
            fps: 30,
            frame_interval_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenSettings {
    pub enabled: bool,
    /// Milliseconds between screen grabs. Screens change slowly; 1 Hz is
    /// plenty for analysis and keeps frames cheap.
    pub frame_interval_ms: u64,
    /// Optional prompt attached to every screen frame so the backend can
    /// contextualize the analysis.
    pub prompt: Option<String>,
}

impl Default for ScreenSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            frame_interval_ms: 1000,
            prompt: None,
        }
    }
}

impl Settings {
    /// Load settings from a TOML file, falling back to defaults when the
    /// file does not exist. `MEDIALINK_ENDPOINT` overrides the configured
    /// backend endpoint either way.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let mut settings = if path.exists() {
            let content = fs::read_to_string(path).map_err(|source| SettingsError::Io {
                path: path.display().to_string(),
                source,
            })?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };

        if let Ok(endpoint) = env::var(ENDPOINT_ENV) {
            if !endpoint.is_empty() {
                log::info!("settings: endpoint overridden from {ENDPOINT_ENV}");
                settings.connection.endpoint = endpoint;
            }
        }

        Ok(settings)
    }
}
