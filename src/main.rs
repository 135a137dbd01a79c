use std::path::PathBuf;
use std::sync::Arc;

use medialink::{CaptureController, ConnectionManager, Settings, Streamer, WsConnector};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("medialink.toml"));
    let settings = match Settings::load(&config_path) {
        Ok(settings) => settings,
        Err(e) => {
            log::error!("failed to load settings: {e}");
            std::process::exit(1);
        }
    };

    let conn = Arc::new(ConnectionManager::new(
        Arc::new(WsConnector),
        settings.connection.clone(),
    ));
    let streamer = Arc::new(Streamer::new(Arc::clone(&conn)));
    let controller = CaptureController::new(settings.clone(), streamer);

    if settings.audio.enabled {
        if let Err(e) = controller.start_audio_capture().await {
            log::error!("microphone unavailable: {e}");
        }
    }
    if settings.camera.enabled {
        if let Err(e) = controller.start_video_capture().await {
            log::error!("camera unavailable: {e}");
        }
    }
    if settings.screen.enabled {
        if let Err(e) = controller.start_screen_capture().await {
            log::error!("screen capture unavailable: {e}");
        }
    }

    log::info!("medialink running — press Ctrl-C to stop");
    let _ = tokio::signal::ctrl_c().await;

    controller.stop_all().await;
    conn.release().await;
}
