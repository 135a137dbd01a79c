// screen.rs — Captures the primary monitor via xcap, JPEG-encodes each
// frame, and hands it to the sink. Screen frames optionally carry an
// analysis prompt for the backend.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use image::DynamicImage;

use crate::capture::FrameConfig;
use crate::settings::ScreenSettings;
use crate::transcode;
use crate::types::{CaptureError, ChunkKind, ChunkSink, MediaChunk};

/// Start a screen session. Monitor enumeration happens up front so that an
/// unavailable display surfaces to the caller; the grab loop then runs as
/// a background task until the running flag clears.
pub(crate) async fn start(
    settings: ScreenSettings,
    frame_cfg: FrameConfig,
    sink: Arc<dyn ChunkSink>,
    running: Arc<AtomicBool>,
) -> Result<(), CaptureError> {
    let monitors = xcap::Monitor::all()
        .map_err(|e| CaptureError::NoDevice(format!("enumerate monitors: {e}")))?;
    if monitors.is_empty() {
        return Err(CaptureError::NoDevice("no monitors found".into()));
    }

    let interval = Duration::from_millis(settings.frame_interval_ms);
    let prompt = settings.prompt.clone();
    log::info!(
        "[capture] screen loop started ({}ms interval)",
        settings.frame_interval_ms
    );
    tokio::spawn(frame_loop(
        move || grab_screen_frame(frame_cfg, prompt.clone()),
        interval,
        sink,
        running,
    ));

    Ok(())
}

/// Grab, deliver, sleep, repeat. Per-frame failures (grab or encode) are
/// logged and that frame is skipped; a failed delivery drops the chunk.
/// Either way the loop stays on cadence.
async fn frame_loop<F>(
    mut grab: F,
    interval: Duration,
    sink: Arc<dyn ChunkSink>,
    running: Arc<AtomicBool>,
) where
    F: FnMut() -> Result<MediaChunk, String> + Send + 'static,
{
    while running.load(Ordering::SeqCst) {
        match grab() {
            Ok(chunk) => {
                if let Err(e) = sink.deliver(chunk).await {
                    log::warn!("[capture] screen frame dropped: {e}");
                }
            }
            Err(e) => log::error!("[capture] screen frame error: {e}"),
        }

        tokio::time::sleep(interval).await;
    }
    log::info!("[capture] screen loop stopped");
}

fn grab_screen_frame(
    frame_cfg: FrameConfig,
    prompt: Option<String>,
) -> Result<MediaChunk, String> {
    let monitors = xcap::Monitor::all().map_err(|e| format!("enumerate monitors: {e}"))?;
    let monitor = monitors
        .into_iter()
        .find(|m| m.is_primary())
        .or_else(|| xcap::Monitor::all().ok()?.into_iter().next())
        .ok_or_else(|| "no monitors found".to_string())?;

    let raw = monitor
        .capture_image()
        .map_err(|e| format!("capture_image: {e}"))?;
    let img = DynamicImage::ImageRgba8(raw);

    let (jpeg, w, h) =
        transcode::encode_jpeg_frame(&img, frame_cfg.max_width, frame_cfg.jpeg_quality)
            .map_err(|e| e.to_string())?;

    log::debug!("[capture] screen frame: {w}x{h}, {} bytes", jpeg.len());
    Ok(MediaChunk::new(ChunkKind::ScreenFrame, jpeg).with_prompt(prompt))
}

// ─── Tests ─────────────────────────────────────────────────────────────────────
