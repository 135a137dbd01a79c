// camera.rs — Camera capture via nokhwa.
//
// Frames are grabbed at a fixed interval (well below the device frame
// rate), JPEG-encoded, and handed to the sink. Runs on a dedicated OS
// thread; the camera handle never crosses it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::DynamicImage;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution,
};
use nokhwa::Camera;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::capture::FrameConfig;
use crate::settings::CameraSettings;
use crate::transcode;
use crate::types::{CaptureError, ChunkKind, ChunkSink, MediaChunk};

/// Start a camera session. Resolves once the device stream is open, or
/// with the acquisition error (permission denied, no camera, busy device).
pub(crate) async fn start(
    settings: CameraSettings,
    frame_cfg: FrameConfig,
    sink: Arc<dyn ChunkSink>,
    running: Arc<AtomicBool>,
) -> Result<(), CaptureError> {
    let handle = Handle::current();
    let (ready_tx, ready_rx) = oneshot::channel::<Result<(), CaptureError>>();

    std::thread::Builder::new()
        .name("medialink-camera".into())
        .spawn(move || capture_thread(settings, frame_cfg, sink, running, handle, ready_tx))
        .map_err(|e| CaptureError::DeviceInit(format!("spawn camera thread: {e}")))?;

    ready_rx
        .await
        .map_err(|_| CaptureError::DeviceInit("camera thread died during setup".into()))?
}

fn capture_thread(
    settings: CameraSettings,
    frame_cfg: FrameConfig,
    sink: Arc<dyn ChunkSink>,
    running: Arc<AtomicBool>,
    handle: Handle,
    ready_tx: oneshot::Sender<Result<(), CaptureError>>,
) {
    let mut camera = match open_camera(&settings) {
        Ok(camera) => camera,
        Err(e) => {
            running.store(false, Ordering::SeqCst);
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    if ready_tx.send(Ok(())).is_err() {
        let _ = camera.stop_stream();
        return;
    }

    frame_loop(&mut camera, &settings, frame_cfg, sink, &running, handle);

    let _ = camera.stop_stream();
    log::info!("[capture] camera loop stopped");
}

/// Open the default camera with the requested resolution/frame-rate hints.
/// The device picks the closest format it actually supports.
fn open_camera(settings: &CameraSettings) -> Result<Camera, CaptureError> {
    let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(
        CameraFormat::new(
            Resolution::new(settings.width, settings.height),
            FrameFormat::MJPEG,
            settings.fps,
        ),
    ));

    let mut camera = Camera::new(CameraIndex::Index(0), requested)
        .map_err(|e| CaptureError::NoDevice(format!("open camera: {e}")))?;

    camera
        .open_stream()
        .map_err(|e| CaptureError::DeviceInit(format!("start camera stream: {e}")))?;

    let format = camera.camera_format();
    log::info!(
        "[capture] camera device: {} ({}x{} @ {}fps)",
        camera.info().human_name(),
        format.width(),
        format.height(),
        format.frame_rate()
    );

    Ok(camera)
}

/// Grab, encode, and deliver one frame per interval. Per-frame grab or
/// encode failures are logged and skipped; the loop stays on cadence.
fn frame_loop(
    camera: &mut Camera,
    settings: &CameraSettings,
    frame_cfg: FrameConfig,
    sink: Arc<dyn ChunkSink>,
    running: &AtomicBool,
    handle: Handle,
) {
    let interval = Duration::from_millis(settings.frame_interval_ms);

    while running.load(Ordering::SeqCst) {
        let tick = Instant::now();

        match grab_frame(camera, frame_cfg) {
            Ok(chunk) => {
                if let Err(e) = handle.block_on(sink.deliver(chunk)) {
                    log::warn!("[capture] camera frame dropped: {e}");
                }
            }
            Err(e) => log::error!("[capture] camera frame error: {e}"),
        }

        if let Some(remaining) = interval.checked_sub(tick.elapsed()) {
            std::thread::sleep(remaining);
        }
    }
}

fn grab_frame(camera: &mut Camera, frame_cfg: FrameConfig) -> Result<MediaChunk, String> {
    let frame = camera.frame().map_err(|e| format!("grab frame: {e}"))?;
    let rgb = frame
        .decode_image::<RgbFormat>()
        .map_err(|e| format!("decode frame: {e}"))?;

    let img = DynamicImage::ImageRgb8(rgb);
    let (jpeg, w, h) =
        transcode::encode_jpeg_frame(&img, frame_cfg.max_width, frame_cfg.jpeg_quality)
            .map_err(|e| e.to_string())?;

    log::debug!("[capture] camera frame: {w}x{h}, {} bytes", jpeg.len());
    Ok(MediaChunk::new(ChunkKind::VideoFrame, jpeg))
}
