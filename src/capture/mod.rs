// capture/mod.rs — One independently startable session per media kind.
//
// Audio, camera, and screen have different device APIs, different sampling
// cadences, and independent user-facing lifecycles, so each gets its own
// session rather than one shared media session.

pub mod audio;
pub mod camera;
pub mod screen;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::settings::Settings;
use crate::types::{CaptureError, ChunkSink};

/// Observable state of one capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    /// Device permission/acquisition is in flight.
    Requesting,
    Active,
}

/// JPEG encoding knobs shared by the camera and screen pipelines.
#[derive(Debug, Clone, Copy)]
pub struct FrameConfig {
    pub max_width: u32,
    pub jpeg_quality: u8,
}

enum SlotState {
    Idle,
    Requesting,
    Active(Arc<AtomicBool>),
}

/// Owns the three capture sessions and their device handles. Nothing else
/// may touch a session's stream or sampler.
pub struct CaptureController {
    settings: Settings,
    sink: Arc<dyn ChunkSink>,
    audio: Mutex<SlotState>,
    camera: Mutex<SlotState>,
    screen: Mutex<SlotState>,
}

impl CaptureController {
    pub fn new(settings: Settings, sink: Arc<dyn ChunkSink>) -> Self {
        Self {
            settings,
            sink,
            audio: Mutex::new(SlotState::Idle),
            camera: Mutex::new(SlotState::Idle),
            screen: Mutex::new(SlotState::Idle),
        }
    }

    fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            max_width: self.settings.max_frame_width,
            jpeg_quality: self.settings.jpeg_quality,
        }
    }

    // ── Audio ──────────────────────────────────────────────────────────

    /// Start microphone capture. Idempotent while a session is active or
    /// being requested; device-acquisition failure is returned once to
    /// the caller and leaves the session idle.
    pub async fn start_audio_capture(&self) -> Result<(), CaptureError> {
        let settings = self.settings.audio.clone();
        let sink = Arc::clone(&self.sink);
        start_in_slot(&self.audio, "microphone", |running| {
            audio::start(settings, sink, running)
        })
        .await
    }

    /// Stop microphone capture. Safe on an idle session.
    pub async fn stop_audio_capture(&self) {
        stop_in_slot(&self.audio, "microphone").await;
    }

    pub async fn audio_state(&self) -> CaptureState {
        slot_state(&self.audio).await
    }

    // ── Camera ─────────────────────────────────────────────────────────

    pub async fn start_video_capture(&self) -> Result<(), CaptureError> {
        let settings = self.settings.camera.clone();
        let frame_cfg = self.frame_config();
        let sink = Arc::clone(&self.sink);
        start_in_slot(&self.camera, "camera", |running| {
            camera::start(settings, frame_cfg, sink, running)
        })
        .await
    }

    pub async fn stop_video_capture(&self) {
        stop_in_slot(&self.camera, "camera").await;
    }

    pub async fn video_state(&self) -> CaptureState {
        slot_state(&self.camera).await
    }

    // ── Screen ─────────────────────────────────────────────────────────

    pub async fn start_screen_capture(&self) -> Result<(), CaptureError> {
        let settings = self.settings.screen.clone();
        let frame_cfg = self.frame_config();
        let sink = Arc::clone(&self.sink);
        start_in_slot(&self.screen, "screen", |running| {
            screen::start(settings, frame_cfg, sink, running)
        })
        .await
    }

    pub async fn stop_screen_capture(&self) {
        stop_in_slot(&self.screen, "screen").await;
    }

    pub async fn screen_state(&self) -> CaptureState {
        slot_state(&self.screen).await
    }

    /// Stop every capture kind unconditionally. Used on teardown so no
    /// device handle or sampler survives the controller.
    pub async fn stop_all(&self) {
        self.stop_audio_capture().await;
        self.stop_video_capture().await;
        self.stop_screen_capture().await;
        log::info!("[capture] all captures stopped");
    }
}

// ─── Slot bookkeeping ──────────────────────────────────────────────────────────

/// Drive a slot through Idle → Requesting → Active. The slot lock is not
/// held across the acquisition await, so stop_* stays responsive; a stop
/// issued mid-acquisition wins and the freshly started session is torn
/// down again.
async fn start_in_slot<F, Fut>(
    slot: &Mutex<SlotState>,
    label: &str,
    start: F,
) -> Result<(), CaptureError>
where
    F: FnOnce(Arc<AtomicBool>) -> Fut,
    Fut: Future<Output = Result<(), CaptureError>>,
{
    {
        let mut guard = slot.lock().await;
        match *guard {
            SlotState::Active(_) | SlotState::Requesting => return Ok(()),
            SlotState::Idle => *guard = SlotState::Requesting,
        }
    }

    log::info!("[capture] requesting {label} access...");
    let running = Arc::new(AtomicBool::new(true));
    let result = start(Arc::clone(&running)).await;

    let mut guard = slot.lock().await;
    match result {
        Ok(()) => {
            if matches!(*guard, SlotState::Requesting) {
                *guard = SlotState::Active(Arc::clone(&running));
                log::info!("[capture] {label} capture started");
            } else {
                // Stopped while the grant was pending.
                running.store(false, Ordering::SeqCst);
                log::info!("[capture] {label} capture cancelled during acquisition");
            }
            Ok(())
        }
        Err(e) => {
            *guard = SlotState::Idle;
            running.store(false, Ordering::SeqCst);
            log::error!("[capture] {label} access failed: {e}");
            Err(e)
        }
    }
}

async fn stop_in_slot(slot: &Mutex<SlotState>, label: &str) {
    let mut guard = slot.lock().await;
    match std::mem::replace(&mut *guard, SlotState::Idle) {
        SlotState::Active(running) => {
            running.store(false, Ordering::SeqCst);
            log::info!("[capture] {label} capture stopped");
        }
        SlotState::Requesting => {
            log::info!("[capture] {label} stop requested during acquisition");
        }
        SlotState::Idle => {}
    }
}

async fn slot_state(slot: &Mutex<SlotState>) -> CaptureState {
    match *slot.lock().await {
        SlotState::Idle => CaptureState::Idle,
        SlotState::Requesting => CaptureState::Requesting,
        SlotState::Active(_) => CaptureState::Active,
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────────
