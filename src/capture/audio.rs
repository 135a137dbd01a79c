// audio.rs — Microphone capture via cpal.
//
// The cpal callback appends samples to a shared buffer; a drain loop pulls
// the buffer every chunk_ms, down-mixes to mono, resamples to the target
// rate, quantizes to PCM16, and hands the chunk to the sink. The whole
// session runs on a dedicated OS thread because cpal streams are !Send on
// some backends.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::settings::AudioSettings;
use crate::transcode;
use crate::types::{CaptureError, ChunkKind, ChunkSink, MediaChunk};

type SampleBuffer = Arc<Mutex<Vec<f32>>>;

/// Start a microphone session. Resolves once the device is acquired and
/// the stream is playing — or with the acquisition error, in which case
/// nothing is left running.
pub(crate) async fn start(
    settings: AudioSettings,
    sink: Arc<dyn ChunkSink>,
    running: Arc<AtomicBool>,
) -> Result<(), CaptureError> {
    let handle = Handle::current();
    let (ready_tx, ready_rx) = oneshot::channel::<Result<(), CaptureError>>();

    std::thread::Builder::new()
        .name("medialink-audio".into())
        .spawn(move || capture_thread(settings, sink, running, handle, ready_tx))
        .map_err(|e| CaptureError::DeviceInit(format!("spawn audio thread: {e}")))?;

    ready_rx
        .await
        .map_err(|_| CaptureError::DeviceInit("audio thread died during setup".into()))?
}

/// Session thread: acquire the device, report readiness, then drain until
/// the running flag clears. The cpal stream is dropped on exit, which
/// releases the device.
fn capture_thread(
    settings: AudioSettings,
    sink: Arc<dyn ChunkSink>,
    running: Arc<AtomicBool>,
    handle: Handle,
    ready_tx: oneshot::Sender<Result<(), CaptureError>>,
) {
    let buffer: SampleBuffer = Arc::new(Mutex::new(Vec::new()));

    let stream = match build_input_stream(&buffer) {
        Ok(acquired) => acquired,
        Err(e) => {
            running.store(false, Ordering::SeqCst);
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    if ready_tx.send(Ok(())).is_err() {
        // Caller went away before the grant resolved.
        return;
    }

    drain_loop(
        &buffer,
        &running,
        &settings,
        stream.device_rate,
        stream.device_channels,
        sink,
        handle,
    );

    drop(stream);
    log::info!("[capture] audio loop stopped");
}

struct AcquiredStream {
    // Held only to keep the device stream alive; dropped on session exit.
    _stream: cpal::Stream,
    device_rate: u32,
    device_channels: usize,
}

/// Acquire the default microphone and start an input stream that appends
/// f32 samples to `buffer`. Every supported device sample format is
/// widened to f32 for uniform processing.
fn build_input_stream(buffer: &SampleBuffer) -> Result<AcquiredStream, CaptureError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| CaptureError::NoDevice("no default input device".into()))?;

    log::info!(
        "[capture] audio device: {}",
        device.name().unwrap_or_else(|_| "<unknown>".into())
    );

    let supported_config = device
        .default_input_config()
        .map_err(|e| CaptureError::DeviceInit(format!("query input config: {e}")))?;
    let device_rate = supported_config.sample_rate().0;
    let device_channels = supported_config.channels() as usize;
    let sample_format = supported_config.sample_format();

    log::info!(
        "[capture] device config: {device_rate}Hz, {device_channels} ch, {sample_format:?}"
    );

    let stream_config: cpal::StreamConfig = supported_config.into();
    let err_fn = |err| log::error!("[capture] audio stream error: {err}");

    let stream = match sample_format {
        cpal::SampleFormat::F32 => {
            let writer = Arc::clone(buffer);
            device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut buf) = writer.lock() {
                        buf.extend_from_slice(data);
                    }
                },
                err_fn,
                None,
            )
        }
        cpal::SampleFormat::I16 => {
            let writer = Arc::clone(buffer);
            device.build_input_stream(
                &stream_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    let floats: Vec<f32> =
                        data.iter().map(|&s| s as f32 / i16::MAX as f32).collect();
                    if let Ok(mut buf) = writer.lock() {
                        buf.extend_from_slice(&floats);
                    }
                },
                err_fn,
                None,
            )
        }
        cpal::SampleFormat::U16 => {
            let writer = Arc::clone(buffer);
            device.build_input_stream(
                &stream_config,
                move |data: &[u16], _: &cpal::InputCallbackInfo| {
                    let floats: Vec<f32> = data
                        .iter()
                        .map(|&s| (s as f32 / u16::MAX as f32) * 2.0 - 1.0)
                        .collect();
                    if let Ok(mut buf) = writer.lock() {
                        buf.extend_from_slice(&floats);
                    }
                },
                err_fn,
                None,
            )
        }
        other => {
            return Err(CaptureError::Unsupported(format!(
                "sample format {other:?}"
            )))
        }
    }
    .map_err(|e| CaptureError::DeviceInit(format!("build input stream: {e}")))?;

    stream
        .play()
        .map_err(|e| CaptureError::DeviceInit(format!("start input stream: {e}")))?;

    Ok(AcquiredStream {
        _stream: stream,
        device_rate,
        device_channels,
    })
}

/// Pull accumulated samples every chunk_ms and push one PCM16 chunk to the
/// sink per tick. A failed delivery drops that chunk and keeps the loop on
/// cadence.
fn drain_loop(
    buffer: &SampleBuffer,
    running: &AtomicBool,
    settings: &AudioSettings,
    device_rate: u32,
    device_channels: usize,
    sink: Arc<dyn ChunkSink>,
    handle: Handle,
) {
    let chunk_duration = Duration::from_millis(settings.chunk_ms as u64);

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(chunk_duration);

        let raw_samples: Vec<f32> = buffer
            .lock()
            .map(|mut buf| buf.drain(..).collect())
            .unwrap_or_default();

        if raw_samples.is_empty() {
            continue;
        }

        let mono = transcode::downmix_to_mono(&raw_samples, device_channels);
        let resampled = transcode::resample(&mono, device_rate, settings.sample_rate);
        let pcm = transcode::f32_to_pcm16(&resampled);
        let rms = transcode::compute_rms(&pcm);
        log::debug!("[capture] audio chunk: {} samples, RMS={rms:.4}", pcm.len());

        let chunk = MediaChunk::new(ChunkKind::AudioPcm16, transcode::pcm16_to_bytes(&pcm));
        if let Err(e) = handle.block_on(sink.deliver(chunk)) {
            log::warn!("[capture] audio chunk dropped: {e}");
        }
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────────
