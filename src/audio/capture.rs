//! The capture system: a dedicated OS thread reading the microphone.
//!
//! Modeled on the rule that the audio thread never waits on the network:
//! frames leave through `try_send` on a bounded channel, and when the
//! consumer falls behind the frame is dropped rather than queued. Live
//! transcription favors latency over completeness.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use alsa::pcm::PCM;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::CaptureError;
use super::alsa_device::{self, AlsaParams};
use super::encode;

/// One fixed-duration block of signed 16-bit samples.
pub type AudioFrame = Vec<i16>;

/// Capture configuration.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// ALSA capture device name (e.g. "default", "plughw:0,0")
    pub device: String,
    /// Desired sample rate (the service contract expects 16000)
    pub sample_rate: u32,
    /// Desired channel count; extra hardware channels are discarded
    pub channels: u32,
    /// Duration of one emitted frame in ms
    pub frame_duration_ms: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: "default".to_string(),
            sample_rate: 16000,
            channels: 1,
            frame_duration_ms: 20,
        }
    }
}

/// Owns the microphone for one capture lifetime.
///
/// `start` acquires the device synchronously so acquisition failures are
/// reported to the caller before any thread exists; the read loop then runs
/// on a named OS thread until `stop` or drop.
pub struct CaptureSystem {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl CaptureSystem {
    /// Acquire the microphone and start producing frames into `frame_tx`.
    pub fn start(
        config: CaptureConfig,
        frame_tx: mpsc::Sender<AudioFrame>,
    ) -> Result<Self, CaptureError> {
        // Open the device on the caller's thread. If this fails nothing was
        // spawned and the PCM handle (if any) is already dropped.
        let (pcm, params) =
            alsa_device::open_capture(&config.device, config.sample_rate, config.channels)?;

        let running = Arc::new(AtomicBool::new(true));

        let handle = {
            let running = running.clone();
            thread::Builder::new()
                .name("audio-capture".into())
                .spawn(move || {
                    if let Err(e) = capture_loop(pcm, &params, &config, frame_tx, &running) {
                        log::error!("Capture thread error: {}", e);
                    }
                })
                .map_err(|e| CaptureError::ProcessorInitFailed(e.to_string()))?
        };

        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    /// Stop capturing and release the device. Safe to call repeatedly and
    /// from any state; the second and later calls are no-ops.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for CaptureSystem {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_loop(
    pcm: PCM,
    params: &AlsaParams,
    config: &CaptureConfig,
    frame_tx: mpsc::Sender<AudioFrame>,
    running: &AtomicBool,
) -> anyhow::Result<()> {
    let actual_channels = params.channels as usize;
    let period_size = params.period_size;

    // Samples per emitted frame, at the negotiated rate, mono.
    let frame_samples =
        (params.sample_rate as usize * config.frame_duration_ms as usize) / 1000;

    // Accumulation buffer for mono float samples
    let mut accum_buf: Vec<f32> = Vec::with_capacity(frame_samples * 2);

    // ALSA read buffer (interleaved f32, one period)
    let mut read_buf = vec![0f32; period_size * actual_channels];

    let io = pcm
        .io_f32()
        .map_err(|e| anyhow::anyhow!("Failed to map PCM I/O: {}", e))?;

    let mut dropped_frames: u64 = 0;

    log::info!(
        "Capture started: rate={}, ch={}, period={}, frame_samples={}",
        params.sample_rate,
        actual_channels,
        period_size,
        frame_samples,
    );

    while running.load(Ordering::Relaxed) {
        // Read one period from ALSA
        match io.readi(&mut read_buf) {
            Ok(frames) => {
                // Keep channel 0 only; the service expects mono.
                for i in 0..frames {
                    accum_buf.push(read_buf[i * actual_channels]);
                }

                // Emit complete fixed-duration frames
                while accum_buf.len() >= frame_samples {
                    let frame = encode::encode_frame(&accum_buf[..frame_samples]);
                    match frame_tx.try_send(frame) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            // Consumer is behind; drop the frame, never block.
                            dropped_frames += 1;
                            if dropped_frames == 1 || dropped_frames % 50 == 0 {
                                log::warn!(
                                    "Frame queue full, dropped {} frames so far",
                                    dropped_frames
                                );
                            }
                        }
                        Err(TrySendError::Closed(_)) => {
                            log::warn!("Frame receiver dropped, stopping capture");
                            return Ok(());
                        }
                    }
                    accum_buf.drain(..frame_samples);
                }
            }
            Err(e) => {
                log::warn!("ALSA capture error: {}, recovering...", e);
                if let Err(e2) = pcm.prepare() {
                    log::error!("Failed to recover PCM capture: {}", e2);
                    break;
                }
            }
        }
    }

    log::info!("Capture stopped");
    Ok(())
}
