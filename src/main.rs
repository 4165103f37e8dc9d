mod analysis;
mod audio;
mod config;
mod protocol;
mod session;
mod transport;

use std::time::Duration;

use tokio::signal;
use tokio::sync::mpsc;

use analysis::AnalysisClient;
use audio::{CaptureConfig, CaptureSystem};
use config::Config;
use session::{SessionClient, SessionConfig, SessionEvent};
use transport::WsTransport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = Config::new().map_err(anyhow::Error::msg)?;

    // Bounded frame queue between the capture thread and the async world.
    // The capture side never blocks on it; overflow drops frames.
    let (frame_tx, mut frame_rx) = mpsc::channel(config.audio_queue_capacity);

    // Acquire the microphone before anything touches the network: when the
    // device is unavailable we report that and make no connection attempt.
    let capture_config = CaptureConfig {
        device: config.audio_device.to_string(),
        sample_rate: config.audio_sample_rate,
        channels: config.audio_channels,
        frame_duration_ms: config.audio_frame_duration_ms,
    };
    let mut capture = match CaptureSystem::start(capture_config, frame_tx) {
        Ok(capture) => capture,
        Err(e) => {
            log::error!("{}", e);
            return Err(anyhow::Error::msg(e.to_string()));
        }
    };

    let session_config = SessionConfig {
        url: config.deepgram_url.to_string(),
        api_key: config.api_key.clone(),
        model: config.model.to_string(),
        language: config.language.to_string(),
        endpointing_ms: config.endpointing_ms,
        sample_rate: config.audio_sample_rate,
        ..SessionConfig::default()
    };
    let (client, mut events) = match SessionClient::spawn(session_config, Box::new(WsTransport)) {
        Ok(spawned) => spawned,
        Err(e) => {
            capture.stop();
            log::error!("{}", e);
            return Err(anyhow::Error::msg(e.to_string()));
        }
    };

    let analysis = AnalysisClient::new(config.analysis_url)?;

    log::info!("Live transcription started. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                log::info!("Received Ctrl+C, shutting down...");
                break;
            }

            Some(frame) = frame_rx.recv() => {
                client.send(frame).await;
            }

            event = events.recv() => match event {
                Some(SessionEvent::Transcript(t)) => {
                    if t.is_final {
                        println!("{}", t.text);

                        // Fire-and-forget: a slow or failing analysis call
                        // must not stall the audio path.
                        let analysis = analysis.clone();
                        let text = t.text.clone();
                        tokio::spawn(async move {
                            match analysis.analyze(&text).await {
                                Ok(s) => log::info!(
                                    "Sentiment: {} ({:.2}), intensity {:.2}, keywords: {:?}",
                                    s.sentiment_type,
                                    s.sentiment_score,
                                    s.intensity,
                                    s.keywords,
                                ),
                                Err(e) => log::warn!("{}", e),
                            }
                        });
                    } else {
                        log::info!("Interim: {}", t.text);
                    }
                }
                Some(SessionEvent::Error(e)) => {
                    if e.recoverable {
                        log::warn!("{}", e);
                    } else {
                        log::error!("{}", e);
                        break;
                    }
                }
                None => {
                    log::info!("Session ended");
                    break;
                }
            }
        }
    }

    // Teardown order: stop the microphone first so no further frames are
    // produced, then close the session.
    capture.stop();
    client.disconnect().await;

    // Give the close frame a moment to leave before the runtime drops.
    tokio::time::sleep(Duration::from_millis(100)).await;

    Ok(())
}
