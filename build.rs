use std::fs;
use std::path::Path;

use serde::Deserialize;

#[derive(Deserialize)]
struct Config {
    audio: Audio,
    network: Network,
    transcription: Transcription,
}

#[derive(Deserialize)]
struct Audio {
    device: String,
    sample_rate: u32,
    channels: u32,
    frame_duration_ms: u32,
    queue_capacity: usize,
}

#[derive(Deserialize)]
struct Network {
    deepgram_url: String,
    api_key: String,
    analysis_url: String,
}

#[derive(Deserialize)]
struct Transcription {
    model: String,
    language: String,
    endpointing_ms: u32,
}

// Read config.toml at compile time and expose it as environment variables.
fn main() {
    println!("cargo:rerun-if-changed=config.toml");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    // Audio capture
    println!("cargo:rustc-env=AUDIO_DEVICE={}", config.audio.device);
    println!("cargo:rustc-env=AUDIO_SAMPLE_RATE={}", config.audio.sample_rate);
    println!("cargo:rustc-env=AUDIO_CHANNELS={}", config.audio.channels);
    println!("cargo:rustc-env=AUDIO_FRAME_DURATION_MS={}", config.audio.frame_duration_ms);
    println!("cargo:rustc-env=AUDIO_QUEUE_CAPACITY={}", config.audio.queue_capacity);

    // Network endpoints
    println!("cargo:rustc-env=DEEPGRAM_URL={}", config.network.deepgram_url);
    println!("cargo:rustc-env=DEEPGRAM_API_KEY_DEFAULT={}", config.network.api_key);
    println!("cargo:rustc-env=ANALYSIS_URL={}", config.network.analysis_url);

    // Transcription parameters
    println!("cargo:rustc-env=DG_MODEL={}", config.transcription.model);
    println!("cargo:rustc-env=DG_LANGUAGE={}", config.transcription.language);
    println!("cargo:rustc-env=DG_ENDPOINTING_MS={}", config.transcription.endpointing_ms);
}
