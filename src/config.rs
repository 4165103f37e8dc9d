#[derive(Debug, Clone)]
pub struct Config {
    // Audio capture
    pub audio_device: &'static str,
    pub audio_sample_rate: u32,
    pub audio_channels: u32,
    pub audio_frame_duration_ms: u32,
    pub audio_queue_capacity: usize,

    // Network endpoints (static part)
    pub deepgram_url: &'static str,
    pub analysis_url: &'static str,

    // Credential (dynamic part, may be overridden at runtime)
    pub api_key: String,

    // Transcription parameters
    pub model: &'static str,
    pub language: &'static str,
    pub endpointing_ms: u32,
}

impl Config {
    /// Build the configuration from environment variables set at compile time.
    /// All values originate from config.toml; the Deepgram key may be
    /// overridden at runtime through DEEPGRAM_API_KEY.
    pub fn new() -> Result<Self, &'static str> {
        let api_key = std::env::var("DEEPGRAM_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .unwrap_or_else(|| env!("DEEPGRAM_API_KEY_DEFAULT").to_string());

        Ok(Self {
            audio_device: env!("AUDIO_DEVICE"),
            audio_sample_rate: env!("AUDIO_SAMPLE_RATE")
                .parse()
                .map_err(|_| "Failed to parse AUDIO_SAMPLE_RATE")?,
            audio_channels: env!("AUDIO_CHANNELS")
                .parse()
                .map_err(|_| "Failed to parse AUDIO_CHANNELS")?,
            audio_frame_duration_ms: env!("AUDIO_FRAME_DURATION_MS")
                .parse()
                .map_err(|_| "Failed to parse AUDIO_FRAME_DURATION_MS")?,
            audio_queue_capacity: env!("AUDIO_QUEUE_CAPACITY")
                .parse()
                .map_err(|_| "Failed to parse AUDIO_QUEUE_CAPACITY")?,

            deepgram_url: env!("DEEPGRAM_URL"),
            analysis_url: env!("ANALYSIS_URL"),

            api_key,

            model: env!("DG_MODEL"),
            language: env!("DG_LANGUAGE"),
            endpointing_ms: env!("DG_ENDPOINTING_MS")
                .parse()
                .map_err(|_| "Failed to parse DG_ENDPOINTING_MS")?,
        })
    }
}
