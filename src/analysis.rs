//! Client for the downstream sentiment-analysis service.
//!
//! One call per finalized transcript. The call is bounded by a fixed
//! timeout, and the three interesting failure modes (timed out, service
//! unreachable, service answered with an error) stay distinguishable for
//! the caller.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Deserialize)]
pub struct SentimentResponse {
    /// -1.0 (very negative) to 1.0 (very positive)
    pub sentiment_score: f32,
    /// "positive", "negative", or "neutral"
    pub sentiment_type: String,
    /// 0.0 (very weak emotion) to 1.0 (very strong emotion)
    pub intensity: f32,
    pub keywords: Vec<String>,
}

#[derive(Debug)]
pub enum AnalysisError {
    Timeout,
    Unreachable(String),
    Server(u16),
    InvalidResponse(String),
}

impl std::fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalysisError::Timeout => write!(f, "Sentiment analysis timed out"),
            AnalysisError::Unreachable(e) => {
                write!(f, "Sentiment analysis service unreachable: {}", e)
            }
            AnalysisError::Server(status) => {
                write!(f, "Sentiment analysis service error (HTTP {})", status)
            }
            AnalysisError::InvalidResponse(e) => {
                write!(f, "Invalid sentiment analysis response: {}", e)
            }
        }
    }
}

impl std::error::Error for AnalysisError {}

#[derive(Debug, Clone)]
pub struct AnalysisClient {
    client: Client,
    base_url: String,
}

impl AnalysisClient {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Analyze one finalized transcript.
    pub async fn analyze(&self, text: &str) -> Result<SentimentResponse, AnalysisError> {
        let url = format!("{}/process_text", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&json!({ "text": text }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AnalysisError::Timeout
                } else {
                    AnalysisError::Unreachable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AnalysisError::Server(status.as_u16()));
        }

        response
            .json::<SentimentResponse>()
            .await
            .map_err(|e| AnalysisError::InvalidResponse(e.to_string()))
    }
}
