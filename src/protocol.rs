//! Wire types for the Deepgram live-transcription WebSocket.

use serde::Deserialize;

/// One transcript update delivered to the consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEvent {
    pub text: String,
    pub is_final: bool,
}

/// Parsed inbound server message, reduced to what the client acts on.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Transcript(TranscriptEvent),
    /// Service-reported failure; the connection stays usable.
    ServiceError(String),
}

#[derive(Deserialize, Debug)]
struct ServerMessage {
    channel: Option<Channel>,
    #[serde(default)]
    is_final: bool,
    error: Option<String>,
}

#[derive(Deserialize, Debug)]
struct Channel {
    alternatives: Vec<Alternative>,
}

#[derive(Deserialize, Debug)]
struct Alternative {
    transcript: Option<String>,
}

/// Parse one inbound text payload.
///
/// Returns `None` for payloads that carry nothing actionable: unparseable
/// JSON, messages without an alternative, and empty or whitespace-only
/// transcripts (the service sends those continuously between utterances).
pub fn parse_server_message(payload: &str) -> Option<ServerEvent> {
    let msg: ServerMessage = match serde_json::from_str(payload) {
        Ok(msg) => msg,
        Err(e) => {
            log::debug!("Ignoring unparseable server message: {}", e);
            return None;
        }
    };

    if let Some(err) = msg.error {
        return Some(ServerEvent::ServiceError(err));
    }

    let alternative = msg.channel?.alternatives.into_iter().next()?;
    let transcript = alternative.transcript?;
    if transcript.trim().is_empty() {
        return None;
    }

    Some(ServerEvent::Transcript(TranscriptEvent {
        text: transcript,
        is_final: msg.is_final,
    }))
}
