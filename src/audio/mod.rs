//! audio - Microphone capture and PCM frame encoding
//!
//! Uses ALSA for device I/O. The capture thread is a dedicated OS thread
//! (not a tokio task) so the real-time read loop never waits on async
//! network work; encoded frames cross into the async world through a
//! bounded channel that is never blocked on.

mod alsa_device;
mod capture;
pub mod encode;

pub use capture::{AudioFrame, CaptureConfig, CaptureSystem};

/// Classified microphone-acquisition failures.
///
/// Each variant maps to a fixed, user-facing message; callers present these
/// verbatim rather than inventing their own wording.
#[derive(Debug, Clone)]
pub enum CaptureError {
    PermissionDenied,
    DeviceNotFound,
    /// Device exists but is held by another application.
    DeviceBusy,
    /// The device cannot satisfy the requested format/rate/channel layout.
    ConstraintsUnsupported,
    /// Access blocked by a system policy rather than plain permissions.
    SecurityRestricted,
    Interrupted,
    /// Device opened but the processing pipeline failed to come up.
    ProcessorInitFailed(String),
    Unknown(String),
}

impl std::fmt::Display for CaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureError::PermissionDenied => write!(
                f,
                "Microphone access denied. Please allow microphone access and try again."
            ),
            CaptureError::DeviceNotFound => write!(
                f,
                "No microphone found. Please connect a microphone and try again."
            ),
            CaptureError::DeviceBusy => write!(
                f,
                "Microphone is in use by another application. Close it and try again."
            ),
            CaptureError::ConstraintsUnsupported => write!(
                f,
                "The microphone does not support the required audio format (16 kHz mono)."
            ),
            CaptureError::SecurityRestricted => write!(
                f,
                "Microphone access is restricted by system security policy."
            ),
            CaptureError::Interrupted => {
                write!(f, "Microphone initialization was interrupted. Try again.")
            }
            CaptureError::ProcessorInitFailed(e) => {
                write!(f, "Failed to initialize audio processing: {}", e)
            }
            CaptureError::Unknown(e) => write!(f, "Failed to access microphone: {}", e),
        }
    }
}

impl std::error::Error for CaptureError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_error_messages_are_stable() {
        assert!(
            CaptureError::PermissionDenied
                .to_string()
                .starts_with("Microphone access denied")
        );
        assert!(CaptureError::DeviceNotFound.to_string().contains("No microphone found"));
        assert!(CaptureError::DeviceBusy.to_string().contains("in use by another application"));
        assert!(
            CaptureError::Unknown("boom".to_string())
                .to_string()
                .contains("boom")
        );
    }
}
