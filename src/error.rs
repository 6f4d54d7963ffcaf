//! Error taxonomy for a call session

/// Result type alias using [`CallError`]
pub type Result<T> = std::result::Result<T, CallError>;

/// Errors that can surface from a call session.
///
/// Stale signaling (events for a peer that already left or never joined) and
/// unacknowledged delivery are not errors: they are dropped and logged.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// Camera or microphone permission refused, or no device present
    #[error("Camera/microphone access denied: {0}")]
    MediaAccessDenied(String),

    /// The user cancelled the screen picker
    #[error("Screen share denied: {0}")]
    ScreenShareDenied(String),

    /// Screen share stopped without a camera stream to go back to
    #[error("No camera stream to restore")]
    NoPriorCameraStream,

    /// Offer/answer creation or description setting rejected
    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    /// Signaling transport error
    #[error("Signaling error: {0}")]
    Signaling(String),

    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Telemetry/report endpoint error
    #[error("Report error: {0}")]
    Report(String),

    /// The call loop is gone
    #[error("Call session closed")]
    SessionClosed,

    #[error("WebRTC error: {0}")]
    WebRtc(#[from] webrtc::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl CallError {
    /// Errors that abort a user action and must be shown to the user
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            CallError::MediaAccessDenied(_) | CallError::ScreenShareDenied(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_media_errors_are_user_facing() {
        assert!(CallError::MediaAccessDenied("no camera".into()).is_user_facing());
        assert!(CallError::ScreenShareDenied("cancelled".into()).is_user_facing());
        assert!(!CallError::Negotiation("bad sdp".into()).is_user_facing());
        assert!(!CallError::NoPriorCameraStream.is_user_facing());
    }
}
