//! Structured errors for the stowaway host.

use stowaway_core::Error;

/// Errors raised while decoding or answering one protocol line.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// The line is not a recognizable event.
    #[error("INVALID_INPUT: {0}")]
    InvalidEvent(String),

    /// The engine refused or failed the event.
    #[error(transparent)]
    Engine(#[from] Error),
}

impl HostError {
    /// Stable code prefix of the rendered message, e.g. `CACHE_MISS`.
    pub fn code(&self) -> &'static str {
        let err = match self {
            HostError::InvalidEvent(_) => return "INVALID_INPUT",
            HostError::Engine(err) => err,
        };
        match err {
            Error::InvalidInput(_) => "INVALID_INPUT",
            Error::Transport(_) => "TRANSPORT_FAILED",
            Error::ResponseTooLarge(_) => "RESPONSE_TOO_LARGE",
            Error::ResponseFailed(_) => "RESPONSE_FAILED",
            Error::CacheMiss(_) => "CACHE_MISS",
            Error::Database(_) | Error::MigrationFailed(_) | Error::CorruptEntry(_) => "CACHE_ERROR",
            Error::InvalidUrl(_) => "INVALID_URL",
            Error::UnknownMessage(_) => "UNKNOWN_MESSAGE",
            Error::Notification(_) => "NOTIFICATION_FAILED",
            Error::Client(_) => "CLIENT_ERROR",
            Error::InvalidState(_) => "INVALID_STATE",
            Error::Config(_) => "CONFIG_ERROR",
        }
    }
}

impl From<serde_json::Error> for HostError {
    fn from(err: serde_json::Error) -> Self {
        HostError::InvalidEvent(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(HostError::InvalidEvent("x".into()).code(), "INVALID_INPUT");
        assert_eq!(HostError::from(Error::CacheMiss("u".into())).code(), "CACHE_MISS");
        assert_eq!(HostError::from(Error::UnknownMessage("NOPE".into())).code(), "UNKNOWN_MESSAGE");
        assert_eq!(HostError::from(Error::ResponseTooLarge("big".into())).code(), "RESPONSE_TOO_LARGE");
    }

    #[test]
    fn test_engine_message_passes_through() {
        let err = HostError::from(Error::Transport("offline".into()));
        assert_eq!(err.to_string(), "TRANSPORT_FAILED: offline");
    }
}
