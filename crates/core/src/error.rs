//! Unified error types for stowaway.
//!
//! Every variant renders with a stable code prefix so the host can surface
//! it verbatim to the page.

use tokio_rusqlite::rusqlite;

/// Unified error type for the cache and sync engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input (malformed event, unsupported method, ...).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// No response was obtained from the network.
    #[error("TRANSPORT_FAILED: {0}")]
    Transport(String),

    /// The server answered but its body exceeds the configured limit.
    #[error("RESPONSE_TOO_LARGE: {0}")]
    ResponseTooLarge(String),

    /// The server answered but the response could not be read in full.
    #[error("RESPONSE_FAILED: {0}")]
    ResponseFailed(String),

    /// Neither network nor cache could satisfy the request.
    #[error("CACHE_MISS: {0}")]
    CacheMiss(String),

    /// Database operation failed.
    #[error("CACHE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("CACHE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// A stored row could not be decoded.
    #[error("CACHE_ERROR: corrupt entry: {0}")]
    CorruptEntry(String),

    /// Invalid URL.
    #[error("INVALID_URL: {0}")]
    InvalidUrl(String),

    /// Message-channel payload with an unrecognized `type`.
    #[error("UNKNOWN_MESSAGE: {0}")]
    UnknownMessage(String),

    /// The platform refused to display a notification.
    #[error("NOTIFICATION_FAILED: {0}")]
    Notification(String),

    /// A controlled client could not be focused, navigated, or messaged.
    #[error("CLIENT_ERROR: {0}")]
    Client(String),

    /// Operation not valid in the current lifecycle state.
    #[error("INVALID_STATE: {0}")]
    InvalidState(String),

    /// Configuration could not be loaded or is invalid.
    #[error("CONFIG_ERROR: {0}")]
    Config(String),
}

impl Error {
    /// Connectivity failures are the only errors that queue mutations or
    /// trigger a cache fallback. Anything that happens after the server
    /// answered is not one of them.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_))
    }

    /// Storage-side failures; these are logged and swallowed on request paths.
    pub fn is_storage(&self) -> bool {
        matches!(self, Error::Database(_) | Error::MigrationFailed(_) | Error::CorruptEntry(_))
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::CorruptEntry(err.to_string())
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::InvalidUrl(err.to_string())
    }
}

impl From<crate::config::ConfigError> for Error {
    fn from(err: crate::config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}
