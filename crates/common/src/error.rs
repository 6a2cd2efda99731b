use thiserror::Error as ThisError;

/// Session lifecycle violations. Always scoped to the single request that
/// triggered them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ThisError)]
pub enum SessionStateError {
    #[error("no session")]
    NoSession,
    #[error("already connected")]
    AlreadyConnected,
    #[error("not connected")]
    NotConnected,
    #[error("not logged in")]
    NotLoggedIn,
    #[error("already paired")]
    AlreadyPaired,
}

#[derive(Debug, ThisError)]
pub enum Error {
    /// Missing or malformed request field. Never retried.
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    SessionState(#[from] SessionStateError),

    /// Device-identity lookup or connect failure; fatal to one tenant's
    /// supervision attempt.
    #[error("transport error: {0}")]
    Transport(String),

    /// Webhook POST failure. Logged by the dispatcher, never propagated to
    /// the event path.
    #[error("webhook delivery failed: {0}")]
    Delivery(String),

    #[error("media fetch failed after {attempts} attempt(s): {reason}")]
    MediaFetch { attempts: u32, reason: String },

    #[error("offload failed: {0}")]
    Offload(String),

    #[error("transcode failed: {0}")]
    Transcode(String),

    #[error("store error: {0}")]
    Store(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn transport(msg: impl std::fmt::Display) -> Self {
        Self::Transport(msg.to_string())
    }

    pub fn store(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Store(Box::new(err))
    }

    /// Whether the failure was caused by the caller rather than the system.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
