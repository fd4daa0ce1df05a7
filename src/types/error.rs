use thiserror::Error;

/// Errors surfaced to the worker state machine.
///
/// The top-level rescue in `engine::worker` branches on the variant, so the
/// adapters are responsible for classifying raw failures into the right
/// kind before they cross this boundary.
#[derive(Debug, Clone, Error)]
pub enum PostboxError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("IMAP protocol error: {0}")]
    Protocol(String),

    #[error("connection error: {0}")]
    Io(String),

    #[error("timed out: {0}")]
    Timeout(String),

    /// Another machine rotated the user's UID cursor while we held the
    /// session. Expected under cluster handoff; never counted as a fault.
    #[error("UID validity changed under worker for user {0}")]
    UidValidityContention(String),

    #[error("worker pool failure: {0}")]
    Bridge(String),

    #[error("storage error: {0}")]
    Store(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("user not found: {0}")]
    UserNotFound(String),

    /// Stop signal observed mid-step. Control flow, not a fault.
    #[error("stop requested")]
    Stopped,
}

impl PostboxError {
    /// Short class name used to key `error.<Class>` metrics.
    pub fn class(&self) -> &'static str {
        match self {
            PostboxError::Auth(_) => "Auth",
            PostboxError::Protocol(_) => "Protocol",
            PostboxError::Io(_) => "Io",
            PostboxError::Timeout(_) => "Timeout",
            PostboxError::UidValidityContention(_) => "UidValidityContention",
            PostboxError::Bridge(_) => "Bridge",
            PostboxError::Store(_) => "Store",
            PostboxError::Config(_) => "Config",
            PostboxError::UserNotFound(_) => "UserNotFound",
            PostboxError::Stopped => "Stopped",
        }
    }

    /// Expected outcomes the top-level handler neither error-logs nor
    /// counts against the user.
    pub fn is_silent(&self) -> bool {
        matches!(
            self,
            PostboxError::Stopped | PostboxError::UidValidityContention(_)
        )
    }
}

impl From<std::io::Error> for PostboxError {
    fn from(err: std::io::Error) -> Self {
        PostboxError::Io(err.to_string())
    }
}

impl From<rusqlite::Error> for PostboxError {
    fn from(err: rusqlite::Error) -> Self {
        PostboxError::Store(err.to_string())
    }
}

impl From<r2d2::Error> for PostboxError {
    fn from(err: r2d2::Error) -> Self {
        PostboxError::Store(err.to_string())
    }
}

impl From<toml::de::Error> for PostboxError {
    fn from(err: toml::de::Error) -> Self {
        PostboxError::Config(err.to_string())
    }
}
