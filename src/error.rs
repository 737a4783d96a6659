use thiserror::Error;

/// Everything that can go wrong between a raw frame and a typed callback.
///
/// Per-message kinds (`Decode`, `Classification`, `Adapter` raised while
/// handling a frame, `Protocol`) are reported and dropped by the session loop.
/// Only subscribe-time and construction-time errors reach the caller.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Malformed JSON or an unexpected shape for one message.
    #[error("decode error on {context}: {reason}")]
    Decode { context: String, reason: String },

    /// Channel or event tag that no handler is mapped to.
    #[error("unclassified message (tag {tag:?}): {raw}")]
    Classification { tag: String, raw: String },

    /// Symbol or channel name cannot be mapped for the requested instrument.
    #[error("adapter error: {0}")]
    Adapter(String),

    /// Subscribe called before the matching callback was registered.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The exchange answered with an error event.
    #[error("exchange reported error {code}: {message}")]
    Protocol { code: String, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    /// Settings could not be loaded.
    #[error("settings error: {0}")]
    Config(#[from] config::ConfigError),
}

pub type FeedResult<T> = Result<T, FeedError>;

impl FeedError {
    pub fn decode(context: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        FeedError::Decode { context: context.into(), reason: reason.to_string() }
    }

    /// Stable label used for log fields and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            FeedError::Decode { .. } => "decode",
            FeedError::Classification { .. } => "classification",
            FeedError::Adapter(_) => "adapter",
            FeedError::Configuration(_) => "configuration",
            FeedError::Protocol { .. } => "protocol",
            FeedError::Transport(_) => "transport",
            FeedError::Config(_) => "config",
        }
    }

    /// Whether the error should end the session. Nothing raised while
    /// handling a single frame ever is.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FeedError::Config(_))
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(e: serde_json::Error) -> Self {
        FeedError::decode("json", e)
    }
}
