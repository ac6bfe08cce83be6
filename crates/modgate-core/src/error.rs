//! Error types for modgate

/// Result type alias using modgate's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for moderation operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Image could not be downloaded or decoded; surfaced to callers
    #[error("image unavailable: {0}")]
    ImageUnavailable(String),

    /// External classifier transport or health failure; never surfaced,
    /// the pipeline degrades to its pattern-derived result
    #[error("classifier error: {0}")]
    Classifier(String),

    /// Durable repository failure; reads downgrade to a miss, writes are
    /// logged and swallowed
    #[error("repository error: {0}")]
    Repo(String),

    /// Cache/Bloom KV failure; reads downgrade to "possibly match"
    #[error("kv error: {0}")]
    Kv(String),

    /// Derived Bloom bit offset exceeds the filter size; a bug, surfaced
    #[error("bit offset {offset} out of range for {bits}-bit filter")]
    OffsetOutOfRange { offset: u64, bits: u64 },

    /// Request context was cancelled or timed out
    #[error("operation cancelled")]
    Cancelled,

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Network/IO errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a new image-unavailable error
    pub fn image_unavailable(msg: impl Into<String>) -> Self {
        Self::ImageUnavailable(msg.into())
    }

    /// Create a new classifier error
    pub fn classifier(msg: impl Into<String>) -> Self {
        Self::Classifier(msg.into())
    }

    /// Create a new repository error
    pub fn repo(msg: impl Into<String>) -> Self {
        Self::Repo(msg.into())
    }

    /// Create a new kv error
    pub fn kv(msg: impl Into<String>) -> Self {
        Self::Kv(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error may be returned from a public moderation call.
    ///
    /// Infrastructure flakiness must never turn a would-be-clean verdict
    /// into a user-visible error; only explicit data errors escape.
    pub fn is_surfaced(&self) -> bool {
        matches!(
            self,
            Self::ImageUnavailable(_) | Self::Cancelled | Self::OffsetOutOfRange { .. }
        )
    }
}
