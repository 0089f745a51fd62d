/// Result alias that carries the custom [`LipsyncError`] type.
pub type Result<T> = std::result::Result<T, LipsyncError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum LipsyncError {
    /// Free-form failure that does not fit a more specific variant.
    #[error("{0}")]
    Message(String),
    /// An argument was outside the range the operation accepts.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// The audio file could not be decoded.
    #[error("failed to decode audio: {0}")]
    Decode(#[from] hound::Error),
    /// JSON (configuration or exported data) could not be read or written.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    /// The external phoneme recognizer failed.
    #[error("recognition failed: {0}")]
    Recognition(String),
    /// A shared lock was poisoned by a thread that panicked while holding it.
    #[error("{0} has been poisoned")]
    Poisoned(&'static str),
}

impl LipsyncError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}
