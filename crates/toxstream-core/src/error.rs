//! Error types for toxstream

/// Result type alias using toxstream's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for toxstream operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Payload is not valid UTF-8
    #[error("decoding error: {0}")]
    Decoding(String),

    /// Required key attribute is absent from a message
    #[error("missing key attribute: {0}")]
    MissingKey(String),

    /// Model artifact is missing or corrupt
    #[error("model load error: {0}")]
    ModelLoad(String),

    /// Inference failed (shape/type mismatch, bad input)
    #[error("inference error: {0}")]
    Inference(String),

    /// Publishing to the output topic failed
    #[error("publish error: {0}")]
    Publish(String),

    /// Appending to the warehouse table failed
    #[error("sink error: {0}")]
    Sink(String),

    /// Stream processing errors
    #[error("stream error: {0}")]
    Stream(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Network/IO errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a new decoding error
    pub fn decoding(msg: impl Into<String>) -> Self {
        Self::Decoding(msg.into())
    }

    /// Create a new missing-key error
    pub fn missing_key(msg: impl Into<String>) -> Self {
        Self::MissingKey(msg.into())
    }

    /// Create a new model-load error
    pub fn model_load(msg: impl Into<String>) -> Self {
        Self::ModelLoad(msg.into())
    }

    /// Create a new inference error
    pub fn inference(msg: impl Into<String>) -> Self {
        Self::Inference(msg.into())
    }

    /// Create a new publish error
    pub fn publish(msg: impl Into<String>) -> Self {
        Self::Publish(msg.into())
    }

    /// Create a new sink error
    pub fn sink(msg: impl Into<String>) -> Self {
        Self::Sink(msg.into())
    }

    /// Create a new stream error
    pub fn stream(msg: impl Into<String>) -> Self {
        Self::Stream(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
