//! Error types for the voxline pipeline

use thiserror::Error;

/// Result type alias for voxline operations
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors that can occur in the voxline pipeline
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid session or trial identifier
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// Speech-to-text engine error
    #[error("STT error: {0}")]
    Stt(String),

    /// Language-model engine error
    #[error("LLM error: {0}")]
    Llm(String),

    /// Text-to-speech engine error
    #[error("TTS error: {0}")]
    Tts(String),

    /// A pipeline stage service call failed
    #[error("stage {stage} failed: {message}")]
    Stage {
        /// Which stage failed
        stage: &'static str,
        /// Error detail from the stage response or transport
        message: String,
    },

    /// Audio error
    #[error("audio error: {0}")]
    Audio(String),

    /// Resource not found
    #[error("not found: {0}")]
    NotFound(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
