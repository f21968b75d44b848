//! Error types for the companion shell

use thiserror::Error;

/// Result type alias for companion operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the companion shell
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// No active session / storage not ready; blocks turn start
    #[error("session not ready: {0}")]
    SessionNotReady(String),

    /// Session/storage initialization failure (self-healing, retried)
    #[error("initialization error: {0}")]
    Initialization(String),

    /// Persistence failure; never blocks the in-memory flow
    #[error("storage error: {0}")]
    Storage(String),

    /// LLM/network failure; aborts the current turn
    #[error("transport error: {0}")]
    Transport(String),

    /// Microphone/permission/network failure during recognition
    #[error("recognition error: {0}")]
    Recognition(String),

    /// Speech synthesis failure; aborts only the speak step
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Audio device/decode error
    #[error("audio error: {0}")]
    Audio(String),

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

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}
