//! Error types for Promptloom

use thiserror::Error;

/// Core error type for Promptloom operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Embedding provider error: {0}")]
    Embedding(String),

    #[error("LLM provider error: {0}")]
    Llm(String),

    #[error("Export API error: {0}")]
    Export(String),

    #[error("Family not found: {0}")]
    FamilyNotFound(String),

    #[error("Prompt not found: {0}")]
    PromptNotFound(String),

    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("{0}")]
    Other(String),
}

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
