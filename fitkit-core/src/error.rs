//! Error types for the fitkit-core crate.

use thiserror::Error;

/// Top-level error type for experiment resolution and training.
#[derive(Debug, Error)]
pub enum FitError {
    #[error("Unknown {kind} type '{name}' (registered: {available})")]
    UnknownType {
        kind: &'static str,
        name: String,
        available: String,
    },

    #[error("Invalid kwargs for {kind} '{name}': {source}")]
    InvalidKwargs {
        kind: &'static str,
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Shape mismatch: {0}")]
    Shape(String),

    #[error("Data error: {0}")]
    Data(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("Invalid state: {0}")]
    State(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Config extraction error: {0}")]
    Figment(#[from] Box<figment::Error>),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FitError>;

impl FitError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn shape(msg: impl Into<String>) -> Self {
        Self::Shape(msg.into())
    }

    pub fn data(msg: impl Into<String>) -> Self {
        Self::Data(msg.into())
    }

    pub fn training(msg: impl Into<String>) -> Self {
        Self::Training(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Whether this error came from a registry lookup miss.
    pub fn is_lookup(&self) -> bool {
        matches!(self, Self::UnknownType { .. })
    }
}
