//! Error types for Cartograph

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using Cartograph's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Cartograph error types with helpful messages
#[derive(Error, Debug)]
pub enum Error {
    // Input errors (E001-E099)
    #[error("Resource map not found: {0}. Compilation cannot proceed without the base resource graph.")]
    ResourceMapMissing(PathBuf),

    #[error("Invalid artifact: {0}")]
    ArtifactInvalid(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Network errors (E100-E199)
    #[error("Network error: {0}. Check your internet connection.")]
    NetworkError(#[from] reqwest::Error),

    #[error("LLM API error: {0}. Check your API key with `cartograph config get api_key`.")]
    LlmError(String),

    #[error("Rate limited. Waiting {0} seconds before retry.")]
    RateLimited(u64),

    // Database errors (E400-E499)
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::ResourceMapMissing(_) => "E001",
            Self::ArtifactInvalid(_) => "E002",
            Self::InvalidInput(_) => "E003",
            Self::NetworkError(_) => "E100",
            Self::LlmError(_) => "E101",
            Self::RateLimited(_) => "E102",
            Self::DatabaseError(_) => "E400",
            Self::ConfigError(_) => "E600",
            Self::Other(_) | Self::Io(_) | Self::Json(_) => "E9999",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::ResourceMapMissing(PathBuf::from("x.json")).code(), "E001");
        assert_eq!(Error::LlmError("boom".into()).code(), "E101");
        assert_eq!(Error::ConfigError("bad".into()).code(), "E600");
    }

    #[test]
    fn test_resource_map_missing_message() {
        let err = Error::ResourceMapMissing(PathBuf::from("/tmp/resource_map.json"));
        assert!(err.to_string().contains("resource_map.json"));
        assert!(err.to_string().contains("cannot proceed"));
    }
}
