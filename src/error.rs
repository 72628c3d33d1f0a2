use std::io;
use std::path::PathBuf;

/// Custom error type for auto_deployer operations
#[derive(Debug, thiserror::Error)]
pub enum DeployerError {
    #[error("Git operation failed: {operation}\n{message}")]
    GitOperationFailed { operation: String, message: String },

    #[error("Not a git repository: {}", .0.display())]
    NotAGitRepository(PathBuf),

    #[error("Target for path {} already exists", .0.display())]
    DuplicateTarget(PathBuf),

    #[error("Target for path {} not found", .0.display())]
    UnknownTarget(PathBuf),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Notification delivery failed: {0}")]
    NotificationFailed(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Helper type for Results that use DeployerError
pub type Result<T> = std::result::Result<T, DeployerError>;
