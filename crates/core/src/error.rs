// Central Error Type for the Framework

use thiserror::Error;

/// Application-level error type
///
/// Variants follow the failure taxonomy of an import run: configuration
/// problems stop a job before it starts, transport failures abort it,
/// per-file unavailability can be handled by the caller, data errors come
/// out of loaders and transforms.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("File unavailable: {path} ({reason})")]
    FileUnavailable { path: String, reason: String },

    #[error("Data error: {0}")]
    Data(String),

    #[error("Missing key: {0}")]
    MissingKey(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Facility error: {0}")]
    Facility(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Short machine-friendly name of the variant, used in structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Config(_) => "config",
            AppError::Transport(_) => "transport",
            AppError::FileUnavailable { .. } => "file_unavailable",
            AppError::Data(_) => "data",
            AppError::MissingKey(_) => "missing_key",
            AppError::Database(_) => "database",
            AppError::Io(_) => "io",
            AppError::Serialization(_) => "serialization",
            AppError::Facility(_) => "facility",
            AppError::NotFound(_) => "not_found",
            AppError::Internal(_) => "internal",
        }
    }

    pub fn is_file_unavailable(&self) -> bool {
        matches!(self, AppError::FileUnavailable { .. })
    }
}

impl From<::config::ConfigError> for AppError {
    fn from(err: ::config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
