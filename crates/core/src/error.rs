// Central Error Type for the Application

use thiserror::Error;

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The document store failed or is unreachable
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Validation failures, whether raised by the domain or the engine
    pub fn is_validation(&self) -> bool {
        use crate::domain::DomainError;
        match self {
            AppError::Validation(_) => true,
            AppError::Domain(
                DomainError::CyclicDependency { .. }
                | DomainError::InvalidSchedule(_)
                | DomainError::InvalidPriority(_)
                | DomainError::ValidationError(_),
            ) => true,
            _ => false,
        }
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

// Note: sqlx::Error conversion is handled in infra-sqlite crate
// by converting to AppError::Database(String)
