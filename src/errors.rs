use sea_orm::error::DbErr;
use serde::Serialize;
use std::fmt;

/// Broad classes of failure, as presented to the person at the counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// The store is unreachable or rejected a statement.
    Connectivity,
    /// Input or business-rule rejection, detected before anything is written.
    Validation,
    /// The write would break a uniqueness rule.
    Conflict,
    NotFound,
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorCategory::Connectivity => "connectivity",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Conflict => "conflict",
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::Internal => "internal",
        };
        f.write_str(label)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Single source of truth for error-to-category mapping.
    pub fn category(&self) -> ErrorCategory {
        match self {
            ServiceError::DatabaseError(_) => ErrorCategory::Connectivity,
            ServiceError::ValidationError(_)
            | ServiceError::InvalidStatus(_)
            | ServiceError::InvalidOperation(_)
            | ServiceError::InsufficientStock(_) => ErrorCategory::Validation,
            ServiceError::Conflict(_) => ErrorCategory::Conflict,
            ServiceError::NotFound(_) => ErrorCategory::NotFound,
            ServiceError::Other(_) => ErrorCategory::Internal,
        }
    }

    /// Message safe to show in a blocking notification. Driver and internal
    /// details stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            ServiceError::DatabaseError(_) => {
                "The database is unavailable or rejected the operation".to_string()
            }
            ServiceError::Other(_) => "An unexpected error occurred".to_string(),
            ServiceError::NotFound(msg)
            | ServiceError::ValidationError(msg)
            | ServiceError::InvalidStatus(msg)
            | ServiceError::InvalidOperation(msg)
            | ServiceError::InsufficientStock(msg)
            | ServiceError::Conflict(msg) => msg.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_mapping() {
        assert_eq!(
            ServiceError::DatabaseError(DbErr::Custom("boom".into())).category(),
            ErrorCategory::Connectivity
        );
        assert_eq!(
            ServiceError::InsufficientStock("x".into()).category(),
            ErrorCategory::Validation
        );
        assert_eq!(
            ServiceError::InvalidStatus("x".into()).category(),
            ErrorCategory::Validation
        );
        assert_eq!(
            ServiceError::Conflict("x".into()).category(),
            ErrorCategory::Conflict
        );
        assert_eq!(
            ServiceError::NotFound("x".into()).category(),
            ErrorCategory::NotFound
        );
        assert_eq!(
            ServiceError::Other(anyhow::anyhow!("x")).category(),
            ErrorCategory::Internal
        );
    }

    #[test]
    fn user_message_hides_driver_text() {
        let err = ServiceError::DatabaseError(DbErr::Custom("syntax error near SELECT".into()));
        assert!(!err.user_message().contains("SELECT"));
        assert!(err.to_string().contains("SELECT"));

        let err = ServiceError::InsufficientStock("only 2 un left".into());
        assert_eq!(err.user_message(), "only 2 un left");
    }

    #[test]
    fn validation_errors_convert() {
        let mut errors = validator::ValidationErrors::new();
        errors.add("quantity", validator::ValidationError::new("range"));
        let err: ServiceError = errors.into();
        assert!(matches!(err, ServiceError::ValidationError(_)));
    }
}
