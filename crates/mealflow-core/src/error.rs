//! Error types shared by the domain services and the storage backends.

use thiserror::Error;

/// Message handed to callers in place of storage failure detail
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

/// Failures raised by a persistence backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[cfg(feature = "sqlite")]
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A persisted row or entry did not parse into the domain model
    #[error("corrupt {entity} record: {detail}")]
    Corrupt { entity: &'static str, detail: String },

    /// Host or network failure reported by a non-SQL backend
    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn corrupt(entity: &'static str, detail: impl Into<String>) -> Self {
        StoreError::Corrupt {
            entity,
            detail: detail.into(),
        }
    }
}

/// Outcome of a failed meal-ordering operation
#[derive(Debug, Error)]
pub enum MealflowError {
    /// An id did not resolve (patient, tray, meal request)
    #[error("{0}")]
    NotFound(String),

    /// Safety rules rejected the selected recipes
    #[error("{}", .violations.join("\n"))]
    Validation { violations: Vec<String> },

    /// Illegal state transition
    #[error("{0}")]
    InvalidState(String),

    /// Malformed or missing input, rejected before touching storage
    #[error("{0}")]
    InputShape(String),

    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),
}

impl MealflowError {
    pub fn not_found(what: &str) -> Self {
        MealflowError::NotFound(format!("{what} not found"))
    }

    pub fn input(message: impl Into<String>) -> Self {
        MealflowError::InputShape(message.into())
    }

    /// Stable machine-readable kind, used by transports that only carry text
    pub fn kind(&self) -> &'static str {
        match self {
            MealflowError::NotFound(_) => "not_found",
            MealflowError::Validation { .. } => "validation",
            MealflowError::InvalidState(_) => "invalid_state",
            MealflowError::InputShape(_) => "input_shape",
            MealflowError::Storage(_) => "storage",
        }
    }

    /// HTTP-equivalent status for this error
    pub fn status_code(&self) -> u16 {
        match self {
            MealflowError::NotFound(_) => 404,
            MealflowError::Validation { .. } => 422,
            MealflowError::InvalidState(_) | MealflowError::InputShape(_) => 400,
            MealflowError::Storage(_) => 500,
        }
    }

    /// Text safe to show a caller. Storage detail stays server-side.
    pub fn public_message(&self) -> String {
        match self {
            MealflowError::Storage(_) => INTERNAL_ERROR_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }

    /// Log storage failures with full detail; domain outcomes pass through quietly.
    ///
    /// The service does this for every operation. Callers that hit the store
    /// outside an operation, such as when opening it, use it themselves.
    pub fn logged(self, operation: &'static str) -> Self {
        match &self {
            MealflowError::Storage(err) => {
                tracing::error!(operation, error = %err, "storage failure, unit of work rolled back");
            }
            other => {
                tracing::debug!(operation, kind = other.kind(), message = %other, "operation refused");
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_message_is_newline_joined() {
        let err = MealflowError::Validation {
            violations: vec!["first".to_string(), "second".to_string()],
        };
        assert_eq!(err.to_string(), "first\nsecond");
        assert_eq!(err.status_code(), 422);
    }

    #[test]
    fn storage_detail_is_hidden_from_callers() {
        let err = MealflowError::from(StoreError::Backend("disk on fire".to_string()));
        assert_eq!(err.public_message(), INTERNAL_ERROR_MESSAGE);
        assert_eq!(err.status_code(), 500);
        assert!(err.to_string().contains("disk on fire"));
    }

    #[test]
    fn domain_errors_surface_verbatim() {
        let err = MealflowError::not_found("Patient");
        assert_eq!(err.public_message(), "Patient not found");
        assert_eq!(err.status_code(), 404);
        assert_eq!(
            MealflowError::InvalidState("Tray already at final status".into()).status_code(),
            400
        );
    }
}
