//! Client-facing error taxonomy for the shaping pipeline.
//!
//! Every stage (request parsing, query building, rendering) reports failures as
//! an [`ApiError`]. The variant decides the HTTP status the view layer answers
//! with; the message is what ends up in the `{"detail": ...}` body.

use thiserror::Error;

use crate::db::DbError;

#[derive(Error, Debug)]
pub enum ApiError {
    /// Malformed request syntax (bad field path, bad filter key).
    #[error("{0}")]
    Parse(String),

    /// Well-formed request that does not fit the schema.
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    PermissionDenied(String),

    /// A relation field failed while rendering its related record.
    #[error("Failed to serialize {parent}.{source_path}: {message}{}", instance.as_ref().map(|i| format!("\nObj: {}", i)).unwrap_or_default())]
    Render {
        field: String,
        parent: String,
        source_path: String,
        message: String,
        /// Debug representation of the related record, only kept in debug mode.
        instance: Option<String>,
    },

    #[error("{0}")]
    Backend(#[from] DbError),

    #[error("Improperly configured: {0}")]
    ImproperlyConfigured(String),
}

impl ApiError {
    /// HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::Parse(_) | ApiError::Validation(_) => 400,
            ApiError::NotFound(_) => 404,
            ApiError::PermissionDenied(_) => 403,
            ApiError::Render { .. } | ApiError::Backend(_) | ApiError::ImproperlyConfigured(_) => {
                500
            }
        }
    }

    /// Convert a backend failure raised while applying a client filter into a
    /// validation error carrying the backend message.
    pub fn from_filter_error(err: DbError) -> Self {
        match err {
            DbError::InvalidLookup { .. }
            | DbError::InvalidValue { .. }
            | DbError::TypeMismatch { .. } => ApiError::Validation(err.to_string()),
            other => ApiError::Backend(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ApiError::Parse("bad".into()), 400)]
    #[case(ApiError::Validation("bad".into()), 400)]
    #[case(ApiError::NotFound("gone".into()), 404)]
    #[case(ApiError::PermissionDenied("no".into()), 403)]
    #[case(ApiError::ImproperlyConfigured("oops".into()), 500)]
    fn test_status_codes(#[case] err: ApiError, #[case] expected: u16) {
        assert_eq!(err.status_code(), expected);
    }

    #[test]
    fn test_render_error_includes_instance_only_when_present() {
        let err = ApiError::Render {
            field: "location".into(),
            parent: "user".into(),
            source_path: "location".into(),
            message: "boom".into(),
            instance: None,
        };
        assert_eq!(err.to_string(), "Failed to serialize user.location: boom");

        let err = ApiError::Render {
            field: "location".into(),
            parent: "user".into(),
            source_path: "location".into(),
            message: "boom".into(),
            instance: Some("Location(1)".into()),
        };
        assert!(err.to_string().ends_with("\nObj: Location(1)"));
    }

    #[test]
    fn test_filter_errors_become_validation_errors() {
        let err = ApiError::from_filter_error(DbError::InvalidValue {
            column: "id".into(),
            value: "abc".into(),
            expected: "int".into(),
        });
        assert_eq!(err.status_code(), 400);
        assert!(err.to_string().contains("abc"));

        let err = ApiError::from_filter_error(DbError::UnknownModel {
            name: "Ghost".into(),
        });
        assert_eq!(err.status_code(), 500);
    }
}
