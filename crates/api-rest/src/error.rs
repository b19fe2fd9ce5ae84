//! Mapping from core failures to HTTP responses.
//!
//! Handlers return `(StatusCode, &'static str)` on failure so that internal
//! error text never reaches the client; the full error is logged instead.

use axum::http::StatusCode;
use lab_core::LabError;

pub type ApiError = (StatusCode, &'static str);
pub type ApiResult<T> = Result<T, ApiError>;

/// Status and public body for a core error.
pub fn status_for(err: &LabError) -> ApiError {
    match err {
        LabError::NotFound { .. } => (StatusCode::NOT_FOUND, "Not found"),
        LabError::InvalidInput(_)
        | LabError::Text(_)
        | LabError::Cpf(_)
        | LabError::UnknownVariant { .. } => (StatusCode::BAD_REQUEST, "Bad request"),
        LabError::MissingPrice { .. } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            "Exam has no pricing plan to bill",
        ),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "Internal error"),
    }
}

/// Builds a `map_err` adapter that logs `err` under `action` and maps it.
pub fn lab_error(action: &'static str) -> impl Fn(LabError) -> ApiError {
    move |err| {
        tracing::error!(action, error = %err, "request failed");
        status_for(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&LabError::NotFound {
                entity: "order",
                id: 1
            })
            .0,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&LabError::InvalidInput("no exam selected".into())).0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&LabError::MissingPrice { exam_id: 3 }).0,
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(&LabError::Pdf("boom".into())),
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        );
    }
}
