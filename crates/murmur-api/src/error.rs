use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Everything a workflow can fail with. Each variant maps to one HTTP status
/// and the common `{"success":false,"message":...}` body.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(&'static str),

    #[error("{0}")]
    NotFound(&'static str),

    #[error("account is not verified yet")]
    NotVerified,

    #[error("{0}")]
    InvalidCredentials(&'static str),

    #[error("verification code has expired")]
    CodeExpired,

    #[error("incorrect verification code")]
    InvalidCode,

    #[error("this user is not accepting messages")]
    NotAccepting,

    #[error("failed to send the verification email")]
    Delivery,

    #[error("internal server error")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Validation(_) | ApiError::Conflict(_) | ApiError::InvalidCode => {
                StatusCode::BAD_REQUEST
            }
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::NotVerified | ApiError::NotAccepting => StatusCode::FORBIDDEN,
            ApiError::InvalidCredentials(_) => StatusCode::UNAUTHORIZED,
            ApiError::CodeExpired => StatusCode::GONE,
            ApiError::Delivery | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if let ApiError::Internal(err) = &self {
            error!("internal error: {:#}", err);
        }

        let body = Json(json!({
            "success": false,
            "message": self.to_string(),
        }));

        (status, body).into_response()
    }
}

/// Undeserializable request bodies surface as the ValidationError member
/// instead of the framework's plaintext rejection.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_the_normalized_table() {
        let cases = [
            (ApiError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (ApiError::Conflict("taken"), StatusCode::BAD_REQUEST),
            (ApiError::NotFound("user not found"), StatusCode::NOT_FOUND),
            (ApiError::NotVerified, StatusCode::FORBIDDEN),
            (
                ApiError::InvalidCredentials("incorrect password"),
                StatusCode::UNAUTHORIZED,
            ),
            (ApiError::CodeExpired, StatusCode::GONE),
            (ApiError::InvalidCode, StatusCode::BAD_REQUEST),
            (ApiError::NotAccepting, StatusCode::FORBIDDEN),
            (ApiError::Delivery, StatusCode::INTERNAL_SERVER_ERROR),
            (
                ApiError::Internal(anyhow::anyhow!("boom")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }
}
