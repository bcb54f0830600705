// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// HTTP mapping of the core error kinds.
//
// NotFound → 404, InvalidArgument and UnsupportedFormat → 400,
// Unauthorized → 401, Busy → 503, everything else → 500. Details go out as
// a JSON `detail` field; internals stay in the logs.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::{error, warn};

use druckwerk_core::DruckwerkError;

/// Wrapper giving `DruckwerkError` an HTTP shape.
#[derive(Debug)]
pub struct ApiError(pub DruckwerkError);

impl From<DruckwerkError> for ApiError {
    fn from(err: DruckwerkError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self.0 {
            DruckwerkError::Unauthorized { no_credentials } => {
                let detail = if *no_credentials {
                    "Credentials not provided".to_string()
                } else {
                    "Unable to verify credentials".to_string()
                };
                (StatusCode::UNAUTHORIZED, detail)
            }
            DruckwerkError::NotFound(detail) => (StatusCode::NOT_FOUND, detail.clone()),
            DruckwerkError::InvalidArgument(detail) => (StatusCode::BAD_REQUEST, detail.clone()),
            DruckwerkError::UnsupportedFormat(detail) => {
                (StatusCode::BAD_REQUEST, detail.clone())
            }
            DruckwerkError::Busy(detail) => (StatusCode::SERVICE_UNAVAILABLE, detail.clone()),
            other => {
                error!(%other, "internal error surfaced to API");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        if status.is_client_error() {
            warn!(%status, detail, "request rejected");
        }
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

/// Alias for handler signatures.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: DruckwerkError) -> StatusCode {
        ApiError(err).into_response().status()
    }

    #[test]
    fn kinds_map_to_expected_statuses() {
        assert_eq!(
            status_of(DruckwerkError::no_credentials()),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_of(DruckwerkError::NotFound("x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(DruckwerkError::InvalidArgument("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(DruckwerkError::UnsupportedFormat("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(DruckwerkError::Busy("x".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(DruckwerkError::Backend("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(DruckwerkError::Timeout("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
