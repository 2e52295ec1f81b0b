use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use fecore_types::Error;

/// Response wrapper for consistent API format, matching the teacher's
/// `ApiResponse<T>` envelope.
#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

/// Newtype around `fecore_types::Error` so this crate can implement
/// `IntoResponse` for it (the orphan rule forbids doing so for the bare
/// foreign type). Maps the §7 error taxonomy onto HTTP status codes.
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = match &self.0 {
            Error::NotFound(_) => (StatusCode::NOT_FOUND, self.0.to_string()),
            Error::InvalidInput(_) => (StatusCode::BAD_REQUEST, self.0.to_string()),
            Error::CapacityExhausted { .. } | Error::NetNsExhausted => {
                (StatusCode::SERVICE_UNAVAILABLE, self.0.to_string())
            }
            Error::BackendError(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.0.to_string()),
            Error::UpstreamUnreachable(name) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Can't reach service for '{name}'"),
            ),
            Error::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.0.to_string()),
        };
        (
            status,
            Json(ApiResponse::<()> {
                success: false,
                data: None,
                error: Some(body),
            }),
        )
            .into_response()
    }
}
