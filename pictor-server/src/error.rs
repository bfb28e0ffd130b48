use axum::Json;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use pictor_core::PictorError;
use serde_json::json;

/// A [`PictorError`] paired with the request's correlation id, rendered as
/// the JSON error envelope:
/// `{"error":{"status":N,"code":"...","message":"...","requestId":"..."}}`.
pub struct ApiError {
    pub error: PictorError,
    pub request_id: String,
}

impl ApiError {
    pub fn new(error: PictorError, request_id: impl Into<String>) -> Self {
        Self {
            error,
            request_id: request_id.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.error.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let message = if self.error.scrub_message() {
            tracing::error!(error = %self.error, request_id = %self.request_id, "internal error");
            "Internal server error".to_string()
        } else {
            self.error.to_string()
        };
        let body = Json(json!({
            "error": {
                "status": status.as_u16(),
                "code": self.error.code(),
                "message": message,
                "requestId": self.request_id,
            }
        }));
        let mut response = (status, body).into_response();
        if let Ok(value) = HeaderValue::from_str(&self.request_id) {
            response.headers_mut().insert("x-request-id", value);
        }
        response
    }
}
