//! Forward module error types
//!
//! Every fault raised on the request path. All of them render the same way:
//! HTTP 400 with `{"error": message}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

/// Error types for the forward module
#[derive(Debug, Clone, thiserror::Error)]
pub enum ForwardError {
    /// Deployment is missing something it needs (e.g. a vendor API key)
    #[error("{0}")]
    Configuration(String),
    /// Bearer token missing or rejected by the identity service
    #[error("{0}")]
    Authentication(String),
    /// Request body is missing required fields or malformed
    #[error("{0}")]
    Validation(String),
    /// Vendor returned a non-2xx status or an unusable body
    #[error("{0}")]
    Vendor(String),
    /// Anything else (transport failures, client construction)
    #[error("{0}")]
    Internal(String),
}

impl ForwardError {
    pub fn kind(&self) -> &'static str {
        match self {
            ForwardError::Configuration(_) => "configuration",
            ForwardError::Authentication(_) => "authentication",
            ForwardError::Validation(_) => "validation",
            ForwardError::Vendor(_) => "vendor",
            ForwardError::Internal(_) => "internal",
        }
    }

    /// Status sent to the client. Every fault is a 400 in the current contract.
    pub fn status(&self) -> StatusCode {
        StatusCode::BAD_REQUEST
    }
}

impl IntoResponse for ForwardError {
    fn into_response(self) -> Response {
        let status = self.status();

        crate::logger::warn(
            "forward_error",
            &format!(
                "Returning error response: status={}, kind={}, message={}",
                status.as_u16(),
                self.kind(),
                self
            ),
        );

        (
            status,
            Json(serde_json::json!({
                "error": self.to_string()
            })),
        )
            .into_response()
    }
}

/// Result type alias for forward operations
pub type ForwardResult<T> = Result<T, ForwardError>;
