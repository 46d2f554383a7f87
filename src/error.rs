use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Completion failed; status and detail come from the gateway's error rules.
    #[error("{detail}")]
    Upstream { status: StatusCode, detail: String },
    #[error("{detail}")]
    InvalidRequest { status: StatusCode, detail: String },
}

impl ServiceError {
    pub fn invalid_request(detail: impl Into<String>) -> Self {
        ServiceError::InvalidRequest {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            detail: detail.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::Upstream { status, .. } | ServiceError::InvalidRequest { status, .. } => {
                *status
            }
        }
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::invalid_request(format!("invalid request body: {err}"))
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = serde_json::json!({
            "detail": self.to_string(),
        });

        (status, axum::Json(body)).into_response()
    }
}
