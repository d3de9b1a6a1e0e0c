use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use taskmesh_core::MeshError;

/// HTTP-facing wrapper around [`MeshError`].
pub struct ApiError(pub MeshError);

pub type ApiResult<T> = Result<T, ApiError>;

impl From<MeshError> for ApiError {
    fn from(err: MeshError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            MeshError::NotFound(_) => StatusCode::NOT_FOUND,
            MeshError::Validation(_) => StatusCode::BAD_REQUEST,
            MeshError::NoAgentAvailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            MeshError::Transport(_) | MeshError::Worker(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({"error": self.0.to_string()}))).into_response()
    }
}
