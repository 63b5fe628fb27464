use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use fleet_core::FleetError;
use serde_json::json;
use tracing::{error, warn};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Fleet(#[from] FleetError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Fleet(e) => match e {
                FleetError::NodeNotFound { .. } | FleetError::TaskNotFound { .. } => {
                    StatusCode::NOT_FOUND
                }
                FleetError::Validation(_) | FleetError::InvalidTransition { .. } => {
                    StatusCode::BAD_REQUEST
                }
                FleetError::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Fleet(e) => e.kind(),
            ApiError::BadRequest(_) => "bad_request",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.to_string();
        if status.is_server_error() {
            error!(code = self.code(), "请求处理失败: {}", message);
        } else {
            warn!(code = self.code(), "请求被拒绝: {}", message);
        }

        let body = Json(json!({
            "status": "error",
            "code": self.code(),
            "message": message,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (FleetError::task_not_found("t1"), StatusCode::NOT_FOUND),
            (FleetError::node_not_found("n1"), StatusCode::NOT_FOUND),
            (
                FleetError::Validation("bad".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (
                FleetError::CircuitOpen {
                    name: "worker_rpc".to_string(),
                    last_error: "connection refused".to_string(),
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                FleetError::Network("refused".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (error, expected) in cases {
            assert_eq!(ApiError::from(error).status_code(), expected);
        }
    }

    #[test]
    fn test_code_uses_error_kind() {
        let error: ApiError = FleetError::task_not_found("t1").into();
        assert_eq!(error.code(), "task_not_found");
        assert_eq!(ApiError::BadRequest("x".to_string()).code(), "bad_request");
    }
}
