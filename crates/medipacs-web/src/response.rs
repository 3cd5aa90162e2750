//! 错误到HTTP响应的映射

use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use medipacs_core::PacsError;
use serde_json::json;

/// HTTP层错误包装
///
/// 响应体固定为`{error, code, message, detail}`；Forbidden携带
/// 结构化拒绝细节，其中绝不出现患者PHI。
#[derive(Debug)]
pub struct ApiError(pub PacsError);

impl From<PacsError> for ApiError {
    fn from(e: PacsError) -> Self {
        ApiError(e)
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            PacsError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            PacsError::Forbidden { .. } => StatusCode::FORBIDDEN,
            PacsError::NotFound { .. } => StatusCode::NOT_FOUND,
            PacsError::Conflict(_) | PacsError::InvalidTransition { .. } => StatusCode::CONFLICT,
            PacsError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            PacsError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            PacsError::Database(_)
            | PacsError::Storage(_)
            | PacsError::Serialization(_)
            | PacsError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("Internal error: {}", self.0);
        }

        let detail = match &self.0 {
            PacsError::Forbidden { denial, .. } => json!(denial),
            _ => serde_json::Value::Null,
        };

        let body = json!({
            "error": true,
            "code": self.0.code(),
            "message": self.0.to_string(),
            "detail": detail,
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medipacs_core::AccessDenial;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (PacsError::Unauthenticated("no token".into()), StatusCode::UNAUTHORIZED),
            (PacsError::not_found("study", "AB12CD34"), StatusCode::NOT_FOUND),
            (PacsError::Conflict("version".into()), StatusCode::CONFLICT),
            (
                PacsError::InvalidTransition {
                    from: "queued".into(),
                    action: "write_doctor_report".into(),
                },
                StatusCode::CONFLICT,
            ),
            (PacsError::Validation("bad".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (PacsError::RateLimited("login".into()), StatusCode::TOO_MANY_REQUESTS),
            (PacsError::Database("down".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, expected) in cases {
            let response = ApiError(error).into_response();
            assert_eq!(response.status(), expected);
        }
    }

    #[test]
    fn test_forbidden_carries_denial() {
        let error = PacsError::Forbidden {
            message: "no access".into(),
            denial: AccessDenial {
                required_access: "administrative".into(),
                user_role: "technician".into(),
                user_center_id: None,
                target_center_id: None,
                resource_id: Some("AB12CD34".into()),
            },
        };
        let response = ApiError(error).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
