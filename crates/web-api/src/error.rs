use application::ApplicationError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code,
                message: message.into(),
            },
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.body.code
    }
}

impl From<ApplicationError> for ApiError {
    fn from(error: ApplicationError) -> Self {
        use application::ApplicationError as AppErr;
        use domain::DomainError;

        match error {
            AppErr::Domain(DomainError::InvalidArgument { field, reason }) => ApiError::new(
                StatusCode::BAD_REQUEST,
                "INVALID_ARGUMENT",
                format!("{}: {}", field, reason),
            ),
            AppErr::Domain(DomainError::UserAlreadyExists) => {
                ApiError::new(StatusCode::CONFLICT, "USER_EXISTS", "user already exists")
            }
            AppErr::Domain(DomainError::UserNotFound) => {
                ApiError::new(StatusCode::NOT_FOUND, "USER_NOT_FOUND", "user not found")
            }
            AppErr::Domain(DomainError::MessageNotFound) | AppErr::MessageNotFound => {
                ApiError::new(
                    StatusCode::NOT_FOUND,
                    "MESSAGE_NOT_FOUND",
                    "message not found",
                )
            }
            AppErr::Domain(DomainError::OperationNotAllowed) | AppErr::Forbidden => {
                ApiError::new(StatusCode::FORBIDDEN, "FORBIDDEN", "operation not allowed")
            }
            AppErr::Unauthenticated => ApiError::new(
                StatusCode::UNAUTHORIZED,
                "AUTHENTICATION_FAILED",
                "authentication failed",
            ),
            AppErr::RecipientNotFound => ApiError::new(
                StatusCode::NOT_FOUND,
                "RECIPIENT_NOT_FOUND",
                "recipient not found",
            ),
            AppErr::NotFound => ApiError::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                "requested resource not found",
            ),
            AppErr::Conflict => {
                ApiError::new(StatusCode::CONFLICT, "CONFLICT", "resource already exists")
            }
            AppErr::MalformedEvent(reason) => {
                ApiError::new(StatusCode::BAD_REQUEST, "MALFORMED_REQUEST", reason)
            }
            AppErr::TransientStoreFailure(message) => {
                tracing::error!(error = %message, "存储调用失败");
                ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "STORE_FAILURE",
                    "temporary failure, please retry",
                )
            }
            AppErr::Password(err) => {
                tracing::error!(error = %err, "密码处理失败");
                ApiError::internal_server_error("internal error")
            }
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ApiError::new(StatusCode::BAD_REQUEST, "INVALID_ARGUMENT", errors.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::DomainError;

    #[test]
    fn application_errors_map_to_status_codes() {
        let cases = [
            (ApplicationError::Unauthenticated, StatusCode::UNAUTHORIZED),
            (ApplicationError::RecipientNotFound, StatusCode::NOT_FOUND),
            (ApplicationError::Forbidden, StatusCode::FORBIDDEN),
            (
                ApplicationError::Domain(DomainError::UserAlreadyExists),
                StatusCode::CONFLICT,
            ),
            (
                ApplicationError::TransientStoreFailure("pool timed out".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, status) in cases {
            assert_eq!(ApiError::from(error).status(), status);
        }
    }

    #[test]
    fn store_failure_details_are_not_exposed() {
        let error = ApiError::from(ApplicationError::TransientStoreFailure(
            "password authentication failed for user postgres".into(),
        ));
        assert_eq!(error.code(), "STORE_FAILURE");
        assert!(!error.body.message.contains("postgres"));
    }
}
