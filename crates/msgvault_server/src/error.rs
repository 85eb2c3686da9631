//! Maps the core's error taxonomy (spec §7) onto HTTP status codes. Grounded
//! on `control-plane-api::server`'s `ApiError`: one newtype wrapping the
//! domain error, one `IntoResponse` impl, one JSON envelope shape.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

pub struct ApiError(pub msgvault::Error);

impl From<msgvault::Error> for ApiError {
    fn from(err: msgvault::Error) -> Self {
        ApiError(err)
    }
}

impl From<msgvault_registry::Error> for ApiError {
    fn from(err: msgvault_registry::Error) -> Self {
        ApiError(err.into())
    }
}

impl From<msgvault_subscribe::Error> for ApiError {
    fn from(err: msgvault_subscribe::Error) -> Self {
        let mapped = match err {
            msgvault_subscribe::Error::Store(err) => err,
            msgvault_subscribe::Error::ActorStopped => {
                msgvault::Error::Backend(anyhow::anyhow!("subscription dispatcher is not running"))
            }
        };
        ApiError(mapped)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            msgvault::Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            msgvault::Error::AuthRequired => StatusCode::UNAUTHORIZED,
            msgvault::Error::AuthInvalid => StatusCode::UNAUTHORIZED,
            msgvault::Error::AuthUnauthorized => StatusCode::FORBIDDEN,
            msgvault::Error::NamespaceNotFound(_) => StatusCode::NOT_FOUND,
            msgvault::Error::NamespaceExists(_) => StatusCode::CONFLICT,
            msgvault::Error::VersionConflict { .. } => StatusCode::CONFLICT,
            msgvault::Error::PositionExists { .. } => StatusCode::CONFLICT,
            msgvault::Error::InvalidJson(_) => StatusCode::BAD_REQUEST,
            msgvault::Error::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.0.kind(),
            "message": self.0.to_string(),
        }));

        (status, body).into_response()
    }
}
