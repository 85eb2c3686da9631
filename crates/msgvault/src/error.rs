use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Canonical error taxonomy surfaced by the storage core (spec §7). Each
/// backend crate defines its own `thiserror` enum for its native failure
/// modes and converts into this one at the `Store` trait boundary, the same
/// way `thalo_message_store::error::Error` wraps `sled::Error` and
/// `thalo-postgres::error::Error` wraps `bb8_postgres` errors.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("authentication required")]
    AuthRequired,

    #[error("invalid authentication token")]
    AuthInvalid,

    #[error("token is not authorized for this namespace")]
    AuthUnauthorized,

    #[error("namespace not found: {0}")]
    NamespaceNotFound(String),

    #[error("namespace already exists: {0}")]
    NamespaceExists(String),

    #[error("wrong expected version: expected {expected}, actual {actual:?}")]
    VersionConflict {
        expected: i64,
        actual: Option<i64>,
    },

    #[error("global position already exists: {global_position}")]
    PositionExists { global_position: i64 },

    #[error("invalid json: {0}")]
    InvalidJson(String),

    #[error("backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

impl Error {
    /// A short machine-readable tag for the RPC/HTTP layer's error envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidRequest(_) => "invalid_request",
            Error::AuthRequired => "auth_required",
            Error::AuthInvalid => "auth_invalid",
            Error::AuthUnauthorized => "auth_unauthorized",
            Error::NamespaceNotFound(_) => "namespace_not_found",
            Error::NamespaceExists(_) => "namespace_exists",
            Error::VersionConflict { .. } => "version_conflict",
            Error::PositionExists { .. } => "position_exists",
            Error::InvalidJson(_) => "invalid_json",
            Error::Backend(_) => "backend_error",
        }
    }
}
