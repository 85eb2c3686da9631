use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Database(#[from] sled::Error),

    #[error("failed to (de)serialize registry row: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("namespace already exists: {0}")]
    NamespaceExists(String),

    #[error("namespace not found: {0}")]
    NamespaceNotFound(String),

    #[error("token is not authorized for any namespace")]
    UnknownToken,

    #[error("admin token required")]
    AdminTokenRequired,

    #[error("registry actor is not running")]
    ActorStopped,
}

impl From<Error> for msgvault::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::NamespaceExists(id) => msgvault::Error::NamespaceExists(id),
            Error::NamespaceNotFound(id) => msgvault::Error::NamespaceNotFound(id),
            Error::UnknownToken => msgvault::Error::AuthInvalid,
            Error::AdminTokenRequired => msgvault::Error::AuthRequired,
            other => msgvault::Error::Backend(anyhow::Error::new(other)),
        }
    }
}
