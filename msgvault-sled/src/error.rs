use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Database(#[from] sled::Error),

    #[error("failed to (de)serialize message: {0}")]
    Codec(#[from] serde_cbor::Error),

    #[error("namespace not found: {0}")]
    NamespaceNotFound(String),

    #[error("namespace already exists: {0}")]
    NamespaceExists(String),

    #[error("version conflict: expected {expected:?}, actual {actual:?}")]
    VersionConflict {
        expected: i64,
        actual: Option<i64>,
    },

    #[error("global position {global_position} already exists")]
    PositionExists { global_position: i64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<Error> for msgvault::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::NamespaceNotFound(id) => msgvault::Error::NamespaceNotFound(id),
            Error::NamespaceExists(id) => msgvault::Error::NamespaceExists(id),
            Error::VersionConflict { expected, actual } => {
                msgvault::Error::VersionConflict { expected, actual }
            }
            Error::PositionExists { global_position } => {
                msgvault::Error::PositionExists { global_position }
            }
            other => msgvault::Error::Backend(anyhow::Error::new(other)),
        }
    }
}
