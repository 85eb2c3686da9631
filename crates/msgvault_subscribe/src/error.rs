use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("subscription dispatcher is not running")]
    ActorStopped,

    #[error(transparent)]
    Store(#[from] msgvault::Error),
}
