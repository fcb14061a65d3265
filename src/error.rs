use thiserror::Error;

/// API-misuse conditions the manager rejects before touching the poller.
#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("poll() called re-entrantly from inside a handler")]
    PollReentrant,

    #[error("manager is closed")]
    Closed,

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("manager accessed from a thread that did not create it")]
    ForeignThread,
}

pub type ManagerResult<T> = Result<T, ManagerError>;
