use thiserror::Error;

/// Frame-level failure taxonomy. None of these tear down the session; they
/// are rendered as inline `{"message": …}` envelopes to the requester.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Message not found or you don't have permission to modify this message")]
    NotFound,

    #[error("{0}")]
    Validation(String),

    #[error("An unexpected error occurred")]
    Internal(#[from] anyhow::Error),
}

pub type SessionResult<T> = Result<T, SessionError>;
