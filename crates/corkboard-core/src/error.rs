use corkboard_shared::{GroupId, TaskId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("token is not a three-part bearer token")]
    Malformed,

    #[error("token payload is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("token claims are not valid JSON: {0}")]
    Claims(#[from] serde_json::Error),

    #[error("token claim `{0}` is out of range")]
    ClaimRange(&'static str),
}

/// Failures reported by a remote store call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("server rejected the credential: {0}")]
    Unauthorized(String),

    #[error("server answered {code}: {message}")]
    Status { code: u16, message: String },

    #[error("request failed: {0}")]
    Transport(String),

    #[error("failed decoding response: {0}")]
    Decode(String),
}

impl RemoteError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("session expired; sign in again")]
    AuthExpired,

    #[error("no active session")]
    NoSession,

    #[error("sign-in rejected: {0}")]
    LoginRejected(String),

    #[error(transparent)]
    Network(RemoteError),

    #[error("{field} is required")]
    Validation { field: &'static str },

    #[error("no workspace is loaded")]
    NotHydrated,

    #[error("unknown group {0}")]
    UnknownGroup(GroupId),

    #[error("unknown task {0}")]
    UnknownTask(TaskId),

    #[error("no sync failure with id {0}")]
    UnknownFailure(u64),

    #[error("`{event}` is not valid while {state}")]
    InvalidTransition {
        state: &'static str,
        event: &'static str,
    },

    #[error("drop payload {0:?} is not a task id")]
    BadDropPayload(String),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("credential storage failed: {0}")]
    Storage(#[from] std::io::Error),
}

impl SyncError {
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::AuthExpired)
    }
}

impl From<RemoteError> for SyncError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Unauthorized(_) => Self::AuthExpired,
            other => Self::Network(other),
        }
    }
}
