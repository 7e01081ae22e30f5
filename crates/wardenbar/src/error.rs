//! Error taxonomy shared by the resolution pipeline and the CLI runner

use thiserror::Error;

/// wardenbar errors
#[derive(Error, Debug)]
pub enum WardenError {
    #[error("Not logged in. Need to login first.")]
    NotLoggedIn,

    #[error("Not unlocked. Need to unlock first.")]
    Locked,

    #[error("No session token available: {0}")]
    TokenUnavailable(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("Field not found in local snapshot: {0}")]
    LocalFieldNotFound(String),

    #[error("Decryption failed: {0}")]
    DecryptFailed(String),

    #[error("Field {path} not found in item {item}")]
    FieldNotFound { item: String, path: String },

    #[error("{exec:?} not found in path {path:?}")]
    CliNotFound { exec: String, path: String },

    #[error("{0:?} has wrong permissions. Must be executable")]
    CliNotExecutable(String),

    #[error("{message} Error:\n{stderr}")]
    CliRequestFailed { message: String, stderr: String },

    #[error("unexpected error. Exit code {code}. Has the session key changed?\n[ERROR] {stderr}")]
    CliUnexpectedExit { code: i32, stderr: String },

    #[error("User cancelled.")]
    UserCancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WardenError {
    /// Errors of the local decrypt path, recovered by falling back to the CLI
    pub fn is_local_failure(&self) -> bool {
        matches!(
            self,
            Self::KeyDerivationFailed(_) | Self::LocalFieldNotFound(_) | Self::DecryptFailed(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, WardenError>;

/// Render at most the first two characters of a secret for debug traces
pub fn preview(secret: &str) -> String {
    let head: String = secret.chars().take(2).collect();
    format!("{head}…")
}
