use thiserror::Error;

use crate::steam_id::SteamIdParseError;

/// Reading or writing a document failed. Never fatal, the in-memory store stays authoritative.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("persistence I/O failed for '{document}': {reason}")]
pub struct PersistenceError {
    pub document: String,
    pub reason: String,
}

impl PersistenceError {
    pub fn new(document: impl Into<String>, reason: impl ToString) -> Self {
        Self {
            document: document.into(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WhitelistError {
    #[error("{0}")]
    InvalidIdentifier(#[from] SteamIdParseError),
    #[error("{0} is already whitelisted")]
    AlreadyWhitelisted(String),
    #[error("{0} is not on the whitelist")]
    NotFound(String),
    #[error("permission denied")]
    PermissionDenied,
    /// Carries the usage line to show back to the caller.
    #[error("{0}")]
    BadArguments(String),
    #[error("{0}")]
    PersistenceIo(#[from] PersistenceError),
}

pub type WhitelistResult<T> = Result<T, WhitelistError>;
