//! Error taxonomy for the process and reconciliation core
//!
//! Cancellation is not an error: a user-requested stop is a
//! `ProcessStatus`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShelfError {
    /// The binary could not be started (missing, permission denied, ...)
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The command ran but exited unsuccessfully
    #[error("command exited with {}", exit_label(*.code))]
    Execution { code: Option<i32>, stderr: String },

    /// Malformed CLI JSON or a corrupt tracking file
    #[error("failed to parse {what}: {message}")]
    Parse { what: &'static str, message: String },

    /// The inventory query failed; the previous cache is still in place
    #[error("installed-state refresh failed, keeping previous view: {0}")]
    ReconciliationStale(Box<ShelfError>),

    #[error("invalid {kind} '{value}': {reason}")]
    InvalidName {
        kind: &'static str,
        value: String,
        reason: &'static str,
    },

    /// Nothing in the last reconciled view resolves to this name
    #[error("'{0}' is not installed in the profile")]
    NotInstalled(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ShelfError {
    pub fn parse(what: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Parse {
            what,
            message: err.to_string(),
        }
    }
}

fn exit_label(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("code {}", code),
        None => "a signal".to_string(),
    }
}

pub type ShelfResult<T> = std::result::Result<T, ShelfError>;
