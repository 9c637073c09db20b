//! Error taxonomy for the request pipeline
//!
//! Callers need to tell apart two very different failure families:
//! payload-level rejections that no amount of retrying will fix
//! (`MalformedEndpoint`, `DecodeFailure`, `RejectedByRemote`) and budget
//! exhaustion after the pipeline already did its fail-over and backoff
//! (`PoolExhausted`, `CallFailed`, `ReconnectExhausted`). `is_permanent`
//! encodes that split.

use std::fmt;
use thiserror::Error;

/// Summary of the last classified attempt, carried by [`Error::CallFailed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    Auth { status: u16 },
    RateLimited { status: u16 },
    Server { status: u16 },
    Transport { cause: String },
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Auth { status } => write!(f, "auth failure (status {status})"),
            FailureKind::RateLimited { status } => write!(f, "rate limited (status {status})"),
            FailureKind::Server { status } => write!(f, "server error (status {status})"),
            FailureKind::Transport { cause } => write!(f, "transport failure: {cause}"),
        }
    }
}

/// Errors surfaced by the client.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("malformed endpoint {path:?}: {reason}")]
    MalformedEndpoint { path: String, reason: String },

    #[error("response decode failed: {0}")]
    DecodeFailure(String),

    #[error("rejected by remote (status {status}): {body}")]
    RejectedByRemote { status: u16, body: String },

    #[error("no credential available (pool exhausted)")]
    PoolExhausted,

    #[error("call failed after {attempts} attempts, last outcome: {last}")]
    CallFailed { attempts: u32, last: FailureKind },

    #[error("stream reconnect budget exhausted after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },
}

impl Error {
    /// True for failures the remote permanently rejected (configuration or
    /// payload problems); false for exhausted retry/fail-over budgets, where
    /// the same call might succeed once the outage clears.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Error::Config(_)
                | Error::MalformedEndpoint { .. }
                | Error::DecodeFailure(_)
                | Error::RejectedByRemote { .. }
        )
    }
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;
