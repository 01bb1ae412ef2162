//! Error types and handling
//!
//! Three layers of failure live here:
//!
//! - [`EngineError`] — engine-internal failures (configuration, state
//!   store, chat transport). Invalid configuration and a corrupted
//!   state store are fatal at startup.
//! - [`CallError`] — one failed invocation of an external collaborator
//!   (summarizer or document store), classified transient or permanent.
//! - [`GatewayError`] — the terminal outcome of a retried external
//!   call, produced by the retrying gateway after its budget is spent.
//!
//! A reply timeout and a busy-session rejection are expected outcomes,
//! not errors; they are modeled as session states, not variants here.

use std::path::PathBuf;
use thiserror::Error;

/// Main engine error type
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid or missing configuration. Fatal at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The persisted state file exists but cannot be parsed.
    ///
    /// Fatal at startup: silently defaulting to "no goal" would lose
    /// the goal-continuity guarantee without anyone noticing.
    #[error("State store corrupted at {path:?}: {reason}")]
    PersistenceCorruption { path: PathBuf, reason: String },

    /// State store I/O failure (read, temp write, or atomic rename).
    #[error("State store error: {0}")]
    Store(String),

    /// Chat transport failure (message could not be sent).
    #[error("Chat transport error: {0}")]
    Transport(String),
}

/// One failed invocation of an external collaborator.
///
/// The classification decides whether the retrying gateway spends
/// budget on it: timeouts, rate limiting, and 5xx-equivalent responses
/// are transient; auth and malformed-request failures are permanent
/// and fail immediately.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl CallError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CallError::Transient(_))
    }

    /// Map an HTTP error status onto the retry taxonomy: rate limiting
    /// and server-side failures are worth retrying, auth and malformed
    /// requests are not.
    pub fn from_status(code: u16, body: &str) -> Self {
        match code {
            401 | 403 => CallError::Permanent(format!("authentication failed ({}): {}", code, body)),
            408 | 429 => CallError::Transient(format!("rate limited or timed out ({})", code)),
            500..=599 => CallError::Transient(format!("server error ({})", code)),
            _ => CallError::Permanent(format!("request rejected ({}): {}", code, body)),
        }
    }
}

/// Terminal outcome of a retried external call.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// A non-retryable failure surfaced on some attempt.
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// Every attempt failed with a transient error; the service is
    /// treated as unavailable and the caller must take its failure
    /// path. The user's data is never dropped here.
    #[error("external service unavailable after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}
