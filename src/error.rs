//! Typed error taxonomy (spec §7).
//!
//! Every external-service boundary returns this enum so callers can match on
//! kind: permission failures are terminal per-document, transient failures
//! increment a counter and move on, invariant violations are never swallowed.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LakebridgeError {
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Terminal for the affected document — not retried.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A 409 from the lake is treated as success by callers that expect
    /// idempotent creation; this variant is for conflicts that are not.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// 5xx or I/O failure from an external collaborator. Not auto-retried
    /// at the task level (spec §7) beyond the narrow transport retries in
    /// the individual clients.
    #[error("transient backend failure: {0}")]
    TransientBackend(String),

    /// Recovered locally by the embedding client's split-and-average path;
    /// surfaced only if recovery itself fails.
    #[error("embedding input too large: {0}")]
    EmbeddingInputTooLarge(String),

    /// A broken data-model invariant. Always a bug, never swallowed.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Fatal at startup: the lake's model schema could not be bootstrapped.
    #[error("model bootstrap incomplete: {0}")]
    ModelBootstrapIncomplete(String),
}

impl LakebridgeError {
    /// Whether this failure should be treated as terminal for the single
    /// document/task it occurred on, rather than retried or escalated.
    pub fn is_terminal_per_item(&self) -> bool {
        matches!(self, LakebridgeError::PermissionDenied(_))
    }
}

pub type Result<T> = std::result::Result<T, LakebridgeError>;
