//! Error types for the forking proxy core.
//!
//! Covers hop checks, extension negotiation, flow resolution, dialog/auth
//! collaborator refusals, transport failures, and timeouts. Every variant
//! here corresponds to a synthetic SIP response the reply-synthesis
//! collaborator can materialize; the mapping lives in `reply::error_response`.

use thiserror::Error;

/// Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the forking proxy core.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("temporarily unavailable")]
    TemporarilyUnavailable,

    #[error("too many hops")]
    TooManyHops,

    #[error("invalid request")]
    InvalidRequest,

    #[error("unsupported extension(s): {0:?}")]
    BadExtension(Vec<String>),

    #[error("loop detected")]
    LoopDetected,

    #[error("extension required: {0}")]
    ExtensionRequired(String),

    #[error("forbidden")]
    Forbidden,

    #[error("flow failed")]
    FlowFailed,

    #[error("request pending")]
    RequestPending,

    #[error("unknown dialog")]
    UnknownDialog,

    #[error("network error: {0}")]
    NetworkError(String),

    #[error("service unavailable")]
    ServiceUnavailable,

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("internal error: {0}")]
    Internal(String),

    /// Collaborator or transport layer misbehaved in a way that cannot be
    /// mapped onto a synthetic SIP response (e.g. a channel closed).
    #[error("collaborator error: {0}")]
    Other(String),
}

impl Error {
    /// `true` for the errors that are caller-facing SIP-level conditions
    /// (materialized through reply synthesis), as opposed to
    /// `Other`, which indicates a plumbing failure with no SIP-shaped
    /// response.
    pub fn is_sip_mappable(&self) -> bool {
        !matches!(self, Error::Other(_))
    }
}
