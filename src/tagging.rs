//! Message tagging: transaction key derivation and branch minting.
//!
//! A transaction key is a hash over `(application id, call id, method, top
//! Via branch)`. It is the only thing the receive
//! path uses to route an inbound response back to its owning
//! `UacTransaction` -- so its derivation must be a pure function of the
//! message, never of in-memory transaction state.

use rvoip_sip_core::prelude::*;
use std::fmt;

/// Deterministic key identifying one transaction within one application.
/// `Hash`/`Eq` are derived so this can key a `HashMap` directly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionKey {
    pub app_id: String,
    pub call_id: String,
    pub method: Method,
    pub branch: String,
}

impl TransactionKey {
    pub fn new(app_id: impl Into<String>, call_id: impl Into<String>, method: Method, branch: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            call_id: call_id.into(),
            method,
            branch: branch.into(),
        }
    }
}

impl fmt::Display for TransactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}:{}", self.app_id, self.call_id, self.method, self.branch)
    }
}

/// Derive the key a newly-sent request will be matched against when its
/// response arrives. CANCEL is special-cased by callers: per RFC 3261 §9.1 a
/// CANCEL reuses the branch of the request it cancels, so it does not mint a
/// fresh one here.
pub fn key_for_request(app_id: &str, request: &Request) -> Option<TransactionKey> {
    let call_id = request.call_id()?.value().to_string();
    let branch = request.first_via()?.branch()?.to_string();
    Some(TransactionKey::new(app_id, call_id, request.method(), branch))
}

/// Derive the key that should own an inbound response: method comes from
/// CSeq (not the response itself, which carries none), branch from the top
/// Via RFC 3261 requires the UAC to have echoed back.
pub fn key_for_response(app_id: &str, response: &Response) -> Option<TransactionKey> {
    let call_id = response.call_id()?.value().to_string();
    let cseq = response.cseq()?;
    let via = response.typed_header::<Via>()?;
    let branch = via.0.first()?.branch()?.to_string();
    Some(TransactionKey::new(app_id, call_id, cseq.method.clone(), branch))
}

/// Mint an engine-unique branch token carrying the RFC 3261 magic cookie
/// (`z9hG4bK`), required so downstream proxies recognize this stack as
/// RFC 3261-compliant for loop detection purposes.
pub fn fresh_branch() -> String {
    format!("z9hG4bK{}", uuid::Uuid::new_v4().simple())
}
