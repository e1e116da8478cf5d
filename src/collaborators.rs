//! Collaborator traits.
//!
//! The core never formats bytes, never parses SIP, never owns dialog state,
//! and never computes digests. It consumes all of that through these narrow
//! trait objects, bundled once into a `Collaborators` struct and threaded
//! explicitly through every entry point -- no singletons.

use std::net::SocketAddr;
use std::sync::Arc;
use async_trait::async_trait;
use rvoip_sip_core::prelude::*;

use crate::error::Result;

/// An opaque handle to a connection pinned for outbound/flow routing.
/// Equality is by identity of the underlying transport connection, which
/// only the `Transport` collaborator can interpret.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionHandle(pub String);

/// Outcome of asking the dialog layer to admit an outgoing request.
#[derive(Debug, Clone)]
pub enum DialogAdmit {
    Ok,
    RequestPending,
    UnknownDialog,
}

/// Outcome of asking the auth collaborator to authorize a challenged
/// request.
pub enum AuthOutcome {
    Authorized(Request),
    NotApplicable,
    Error(String),
}

/// Transport collaborator. Wraps an underlying `rvoip_sip_transport::Transport`
/// with the proxy-specific operations this crate needs: branch insertion,
/// connection lookup, and the two "is this mine" loop-detection predicates.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_request(&self, request: &Request, destination: SocketAddr) -> Result<()>;
    async fn resend_request(&self, request: &Request, destination: SocketAddr) -> Result<()>;
    async fn send_response(&self, response: &Response, destination: SocketAddr) -> Result<()>;
    /// Push a fresh Via onto `request` with the given branch, returning the
    /// rewritten request.
    fn add_via(&self, request: Request, branch: &str) -> Request;
    /// Resolve a flow token to a live connection, if still open.
    async fn get_connected(&self, flow: &ConnectionHandle) -> Option<SocketAddr>;
    /// `true` if `uri` names this application instance.
    fn is_local(&self, uri: &Uri) -> bool;
    /// `true` if the top Route of `request` names this application instance.
    fn is_local_route(&self, request: &Request) -> bool;
}

/// Dialog collaborator.
#[async_trait]
pub trait Dialog: Send + Sync {
    /// Admit (or refuse) sending `request` within whatever dialog it
    /// belongs to.
    async fn request(&self, request: &Request) -> DialogAdmit;
    /// Notify the dialog layer a response arrived.
    async fn response(&self, response: &Response);
    /// Notify the dialog layer an ACK was sent/received.
    async fn ack(&self, request: &Request);
    /// Allocate a new local CSeq sequence number for a request being
    /// resent under a fresh transaction (auth retry).
    async fn new_local_seq(&self, call_id: &str) -> u32;
}

/// Auth collaborator.
#[async_trait]
pub trait Auth: Send + Sync {
    /// Given the original request and the 401/407 it drew, produce an
    /// authorized retry, or report the challenge does not apply / failed.
    async fn make_request(&self, request: &Request, challenge: &Response) -> AuthOutcome;
    /// Record that `response` closed out a transaction, so credentials can
    /// be cached for subsequent requests to the same realm.
    async fn update_cache(&self, request: &Request, response: &Response);
}

/// Reply-synthesis collaborator: turns a reason into a
/// well-formed SIP response for `request`, the way a stateless reply
/// generator would.
pub trait ReplySynthesis: Send + Sync {
    fn reply(&self, request: &Request, status: StatusCode, reason: Option<&str>) -> Response;
}

/// Opaque handle to the upstream UAS transaction a fork or stateless
/// forward is replying to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UasHandle(pub String);

/// Bridge delivering a response to the upstream UAS transaction or
/// originating user callback.
#[async_trait]
pub trait UasReplyBridge: Send + Sync {
    async fn deliver(&self, uas: &UasHandle, response: Response);

    /// Acknowledge an asynchronous request immediately, ahead of its
    /// eventual disposition (spec §4.5 step 3: plain `async` for ACK,
    /// `{async, message_id}` for every other method). Default is a no-op:
    /// most collaborators only care about the final `deliver`, and a
    /// caller that never sets `ProxyOptions::async` never triggers this.
    async fn acknowledge(&self, _uas: &UasHandle, _message_id: Option<&str>) {}
}

/// The full collaborator set, bundled once and passed by reference into
/// every `Call`/`Fork`/`UacTransaction` operation.
#[derive(Clone)]
pub struct Collaborators {
    pub transport: Arc<dyn Transport>,
    pub dialog: Arc<dyn Dialog>,
    pub auth: Arc<dyn Auth>,
    pub reply: Arc<dyn ReplySynthesis>,
    pub uas_bridge: Arc<dyn UasReplyBridge>,
}
