//! Proxy Router.
//!
//! `route` is the single entry point a `Call` dispatches `CallEvent::ProxyRoute`
//! to (see `call::Call::run`). It runs the ten-step preprocessing algorithm
//! (hop check, session-timer admission, header/route rewriting, Proxy-Require
//! validation, Path/outbound handling, local-route stripping) and ends by
//! either replying immediately, sending a stateless ACK, or handing the
//! request plus normalized uriset to the Fork Controller.

pub mod path;

use std::collections::VecDeque;

use rvoip_sip_core::prelude::*;
use rvoip_sip_core::types::address::Address;
use rvoip_sip_core::types::route::{Route, RouteEntry};
use rvoip_sip_core::types::supported::Supported;
use tracing::debug;

use crate::call::Call;
use crate::collaborators::UasHandle;
use crate::error::Error;
use crate::transaction::{Origin, ProxyOptions};
use crate::uriset::UriSetInput;

/// What the ten-step algorithm decided to do with the request. Not handed
/// back to the caller (the `Call::run` call site is fire-and-forget, like
/// every other `CallEvent` branch); kept as an explicit enum inside this
/// module because the preprocessing steps read far better as "produce one
/// of these, then act on it" than as a tangle of early returns.
enum RouteOutcome {
    Fork(VecDeque<Vec<Uri>>),
    Stateless,
    Reply(Response),
}

/// `router::route(uas, uriset, opts, request)`.
pub async fn route(call: &mut Call, uas: UasHandle, uriset_in: UriSetInput, opts: ProxyOptions, request: Request) {
    let outcome = match decide(call, &uas, uriset_in, opts.clone(), request.clone()).await {
        Ok(outcome) => outcome,
        Err(err) => RouteOutcome::Reply(crate::reply::error_response(&call.collabs, &request, &err)),
    };

    match outcome {
        RouteOutcome::Reply(resp) => {
            call.collabs.uas_bridge.deliver(&uas, resp).await;
        }
        RouteOutcome::Stateless => {
            // Step 5: ACK in stateless mode -- one fire-and-forget send, no
            // transaction, no fork.
            let dest = crate::transaction::uac::destination_of(&request);
            if let Err(e) = call.collabs.transport.send_request(&request, dest).await {
                debug!(call_id = %call.call_id, error = %e, "stateless ACK send failed");
            }
        }
        RouteOutcome::Fork(groups) => {
            let method = request.method.clone();
            crate::fork::controller::start(call, uas, method, opts, request, groups).await;
        }
    }
}

/// Steps 1-9. Returns the decided `RouteOutcome`, or an `Error` the caller
/// turns into a synthetic reply.
async fn decide(call: &mut Call, uas: &UasHandle, uriset_in: UriSetInput, mut opts: ProxyOptions, mut request: Request) -> Result<RouteOutcome, Error> {
    // Step 1: normalize; empty uriset -> 503.
    let mut groups = crate::uriset::normalize(uriset_in);
    if groups.iter().all(|g| g.is_empty()) {
        return Err(Error::TemporarilyUnavailable);
    }

    // Step 2: hop check.
    match max_forwards(&request) {
        Some(n) if n < 0 => return Err(Error::InvalidRequest),
        Some(0) => {
            if request.method == Method::Options {
                return Ok(RouteOutcome::Reply(capability_response(call, &request)));
            }
            return Err(Error::TooManyHops);
        }
        _ => {}
    }

    // Step 3: session-timer admission is delegated to an external timer
    // module this crate does not own; nothing to do but continue (no
    // session-timer collaborator is wired into `Collaborators`, so the
    // router always takes the "continue" branch).

    // Step 4: preprocess.
    decrement_forwards(&mut request);
    if opts.remove_routes {
        request.headers.retain(|h| !matches!(h, TypedHeader::Route(_)));
    }
    if opts.remove_headers {
        request.headers.retain(|h| matches!(h, TypedHeader::Via(_) | TypedHeader::From(_) | TypedHeader::To(_) | TypedHeader::CallId(_) | TypedHeader::CSeq(_) | TypedHeader::MaxForwards(_) | TypedHeader::Contact(_)));
    }
    for header in opts.headers.clone() {
        request.headers.push(header);
    }
    if !opts.routes.is_empty() {
        let mut prepended: Vec<TypedHeader> = opts
            .routes
            .iter()
            .cloned()
            .map(|uri| TypedHeader::Route(Route(vec![RouteEntry(Address::new(uri))])))
            .collect();
        prepended.extend(request.headers);
        request.headers = prepended;
    }

    // Steps 5/6: ACK special-casing.
    if request.method == Method::Ack {
        if opts.stateless {
            let uri = groups.iter().flatten().next().cloned();
            if let Some(uri) = uri {
                request.uri = uri;
            }
            return Ok(RouteOutcome::Stateless);
        }
        return Ok(RouteOutcome::Fork(groups.into()));
    }

    // Step 7: Proxy-Require rejection.
    if let Some(bad) = unsupported_proxy_require(call, &request) {
        return Err(Error::BadExtension(bad));
    }

    // Step 8: Path / outbound handling.
    opts = crate::router::path::apply(call, &request, opts).await?;

    // Step 9: strip leading local Route entries.
    while call.collabs.transport.is_local_route(&request) {
        if !pop_top_route(&mut request) {
            break;
        }
    }

    // Step 10: dispatch.
    if opts.stateless {
        if let Some(group) = groups.first() {
            if let Some(uri) = group.first() {
                if call.collabs.transport.is_local(uri) {
                    return Err(Error::LoopDetected);
                }
            }
        }
        if let Some(uri) = groups.iter_mut().flatten().next() {
            request.uri = std::mem::replace(uri, request.uri.clone());
        }
        return Ok(RouteOutcome::Stateless);
    }

    let _ = uas;
    Ok(RouteOutcome::Fork(groups.into()))
}

fn max_forwards(request: &Request) -> Option<i64> {
    match request.header(&HeaderName::MaxForwards) {
        Some(header) => header.to_string().rsplit(':').next().and_then(|v| v.trim().parse::<i64>().ok()),
        None => None,
    }
}

fn decrement_forwards(request: &mut Request) {
    let Some(current) = max_forwards(request) else { return };
    let next = (current - 1).max(0) as u32;
    request.headers.retain(|h| !matches!(h, TypedHeader::MaxForwards(_)));
    request.headers.push(TypedHeader::MaxForwards(MaxForwards::new(next)));
}

/// OPTIONS capability response for a zero-hop request.
fn capability_response(call: &Call, request: &Request) -> Response {
    let mut resp = call.collabs.reply.reply(request, StatusCode::Ok, Some("Max Forwards"));

    let mut allow = Allow::new();
    for method in &call.config.allowed_methods {
        allow.add_method(method.clone());
    }
    resp.headers.push(TypedHeader::Allow(allow));

    if !call.config.supported_extensions.is_empty() {
        let tokens: Vec<String> = call.config.supported_extensions.iter().cloned().collect();
        resp.headers.push(TypedHeader::Supported(Supported::new(tokens)));
    }

    resp
}

/// Step 7: any `Proxy-Require` token not in `config.supported_extensions`
/// fails the request.
fn unsupported_proxy_require(call: &Call, request: &Request) -> Option<Vec<String>> {
    let Some(TypedHeader::ProxyRequire(pr)) = request.header(&HeaderName::ProxyRequire) else {
        return None;
    };
    let unsupported: Vec<String> = pr.0.iter().filter(|tok| !call.config.supported_extensions.contains(tok.as_str())).cloned().collect();
    if unsupported.is_empty() {
        None
    } else {
        Some(unsupported)
    }
}

/// Pop the top `Route` entry if it is present, returning `true` if one was
/// removed.
fn pop_top_route(request: &mut Request) -> bool {
    let Some(idx) = request.headers.iter().position(|h| matches!(h, TypedHeader::Route(_))) else {
        return false;
    };
    let TypedHeader::Route(route) = request.headers[idx].clone() else { return false };
    let mut entries = route.0;
    if entries.is_empty() {
        request.headers.remove(idx);
        return false;
    }
    entries.remove(0);
    if entries.is_empty() {
        request.headers.remove(idx);
    } else {
        request.headers[idx] = TypedHeader::Route(Route(entries));
    }
    true
}
