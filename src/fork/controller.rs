//! Fork Controller state machine.
//!
//! The state machine is implicit in `(pending, uriset, final_status)`; this
//! module is the set of free functions that advance it. Every function
//! takes `&mut Call` rather than `&mut Fork` because advancing a fork
//! routinely needs to spawn UAC transactions, which only `Call` can mint
//! ids and own.

use std::collections::{HashSet, VecDeque};

use rvoip_sip_core::prelude::*;
use rvoip_sip_core::types::uri::Scheme;
use tracing::{debug, warn};

use crate::call::Call;
use crate::collaborators::UasHandle;
use crate::fork::{FinalLatch, Fork, ForkId};
use crate::transaction::{uac, Origin, ProxyOptions, TransactionId};

/// `start(uriset)`: create the fork record and immediately
/// drive it once. Returns the fork's id, which doubles as the id by which
/// the caller later issues `cancel`.
pub async fn start(call: &mut Call, uas: UasHandle, method: Method, options: ProxyOptions, request: Request, uriset: VecDeque<Vec<Uri>>) -> ForkId {
    let id = call.mint_id();
    let fork = Fork::new(id, uas, method, options, request, uriset);
    call.forks.insert(id, fork);
    next(call, id).await;
    id
}

/// `next(fork)`: advance a fork now that something about
/// its state changed (a branch completed, a group was just launched...).
pub async fn next(call: &mut Call, fork_id: ForkId) {
    let Some(fork) = call.forks.get(&fork_id) else { return };

    if !fork.pending.is_empty() {
        return; // wait for outstanding branches
    }

    if fork.final_status.is_latched() {
        call.forks.remove(&fork_id);
        return;
    }

    if fork.uriset.is_empty() {
        if fork.method == Method::Ack {
            call.forks.remove(&fork_id);
            return;
        }
        let winner = crate::fork::best_response::select(&fork.responses);
        forward_upstream(call, fork_id, winner).await;
        call.forks.remove(&fork_id);
        return;
    }

    let group = call.forks.get_mut(&fork_id).and_then(|f| f.uriset.pop_front());
    if let Some(group) = group {
        launch(call, fork_id, group).await;
    }
}

/// `launch(group)`: clone the fork's template request once
/// per URI in the group and spawn a UAC for each, unless the target
/// resolves locally (loop detection) or the URI itself fails to produce a
/// usable request, in which case a synthetic response is recorded instead
/// and the loop continues.
pub async fn launch(call: &mut Call, fork_id: ForkId, group: Vec<Uri>) {
    for uri in group {
        let Some(fork) = call.forks.get(&fork_id) else { return };

        if call.collabs.transport.is_local(&uri) {
            warn!(call_id = %call.call_id, ?fork_id, %uri, "fork branch target is local, loop detected");
            let synthetic = call.collabs.reply.reply(&fork.request, StatusCode::LoopDetected, Some("Loop Detected"));
            if let Some(fork) = call.forks.get_mut(&fork_id) {
                fork.push_response(synthetic);
            }
            continue;
        }

        let mut branch_req = fork.request.clone();
        branch_req.uri = uri.clone();
        let method = fork.method.clone();
        let options = fork.options.clone();

        let message_id = uuid::Uuid::new_v4().to_string();
        call.record_message(message_id, fork_id, None);

        if let Some(routes) = super::route_header_for(&uri) {
            let mut headers = routes.into_iter().map(TypedHeader::Route).collect::<Vec<_>>();
            headers.extend(branch_req.headers);
            branch_req.headers = headers;
        }

        let origin = Origin::Fork(fork_id);
        let uac_id = uac::request(call, branch_req, options, origin).await;

        if let Some(fork) = call.forks.get_mut(&fork_id) {
            fork.uacs.push(uac_id);
            if method != Method::Ack {
                fork.pending.insert(uac_id);
            }
        }
    }

    next(call, fork_id).await;
}

/// `response(fork_id, uac_id, response)`: the single place
/// a `Fork` learns a branch completed (or progressed).
pub async fn response(call: &mut Call, fork_id: ForkId, uac_id: TransactionId, resp: Response) {
    let code = resp.status.as_u16();
    if code < 101 {
        return;
    }

    let Some(fork) = call.forks.get(&fork_id) else {
        debug!(?fork_id, tx_id = %uac_id, "response for unknown fork, dropping");
        return;
    };

    let is_pending = fork.pending.contains(&uac_id);
    let is_known = is_pending || fork.uacs.contains(&uac_id);

    if !is_known {
        debug!(call_id = %call.call_id, ?fork_id, tx_id = %uac_id, "response from unknown uac, ignoring");
        return;
    }

    if !is_pending {
        // Late-arriving response on a branch the fork already settled.
        if (200..300).contains(&code) {
            forward_upstream(call, fork_id, resp).await;
        }
        return;
    }

    match code {
        100..=199 => {
            let final_latched = call.forks[&fork_id].final_status.is_latched();
            if !final_latched {
                forward_upstream_non_final(call, fork_id, resp).await;
            }
        }
        200..=299 => {
            if let Some(fork) = call.forks.get_mut(&fork_id) {
                fork.pending.remove(&uac_id);
                fork.uriset.clear();
            }
            cancel_siblings(call, fork_id, "200 Call completed elsewhere").await;

            let should_forward = !call.forks[&fork_id].final_status.is_latched();
            if should_forward {
                if let Some(fork) = call.forks.get_mut(&fork_id) {
                    fork.final_status = FinalLatch::TwoXx;
                }
                forward_upstream(call, fork_id, resp).await;
            }
            next(call, fork_id).await;
        }
        300..=399 => {
            if let Some(fork) = call.forks.get_mut(&fork_id) {
                fork.pending.remove(&uac_id);
            }

            let follow = call.forks[&fork_id].options.follow_redirects;
            let final_latched = call.forks[&fork_id].final_status.is_latched();
            let contacts = extract_contacts(&resp);

            if follow && !final_latched && !contacts.is_empty() {
                let sips_only = call.transactions.get(&uac_id).map(|t| t.request_uri.scheme == Scheme::Sips).unwrap_or(false);
                let next_group: Vec<Uri> = if sips_only {
                    contacts.into_iter().filter(|u| u.scheme == Scheme::Sips).collect()
                } else {
                    contacts
                };
                if !next_group.is_empty() {
                    if let Some(fork) = call.forks.get_mut(&fork_id) {
                        fork.uriset.push_front(next_group);
                    }
                } else if let Some(fork) = call.forks.get_mut(&fork_id) {
                    fork.push_response(resp);
                }
            } else if let Some(fork) = call.forks.get_mut(&fork_id) {
                fork.push_response(resp);
            }
            next(call, fork_id).await;
        }
        400..=599 => {
            if let Some(fork) = call.forks.get_mut(&fork_id) {
                fork.pending.remove(&uac_id);
                fork.push_response(resp);
            }
            next(call, fork_id).await;
        }
        600..=699 => {
            if let Some(fork) = call.forks.get_mut(&fork_id) {
                fork.pending.remove(&uac_id);
                fork.uriset.clear();
            }
            cancel_siblings(call, fork_id, "6xx final").await;

            let should_forward = !call.forks[&fork_id].final_status.is_latched();
            if should_forward {
                if let Some(fork) = call.forks.get_mut(&fork_id) {
                    fork.final_status = FinalLatch::SixXx;
                }
                forward_upstream(call, fork_id, resp).await;
            }
            next(call, fork_id).await;
        }
        _ => {}
    }
}

/// `cancel(fork_id)`: user- or dialog-initiated CANCEL on
/// the whole fork. INVITE forks cancel every pending branch; other methods
/// just stop launching further groups and let in-flight branches finish.
pub async fn cancel(call: &mut Call, fork_id: ForkId) {
    let Some(fork) = call.forks.get_mut(&fork_id) else { return };
    fork.uriset.clear();

    if fork.method != Method::Invite {
        return;
    }

    let pending: Vec<TransactionId> = fork.pending.iter().copied().collect();
    for uac_id in pending {
        uac::cancel(call, uac_id).await;
    }
}

async fn cancel_siblings(call: &mut Call, fork_id: ForkId, reason: &str) {
    let pending: Vec<TransactionId> = call.forks.get(&fork_id).map(|f| f.pending.iter().copied().collect()).unwrap_or_default();
    for uac_id in pending {
        debug!(call_id = %call.call_id, ?fork_id, tx_id = %uac_id, reason, "cancelling sibling fork branch");
        uac::cancel(call, uac_id).await;
    }
}

async fn forward_upstream(call: &mut Call, fork_id: ForkId, resp: Response) {
    let Some(uas) = call.forks.get(&fork_id).map(|f| f.uas.clone()) else { return };
    call.collabs.uas_bridge.deliver(&uas, resp).await;
}

async fn forward_upstream_non_final(call: &mut Call, fork_id: ForkId, resp: Response) {
    forward_upstream(call, fork_id, resp).await;
}

/// Extract every `Contact` target from a redirect response.
fn extract_contacts(resp: &Response) -> Vec<Uri> {
    resp.headers
        .iter()
        .filter_map(|h| match h {
            TypedHeader::Contact(c) => Some(c),
            _ => None,
        })
        .flat_map(|c| c.params().iter().map(|p| p.address.uri.clone()).collect::<Vec<_>>())
        .collect()
}
