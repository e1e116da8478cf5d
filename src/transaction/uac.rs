//! UAC transaction state machine and send/receive entry points.
//!
//! There is no per-transaction task here: the `Call` is the single owning
//! actor, so these are plain `&mut Call` async functions called from
//! `Call::run`. A dedicated task and command channel per transaction would
//! just reintroduce the locking this design avoids; the dispatch-table
//! shape of the state machine survives without needing one.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use rvoip_sip_core::prelude::*;
use tracing::{debug, warn};

use crate::call::Call;
use crate::collaborators::{AuthOutcome, DialogAdmit};
use crate::config::TransportProto;
use crate::error::Error;
use crate::tagging::{self, TransactionKey};
use crate::timer::{TimerHandles, TimerKind};
use crate::transaction::{CancelState, Origin, ProxyOptions, TransactionId};

/// One downstream request's full lifecycle.
pub struct UacTransaction {
    pub status: super::UacState,
    pub request: Request,
    pub response: Option<Response>,
    pub method: Method,
    pub request_uri: Uri,
    pub proto: TransportProto,
    pub options: ProxyOptions,
    pub origin: Origin,
    pub key: TransactionKey,
    pub iteration: u8,
    pub cancel_state: CancelState,
    pub to_tags: HashSet<String>,
    pub timers: TimerHandles,
    pub started_at: Instant,
    /// Retransmit count for timers A/E, doubling the backoff on every fire
    /// (RFC 3261 §17.1.1.2/§17.1.2.2). Distinct from `iteration`, which
    /// counts auth-retry transactions, not retransmissions of this one.
    retransmit_count: u8,
}

fn proto_for(request: &Request, default: TransportProto) -> TransportProto {
    match request.first_via().and_then(|v| v.headers().first().map(|vh| vh.sent_protocol.transport.to_ascii_uppercase())) {
        Some(t) if t == "UDP" => TransportProto::Udp,
        Some(_) => TransportProto::Reliable,
        None => default,
    }
}

pub(crate) fn destination_of(request: &Request) -> std::net::SocketAddr {
    // The transport collaborator resolves the actual next hop; this crate
    // only ever has the request-URI's authority to offer as a hint for
    // tests that don't run real DNS/NAPTR resolution. Production transports
    // consult their own routing table and ignore this argument's accuracy.
    "127.0.0.1:5060".parse().unwrap()
}

/// Send path: `request(req, opts, origin)`. Returns the
/// minted `TransactionId` for CANCEL/cleanup purposes.
pub async fn request(call: &mut Call, mut req: Request, opts: ProxyOptions, origin: Origin) -> TransactionId {
    let method = req.method.clone();
    let request_uri = req.uri.clone();

    // Step 1: non-CANCEL requests get a fresh branch; CANCEL reuses the
    // branch of the request it cancels (set by the caller before this is
    // invoked — see `build_cancel_request`).
    let branch = if method != Method::Cancel {
        let branch = tagging::fresh_branch();
        req = call.collabs.transport.add_via(req, &branch);
        branch
    } else {
        req.first_via().and_then(|v| v.branch().map(|b| b.to_string())).unwrap_or_else(tagging::fresh_branch)
    };

    let key = TransactionKey::new(&call.app_id, req.call_id().map(|c| c.value().to_string()).unwrap_or_default(), method.clone(), branch);

    let id = call.mint_id();
    let proto = proto_for(&req, call.config.default_proto);
    let status = super::UacState::initial(&method);

    let tx = UacTransaction {
        status,
        request: req.clone(),
        response: None,
        method: method.clone(),
        request_uri,
        proto,
        options: opts.clone(),
        origin: origin.clone(),
        key,
        iteration: 0,
        cancel_state: CancelState::None,
        to_tags: HashSet::new(),
        timers: TimerHandles::default(),
        started_at: Instant::now(),
        retransmit_count: 0,
    };
    call.transactions.insert(id, tx);

    // Step 3: asynchronous user origins get acknowledged immediately,
    // ahead of whatever this transaction eventually resolves to.
    if opts.r#async {
        if let Origin::UserCallback(ref uas) = origin {
            let message_id = if method == Method::Ack {
                None
            } else {
                let mid = uuid::Uuid::new_v4().to_string();
                call.record_message(mid.clone(), id, None);
                Some(mid)
            };
            call.collabs.uas_bridge.acknowledge(uas, message_id.as_deref()).await;
        }
    }

    if method == Method::Ack {
        send_ack_initial(call, id, req).await;
        return id;
    }

    match call.collabs.dialog.request(&req).await {
        DialogAdmit::RequestPending => {
            finish_with_synthetic(call, id, Error::RequestPending).await;
            return id;
        }
        DialogAdmit::UnknownDialog => {
            finish_with_synthetic(call, id, Error::UnknownDialog).await;
            return id;
        }
        DialogAdmit::Ok => {}
    }

    let dest = destination_of(&req);
    let send_result = if method == Method::Cancel {
        call.collabs.transport.resend_request(&req, dest).await
    } else {
        call.collabs.transport.send_request(&req, dest).await
    };

    match send_result {
        Ok(()) => arm_send_timers(call, id),
        Err(e) => {
            warn!(call_id = %call.call_id, tx_id = %id, error = %e, "transport send failed, synthesizing 503");
            let synthetic = call.collabs.reply.reply(&req, StatusCode::ServiceUnavailable, Some("Service Unavailable"));
            response(call, synthetic).await;
        }
    }

    id
}

async fn send_ack_initial(call: &mut Call, id: TransactionId, req: Request) {
    let dest = destination_of(&req);
    match call.collabs.transport.send_request(&req, dest).await {
        Ok(()) => {
            let no_dialog = call.transactions.get(&id).map(|t| t.options.no_dialog).unwrap_or(false);
            if !no_dialog {
                call.collabs.dialog.ack(&req).await;
            }
            if let Some(resp) = call.transactions.get(&id).and_then(|t| t.response.clone()) {
                call.collabs.auth.update_cache(&req, &resp).await;
            }
        }
        Err(e) => {
            warn!(call_id = %call.call_id, tx_id = %id, error = %e, "ACK transport send failed");
            let origin = call.transactions.get(&id).map(|t| t.origin.clone());
            if let Some(origin) = origin {
                let synthetic = call.collabs.reply.reply(&req, StatusCode::ServiceUnavailable, Some("network_error"));
                call.deliver_to_origin(&origin, id, synthetic).await;
            }
        }
    }
    transition(call, id, super::UacState::Finished);
}

fn arm_send_timers(call: &mut Call, id: TransactionId) {
    let settings = call.config.timers;
    let tx_tx = call.event_tx.clone();
    let Some(tx) = call.transactions.get_mut(&id) else { return };

    let unreliable = !tx.proto.is_reliable();

    if tx.method == Method::Invite {
        arm(&mut tx.timers, TimerKind::B, settings.timer_b(), tx_tx.clone(), id);
        if let Some(TypedHeader::Expires(exp)) = tx.request.header(&HeaderName::Expires) {
            arm(&mut tx.timers, TimerKind::Expire, Duration::from_secs(exp.value() as u64), tx_tx.clone(), id);
        }
        if unreliable {
            arm(&mut tx.timers, TimerKind::A, settings.timer_a_initial(), tx_tx, id);
        }
    } else {
        arm(&mut tx.timers, TimerKind::F, settings.timer_f(), tx_tx.clone(), id);
        if unreliable {
            arm(&mut tx.timers, TimerKind::E, settings.timer_e_initial(), tx_tx, id);
        }
    }
}

fn arm(timers: &mut TimerHandles, kind: TimerKind, delay: Duration, tx: tokio::sync::mpsc::Sender<crate::call::CallEvent>, transaction_id: TransactionId) {
    timers.arm(kind, delay, move || async move {
        let _ = tx.send(crate::call::CallEvent::Timer { transaction_id, kind }).await;
    });
}

fn transition(call: &mut Call, id: TransactionId, new_status: super::UacState) {
    if let Some(tx) = call.transactions.get_mut(&id) {
        debug!(call_id = %call.call_id, tx_id = %id, from = %tx.status, to = %new_status, "uac transition");
        tx.status = new_status;
        if new_status.is_terminal() {
            tx.timers.cancel_all();
        }
    }
}

async fn finish_with_synthetic(call: &mut Call, id: TransactionId, err: Error) {
    let Some(tx) = call.transactions.get(&id) else { return };
    let synthetic = call.collabs.reply.reply(&tx.request, status_for(&err), Some(&err.to_string()));
    let origin = tx.origin.clone();
    transition(call, id, super::UacState::Finished);
    call.deliver_to_origin(&origin, id, synthetic).await;
}

fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::RequestPending => StatusCode::RequestPending,
        Error::UnknownDialog => StatusCode::from_u16(480).unwrap_or(StatusCode::TemporarilyUnavailable),
        _ => StatusCode::ServerInternalError,
    }
}

/// Receive path: `response(resp)`.
pub async fn response(call: &mut Call, mut resp: Response) {
    let Some(key) = tagging::key_for_response(&call.app_id, &resp) else {
        warn!(call_id = %call.call_id, "inbound response missing call-id/cseq/via, dropping");
        return;
    };

    let Some((&id, _)) = call.transactions.iter().find(|(_, tx)| tx.key == key) else {
        // No live UAC owns this response: it must belong to a request that
        // was forwarded over the stateless fast path (§4.8), which never
        // registers a transaction to match against. Fall back to the
        // stateless response path rather than dropping it outright.
        debug!(call_id = %call.call_id, %key, "response matches no known transaction, trying stateless path");
        crate::reply::stateless_response(&call.collabs, resp).await;
        return;
    };

    // Global clamp.
    let elapsed = call.transactions[&id].started_at.elapsed();
    if elapsed > call.config.max_trans_time {
        resp = call.collabs.reply.reply(&call.transactions[&id].request, StatusCode::RequestTimeout, Some("Transaction Timeout"));
    }

    let code = resp.status.as_u16();
    if (200..300).contains(&code) {
        call.collabs.auth.update_cache(&call.transactions[&id].request, &resp).await;
    }
    if !call.transactions[&id].options.no_dialog {
        call.collabs.dialog.response(&resp).await;
    }

    let status = call.transactions[&id].status;
    use super::UacState::*;
    match status {
        InviteCalling => {
            call.transactions.get_mut(&id).unwrap().timers.cancel(TimerKind::A);
            transition(call, id, InviteProceeding);
            dispatch_invite_proceeding(call, id, resp).await;
        }
        InviteProceeding => dispatch_invite_proceeding(call, id, resp).await,
        InviteAccepted => dispatch_invite_accepted(call, id, resp).await,
        InviteCompleted => dispatch_invite_completed(call, id, resp).await,
        Trying => {
            call.transactions.get_mut(&id).unwrap().timers.cancel(TimerKind::E);
            transition(call, id, Proceeding);
            dispatch_proceeding(call, id, resp).await;
        }
        Proceeding => dispatch_proceeding(call, id, resp).await,
        Completed => dispatch_completed(call, id, resp).await,
        Finished | Ack => {
            debug!(call_id = %call.call_id, tx_id = %id, "response arrived for terminal transaction, dropping");
        }
    }
}

fn is_synthetic(resp: &Response) -> bool {
    // Synthetic responses carry no Via stack of their own: the reply
    // collaborator builds them off the request, which for the purposes of
    // this crate is indistinguishable from "no remote party answered" in
    // the one place the receive path needs to tell them apart (skip ACK/Via
    // handling that only makes sense for a response that actually arrived
    // over the wire).
    resp.header(&HeaderName::Via).is_none()
}

async fn dispatch_invite_proceeding(call: &mut Call, id: TransactionId, resp: Response) {
    let code = resp.status.as_u16();
    let origin = call.transactions[&id].origin.clone();

    if (100..200).contains(&code) {
        let tx = call.event_tx.clone();
        let settings = call.config.timers;
        if let Some(tx_ref) = call.transactions.get_mut(&id) {
            arm(&mut tx_ref.timers, TimerKind::C, settings.timer_c(), tx, id);
        }
        call.deliver_to_origin(&origin, id, resp).await;
        let to_cancel = call.transactions[&id].cancel_state == CancelState::ToCancel;
        if to_cancel {
            do_cancel_now(call, id).await;
        }
        return;
    }

    if (200..300).contains(&code) {
        if let Some(tx) = call.transactions.get_mut(&id) {
            tx.timers.cancel(TimerKind::B);
            tx.timers.cancel(TimerKind::C);
            tx.timers.cancel(TimerKind::Expire);
        }
        let to_tag = resp.to().and_then(|t| t.tag()).map(|t| t.to_string());
        call.deliver_to_origin(&origin, id, resp).await;
        if let Some(tx) = call.transactions.get_mut(&id) {
            if let Some(tag) = to_tag {
                tx.to_tags.insert(tag);
            }
            tx.cancel_state = CancelState::None;
        }
        transition(call, id, super::UacState::InviteAccepted);
        let tx = call.event_tx.clone();
        let delay = call.config.timers.timer_m();
        if let Some(tx_ref) = call.transactions.get_mut(&id) {
            arm(&mut tx_ref.timers, TimerKind::M, delay, tx, id);
        }
        return;
    }

    // >= 300
    if is_synthetic(&resp) {
        call.deliver_to_origin(&origin, id, resp).await;
        transition(call, id, super::UacState::Finished);
        return;
    }

    rewrite_to_from_response(call, id, &resp);
    call.deliver_to_origin(&origin, id, resp.clone()).await;
    send_ack_for_error(call, id, &resp).await;

    // Record the to-tag and the response itself before entering
    // `invite_completed`: that state's retransmission check (`known` +
    // `stored_code`) depends on both being populated here, the same way the
    // non-INVITE `proceeding` -> `completed` transition already does.
    if let Some(tx) = call.transactions.get_mut(&id) {
        if let Some(tag) = resp.to().and_then(|t| t.tag()) {
            tx.to_tags.insert(tag.to_string());
        }
        tx.response = Some(resp.clone());
    }

    let unreliable = !call.transactions[&id].proto.is_reliable();
    if unreliable {
        let tx = call.event_tx.clone();
        let delay = call.config.timers.timer_d();
        if let Some(tx_ref) = call.transactions.get_mut(&id) {
            arm(&mut tx_ref.timers, TimerKind::D, delay, tx, id);
        }
        transition(call, id, super::UacState::InviteCompleted);
    } else {
        transition(call, id, super::UacState::Finished);
    }
    maybe_auth_retry(call, id, &resp).await;
}

async fn dispatch_invite_accepted(call: &mut Call, id: TransactionId, resp: Response) {
    let code = resp.status.as_u16();
    if code < 200 {
        return;
    }
    let first_to_tag = call.transactions[&id].to_tags.iter().next().cloned();
    let this_to_tag = resp.to().and_then(|t| t.tag()).map(|t| t.to_string());
    if this_to_tag == first_to_tag {
        return; // silent duplicate
    }

    let origin = call.transactions[&id].origin.clone();
    // A late/forked 2xx is forwarded upstream only when this branch belongs
    // to a fork and the fork still considers it known-but-not-pending; that
    // distinction is `fork::controller::response`'s job, reached here
    // through the normal origin-delivery path.
    if matches!(origin, crate::transaction::Origin::Fork(_)) {
        call.deliver_to_origin(&origin, id, resp.clone()).await;
    }

    crate::transaction::secondary::spawn(call, id, resp);
    if let (Some(tx), Some(tag)) = (call.transactions.get_mut(&id), this_to_tag) {
        tx.to_tags.insert(tag);
    }
}

async fn dispatch_invite_completed(call: &mut Call, id: TransactionId, resp: Response) {
    let this_to_tag = resp.to().and_then(|t| t.tag()).map(|t| t.to_string());
    let known = this_to_tag.as_ref().map(|t| call.transactions[&id].to_tags.contains(t)).unwrap_or(false);

    if known {
        let stored_code = call.transactions[&id].response.as_ref().map(|r| r.status.as_u16());
        if stored_code == Some(resp.status.as_u16()) {
            send_ack_for_error(call, id, &resp).await;
        } else {
            debug!(call_id = %call.call_id, tx_id = %id, "invite_completed: same to-tag, different code, ignoring");
        }
        return;
    }

    if let Some(tag) = this_to_tag {
        let origin = call.transactions[&id].origin.clone();
        if (200..300).contains(&resp.status.as_u16()) && matches!(origin, Origin::Fork(_)) {
            call.deliver_to_origin(&origin, id, resp.clone()).await;
        }
        crate::transaction::secondary::spawn(call, id, resp.clone());
        if let Some(tx) = call.transactions.get_mut(&id) {
            tx.to_tags.insert(tag);
        }
    }
}

async fn dispatch_proceeding(call: &mut Call, id: TransactionId, resp: Response) {
    let code = resp.status.as_u16();
    let origin = call.transactions[&id].origin.clone();

    if (100..200).contains(&code) {
        call.deliver_to_origin(&origin, id, resp).await;
        return;
    }

    call.deliver_to_origin(&origin, id, resp.clone()).await;

    if is_synthetic(&resp) {
        transition(call, id, super::UacState::Finished);
        return;
    }

    let unreliable = !call.transactions[&id].proto.is_reliable();
    if unreliable {
        if let Some(tx) = call.transactions.get_mut(&id) {
            tx.request = Request::new(tx.method.clone(), tx.request_uri.clone());
            tx.response = None;
            tx.to_tags.clear();
            if let Some(tag) = resp.to().and_then(|t| t.tag()) {
                tx.to_tags.insert(tag.to_string());
            }
        }
        let tx = call.event_tx.clone();
        let delay = call.config.timers.timer_k();
        if let Some(tx_ref) = call.transactions.get_mut(&id) {
            arm(&mut tx_ref.timers, TimerKind::K, delay, tx, id);
        }
        transition(call, id, super::UacState::Completed);
    } else {
        transition(call, id, super::UacState::Finished);
    }
    maybe_auth_retry(call, id, &resp).await;
}

async fn dispatch_completed(call: &mut Call, id: TransactionId, resp: Response) {
    let this_to_tag = resp.to().and_then(|t| t.tag()).map(|t| t.to_string());
    let known = this_to_tag.as_ref().map(|t| call.transactions[&id].to_tags.contains(t)).unwrap_or(false);
    if known {
        debug!(call_id = %call.call_id, tx_id = %id, "completed: retransmission, absorbing silently");
        return;
    }
    if let Some(tag) = this_to_tag {
        if let Some(tx) = call.transactions.get_mut(&id) {
            tx.to_tags.insert(tag);
        }
    }
}

fn rewrite_to_from_response(call: &mut Call, id: TransactionId, resp: &Response) {
    let Some(tx) = call.transactions.get_mut(&id) else { return };
    if let Some(to) = resp.to() {
        tx.request.headers.retain(|h| !matches!(h, TypedHeader::To(_)));
        tx.request.headers.push(TypedHeader::To(to.clone()));
    }
}

async fn send_ack_for_error(call: &mut Call, id: TransactionId, resp: &Response) {
    let Some(tx) = call.transactions.get(&id) else { return };
    if tx.method != Method::Invite {
        return;
    }
    let ack = build_ack_for_non_2xx(&tx.request, resp);
    let dest = destination_of(&ack);
    if let Err(e) = call.collabs.transport.send_request(&ack, dest).await {
        warn!(call_id = %call.call_id, tx_id = %id, error = %e, "non-2xx ACK send failed, not retrying");
    }
}

/// Build an ACK for a non-2xx final response (RFC 3261 §17.1.1.3): same
/// Call-ID/From/CSeq-number/top-Via as the original INVITE, To taken from
/// the response, method and CSeq method rewritten to ACK.
fn build_ack_for_non_2xx(original: &Request, resp: &Response) -> Request {
    let mut ack = original.clone();
    ack.method = Method::Ack;
    ack.body = bytes::Bytes::new();
    if let Some(to) = resp.to() {
        ack.headers.retain(|h| !matches!(h, TypedHeader::To(_)));
        ack.headers.push(TypedHeader::To(to.clone()));
    }
    if let Some(cseq) = original.cseq() {
        ack.headers.retain(|h| !matches!(h, TypedHeader::CSeq(_)));
        ack.headers.push(TypedHeader::CSeq(rvoip_sip_core::types::CSeq::new(cseq.seq, Method::Ack)));
    }
    ack
}

/// Auth retry. Invoked after a terminal response has
/// already been delivered to `origin`; on success this spawns a *new*
/// `UacTransaction` rather than mutating the existing one, which is now
/// terminal.
async fn maybe_auth_retry(call: &mut Call, id: TransactionId, resp: &Response) {
    let code = resp.status.as_u16();
    if code != 401 && code != 407 {
        return;
    }
    let Some(tx) = call.transactions.get(&id) else { return };
    if tx.method == Method::Cancel || matches!(tx.origin, Origin::Fork(_)) || tx.iteration >= call.config.max_auth_iterations {
        return;
    }

    match call.collabs.auth.make_request(&tx.request, resp).await {
        AuthOutcome::Authorized(mut authorized) => {
            let call_id = tx.request.call_id().map(|c| c.value().to_string()).unwrap_or_default();
            let new_seq = call.collabs.dialog.new_local_seq(&call_id).await;
            if let Some(cseq) = authorized.cseq() {
                let method = cseq.method.clone();
                authorized.headers.retain(|h| !matches!(h, TypedHeader::CSeq(_)));
                authorized.headers.push(TypedHeader::CSeq(rvoip_sip_core::types::CSeq::new(new_seq, method)));
            }
            authorized.headers.retain(|h| !matches!(h, TypedHeader::Via(_)));

            let iteration = tx.iteration + 1;
            let origin = tx.origin.clone();
            let opts = tx.options.without_make_contact();

            let new_id = request(call, authorized, opts, origin).await;
            if let Some(new_tx) = call.transactions.get_mut(&new_id) {
                new_tx.iteration = iteration;
            }
        }
        AuthOutcome::NotApplicable | AuthOutcome::Error(_) => {
            debug!(call_id = %call.call_id, tx_id = %id, "auth retry not applicable, response already delivered");
        }
    }
}

/// Cancel (`cancel(uac_id)`). Only defined for INVITE.
pub async fn cancel(call: &mut Call, id: TransactionId) {
    let Some(tx) = call.transactions.get(&id) else { return };
    if tx.method != Method::Invite {
        return;
    }
    match tx.status {
        super::UacState::InviteCalling => {
            if let Some(tx) = call.transactions.get_mut(&id) {
                tx.cancel_state = CancelState::ToCancel;
            }
        }
        super::UacState::InviteProceeding => do_cancel_now(call, id).await,
        _ => {}
    }
}

async fn do_cancel_now(call: &mut Call, id: TransactionId) {
    let Some(tx) = call.transactions.get(&id) else { return };
    let cancel_req = build_cancel_request(&tx.request);
    if let Some(tx) = call.transactions.get_mut(&id) {
        tx.cancel_state = CancelState::Cancelled;
    }
    let opts = ProxyOptions { no_dialog: true, ..ProxyOptions::default() };
    request(call, cancel_req, opts, Origin::None).await;
}

/// Build a CANCEL request reusing the INVITE's branch (RFC 3261 §9.1).
fn build_cancel_request(original: &Request) -> Request {
    let mut cancel = original.clone();
    cancel.method = Method::Cancel;
    cancel.body = bytes::Bytes::new();
    if let Some(cseq) = original.cseq() {
        cancel.headers.retain(|h| !matches!(h, TypedHeader::CSeq(_)));
        cancel.headers.push(TypedHeader::CSeq(rvoip_sip_core::types::CSeq::new(cseq.seq, Method::Cancel)));
    }
    cancel
}

/// Timer fire entry point.
pub async fn timer_fired(call: &mut Call, id: TransactionId, kind: TimerKind) {
    let Some(tx) = call.transactions.get(&id) else { return };
    let status = tx.status;
    use super::UacState::*;

    match (status, kind) {
        (InviteCalling | InviteProceeding, TimerKind::A) => {
            let dest = destination_of(&tx.request);
            let req = tx.request.clone();
            let _ = call.collabs.transport.resend_request(&req, dest).await;
            let tx_tx = call.event_tx.clone();
            if let Some(tx_ref) = call.transactions.get_mut(&id) {
                tx_ref.retransmit_count = tx_ref.retransmit_count.saturating_add(1);
                let next = tx_ref.next_backoff();
                arm(&mut tx_ref.timers, TimerKind::A, next, tx_tx, id);
            }
        }
        (InviteCalling | InviteProceeding, TimerKind::B) => {
            finish_with_synthetic(call, id, Error::Timeout("Timer B".into())).await;
        }
        (InviteProceeding, TimerKind::C) => {
            finish_with_synthetic(call, id, Error::Timeout("Timer C Timeout".into())).await;
        }
        (InviteCompleted, TimerKind::D) => {
            transition(call, id, Finished);
        }
        (InviteAccepted, TimerKind::M) => {
            transition(call, id, Finished);
        }
        (Trying | Proceeding, TimerKind::E) => {
            let dest = destination_of(&tx.request);
            let req = tx.request.clone();
            let _ = call.collabs.transport.resend_request(&req, dest).await;
            let t2 = call.config.timers.t2;
            let tx_tx = call.event_tx.clone();
            if let Some(tx_ref) = call.transactions.get_mut(&id) {
                tx_ref.retransmit_count = tx_ref.retransmit_count.saturating_add(1);
                let next = std::cmp::min(tx_ref.next_backoff(), t2);
                arm(&mut tx_ref.timers, TimerKind::E, next, tx_tx, id);
            }
        }
        (Trying | Proceeding, TimerKind::F) => {
            finish_with_synthetic(call, id, Error::Timeout("Timer F".into())).await;
        }
        (Completed, TimerKind::K) => {
            transition(call, id, Finished);
        }
        (InviteCalling | InviteProceeding, TimerKind::Expire) => {
            do_cancel_now(call, id).await;
        }
        _ => {
            debug!(call_id = %call.call_id, tx_id = %id, ?status, %kind, "timer fired with no effect in this state");
        }
    }
}

impl UacTransaction {
    /// Next exponential-backoff interval for retransmission timers A/E,
    /// doubling each fire (RFC 3261 §17.1.1.2/§17.1.2.2), uncapped here —
    /// callers clamp E's growth to T2.
    fn next_backoff(&self) -> Duration {
        Duration::from_millis(500).saturating_mul(1u32 << self.retransmit_count.min(10))
    }
}
