//! End-to-end scenario tests driving `Call` + `fork::controller` together
//! through the mock collaborators in `tests/common`.

mod common;

use std::collections::VecDeque;
use std::sync::Arc;

use rvoip_sip_core::prelude::*;

use rvoip_proxy_core::call::Call;
use rvoip_proxy_core::collaborators::UasHandle;
use rvoip_proxy_core::config::ProxyConfig;
use rvoip_proxy_core::fork::controller;
use rvoip_proxy_core::transaction::ProxyOptions;

use common::{bye_request, invite_request, response_for, uri, Harness};

fn make_call(harness: &Harness, call_id: &str) -> Call {
    Call::new("app1", call_id, Arc::new(ProxyConfig::default()), harness.collaborators())
}

#[tokio::test]
async fn parallel_fork_one_200_cancels_siblings_and_absorbs_late_responses() {
    let harness = Harness::new();
    let mut call = make_call(&harness, "call-1");
    let uas = UasHandle("uas-1".to_string());
    let request = invite_request("call-1", "sip:bob@example.com");

    let group = vec![uri("sip:a@example.com"), uri("sip:b@example.com"), uri("sip:c@example.com")];
    let uriset: VecDeque<Vec<Uri>> = VecDeque::from(vec![group]);

    let fork_id = controller::start(&mut call, uas, Method::Invite, ProxyOptions::default(), request.clone(), uriset).await;

    let branch_ids = call.forks[&fork_id].uacs.clone();
    assert_eq!(branch_ids.len(), 3);
    let (a, b, c) = (branch_ids[0], branch_ids[1], branch_ids[2]);

    // B and C each get a provisional first, moving them out of
    // `invite_calling` and into `invite_proceeding` -- a CANCEL is deferred
    // until a transaction has seen a provisional (RFC 3261 §9.1), so without
    // this neither branch ever leaves `invite_calling` and the CANCEL below
    // would never actually fire. Routed through `uac::response` (not
    // `controller::response`) since it's the state transition itself that
    // matters here, not just the fork-level bookkeeping.
    for sibling in [b, c] {
        let sibling_request = call.transactions[&sibling].request.clone();
        let provisional = response_for(&sibling_request, StatusCode::Ringing);
        rvoip_proxy_core::transaction::uac::response(&mut call, provisional).await;
    }
    assert_eq!(harness.uas_bridge.count().await, 2, "B and C's provisional forwards upstream too");

    // A rings.
    let ringing = response_for(&request, StatusCode::Ringing);
    controller::response(&mut call, fork_id, a, ringing).await;
    assert_eq!(harness.uas_bridge.count().await, 3);
    assert_eq!(harness.uas_bridge.last().await.unwrap().status, StatusCode::Ringing);

    // A answers -- B and C must be cancelled, 200 forwarded upstream.
    let ok = response_for(&request, StatusCode::Ok);
    controller::response(&mut call, fork_id, a, ok).await;

    assert_eq!(harness.uas_bridge.count().await, 4);
    assert_eq!(harness.uas_bridge.last().await.unwrap().status, StatusCode::Ok);

    let cancels = harness.transport.requests_with_method(Method::Cancel).await;
    assert_eq!(cancels.len(), 2, "both B and C should have been sent CANCEL");

    // Fork still alive: B and C haven't reported their final response yet.
    assert!(call.forks.contains_key(&fork_id));

    // Late failures from the cancelled branches must not displace the 2xx.
    let busy = response_for(&request, StatusCode::BusyHere);
    controller::response(&mut call, fork_id, b, busy).await;
    let request_terminated = response_for(&request, StatusCode::RequestTerminated);
    controller::response(&mut call, fork_id, c, request_terminated).await;

    assert_eq!(harness.uas_bridge.count().await, 4, "late 4xx must be absorbed silently");
    assert!(!call.forks.contains_key(&fork_id), "fork should be cleaned up once all branches settle");
}

#[tokio::test]
async fn serial_groups_all_fail_picks_lower_ranked_final() {
    let harness = Harness::new();
    let mut call = make_call(&harness, "call-2");
    let uas = UasHandle("uas-2".to_string());
    let request = invite_request("call-2", "sip:bob@example.com");

    let uriset: VecDeque<Vec<Uri>> = VecDeque::from(vec![vec![uri("sip:a@example.com")], vec![uri("sip:b@example.com")]]);
    let fork_id = controller::start(&mut call, uas, Method::Invite, ProxyOptions::default(), request.clone(), uriset).await;

    let a = call.forks[&fork_id].uacs[0];
    let busy = response_for(&request, StatusCode::BusyHere);
    controller::response(&mut call, fork_id, a, busy).await;

    // Second group should now be live.
    assert_eq!(call.forks[&fork_id].uacs.len(), 2);
    let b = call.forks[&fork_id].uacs[1];
    let not_found = response_for(&request, StatusCode::NotFound);
    controller::response(&mut call, fork_id, b, not_found).await;

    assert!(!call.forks.contains_key(&fork_id));
    assert_eq!(harness.uas_bridge.count().await, 1);
    assert_eq!(harness.uas_bridge.last().await.unwrap().status.as_u16(), 404);
}

#[tokio::test]
async fn redirect_is_followed_and_filtered_to_sips() {
    let harness = Harness::new();
    let mut call = make_call(&harness, "call-3");
    let uas = UasHandle("uas-3".to_string());

    let mut request = invite_request("call-3", "sips:bob@example.com");
    request.uri = uri("sips:bob@example.com");

    let uriset: VecDeque<Vec<Uri>> = VecDeque::from(vec![vec![uri("sips:bob@example.com")]]);
    let opts = ProxyOptions { follow_redirects: true, ..ProxyOptions::default() };
    let fork_id = controller::start(&mut call, uas, Method::Invite, opts, request.clone(), uriset).await;

    let a = call.forks[&fork_id].uacs[0];

    let mut redirect = response_for(&request, StatusCode::MovedTemporarily);
    redirect.headers.push(TypedHeader::Contact(Contact::new_params(vec![
        ContactParamInfo { address: Address::new(uri("sips:y@example.com")) },
        ContactParamInfo { address: Address::new(uri("sip:z@example.com")) },
    ])));

    controller::response(&mut call, fork_id, a, redirect).await;

    // Only the sips contact should have been launched as a new branch.
    assert_eq!(call.forks[&fork_id].uacs.len(), 2);
    let new_branch_request = harness.transport.requests_with_method(Method::Invite).await;
    assert!(new_branch_request.iter().any(|r| r.uri.to_string().starts_with("sips:y")));
    assert!(!new_branch_request.iter().any(|r| r.uri.to_string().starts_with("sip:z")));
}

#[tokio::test]
async fn cancel_before_provisional_is_deferred_until_first_1xx() {
    let harness = Harness::new();
    let mut call = make_call(&harness, "call-4");
    let request = invite_request("call-4", "sip:bob@example.com");

    let id = rvoip_proxy_core::transaction::uac::request(&mut call, request.clone(), ProxyOptions::default(), rvoip_proxy_core::transaction::Origin::None).await;
    assert_eq!(call.transactions[&id].status, rvoip_proxy_core::transaction::UacState::InviteCalling);

    rvoip_proxy_core::transaction::uac::cancel(&mut call, id).await;
    assert_eq!(call.transactions[&id].cancel_state, rvoip_proxy_core::transaction::CancelState::ToCancel);
    assert_eq!(harness.transport.requests_with_method(Method::Cancel).await.len(), 0, "no CANCEL before a provisional arrives");

    let ringing = response_for(&request, StatusCode::Ringing);
    rvoip_proxy_core::transaction::uac::response(&mut call, ringing).await;

    assert_eq!(call.transactions[&id].cancel_state, rvoip_proxy_core::transaction::CancelState::Cancelled);
    assert_eq!(harness.transport.requests_with_method(Method::Cancel).await.len(), 1);
}

#[tokio::test]
async fn late_2xx_with_new_to_tag_triggers_ack_bye_cleanup() {
    let harness = Harness::new();
    let mut call = make_call(&harness, "call-5");
    let request = invite_request("call-5", "sip:bob@example.com");

    let id = rvoip_proxy_core::transaction::uac::request(&mut call, request.clone(), ProxyOptions::default(), rvoip_proxy_core::transaction::Origin::None).await;

    let mut first_ok = response_for(&request, StatusCode::Ok);
    if let Some(TypedHeader::To(to)) = first_ok.header(&HeaderName::To) {
        let mut to = to.clone();
        to.0.set_tag("tag-leg-1");
        first_ok.headers.retain(|h| !matches!(h, TypedHeader::To(_)));
        first_ok.headers.push(TypedHeader::To(to));
    }
    rvoip_proxy_core::transaction::uac::response(&mut call, first_ok).await;
    assert_eq!(call.transactions[&id].status, rvoip_proxy_core::transaction::UacState::InviteAccepted);

    let mut second_ok = response_for(&request, StatusCode::Ok);
    if let Some(TypedHeader::To(to)) = second_ok.header(&HeaderName::To) {
        let mut to = to.clone();
        to.0.set_tag("tag-leg-2");
        second_ok.headers.retain(|h| !matches!(h, TypedHeader::To(_)));
        second_ok.headers.push(TypedHeader::To(to));
    }
    rvoip_proxy_core::transaction::uac::response(&mut call, second_ok).await;

    // Give the detached cleanup task a chance to run.
    tokio::task::yield_now().await;
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    assert!(call.transactions[&id].to_tags.contains("tag-leg-2"));
    let acks = harness.transport.requests_with_method(Method::Ack).await;
    let byes = harness.transport.requests_with_method(Method::Bye).await;
    assert_eq!(acks.len(), 1, "secondary leg should be ack'd");
    assert_eq!(byes.len(), 1, "secondary leg should be immediately byed to tear it down");
}

#[tokio::test]
async fn fork_invariants_hold_across_the_parallel_scenario() {
    let harness = Harness::new();
    let mut call = make_call(&harness, "call-6");
    let uas = UasHandle("uas-6".to_string());
    let request = invite_request("call-6", "sip:bob@example.com");

    let group = vec![uri("sip:a@example.com"), uri("sip:b@example.com")];
    let uriset: VecDeque<Vec<Uri>> = VecDeque::from(vec![group]);
    let fork_id = controller::start(&mut call, uas, Method::Invite, ProxyOptions::default(), request.clone(), uriset).await;

    call.forks[&fork_id].check_invariants();

    let a = call.forks[&fork_id].uacs[0];
    let not_found = response_for(&request, StatusCode::NotFound);
    controller::response(&mut call, fork_id, a, not_found).await;
    call.forks[&fork_id].check_invariants();

    let b = call.forks[&fork_id].uacs[1];
    let busy = response_for(&request, StatusCode::BusyHere);
    controller::response(&mut call, fork_id, b, busy).await;

    assert!(!call.forks.contains_key(&fork_id));
    assert_eq!(harness.uas_bridge.count().await, 1);
    // 486 (Busy Here) ranks below 404 (Not Found): 4860 vs 4040, so 404 wins.
    assert_eq!(harness.uas_bridge.last().await.unwrap().status.as_u16(), 404);
}

#[tokio::test]
async fn bye_is_not_used_to_derive_dialog_state_in_this_test_helper_smoke() {
    // Sanity check on the shared `bye_request` helper used by secondary
    // response tests elsewhere in the pack; guards against bit-rot if the
    // builder signature changes.
    let req = bye_request("call-7", "sip:bob@example.com");
    assert_eq!(req.method, Method::Bye);
}
