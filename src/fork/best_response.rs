//! Best-response selection.
//!
//! Ranks every accumulated non-2xx final response and picks the winner by
//! `(rank, arrival_order)`, then — if the winner is an authentication
//! challenge — merges every `WWW-Authenticate`/`Proxy-Authenticate` header
//! across the whole set into it.

use rvoip_sip_core::prelude::*;

use super::RankedResponse;

const RANK_AUTH_CHALLENGE: u32 = 3999;
const RANK_BAD_EXTENSION_CLASS: u32 = 4000;
const RANK_SERVICE_UNAVAILABLE: u32 = 5000;

fn rank(code: u16) -> u32 {
    match code {
        401 | 407 => RANK_AUTH_CHALLENGE,
        415 | 420 | 484 => RANK_BAD_EXTENSION_CLASS,
        503 => RANK_SERVICE_UNAVAILABLE,
        600..=699 => code as u32,
        other => 10 * other as u32,
    }
}

/// Select the best response from `responses` per the rank order above.
/// Never fails: an empty set synthesizes `480 Temporarily Unavailable`.
pub fn select(responses: &[RankedResponse]) -> Response {
    let Some(winner) = responses
        .iter()
        .min_by_key(|r| (rank(r.response.status.as_u16()), r.arrival_order))
    else {
        return synthesize_480(responses);
    };

    let mut chosen = winner.response.clone();

    if rank(chosen.status.as_u16()) == RANK_AUTH_CHALLENGE {
        merge_auth_challenges(&mut chosen, responses);
    } else if chosen.status.as_u16() == 503 {
        chosen.status = StatusCode::ServerInternalError;
    }

    chosen
}

fn synthesize_480(_responses: &[RankedResponse]) -> Response {
    ResponseBuilder::new(StatusCode::TemporarilyUnavailable, None).build()
}

/// Remove any pre-existing `WWW-Authenticate`/`Proxy-Authenticate` on the
/// winner, then append every such header from every 401/407 response in the
/// set.
fn merge_auth_challenges(chosen: &mut Response, responses: &[RankedResponse]) {
    chosen.headers.retain(|h| {
        !matches!(h, TypedHeader::WwwAuthenticate(_) | TypedHeader::ProxyAuthenticate(_))
    });

    for r in responses {
        let code = r.response.status.as_u16();
        if code != 401 && code != 407 {
            continue;
        }
        for h in &r.response.headers {
            if matches!(h, TypedHeader::WwwAuthenticate(_) | TypedHeader::ProxyAuthenticate(_)) {
                chosen.headers.push(h.clone());
            }
        }
    }
}
