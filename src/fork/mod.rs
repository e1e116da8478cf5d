//! Fork Controller.
//!
//! A `Fork` is bound to the upstream UAS transaction it is proxying for: its
//! id *is* that UAS transaction's id, which is how a `Call` answers "which
//! fork does this response belong to" without a separate lookup table.

pub mod controller;
pub mod best_response;

use std::collections::{HashSet, VecDeque};
use std::str::FromStr;
use std::time::Instant;

use rvoip_sip_core::prelude::*;
use rvoip_sip_core::types::address::Address;
use rvoip_sip_core::types::route::{Route, RouteEntry};

use crate::collaborators::UasHandle;
use crate::transaction::{ProxyOptions, TransactionId};

/// A fork is keyed by the same id space as transactions: it equals the
/// upstream UAS transaction id it answers to.
pub type ForkId = TransactionId;

/// Latch recording that a final upstream reply has been committed for this
/// fork. Once non-`None`, no later response may be
/// forwarded upstream for this fork.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalLatch {
    None,
    TwoXx,
    SixXx,
}

impl FinalLatch {
    pub fn is_latched(self) -> bool {
        !matches!(self, FinalLatch::None)
    }
}

/// One non-2xx final response accumulated toward best-response selection
///. Arrival order is kept because ties are broken by it.
#[derive(Debug, Clone)]
pub struct RankedResponse {
    pub response: Response,
    pub arrival_order: u64,
}

/// Fork state. All fields are `pub(crate)`: only
/// `fork::controller` and `call::Call` mutate a fork, matching the
/// single-owner model the rest of the `Call` actor follows.
pub struct Fork {
    pub id: ForkId,
    /// The upstream UAS transaction this fork answers to. The id space
    /// itself is this crate's own `TransactionId`; `uas` is the opaque
    /// handle the `UasReplyBridge` collaborator needs to actually deliver
    /// the eventual reply.
    pub uas: UasHandle,
    pub method: Method,
    pub options: ProxyOptions,
    pub request: Request,
    /// Remaining serial groups, each a parallel group of destination URIs.
    pub uriset: VecDeque<Vec<Uri>>,
    /// Every UAC ever spawned for this fork.
    pub uacs: Vec<TransactionId>,
    /// UACs whose final response is still outstanding.
    pub pending: HashSet<TransactionId>,
    /// Non-2xx final responses collected for best-response selection.
    pub responses: Vec<RankedResponse>,
    pub final_status: FinalLatch,
    pub started_at: Instant,
    next_arrival: u64,
}

impl Fork {
    pub fn new(id: ForkId, uas: UasHandle, method: Method, options: ProxyOptions, request: Request, uriset: VecDeque<Vec<Uri>>) -> Self {
        Self {
            id,
            uas,
            method,
            options,
            request,
            uriset,
            uacs: Vec::new(),
            pending: HashSet::new(),
            responses: Vec::new(),
            final_status: FinalLatch::None,
            started_at: Instant::now(),
            next_arrival: 0,
        }
    }

    /// Record a non-2xx final response, stamping it with arrival order for
    /// best-response tie-breaking.
    pub fn push_response(&mut self, response: Response) {
        let arrival_order = self.next_arrival;
        self.next_arrival += 1;
        self.responses.push(RankedResponse { response, arrival_order });
    }

    /// Invariant check, compiled only in debug builds.
    #[cfg(debug_assertions)]
    pub fn check_invariants(&self) {
        debug_assert!(
            self.pending.iter().all(|id| self.uacs.contains(id)),
            "fork {:?}: pending must be a subset of uacs",
            self.id
        );
        debug_assert!(
            self.responses.len() <= self.uacs.len(),
            "fork {:?}: cannot collect more responses than uacs spawned",
            self.id
        );
        if self.final_status.is_latched() {
            debug_assert!(
                self.pending.is_empty() || self.method == Method::Invite,
                "fork {:?}: final latch set while non-INVITE branches still pending",
                self.id
            );
        }
    }

    /// `true` once this fork has no more work: nothing pending and nothing
    /// left to launch.
    pub fn is_exhausted(&self) -> bool {
        self.pending.is_empty() && self.uriset.is_empty()
    }
}

/// If `uri` carries a `Route` URI-header, URL-decode and
/// parse it into a `Route` entry list. A malformed entry is skipped rather
/// than failing the whole branch; a URI with no `Route` component returns
/// `None` and the caller leaves the request's own headers untouched.
pub(crate) fn route_header_for(uri: &Uri) -> Option<Vec<Route>> {
    let raw = uri.headers.get("Route")?;
    let decoded = percent_decode(raw);

    let entries: Vec<RouteEntry> = decoded
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|target| {
            let inner = target.trim_start_matches('<').trim_end_matches('>');
            Uri::from_str(inner).ok().map(|u| RouteEntry(Address::new(u)))
        })
        .collect();

    if entries.is_empty() {
        None
    } else {
        Some(vec![Route(entries)])
    }
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(hex) = std::str::from_utf8(&bytes[i + 1..i + 3]) {
                if let Ok(byte) = u8::from_str_radix(hex, 16) {
                    out.push(byte);
                    i += 3;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
