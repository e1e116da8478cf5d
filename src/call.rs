//! Call Container.
//!
//! `Call` is the single in-memory aggregate for one Call-ID. It is the only
//! thing that owns `UacTransaction`s and `Fork`s, and it is mutated from
//! exactly one task: `Call::run` drains a single `mpsc::Receiver<CallEvent>`
//! fed by inbound messages, timer fires, and user cancellations, and every
//! other module in this crate expresses its work as `&mut Call` operations
//! called from that loop. No module outside `call` ever holds a `Call`
//! behind a lock.

use std::collections::HashMap;

use rvoip_sip_core::prelude::*;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::collaborators::{Collaborators, UasHandle};
use crate::config::ProxyConfig;
use crate::fork::{Fork, ForkId};
use crate::timer::TimerKind;
use crate::transaction::{Origin, ProxyOptions, TransactionId, UacTransaction};
use crate::uriset::UriSetInput;

/// `(message-id, transaction-id, dialog-id)`. Append-only;
/// used for asynchronous lookups keyed by message id rather than
/// transaction key (e.g. matching a secondary-task outcome back to its
/// originating response).
#[derive(Debug, Clone)]
pub struct MessageIndexEntry {
    pub message_id: String,
    pub transaction_id: TransactionId,
    pub dialog_id: Option<String>,
}

/// Every externally-driven thing that can happen to a `Call`. `Call::run` is nothing more than a loop matching on this enum.
pub enum CallEvent {
    /// A downstream response arrived over the wire.
    Response(Response),
    /// A timer armed against `(transaction_id, kind)` fired.
    Timer { transaction_id: TransactionId, kind: TimerKind },
    /// The user/API layer wants to proxy a fresh request statefully.
    ProxyRoute { uas: UasHandle, uriset: UriSetInput, options: ProxyOptions, request: Request },
    /// The user/API layer cancels an in-flight UAC transaction.
    CancelUac(TransactionId),
    /// The user/API layer cancels an entire fork.
    CancelFork(ForkId),
}

/// The in-memory aggregate for one Call-ID. Construction is
/// cheap; the expensive part is everything `run` drives through it.
pub struct Call {
    pub app_id: String,
    pub call_id: String,
    pub config: std::sync::Arc<ProxyConfig>,
    pub collabs: Collaborators,
    pub transactions: HashMap<TransactionId, UacTransaction>,
    pub forks: HashMap<ForkId, Fork>,
    pub message_index: Vec<MessageIndexEntry>,
    next_id: u64,
    /// Set when the Call has gone quiescent and could be evicted from
    /// whatever process-wide Call table owns it; this crate only maintains the flag, eviction policy is the
    /// caller's.
    pub hibernate_hint: bool,
    events: mpsc::Receiver<CallEvent>,
    pub event_tx: mpsc::Sender<CallEvent>,
}

impl Call {
    pub fn new(app_id: impl Into<String>, call_id: impl Into<String>, config: std::sync::Arc<ProxyConfig>, collabs: Collaborators) -> Self {
        let (event_tx, events) = mpsc::channel(256);
        Self {
            app_id: app_id.into(),
            call_id: call_id.into(),
            config,
            collabs,
            transactions: HashMap::new(),
            forks: HashMap::new(),
            message_index: Vec::new(),
            next_id: 0,
            hibernate_hint: false,
            events,
            event_tx,
        }
    }

    /// Mint a fresh `TransactionId`, unique within this `Call` for its
    /// entire lifetime.
    pub fn mint_id(&mut self) -> TransactionId {
        let id = TransactionId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn record_message(&mut self, message_id: impl Into<String>, transaction_id: TransactionId, dialog_id: Option<String>) {
        self.message_index.push(MessageIndexEntry {
            message_id: message_id.into(),
            transaction_id,
            dialog_id,
        });
    }

    /// Deliver a disposition to wherever `origin` says it should go.
    /// `Origin::Fork` re-enters
    /// fork aggregation rather than delivering directly, since a forked
    /// branch's response is not itself the upstream reply until the fork
    /// says so.
    pub async fn deliver_to_origin(&mut self, origin: &Origin, uac_id: TransactionId, response: Response) {
        match origin {
            Origin::None => {
                debug!(call_id = %self.call_id, tx_id = %uac_id, "response has no origin to deliver to");
            }
            Origin::UserCallback(uas) => {
                self.collabs.uas_bridge.deliver(uas, response).await;
            }
            Origin::Fork(fork_id) => {
                crate::fork::controller::response(self, *fork_id, uac_id, response).await;
            }
        }
    }

    /// Debug-only cross-structure invariant sweep.
    #[cfg(debug_assertions)]
    pub fn check_invariants(&self) {
        for fork in self.forks.values() {
            fork.check_invariants();
            for id in &fork.pending {
                debug_assert!(self.transactions.contains_key(id), "fork {:?} pending references unknown tx {:?}", fork.id, id);
            }
        }
    }

    /// Drain events until the channel closes. Every branch here is the only
    /// place in the crate allowed to hold `&mut self` across an `.await` on
    /// collaborator work, which is what makes the single-owner model real
    /// rather than aspirational.
    pub async fn run(&mut self) {
        while let Some(event) = self.events.recv().await {
            match event {
                CallEvent::Response(resp) => {
                    crate::transaction::uac::response(self, resp).await;
                }
                CallEvent::Timer { transaction_id, kind } => {
                    crate::transaction::uac::timer_fired(self, transaction_id, kind).await;
                }
                CallEvent::ProxyRoute { uas, uriset, options, request } => {
                    crate::router::route(self, uas, uriset, options, request).await;
                }
                CallEvent::CancelUac(id) => {
                    crate::transaction::uac::cancel(self, id).await;
                }
                CallEvent::CancelFork(fork_id) => {
                    crate::fork::controller::cancel(self, fork_id).await;
                }
            }
            #[cfg(debug_assertions)]
            self.check_invariants();

            self.hibernate_hint = self.transactions.is_empty() && self.forks.is_empty();
        }
        warn!(call_id = %self.call_id, "call event channel closed, run loop exiting");
    }
}
