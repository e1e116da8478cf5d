//! UAC transaction state machine.
//!
//! Modeled as an explicit sum type with a dispatch table indexed by
//! `(status, response_class)`: keeps RFC 3261 §17's state shape without
//! reproducing its nested case-chain prose.

use std::fmt;

/// The nine reachable UAC states. `Finished` and `Ack` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UacState {
    InviteCalling,
    InviteProceeding,
    InviteAccepted,
    InviteCompleted,
    Trying,
    Proceeding,
    Completed,
    Finished,
    Ack,
}

impl UacState {
    /// Initial state for a freshly allocated transaction, keyed off method:
    /// `ACK` starts (and stays) in `Ack`, `INVITE` starts in
    /// `InviteCalling`, everything else starts in `Trying`.
    pub fn initial(method: &rvoip_sip_core::prelude::Method) -> Self {
        use rvoip_sip_core::prelude::Method;
        match method {
            Method::Ack => UacState::Ack,
            Method::Invite => UacState::InviteCalling,
            _ => UacState::Trying,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, UacState::Finished | UacState::Ack)
    }
}

impl fmt::Display for UacState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Deferred-cancel tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelState {
    None,
    ToCancel,
    Cancelled,
}

/// Who should receive this transaction's eventual disposition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Origin {
    /// Nobody is waiting synchronously (detached CANCEL / secondary
    /// ACK+BYE tasks use this).
    None,
    /// The upstream UAS transaction that will receive this response via the
    /// `UasReplyBridge` collaborator.
    UserCallback(crate::collaborators::UasHandle),
    /// A `Fork` spawned this branch; responses feed `fork::controller::response`.
    Fork(crate::fork::ForkId),
}
