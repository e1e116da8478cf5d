//! UAC transaction machinery.
//!
//! `uac` holds the state machine and send/receive entry points;
//! `secondary` holds the detached ACK+BYE cleanup for late/duplicate
//! dialog-forming responses; `state` holds the sum types both build on.

pub mod state;
pub mod uac;
pub mod secondary;

pub use state::{CancelState, Origin, UacState};
pub use uac::UacTransaction;

use std::fmt;

/// Unique, Call-scoped transaction identifier, minted from `Call::next_id`.
/// Never reused within a `Call`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx{}", self.0)
    }
}

/// The full per-request options vocabulary collapsed into one typed struct,
/// so call sites build it once instead of re-deriving a dynamic option list
/// everywhere it's consulted.
#[derive(Debug, Clone, Default)]
pub struct ProxyOptions {
    pub stateless: bool,
    pub record_route: bool,
    pub follow_redirects: bool,
    pub make_path: bool,
    pub remove_routes: bool,
    pub remove_headers: bool,
    pub headers: Vec<rvoip_sip_core::prelude::TypedHeader>,
    pub routes: Vec<rvoip_sip_core::prelude::Uri>,
    pub flow: Option<crate::collaborators::ConnectionHandle>,
    pub no_dialog: bool,
    pub update_dialog: bool,
    pub r#async: bool,
    pub make_contact: bool,
}

impl ProxyOptions {
    /// Strip `make_contact`.
    pub fn without_make_contact(&self) -> Self {
        let mut o = self.clone();
        o.make_contact = false;
        o
    }
}
