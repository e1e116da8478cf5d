//! Timer Service.
//!
//! Schedules named one-shot timers against a `(transaction id, timer kind)`
//! key and, on fire, runs a caller-supplied future that posts the event back
//! onto the owning `Call`'s single event stream. One handle bag lives per
//! transaction; each slot fires a closure that the single-threaded `Call`
//! actor supplies, rather than routing through a dedicated per-transaction
//! command channel.

use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Named timers, matching RFC 3261's conventional letters. `Expire` fires when a request's
/// `Expires` header lapses before a final response arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    A,
    B,
    C,
    D,
    E,
    F,
    K,
    M,
    Expire,
}

impl fmt::Display for TimerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TimerKind::A => "A",
            TimerKind::B => "B",
            TimerKind::C => "C",
            TimerKind::D => "D",
            TimerKind::E => "E",
            TimerKind::F => "F",
            TimerKind::K => "K",
            TimerKind::M => "M",
            TimerKind::Expire => "expire",
        };
        write!(f, "{}", s)
    }
}

/// Live timer handles for one `UacTransaction`. Every slot is independently
/// cancellable; cancelling a slot that isn't armed is a no-op.
#[derive(Default)]
pub struct TimerHandles {
    a: Option<JoinHandle<()>>,
    b: Option<JoinHandle<()>>,
    c: Option<JoinHandle<()>>,
    d: Option<JoinHandle<()>>,
    e: Option<JoinHandle<()>>,
    f: Option<JoinHandle<()>>,
    k: Option<JoinHandle<()>>,
    m: Option<JoinHandle<()>>,
    expire: Option<JoinHandle<()>>,
}

impl TimerHandles {
    fn slot(&mut self, kind: TimerKind) -> &mut Option<JoinHandle<()>> {
        match kind {
            TimerKind::A => &mut self.a,
            TimerKind::B => &mut self.b,
            TimerKind::C => &mut self.c,
            TimerKind::D => &mut self.d,
            TimerKind::E => &mut self.e,
            TimerKind::F => &mut self.f,
            TimerKind::K => &mut self.k,
            TimerKind::M => &mut self.m,
            TimerKind::Expire => &mut self.expire,
        }
    }

    /// Arm `kind` to fire after `delay`, replacing any prior armed timer of
    /// the same kind (used for retransmission timers, which re-arm
    /// themselves with a doubled interval on every fire). `fire` is invoked
    /// after the sleep completes; it is the caller's job to post whatever it
    /// produces back onto the owning `Call`'s single event stream -- this
    /// type has no notion of `Call` or transaction internals, only of named
    /// delays and closures.
    pub fn arm<Fut>(&mut self, kind: TimerKind, delay: Duration, fire: impl FnOnce() -> Fut + Send + 'static)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.cancel(kind);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire().await;
        });
        *self.slot(kind) = Some(handle);
    }

    /// Cancel `kind` if armed. Idempotent.
    pub fn cancel(&mut self, kind: TimerKind) {
        if let Some(handle) = self.slot(kind).take() {
            handle.abort();
        }
    }

    /// Cancel every armed timer. Called on every state transition
    /// and on transaction termination.
    pub fn cancel_all(&mut self) {
        for kind in [
            TimerKind::A,
            TimerKind::B,
            TimerKind::C,
            TimerKind::D,
            TimerKind::E,
            TimerKind::F,
            TimerKind::K,
            TimerKind::M,
            TimerKind::Expire,
        ] {
            self.cancel(kind);
        }
    }
}

impl Drop for TimerHandles {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
