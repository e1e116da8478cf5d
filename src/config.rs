//! Runtime configuration for the forking proxy core.
//!
//! `TimerSettings` mirrors the RFC 3261 Appendix A base timers; the derived
//! per-timer durations (`timer_b`, `timer_f`, ...) are computed from them so
//! a deployment can retune T1 without hand-updating every dependent timer.

use std::time::Duration;

/// Base SIP timers (RFC 3261 Appendix A) plus the derived timeouts that key
/// off them. Multipliers match the RFC defaults; only `t1`/`t2`/`t4` are
/// meant to be overridden in practice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerSettings {
    /// RTT estimate. Default 500ms.
    pub t1: Duration,
    /// Maximum retransmit interval for non-INVITE requests and INVITE
    /// responses. Default 4s.
    pub t2: Duration,
    /// Maximum duration a message can remain in the network. Default 5s.
    pub t4: Duration,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            t1: Duration::from_millis(500),
            t2: Duration::from_secs(4),
            t4: Duration::from_secs(5),
        }
    }
}

impl TimerSettings {
    /// Timer B: INVITE transaction timeout. 64*T1.
    pub fn timer_b(&self) -> Duration {
        self.t1 * 64
    }

    /// Timer C: long-running provisional timeout. Not an RFC 3261 base
    /// timer -- this is the proxy-layer safety net from RFC 3261 §16.6/
    /// RFC 6026, conventionally well above Timer B so ringing calls aren't
    /// cut off; 3 minutes, refreshed on every 1xx.
    pub fn timer_c(&self) -> Duration {
        Duration::from_secs(180)
    }

    /// Timer D: wait time for response retransmissions in `InviteCompleted`
    /// over unreliable transport. RFC 3261 mandates >= 32s; we use T1*64
    /// clamped to a 32s floor to stay RFC-compliant even if T1 is tuned down.
    pub fn timer_d(&self) -> Duration {
        std::cmp::max(self.t1 * 64, Duration::from_secs(32))
    }

    /// Timer F: non-INVITE transaction timeout. 64*T1.
    pub fn timer_f(&self) -> Duration {
        self.t1 * 64
    }

    /// Timer K: wait time in `Completed` over unreliable transport. T4.
    pub fn timer_k(&self) -> Duration {
        self.t4
    }

    /// Timer A: initial INVITE retransmit interval. T1.
    pub fn timer_a_initial(&self) -> Duration {
        self.t1
    }

    /// Timer E: initial non-INVITE retransmit interval. T1.
    pub fn timer_e_initial(&self) -> Duration {
        self.t1
    }

    /// Timer M: linger time absorbing forked/duplicate 2xx in
    /// `InviteAccepted`. Same budget as Timer D.
    pub fn timer_m(&self) -> Duration {
        self.timer_d()
    }
}

/// Runtime configuration for the engine. Constructed once per application
/// and shared (via `Arc`) across every `Call`.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub timers: TimerSettings,
    /// Hard per-transaction ceiling: any in-flight
    /// response arriving after this elapses is replaced with a synthetic
    /// 408.
    pub max_trans_time: Duration,
    /// Maximum authentication retry chain length.
    pub max_auth_iterations: u8,
    /// Default transport family assumed when a URI's scheme does not
    /// disambiguate it (affects which retransmission timers are armed).
    pub default_proto: TransportProto,
    /// SIP extension tokens (RFC 3261 §19.2, e.g. `"100rel"`, `"path"`) this
    /// application understands. Anything in an inbound `Proxy-Require` that
    /// isn't listed here fails the router's extension check.
    pub supported_extensions: std::collections::HashSet<String>,
    /// Methods advertised in the `Allow` header of the capability response
    /// the router sends for an `OPTIONS` request at a zero hop count.
    pub allowed_methods: Vec<rvoip_sip_core::prelude::Method>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        use rvoip_sip_core::prelude::Method;
        Self {
            timers: TimerSettings::default(),
            max_trans_time: Duration::from_secs(32),
            max_auth_iterations: 5,
            default_proto: TransportProto::Udp,
            supported_extensions: std::collections::HashSet::new(),
            allowed_methods: vec![
                Method::Invite,
                Method::Ack,
                Method::Bye,
                Method::Cancel,
                Method::Options,
                Method::Register,
            ],
        }
    }
}

/// Transport family, distinguishing "needs retransmission timers"
/// (unreliable) from "transport-level reliability already covers
/// retransmission" (reliable). Deliberately coarser than
/// `rvoip_sip_transport`'s concrete transport enum -- the state machine
/// only ever needs this one bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportProto {
    Udp,
    Reliable,
}

impl TransportProto {
    pub fn is_reliable(self) -> bool {
        matches!(self, TransportProto::Reliable)
    }
}
