//! Shared constants for the retransmit probe
//!
//! These values are defined by the producing environment (Linux headers and
//! the probe object) and are not meant to be recomputed on the consumer side.

// ============================================================================
// Address Families (from linux/socket.h)
// ============================================================================

/// IPv4 address family
pub const AF_INET: u16 = 2;

/// IPv6 address family
pub const AF_INET6: u16 = 10;

// ============================================================================
// Probe Object Defaults
// ============================================================================

/// Tracepoint category the probe attaches to
pub const TRACEPOINT_CATEGORY: &str = "tcp";

/// Tracepoint name the probe attaches to
pub const TRACEPOINT_NAME: &str = "tcp_retransmit_skb";

/// Default program section name inside the probe object
pub const DEFAULT_PROGRAM_NAME: &str = "tcp_retransmit_skb";

/// Default name of the map records are published on
pub const DEFAULT_MAP_NAME: &str = "tcp_retransmit_events";

// ============================================================================
// TCP States (from include/net/tcp_states.h)
// ============================================================================

pub const TCP_ESTABLISHED: i32 = 1;
pub const TCP_SYN_SENT: i32 = 2;
pub const TCP_SYN_RECV: i32 = 3;
pub const TCP_FIN_WAIT1: i32 = 4;
pub const TCP_FIN_WAIT2: i32 = 5;
pub const TCP_TIME_WAIT: i32 = 6;
pub const TCP_CLOSE: i32 = 7;
pub const TCP_CLOSE_WAIT: i32 = 8;
pub const TCP_LAST_ACK: i32 = 9;
pub const TCP_LISTEN: i32 = 10;
pub const TCP_CLOSING: i32 = 11;
pub const TCP_NEW_SYN_RECV: i32 = 12;

/// Kernel name for a TCP state, if `state` is one of the known values
pub const fn tcp_state_name(state: i32) -> Option<&'static str> {
    match state {
        TCP_ESTABLISHED => Some("ESTABLISHED"),
        TCP_SYN_SENT => Some("SYN_SENT"),
        TCP_SYN_RECV => Some("SYN_RECV"),
        TCP_FIN_WAIT1 => Some("FIN_WAIT1"),
        TCP_FIN_WAIT2 => Some("FIN_WAIT2"),
        TCP_TIME_WAIT => Some("TIME_WAIT"),
        TCP_CLOSE => Some("CLOSE"),
        TCP_CLOSE_WAIT => Some("CLOSE_WAIT"),
        TCP_LAST_ACK => Some("LAST_ACK"),
        TCP_LISTEN => Some("LISTEN"),
        TCP_CLOSING => Some("CLOSING"),
        TCP_NEW_SYN_RECV => Some("NEW_SYN_RECV"),
        _ => None,
    }
}
