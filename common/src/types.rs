//! Record layouts emitted by the tcp_retransmit_skb probe
//!
//! These structures must be repr(C) so that the producer's compiler and
//! userspace agree on field offsets and trailing padding. All multi-byte
//! fields are little-endian on the wire; address bytes are in network order.
//!
//! Each layout is identified by its exact size alone, so no two layouts may
//! share a size (checked at compile time below).

/// Oldest counter-oriented record: IPv4 only, no family, no timestamp.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct CounterRecordV1 {
    /// Source port (host byte order)
    pub sport: u16,
    /// Destination port (host byte order)
    pub dport: u16,
    /// Source IPv4 address
    pub saddr: [u8; 4],
    /// Destination IPv4 address
    pub daddr: [u8; 4],
    /// Total retransmits on the socket
    pub retrans: u32,
    /// Retransmission timeout (microseconds)
    pub rto: u32,
    /// Smoothed round-trip time (microseconds)
    pub rtt: u32,
    /// Congestion window (segments)
    pub snd_cwnd: u32,
    /// Slow start threshold (segments)
    pub ssthresh: u32,
}

/// Counter record extended with timestamp, PID and a dual-stack address slot.
///
/// IPv4 addresses occupy the first four bytes of `saddr` / `daddr`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct CounterRecordExt {
    pub sport: u16,
    pub dport: u16,
    pub saddr: [u8; 16],
    pub daddr: [u8; 16],
    pub retrans: u32,
    pub rto: u32,
    pub rtt: u32,
    pub snd_cwnd: u32,
    pub ssthresh: u32,
    /// bpf_ktime_get_ns() at capture
    pub timestamp_ns: u64,
    /// Thread group id of the current task
    pub pid: u32,
    /// AF_INET or AF_INET6
    pub family: u16,
}

/// Connection-state record with dual-stack addresses.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct ConnStateRecord {
    pub timestamp_ns: u64,
    pub pid: u32,
    pub sport: u16,
    pub dport: u16,
    pub saddr: [u8; 4],
    pub daddr: [u8; 4],
    pub saddr_v6: [u8; 16],
    pub daddr_v6: [u8; 16],
    pub family: u16,
    /// Kernel TCP state (see `constants::TCP_*`)
    pub state: i32,
}

/// Connection-state record carrying the raw tracepoint socket identifiers.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct ConnStateVerboseRecord {
    pub timestamp_ns: u64,
    /// Kernel address of the retransmitted sk_buff
    pub skbaddr: u64,
    /// Kernel address of the owning sock
    pub skaddr: u64,
    pub state: i32,
    pub sport: u16,
    pub dport: u16,
    pub saddr: [u8; 4],
    pub daddr: [u8; 4],
    pub saddr_v6: [u8; 16],
    pub daddr_v6: [u8; 16],
    pub family: u16,
}

/// Size of [`CounterRecordV1`] on the wire
pub const COUNTER_V1_LEN: usize = core::mem::size_of::<CounterRecordV1>();

/// Size of [`CounterRecordExt`] on the wire
pub const COUNTER_EXT_LEN: usize = core::mem::size_of::<CounterRecordExt>();

/// Size of [`ConnStateRecord`] on the wire
pub const CONN_STATE_LEN: usize = core::mem::size_of::<ConnStateRecord>();

/// Size of [`ConnStateVerboseRecord`] on the wire
pub const CONN_STATE_VERBOSE_LEN: usize = core::mem::size_of::<ConnStateVerboseRecord>();

// Compile-time layout checks
// These will fail to compile if a layout drifts from what the producer emits
const _: () = {
    assert!(COUNTER_V1_LEN == 32);
    assert!(COUNTER_EXT_LEN == 72);
    assert!(CONN_STATE_LEN == 64);
    assert!(CONN_STATE_VERBOSE_LEN == 80);

    assert!(core::mem::offset_of!(CounterRecordExt, timestamp_ns) == 56);
    assert!(core::mem::offset_of!(CounterRecordExt, family) == 68);
    assert!(core::mem::offset_of!(ConnStateRecord, family) == 56);
    assert!(core::mem::offset_of!(ConnStateRecord, state) == 60);
    assert!(core::mem::offset_of!(ConnStateVerboseRecord, state) == 24);
    assert!(core::mem::offset_of!(ConnStateVerboseRecord, family) == 72);
};

// Implement Aya's Pod trait for userspace usage
#[cfg(feature = "userspace")]
mod userspace_impls {
    use super::*;

    unsafe impl aya::Pod for CounterRecordV1 {}
    unsafe impl aya::Pod for CounterRecordExt {}
    unsafe impl aya::Pod for ConnStateRecord {}
    unsafe impl aya::Pod for ConnStateVerboseRecord {}
}
