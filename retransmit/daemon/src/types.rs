//! Userspace type definitions
//!
//! Defines the decoded retransmission event handed to sinks.
//!
//! ## Organization
//!
//! - **Kernel Types**: record layouts shared with the probe (from retransmit_common)
//! - **Userspace Types**: the decoded [`RetransmitEvent`] and its parts

use serde::Serialize;
use std::fmt;

// ============================================================================
// Kernel Types (from the probe object)
// ============================================================================

pub mod kernel {
    //! Types shared between the kernel probe and userspace
    //!
    //! These are re-exported from the retransmit-common crate and must
    //! maintain binary compatibility with the probe object.

    pub use retransmit_common::constants;
    pub use retransmit_common::types::{
        ConnStateRecord, ConnStateVerboseRecord, CounterRecordExt, CounterRecordV1,
    };
}

// ============================================================================
// Userspace Types
// ============================================================================

/// Address family of a decoded event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
    Unknown,
}

impl AddressFamily {
    /// Map the producer's socket family code.
    ///
    /// The codes are Linux AF_INET / AF_INET6; anything else is `Unknown`.
    pub fn from_code(code: u16) -> Self {
        match code {
            kernel::constants::AF_INET => Self::Ipv4,
            kernel::constants::AF_INET6 => Self::Ipv6,
            _ => Self::Unknown,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ipv4 => "ipv4",
            Self::Ipv6 => "ipv6",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed binary layout a record was decoded from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaVariant {
    /// IPv4 counters only
    CounterV1,
    /// Counters with timestamp, PID and dual-stack addresses
    CounterExtended,
    /// Connection state with dual-stack addresses
    ConnectionState,
    /// Connection state with socket identifiers
    ConnectionStateVerbose,
}

impl SchemaVariant {
    /// All known variants, smallest first
    pub const ALL: [SchemaVariant; 4] = [
        SchemaVariant::CounterV1,
        SchemaVariant::ConnectionState,
        SchemaVariant::CounterExtended,
        SchemaVariant::ConnectionStateVerbose,
    ];

    /// Payload size in bytes, as the producer lays it out
    pub const fn payload_len(self) -> usize {
        match self {
            Self::CounterV1 => retransmit_common::COUNTER_V1_LEN,
            Self::CounterExtended => retransmit_common::COUNTER_EXT_LEN,
            Self::ConnectionState => retransmit_common::CONN_STATE_LEN,
            Self::ConnectionStateVerbose => retransmit_common::CONN_STATE_VERBOSE_LEN,
        }
    }

    /// Which field family this variant populates
    pub const fn family(self) -> SchemaFamily {
        match self {
            Self::CounterV1 | Self::CounterExtended => SchemaFamily::Counter,
            Self::ConnectionState | Self::ConnectionStateVerbose => SchemaFamily::ConnectionState,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CounterV1 => "counter_v1",
            Self::CounterExtended => "counter_extended",
            Self::ConnectionState => "connection_state",
            Self::ConnectionStateVerbose => "connection_state_verbose",
        }
    }
}

impl fmt::Display for SchemaVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two mutually exclusive field families
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaFamily {
    Counter,
    ConnectionState,
}

/// One side of the connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    /// Formatted address, empty when the family is unknown
    pub ip: String,
    pub port: u16,
}

/// Socket counters captured by the counter schemas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TcpCounters {
    pub retransmits: u32,
    pub rto_us: u32,
    pub rtt_us: u32,
    pub snd_cwnd: u32,
    pub ssthresh: u32,
}

/// Kernel identifiers of the retransmitted skb and its socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SocketIds {
    pub skb_addr: u64,
    pub sk_addr: u64,
}

/// Connection details captured by the connection-state schemas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConnectionDetails {
    pub state: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket: Option<SocketIds>,
}

/// Schema-family specific payload of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum EventDetails {
    Counters(TcpCounters),
    Connection(ConnectionDetails),
}

/// A decoded TCP retransmission
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetransmitEvent {
    pub schema: SchemaVariant,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_ns: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub family: AddressFamily,
    pub source: Endpoint,
    pub destination: Endpoint,
    #[serde(flatten)]
    pub details: EventDetails,
}

impl RetransmitEvent {
    /// Counter fields, present only for counter schemas
    pub fn counters(&self) -> Option<&TcpCounters> {
        match &self.details {
            EventDetails::Counters(counters) => Some(counters),
            EventDetails::Connection(_) => None,
        }
    }

    /// Connection state, present only for connection-state schemas
    pub fn connection_state(&self) -> Option<i32> {
        match &self.details {
            EventDetails::Connection(conn) => Some(conn.state),
            EventDetails::Counters(_) => None,
        }
    }

    /// Socket identifiers, present only for the verbose schema
    pub fn socket(&self) -> Option<SocketIds> {
        match &self.details {
            EventDetails::Connection(conn) => conn.socket,
            EventDetails::Counters(_) => None,
        }
    }

    pub fn retransmit_count(&self) -> Option<u32> {
        self.counters().map(|c| c.retransmits)
    }

    pub fn retransmission_timeout_us(&self) -> Option<u32> {
        self.counters().map(|c| c.rto_us)
    }

    pub fn round_trip_time_us(&self) -> Option<u32> {
        self.counters().map(|c| c.rtt_us)
    }

    pub fn congestion_window(&self) -> Option<u32> {
        self.counters().map(|c| c.snd_cwnd)
    }

    pub fn slow_start_threshold(&self) -> Option<u32> {
        self.counters().map(|c| c.ssthresh)
    }
}

/// Counters of one consumer session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// Records decoded and delivered to the sink
    pub processed: u64,
    /// Records that failed to decode
    pub dropped: u64,
}

impl SessionStats {
    /// Records pulled off the buffer
    pub fn received(&self) -> u64 {
        self.processed + self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter_event() -> RetransmitEvent {
        RetransmitEvent {
            schema: SchemaVariant::CounterV1,
            timestamp_ns: None,
            pid: None,
            family: AddressFamily::Ipv4,
            source: Endpoint {
                ip: "10.0.0.1".to_string(),
                port: 4000,
            },
            destination: Endpoint {
                ip: "10.0.0.2".to_string(),
                port: 80,
            },
            details: EventDetails::Counters(TcpCounters {
                retransmits: 3,
                rto_us: 200_000,
                rtt_us: 1_500,
                snd_cwnd: 10,
                ssthresh: 7,
            }),
        }
    }

    #[test]
    fn test_family_codes() {
        assert_eq!(AddressFamily::from_code(2), AddressFamily::Ipv4);
        assert_eq!(AddressFamily::from_code(10), AddressFamily::Ipv6);
        assert_eq!(AddressFamily::from_code(0), AddressFamily::Unknown);
        assert_eq!(AddressFamily::from_code(1), AddressFamily::Unknown);
    }

    #[test]
    fn test_schema_sizes_are_distinct() {
        let mut sizes: Vec<usize> = SchemaVariant::ALL.iter().map(|v| v.payload_len()).collect();
        let sorted = sizes.clone();
        sizes.dedup();
        assert_eq!(sizes, sorted);
        assert!(sorted.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_counter_accessors() {
        let event = counter_event();
        assert_eq!(event.retransmit_count(), Some(3));
        assert_eq!(event.slow_start_threshold(), Some(7));
        assert_eq!(event.connection_state(), None);
        assert_eq!(event.socket(), None);
    }

    #[test]
    fn test_serialize_omits_absent_fields() {
        let value = serde_json::to_value(counter_event()).unwrap();

        assert_eq!(value["schema"], "counter_v1");
        assert_eq!(value["family"], "ipv4");
        assert_eq!(value["source"]["ip"], "10.0.0.1");
        assert_eq!(value["retransmits"], 3);
        assert!(value.get("pid").is_none());
        assert!(value.get("timestamp_ns").is_none());
        assert!(value.get("state").is_none());
    }

    #[test]
    fn test_session_stats_received() {
        let stats = SessionStats {
            processed: 5,
            dropped: 2,
        };
        assert_eq!(stats.received(), 7);
    }
}
