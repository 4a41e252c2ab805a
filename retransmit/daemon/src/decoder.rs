//! Record decoding for raw probe samples
//!
//! Turns one byte slice from the ring buffer into a [`RetransmitEvent`].
//! The layout is chosen by exact length; offsets come from the `#[repr(C)]`
//! structs in `retransmit_common`, so the producer and this decoder share one
//! definition of each layout.

use crate::{
    address::{format_address, Ipv6Style},
    types::{
        kernel::{ConnStateRecord, ConnStateVerboseRecord, CounterRecordExt, CounterRecordV1},
        AddressFamily, ConnectionDetails, Endpoint, EventDetails, RetransmitEvent,
        SchemaVariant, SocketIds, TcpCounters,
    },
};
use serde::{Deserialize, Serialize};
use std::mem::offset_of;
use thiserror::Error;

/// Errors that can occur while decoding a single record.
///
/// Both kinds are per-record: the consumer counts and drops the record.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("truncated record: {len} bytes, smallest known layout is {min} bytes")]
    TruncatedRecord { len: usize, min: usize },

    #[error("unknown schema: no known layout is {len} bytes")]
    UnknownSchema { len: usize },
}

impl DecodeError {
    /// Stable label for logs and sinks
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::TruncatedRecord { .. } => "truncated_record",
            Self::UnknownSchema { .. } => "unknown_schema",
        }
    }

    /// Length of the offending record
    pub const fn record_len(&self) -> usize {
        match self {
            Self::TruncatedRecord { len, .. } | Self::UnknownSchema { len } => *len,
        }
    }
}

/// How the transport frames each record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    /// Record length equals the payload length (BPF ring buffer)
    #[default]
    Exact,
    /// Perf raw samples: the 4-byte size header plus payload is padded to 8 bytes
    PerfPadded,
}

impl Framing {
    /// Length a payload of `payload_len` bytes arrives with
    pub const fn wire_len(self, payload_len: usize) -> usize {
        match self {
            Self::Exact => payload_len,
            Self::PerfPadded => (payload_len + 4).div_ceil(8) * 8 - 4,
        }
    }
}

/// Decoder for raw retransmit records
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordDecoder {
    framing: Framing,
    ipv6_style: Ipv6Style,
}

impl RecordDecoder {
    pub fn new(framing: Framing, ipv6_style: Ipv6Style) -> Self {
        Self {
            framing,
            ipv6_style,
        }
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Smallest record length this decoder can accept
    pub fn min_len(&self) -> usize {
        SchemaVariant::ALL
            .iter()
            .map(|v| self.framing.wire_len(v.payload_len()))
            .min()
            .unwrap_or(0)
    }

    /// Pick the layout whose wire length is exactly `len`
    pub fn variant_for_len(&self, len: usize) -> Result<SchemaVariant, DecodeError> {
        let min = self.min_len();
        if len < min {
            return Err(DecodeError::TruncatedRecord { len, min });
        }

        SchemaVariant::ALL
            .into_iter()
            .find(|v| self.framing.wire_len(v.payload_len()) == len)
            .ok_or(DecodeError::UnknownSchema { len })
    }

    /// Decode one record
    pub fn decode(&self, raw: &[u8]) -> Result<RetransmitEvent, DecodeError> {
        let variant = self.variant_for_len(raw.len())?;
        let data = &raw[..variant.payload_len()];

        let event = match variant {
            SchemaVariant::CounterV1 => self.decode_counter_v1(data),
            SchemaVariant::CounterExtended => self.decode_counter_ext(data),
            SchemaVariant::ConnectionState => self.decode_conn_state(data),
            SchemaVariant::ConnectionStateVerbose => self.decode_conn_state_verbose(data),
        };
        Ok(event)
    }

    fn decode_counter_v1(&self, data: &[u8]) -> RetransmitEvent {
        type R = CounterRecordV1;

        // This layout predates the family field and is IPv4 by construction.
        let family = AddressFamily::Ipv4;
        let saddr = read_fixed::<4>(data, offset_of!(R, saddr));
        let daddr = read_fixed::<4>(data, offset_of!(R, daddr));

        RetransmitEvent {
            schema: SchemaVariant::CounterV1,
            timestamp_ns: None,
            pid: None,
            family,
            source: Endpoint {
                ip: self.address(family, &saddr, &[]),
                port: read_u16_le(data, offset_of!(R, sport)),
            },
            destination: Endpoint {
                ip: self.address(family, &daddr, &[]),
                port: read_u16_le(data, offset_of!(R, dport)),
            },
            details: EventDetails::Counters(TcpCounters {
                retransmits: read_u32_le(data, offset_of!(R, retrans)),
                rto_us: read_u32_le(data, offset_of!(R, rto)),
                rtt_us: read_u32_le(data, offset_of!(R, rtt)),
                snd_cwnd: read_u32_le(data, offset_of!(R, snd_cwnd)),
                ssthresh: read_u32_le(data, offset_of!(R, ssthresh)),
            }),
        }
    }

    fn decode_counter_ext(&self, data: &[u8]) -> RetransmitEvent {
        type R = CounterRecordExt;

        let family = AddressFamily::from_code(read_u16_le(data, offset_of!(R, family)));
        let saddr = read_fixed::<16>(data, offset_of!(R, saddr));
        let daddr = read_fixed::<16>(data, offset_of!(R, daddr));

        RetransmitEvent {
            schema: SchemaVariant::CounterExtended,
            timestamp_ns: Some(read_u64_le(data, offset_of!(R, timestamp_ns))),
            pid: Some(read_u32_le(data, offset_of!(R, pid))),
            family,
            source: Endpoint {
                ip: self.address(family, &saddr[..4], &saddr),
                port: read_u16_le(data, offset_of!(R, sport)),
            },
            destination: Endpoint {
                ip: self.address(family, &daddr[..4], &daddr),
                port: read_u16_le(data, offset_of!(R, dport)),
            },
            details: EventDetails::Counters(TcpCounters {
                retransmits: read_u32_le(data, offset_of!(R, retrans)),
                rto_us: read_u32_le(data, offset_of!(R, rto)),
                rtt_us: read_u32_le(data, offset_of!(R, rtt)),
                snd_cwnd: read_u32_le(data, offset_of!(R, snd_cwnd)),
                ssthresh: read_u32_le(data, offset_of!(R, ssthresh)),
            }),
        }
    }

    fn decode_conn_state(&self, data: &[u8]) -> RetransmitEvent {
        type R = ConnStateRecord;

        let family = AddressFamily::from_code(read_u16_le(data, offset_of!(R, family)));
        let saddr = read_fixed::<4>(data, offset_of!(R, saddr));
        let daddr = read_fixed::<4>(data, offset_of!(R, daddr));
        let saddr_v6 = read_fixed::<16>(data, offset_of!(R, saddr_v6));
        let daddr_v6 = read_fixed::<16>(data, offset_of!(R, daddr_v6));

        RetransmitEvent {
            schema: SchemaVariant::ConnectionState,
            timestamp_ns: Some(read_u64_le(data, offset_of!(R, timestamp_ns))),
            pid: Some(read_u32_le(data, offset_of!(R, pid))),
            family,
            source: Endpoint {
                ip: self.address(family, &saddr, &saddr_v6),
                port: read_u16_le(data, offset_of!(R, sport)),
            },
            destination: Endpoint {
                ip: self.address(family, &daddr, &daddr_v6),
                port: read_u16_le(data, offset_of!(R, dport)),
            },
            details: EventDetails::Connection(ConnectionDetails {
                state: read_i32_le(data, offset_of!(R, state)),
                socket: None,
            }),
        }
    }

    fn decode_conn_state_verbose(&self, data: &[u8]) -> RetransmitEvent {
        type R = ConnStateVerboseRecord;

        let family = AddressFamily::from_code(read_u16_le(data, offset_of!(R, family)));
        let saddr = read_fixed::<4>(data, offset_of!(R, saddr));
        let daddr = read_fixed::<4>(data, offset_of!(R, daddr));
        let saddr_v6 = read_fixed::<16>(data, offset_of!(R, saddr_v6));
        let daddr_v6 = read_fixed::<16>(data, offset_of!(R, daddr_v6));

        RetransmitEvent {
            schema: SchemaVariant::ConnectionStateVerbose,
            timestamp_ns: Some(read_u64_le(data, offset_of!(R, timestamp_ns))),
            pid: None,
            family,
            source: Endpoint {
                ip: self.address(family, &saddr, &saddr_v6),
                port: read_u16_le(data, offset_of!(R, sport)),
            },
            destination: Endpoint {
                ip: self.address(family, &daddr, &daddr_v6),
                port: read_u16_le(data, offset_of!(R, dport)),
            },
            details: EventDetails::Connection(ConnectionDetails {
                state: read_i32_le(data, offset_of!(R, state)),
                socket: Some(SocketIds {
                    skb_addr: read_u64_le(data, offset_of!(R, skbaddr)),
                    sk_addr: read_u64_le(data, offset_of!(R, skaddr)),
                }),
            }),
        }
    }

    /// Route the address bytes that belong to `family` through the formatter
    fn address(&self, family: AddressFamily, v4: &[u8], v6: &[u8]) -> String {
        match family {
            AddressFamily::Ipv4 => format_address(family, v4, self.ipv6_style),
            AddressFamily::Ipv6 => format_address(family, v6, self.ipv6_style),
            AddressFamily::Unknown => String::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Byte-reading helpers
//
// Callers pass a slice whose length was matched against the layout size, so
// every offset + width is in bounds.
// ---------------------------------------------------------------------------

fn read_fixed<const N: usize>(data: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&data[offset..offset + N]);
    out
}

fn read_u16_le(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes(read_fixed::<2>(data, offset))
}

fn read_u32_le(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(read_fixed::<4>(data, offset))
}

fn read_i32_le(data: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes(read_fixed::<4>(data, offset))
}

fn read_u64_le(data: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(read_fixed::<8>(data, offset))
}
