//! Event sinks
//!
//! Render decoded events (and the occasional diagnostic) to a writer as
//! text lines, JSON lines, or InfluxDB line protocol.

use crate::{
    decoder::DecodeError,
    error::RingBufferError,
    types::{AddressFamily, Endpoint, EventDetails, RetransmitEvent},
};
use anyhow::{Context, Result};
use retransmit_common::constants::tcp_state_name;
use serde::{Deserialize, Serialize};
use std::{
    fmt::Write as _,
    fs::File,
    io::{self, BufWriter, Write},
    path::Path,
};

/// Receiver of everything a consumer session produces
pub trait EventSink {
    /// A successfully decoded event
    fn on_event(&mut self, event: &RetransmitEvent) -> io::Result<()>;

    /// A record that failed to decode (only called with diagnostics enabled)
    fn on_dropped(&mut self, _error: &DecodeError) -> io::Result<()> {
        Ok(())
    }

    /// The fault that ended the session
    fn on_fault(&mut self, _fault: &RingBufferError) -> io::Result<()> {
        Ok(())
    }

    /// Flush buffered output
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<S: EventSink + ?Sized> EventSink for Box<S> {
    fn on_event(&mut self, event: &RetransmitEvent) -> io::Result<()> {
        (**self).on_event(event)
    }

    fn on_dropped(&mut self, error: &DecodeError) -> io::Result<()> {
        (**self).on_dropped(error)
    }

    fn on_fault(&mut self, fault: &RingBufferError) -> io::Result<()> {
        (**self).on_fault(fault)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }
}

/// Output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SinkType {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
    /// InfluxDB line protocol
    Influx,
}

/// Build the sink for `kind`, writing to `output` or stdout
pub fn build_sink(kind: SinkType, output: Option<&Path>) -> Result<Box<dyn EventSink>> {
    let writer: Box<dyn Write> = match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {:?}", path))?;
            Box::new(BufWriter::new(file))
        }
        None => Box::new(io::stdout()),
    };

    Ok(match kind {
        SinkType::Text => Box::new(TextSink::new(writer)),
        SinkType::Json => Box::new(JsonSink::new(writer)),
        SinkType::Influx => Box::new(InfluxSink::new(writer, "tcp_retransmit".to_string())),
    })
}

fn endpoint_text(family: AddressFamily, endpoint: &Endpoint) -> String {
    match family {
        AddressFamily::Ipv6 => format!("[{}]:{}", endpoint.ip, endpoint.port),
        _ => format!("{}:{}", endpoint.ip, endpoint.port),
    }
}

/// Console-style text sink
pub struct TextSink<W: Write> {
    writer: W,
}

impl<W: Write> TextSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn format_event(event: &RetransmitEvent) -> String {
        let mut line = String::from("Event:");
        if let Some(ts) = event.timestamp_ns {
            // Monotonic ktime since boot, so it cannot be shown as wall-clock time.
            let _ = write!(line, " Timestamp={},", ts);
        }
        if let Some(pid) = event.pid {
            let _ = write!(line, " PID={},", pid);
        }
        let _ = write!(
            line,
            " Schema={}, IPFamily={}, Source={}, Destination={}",
            event.schema,
            event.family,
            endpoint_text(event.family, &event.source),
            endpoint_text(event.family, &event.destination),
        );

        match &event.details {
            EventDetails::Counters(c) => {
                let _ = write!(
                    line,
                    ", Retrans={}, RTO={}, RTT={}, SndCwnd={}, Ssthresh={}",
                    c.retransmits, c.rto_us, c.rtt_us, c.snd_cwnd, c.ssthresh
                );
            }
            EventDetails::Connection(conn) => {
                let _ = write!(line, ", State={}", conn.state);
                if let Some(name) = tcp_state_name(conn.state) {
                    let _ = write!(line, " ({})", name);
                }
                if let Some(socket) = conn.socket {
                    let _ = write!(
                        line,
                        ", Skb={:#x}, Sk={:#x}",
                        socket.skb_addr, socket.sk_addr
                    );
                }
            }
        }
        line
    }
}

impl<W: Write> EventSink for TextSink<W> {
    fn on_event(&mut self, event: &RetransmitEvent) -> io::Result<()> {
        writeln!(self.writer, "{}", Self::format_event(event))
    }

    fn on_dropped(&mut self, error: &DecodeError) -> io::Result<()> {
        writeln!(
            self.writer,
            "Dropped: kind={}, len={}, {}",
            error.kind(),
            error.record_len(),
            error
        )
    }

    fn on_fault(&mut self, fault: &RingBufferError) -> io::Result<()> {
        writeln!(self.writer, "Fault: {}", fault)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum JsonRecord<'a> {
    Retransmit {
        observed_at: String,
        #[serde(flatten)]
        event: &'a RetransmitEvent,
    },
    Dropped {
        kind: &'static str,
        len: usize,
        error: String,
    },
    Fault {
        error: String,
    },
}

/// JSON lines sink
pub struct JsonSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_record(&mut self, record: &JsonRecord<'_>) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")
    }
}

impl<W: Write> EventSink for JsonSink<W> {
    fn on_event(&mut self, event: &RetransmitEvent) -> io::Result<()> {
        self.write_record(&JsonRecord::Retransmit {
            observed_at: chrono::Utc::now().to_rfc3339(),
            event,
        })
    }

    fn on_dropped(&mut self, error: &DecodeError) -> io::Result<()> {
        self.write_record(&JsonRecord::Dropped {
            kind: error.kind(),
            len: error.record_len(),
            error: error.to_string(),
        })
    }

    fn on_fault(&mut self, fault: &RingBufferError) -> io::Result<()> {
        self.write_record(&JsonRecord::Fault {
            error: fault.to_string(),
        })
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// InfluxDB line protocol sink
pub struct InfluxSink<W: Write> {
    writer: W,
    measurement: String,
}

impl<W: Write> InfluxSink<W> {
    /// Create a new InfluxDB sink
    ///
    /// # Arguments
    ///
    /// * `writer` - Destination for the line protocol
    /// * `measurement` - Measurement name for InfluxDB
    pub fn new(writer: W, measurement: String) -> Self {
        Self {
            writer,
            measurement,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    /// Convert an event to one line of InfluxDB line protocol
    fn to_influx_line(event: &RetransmitEvent, measurement: &str, timestamp: i64) -> String {
        let mut line = format!(
            "{},schema={},family={}",
            measurement, event.schema, event.family
        );
        // empty tag values are not allowed
        if !event.source.ip.is_empty() {
            let _ = write!(line, ",src={}", escape_tag(&event.source.ip));
        }
        if !event.destination.ip.is_empty() {
            let _ = write!(line, ",dst={}", escape_tag(&event.destination.ip));
        }

        let _ = write!(
            line,
            " sport={}i,dport={}i",
            event.source.port, event.destination.port
        );
        if let Some(ts) = event.timestamp_ns {
            let _ = write!(line, ",ktime_ns={}i", ts);
        }
        if let Some(pid) = event.pid {
            let _ = write!(line, ",pid={}i", pid);
        }
        match &event.details {
            EventDetails::Counters(c) => {
                let _ = write!(
                    line,
                    ",retransmits={}i,rto_us={}i,rtt_us={}i,snd_cwnd={}i,ssthresh={}i",
                    c.retransmits, c.rto_us, c.rtt_us, c.snd_cwnd, c.ssthresh
                );
            }
            EventDetails::Connection(conn) => {
                let _ = write!(line, ",state={}i", conn.state);
            }
        }

        let _ = write!(line, " {}", timestamp);
        line
    }
}

fn escape_field_string(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn escape_tag(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, ',' | '=' | ' ') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

impl<W: Write> EventSink for InfluxSink<W> {
    fn on_event(&mut self, event: &RetransmitEvent) -> io::Result<()> {
        writeln!(
            self.writer,
            "{}",
            Self::to_influx_line(event, &self.measurement, influx_now())
        )
    }

    fn on_dropped(&mut self, error: &DecodeError) -> io::Result<()> {
        writeln!(
            self.writer,
            "{}_dropped,kind={} len={}i {}",
            self.measurement,
            error.kind(),
            error.record_len(),
            influx_now()
        )
    }

    fn on_fault(&mut self, fault: &RingBufferError) -> io::Result<()> {
        writeln!(
            self.writer,
            "{}_fault error=\"{}\" {}",
            self.measurement,
            escape_field_string(&fault.to_string()),
            influx_now()
        )
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

fn influx_now() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0)
}
