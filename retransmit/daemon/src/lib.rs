//! TCP Retransmit Probe Userspace Library
//!
//! Loads the retransmit tracepoint probe, decodes the fixed-layout records it
//! publishes and delivers them to an event sink until shutdown.

pub mod address;
pub mod config;
pub mod consumer;
pub mod decoder;
pub mod error;
pub mod loader;
pub mod procfs;
pub mod shutdown;
pub mod sink;
pub mod source;
pub mod types;

pub use config::{Config, ProbeConfig, SessionConfig, Transport};
pub use consumer::{ConsumerSession, RingBufferConsumer};
pub use decoder::{DecodeError, Framing, RecordDecoder};
pub use error::{LoaderError, RingBufferError, SessionError};
pub use loader::ProbeLoader;
pub use shutdown::{ShutdownCoordinator, ShutdownSignal, ShutdownState};
pub use sink::{EventSink, SinkType};
pub use source::{ChannelSource, RecordSource};
pub use types::*;
