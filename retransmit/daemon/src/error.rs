//! Session and start-up error taxonomy
//!
//! Per-record failures live in [`crate::decoder::DecodeError`] and never leave
//! the read loop. Everything here is fatal to whatever raised it.

use aya::maps::perf::PerfBufferError;
use std::{io, path::PathBuf};
use thiserror::Error;

/// Transport failure not caused by a shutdown request
#[derive(Error, Debug)]
pub enum RingBufferError {
    #[error("ring buffer read failed: {0}")]
    Io(#[from] io::Error),

    #[error("perf buffer read failed on CPU {cpu}: {source}")]
    PerfBuffer {
        cpu: u32,
        #[source]
        source: PerfBufferError,
    },

    #[error("ring buffer closed without a shutdown request")]
    Closed,
}

/// Reason a consumer session ended abnormally
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    RingBuffer(#[from] RingBufferError),

    #[error("event sink write failed: {0}")]
    Sink(#[source] io::Error),
}

/// Probe load or attach failure, raised before any session starts
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("no probe object path configured")]
    NoObject,

    #[error("failed to read probe object {path:?}: {source}")]
    ReadObject {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to load probe object: {0}")]
    Load(#[from] aya::BpfError),

    #[error("program {0:?} not found in probe object")]
    ProgramNotFound(String),

    #[error("program {name:?}: {source}")]
    Program {
        name: String,
        #[source]
        source: aya::programs::ProgramError,
    },

    #[error("map {0:?} not found in probe object")]
    MapNotFound(String),

    #[error("map {name:?}: {source}")]
    Map {
        name: String,
        #[source]
        source: aya::maps::MapError,
    },

    #[error("failed to list online CPUs: {0}")]
    OnlineCpus(#[source] io::Error),

    #[error("failed to open perf buffer on CPU {cpu}: {source}")]
    PerfOpen {
        cpu: u32,
        #[source]
        source: PerfBufferError,
    },

    #[error("failed to register ring buffer with the runtime: {0}")]
    Register(#[source] io::Error),
}
