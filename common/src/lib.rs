//! Record layouts and constants shared by the retransmit probe and userspace
//!
//! The kernel program writes these structures into its output map; the
//! userspace decoder reads them back by offset.

#![no_std]

pub mod constants;
pub mod types;

// Re-export commonly used types
pub use constants::*;
pub use types::{
    ConnStateRecord, ConnStateVerboseRecord, CounterRecordExt, CounterRecordV1, CONN_STATE_LEN,
    CONN_STATE_VERBOSE_LEN, COUNTER_EXT_LEN, COUNTER_V1_LEN,
};
