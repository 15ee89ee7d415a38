//! Error types for the sync engine
//!
//! Nothing in the core is fatal: every variant is reported upward as a
//! status and the caller decides whether to log, retry or surface it.

use thiserror::Error;

use crate::port::PortDirection;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// A value fell outside the descriptor range. Writes clamp; decoders drop.
    #[error("value {value} out of range for NRPN {nrpn} ({min}..={max})")]
    OutOfRangeValue {
        nrpn: u16,
        value: i32,
        min: i32,
        max: i32,
    },

    #[error("unknown NRPN {0}")]
    UnknownNrpn(u16),

    #[error("unknown host parameter index {0}")]
    UnknownIndex(usize),

    /// Length or framing mismatch on a patch dump. The whole dump is rejected.
    #[error("malformed sysex: {0}")]
    MalformedSysex(String),

    #[error("{direction} port '{name}' unavailable: {reason}")]
    PortUnavailable {
        direction: PortDirection,
        name: String,
        reason: String,
    },

    /// An NRPN group was superseded before all four messages arrived.
    #[error("incomplete NRPN update discarded (nrpn {nrpn:?})")]
    IncompletePartialUpdate { nrpn: Option<u16> },

    #[error("malformed state blob: {0}")]
    MalformedState(String),

    #[error("invalid parameter table: {0}")]
    InvalidTable(String),

    #[error("MIDI backend error: {0}")]
    Backend(String),
}

impl From<midir::InitError> for SyncError {
    fn from(e: midir::InitError) -> Self {
        SyncError::Backend(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
