//! MIDI port management
//!
//! [`PortManager`] owns at most one input and one output binding and hides
//! the device layer behind [`MidiBackend`], so the same manager drives real
//! devices through `midir` and in-memory ports in tests.

mod backend;
mod manager;
pub mod memory;
mod midir_backend;

use std::fmt;

pub use backend::{InboundHandler, InputSource, MidiBackend, OutputSink};
pub use manager::{PortManager, DEFAULT_QUEUE_DEPTH};
pub use memory::MemoryBackend;
pub use midir_backend::MidirBackend;

/// Port name meaning "unbound"
pub const NO_PORT: &str = "None";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortDirection {
    Input,
    Output,
}

impl fmt::Display for PortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortDirection::Input => write!(f, "input"),
            PortDirection::Output => write!(f, "output"),
        }
    }
}

/// What happened to an outbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Handed to the writer of the bound output
    Queued,
    /// No output bound; nothing sent
    Unbound,
    /// Output queue full or closing; message discarded
    Dropped,
}

impl SendOutcome {
    pub fn is_queued(self) -> bool {
        self == SendOutcome::Queued
    }
}

/// True for names that mean "no port"
pub fn is_unbind_name(name: &str) -> bool {
    let name = name.trim();
    name.is_empty() || name.eq_ignore_ascii_case(NO_PORT)
}
