//! ParameterStore - live values for every descriptor
//!
//! Each value is an atomic, so the real-time context, the MIDI input
//! callback and the poll cycle can read and write without coordination.
//! Writes set per-parameter dirty flags which the poll cycle consumes; that
//! is the only change notification the store emits.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

use super::table::DescriptorTable;
use crate::error::{Result, SyncError};

/// Maximum program name length accepted by the device
pub const PROGRAM_NAME_LEN: usize = 14;

/// Live parameter values, indexed by host index
pub struct ParameterStore {
    table: Arc<DescriptorTable>,
    values: Vec<AtomicI32>,
    dirty: Vec<AtomicBool>,
    /// Set by any write that changed something
    changed: AtomicBool,
    program_name: RwLock<String>,
}

impl ParameterStore {
    /// Create a store with every parameter at its default
    pub fn new(table: Arc<DescriptorTable>) -> Self {
        let values = table.iter().map(|d| AtomicI32::new(d.default)).collect();
        let dirty = table.iter().map(|_| AtomicBool::new(false)).collect();

        Self {
            table,
            values,
            dirty,
            changed: AtomicBool::new(false),
            program_name: RwLock::new(String::new()),
        }
    }

    pub fn table(&self) -> &Arc<DescriptorTable> {
        &self.table
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Current value of an NRPN
    pub fn get(&self, nrpn: u16) -> Option<i32> {
        self.table
            .index_of(nrpn)
            .map(|idx| self.values[idx].load(Ordering::Acquire))
    }

    /// Current value by host index
    pub fn get_by_index(&self, index: usize) -> Option<i32> {
        self.values.get(index).map(|v| v.load(Ordering::Acquire))
    }

    /// Write a value, clamping it to the descriptor range
    ///
    /// Returns the value actually stored. Out-of-range input is not an error.
    pub fn set(&self, nrpn: u16, value: i32) -> Result<i32> {
        let index = self.table.index_of(nrpn).ok_or(SyncError::UnknownNrpn(nrpn))?;
        self.set_by_index(index, value)
    }

    /// Write a value by host index, clamping it to the descriptor range
    pub fn set_by_index(&self, index: usize, value: i32) -> Result<i32> {
        let descriptor = self.table.get(index).ok_or(SyncError::UnknownIndex(index))?;
        let clamped = descriptor.clamp(value);
        if clamped != value {
            debug!(
                "{}",
                SyncError::OutOfRangeValue {
                    nrpn: descriptor.nrpn,
                    value,
                    min: descriptor.min,
                    max: descriptor.max,
                }
            );
        }

        let previous = self.values[index].swap(clamped, Ordering::AcqRel);
        if previous != clamped {
            trace!("NRPN {} = {} (was {})", descriptor.nrpn, clamped, previous);
            self.dirty[index].store(true, Ordering::Release);
            self.changed.store(true, Ordering::Release);
        }
        Ok(clamped)
    }

    /// Host index of an NRPN
    pub fn index_of_nrpn(&self, nrpn: u16) -> Option<usize> {
        self.table.index_of(nrpn)
    }

    /// NRPN at a host index
    pub fn by_index(&self, index: usize) -> Option<u16> {
        self.table.get(index).map(|d| d.nrpn)
    }

    /// Value mapped to 0.0..=1.0 by the descriptor range
    pub fn get_normalized(&self, index: usize) -> Option<f32> {
        let descriptor = self.table.get(index)?;
        self.get_by_index(index).map(|v| descriptor.normalize(v))
    }

    /// Write a normalized value, returning the integer value stored
    pub fn set_normalized(&self, index: usize, normalized: f32) -> Result<i32> {
        let descriptor = self.table.get(index).ok_or(SyncError::UnknownIndex(index))?;
        self.set_by_index(index, descriptor.denormalize(normalized))
    }

    /// Dense copy of every value in host index order
    pub fn values(&self) -> Vec<i32> {
        self.values.iter().map(|v| v.load(Ordering::Acquire)).collect()
    }

    /// Put every parameter back to its default
    pub fn reset_to_defaults(&self) {
        for (index, descriptor) in self.table.iter().enumerate() {
            let _ = self.set_by_index(index, descriptor.default);
        }
        self.set_program_name("");
    }

    pub fn program_name(&self) -> String {
        self.program_name.read().clone()
    }

    /// Set the program name, truncated to 14 printable ASCII characters
    pub fn set_program_name(&self, name: &str) -> String {
        let sanitized: String = name
            .chars()
            .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { '?' })
            .take(PROGRAM_NAME_LEN)
            .collect();

        let mut current = self.program_name.write();
        if *current != sanitized {
            *current = sanitized.clone();
            self.changed.store(true, Ordering::Release);
        }
        sanitized
    }

    /// Whether anything changed since the last [`take_changed`](Self::take_changed)
    pub fn has_changed(&self) -> bool {
        self.changed.load(Ordering::Acquire)
    }

    /// Host indices written since the last call, clearing their flags
    ///
    /// Only the poll cycle calls this; repeated calls without intervening
    /// writes return an empty list.
    pub fn take_changed(&self) -> Vec<usize> {
        if !self.changed.swap(false, Ordering::AcqRel) {
            return Vec::new();
        }
        self.dirty
            .iter()
            .enumerate()
            .filter(|(_, flag)| flag.swap(false, Ordering::AcqRel))
            .map(|(index, _)| index)
            .collect()
    }
}
