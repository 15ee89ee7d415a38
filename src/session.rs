//! Host-facing session
//!
//! Exposes the parameter set as a flat, normalized host parameter list and
//! saves/restores the whole session as a [`Preset`].

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::codec::sysex::{self, SysexFraming};
use crate::error::{Result, SyncError};
use crate::params::{DescriptorTable, ParameterStore};
use crate::port::{MidiBackend, PortDirection, DEFAULT_QUEUE_DEPTH};
use crate::preset::Preset;
use crate::sync::SyncEngine;

pub struct Session {
    engine: Arc<SyncEngine>,
    bank: AtomicU32,
    patch: AtomicU32,
}

impl Session {
    pub fn new(table: Arc<DescriptorTable>, backend: Arc<dyn MidiBackend>, framing: SysexFraming) -> Self {
        Self::with_queue_depth(table, backend, framing, DEFAULT_QUEUE_DEPTH)
    }

    pub fn with_queue_depth(
        table: Arc<DescriptorTable>,
        backend: Arc<dyn MidiBackend>,
        framing: SysexFraming,
        queue_depth: usize,
    ) -> Self {
        let store = Arc::new(ParameterStore::new(table));
        Self {
            engine: Arc::new(SyncEngine::new(store, backend, framing, queue_depth)),
            bank: AtomicU32::new(0),
            patch: AtomicU32::new(0),
        }
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub fn store(&self) -> &Arc<ParameterStore> {
        self.engine.store()
    }

    fn table(&self) -> &DescriptorTable {
        self.engine.store().table()
    }

    pub fn select_port(&self, direction: PortDirection, name: &str) -> Result<()> {
        self.engine.select_port(direction, name)
    }

    pub fn num_parameters(&self) -> usize {
        self.table().len()
    }

    pub fn parameter_name(&self, index: usize) -> Option<&str> {
        self.table().get(index).map(|d| d.name.as_str())
    }

    /// Display text for the current value
    pub fn parameter_text(&self, index: usize) -> Option<String> {
        let descriptor = self.table().get(index)?;
        let value = self.store().get_by_index(index)?;
        Some(descriptor.format_value(value))
    }

    /// Parameters that select behaviour rather than shape sound
    pub fn is_meta_parameter(&self, index: usize) -> bool {
        self.table().get(index).map(|d| d.flags.meta).unwrap_or(false)
    }

    pub fn num_steps(&self, index: usize) -> Option<u32> {
        self.table().get(index).map(|d| d.num_steps())
    }

    pub fn default_normalized(&self, index: usize) -> Option<f32> {
        self.table().get(index).map(|d| d.normalize(d.default))
    }

    pub fn get_parameter(&self, index: usize) -> Option<f32> {
        self.store().get_normalized(index)
    }

    /// Host automation: store and send to the device
    pub fn set_parameter(&self, index: usize, normalized: f32) -> Result<i32> {
        let descriptor = self.table().get(index).ok_or(SyncError::UnknownIndex(index))?;
        let (nrpn, value) = (descriptor.nrpn, descriptor.denormalize(normalized));
        self.engine.edit(nrpn, value)
    }

    pub fn bank(&self) -> u32 {
        self.bank.load(Ordering::Acquire)
    }

    pub fn patch(&self) -> u32 {
        self.patch.load(Ordering::Acquire)
    }

    pub fn set_bank_patch(&self, bank: u32, patch: u32) {
        self.bank.store(bank, Ordering::Release);
        self.patch.store(patch, Ordering::Release);
    }

    /// Current session as a preset
    pub fn capture_preset(&self) -> Preset {
        let ports = self.engine.ports();
        Preset {
            raw_sysex: sysex::encode_patch(self.store(), self.engine.framing()),
            channel: self.engine.channel(),
            input_port: ports.current_port(PortDirection::Input).unwrap_or_default(),
            output_port: ports.current_port(PortDirection::Output).unwrap_or_default(),
            bank: self.bank(),
            patch: self.patch(),
        }
    }

    /// Restore a preset: patch, channel, ports and bank/patch
    ///
    /// A port that is no longer present is left unbound and logged; the
    /// patch is still applied.
    pub fn apply_preset(&self, preset: &Preset) -> Result<()> {
        self.engine.init_from_sysex(&preset.raw_sysex)?;
        self.engine.set_channel(preset.channel);
        self.set_bank_patch(preset.bank, preset.patch);

        for (direction, name) in [
            (PortDirection::Input, &preset.input_port),
            (PortDirection::Output, &preset.output_port),
        ] {
            if let Err(e) = self.engine.select_port(direction, name) {
                warn!("{}", e);
            }
        }
        info!("Restored preset '{}'", preset.program_name());
        Ok(())
    }

    /// Host state blob
    pub fn save_state(&self) -> Vec<u8> {
        self.capture_preset().to_bytes().to_vec()
    }

    pub fn load_state(&self, data: &[u8]) -> Result<()> {
        let preset = Preset::from_bytes(data)?;
        self.apply_preset(&preset)
    }
}
