//! Sync engine
//!
//! Keeps the parameter store and the device consistent. Outbound, edits are
//! sent as NRPN groups and whole patches as one sysex dump. Inbound, NRPN
//! groups and patch dumps are decoded into the store without being echoed
//! back, and a Program Change schedules a dump request so the store follows
//! the program the device just loaded.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use crate::codec::nrpn::{self, NrpnDecoder};
use crate::codec::sysex::{self, PatchImage, SysexFraming, SysexKind};
use crate::error::Result;
use crate::midi::{format_hex, MidiMessage};
use crate::params::ParameterStore;
use crate::port::{MidiBackend, PortDirection, PortManager, SendOutcome};

/// Decodes everything arriving on the bound input
///
/// Runs on the backend's callback thread.
pub struct InboundProcessor {
    store: Arc<ParameterStore>,
    framing: SysexFraming,
    decoder: Mutex<NrpnDecoder>,
    /// Serialises patch dump application
    sysex_lock: Mutex<()>,
    resync_pending: AtomicBool,
    baseline_ready: AtomicBool,
}

impl InboundProcessor {
    pub fn new(store: Arc<ParameterStore>, framing: SysexFraming) -> Self {
        Self {
            store,
            framing,
            decoder: Mutex::new(NrpnDecoder::new()),
            sysex_lock: Mutex::new(()),
            resync_pending: AtomicBool::new(false),
            baseline_ready: AtomicBool::new(false),
        }
    }

    /// Handle one complete inbound message
    pub fn handle(&self, bytes: &[u8]) {
        let Some(message) = MidiMessage::parse(bytes) else {
            trace!("Ignoring unparsable input: {}", format_hex(bytes));
            return;
        };

        match message {
            MidiMessage::ControlChange { channel, cc, value } => {
                let event = self.decoder.lock().feed(channel, cc, value);
                if let Some(event) = event {
                    if let Some((nrpn, value)) = nrpn::resolve(self.store.table(), &event) {
                        if let Err(e) = self.store.set(nrpn, value) {
                            warn!("{}", e);
                        }
                    }
                }
            }
            MidiMessage::ProgramChange { channel, program } => {
                debug!("Program change {} on channel {}, resync scheduled", program, channel + 1);
                self.resync_pending.store(true, Ordering::Release);
            }
            MidiMessage::SysEx { data } => match sysex::classify(&self.framing, &data) {
                SysexKind::PatchDump => {
                    if let Err(e) = self.apply_dump(&data) {
                        warn!("Rejected patch dump: {}", e);
                    }
                }
                kind => trace!("Ignoring sysex ({:?}, {} bytes)", kind, data.len()),
            },
            other => trace!("Ignoring {}", other),
        }
    }

    /// Apply a patch dump and mark the baseline as ready
    pub fn apply_dump(&self, bytes: &[u8]) -> Result<PatchImage> {
        let _guard = self.sysex_lock.lock();
        let image = sysex::decode_patch(&self.store, &self.framing, bytes)?;
        self.baseline_ready.store(true, Ordering::Release);
        info!("Patch dump applied: '{}'", image.program_name);
        Ok(image)
    }

    /// Consume the resync request set by a Program Change
    pub fn take_resync(&self) -> bool {
        self.resync_pending.swap(false, Ordering::AcqRel)
    }

    /// Consume the "fresh patch applied" marker
    pub fn take_baseline(&self) -> bool {
        self.baseline_ready.swap(false, Ordering::AcqRel)
    }

    pub fn mark_baseline(&self) {
        self.baseline_ready.store(true, Ordering::Release);
    }
}

/// Counts from a full NRPN push
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushReport {
    pub parameters: usize,
    pub queued: usize,
    pub dropped: usize,
}

/// Outbound half of the synchronisation plus access to the inbound state
pub struct SyncEngine {
    store: Arc<ParameterStore>,
    inbound: Arc<InboundProcessor>,
    ports: PortManager,
    framing: SysexFraming,
    channel: AtomicU8,
}

impl SyncEngine {
    pub fn new(
        store: Arc<ParameterStore>,
        backend: Arc<dyn MidiBackend>,
        framing: SysexFraming,
        queue_depth: usize,
    ) -> Self {
        let inbound = Arc::new(InboundProcessor::new(store.clone(), framing.clone()));
        let handler_inbound = inbound.clone();
        let ports = PortManager::with_queue_depth(
            backend,
            Arc::new(move |bytes: &[u8]| handler_inbound.handle(bytes)),
            queue_depth,
        );

        Self {
            store,
            inbound,
            ports,
            framing,
            channel: AtomicU8::new(0),
        }
    }

    pub fn store(&self) -> &Arc<ParameterStore> {
        &self.store
    }

    pub fn ports(&self) -> &PortManager {
        &self.ports
    }

    pub fn inbound(&self) -> &Arc<InboundProcessor> {
        &self.inbound
    }

    pub fn framing(&self) -> &SysexFraming {
        &self.framing
    }

    pub fn list_ports(&self, direction: PortDirection) -> Result<Vec<String>> {
        self.ports.list_ports(direction)
    }

    pub fn select_port(&self, direction: PortDirection, name: &str) -> Result<()> {
        self.ports.select_port(direction, name)
    }

    /// Output channel, 0-15
    pub fn channel(&self) -> u8 {
        self.channel.load(Ordering::Acquire)
    }

    pub fn set_channel(&self, channel: u8) {
        self.channel.store(channel & 0x0F, Ordering::Release);
    }

    /// Store a value and send it to the device
    ///
    /// Returns the value actually stored after clamping.
    pub fn edit(&self, nrpn: u16, value: i32) -> Result<i32> {
        let stored = self.store.set(nrpn, value)?;
        self.send_nrpn(nrpn, stored);
        Ok(stored)
    }

    /// Send a value without touching the store
    ///
    /// The four CCs are queued as one unit, so they land together on a
    /// single port or not at all.
    pub fn send_nrpn(&self, nrpn: u16, value: i32) -> SendOutcome {
        let group = nrpn::encode_bytes(self.channel(), nrpn, value);
        self.ports.send_group(&group, nrpn::MESSAGE_LEN)
    }

    /// Send every parameter, in ascending NRPN order, as NRPN groups
    pub fn push_via_nrpn(&self) -> PushReport {
        let mut report = PushReport::default();
        if !self.ports.is_bound(PortDirection::Output) {
            debug!("NRPN push skipped: no output port");
            return report;
        }

        let table = self.store.table();
        for (index, descriptor) in table.ascending_nrpn() {
            let Some(value) = self.store.get_by_index(index) else {
                continue;
            };
            report.parameters += 1;
            match self.send_nrpn(descriptor.nrpn, value) {
                SendOutcome::Queued => report.queued += 1,
                _ => report.dropped += 1,
            }
        }
        info!(
            "Pushed {} parameters via NRPN ({} dropped)",
            report.queued, report.dropped
        );
        report
    }

    /// Send the whole patch as one dump
    pub fn push_via_sysex(&self) -> SendOutcome {
        let block = sysex::encode_patch(&self.store, &self.framing);
        let outcome = self.ports.send(&block);
        info!("Pushed patch via sysex: {:?}", outcome);
        outcome
    }

    /// Ask the device for its current patch
    ///
    /// The reply arrives through the input like any other dump.
    pub fn request_dump(&self) -> SendOutcome {
        let outcome = self.ports.send(&sysex::dump_request(&self.framing));
        debug!("Requested patch dump: {:?}", outcome);
        outcome
    }

    /// Forward host MIDI to the device
    pub fn passthrough(&self, bytes: &[u8]) -> SendOutcome {
        self.ports.send(bytes)
    }

    /// Apply a dump from storage and mark it as the new baseline
    pub fn init_from_sysex(&self, bytes: &[u8]) -> Result<PatchImage> {
        self.inbound.apply_dump(bytes)
    }

    /// Service a pending Program Change; true if a dump was requested
    pub fn poll_resync(&self) -> bool {
        if !self.inbound.take_resync() {
            return false;
        }
        self.request_dump();
        true
    }

    /// True once after each applied dump
    pub fn take_baseline(&self) -> bool {
        self.inbound.take_baseline()
    }
}
