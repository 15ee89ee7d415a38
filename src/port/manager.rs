//! Port manager
//!
//! The bound output is a queue sender behind a mutex. `send` holds the lock
//! only long enough to clone the sender; the device write happens on a
//! writer thread that owns the connection. A queue item is a whole unit
//! (one message, or a group such as an NRPN write) and is written back to
//! back by a single writer, so a group is never split across ports or
//! partially dropped. Rebinding replaces the sender and waits for the old
//! writer to drain, so two connections never write at the same time.

use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, trace, warn};

use super::backend::{InboundHandler, InputSource, MidiBackend, OutputSink};
use super::{is_unbind_name, PortDirection, SendOutcome};
use crate::error::{Result, SyncError};
use crate::midi::format_hex;

/// Queue items buffered per output before sends start dropping
pub const DEFAULT_QUEUE_DEPTH: usize = 4096;

/// One queue item: `bytes` split into messages of `message_len` bytes
struct Packet {
    bytes: Vec<u8>,
    message_len: usize,
}

struct BoundOutput {
    name: String,
    tx: Sender<Packet>,
    writer: JoinHandle<()>,
}

struct BoundInput {
    name: String,
    /// Dropping closes the port
    _source: Box<dyn InputSource>,
}

pub struct PortManager {
    backend: Arc<dyn MidiBackend>,
    handler: InboundHandler,
    output: Mutex<Option<BoundOutput>>,
    input: Mutex<Option<BoundInput>>,
    /// Serialises binds and unbinds; never taken by `send`
    bind_lock: Mutex<()>,
    queue_depth: usize,
}

impl PortManager {
    pub fn new(backend: Arc<dyn MidiBackend>, handler: InboundHandler) -> Self {
        Self::with_queue_depth(backend, handler, DEFAULT_QUEUE_DEPTH)
    }

    pub fn with_queue_depth(backend: Arc<dyn MidiBackend>, handler: InboundHandler, queue_depth: usize) -> Self {
        Self {
            backend,
            handler,
            output: Mutex::new(None),
            input: Mutex::new(None),
            bind_lock: Mutex::new(()),
            queue_depth: queue_depth.max(1),
        }
    }

    /// Ports currently present on the system
    pub fn list_ports(&self, direction: PortDirection) -> Result<Vec<String>> {
        self.backend.list_ports(direction)
    }

    /// Name of the bound port, if any
    pub fn current_port(&self, direction: PortDirection) -> Option<String> {
        match direction {
            PortDirection::Input => self.input.lock().as_ref().map(|i| i.name.clone()),
            PortDirection::Output => self.output.lock().as_ref().map(|o| o.name.clone()),
        }
    }

    pub fn is_bound(&self, direction: PortDirection) -> bool {
        match direction {
            PortDirection::Input => self.input.lock().is_some(),
            PortDirection::Output => self.output.lock().is_some(),
        }
    }

    /// Bind `name`, releasing the previous port of that direction first
    ///
    /// `""` or `"None"` only unbinds. If the new port cannot be opened the
    /// direction stays unbound.
    pub fn select_port(&self, direction: PortDirection, name: &str) -> Result<()> {
        let _bind = self.bind_lock.lock();

        self.release(direction);
        if is_unbind_name(name) {
            info!("Unbound {} port", direction);
            return Ok(());
        }

        match direction {
            PortDirection::Output => {
                let sink = self
                    .backend
                    .open_output(name)
                    .map_err(|e| unavailable(direction, name, e))?;
                let bound = self.spawn_writer(sink)?;
                info!("Bound output port: {}", bound.name);
                *self.output.lock() = Some(bound);
            }
            PortDirection::Input => {
                let source = self
                    .backend
                    .open_input(name, self.handler.clone())
                    .map_err(|e| unavailable(direction, name, e))?;
                let bound = BoundInput {
                    name: source.name().to_string(),
                    _source: source,
                };
                info!("Bound input port: {}", bound.name);
                *self.input.lock() = Some(bound);
            }
        }
        Ok(())
    }

    /// Release the port of one direction
    pub fn unbind(&self, direction: PortDirection) {
        let _bind = self.bind_lock.lock();
        self.release(direction);
    }

    /// Caller holds `bind_lock` (or has exclusive access)
    fn release(&self, direction: PortDirection) {
        // Take under the lock, drop outside it: closing an input may wait
        // for the backend callback to return.
        match direction {
            PortDirection::Input => {
                let old = self.input.lock().take();
                if let Some(old) = old {
                    debug!("Closing input port: {}", old.name);
                }
            }
            PortDirection::Output => {
                let old = self.output.lock().take();
                if let Some(BoundOutput { name, tx, writer }) = old {
                    debug!("Releasing output port: {}", name);
                    drop(tx);
                    if writer.join().is_err() {
                        warn!("Writer for {} panicked", name);
                    }
                }
            }
        }
    }

    /// Queue one message for the bound output without blocking
    pub fn send(&self, bytes: &[u8]) -> SendOutcome {
        self.enqueue(Packet {
            bytes: bytes.to_vec(),
            message_len: bytes.len(),
        })
    }

    /// Queue consecutive `message_len`-byte messages as one unit
    ///
    /// The whole group is written in order to a single port, or dropped
    /// as a whole.
    pub fn send_group(&self, bytes: &[u8], message_len: usize) -> SendOutcome {
        self.enqueue(Packet {
            bytes: bytes.to_vec(),
            message_len: message_len.max(1),
        })
    }

    fn enqueue(&self, packet: Packet) -> SendOutcome {
        let tx = match self.output.lock().as_ref() {
            Some(bound) => bound.tx.clone(),
            None => return SendOutcome::Unbound,
        };

        let len = packet.bytes.len();
        match tx.try_send(packet) {
            Ok(()) => SendOutcome::Queued,
            Err(TrySendError::Full(_)) => {
                warn!("Output queue full, dropping {} bytes", len);
                SendOutcome::Dropped
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("Output writer gone, dropping {} bytes", len);
                SendOutcome::Dropped
            }
        }
    }

    fn spawn_writer(&self, sink: Box<dyn OutputSink>) -> Result<BoundOutput> {
        let name = sink.name().to_string();
        let (tx, rx) = bounded(self.queue_depth);

        let writer = thread::Builder::new()
            .name(format!("midi-out-{}", name))
            .spawn(move || writer_loop(sink, rx))
            .map_err(|e| SyncError::PortUnavailable {
                direction: PortDirection::Output,
                name: name.clone(),
                reason: format!("failed to start writer: {}", e),
            })?;

        Ok(BoundOutput { name, tx, writer })
    }
}

impl Drop for PortManager {
    fn drop(&mut self) {
        self.release(PortDirection::Input);
        self.release(PortDirection::Output);
    }
}

fn unavailable(direction: PortDirection, name: &str, error: SyncError) -> SyncError {
    match error {
        SyncError::PortUnavailable { .. } => error,
        other => SyncError::PortUnavailable {
            direction,
            name: name.to_string(),
            reason: other.to_string(),
        },
    }
}

/// Writes queued packets until every sender is gone, then closes the port
fn writer_loop(mut sink: Box<dyn OutputSink>, rx: Receiver<Packet>) {
    for packet in rx.iter() {
        for message in packet.bytes.chunks(packet.message_len) {
            trace!("MIDI out: {}", format_hex(message));
            if let Err(e) = sink.send(message) {
                warn!("{}", e);
            }
        }
    }
    debug!("Output port closed: {}", sink.name());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::MemoryBackend;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    fn wait_for(mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        done()
    }

    fn manager(backend: &MemoryBackend) -> PortManager {
        PortManager::new(Arc::new(backend.clone()), Arc::new(|_: &[u8]| {}))
    }

    #[test]
    fn test_send_without_output_is_unbound() {
        let backend = MemoryBackend::new(["In"], ["Out"]);
        let ports = manager(&backend);
        assert_eq!(ports.send(&[0xB0, 1, 2]), SendOutcome::Unbound);
        assert!(backend.sent().is_empty());
    }

    #[test]
    fn test_select_and_send() {
        let backend = MemoryBackend::new(["In"], ["Out"]);
        let ports = manager(&backend);
        ports.select_port(PortDirection::Output, "Out").unwrap();
        assert_eq!(ports.current_port(PortDirection::Output).as_deref(), Some("Out"));

        assert_eq!(ports.send(&[0xB0, 1, 2]), SendOutcome::Queued);
        assert!(wait_for(|| backend.sent_to("Out").len() == 1));
    }

    #[test]
    fn test_group_is_written_as_consecutive_messages() {
        let backend = MemoryBackend::new(["In"], ["Out"]);
        let ports = manager(&backend);
        ports.select_port(PortDirection::Output, "Out").unwrap();

        let group = [0xB0, 99, 6, 0xB0, 98, 32, 0xB0, 6, 0, 0xB0, 38, 2];
        assert_eq!(ports.send_group(&group, 3), SendOutcome::Queued);
        assert!(wait_for(|| backend.sent_to("Out").len() == 4));
        let written: Vec<u8> = backend.sent_to("Out").concat();
        assert_eq!(written, group);
    }

    #[test]
    fn test_unbind_waits_for_queued_output() {
        let backend = MemoryBackend::new(["In"], ["Out"]);
        let ports = manager(&backend);
        ports.select_port(PortDirection::Output, "Out").unwrap();
        for i in 0..100u8 {
            assert!(ports.send(&[0xB0, 1, i]).is_queued());
        }

        ports.unbind(PortDirection::Output);
        assert_eq!(backend.sent_to("Out").len(), 100);
        assert_eq!(backend.open_count("Out"), 0);
    }

    #[test]
    fn test_failed_select_leaves_direction_unbound() {
        let backend = MemoryBackend::new(["In"], ["Out"]);
        let ports = manager(&backend);
        ports.select_port(PortDirection::Output, "Out").unwrap();

        let err = ports.select_port(PortDirection::Output, "Missing").unwrap_err();
        assert!(matches!(err, SyncError::PortUnavailable { direction: PortDirection::Output, .. }));
        assert!(!ports.is_bound(PortDirection::Output));
        assert_eq!(ports.send(&[0xF8]), SendOutcome::Unbound);
    }

    #[test]
    fn test_none_unbinds_and_closes() {
        let backend = MemoryBackend::new(["In"], ["Out"]);
        let ports = manager(&backend);
        ports.select_port(PortDirection::Output, "Out").unwrap();
        assert_eq!(backend.open_count("Out"), 1);

        ports.select_port(PortDirection::Output, "None").unwrap();
        assert!(!ports.is_bound(PortDirection::Output));
        assert!(wait_for(|| backend.open_count("Out") == 0));
    }

    #[test]
    fn test_inbound_reaches_handler() {
        let backend = MemoryBackend::new(["In"], ["Out"]);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let ports = PortManager::new(
            Arc::new(backend.clone()),
            Arc::new(move |_: &[u8]| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert!(!backend.inject("In", &[0xC0, 1]));
        ports.select_port(PortDirection::Input, "In").unwrap();
        assert!(backend.inject("In", &[0xC0, 1]));
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        ports.unbind(PortDirection::Input);
        assert!(!backend.inject("In", &[0xC0, 1]));
    }

    #[test]
    fn test_list_ports_is_not_cached() {
        let backend = MemoryBackend::new(["In"], ["Out"]);
        let ports = manager(&backend);
        assert_eq!(ports.list_ports(PortDirection::Output).unwrap(), vec!["Out"]);
        backend.set_ports(PortDirection::Output, vec!["Out".into(), "Out 2".into()]);
        assert_eq!(ports.list_ports(PortDirection::Output).unwrap().len(), 2);
    }

    #[test]
    fn test_rebind_during_sends_never_tears_messages() {
        let backend = MemoryBackend::new(Vec::<String>::new(), ["A", "B"]);
        let ports = Arc::new(manager(&backend));
        let queued = Arc::new(AtomicUsize::new(0));

        let senders: Vec<_> = (0..4u8)
            .map(|t| {
                let ports = ports.clone();
                let queued = queued.clone();
                thread::spawn(move || {
                    for i in 0..500u16 {
                        let message = [0xB0 | t, (i & 0x7F) as u8, (i >> 7) as u8];
                        if ports.send(&message).is_queued() {
                            queued.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();

        for i in 0..200 {
            let name = match i % 3 {
                0 => "A",
                1 => "B",
                _ => "None",
            };
            ports.select_port(PortDirection::Output, name).unwrap();
        }
        for sender in senders {
            sender.join().unwrap();
        }
        ports.unbind(PortDirection::Output);

        let expected = queued.load(Ordering::SeqCst);
        assert!(wait_for(|| backend.sent().len() == expected));
        for (port, bytes) in backend.sent() {
            assert!(port == "A" || port == "B");
            assert_eq!(bytes.len(), 3);
        }
        assert!(wait_for(|| backend.open_count("A") == 0 && backend.open_count("B") == 0));
    }
}
