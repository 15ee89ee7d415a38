//! In-memory ports
//!
//! Records everything written to each output and can route an output back
//! to an input, which stands in for a device that echoes or answers.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use super::backend::{InboundHandler, InputSource, MidiBackend, OutputSink};
use super::PortDirection;
use crate::error::{Result, SyncError};

type Responder = Arc<dyn Fn(&[u8]) -> Vec<Vec<u8>> + Send + Sync>;

#[derive(Default)]
struct Shared {
    inputs: Vec<String>,
    outputs: Vec<String>,
    /// Every message written, with the output port it went to
    sent: Vec<(String, Vec<u8>)>,
    handlers: HashMap<String, InboundHandler>,
    /// output port -> input port
    loopback: HashMap<String, String>,
    responder: Option<(String, Responder)>,
    open_outputs: HashMap<String, usize>,
}

/// Shareable in-memory backend; clones see the same ports
#[derive(Clone, Default)]
pub struct MemoryBackend {
    shared: Arc<Mutex<Shared>>,
}

impl MemoryBackend {
    pub fn new<I, O>(inputs: I, outputs: O) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        O: IntoIterator,
        O::Item: Into<String>,
    {
        let backend = Self::default();
        {
            let mut shared = backend.shared.lock();
            shared.inputs = inputs.into_iter().map(Into::into).collect();
            shared.outputs = outputs.into_iter().map(Into::into).collect();
        }
        backend
    }

    /// Deliver whatever is written to `output` to the handler of `input`
    pub fn loopback(&self, output: &str, input: &str) {
        self.shared
            .lock()
            .loopback
            .insert(output.to_string(), input.to_string());
    }

    /// Answer messages written to any output by injecting replies on `input`
    pub fn respond_on(&self, input: &str, responder: impl Fn(&[u8]) -> Vec<Vec<u8>> + Send + Sync + 'static) {
        self.shared.lock().responder = Some((input.to_string(), Arc::new(responder)));
    }

    /// Simulate the device sending `bytes` on `input`
    ///
    /// Returns false when nothing is bound to that input.
    pub fn inject(&self, input: &str, bytes: &[u8]) -> bool {
        let handler = self.shared.lock().handlers.get(input).cloned();
        match handler {
            Some(handler) => {
                handler(bytes);
                true
            }
            None => false,
        }
    }

    /// Add or remove ports at runtime (hot plug)
    pub fn set_ports(&self, direction: PortDirection, names: Vec<String>) {
        let mut shared = self.shared.lock();
        match direction {
            PortDirection::Input => shared.inputs = names,
            PortDirection::Output => shared.outputs = names,
        }
    }

    /// Everything written so far
    pub fn sent(&self) -> Vec<(String, Vec<u8>)> {
        self.shared.lock().sent.clone()
    }

    /// Messages written to one output
    pub fn sent_to(&self, output: &str) -> Vec<Vec<u8>> {
        self.shared
            .lock()
            .sent
            .iter()
            .filter(|(port, _)| port == output)
            .map(|(_, bytes)| bytes.clone())
            .collect()
    }

    pub fn clear_sent(&self) {
        self.shared.lock().sent.clear();
    }

    /// Number of open connections to an output
    pub fn open_count(&self, output: &str) -> usize {
        self.shared.lock().open_outputs.get(output).copied().unwrap_or(0)
    }

    fn deliver(&self, port: &str, bytes: &[u8]) {
        let (targets, responses) = {
            let mut shared = self.shared.lock();
            shared.sent.push((port.to_string(), bytes.to_vec()));

            let mut targets = Vec::new();
            if let Some(handler) = shared
                .loopback
                .get(port)
                .and_then(|input| shared.handlers.get(input))
            {
                targets.push((handler.clone(), bytes.to_vec()));
            }

            let responses = shared.responder.as_ref().and_then(|(input, respond)| {
                shared
                    .handlers
                    .get(input)
                    .map(|handler| (handler.clone(), respond.clone()))
            });
            (targets, responses)
        };

        // Handlers run without the lock; they may call back into the backend
        for (handler, bytes) in targets {
            handler(&bytes);
        }
        if let Some((handler, respond)) = responses {
            for reply in respond(bytes) {
                handler(&reply);
            }
        }
    }

    fn unavailable(direction: PortDirection, name: &str) -> SyncError {
        SyncError::PortUnavailable {
            direction,
            name: name.to_string(),
            reason: "not found".to_string(),
        }
    }
}

impl MidiBackend for MemoryBackend {
    fn list_ports(&self, direction: PortDirection) -> Result<Vec<String>> {
        let shared = self.shared.lock();
        Ok(match direction {
            PortDirection::Input => shared.inputs.clone(),
            PortDirection::Output => shared.outputs.clone(),
        })
    }

    fn open_output(&self, name: &str) -> Result<Box<dyn OutputSink>> {
        let mut shared = self.shared.lock();
        if !shared.outputs.iter().any(|o| o == name) {
            return Err(Self::unavailable(PortDirection::Output, name));
        }
        *shared.open_outputs.entry(name.to_string()).or_default() += 1;
        Ok(Box::new(MemoryOutput {
            name: name.to_string(),
            backend: self.clone(),
        }))
    }

    fn open_input(&self, name: &str, handler: InboundHandler) -> Result<Box<dyn InputSource>> {
        let mut shared = self.shared.lock();
        if !shared.inputs.iter().any(|i| i == name) {
            return Err(Self::unavailable(PortDirection::Input, name));
        }
        shared.handlers.insert(name.to_string(), handler);
        Ok(Box::new(MemoryInput {
            name: name.to_string(),
            backend: self.clone(),
        }))
    }
}

struct MemoryOutput {
    name: String,
    backend: MemoryBackend,
}

impl OutputSink for MemoryOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.backend.deliver(&self.name, bytes);
        Ok(())
    }
}

impl Drop for MemoryOutput {
    fn drop(&mut self) {
        let mut shared = self.backend.shared.lock();
        if let Some(count) = shared.open_outputs.get_mut(&self.name) {
            *count = count.saturating_sub(1);
        }
    }
}

struct MemoryInput {
    name: String,
    backend: MemoryBackend,
}

impl InputSource for MemoryInput {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for MemoryInput {
    fn drop(&mut self) {
        self.backend.shared.lock().handlers.remove(&self.name);
    }
}
