//! Real MIDI devices through `midir`

use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use tracing::{debug, info, trace};

use super::backend::{InboundHandler, InputSource, MidiBackend, OutputSink};
use super::PortDirection;
use crate::error::{Result, SyncError};
use crate::midi::format_hex;

pub struct MidirBackend {
    client_name: String,
}

impl MidirBackend {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
        }
    }

    fn unavailable(direction: PortDirection, name: &str, reason: impl ToString) -> SyncError {
        SyncError::PortUnavailable {
            direction,
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl Default for MidirBackend {
    fn default() -> Self {
        Self::new("micron-sync")
    }
}

/// Pick a port: exact name first, then case-insensitive substring
fn find_port<P: Clone>(ports: &[(P, String)], pattern: &str) -> Option<(P, String)> {
    if let Some(found) = ports.iter().find(|(_, name)| name == pattern) {
        return Some(found.clone());
    }
    let pattern = pattern.to_lowercase();
    ports
        .iter()
        .find(|(_, name)| name.to_lowercase().contains(&pattern))
        .cloned()
}

impl MidiBackend for MidirBackend {
    fn list_ports(&self, direction: PortDirection) -> Result<Vec<String>> {
        let names = match direction {
            PortDirection::Input => {
                let midi_in = MidiInput::new(&format!("{}-scan", self.client_name))?;
                midi_in
                    .ports()
                    .iter()
                    .filter_map(|p| midi_in.port_name(p).ok())
                    .collect()
            }
            PortDirection::Output => {
                let midi_out = MidiOutput::new(&format!("{}-scan", self.client_name))?;
                midi_out
                    .ports()
                    .iter()
                    .filter_map(|p| midi_out.port_name(p).ok())
                    .collect()
            }
        };
        Ok(names)
    }

    fn open_output(&self, name: &str) -> Result<Box<dyn OutputSink>> {
        let direction = PortDirection::Output;
        let midi_out = MidiOutput::new(&format!("{}-out", self.client_name))?;
        let ports: Vec<_> = midi_out
            .ports()
            .into_iter()
            .filter_map(|p| midi_out.port_name(&p).ok().map(|n| (p, n)))
            .collect();
        debug!("Found {} MIDI output ports", ports.len());

        let (port, port_name) =
            find_port(&ports, name).ok_or_else(|| Self::unavailable(direction, name, "not found"))?;

        let connection = midi_out
            .connect(&port, &self.client_name)
            .map_err(|e| Self::unavailable(direction, &port_name, e))?;
        info!("Connected output port: {}", port_name);

        Ok(Box::new(MidirOutput {
            name: port_name,
            connection,
        }))
    }

    fn open_input(&self, name: &str, handler: InboundHandler) -> Result<Box<dyn InputSource>> {
        let direction = PortDirection::Input;
        let mut midi_in = MidiInput::new(&format!("{}-in", self.client_name))?;
        // Sysex must come through
        midi_in.ignore(Ignore::TimeAndActiveSense);

        let ports: Vec<_> = midi_in
            .ports()
            .into_iter()
            .filter_map(|p| midi_in.port_name(&p).ok().map(|n| (p, n)))
            .collect();
        debug!("Found {} MIDI input ports", ports.len());

        let (port, port_name) =
            find_port(&ports, name).ok_or_else(|| Self::unavailable(direction, name, "not found"))?;

        let connection = midi_in
            .connect(
                &port,
                &self.client_name,
                move |_timestamp, data, _| {
                    trace!("MIDI in: {}", format_hex(data));
                    handler(data);
                },
                (),
            )
            .map_err(|e| Self::unavailable(direction, &port_name, e))?;
        info!("Connected input port: {}", port_name);

        Ok(Box::new(MidirInput {
            name: port_name,
            _connection: connection,
        }))
    }
}

struct MidirOutput {
    name: String,
    connection: MidiOutputConnection,
}

impl OutputSink for MidirOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.connection
            .send(bytes)
            .map_err(|e| SyncError::Backend(format!("send to '{}' failed: {}", self.name, e)))
    }
}

struct MidirInput {
    name: String,
    _connection: MidiInputConnection<()>,
}

impl InputSource for MidirInput {
    fn name(&self) -> &str {
        &self.name
    }
}
