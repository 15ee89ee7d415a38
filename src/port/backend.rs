use std::sync::Arc;

use super::PortDirection;
use crate::error::Result;

/// Receives every complete inbound message
pub type InboundHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Device layer used by [`PortManager`](super::PortManager)
pub trait MidiBackend: Send + Sync {
    /// Names of the ports currently present, queried fresh on each call
    fn list_ports(&self, direction: PortDirection) -> Result<Vec<String>>;

    /// Open an output port by name
    fn open_output(&self, name: &str) -> Result<Box<dyn OutputSink>>;

    /// Open an input port by name; `handler` runs on the backend's thread
    fn open_input(&self, name: &str, handler: InboundHandler) -> Result<Box<dyn InputSource>>;
}

/// An open output connection. Dropping it closes the port.
pub trait OutputSink: Send {
    fn name(&self) -> &str;

    fn send(&mut self, bytes: &[u8]) -> Result<()>;
}

/// An open input connection. Dropping it closes the port and stops the handler.
pub trait InputSource: Send {
    fn name(&self) -> &str;
}
