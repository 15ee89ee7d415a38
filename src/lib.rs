//! micron-sync
//!
//! Keeps an in-memory parameter set for the Alesis Micron in step with the
//! hardware over MIDI: NRPN edits in both directions, whole-patch sysex
//! dumps, undo/redo, randomization and session persistence.

pub mod codec;
pub mod config;
pub mod editor;
pub mod error;
pub mod history;
pub mod midi;
pub mod params;
pub mod paths;
pub mod port;
pub mod preset;
pub mod randomize;
pub mod session;
pub mod sync;

pub use config::AppConfig;
pub use editor::{EditorModel, PollOutcome};
pub use error::{Result, SyncError};
pub use history::{History, Snapshot};
pub use params::{DescriptorTable, ParameterDescriptor, ParameterStore};
pub use port::{MidiBackend, PortDirection, PortManager, SendOutcome};
pub use preset::Preset;
pub use randomize::{RandomizeSettings, Randomizer};
pub use session::Session;
pub use sync::{PushReport, SyncEngine};
