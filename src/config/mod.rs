//! Configuration management for micron-sync
//!
//! Handles loading, parsing, and hot-reloading of YAML configuration files.

pub mod watcher;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;

use crate::codec::sysex::{
    SysexFraming, DEFAULT_DUMP_OPCODE, DEFAULT_MANUFACTURER, DEFAULT_MODEL, DEFAULT_REQUEST_OPCODE,
};
use crate::history::DEFAULT_HISTORY_LIMIT;
use crate::port::DEFAULT_QUEUE_DEPTH;
use crate::randomize::{RandomizeSettings, DEFAULT_AMOUNT};

pub use watcher::ConfigWatcher;

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AppConfig {
    pub midi: MidiConfig,
    #[serde(default)]
    pub sysex: SysexConfig,
    #[serde(default)]
    pub params: ParamsConfig,
    #[serde(default)]
    pub editor: EditorConfig,
    #[serde(default)]
    pub state: StateConfig,
}

/// MIDI port configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MidiConfig {
    /// Port name or case-insensitive substring; "None" leaves it unbound
    pub input_port: String,
    pub output_port: String,
    /// 1-16
    #[serde(default = "default_channel")]
    pub channel: u8,
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

impl MidiConfig {
    /// Zero-based channel as used on the wire
    pub fn wire_channel(&self) -> u8 {
        self.channel.saturating_sub(1).min(15)
    }
}

/// Patch dump framing
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SysexConfig {
    #[serde(default = "default_manufacturer")]
    pub manufacturer: Vec<u8>,
    #[serde(default = "default_model")]
    pub model: u8,
    #[serde(default = "default_dump_opcode")]
    pub dump_opcode: u8,
    #[serde(default = "default_request_opcode")]
    pub request_opcode: u8,
}

impl Default for SysexConfig {
    fn default() -> Self {
        Self {
            manufacturer: default_manufacturer(),
            model: default_model(),
            dump_opcode: default_dump_opcode(),
            request_opcode: default_request_opcode(),
        }
    }
}

impl SysexConfig {
    pub fn framing(&self) -> Result<SysexFraming> {
        SysexFraming::new(
            self.manufacturer.clone(),
            self.model,
            self.dump_opcode,
            self.request_opcode,
        )
        .context("Invalid sysex framing")
    }
}

/// Parameter table source
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ParamsConfig {
    /// CSV with the descriptor table; the built-in table when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<PathBuf>,
}

/// Editor behaviour
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EditorConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_randomize_amount")]
    pub randomize_amount: f32,
    #[serde(default)]
    pub lock_pitch: bool,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            history_limit: default_history_limit(),
            randomize_amount: default_randomize_amount(),
            lock_pitch: false,
        }
    }
}

impl EditorConfig {
    pub fn randomize_settings(&self) -> RandomizeSettings {
        RandomizeSettings {
            amount: self.randomize_amount,
            lock_pitch: self.lock_pitch,
        }
    }
}

/// Session state persistence
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct StateConfig {
    /// Preset restored at start; `.json` or binary blob
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    /// Save to `file` on exit
    #[serde(default)]
    pub autosave: bool,
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config = Self::from_yaml(&contents)
            .with_context(|| format!("Invalid config file: {}", path))?;

        Ok(config)
    }

    /// Parse and validate YAML text
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: AppConfig =
            serde_yaml::from_str(contents).context("Failed to parse YAML config")?;

        config.validate()?;

        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, path: &str) -> Result<()> {
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config to YAML")?;

        fs::write(path, yaml)
            .await
            .with_context(|| format!("Failed to write config file: {}", path))?;

        Ok(())
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        if self.midi.input_port.trim().is_empty() {
            anyhow::bail!("MIDI input_port cannot be empty (use \"None\" to leave it unbound)");
        }
        if self.midi.output_port.trim().is_empty() {
            anyhow::bail!("MIDI output_port cannot be empty (use \"None\" to leave it unbound)");
        }
        if !(1..=16).contains(&self.midi.channel) {
            anyhow::bail!("MIDI channel {} is invalid (must be 1-16)", self.midi.channel);
        }
        if self.midi.queue_depth == 0 {
            anyhow::bail!("MIDI queue_depth must be at least 1");
        }

        self.sysex.framing()?;

        if let Some(table) = &self.params.table {
            if table.as_os_str().is_empty() {
                anyhow::bail!("params.table cannot be an empty path");
            }
        }

        if self.editor.poll_interval_ms == 0 {
            anyhow::bail!("editor.poll_interval_ms must be at least 1");
        }
        if self.editor.history_limit == 0 {
            anyhow::bail!("editor.history_limit must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.editor.randomize_amount) {
            anyhow::bail!(
                "editor.randomize_amount {} is invalid (must be 0.0-1.0)",
                self.editor.randomize_amount
            );
        }

        if self.state.autosave && self.state.file.is_none() {
            anyhow::bail!("state.autosave requires state.file");
        }

        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            midi: MidiConfig {
                input_port: "None".to_string(),
                output_port: "None".to_string(),
                channel: default_channel(),
                queue_depth: default_queue_depth(),
            },
            sysex: SysexConfig::default(),
            params: ParamsConfig::default(),
            editor: EditorConfig::default(),
            state: StateConfig::default(),
        }
    }
}

fn default_channel() -> u8 { 1 }
fn default_queue_depth() -> usize { DEFAULT_QUEUE_DEPTH }
fn default_manufacturer() -> Vec<u8> { DEFAULT_MANUFACTURER.to_vec() }
fn default_model() -> u8 { DEFAULT_MODEL }
fn default_dump_opcode() -> u8 { DEFAULT_DUMP_OPCODE }
fn default_request_opcode() -> u8 { DEFAULT_REQUEST_OPCODE }
fn default_poll_interval() -> u64 { 50 }
fn default_history_limit() -> usize { DEFAULT_HISTORY_LIMIT }
fn default_randomize_amount() -> f32 { DEFAULT_AMOUNT }

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
midi:
  input_port: "Micron"
  output_port: "Micron"
"#;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config = AppConfig::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.midi.channel, 1);
        assert_eq!(config.midi.wire_channel(), 0);
        assert_eq!(config.sysex, SysexConfig::default());
        assert_eq!(config.editor.poll_interval_ms, 50);
        assert!(config.params.table.is_none());
        assert!(!config.state.autosave);
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
midi:
  input_port: "USB MIDI"
  output_port: "USB MIDI"
  channel: 10
  queue_depth: 512
sysex:
  manufacturer: [0, 0, 14]
  model: 38
  dump_opcode: 1
  request_opcode: 2
params:
  table: "tables/micron.csv"
editor:
  poll_interval_ms: 20
  history_limit: 50
  randomize_amount: 0.7
  lock_pitch: true
state:
  file: "session.json"
  autosave: true
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.midi.wire_channel(), 9);
        assert_eq!(config.midi.queue_depth, 512);
        assert!(config.editor.randomize_settings().lock_pitch);
        assert_eq!(config.state.file, Some(PathBuf::from("session.json")));
        assert!(config.sysex.framing().is_ok());
    }

    #[test]
    fn test_example_config_is_valid() {
        let config = AppConfig::from_yaml(include_str!("../../config.example.yaml")).unwrap();
        assert_eq!(config.midi.input_port, "Micron");
        assert!(config.state.autosave);
    }

    #[test]
    fn test_validation_errors() {
        let cases = [
            "midi: { input_port: \"\", output_port: \"x\" }",
            "midi: { input_port: \"x\", output_port: \"x\", channel: 0 }",
            "midi: { input_port: \"x\", output_port: \"x\", channel: 17 }",
            "midi: { input_port: \"x\", output_port: \"x\" }\nsysex: { manufacturer: [] }",
            "midi: { input_port: \"x\", output_port: \"x\" }\neditor: { randomize_amount: 1.5 }",
            "midi: { input_port: \"x\", output_port: \"x\" }\nstate: { autosave: true }",
        ];
        for yaml in cases {
            assert!(AppConfig::from_yaml(yaml).is_err(), "accepted: {}", yaml);
        }
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let path = path.to_string_lossy().to_string();

        let mut config = AppConfig::default();
        config.midi.channel = 5;
        config.editor.lock_pitch = true;
        config.save(&path).await.unwrap();

        let loaded = AppConfig::load(&path).await.unwrap();
        assert_eq!(loaded, config);
    }
}
