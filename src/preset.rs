//! Preset persistence
//!
//! The binary state blob is what a host stores with a session:
//!
//! | bytes | content                                   |
//! |-------|-------------------------------------------|
//! | 432   | patch dump                                |
//! | 4     | output channel, u32 LE                    |
//! | 80    | input port name, NUL padded               |
//! | 80    | output port name, NUL padded              |
//! | 4     | bank, u32 LE                              |
//! | 4     | patch, u32 LE                             |
//!
//! Files ending in `.json` hold the same data with the dump as hex.

use anyhow::{Context, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::codec::sysex::{name_from_field, BLOCK_LEN, NAME_OFFSET};
use crate::error::SyncError;
use crate::params::PROGRAM_NAME_LEN;

/// Space reserved for each port name, terminator included
pub const PORT_NAME_LEN: usize = 80;
/// Size of the binary state blob
pub const STATE_LEN: usize = BLOCK_LEN + 4 + 2 * PORT_NAME_LEN + 4 + 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preset {
    /// Authoritative patch data
    pub raw_sysex: [u8; BLOCK_LEN],
    /// 0-15
    pub channel: u8,
    pub input_port: String,
    pub output_port: String,
    pub bank: u32,
    pub patch: u32,
}

impl Preset {
    /// Program name stored in the dump
    pub fn program_name(&self) -> String {
        name_from_field(&self.raw_sysex[NAME_OFFSET..NAME_OFFSET + PROGRAM_NAME_LEN])
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(STATE_LEN);
        buf.put_slice(&self.raw_sysex);
        buf.put_u32_le(self.channel as u32);
        put_name(&mut buf, &self.input_port);
        put_name(&mut buf, &self.output_port);
        buf.put_u32_le(self.bank);
        buf.put_u32_le(self.patch);
        buf.freeze()
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, SyncError> {
        if data.len() != STATE_LEN {
            return Err(SyncError::MalformedState(format!(
                "expected {} bytes, got {}",
                STATE_LEN,
                data.len()
            )));
        }

        let mut buf = data;
        let mut raw_sysex = [0u8; BLOCK_LEN];
        buf.copy_to_slice(&mut raw_sysex);

        let channel = buf.get_u32_le();
        if channel > 15 {
            return Err(SyncError::MalformedState(format!("channel {} out of range", channel)));
        }
        let input_port = get_name(&mut buf);
        let output_port = get_name(&mut buf);
        let bank = buf.get_u32_le();
        let patch = buf.get_u32_le();

        Ok(Self {
            raw_sysex,
            channel: channel as u8,
            input_port,
            output_port,
            bank,
            patch,
        })
    }

    /// Write to `path`, as JSON when the extension is `.json`
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let contents = if is_json(path) {
            serde_json::to_vec_pretty(&PresetFile::from(self)).context("Failed to serialize preset")?
        } else {
            self.to_bytes().to_vec()
        };

        tokio::fs::write(path, contents)
            .await
            .with_context(|| format!("Failed to write preset: {}", path.display()))?;
        debug!("Preset saved to {}", path.display());
        Ok(())
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read preset: {}", path.display()))?;

        let preset = if is_json(path) {
            let file: PresetFile = serde_json::from_slice(&contents)
                .with_context(|| format!("Failed to parse preset JSON: {}", path.display()))?;
            file.try_into()?
        } else {
            Self::from_bytes(&contents)?
        };
        debug!("Preset '{}' loaded from {}", preset.program_name(), path.display());
        Ok(preset)
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

fn put_name(buf: &mut BytesMut, name: &str) {
    let mut field = [0u8; PORT_NAME_LEN];
    let mut len = name.len().min(PORT_NAME_LEN - 1);
    while !name.is_char_boundary(len) {
        len -= 1;
    }
    field[..len].copy_from_slice(&name.as_bytes()[..len]);
    buf.put_slice(&field);
}

fn get_name(buf: &mut &[u8]) -> String {
    let mut field = [0u8; PORT_NAME_LEN];
    buf.copy_to_slice(&mut field);
    let end = field.iter().position(|&b| b == 0).unwrap_or(PORT_NAME_LEN);
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// JSON form of a preset
#[derive(Debug, Serialize, Deserialize)]
struct PresetFile {
    program_name: String,
    sysex: String,
    channel: u8,
    #[serde(default)]
    input_port: String,
    #[serde(default)]
    output_port: String,
    #[serde(default)]
    bank: u32,
    #[serde(default)]
    patch: u32,
}

impl From<&Preset> for PresetFile {
    fn from(preset: &Preset) -> Self {
        Self {
            program_name: preset.program_name(),
            sysex: hex::encode_upper(preset.raw_sysex),
            channel: preset.channel,
            input_port: preset.input_port.clone(),
            output_port: preset.output_port.clone(),
            bank: preset.bank,
            patch: preset.patch,
        }
    }
}

impl TryFrom<PresetFile> for Preset {
    type Error = SyncError;

    fn try_from(file: PresetFile) -> Result<Self, SyncError> {
        let bytes = hex::decode(file.sysex.trim())
            .map_err(|e| SyncError::MalformedState(format!("sysex is not hex: {}", e)))?;
        let raw_sysex: [u8; BLOCK_LEN] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| SyncError::MalformedState(format!("sysex has {} bytes", b.len())))?;
        if file.channel > 15 {
            return Err(SyncError::MalformedState(format!("channel {} out of range", file.channel)));
        }

        Ok(Self {
            raw_sysex,
            channel: file.channel,
            input_port: file.input_port,
            output_port: file.output_port,
            bank: file.bank,
            patch: file.patch,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::sysex::{encode_patch, SysexFraming};
    use crate::params::{default_table, ParameterStore};

    fn preset() -> Preset {
        let store = ParameterStore::new(default_table().unwrap());
        store.set(512, 0).unwrap();
        store.set_program_name("Wobble");
        Preset {
            raw_sysex: encode_patch(&store, &SysexFraming::default()),
            channel: 9,
            input_port: "Micron In".to_string(),
            output_port: "Micron Out".to_string(),
            bank: 2,
            patch: 17,
        }
    }

    #[test]
    fn test_blob_layout() {
        let bytes = preset().to_bytes();
        assert_eq!(bytes.len(), STATE_LEN);
        assert_eq!(STATE_LEN, 604);
        assert_eq!(&bytes[BLOCK_LEN..BLOCK_LEN + 4], &[9, 0, 0, 0]);
        assert_eq!(&bytes[BLOCK_LEN + 4..BLOCK_LEN + 13], b"Micron In");
        assert_eq!(bytes[BLOCK_LEN + 13], 0);
    }

    #[test]
    fn test_blob_round_trip() {
        let original = preset();
        let restored = Preset::from_bytes(&original.to_bytes()).unwrap();
        assert_eq!(restored, original);
        assert_eq!(restored.program_name(), "Wobble");
    }

    #[test]
    fn test_rejects_bad_blobs() {
        let bytes = preset().to_bytes();
        assert!(Preset::from_bytes(&bytes[..STATE_LEN - 1]).is_err());

        let mut bad_channel = bytes.to_vec();
        bad_channel[BLOCK_LEN] = 16;
        assert!(matches!(
            Preset::from_bytes(&bad_channel),
            Err(SyncError::MalformedState(_))
        ));
    }

    #[test]
    fn test_long_port_name_is_truncated() {
        let mut long = preset();
        long.output_port = "é".repeat(60);
        let restored = Preset::from_bytes(&long.to_bytes()).unwrap();
        assert_eq!(restored.output_port, "é".repeat(39));
    }

    #[tokio::test]
    async fn test_file_round_trip_binary_and_json() {
        let dir = tempfile::tempdir().unwrap();
        let original = preset();

        for name in ["state.mnau", "state.json"] {
            let path = dir.path().join(name);
            original.save(&path).await.unwrap();
            let loaded = Preset::load(&path).await.unwrap();
            assert_eq!(loaded, original);
        }
    }
}
