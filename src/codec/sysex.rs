//! Patch dump codec
//!
//! A Micron patch travels as one 432-byte system exclusive message:
//!
//! ```text
//! [0]        F0
//! [1..]      manufacturer id, model id, opcode
//! [8..22]    program name, 7-bit ASCII, zero padded
//! [24..431]  parameter fields (see the descriptor table)
//! [431]      F7
//! ```
//!
//! Field positions come from the descriptor table, so the codec itself knows
//! nothing about individual parameters.

use tracing::{debug, trace, warn};

use crate::error::{Result, SyncError};
use crate::midi::format_hex;
use crate::params::{DescriptorTable, ParameterStore, SysexField, PROGRAM_NAME_LEN};

/// Total length of a patch dump, framing included
pub const BLOCK_LEN: usize = 432;
/// Offset of the program name
pub const NAME_OFFSET: usize = 8;
/// First byte available to parameter fields
pub const PARAMS_START: usize = 24;

pub const SYSEX_START: u8 = 0xF0;
pub const SYSEX_END: u8 = 0xF7;

/// Alesis manufacturer id
pub const DEFAULT_MANUFACTURER: [u8; 3] = [0x00, 0x00, 0x0E];
pub const DEFAULT_MODEL: u8 = 0x26;
pub const DEFAULT_DUMP_OPCODE: u8 = 0x01;
pub const DEFAULT_REQUEST_OPCODE: u8 = 0x02;

/// Header bytes identifying the device and the message kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SysexFraming {
    manufacturer: Vec<u8>,
    model: u8,
    dump_opcode: u8,
    request_opcode: u8,
}

impl Default for SysexFraming {
    fn default() -> Self {
        Self {
            manufacturer: DEFAULT_MANUFACTURER.to_vec(),
            model: DEFAULT_MODEL,
            dump_opcode: DEFAULT_DUMP_OPCODE,
            request_opcode: DEFAULT_REQUEST_OPCODE,
        }
    }
}

impl SysexFraming {
    pub fn new(manufacturer: Vec<u8>, model: u8, dump_opcode: u8, request_opcode: u8) -> Result<Self> {
        let framing = Self {
            manufacturer,
            model,
            dump_opcode,
            request_opcode,
        };

        if framing.manufacturer.is_empty() {
            return Err(SyncError::MalformedSysex("empty manufacturer id".into()));
        }
        if framing.header_len() > NAME_OFFSET {
            return Err(SyncError::MalformedSysex(format!(
                "header {} does not fit before the program name",
                format_hex(&framing.header(framing.dump_opcode))
            )));
        }
        let data = framing
            .manufacturer
            .iter()
            .chain([&model, &dump_opcode, &request_opcode]);
        if data.into_iter().any(|&b| b > 0x7F) {
            return Err(SyncError::MalformedSysex("header bytes must be 7-bit".into()));
        }
        Ok(framing)
    }

    pub fn manufacturer(&self) -> &[u8] {
        &self.manufacturer
    }

    pub fn model(&self) -> u8 {
        self.model
    }

    fn header(&self, opcode: u8) -> Vec<u8> {
        let mut header = Vec::with_capacity(self.header_len());
        header.push(SYSEX_START);
        header.extend_from_slice(&self.manufacturer);
        header.push(self.model);
        header.push(opcode);
        header
    }

    fn header_len(&self) -> usize {
        self.manufacturer.len() + 3
    }
}

/// What kind of sysex message a byte buffer holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysexKind {
    PatchDump,
    DumpRequest,
    /// Sysex for another device or an unknown opcode
    Other,
    /// Not a complete sysex message
    NotSysex,
}

/// Recognise a message by its header
pub fn classify(framing: &SysexFraming, bytes: &[u8]) -> SysexKind {
    if bytes.first() != Some(&SYSEX_START) || bytes.last() != Some(&SYSEX_END) || bytes.len() < 2 {
        return SysexKind::NotSysex;
    }
    if bytes.starts_with(&framing.header(framing.dump_opcode)) {
        SysexKind::PatchDump
    } else if bytes.starts_with(&framing.header(framing.request_opcode)) {
        SysexKind::DumpRequest
    } else {
        SysexKind::Other
    }
}

/// Message asking the device to send its current patch
pub fn dump_request(framing: &SysexFraming) -> Vec<u8> {
    let mut message = framing.header(framing.request_opcode);
    message.push(SYSEX_END);
    message
}

/// Values extracted from a dump, not yet applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchImage {
    pub program_name: String,
    /// One value per descriptor, in host index order
    pub values: Vec<i32>,
}

/// Build a complete dump from the store
pub fn encode_patch(store: &ParameterStore, framing: &SysexFraming) -> [u8; BLOCK_LEN] {
    let mut block = [0u8; BLOCK_LEN];

    let header = framing.header(framing.dump_opcode);
    block[..header.len()].copy_from_slice(&header);

    let name = store.program_name();
    let name_field = &mut block[NAME_OFFSET..NAME_OFFSET + PROGRAM_NAME_LEN];
    for (slot, byte) in name_field.iter_mut().zip(name.bytes()) {
        *slot = byte & 0x7F;
    }

    for (descriptor, value) in store.table().iter().zip(store.values()) {
        write_field(&mut block, descriptor.sysex_offset, descriptor.sysex_field, value);
    }

    block[BLOCK_LEN - 1] = SYSEX_END;
    trace!("Encoded patch dump: {}", format_hex(&block[..header.len()]));
    block
}

/// Validate framing and extract every field without touching any store
pub fn parse_patch(table: &DescriptorTable, framing: &SysexFraming, bytes: &[u8]) -> Result<PatchImage> {
    if bytes.len() != BLOCK_LEN {
        return Err(SyncError::MalformedSysex(format!(
            "expected {} bytes, got {}",
            BLOCK_LEN,
            bytes.len()
        )));
    }
    let header = framing.header(framing.dump_opcode);
    if !bytes.starts_with(&header) {
        let shown = &bytes[..header.len().min(bytes.len())];
        return Err(SyncError::MalformedSysex(format!(
            "unexpected header {}",
            format_hex(shown)
        )));
    }
    if bytes[BLOCK_LEN - 1] != SYSEX_END {
        return Err(SyncError::MalformedSysex("missing F7 terminator".into()));
    }
    if let Some(pos) = bytes[1..BLOCK_LEN - 1].iter().position(|&b| b > 0x7F) {
        return Err(SyncError::MalformedSysex(format!(
            "status byte {:02X} inside dump at offset {}",
            bytes[pos + 1],
            pos + 1
        )));
    }

    let name_field = &bytes[NAME_OFFSET..NAME_OFFSET + PROGRAM_NAME_LEN];
    let program_name = name_from_field(name_field);

    let values = table
        .iter()
        .map(|d| read_field(bytes, d.sysex_offset, d.sysex_field, d.is_signed()))
        .collect();

    Ok(PatchImage { program_name, values })
}

/// Apply a dump to the store
///
/// Either every field is applied (clamped) or, on a framing error, nothing
/// is. Callers sharing a store must serialise calls.
pub fn decode_patch(store: &ParameterStore, framing: &SysexFraming, bytes: &[u8]) -> Result<PatchImage> {
    let image = parse_patch(store.table(), framing, bytes)?;

    for (index, &value) in image.values.iter().enumerate() {
        if let Some(descriptor) = store.table().get(index) {
            if !descriptor.contains(value) {
                warn!(
                    "Dump value {} for NRPN {} outside {}..={}, clamping",
                    value, descriptor.nrpn, descriptor.min, descriptor.max
                );
            }
        }
        store.set_by_index(index, value)?;
    }
    store.set_program_name(&image.program_name);

    debug!("Applied patch dump '{}'", image.program_name);
    Ok(image)
}

/// Program name from its fixed-width field
///
/// Only zero padding is stripped; spaces are part of the name.
pub fn name_from_field(field: &[u8]) -> String {
    let end = field.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// Encode `value` as `bits`-wide two's complement
pub(crate) fn to_field_bits(value: i32, bits: u32) -> u32 {
    (value as u32) & ((1u32 << bits) - 1)
}

/// Inverse of [`to_field_bits`]; sign-extends when `signed`
pub(crate) fn from_field_bits(raw: u32, bits: u32, signed: bool) -> i32 {
    let raw = raw & ((1u32 << bits) - 1);
    if signed && raw & (1 << (bits - 1)) != 0 {
        raw as i32 - (1 << bits)
    } else {
        raw as i32
    }
}

fn write_field(block: &mut [u8], offset: usize, field: SysexField, value: i32) {
    let raw = to_field_bits(value, field.bit_width());
    match field {
        SysexField::Byte => block[offset] = raw as u8,
        SysexField::Word => {
            block[offset] = ((raw >> 7) & 0x7F) as u8;
            block[offset + 1] = (raw & 0x7F) as u8;
        }
        SysexField::Bits { shift, .. } => {
            let mask = field.byte_mask();
            block[offset] = (block[offset] & !mask) | (((raw as u8) << shift) & mask);
        }
    }
}

fn read_field(block: &[u8], offset: usize, field: SysexField, signed: bool) -> i32 {
    let raw = match field {
        SysexField::Byte => block[offset] as u32,
        SysexField::Word => ((block[offset] as u32) << 7) | block[offset + 1] as u32,
        SysexField::Bits { shift, .. } => ((block[offset] & field.byte_mask()) >> shift) as u32,
    };
    from_field_bits(raw, field.bit_width(), signed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::default_table;
    use proptest::prelude::*;

    fn store() -> ParameterStore {
        ParameterStore::new(default_table().unwrap())
    }

    #[test]
    fn test_block_framing() {
        let block = encode_patch(&store(), &SysexFraming::default());
        assert_eq!(block.len(), BLOCK_LEN);
        assert_eq!(&block[..6], &[0xF0, 0x00, 0x00, 0x0E, 0x26, 0x01]);
        assert_eq!(block[BLOCK_LEN - 1], 0xF7);
        assert!(block[1..BLOCK_LEN - 1].iter().all(|&b| b < 0x80));
    }

    #[test]
    fn test_round_trip_leaves_store_unchanged() {
        let source = store();
        source.set(800, 2).unwrap();
        source.set(512, 0).unwrap();
        source.set(694, -731).unwrap();
        source.set(583, 42).unwrap();
        source.set_program_name("Bass Drop");
        let framing = SysexFraming::default();
        let block = encode_patch(&source, &framing);

        let target = store();
        decode_patch(&target, &framing, &block).unwrap();
        assert_eq!(target.values(), source.values());
        assert_eq!(target.program_name(), "Bass Drop");

        // Decoding into the same store is a no-op
        source.take_changed();
        decode_patch(&source, &framing, &block).unwrap();
        assert!(source.take_changed().is_empty());
    }

    #[test]
    fn test_padded_program_name_survives_round_trip() {
        let framing = SysexFraming::default();
        for name in ["Pad    ", "  Centered  ", "Fourteen wide "] {
            let source = store();
            assert_eq!(source.set_program_name(name), name);
            let block = encode_patch(&source, &framing);

            let target = store();
            decode_patch(&target, &framing, &block).unwrap();
            assert_eq!(target.program_name(), name);
            assert_eq!(encode_patch(&target, &framing), block);
        }
    }

    #[test]
    fn test_out_of_range_dump_values_are_clamped() {
        let framing = SysexFraming::default();
        let table = default_table().unwrap();
        let descriptor = table.by_nrpn(800).unwrap().clone();
        assert_eq!(descriptor.max, 6);

        let mut block = encode_patch(&store(), &framing);
        write_field(&mut block, descriptor.sysex_offset, descriptor.sysex_field, 7);
        let image = parse_patch(&table, &framing, &block).unwrap();
        assert_eq!(image.values[table.index_of(800).unwrap()], 7);

        let target = store();
        decode_patch(&target, &framing, &block).unwrap();
        assert_eq!(target.get(800), Some(6));
    }

    #[test]
    fn test_wrong_length_changes_nothing() {
        let target = store();
        target.set(800, 3).unwrap();
        target.take_changed();
        let before = target.values();

        let mut block = encode_patch(&store(), &SysexFraming::default()).to_vec();
        block.pop();
        let err = decode_patch(&target, &SysexFraming::default(), &block).unwrap_err();
        assert!(matches!(err, SyncError::MalformedSysex(_)));
        assert_eq!(target.values(), before);
        assert!(target.take_changed().is_empty());
    }

    #[test]
    fn test_framing_mismatch_is_rejected() {
        let framing = SysexFraming::default();
        let good = encode_patch(&store(), &framing);

        let mut bad_header = good;
        bad_header[4] = 0x27;
        assert!(parse_patch(store().table(), &framing, &bad_header).is_err());

        let mut bad_end = good;
        bad_end[BLOCK_LEN - 1] = 0x00;
        assert!(parse_patch(store().table(), &framing, &bad_end).is_err());

        let mut status_inside = good;
        status_inside[100] = 0x90;
        assert!(parse_patch(store().table(), &framing, &status_inside).is_err());
    }

    #[test]
    fn test_classify() {
        let framing = SysexFraming::default();
        let block = encode_patch(&store(), &framing);
        assert_eq!(classify(&framing, &block), SysexKind::PatchDump);
        assert_eq!(classify(&framing, &dump_request(&framing)), SysexKind::DumpRequest);
        assert_eq!(classify(&framing, &[0xF0, 0x43, 0x10, 0xF7]), SysexKind::Other);
        assert_eq!(classify(&framing, &[0xB0, 99, 0]), SysexKind::NotSysex);
    }

    #[test]
    fn test_framing_validation() {
        assert!(SysexFraming::new(vec![0x41], 0x10, 0x12, 0x11).is_ok());
        assert!(SysexFraming::new(vec![], 0x10, 0x12, 0x11).is_err());
        assert!(SysexFraming::new(vec![0, 0, 0, 0, 0], 0x10, 0x12, 0x11).is_err());
        assert!(SysexFraming::new(vec![0x80], 0x10, 0x12, 0x11).is_err());
    }

    #[test]
    fn test_twos_complement_fields() {
        assert_eq!(to_field_bits(-1, 14), 0x3FFF);
        assert_eq!(from_field_bits(0x3FFF, 14, true), -1);
        assert_eq!(from_field_bits(0x3FFF, 14, false), 0x3FFF);
        assert_eq!(from_field_bits(to_field_bits(-64, 7), 7, true), -64);
    }

    proptest! {
        #[test]
        fn prop_round_trip_random_values(seed in prop::collection::vec(any::<i32>(), 300)) {
            let source = store();
            for (index, value) in seed.iter().enumerate().take(source.len()) {
                source.set_by_index(index, *value).unwrap();
            }
            let framing = SysexFraming::default();
            let block = encode_patch(&source, &framing);

            let target = store();
            decode_patch(&target, &framing, &block).unwrap();
            prop_assert_eq!(target.values(), source.values());
        }
    }
}
