//! NRPN encoding and reassembly
//!
//! One parameter write is four Control Change messages on the same channel:
//! CC99 (number MSB), CC98 (number LSB), CC6 (value MSB), CC38 (value LSB).

use tracing::{debug, trace, warn};

use super::sysex::{from_field_bits, to_field_bits};
use crate::error::SyncError;
use crate::params::DescriptorTable;

pub const CC_NRPN_MSB: u8 = 99;
pub const CC_NRPN_LSB: u8 = 98;
pub const CC_DATA_MSB: u8 = 6;
pub const CC_DATA_LSB: u8 = 38;

/// Bits carried by an NRPN value
pub const VALUE_BITS: u32 = 14;

/// Length of each CC message in an encoded group
pub const MESSAGE_LEN: usize = 3;

/// The four CC messages for one parameter write
///
/// Negative values are sent as 14-bit two's complement.
pub fn encode(channel: u8, nrpn: u16, value: i32) -> [[u8; 3]; 4] {
    let status = 0xB0 | (channel & 0x0F);
    let raw = to_field_bits(value, VALUE_BITS);
    [
        [status, CC_NRPN_MSB, ((nrpn >> 7) & 0x7F) as u8],
        [status, CC_NRPN_LSB, (nrpn & 0x7F) as u8],
        [status, CC_DATA_MSB, ((raw >> 7) & 0x7F) as u8],
        [status, CC_DATA_LSB, (raw & 0x7F) as u8],
    ]
}

/// Encoded group flattened into one buffer
pub fn encode_bytes(channel: u8, nrpn: u16, value: i32) -> Vec<u8> {
    encode(channel, nrpn, value).concat()
}

/// A complete group, not yet checked against any table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NrpnEvent {
    pub channel: u8,
    pub nrpn: u16,
    /// 14-bit raw value as received
    pub raw_value: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Idle,
    NumberMsb { msb: u8 },
    Number { nrpn: u16 },
    ValueMsb { nrpn: u16, msb: u8 },
}

/// Reassembles CC streams into [`NrpnEvent`]s
///
/// A partial group is held until its fourth message arrives. A fresh CC99
/// mid-group replaces the partial; messages arriving out of field order are
/// dropped.
#[derive(Debug)]
pub struct NrpnDecoder {
    channel: u8,
    stage: Stage,
    discarded: u64,
}

impl Default for NrpnDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl NrpnDecoder {
    pub fn new() -> Self {
        Self {
            channel: 0,
            stage: Stage::Idle,
            discarded: 0,
        }
    }

    /// Feed one Control Change; returns an event when a group completes
    pub fn feed(&mut self, channel: u8, cc: u8, value: u8) -> Option<NrpnEvent> {
        let value = value & 0x7F;

        if cc == CC_NRPN_MSB {
            if self.stage != Stage::Idle {
                self.discard(channel);
            }
            self.channel = channel;
            self.stage = Stage::NumberMsb { msb: value };
            return None;
        }

        if !matches!(cc, CC_NRPN_LSB | CC_DATA_MSB | CC_DATA_LSB) {
            return None;
        }
        if self.stage != Stage::Idle && channel != self.channel {
            trace!("Ignoring CC{} on channel {} during a channel {} group", cc, channel, self.channel);
            return None;
        }

        match (self.stage, cc) {
            (Stage::NumberMsb { msb }, CC_NRPN_LSB) => {
                self.stage = Stage::Number {
                    nrpn: ((msb as u16) << 7) | value as u16,
                };
                None
            }
            (Stage::Number { nrpn }, CC_DATA_MSB) => {
                self.stage = Stage::ValueMsb { nrpn, msb: value };
                None
            }
            (Stage::ValueMsb { nrpn, msb }, CC_DATA_LSB) => {
                self.stage = Stage::Idle;
                let event = NrpnEvent {
                    channel,
                    nrpn,
                    raw_value: ((msb as u16) << 7) | value as u16,
                };
                trace!("NRPN {} raw {} on channel {}", event.nrpn, event.raw_value, channel + 1);
                Some(event)
            }
            (stage, cc) => {
                trace!("Dropping out-of-order CC{} in {:?}", cc, stage);
                None
            }
        }
    }

    /// Number of partial groups thrown away so far
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Forget any partial group
    pub fn reset(&mut self) {
        self.stage = Stage::Idle;
    }

    fn discard(&mut self, channel: u8) {
        let nrpn = match self.stage {
            Stage::Number { nrpn } | Stage::ValueMsb { nrpn, .. } => Some(nrpn),
            _ => None,
        };
        self.discarded += 1;
        debug!(
            "{} on channel {}",
            SyncError::IncompletePartialUpdate { nrpn },
            channel + 1
        );
    }
}

/// Check an event against the table, yielding `(nrpn, value)`
///
/// Unknown numbers and out-of-range values are dropped with a warning.
pub fn resolve(table: &DescriptorTable, event: &NrpnEvent) -> Option<(u16, i32)> {
    let Some(descriptor) = table.by_nrpn(event.nrpn) else {
        warn!("{}", SyncError::UnknownNrpn(event.nrpn));
        return None;
    };

    let value = from_field_bits(event.raw_value as u32, VALUE_BITS, descriptor.is_signed());
    if !descriptor.contains(value) {
        warn!(
            "{}",
            SyncError::OutOfRangeValue {
                nrpn: event.nrpn,
                value,
                min: descriptor.min,
                max: descriptor.max,
            }
        );
        return None;
    }
    Some((event.nrpn, value))
}
