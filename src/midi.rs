//! MIDI message classification
//!
//! Only the messages the sync engine reacts to get their own variant;
//! everything else is carried through untouched.

use std::fmt;

/// Inbound message as seen by the sync engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MidiMessage {
    /// Control Change: channel (0-15), cc (0-127), value (0-127)
    ControlChange { channel: u8, cc: u8, value: u8 },

    /// Program Change: channel (0-15), program (0-127)
    ProgramChange { channel: u8, program: u8 },

    /// Complete system exclusive message, `F0` and `F7` included
    SysEx { data: Vec<u8> },

    /// Single-byte real-time message (clock, start, stop, ...)
    Realtime { status: u8 },

    /// Any other well-formed message
    Other { data: Vec<u8> },
}

impl MidiMessage {
    /// Parse one complete message
    pub fn parse(data: &[u8]) -> Option<Self> {
        let &status = data.first()?;

        // Running status is not reconstructed
        if status < 0x80 {
            return None;
        }

        if is_realtime(status) {
            return Some(MidiMessage::Realtime { status });
        }

        if status == 0xF0 {
            let end = data.iter().position(|&b| b == 0xF7)?;
            return Some(MidiMessage::SysEx {
                data: data[..=end].to_vec(),
            });
        }

        let len = message_len(status)?;
        if data.len() < len {
            return None;
        }

        let channel = status & 0x0F;
        match status & 0xF0 {
            0xB0 => Some(MidiMessage::ControlChange {
                channel,
                cc: data[1] & 0x7F,
                value: data[2] & 0x7F,
            }),
            0xC0 => Some(MidiMessage::ProgramChange {
                channel,
                program: data[1] & 0x7F,
            }),
            _ => Some(MidiMessage::Other {
                data: data[..len].to_vec(),
            }),
        }
    }

    /// Encode the message to MIDI bytes
    pub fn encode(&self) -> Vec<u8> {
        match *self {
            MidiMessage::ControlChange { channel, cc, value } => {
                vec![0xB0 | (channel & 0x0F), cc & 0x7F, value & 0x7F]
            }
            MidiMessage::ProgramChange { channel, program } => {
                vec![0xC0 | (channel & 0x0F), program & 0x7F]
            }
            MidiMessage::SysEx { ref data } | MidiMessage::Other { ref data } => data.clone(),
            MidiMessage::Realtime { status } => vec![status],
        }
    }

    /// Channel of channel messages (0-15), None for system messages
    pub fn channel(&self) -> Option<u8> {
        match *self {
            MidiMessage::ControlChange { channel, .. } | MidiMessage::ProgramChange { channel, .. } => {
                Some(channel)
            }
            MidiMessage::Other { ref data } => data
                .first()
                .filter(|&&s| s < 0xF0)
                .map(|s| s & 0x0F),
            _ => None,
        }
    }
}

impl fmt::Display for MidiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            MidiMessage::ControlChange { channel, cc, value } => {
                write!(f, "CC ch:{} cc:{} v:{}", channel + 1, cc, value)
            }
            MidiMessage::ProgramChange { channel, program } => {
                write!(f, "ProgramChange ch:{} p:{}", channel + 1, program)
            }
            MidiMessage::SysEx { ref data } => write!(f, "SysEx {} bytes", data.len()),
            MidiMessage::Realtime { status } => write!(f, "Realtime {:02X}", status),
            MidiMessage::Other { ref data } => write!(f, "{}", format_hex(data)),
        }
    }
}

/// System real-time status bytes (`F8`..=`FF`)
pub fn is_realtime(status: u8) -> bool {
    status >= 0xF8
}

/// Length in bytes of a non-sysex message with this status
fn message_len(status: u8) -> Option<usize> {
    match status {
        0x80..=0xBF | 0xE0..=0xEF => Some(3),
        0xC0..=0xDF => Some(2),
        0xF1 | 0xF3 => Some(2),
        0xF2 => Some(3),
        0xF6 => Some(1),
        _ => None,
    }
}

/// Format MIDI bytes as hex string for debugging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_change() {
        let msg = MidiMessage::parse(&[0xB2, 99, 6]).unwrap();
        assert_eq!(msg, MidiMessage::ControlChange { channel: 2, cc: 99, value: 6 });
        assert_eq!(msg.channel(), Some(2));
        assert_eq!(msg.encode(), vec![0xB2, 99, 6]);
    }

    #[test]
    fn test_program_change() {
        let msg = MidiMessage::parse(&[0xC0, 17]).unwrap();
        assert_eq!(msg, MidiMessage::ProgramChange { channel: 0, program: 17 });
    }

    #[test]
    fn test_sysex_keeps_framing() {
        let msg = MidiMessage::parse(&[0xF0, 0x00, 0x00, 0x0E, 0xF7]).unwrap();
        assert_eq!(msg.encode(), vec![0xF0, 0x00, 0x00, 0x0E, 0xF7]);

        // Unterminated
        assert!(MidiMessage::parse(&[0xF0, 0x00]).is_none());
    }

    #[test]
    fn test_other_messages_pass_through() {
        let note = MidiMessage::parse(&[0x91, 60, 100]).unwrap();
        assert_eq!(note.encode(), vec![0x91, 60, 100]);
        assert_eq!(note.channel(), Some(1));

        assert_eq!(MidiMessage::parse(&[0xF8]), Some(MidiMessage::Realtime { status: 0xF8 }));
        assert!(MidiMessage::parse(&[0x40, 0x00]).is_none());
        assert!(MidiMessage::parse(&[0x90, 60]).is_none());
    }

    #[test]
    fn test_format_hex() {
        assert_eq!(format_hex(&[0xF0, 0x0E, 0xF7]), "F0 0E F7");
    }
}
