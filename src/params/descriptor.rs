//! Parameter descriptor types
//!
//! One [`ParameterDescriptor`] per NRPN: identity, range, display hints and
//! the location of the value inside the patch dump.

use anyhow::{bail, Context, Result};
use std::fmt;

/// How a value is rendered for display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayFormat {
    /// Plain integer
    Raw,
    /// Index into the descriptor's labels
    Named,
    /// Integer with a trailing `%`
    Percent,
    /// Signed integer with an explicit `+`
    Bipolar,
}

impl DisplayFormat {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim() {
            "" | "raw" => Ok(DisplayFormat::Raw),
            "named" => Ok(DisplayFormat::Named),
            "percent" => Ok(DisplayFormat::Percent),
            "bipolar" => Ok(DisplayFormat::Bipolar),
            other => bail!("Unknown display format: {}", other),
        }
    }
}

/// Editor role of a parameter (what kind of control edits it)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamRole {
    Knob,
    Box,
    Button,
}

impl ParamRole {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim() {
            "knob" | "slider" => Ok(ParamRole::Knob),
            "box" => Ok(ParamRole::Box),
            "button" => Ok(ParamRole::Button),
            other => bail!("Unknown parameter role: {}", other),
        }
    }
}

/// Location of a value inside the 432-byte patch block
///
/// Every byte of a sysex body is 7-bit, so a `Byte` field carries 7 bits
/// and a `Word` field carries 14 bits split MSB first over two bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysexField {
    Byte,
    Word,
    /// `width` bits starting at bit `shift` of a single byte
    Bits { shift: u8, width: u8 },
}

impl SysexField {
    /// Parse a field spec string like "byte", "word", "bits=2:3"
    pub fn parse(spec: &str) -> Result<Self> {
        let spec = spec.trim();

        if spec == "byte" {
            Ok(SysexField::Byte)
        } else if spec == "word" {
            Ok(SysexField::Word)
        } else if let Some(bits) = spec.strip_prefix("bits=") {
            let (shift, width) = bits
                .split_once(':')
                .with_context(|| format!("Invalid bit range: {}", spec))?;
            let shift = shift
                .parse::<u8>()
                .with_context(|| format!("Invalid bit shift: {}", spec))?;
            let width = width
                .parse::<u8>()
                .with_context(|| format!("Invalid bit width: {}", spec))?;
            if width == 0 || shift.checked_add(width).map_or(true, |end| end > 7) {
                bail!("Bit range {} does not fit a 7-bit byte", spec);
            }
            Ok(SysexField::Bits { shift, width })
        } else {
            bail!("Unknown sysex field format: {}", spec);
        }
    }

    /// Number of value bits the field can carry
    pub fn bit_width(&self) -> u32 {
        match *self {
            SysexField::Byte => 7,
            SysexField::Word => 14,
            SysexField::Bits { width, .. } => width as u32,
        }
    }

    /// Number of block bytes the field touches
    pub fn byte_len(&self) -> usize {
        match self {
            SysexField::Word => 2,
            _ => 1,
        }
    }

    /// Mask of the bits used within each touched byte
    pub fn byte_mask(&self) -> u8 {
        match *self {
            SysexField::Byte | SysexField::Word => 0x7F,
            SysexField::Bits { shift, width } => (((1u16 << width) - 1) << shift) as u8,
        }
    }
}

/// Semantic tags consumed by higher-level logic (randomizer, host API)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParamFlags {
    pub mod_level: bool,
    pub mod_offset: bool,
    pub matrix_source: bool,
    pub matrix_dest: bool,
    pub meta: bool,
}

impl ParamFlags {
    /// Parse a `|`-separated flag list like "mod_level|meta"
    pub fn parse(s: &str) -> Result<Self> {
        let mut flags = ParamFlags::default();
        for flag in s.split('|').map(str::trim).filter(|f| !f.is_empty()) {
            match flag {
                "mod_level" => flags.mod_level = true,
                "mod_offset" => flags.mod_offset = true,
                "matrix_source" => flags.matrix_source = true,
                "matrix_dest" => flags.matrix_dest = true,
                "meta" => flags.meta = true,
                other => bail!("Unknown parameter flag: {}", other),
            }
        }
        Ok(flags)
    }
}

/// Immutable per-parameter metadata
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterDescriptor {
    pub nrpn: u16,
    pub name: String,
    pub role: ParamRole,
    pub display: DisplayFormat,
    pub min: i32,
    pub max: i32,
    pub default: i32,
    pub sysex_offset: usize,
    pub sysex_field: SysexField,
    pub flags: ParamFlags,
    pub labels: Vec<String>,
}

impl ParameterDescriptor {
    pub fn clamp(&self, value: i32) -> i32 {
        value.clamp(self.min, self.max)
    }

    pub fn contains(&self, value: i32) -> bool {
        (self.min..=self.max).contains(&value)
    }

    pub fn is_signed(&self) -> bool {
        self.min < 0
    }

    /// Number of distinct values (host "steps")
    pub fn num_steps(&self) -> u32 {
        let span = i64::from(self.max) - i64::from(self.min) + 1;
        u32::try_from(span.max(0)).unwrap_or(u32::MAX)
    }

    /// Map a value to 0.0..=1.0
    pub fn normalize(&self, value: i32) -> f32 {
        if self.max == self.min {
            return 0.0;
        }
        (self.clamp(value) - self.min) as f32 / (self.max - self.min) as f32
    }

    /// Map 0.0..=1.0 back to the nearest integer value
    pub fn denormalize(&self, normalized: f32) -> i32 {
        let span = (self.max - self.min) as f32;
        let offset = (normalized.clamp(0.0, 1.0) * span).round() as i32;
        self.clamp(self.min + offset)
    }

    /// Label for `value` if this descriptor has named items
    pub fn label(&self, value: i32) -> Option<&str> {
        let idx = usize::try_from(value - self.min).ok()?;
        self.labels.get(idx).map(String::as_str)
    }

    /// Human readable text for `value`
    pub fn format_value(&self, value: i32) -> String {
        match self.display {
            DisplayFormat::Named => self
                .label(value)
                .map(str::to_string)
                .unwrap_or_else(|| value.to_string()),
            DisplayFormat::Percent => format!("{}%", value),
            DisplayFormat::Bipolar if value > 0 => format!("+{}", value),
            DisplayFormat::Bipolar | DisplayFormat::Raw => value.to_string(),
        }
    }
}

impl fmt::Display for ParameterDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "NRPN {} '{}' [{}..={}] @{}",
            self.nrpn, self.name, self.min, self.max, self.sysex_offset
        )
    }
}
