//! Descriptor table loading
//!
//! Parses `docs/micron-params.csv` (or a user supplied CSV with the same
//! columns) into an immutable [`DescriptorTable`]. The sysex layout of the
//! patch dump is device specific, so the table is data rather than code.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tracing::info;

use super::descriptor::{DisplayFormat, ParamFlags, ParamRole, ParameterDescriptor, SysexField};
use crate::codec::sysex::{BLOCK_LEN, PARAMS_START};
use crate::error::SyncError;

/// Highest NRPN number addressable with two 7-bit bytes
pub const MAX_NRPN: u16 = 0x3FFF;

/// One CSV row
#[derive(Debug, Clone, Deserialize)]
struct DescriptorRow {
    nrpn: u16,
    name: String,
    role: String,
    display: String,
    min: i32,
    max: i32,
    default: i32,
    sysex_offset: usize,
    sysex_field: String,
    #[serde(default)]
    flags: String,
    #[serde(default)]
    labels: String,
}

impl DescriptorRow {
    fn into_descriptor(self) -> Result<ParameterDescriptor> {
        let labels = if self.labels.trim().is_empty() {
            Vec::new()
        } else {
            self.labels.split(';').map(|l| l.trim().to_string()).collect()
        };

        Ok(ParameterDescriptor {
            nrpn: self.nrpn,
            role: ParamRole::parse(&self.role)?,
            display: DisplayFormat::parse(&self.display)?,
            min: self.min,
            max: self.max,
            default: self.default,
            sysex_offset: self.sysex_offset,
            sysex_field: SysexField::parse(&self.sysex_field)?,
            flags: ParamFlags::parse(&self.flags)?,
            labels,
            name: self.name,
        })
    }
}

/// Immutable, validated set of parameter descriptors
///
/// Row order defines the flat host parameter index.
#[derive(Debug, Clone)]
pub struct DescriptorTable {
    descriptors: Vec<ParameterDescriptor>,
    index_by_nrpn: HashMap<u16, usize>,
    /// Host indices sorted by ascending NRPN
    nrpn_order: Vec<usize>,
}

impl DescriptorTable {
    /// Build a table from descriptors, validating ranges and the sysex layout
    pub fn from_descriptors(descriptors: Vec<ParameterDescriptor>) -> Result<Self, SyncError> {
        let mut index_by_nrpn = HashMap::with_capacity(descriptors.len());
        let mut occupied = [0u8; BLOCK_LEN];

        for (idx, d) in descriptors.iter().enumerate() {
            if d.nrpn > MAX_NRPN {
                return Err(invalid(d, "NRPN exceeds 14 bits"));
            }
            if index_by_nrpn.insert(d.nrpn, idx).is_some() {
                return Err(invalid(d, "duplicate NRPN"));
            }
            if d.min > d.max || !d.contains(d.default) {
                return Err(invalid(d, "default outside min..=max"));
            }

            let bits = d.sysex_field.bit_width();
            let fits = if d.is_signed() {
                d.min >= -(1 << (bits - 1)) && d.max < (1 << (bits - 1))
            } else {
                d.max < (1 << bits)
            };
            if !fits {
                return Err(invalid(d, "range does not fit the sysex field"));
            }
            if d.display == DisplayFormat::Named && d.labels.len() != d.num_steps() as usize {
                return Err(invalid(d, "label count does not match range"));
            }

            let end = d.sysex_offset.saturating_add(d.sysex_field.byte_len());
            if d.sysex_offset < PARAMS_START || end > BLOCK_LEN - 1 {
                return Err(invalid(d, "sysex field outside the parameter region"));
            }
            let mask = d.sysex_field.byte_mask();
            for byte in &mut occupied[d.sysex_offset..end] {
                if *byte & mask != 0 {
                    return Err(invalid(d, "sysex field overlaps another parameter"));
                }
                *byte |= mask;
            }
        }

        let mut nrpn_order: Vec<usize> = (0..descriptors.len()).collect();
        nrpn_order.sort_by_key(|&i| descriptors[i].nrpn);

        Ok(Self {
            descriptors,
            index_by_nrpn,
            nrpn_order,
        })
    }

    /// Load descriptors from a CSV file
    pub async fn load_from_csv(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let csv_content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read CSV file: {}", path.display()))?;

        Self::load_from_string(&csv_content)
            .with_context(|| format!("Invalid parameter table: {}", path.display()))
    }

    /// Load from a CSV string
    pub fn load_from_string(csv_content: &str) -> Result<Self> {
        let mut reader = csv::Reader::from_reader(csv_content.as_bytes());
        let mut descriptors = Vec::new();

        for (line, result) in reader.deserialize::<DescriptorRow>().enumerate() {
            let row = result.with_context(|| format!("Failed to parse CSV row {}", line + 1))?;
            let nrpn = row.nrpn;
            let descriptor = row
                .into_descriptor()
                .with_context(|| format!("Invalid descriptor for NRPN {}", nrpn))?;
            descriptors.push(descriptor);
        }

        let table = Self::from_descriptors(descriptors)?;
        info!("Loaded {} parameter descriptors", table.len());
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Descriptor by host index
    pub fn get(&self, index: usize) -> Option<&ParameterDescriptor> {
        self.descriptors.get(index)
    }

    /// Descriptor by NRPN
    pub fn by_nrpn(&self, nrpn: u16) -> Option<&ParameterDescriptor> {
        self.index_of(nrpn).map(|idx| &self.descriptors[idx])
    }

    /// Host index of an NRPN
    pub fn index_of(&self, nrpn: u16) -> Option<usize> {
        self.index_by_nrpn.get(&nrpn).copied()
    }

    /// Descriptors in host index order
    pub fn iter(&self) -> impl Iterator<Item = &ParameterDescriptor> {
        self.descriptors.iter()
    }

    /// `(host index, descriptor)` pairs in ascending NRPN order
    pub fn ascending_nrpn(&self) -> impl Iterator<Item = (usize, &ParameterDescriptor)> {
        self.nrpn_order.iter().map(|&i| (i, &self.descriptors[i]))
    }
}

fn invalid(d: &ParameterDescriptor, reason: &str) -> SyncError {
    SyncError::InvalidTable(format!("{}: {}", d, reason))
}

/// Built-in Micron table
pub const DEFAULT_CSV: &str = include_str!("../../docs/micron-params.csv");

static DEFAULT_TABLE: OnceLock<Arc<DescriptorTable>> = OnceLock::new();

/// The built-in descriptor table (parsed once)
pub fn default_table() -> Result<Arc<DescriptorTable>> {
    if let Some(table) = DEFAULT_TABLE.get() {
        return Ok(table.clone());
    }

    let table = Arc::new(DescriptorTable::load_from_string(DEFAULT_CSV)?);
    // Ignore error if another thread set it first
    let _ = DEFAULT_TABLE.set(table.clone());
    Ok(table)
}

/// Load the table named in configuration, falling back to the built-in one
pub async fn load_table(path: Option<&Path>) -> Result<Arc<DescriptorTable>> {
    match path {
        Some(path) => Ok(Arc::new(DescriptorTable::load_from_csv(path).await?)),
        None => default_table(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "nrpn,name,role,display,min,max,default,sysex_offset,sysex_field,flags,labels\n";

    #[test]
    fn test_load_default_table() {
        let table = default_table().unwrap();
        assert!(table.len() > 250);

        let poly = table.by_nrpn(512).unwrap();
        assert_eq!(poly.name, "poly");
        assert_eq!(poly.role, ParamRole::Box);
        assert_eq!(poly.label(1), Some("poly"));

        let fx1 = table.by_nrpn(800).unwrap();
        assert_eq!(fx1.max, 6);
        assert!(fx1.flags.meta);

        let level = table.by_nrpn(694).unwrap();
        assert!(level.flags.mod_level);
        assert_eq!(level.min, -1000);
    }

    #[test]
    fn test_ascending_order() {
        let table = default_table().unwrap();
        let nrpns: Vec<u16> = table.ascending_nrpn().map(|(_, d)| d.nrpn).collect();
        let mut sorted = nrpns.clone();
        sorted.sort_unstable();
        assert_eq!(nrpns, sorted);
        assert_eq!(nrpns.len(), table.len());
    }

    #[test]
    fn test_index_lookup() {
        let table = default_table().unwrap();
        let idx = table.index_of(800).unwrap();
        assert_eq!(table.get(idx).unwrap().nrpn, 800);
        assert!(table.index_of(9999).is_none());
    }

    #[test]
    fn test_custom_table() {
        let csv = format!(
            "{}10,level,knob,percent,0,100,50,24,byte,,\n11,mode,box,named,0,2,0,25,bits=0:2,meta,a;b;c\n",
            HEADER
        );
        let table = DescriptorTable::load_from_string(&csv).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.by_nrpn(11).unwrap().labels, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_rejects_duplicate_nrpn() {
        let csv = format!(
            "{}10,a,knob,raw,0,10,0,24,byte,,\n10,b,knob,raw,0,10,0,25,byte,,\n",
            HEADER
        );
        assert!(DescriptorTable::load_from_string(&csv).is_err());
    }

    #[test]
    fn test_rejects_overlapping_fields() {
        let csv = format!(
            "{}10,a,knob,raw,0,1000,0,24,word,,\n11,b,knob,raw,0,10,0,25,byte,,\n",
            HEADER
        );
        assert!(DescriptorTable::load_from_string(&csv).is_err());

        // Disjoint bit ranges may share a byte
        let csv = format!(
            "{}10,a,button,raw,0,1,0,24,bits=0:1,,\n11,b,button,raw,0,1,0,24,bits=1:1,,\n",
            HEADER
        );
        assert!(DescriptorTable::load_from_string(&csv).is_ok());
    }

    #[test]
    fn test_rejects_unrepresentable_range() {
        // -100 needs 8 bits in two's complement
        let csv = format!("{}10,a,knob,bipolar,-100,100,0,24,byte,,\n", HEADER);
        assert!(DescriptorTable::load_from_string(&csv).is_err());
    }

    #[test]
    fn test_rejects_extreme_ranges_without_panicking() {
        let csv = format!(
            "{}10,a,box,named,-2147483648,2147483647,0,24,word,,x;y\n",
            HEADER
        );
        assert!(DescriptorTable::load_from_string(&csv).is_err());

        let csv = format!("{}10,a,knob,raw,0,10,0,24,bits=200:100,,\n", HEADER);
        assert!(DescriptorTable::load_from_string(&csv).is_err());
    }

    #[test]
    fn test_rejects_header_region() {
        let csv = format!("{}10,a,knob,raw,0,10,0,3,byte,,\n", HEADER);
        assert!(DescriptorTable::load_from_string(&csv).is_err());
    }
}
