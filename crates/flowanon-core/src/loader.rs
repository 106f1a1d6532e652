//! Line-oriented prefix source files
//!
//! Three inputs feed the tries:
//! - public prefixes: the GeoLite2 ASN blocks CSV (`network,asn,organization`),
//!   header skipped, only the first column used
//! - private prefixes: one CIDR per line, no header, `/32` host prefixes skipped
//! - VLAN assignments: `prefix,vlan` with a header, rows with `N/A` skipped
//!
//! All three are read as CSV, so quoted fields are accepted. Blank lines and
//! lines starting with `#` are ignored everywhere.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Trim};

use crate::constants::{MAX_PREFIX_LEN, PUBLIC_TAG};
use crate::prefix::Ipv4Prefix;
use crate::Error;

/// VLAN value marking a private prefix without an assignment
pub const VLAN_NOT_AVAILABLE: &str = "N/A";

/// Prefix-to-VLAN assignments, matched on the exact prefix
pub type VlanMap = HashMap<Ipv4Prefix, u32>;

/// Data rows with their 1-based line numbers
fn data_rows<R: Read>(
    reader: R,
    skip_header: bool,
) -> impl Iterator<Item = crate::Result<(usize, StringRecord)>> {
    ReaderBuilder::new()
        .has_headers(skip_header)
        .comment(Some(b'#'))
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader)
        .into_records()
        .map(|row| -> crate::Result<(usize, StringRecord)> {
            let row = row?;
            let line = row.position().map_or(0, |p| p.line() as usize);
            Ok((line, row))
        })
}

fn at_line(name: &str, line: usize, source: Error) -> Error {
    Error::SourceLine {
        path: name.to_string(),
        line,
        source: Box::new(source),
    }
}

fn prefix_at(row: &StringRecord, name: &str, line: usize) -> crate::Result<Ipv4Prefix> {
    row.get(0)
        .unwrap_or_default()
        .parse()
        .map_err(|e| at_line(name, line, e))
}

/// Parse the public prefix list
pub fn parse_public_prefixes<R: Read>(reader: R, name: &str) -> crate::Result<Vec<Ipv4Prefix>> {
    data_rows(reader, true)
        .map(|row| {
            let (line, row) = row?;
            prefix_at(&row, name, line)
        })
        .collect()
}

/// Parse the private prefix list, dropping host prefixes
pub fn parse_private_prefixes<R: Read>(reader: R, name: &str) -> crate::Result<Vec<Ipv4Prefix>> {
    let mut prefixes = Vec::new();
    for row in data_rows(reader, false) {
        let (line, row) = row?;
        let prefix = prefix_at(&row, name, line)?;
        if prefix.prefix_len() == MAX_PREFIX_LEN {
            continue;
        }
        prefixes.push(prefix);
    }
    Ok(prefixes)
}

/// Parse VLAN assignments for private prefixes
pub fn parse_vlan_map<R: Read>(reader: R, name: &str) -> crate::Result<VlanMap> {
    let mut vlans = VlanMap::new();
    for row in data_rows(reader, true) {
        let (line, row) = row?;
        let vlan = row.get(1).unwrap_or_default();
        if vlan == VLAN_NOT_AVAILABLE {
            continue;
        }

        let prefix = prefix_at(&row, name, line)?;
        let tag: u32 = vlan.parse().map_err(|_| {
            at_line(
                name,
                line,
                Error::InvalidTag {
                    prefix: prefix.to_string(),
                    value: vlan.to_string(),
                },
            )
        })?;
        vlans.insert(prefix, tag);
    }
    Ok(vlans)
}

fn open(path: &Path) -> crate::Result<File> {
    Ok(File::open(path)?)
}

pub fn load_public_prefixes(path: impl AsRef<Path>) -> crate::Result<Vec<Ipv4Prefix>> {
    let path = path.as_ref();
    parse_public_prefixes(open(path)?, &path.display().to_string())
}

pub fn load_private_prefixes(path: impl AsRef<Path>) -> crate::Result<Vec<Ipv4Prefix>> {
    let path = path.as_ref();
    parse_private_prefixes(open(path)?, &path.display().to_string())
}

pub fn load_vlan_map(path: impl AsRef<Path>) -> crate::Result<VlanMap> {
    let path = path.as_ref();
    parse_vlan_map(open(path)?, &path.display().to_string())
}

/// Pair private prefixes with their assigned VLAN, [`PUBLIC_TAG`] when unassigned
pub fn tag_private_prefixes(prefixes: Vec<Ipv4Prefix>, vlans: &VlanMap) -> Vec<(Ipv4Prefix, u32)> {
    prefixes
        .into_iter()
        .map(|prefix| {
            let tag = vlans.get(&prefix).copied().unwrap_or(PUBLIC_TAG);
            (prefix, tag)
        })
        .collect()
}
