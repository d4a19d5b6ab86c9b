//! Longest-prefix matching over protected and whitelisted IPv4 ranges.
//!
//! Protected entries carry a sensitivity-derived threshold multiplier;
//! whitelist entries carry nothing. Both tables are immutable after loading.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use ipnetwork::Ipv4Network;

use crate::error::{FlowguardError, Result};

/// Default per-prefix sensitivity when the file omits the column.
pub const DEFAULT_SENSITIVITY: f64 = 0.5;

/// Map a sensitivity in [0.1, 1] to a threshold multiplier. Higher
/// sensitivity values produce a smaller multiplier, i.e. more sensitive
/// detection.
pub fn sensitivity_multiplier(sensitivity: f64) -> f64 {
    100.0 * 0.015f64.powf(sensitivity)
}

fn mask_for(len: u8) -> u32 {
    if len == 0 {
        0
    } else {
        u32::MAX << (32 - len as u32)
    }
}

/// Fixed set of IPv4 prefixes with longest-prefix lookup.
#[derive(Debug, Clone)]
pub struct PrefixTable<T = ()> {
    // one map per prefix length, keyed by the masked address
    by_len: Vec<HashMap<u32, T>>,
}

impl<T> Default for PrefixTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PrefixTable<T> {
    pub fn new() -> Self {
        Self {
            by_len: (0..=32).map(|_| HashMap::new()).collect(),
        }
    }

    pub fn insert(&mut self, net: Ipv4Network, value: T) {
        let len = net.prefix();
        let key = u32::from(net.ip()) & mask_for(len);
        self.by_len[len as usize].insert(key, value);
    }

    /// Value attached to the longest prefix covering `addr`.
    pub fn lookup(&self, addr: u32) -> Option<&T> {
        for len in (0..=32u8).rev() {
            let table = &self.by_len[len as usize];
            if table.is_empty() {
                continue;
            }
            if let Some(value) = table.get(&(addr & mask_for(len))) {
                return Some(value);
            }
        }
        None
    }

    pub fn contains(&self, addr: u32) -> bool {
        self.lookup(addr).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.by_len.iter().all(HashMap::is_empty)
    }

    pub fn len(&self) -> usize {
        self.by_len.iter().map(HashMap::len).sum()
    }
}

/// `ip[/prefix] [sensitivity]`; prefix defaults to 32.
fn parse_line(line: &str) -> Option<(Ipv4Network, f64)> {
    let mut fields = line.split_whitespace();
    let net = fields.next()?;
    let net: Ipv4Network = if net.contains('/') {
        net.parse().ok()?
    } else {
        Ipv4Network::new(net.parse().ok()?, 32).ok()?
    };
    let sensitivity = match fields.next() {
        Some(s) => s.parse::<f64>().ok()?,
        None => DEFAULT_SENSITIVITY,
    };
    if fields.next().is_some() {
        return None;
    }
    Some((net, sensitivity))
}

fn load_lines(path: &Path) -> Result<Vec<(Ipv4Network, f64)>> {
    let content = fs::read_to_string(path)?;
    let mut entries = Vec::new();
    for (idx, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let parsed = parse_line(line).ok_or_else(|| FlowguardError::InvalidPrefixLine {
            path: path.to_path_buf(),
            line: idx + 1,
            content: line.to_string(),
        })?;
        entries.push(parsed);
    }
    Ok(entries)
}

/// Load the protected-subnet file; values are threshold multipliers.
pub fn load_protected(path: &Path) -> Result<PrefixTable<f64>> {
    let mut table = PrefixTable::new();
    for (net, sensitivity) in load_lines(path)? {
        table.insert(net, sensitivity_multiplier(sensitivity));
    }
    if table.is_empty() {
        return Err(FlowguardError::EmptyPrefixFile(path.to_path_buf()));
    }
    Ok(table)
}

/// Load a whitelist file. A sensitivity column parses but carries nothing.
pub fn load_whitelist(path: &Path) -> Result<PrefixTable<()>> {
    let mut table = PrefixTable::new();
    for (net, _) in load_lines(path)? {
        table.insert(net, ());
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::Ipv4Addr;

    fn addr(s: &str) -> u32 {
        s.parse::<Ipv4Addr>().unwrap().into()
    }

    #[test]
    fn longest_prefix_wins() {
        let mut table = PrefixTable::new();
        table.insert("10.0.0.0/8".parse().unwrap(), 8u8);
        table.insert("10.1.0.0/16".parse().unwrap(), 16u8);
        table.insert("10.1.2.0/24".parse().unwrap(), 24u8);

        assert_eq!(table.lookup(addr("10.1.2.3")), Some(&24));
        assert_eq!(table.lookup(addr("10.1.9.9")), Some(&16));
        assert_eq!(table.lookup(addr("10.200.0.1")), Some(&8));
        assert_eq!(table.lookup(addr("192.168.1.1")), None);
    }

    #[test]
    fn zero_length_prefix_matches_everything() {
        let mut table = PrefixTable::new();
        table.insert("0.0.0.0/0".parse().unwrap(), ());
        assert!(table.contains(addr("8.8.8.8")));
    }

    #[test]
    fn multiplier_follows_growth_curve() {
        // 100 * 0.015^s
        assert!((sensitivity_multiplier(1.0) - 1.5).abs() < 1e-9);
        assert!((sensitivity_multiplier(0.5) - 100.0 * 0.015f64.sqrt()).abs() < 1e-9);
        assert!(sensitivity_multiplier(0.1) > sensitivity_multiplier(0.9));
    }

    #[test]
    fn loads_subnet_file_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# protected ranges").unwrap();
        writeln!(file, "10.0.0.0/24").unwrap();
        writeln!(file, "192.168.1.1").unwrap();
        writeln!(file, "172.16.0.0/12 0.9").unwrap();

        let table = load_protected(file.path()).unwrap();
        assert_eq!(table.len(), 3);
        let default = table.lookup(addr("10.0.0.7")).unwrap();
        assert!((default - sensitivity_multiplier(DEFAULT_SENSITIVITY)).abs() < 1e-9);
        let tuned = table.lookup(addr("172.16.3.4")).unwrap();
        assert!((tuned - sensitivity_multiplier(0.9)).abs() < 1e-9);
        // host entry defaults to /32
        assert!(table.contains(addr("192.168.1.1")));
        assert!(!table.contains(addr("192.168.1.2")));
    }

    #[test]
    fn rejects_bad_lines_and_empty_files() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "10.0.0.0/24 high").unwrap();
        assert!(matches!(
            load_protected(file.path()),
            Err(FlowguardError::InvalidPrefixLine { line: 1, .. })
        ));

        let empty = tempfile::NamedTempFile::new().unwrap();
        assert!(matches!(
            load_protected(empty.path()),
            Err(FlowguardError::EmptyPrefixFile(_))
        ));
    }
}
