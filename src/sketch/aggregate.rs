//! Destination aggregate stored in the destination sketch.

use std::collections::{BTreeMap, HashMap};

use super::{BinCount32, CellValue};
use crate::record::FlowRecord;

/// Per-cell traffic aggregate for a protected destination prefix.
///
/// Besides the reversible key evidence it tracks received bytes/packets/
/// flows, the reverse-direction (destination-as-sender) counters, the
/// per-source fan-in keyed by *source-sketch cell index*, and a histogram of
/// the host octet feeding the destination-entropy metric. Keying `comm_with`
/// by cell index rather than address is what lets the source sketch be
/// reversed later without re-inserting into it.
#[derive(Debug, Clone, Default)]
pub struct DstCell {
    key_bits: BinCount32,
    bytes: u64,
    packets: u64,
    flows: u32,
    sent_bytes: u64,
    sent_flows: u32,
    comm_with: HashMap<u32, u32>,
    subnet_hist: BTreeMap<u8, u32>,
}

impl DstCell {
    #[inline]
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    #[inline]
    pub fn packets(&self) -> u64 {
        self.packets
    }

    #[inline]
    pub fn flows(&self) -> u32 {
        self.flows
    }

    pub fn sent_bytes(&self) -> u64 {
        self.sent_bytes
    }

    pub fn sent_flows(&self) -> u32 {
        self.sent_flows
    }

    /// Fan-in per source-sketch cell index.
    pub fn comm_with(&self) -> &HashMap<u32, u32> {
        &self.comm_with
    }

    /// Flow counts per destination host octet.
    pub fn subnet_hist(&self) -> &BTreeMap<u8, u32> {
        &self.subnet_hist
    }

    /// Majority-vote recovery of the dominant destination address.
    pub fn reverse_key(&self) -> u32 {
        self.key_bits.reverse_key()
    }

    /// Record one reverse-direction flow (the protected address sending).
    pub fn note_sent(&mut self, bytes: u64) {
        self.sent_bytes = self.sent_bytes.saturating_add(bytes);
        self.sent_flows = self.sent_flows.saturating_add(1);
    }

    /// Record one flow arriving from the source mapped to `src_col`.
    pub fn note_peer(&mut self, src_col: u32) {
        *self.comm_with.entry(src_col).or_insert(0) += 1;
    }
}

impl CellValue for DstCell {
    type Update = FlowRecord;

    fn absorb(&mut self, _key: u32, rec: &FlowRecord) {
        let dst = rec.dst_key();
        *self.subnet_hist.entry((dst & 0xFF) as u8).or_insert(0) += 1;
        self.key_bits.update(dst, 1);
        self.bytes = self.bytes.saturating_add(rec.bytes);
        self.packets = self.packets.saturating_add(rec.packets);
        self.flows = self.flows.saturating_add(1);
    }

    fn total(&self) -> u32 {
        self.flows
    }

    fn merge(&mut self, other: &Self) {
        self.key_bits.merge(&other.key_bits);
        self.bytes = self.bytes.saturating_add(other.bytes);
        self.packets = self.packets.saturating_add(other.packets);
        self.flows = self.flows.saturating_add(other.flows);
        self.sent_bytes = self.sent_bytes.saturating_add(other.sent_bytes);
        self.sent_flows = self.sent_flows.saturating_add(other.sent_flows);
        for (&idx, &flows) in &other.comm_with {
            *self.comm_with.entry(idx).or_insert(0) += flows;
        }
        for (&octet, &count) in &other.subnet_hist {
            *self.subnet_hist.entry(octet).or_insert(0) += count;
        }
    }

    fn saturating_sub(&mut self, other: &Self) {
        self.key_bits.saturating_sub(&other.key_bits);
        self.bytes = self.bytes.saturating_sub(other.bytes);
        self.packets = self.packets.saturating_sub(other.packets);
        self.flows = self.flows.saturating_sub(other.flows);
        self.sent_bytes = self.sent_bytes.saturating_sub(other.sent_bytes);
        self.sent_flows = self.sent_flows.saturating_sub(other.sent_flows);
        for (&idx, &flows) in &other.comm_with {
            if let Some(mine) = self.comm_with.get_mut(&idx) {
                if *mine > flows {
                    *mine -= flows;
                } else {
                    self.comm_with.remove(&idx);
                }
            }
        }
        for (&octet, &count) in &other.subnet_hist {
            if let Some(mine) = self.subnet_hist.get_mut(&octet) {
                if *mine > count {
                    *mine -= count;
                } else {
                    self.subnet_hist.remove(&octet);
                }
            }
        }
    }
}
