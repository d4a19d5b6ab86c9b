//! Unidirectional flow records.

use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};

/// Mask selecting the /24 prefix of a host-order IPv4 address.
pub const PREFIX24_MASK: u32 = 0xFFFF_FF00;

/// The /24 prefix a protected destination is matched and sketched on.
#[inline]
pub fn prefix24(addr: u32) -> u32 {
    addr & PREFIX24_MASK
}

/// One observed unidirectional flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowRecord {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub bytes: u64,
    pub packets: u64,
    /// Flow end time; drives the logical clock in offline mode.
    pub t_end: DateTime<Utc>,
}

impl FlowRecord {
    #[inline]
    pub fn src_key(&self) -> u32 {
        u32::from(self.src)
    }

    #[inline]
    pub fn dst_key(&self) -> u32 {
        u32::from(self.dst)
    }

    /// Parse one `src,dst,bytes,packets,t_end` line.
    ///
    /// `t_end` is unix seconds, fractional part allowed. Returns `None` for
    /// short lines, non-IPv4 addresses, and bad numbers; the caller logs and
    /// skips so the stream keeps flowing.
    pub fn parse_line(line: &str) -> Option<FlowRecord> {
        let mut fields = line.split(',').map(str::trim);
        let src: Ipv4Addr = fields.next()?.parse().ok()?;
        let dst: Ipv4Addr = fields.next()?.parse().ok()?;
        let bytes: u64 = fields.next()?.parse().ok()?;
        let packets: u64 = fields.next()?.parse().ok()?;
        let t_end: f64 = fields.next()?.parse().ok()?;
        let t_end = DateTime::from_timestamp_millis((t_end * 1000.0) as i64)?;
        Some(FlowRecord {
            src,
            dst,
            bytes,
            packets,
            t_end,
        })
    }
}
