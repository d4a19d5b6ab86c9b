//! Alert output and false-positive feedback records.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

/// Emitted when all five statistics of a destination column cross their
/// thresholds. The same record shape is accepted back as false-positive
/// feedback, from which only the measured values, `cusum_id` and `dst_ip`
/// are used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DosAlert {
    /// Dominant protected /24 of the column.
    pub dst_ip: Ipv4Addr,
    /// Effective thresholds at alert time (sensitivity multiplier applied).
    pub threshold_bytes: f64,
    pub threshold_packets: f64,
    pub threshold_entropy: f64,
    pub threshold_rcv_sent_bytes: f64,
    pub threshold_rcv_sent_flows: f64,
    /// Measured CUSUM statistics.
    pub measured_bytes: f64,
    pub measured_packets: f64,
    pub measured_entropy: f64,
    pub measured_rcv_sent_bytes: f64,
    pub measured_rcv_sent_flows: f64,
    /// Destination-sketch column that fired.
    pub cusum_id: u32,
    /// Top senders by reversed flow count, whitelisted sources excluded.
    pub src_ips: Vec<Ipv4Addr>,
}

/// Wire form of an alert, the representation external consumers key on:
/// `dst_ip` is the four address bytes in network byte order, `src_ips` is a
/// packed array of consecutive 4-byte network-order addresses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireAlert {
    pub dst_ip: [u8; 4],
    pub threshold_bytes: f64,
    pub threshold_packets: f64,
    pub threshold_entropy: f64,
    pub threshold_rcv_sent_bytes: f64,
    pub threshold_rcv_sent_flows: f64,
    pub measured_bytes: f64,
    pub measured_packets: f64,
    pub measured_entropy: f64,
    pub measured_rcv_sent_bytes: f64,
    pub measured_rcv_sent_flows: f64,
    pub cusum_id: u32,
    pub src_ips: Vec<u8>,
}

impl DosAlert {
    /// Source addresses packed as consecutive 4-byte network-order groups.
    pub fn packed_src_ips(&self) -> Vec<u8> {
        self.src_ips.iter().flat_map(|ip| ip.octets()).collect()
    }

    /// Convert to the wire representation.
    pub fn to_wire(&self) -> WireAlert {
        WireAlert {
            dst_ip: self.dst_ip.octets(),
            threshold_bytes: self.threshold_bytes,
            threshold_packets: self.threshold_packets,
            threshold_entropy: self.threshold_entropy,
            threshold_rcv_sent_bytes: self.threshold_rcv_sent_bytes,
            threshold_rcv_sent_flows: self.threshold_rcv_sent_flows,
            measured_bytes: self.measured_bytes,
            measured_packets: self.measured_packets,
            measured_entropy: self.measured_entropy,
            measured_rcv_sent_bytes: self.measured_rcv_sent_bytes,
            measured_rcv_sent_flows: self.measured_rcv_sent_flows,
            cusum_id: self.cusum_id,
            src_ips: self.packed_src_ips(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert() -> DosAlert {
        DosAlert {
            dst_ip: Ipv4Addr::new(10, 0, 0, 0),
            threshold_bytes: 1.0,
            threshold_packets: 2.0,
            threshold_entropy: 3.0,
            threshold_rcv_sent_bytes: 4.0,
            threshold_rcv_sent_flows: 5.0,
            measured_bytes: 6.0,
            measured_packets: 7.0,
            measured_entropy: 8.0,
            measured_rcv_sent_bytes: 9.0,
            measured_rcv_sent_flows: 10.0,
            cusum_id: 7,
            src_ips: vec![Ipv4Addr::new(1, 2, 3, 4), Ipv4Addr::new(5, 6, 7, 8)],
        }
    }

    #[test]
    fn packs_sources_in_network_order() {
        assert_eq!(alert().packed_src_ips(), vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn wire_form_carries_network_order_bytes() {
        let wire = alert().to_wire();
        assert_eq!(wire.dst_ip, [10, 0, 0, 0]);
        // one packed 4-byte group per reported source
        assert_eq!(wire.src_ips.len(), 4 * alert().src_ips.len());
        assert_eq!(wire.src_ips, vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(wire.cusum_id, 7);
        assert_eq!(wire.measured_bytes, 6.0);
    }

    #[test]
    fn wire_form_serializes_addresses_as_bytes() {
        let json = serde_json::to_value(alert().to_wire()).unwrap();
        assert_eq!(json["dst_ip"], serde_json::json!([10, 0, 0, 0]));
        assert_eq!(
            json["src_ips"],
            serde_json::json!([1, 2, 3, 4, 5, 6, 7, 8])
        );
    }
}
