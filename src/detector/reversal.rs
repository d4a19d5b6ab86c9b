//! Key recovery from snapshot sketches.

use std::collections::{BTreeSet, HashMap};

use crate::prefix::PrefixTable;
use crate::record::prefix24;
use crate::sketch::{BinCount32, CellValue, DstCell, Sketch};

/// Everything recovered from one destination column.
#[derive(Debug)]
pub(crate) struct ReversedColumn {
    /// Aggregate of every drained protected cell.
    pub cell: DstCell,
    /// Protected /24 with the largest byte count among the drained cells.
    pub max_ip: u32,
    /// `(source address, flow count)` pairs recovered from the source sketch.
    pub src_flows: Vec<(u32, u32)>,
    /// Protected prefixes drained out of the column.
    pub prefixes: BTreeSet<u32>,
}

/// Drain every protected key out of destination column `column`.
///
/// Repeatedly reverses the column's row-0 cell to a candidate key, point
/// estimates it, accumulates the hit cell and decrements it from all rows so
/// the next iteration surfaces the next dominant key. Stops when the column
/// total stops changing, the estimate lands on an empty cell, or the
/// candidate is not protected. Returns `None` when nothing protected with a
/// nonzero byte count was recovered.
pub(crate) fn reverse_column(
    dst: &mut Sketch<DstCell>,
    src: &Sketch<BinCount32>,
    column: usize,
    protected: &PrefixTable<f64>,
) -> Option<ReversedColumn> {
    let mut result = DstCell::default();
    let mut max_ip = 0u32;
    let mut max_bytes = 0u64;
    let mut prefixes = BTreeSet::new();
    // source-cell index -> row its fan-in entry was recorded on
    let mut rows: HashMap<u32, usize> = HashMap::new();

    let mut prev_total = None;
    loop {
        let total = dst.cell(0, column).total();
        if prev_total == Some(total) {
            break;
        }
        prev_total = Some(total);

        let candidate = prefix24(dst.cell(0, column).reverse_key());
        let (row, col) = dst.estimate(candidate);
        let cell = dst.cell(row, col).clone();
        if cell.total() == 0 || !protected.contains(candidate) {
            break;
        }

        if cell.bytes() > max_bytes {
            max_bytes = cell.bytes();
            max_ip = candidate;
        }
        for &idx in cell.comm_with().keys() {
            rows.insert(idx, row);
        }
        result.merge(&cell);
        dst.decrement(candidate, &cell);
        prefixes.insert(candidate);
    }

    if max_ip == 0 {
        return None;
    }
    let src_flows = reverse_sources(&result, &rows, src);
    Some(ReversedColumn {
        cell: result,
        max_ip,
        src_flows,
        prefixes,
    })
}

/// Recover source addresses for every fan-in entry of the drained aggregate.
///
/// The rows map is the only link back into the source sketch: each fan-in
/// entry is keyed by source-cell index and valid on exactly the row the
/// destination cell was estimated on.
fn reverse_sources(
    result: &DstCell,
    rows: &HashMap<u32, usize>,
    src: &Sketch<BinCount32>,
) -> Vec<(u32, u32)> {
    let mut recovered = Vec::new();
    for (&idx, &flows) in result.comm_with() {
        let Some(&row) = rows.get(&idx) else {
            continue;
        };
        let cell = src.cell(row, idx as usize);
        if cell.total() == 0 {
            continue;
        }
        let candidate = cell.reverse_key();
        let (est_row, est_col) = src.estimate(candidate);
        if src.cell(est_row, est_col).total() == 0 {
            continue;
        }
        recovered.push((candidate, flows));
    }
    recovered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefix::sensitivity_multiplier;
    use crate::record::FlowRecord;
    use chrono::DateTime;
    use std::net::Ipv4Addr;

    fn protected(nets: &[&str]) -> PrefixTable<f64> {
        let mut table = PrefixTable::new();
        for net in nets {
            table.insert(net.parse().unwrap(), sensitivity_multiplier(0.5));
        }
        table
    }

    fn flow(src: [u8; 4], dst: [u8; 4], bytes: u64) -> FlowRecord {
        FlowRecord {
            src: Ipv4Addr::from(src),
            dst: Ipv4Addr::from(dst),
            bytes,
            packets: 1,
            t_end: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        }
    }

    fn insert(dst: &mut Sketch<DstCell>, src: &mut Sketch<BinCount32>, rec: &FlowRecord) {
        let prefix = prefix24(rec.dst_key());
        dst.update(prefix, rec);
        for row in 0..dst.depth() {
            let src_col = src.col(rec.src_key(), row) as u32;
            let dst_col = dst.col(prefix, row);
            dst.cell_mut(row, dst_col).note_peer(src_col);
        }
        src.update(rec.src_key(), &1);
    }

    #[test]
    fn drains_single_protected_key() {
        let table = protected(&["10.0.0.0/24"]);
        let mut dst = Sketch::new(3, 32, 1);
        let mut src = Sketch::new(3, 128, 2);
        for i in 0..5u8 {
            insert(&mut dst, &mut src, &flow([1, 2, 3, i], [10, 0, 0, 5], 1000));
        }

        let column = dst.col(prefix24(u32::from(Ipv4Addr::new(10, 0, 0, 5))), 0);
        let original_total = dst.cell(0, column).total();
        assert_eq!(original_total, 5);

        let rev = reverse_column(&mut dst, &src, column, &table).unwrap();
        assert_eq!(rev.max_ip, u32::from(Ipv4Addr::new(10, 0, 0, 0)));
        assert_eq!(rev.cell.flows(), original_total);
        assert_eq!(rev.cell.bytes(), 5000);
        assert_eq!(rev.prefixes.len(), 1);
        // the column is fully drained
        assert_eq!(dst.cell(0, column).total(), 0);
    }

    #[test]
    fn recovers_source_addresses_through_fanin() {
        let table = protected(&["10.0.0.0/24"]);
        let mut dst = Sketch::new(3, 32, 1);
        let mut src = Sketch::new(3, 4096, 2);
        let senders = [[1, 2, 3, 4], [5, 6, 7, 8], [9, 10, 11, 12]];
        for sender in senders {
            for _ in 0..4 {
                insert(&mut dst, &mut src, &flow(sender, [10, 0, 0, 5], 100));
            }
        }

        let column = dst.col(prefix24(u32::from(Ipv4Addr::new(10, 0, 0, 5))), 0);
        let rev = reverse_column(&mut dst, &src, column, &table).unwrap();

        let recovered: Vec<Ipv4Addr> = rev
            .src_flows
            .iter()
            .map(|&(ip, _)| Ipv4Addr::from(ip))
            .collect();
        for sender in senders {
            assert!(
                recovered.contains(&Ipv4Addr::from(sender)),
                "missing {:?} in {:?}",
                sender,
                recovered
            );
        }
        // fan-in counts carried through
        assert!(rev.src_flows.iter().all(|&(_, flows)| flows == 4));
    }

    #[test]
    fn unprotected_candidate_stops_the_drain() {
        let table = protected(&["10.0.0.0/24"]);
        let mut dst = Sketch::new(3, 32, 1);
        let mut src = Sketch::new(3, 128, 2);
        insert(&mut dst, &mut src, &flow([1, 2, 3, 4], [172, 16, 0, 1], 900));

        let column = dst.col(prefix24(u32::from(Ipv4Addr::new(172, 16, 0, 1))), 0);
        assert!(reverse_column(&mut dst, &src, column, &table).is_none());
        // nothing was drained
        assert_eq!(dst.cell(0, column).total(), 1);
    }

    #[test]
    fn empty_column_yields_nothing() {
        let table = protected(&["10.0.0.0/24"]);
        let mut dst: Sketch<DstCell> = Sketch::new(3, 32, 1);
        let src: Sketch<BinCount32> = Sketch::new(3, 128, 2);
        assert!(reverse_column(&mut dst, &src, 0, &table).is_none());
    }
}
