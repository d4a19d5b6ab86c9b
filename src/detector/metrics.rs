//! Per-window metric computation.

use super::reversal::ReversedColumn;

/// The five statistics are byte count, packet count, and these three
/// derived values.
#[derive(Debug, Clone, Copy)]
pub(crate) struct WindowMetrics {
    /// Source entropy over destination subnet entropy.
    pub entropy: f64,
    pub rcv_sent_bytes: f64,
    pub rcv_sent_flows: f64,
}

pub(crate) fn compute(rev: &ReversedColumn) -> WindowMetrics {
    let src_counts: Vec<u32> = rev.src_flows.iter().map(|&(_, flows)| flows).collect();
    let entropy_src = normalized_entropy(&src_counts);

    let dst_counts: Vec<u32> = rev.cell.subnet_hist().values().copied().collect();
    let entropy_dst = normalized_entropy(&dst_counts);

    WindowMetrics {
        entropy: (entropy_src + 1e-6) / (entropy_dst + 1e-6),
        rcv_sent_bytes: (1.0 + rev.cell.bytes() as f64) / (1.0 + rev.cell.sent_bytes() as f64),
        rcv_sent_flows: (1.0 + rev.cell.flows() as f64) / (1.0 + rev.cell.sent_flows() as f64),
    }
}

/// Shannon entropy of the count distribution, normalized to [0, 1] by
/// `log2(n)`. Fewer than two classes carry no information.
pub(crate) fn normalized_entropy(counts: &[u32]) -> f64 {
    if counts.len() < 2 {
        return 0.0;
    }
    let total: u64 = counts.iter().map(|&c| u64::from(c)).sum();
    if total == 0 {
        return 0.0;
    }
    let mut entropy = 0.0;
    for &count in counts {
        if count == 0 {
            continue;
        }
        let frequency = count as f64 / total as f64;
        entropy -= frequency * frequency.log2();
    }
    entropy / (counts.len() as f64).log2()
}

/// Linear-interpolation quantile of an ascending-sorted vector.
pub(crate) fn quantile_sorted(sorted: &[f64], quantile: f64) -> f64 {
    let index = (sorted.len() - 1) as f64 * quantile;
    let lower = index as usize;
    let upper = lower + 1;
    if upper >= sorted.len() {
        sorted[sorted.len() - 1]
    } else {
        let t = index - lower as f64;
        sorted[lower] * (1.0 - t) + sorted[upper] * t
    }
}
