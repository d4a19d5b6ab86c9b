//! Threshold installation and persistence.
//!
//! Thresholds live in `thresholds.csv`, one row per destination column:
//! `thH_bytes, thH_packets, thH_entropyHigh, thL_entropy, thH_rcvSentBytes,
//! thH_rcvSentFlows`. The file is written on shutdown and read back on
//! startup runs that skip learning.

use std::fs;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::info;

use crate::cusum::AdaptiveCusum;
use crate::error::{FlowguardError, Result};

use super::metrics::quantile_sorted;

/// One CUSUM per destination column for each of the five statistics.
#[derive(Debug)]
pub(crate) struct MetricBank {
    pub bytes: Vec<AdaptiveCusum>,
    pub packets: Vec<AdaptiveCusum>,
    pub entropy: Vec<AdaptiveCusum>,
    pub rcv_sent_bytes: Vec<AdaptiveCusum>,
    pub rcv_sent_flows: Vec<AdaptiveCusum>,
}

impl MetricBank {
    pub fn new(width: usize, c: f64, alpha: f64, span: u32) -> Self {
        let column = || {
            (0..width)
                .map(|_| AdaptiveCusum::new(c, alpha, span))
                .collect::<Vec<_>>()
        };
        Self {
            bytes: column(),
            packets: column(),
            entropy: column(),
            rcv_sent_bytes: column(),
            rcv_sent_flows: column(),
        }
    }

    pub fn width(&self) -> usize {
        self.bytes.len()
    }
}

/// Install thresholds at the end of learning: reload from disk when no
/// learning interval was given, otherwise derive them from what learning
/// observed.
pub(crate) fn install(
    bank: &mut MetricBank,
    learning_secs: u64,
    quantile: f64,
    path: &Path,
) -> Result<()> {
    if learning_secs == 0 {
        load(bank, path)?;
        info!(path = %path.display(), "thresholds reloaded");
        return Ok(());
    }

    let q_bytes = quantile_threshold_high(&bank.bytes, quantile);
    let q_packets = quantile_threshold_high(&bank.packets, quantile);
    let q_entropy_high = quantile_threshold_high(&bank.entropy, quantile);
    let q_entropy_low = quantile_threshold_low(&bank.entropy, quantile);
    let q_rcv_sent_bytes = quantile_threshold_high(&bank.rcv_sent_bytes, quantile);
    let q_rcv_sent_flows = quantile_threshold_high(&bank.rcv_sent_flows, quantile);

    for j in 0..bank.width() {
        install_high(&mut bank.bytes[j], q_bytes);
        install_high(&mut bank.packets[j], q_packets);
        install_high(&mut bank.entropy[j], q_entropy_high);
        install_low(&mut bank.entropy[j], q_entropy_low);
        install_high(&mut bank.rcv_sent_bytes[j], q_rcv_sent_bytes);
        install_high(&mut bank.rcv_sent_flows[j], q_rcv_sent_flows);
    }
    info!(quantile, "thresholds installed from learning phase");
    Ok(())
}

/// A column that saw learning traffic keeps its personal ceiling; silent
/// columns are backfilled from the fleet quantile.
fn install_high(cusum: &mut AdaptiveCusum, quantile_threshold: f64) {
    if cusum.max_sh() > 0.0 {
        cusum.set_threshold_high(cusum.max_sh());
    } else {
        cusum.set_threshold_high(quantile_threshold);
    }
}

fn install_low(cusum: &mut AdaptiveCusum, quantile_threshold: f64) {
    if cusum.max_sl() > 0.0 {
        cusum.set_threshold_low(cusum.max_sl());
    } else {
        cusum.set_threshold_low(quantile_threshold);
    }
}

// The two backfill pools are crossed: the high pool collects the low-side
// maxima and the low pool the high-side maxima. Detection quality hinges on
// the per-column personal ceilings, so the crossed backfill only affects
// columns that stayed silent through learning.
fn quantile_threshold_high(cusums: &[AdaptiveCusum], quantile: f64) -> f64 {
    let mut pool: Vec<f64> = cusums
        .iter()
        .map(AdaptiveCusum::max_sl)
        .filter(|&v| v > 0.0)
        .collect();
    if pool.is_empty() {
        return 0.0;
    }
    pool.sort_by(f64::total_cmp);
    quantile_sorted(&pool, quantile)
}

fn quantile_threshold_low(cusums: &[AdaptiveCusum], quantile: f64) -> f64 {
    let mut pool: Vec<f64> = cusums
        .iter()
        .map(AdaptiveCusum::max_sh)
        .filter(|&v| v > 0.0)
        .collect();
    if pool.is_empty() {
        return 0.0;
    }
    pool.sort_by(f64::total_cmp);
    quantile_sorted(&pool, quantile)
}

/// Persist the per-column thresholds.
pub(crate) fn save(bank: &MetricBank, path: &Path) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for j in 0..bank.width() {
        writeln!(
            out,
            "{},{},{},{},{},{}",
            bank.bytes[j].threshold_high(),
            bank.packets[j].threshold_high(),
            bank.entropy[j].threshold_high(),
            bank.entropy[j].threshold_low(),
            bank.rcv_sent_bytes[j].threshold_high(),
            bank.rcv_sent_flows[j].threshold_high(),
        )?;
    }
    out.flush()?;
    Ok(())
}

/// Read thresholds back, row per column. Missing rows leave their columns at
/// zero; malformed values are a hard error.
pub(crate) fn load(bank: &mut MetricBank, path: &Path) -> Result<()> {
    let content = fs::read_to_string(path)?;
    let mut lines = content.lines();
    for j in 0..bank.width() {
        let Some(line) = lines.next() else {
            break;
        };
        let mut fields = line.split(',').map(|field| {
            field
                .trim()
                .parse::<f64>()
                .map_err(|_| FlowguardError::InvalidThresholds {
                    path: path.to_path_buf(),
                    reason: format!("row {}: bad value '{}'", j + 1, field.trim()),
                })
        });
        let mut next = || {
            fields
                .next()
                .unwrap_or_else(|| {
                    Err(FlowguardError::InvalidThresholds {
                        path: path.to_path_buf(),
                        reason: format!("row {}: expected 6 columns", j + 1),
                    })
                })
        };
        bank.bytes[j].set_threshold_high(next()?);
        bank.packets[j].set_threshold_high(next()?);
        bank.entropy[j].set_threshold_high(next()?);
        bank.entropy[j].set_threshold_low(next()?);
        bank.rcv_sent_bytes[j].set_threshold_high(next()?);
        bank.rcv_sent_flows[j].set_threshold_high(next()?);
    }
    Ok(())
}
