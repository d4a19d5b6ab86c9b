//! Detection engine loop.
//!
//! Consumes one sketch snapshot per window, recovers the protected keys of
//! every populated destination column, feeds the five per-column CUSUM
//! trackers, and emits alerts once thresholds are installed. Thresholds are
//! written back to disk when the loop winds down.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, info, warn};

use crate::alert::DosAlert;
use crate::clock::Clock;
use crate::config::DetectorConfig;
use crate::error::Result;
use crate::prefix::PrefixTable;
use crate::sketch::{CellValue, SketchPair};

use super::metrics;
use super::reversal::{reverse_column, ReversedColumn};
use super::thresholds::{self, MetricBank};

pub(crate) struct Engine {
    learning_secs: u64,
    quantile: f64,
    top_n: usize,
    quiet: Duration,
    thresholds_path: PathBuf,
    clock: Clock,
    prefixes: Arc<PrefixTable<f64>>,
    whitelist: Arc<PrefixTable<()>>,
    cusums: MetricBank,
    last_alert: Vec<DateTime<Utc>>,
    learn_until: Option<DateTime<Utc>>,
    threshold_set: bool,
    snapshot_rx: Receiver<SketchPair>,
    alert_tx: Sender<DosAlert>,
    fp_rx: Receiver<DosAlert>,
    stop: Arc<AtomicBool>,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: &DetectorConfig,
        prefixes: Arc<PrefixTable<f64>>,
        whitelist: Arc<PrefixTable<()>>,
        clock: Clock,
        snapshot_rx: Receiver<SketchPair>,
        alert_tx: Sender<DosAlert>,
        fp_rx: Receiver<DosAlert>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            learning_secs: config.learning_secs,
            quantile: config.quantile,
            top_n: config.top_n,
            quiet: Duration::seconds(config.quiet_secs as i64),
            thresholds_path: config.thresholds_path.clone(),
            clock,
            prefixes,
            whitelist,
            cusums: MetricBank::new(config.dst_width, config.c, config.alpha(), config.span),
            last_alert: vec![DateTime::UNIX_EPOCH; config.dst_width],
            learn_until: None,
            threshold_set: false,
            snapshot_rx,
            alert_tx,
            fp_rx,
            stop,
        }
    }

    /// Consume snapshots until shutdown, then persist thresholds.
    pub(crate) fn run(mut self) -> Result<()> {
        info!(learning_secs = self.learning_secs, "detection engine started");
        loop {
            let snapshot = match self.snapshot_rx.recv() {
                Ok(snapshot) => snapshot,
                Err(_) => break,
            };
            if self.stop.load(Ordering::SeqCst) {
                break;
            }
            self.handle_snapshot(snapshot)?;
        }
        thresholds::save(&self.cusums, &self.thresholds_path)?;
        info!(path = %self.thresholds_path.display(), "thresholds persisted");
        Ok(())
    }

    /// Process one window snapshot.
    fn handle_snapshot(&mut self, snapshot: SketchPair) -> Result<()> {
        let now = self.clock.now();
        let learning_secs = self.learning_secs;
        let learn_until = *self
            .learn_until
            .get_or_insert_with(|| now + Duration::seconds(learning_secs as i64));
        let learning = now < learn_until;

        if !self.threshold_set && !learning {
            thresholds::install(
                &mut self.cusums,
                self.learning_secs,
                self.quantile,
                &self.thresholds_path,
            )?;
            self.threshold_set = true;
        }
        if self.threshold_set {
            self.apply_false_positive();
        }

        let SketchPair { mut dst, src } = snapshot;
        for column in 0..dst.width() {
            if dst.cell(0, column).total() == 0 {
                continue;
            }
            let Some(reversed) = reverse_column(&mut dst, &src, column, &self.prefixes) else {
                continue;
            };
            self.track_metrics(&reversed, learning, column);

            if self.threshold_set && now > self.last_alert[column] + self.quiet {
                if self.emit_alert(&reversed, column) {
                    self.last_alert[column] = now;
                }
            }
        }
        Ok(())
    }

    /// Feed the five trackers of `column` with this window's measurements.
    fn track_metrics(&mut self, reversed: &ReversedColumn, learning: bool, column: usize) {
        let window = metrics::compute(reversed);
        debug!(
            column,
            dst = %Ipv4Addr::from(reversed.max_ip),
            drained = reversed.prefixes.len(),
            bytes = reversed.cell.bytes(),
            packets = reversed.cell.packets(),
            entropy = window.entropy,
            rcv_sent_bytes = window.rcv_sent_bytes,
            rcv_sent_flows = window.rcv_sent_flows,
            "window metrics"
        );
        self.cusums.bytes[column].process(reversed.cell.bytes() as f64, learning);
        self.cusums.packets[column].process(reversed.cell.packets() as f64, learning);
        self.cusums.entropy[column].process(window.entropy, learning);
        self.cusums.rcv_sent_bytes[column].process(window.rcv_sent_bytes, learning);
        self.cusums.rcv_sent_flows[column].process(window.rcv_sent_flows, learning);
    }

    /// Retune one pending false-positive report, if any.
    ///
    /// The reported measurement becomes the new threshold, divided by the
    /// prefix multiplier so the anomaly predicate multiplies it back: an
    /// equal event will no longer fire.
    fn apply_false_positive(&mut self) {
        let report = match self.fp_rx.try_recv() {
            Ok(report) => report,
            Err(_) => return,
        };
        let column = report.cusum_id as usize;
        if column >= self.cusums.width() {
            warn!(column, "false positive for unknown column ignored");
            return;
        }
        let dst = u32::from(report.dst_ip);
        let Some(&multiplier) = self.prefixes.lookup(dst) else {
            warn!(dst = %report.dst_ip, "false positive for unprotected destination ignored");
            return;
        };
        self.cusums.bytes[column].set_threshold_high(report.measured_bytes / multiplier);
        self.cusums.packets[column].set_threshold_high(report.measured_packets / multiplier);
        self.cusums.entropy[column].set_threshold_high(report.measured_entropy / multiplier);
        self.cusums.rcv_sent_bytes[column]
            .set_threshold_high(report.measured_rcv_sent_bytes / multiplier);
        self.cusums.rcv_sent_flows[column]
            .set_threshold_high(report.measured_rcv_sent_flows / multiplier);
        info!(dst = %report.dst_ip, column, "thresholds retuned from false positive");
    }

    /// Emit an alert when all five trackers flag a positive anomaly and a
    /// non-whitelisted source was recovered.
    fn emit_alert(&mut self, reversed: &ReversedColumn, column: usize) -> bool {
        let multiplier = self
            .prefixes
            .lookup(reversed.max_ip)
            .copied()
            .unwrap_or_else(|| {
                debug!(dst = %Ipv4Addr::from(reversed.max_ip), "no multiplier for reversed prefix");
                0.0
            });

        let bank = &self.cusums;
        let anomalous = bank.bytes[column].is_positive_anomaly(multiplier)
            && bank.packets[column].is_positive_anomaly(multiplier)
            && bank.entropy[column].is_positive_anomaly(multiplier)
            && bank.rcv_sent_bytes[column].is_positive_anomaly(multiplier)
            && bank.rcv_sent_flows[column].is_positive_anomaly(multiplier);
        if !anomalous {
            return false;
        }

        let src_ips = self.top_sources(&reversed.src_flows);
        if src_ips.is_empty() {
            debug!(column, "anomaly with only whitelisted sources suppressed");
            return false;
        }

        let alert = DosAlert {
            dst_ip: Ipv4Addr::from(reversed.max_ip),
            threshold_bytes: bank.bytes[column].threshold_high() * multiplier,
            threshold_packets: bank.packets[column].threshold_high() * multiplier,
            threshold_entropy: bank.entropy[column].threshold_high() * multiplier,
            threshold_rcv_sent_bytes: bank.rcv_sent_bytes[column].threshold_high() * multiplier,
            threshold_rcv_sent_flows: bank.rcv_sent_flows[column].threshold_high() * multiplier,
            measured_bytes: bank.bytes[column].sh(),
            measured_packets: bank.packets[column].sh(),
            measured_entropy: bank.entropy[column].sh(),
            measured_rcv_sent_bytes: bank.rcv_sent_bytes[column].sh(),
            measured_rcv_sent_flows: bank.rcv_sent_flows[column].sh(),
            cusum_id: column as u32,
            src_ips,
        };
        info!(
            dst = %alert.dst_ip,
            column,
            sources = alert.src_ips.len(),
            "dos alert"
        );
        if self.alert_tx.send(alert).is_err() {
            warn!("alert consumer disconnected");
        }
        true
    }

    /// Top senders by recovered flow count, whitelisted addresses skipped.
    fn top_sources(&self, src_flows: &[(u32, u32)]) -> Vec<Ipv4Addr> {
        let mut ranked: Vec<(u32, u32)> = src_flows.to_vec();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));

        let mut picked = BTreeSet::new();
        for (addr, _) in ranked {
            if self.prefixes.contains(addr) || self.whitelist.contains(addr) {
                continue;
            }
            picked.insert(addr);
            if picked.len() == self.top_n {
                break;
            }
        }
        picked.into_iter().map(Ipv4Addr::from).collect()
    }
}
