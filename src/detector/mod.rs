//! DDoS detector: live sketches, worker channels, and the engine thread.
//!
//! The owner thread classifies flows into the live sketch pair and hands a
//! snapshot to the engine once per window through a single-slot rendezvous
//! channel; alerts and false-positive feedback travel over non-blocking
//! queues. Nothing else is shared between the two threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use tracing::{info, warn};

use crate::alert::DosAlert;
use crate::clock::Clock;
use crate::config::DetectorConfig;
use crate::error::{FlowguardError, Result};
use crate::prefix::PrefixTable;
use crate::record::{prefix24, FlowRecord};
use crate::sketch::{BinCount32, DstCell, Sketch, SketchPair};

mod engine;
mod metrics;
mod reversal;
mod thresholds;

use engine::Engine;

// the source sketch hashes independently of the destination sketch
const SRC_SKETCH_SALT: u64 = 0x7372_6300;

/// The live sketch pair mutated during the current window.
pub(crate) struct LiveSketches {
    dst: Sketch<DstCell>,
    src: Sketch<BinCount32>,
    prefixes: Arc<PrefixTable<f64>>,
}

impl LiveSketches {
    pub(crate) fn new(config: &DetectorConfig, prefixes: Arc<PrefixTable<f64>>) -> Self {
        Self {
            dst: Sketch::new(config.depth, config.dst_width, config.sketch_seed),
            src: Sketch::new(
                config.depth,
                config.src_width,
                config.sketch_seed ^ SRC_SKETCH_SALT,
            ),
            prefixes,
        }
    }

    /// Classify one flow and fold it into the sketches.
    ///
    /// A flow toward a protected destination lands in the destination sketch
    /// under its /24 together with the per-row source-cell fan-in; a flow
    /// from a protected source only feeds the sent-direction counters of its
    /// own /24 cells. Anything else is dropped. The source sketch sees the
    /// sender of every kept flow.
    pub(crate) fn record_flow(&mut self, rec: &FlowRecord) {
        let src_key = rec.src_key();
        let dst_key = rec.dst_key();

        if self.prefixes.contains(dst_key) {
            let prefix = prefix24(dst_key);
            self.dst.update(prefix, rec);
            for row in 0..self.dst.depth() {
                let src_col = self.src.col(src_key, row) as u32;
                let dst_col = self.dst.col(prefix, row);
                self.dst.cell_mut(row, dst_col).note_peer(src_col);
            }
        } else if self.prefixes.contains(src_key) {
            let prefix = prefix24(src_key);
            for row in 0..self.dst.depth() {
                let dst_col = self.dst.col(prefix, row);
                self.dst.cell_mut(row, dst_col).note_sent(rec.bytes);
            }
        } else {
            return;
        }
        self.src.update(src_key, &1);
    }

    /// Move the current window out, reinstalling empty sketches that keep
    /// the same coordinate system.
    pub(crate) fn take(&mut self) -> SketchPair {
        let fresh_dst = self.dst.fresh();
        let fresh_src = self.src.fresh();
        let dst = std::mem::replace(&mut self.dst, fresh_dst);
        let src = std::mem::replace(&mut self.src, fresh_src);
        SketchPair { dst, src }
    }
}

/// Streaming DDoS detector.
///
/// Owns the live sketches and the background detection engine. The caller
/// drives it flow by flow and rotates the window on its own time base;
/// [`Ingress`](crate::ingress::Ingress) does both.
pub struct DdosDetector {
    live: LiveSketches,
    snapshot_tx: Sender<SketchPair>,
    alert_rx: Receiver<DosAlert>,
    fp_tx: Sender<DosAlert>,
    stop: Arc<AtomicBool>,
    engine: Option<JoinHandle<Result<()>>>,
}

impl DdosDetector {
    /// Build the detector and start its engine thread.
    pub fn new(
        config: &DetectorConfig,
        protected: PrefixTable<f64>,
        whitelist: PrefixTable<()>,
        clock: Clock,
    ) -> Self {
        let prefixes = Arc::new(protected);
        let whitelist = Arc::new(whitelist);
        let stop = Arc::new(AtomicBool::new(false));
        let (snapshot_tx, snapshot_rx) = bounded(0);
        let (alert_tx, alert_rx) = unbounded();
        let (fp_tx, fp_rx) = unbounded();

        info!(
            protected = prefixes.len(),
            whitelisted = whitelist.len(),
            dst_width = config.dst_width,
            src_width = config.src_width,
            "starting detector"
        );

        let engine = Engine::new(
            config,
            Arc::clone(&prefixes),
            whitelist,
            clock,
            snapshot_rx,
            alert_tx,
            fp_rx,
            Arc::clone(&stop),
        );
        let handle = std::thread::spawn(move || engine.run());

        Self {
            live: LiveSketches::new(config, prefixes),
            snapshot_tx,
            alert_rx,
            fp_tx,
            stop,
            engine: Some(handle),
        }
    }

    /// Fold one flow into the current window.
    pub fn process_flow(&mut self, rec: &FlowRecord) {
        self.live.record_flow(rec);
    }

    /// Hand the current window to the engine and start a fresh one.
    ///
    /// Blocks until the engine accepts the snapshot, which keeps windows
    /// strictly ordered.
    pub fn rotate_window(&mut self) {
        let pair = self.live.take();
        if self.snapshot_tx.send(pair).is_err() {
            warn!("detection engine is gone, dropping window snapshot");
        }
    }

    /// Next pending alert, if any. Never blocks.
    pub fn try_alert(&self) -> Option<DosAlert> {
        self.alert_rx.try_recv().ok()
    }

    /// Queue false-positive feedback; the engine applies it ahead of the
    /// next window scan.
    pub fn report_false_positive(&self, report: DosAlert) {
        let _ = self.fp_tx.send(report);
    }

    /// Stop the engine and wait for it to persist its thresholds.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop.store(true, Ordering::SeqCst);
        // a final snapshot releases the engine from the rendezvous read
        let _ = self.snapshot_tx.send(self.live.take());
        match self.engine.take() {
            Some(handle) => handle.join().map_err(|_| FlowguardError::EngineDied)?,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefix::sensitivity_multiplier;
    use crate::sketch::CellValue;
    use chrono::DateTime;

    fn protected_table() -> PrefixTable<f64> {
        let mut table = PrefixTable::new();
        table.insert("10.0.0.0/24".parse().unwrap(), sensitivity_multiplier(0.5));
        table
    }

    fn config(dir: &tempfile::TempDir, learning_secs: u64) -> DetectorConfig {
        DetectorConfig {
            learning_secs,
            dst_width: 16,
            src_width: 128,
            thresholds_path: dir.path().join("thresholds.csv"),
            ..Default::default()
        }
    }

    fn flow(src: [u8; 4], dst: [u8; 4], bytes: u64) -> FlowRecord {
        FlowRecord {
            src: src.into(),
            dst: dst.into(),
            bytes,
            packets: 1,
            t_end: DateTime::from_timestamp(2_000_000, 0).unwrap(),
        }
    }

    #[test]
    fn unrelated_flows_leave_no_trace() {
        let dir = tempfile::tempdir().unwrap();
        let mut live = LiveSketches::new(&config(&dir, 30), Arc::new(protected_table()));
        live.record_flow(&flow([8, 8, 8, 8], [9, 9, 9, 9], 5000));

        let pair = live.take();
        for row in 0..pair.dst.depth() {
            for col in 0..pair.dst.width() {
                assert_eq!(pair.dst.cell(row, col).total(), 0);
            }
        }
        for row in 0..pair.src.depth() {
            for col in 0..pair.src.width() {
                assert_eq!(pair.src.cell(row, col).total(), 0);
            }
        }
    }

    #[test]
    fn protected_source_feeds_sent_direction_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut live = LiveSketches::new(&config(&dir, 30), Arc::new(protected_table()));
        live.record_flow(&flow([10, 0, 0, 5], [8, 8, 8, 8], 4000));

        let pair = live.take();
        let prefix = prefix24(u32::from(std::net::Ipv4Addr::new(10, 0, 0, 5)));
        let col = pair.dst.col(prefix, 0);
        let cell = pair.dst.cell(0, col);
        assert_eq!(cell.sent_bytes(), 4000);
        assert_eq!(cell.sent_flows(), 1);
        assert_eq!(cell.total(), 0, "no received flow was recorded");
        // the protected sender still lands in the source sketch
        let src_col = pair.src.col(u32::from(std::net::Ipv4Addr::new(10, 0, 0, 5)), 0);
        assert_eq!(pair.src.cell(0, src_col).total(), 1);
    }

    #[test]
    fn take_keeps_the_coordinate_system() {
        let dir = tempfile::tempdir().unwrap();
        let mut live = LiveSketches::new(&config(&dir, 30), Arc::new(protected_table()));
        let before = live.dst.col(prefix24(0x0A00_0005), 0);
        live.record_flow(&flow([1, 2, 3, 4], [10, 0, 0, 5], 1000));
        let _ = live.take();
        assert_eq!(live.dst.col(prefix24(0x0A00_0005), 0), before);
        // and the fresh sketches are empty
        assert_eq!(live.dst.cell(0, before).total(), 0);
    }

    #[test]
    fn shutdown_persists_thresholds_for_the_next_run() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir, 60);
        let clock = Clock::offline();
        clock.advance(DateTime::from_timestamp(2_000_000, 0).unwrap());

        let mut detector =
            DdosDetector::new(&cfg, protected_table(), PrefixTable::new(), clock.clone());
        for k in 0..3 {
            clock.advance(DateTime::from_timestamp(2_000_000 + k * 5, 0).unwrap());
            detector.process_flow(&flow([1, 2, 3, 4], [10, 0, 0, 5], 1000));
            detector.rotate_window();
        }
        detector.shutdown().unwrap();

        let written = std::fs::read_to_string(&cfg.thresholds_path).unwrap();
        assert_eq!(written.lines().count(), cfg.dst_width);
        for line in written.lines() {
            assert_eq!(line.split(',').count(), 6);
        }

        // a second detector starting without learning reads the same file
        let cfg2 = DetectorConfig {
            learning_secs: 0,
            ..cfg.clone()
        };
        let mut detector2 =
            DdosDetector::new(&cfg2, protected_table(), PrefixTable::new(), clock.clone());
        detector2.process_flow(&flow([1, 2, 3, 4], [10, 0, 0, 5], 1000));
        detector2.rotate_window();
        detector2.shutdown().unwrap();
    }
}
