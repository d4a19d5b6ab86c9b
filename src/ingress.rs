//! Windowed producer loop.
//!
//! Advances the clock from each flow, folds the flow into the detector's
//! live sketches, and rotates the window every `window_secs`. The flow that
//! crosses a boundary still belongs to the closing window; rotation happens
//! right after it is recorded.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::alert::DosAlert;
use crate::clock::Clock;
use crate::detector::DdosDetector;
use crate::record::FlowRecord;

pub struct Ingress {
    detector: DdosDetector,
    clock: Clock,
    window: Duration,
    window_start: Option<DateTime<Utc>>,
}

impl Ingress {
    pub fn new(detector: DdosDetector, clock: Clock, window_secs: u64) -> Self {
        Self {
            detector,
            clock,
            window: Duration::seconds(window_secs as i64),
            window_start: None,
        }
    }

    /// Feed one flow; may hand a finished window to the engine.
    pub fn feed(&mut self, rec: FlowRecord) {
        self.clock.advance(rec.t_end);
        let now = self.clock.now();

        self.detector.process_flow(&rec);

        match self.window_start {
            None => self.window_start = Some(now),
            Some(start) if now >= start + self.window => {
                debug!(window_start = %start, "window closed");
                self.detector.rotate_window();
                self.window_start = Some(now);
            }
            Some(_) => {}
        }
    }

    /// Next pending alert from the engine, if any.
    pub fn try_alert(&self) -> Option<DosAlert> {
        self.detector.try_alert()
    }

    /// Queue false-positive feedback.
    pub fn report_false_positive(&self, report: DosAlert) {
        self.detector.report_false_positive(report);
    }

    /// Flush the window in progress and hand the detector back for shutdown.
    pub fn finish(mut self) -> DdosDetector {
        if self.window_start.is_some() {
            self.detector.rotate_window();
        }
        self.detector
    }
}
