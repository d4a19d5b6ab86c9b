//! Injectable time source shared by the ingress and the detection engine.
//!
//! Online mode reads the wall clock; offline mode advances only when a new
//! flow timestamp is observed, so replayed captures run at replay speed
//! rather than real time.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

/// Which time base drives window boundaries and the learning deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockMode {
    /// Wall clock.
    Online,
    /// Logical clock driven by flow end timestamps.
    Offline,
}

/// Cheaply cloneable time source. Clones observe the same offline instant.
#[derive(Debug, Clone)]
pub struct Clock {
    mode: ClockMode,
    last: Arc<AtomicI64>,
}

impl Clock {
    pub fn new(mode: ClockMode) -> Self {
        Self {
            mode,
            last: Arc::new(AtomicI64::new(0)),
        }
    }

    pub fn online() -> Self {
        Self::new(ClockMode::Online)
    }

    pub fn offline() -> Self {
        Self::new(ClockMode::Offline)
    }

    pub fn mode(&self) -> ClockMode {
        self.mode
    }

    /// Advance the offline clock to `t`. No-op in online mode.
    pub fn advance(&self, t: DateTime<Utc>) {
        if self.mode == ClockMode::Offline {
            self.last.store(t.timestamp_millis(), Ordering::SeqCst);
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        match self.mode {
            ClockMode::Online => Utc::now(),
            ClockMode::Offline => {
                DateTime::from_timestamp_millis(self.last.load(Ordering::SeqCst))
                    .unwrap_or_default()
            }
        }
    }
}
