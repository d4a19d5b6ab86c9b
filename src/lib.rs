//! Streaming DDoS detection over flow records.
//!
//! flowguard learns a per-destination-prefix baseline for five traffic
//! statistics and raises an alert when all five simultaneously exceed their
//! adaptive thresholds for a protected /24. Per-window traffic is summarised
//! in a pair of reversible count-min sketches so memory stays bounded no
//! matter how many addresses are observed; the dominant keys are recovered
//! from the sketches only for the columns that carry traffic.
//!
//! The pipeline is two threads: the ingress classifies flows into the live
//! sketch pair and rotates it every window, the engine consumes snapshots,
//! tracks adaptive CUSUM statistics per destination column, and emits
//! alerts. A false-positive feedback queue lets the host retune thresholds
//! at runtime.

pub mod alert;
pub mod clock;
pub mod config;
pub mod cusum;
pub mod detector;
pub mod error;
pub mod ingress;
pub mod prefix;
pub mod record;
pub mod sketch;

pub use alert::{DosAlert, WireAlert};
pub use clock::{Clock, ClockMode};
pub use config::DetectorConfig;
pub use detector::DdosDetector;
pub use error::{FlowguardError, Result};
pub use ingress::Ingress;
pub use record::FlowRecord;
