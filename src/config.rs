//! Detector configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Tunables for the detection core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Learning period in seconds; 0 reloads thresholds from disk instead.
    #[serde(default)]
    pub learning_secs: u64,
    /// Quantile used to backfill thresholds for columns that stayed silent
    /// during learning.
    #[serde(default = "default_quantile")]
    pub quantile: f64,
    /// EWMA span; the smoothing factor is `2 / (span + 1)`.
    #[serde(default = "default_span")]
    pub span: u32,
    /// CUSUM slack parameter.
    #[serde(default = "default_c")]
    pub c: f64,
    /// Rows per sketch.
    #[serde(default = "default_depth")]
    pub depth: usize,
    /// Destination sketch width (one CUSUM bank entry per column).
    #[serde(default = "default_dst_width")]
    pub dst_width: usize,
    /// Source sketch width.
    #[serde(default = "default_src_width")]
    pub src_width: usize,
    /// Maximum source addresses reported per alert.
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    /// Minimum seconds between alerts from the same destination column.
    #[serde(default = "default_quiet_secs")]
    pub quiet_secs: u64,
    /// Aggregation window length in seconds.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Where thresholds are persisted on shutdown and reloaded from when
    /// `learning_secs` is 0.
    #[serde(default = "default_thresholds_path")]
    pub thresholds_path: PathBuf,
    /// Base seed for the sketch hash functions. Runs that share a thresholds
    /// file must share this seed so columns keep their meaning.
    #[serde(default = "default_sketch_seed")]
    pub sketch_seed: u64,
}

impl DetectorConfig {
    /// EWMA smoothing factor derived from the span.
    pub fn alpha(&self) -> f64 {
        2.0 / (self.span as f64 + 1.0)
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            learning_secs: 0,
            quantile: default_quantile(),
            span: default_span(),
            c: default_c(),
            depth: default_depth(),
            dst_width: default_dst_width(),
            src_width: default_src_width(),
            top_n: default_top_n(),
            quiet_secs: default_quiet_secs(),
            window_secs: default_window_secs(),
            thresholds_path: default_thresholds_path(),
            sketch_seed: default_sketch_seed(),
        }
    }
}

fn default_quantile() -> f64 {
    0.75
}

fn default_span() -> u32 {
    60
}

fn default_c() -> f64 {
    0.5
}

fn default_depth() -> usize {
    3
}

fn default_dst_width() -> usize {
    1024
}

fn default_src_width() -> usize {
    32768
}

fn default_top_n() -> usize {
    5
}

fn default_quiet_secs() -> u64 {
    300
}

fn default_window_secs() -> u64 {
    5
}

fn default_thresholds_path() -> PathBuf {
    PathBuf::from("thresholds.csv")
}

fn default_sketch_seed() -> u64 {
    0x666c_6f77_6775_6172
}
