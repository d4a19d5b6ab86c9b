//! Adaptive CUSUM anomaly tracker.
//!
//! Maintains an exponentially weighted moving mean and variance of a
//! per-window statistic and accumulates high/low cumulative sums of the
//! residuals. During learning the cumulative sums stay frozen until `span`
//! windows have seeded the moving average.

/// One-dimensional adaptive CUSUM with persistable thresholds.
#[derive(Debug, Clone)]
pub struct AdaptiveCusum {
    c: f64,
    alpha: f64,
    span: u32,
    mean: f64,
    var: f64,
    sh: f64,
    sl: f64,
    max_sh: f64,
    max_sl: f64,
    threshold_high: f64,
    threshold_low: f64,
    window_id: u32,
    first: bool,
}

impl AdaptiveCusum {
    pub fn new(c: f64, alpha: f64, span: u32) -> Self {
        Self {
            c,
            alpha,
            span,
            mean: 0.0,
            var: 0.0,
            sh: 0.0,
            sl: 0.0,
            max_sh: 0.0,
            max_sl: 0.0,
            threshold_high: 0.0,
            threshold_low: 0.0,
            window_id: 0,
            first: true,
        }
    }

    /// Fold in the current window's observation.
    ///
    /// The first sample only seeds the mean. The cumulative statistics start
    /// accumulating once learning ends or `span` windows have passed,
    /// whichever comes first.
    pub fn process(&mut self, value: f64, learning: bool) {
        if self.first {
            self.mean = value;
            self.var = 0.0;
            self.first = false;
            return;
        }
        let diff = value - self.mean;
        self.mean += self.alpha * diff;
        self.var = (1.0 - self.alpha) * self.var + self.alpha * diff * diff;

        if !learning || self.window_id >= self.span {
            let dev = self.c * self.var.sqrt();
            self.sh = (self.sh + (value - self.mean) - dev).max(0.0);
            self.sl = (self.sl - (value - self.mean) - dev).max(0.0);
        }
        self.max_sh = self.max_sh.max(self.sh);
        self.max_sl = self.max_sl.max(self.sl);

        self.window_id += 1;
    }

    #[inline]
    pub fn sh(&self) -> f64 {
        self.sh
    }

    #[inline]
    pub fn sl(&self) -> f64 {
        self.sl
    }

    pub fn max_sh(&self) -> f64 {
        self.max_sh
    }

    pub fn max_sl(&self) -> f64 {
        self.max_sl
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn variance(&self) -> f64 {
        self.var
    }

    pub fn window_id(&self) -> u32 {
        self.window_id
    }

    pub fn threshold_high(&self) -> f64 {
        self.threshold_high
    }

    pub fn threshold_low(&self) -> f64 {
        self.threshold_low
    }

    pub fn set_threshold_high(&mut self, threshold: f64) {
        self.threshold_high = threshold;
    }

    pub fn set_threshold_low(&mut self, threshold: f64) {
        self.threshold_low = threshold;
    }

    #[cfg(test)]
    pub(crate) fn with_maxima(mut self, max_sh: f64, max_sl: f64) -> Self {
        self.max_sh = max_sh;
        self.max_sl = max_sl;
        self
    }

    #[inline]
    pub fn is_positive_anomaly(&self, multiplier: f64) -> bool {
        self.sh > self.threshold_high * multiplier
    }

    #[inline]
    pub fn is_negative_anomaly(&self, multiplier: f64) -> bool {
        self.sl > self.threshold_low * multiplier
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cusum() -> AdaptiveCusum {
        // alpha for span 9
        AdaptiveCusum::new(0.5, 0.2, 9)
    }

    #[test]
    fn first_sample_seeds_mean_only() {
        let mut acu = cusum();
        acu.process(42.0, true);
        assert_eq!(acu.mean(), 42.0);
        assert_eq!(acu.variance(), 0.0);
        assert_eq!(acu.window_id(), 0);
        assert_eq!(acu.sh(), 0.0);
    }

    #[test]
    fn flat_input_decays_to_zero() {
        let mut acu = cusum();
        for _ in 0..50 {
            acu.process(1000.0, false);
        }
        assert!(acu.variance().abs() < 1e-9);
        assert_eq!(acu.sh(), 0.0);
        assert_eq!(acu.sl(), 0.0);
    }

    #[test]
    fn learning_freezes_cusum_until_span() {
        let mut acu = cusum();
        for i in 0..10 {
            acu.process(100.0 + (i % 3) as f64 * 50.0, true);
            assert_eq!(acu.sh(), 0.0, "frozen before span windows");
        }
        // window id now equals span: statistics may accumulate
        acu.process(10_000.0, true);
        assert!(acu.sh() > 0.0);
    }

    #[test]
    fn spike_raises_high_statistic() {
        let mut acu = cusum();
        for _ in 0..20 {
            acu.process(1000.0, false);
        }
        acu.process(100_000.0, false);
        assert!(acu.sh() > 0.0);
        assert!(acu.max_sh() >= acu.sh());
        assert_eq!(acu.sl(), 0.0);
    }

    #[test]
    fn drop_raises_low_statistic() {
        let mut acu = cusum();
        for _ in 0..20 {
            acu.process(1000.0, false);
        }
        acu.process(0.0, false);
        assert!(acu.sl() > 0.0);
        assert!(acu.max_sl() >= acu.sl());
    }

    #[test]
    fn max_tracks_running_peak() {
        let mut acu = cusum();
        for _ in 0..20 {
            acu.process(1000.0, false);
        }
        acu.process(50_000.0, false);
        let peak = acu.sh();
        for _ in 0..30 {
            acu.process(1000.0, false);
        }
        assert_eq!(acu.sh(), 0.0);
        assert_eq!(acu.max_sh(), peak);
    }

    #[test]
    fn anomaly_predicate_scales_with_multiplier() {
        let mut acu = cusum();
        for _ in 0..20 {
            acu.process(1000.0, false);
        }
        acu.process(100_000.0, false);
        acu.set_threshold_high(acu.sh() / 2.0);
        assert!(acu.is_positive_anomaly(1.0));
        // a large multiplier desensitises the same threshold
        assert!(!acu.is_positive_anomaly(1000.0));
    }
}
