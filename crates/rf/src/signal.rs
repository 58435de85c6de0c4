//! RF signal types and signal-strength ranging
//!
//! Implements the log-distance path-loss model used to turn RSSI samples into
//! distance estimates, and the bounded sample window that smooths them.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use swarmlink_core::CalibrationConfig;

/// Received signal strength in dBm
pub type Rssi = i8;

/// Log-distance path-loss model
///
/// `distance = ref_distance * 10^((ref_rssi - rssi) / (10 * n))`, clamped to
/// `[min_distance_m, max_distance_m]`. Any signal stronger than the reference
/// point maps straight to `min_distance_m`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PathLossModel {
    /// RSSI at the reference distance (dBm)
    pub ref_rssi: f64,
    /// Reference distance (meters)
    pub ref_distance_m: f64,
    /// Path-loss exponent
    pub exponent: f64,
    /// Floor applied when the signal is stronger than the reference point
    pub min_distance_m: f64,
    /// Ceiling beyond which estimates are not trusted
    pub max_distance_m: f64,
}

impl PathLossModel {
    /// Estimate the distance for a (possibly averaged) RSSI value.
    pub fn range_from_signal(&self, rssi: f64) -> f64 {
        if rssi > self.ref_rssi {
            return self.min_distance_m;
        }
        let distance =
            self.ref_distance_m * 10f64.powf((self.ref_rssi - rssi) / (10.0 * self.exponent));
        // NaN bounds must not panic
        distance.max(self.min_distance_m).min(self.max_distance_m)
    }
}

impl Default for PathLossModel {
    fn default() -> Self {
        Self::from(&CalibrationConfig::default())
    }
}

impl From<&CalibrationConfig> for PathLossModel {
    fn from(cal: &CalibrationConfig) -> Self {
        Self {
            ref_rssi: cal.ref_rssi,
            ref_distance_m: cal.ref_distance_m,
            exponent: cal.path_loss_exponent,
            min_distance_m: cal.min_distance_m,
            max_distance_m: cal.max_distance_m,
        }
    }
}

/// Fixed-size sliding window of recent RSSI samples
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalWindow {
    samples: VecDeque<Rssi>,
    capacity: usize,
}

impl SignalWindow {
    /// Create an empty window holding at most `capacity` samples
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample, dropping the oldest once full
    pub fn push(&mut self, rssi: Rssi) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(rssi);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Most recent sample
    pub fn latest(&self) -> Option<Rssi> {
        self.samples.back().copied()
    }

    /// Arithmetic mean of the window
    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: f64 = self.samples.iter().map(|&s| f64::from(s)).sum();
        Some(sum / self.samples.len() as f64)
    }

    /// Population variance of the window
    pub fn variance(&self) -> Option<f64> {
        let mean = self.mean()?;
        let sum_sq: f64 = self
            .samples
            .iter()
            .map(|&s| {
                let d = f64::from(s) - mean;
                d * d
            })
            .sum();
        Some(sum_sq / self.samples.len() as f64)
    }

    pub fn iter(&self) -> impl Iterator<Item = Rssi> + '_ {
        self.samples.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> PathLossModel {
        PathLossModel {
            ref_rssi: -40.0,
            ref_distance_m: 1.0,
            exponent: 2.0,
            min_distance_m: 0.1,
            max_distance_m: 100.0,
        }
    }

    #[test]
    fn test_reference_point_maps_to_reference_distance() {
        assert!((model().range_from_signal(-40.0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_twenty_db_below_reference_is_ten_meters() {
        assert!((model().range_from_signal(-60.0) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_strong_signal_clamped_to_minimum() {
        let m = model();
        assert_eq!(m.range_from_signal(-30.0), m.min_distance_m);
        assert_eq!(m.range_from_signal(-39.5), m.min_distance_m);
        assert_eq!(m.range_from_signal(10.0), m.min_distance_m);
    }

    #[test]
    fn test_nan_bounds_do_not_panic() {
        let m = PathLossModel {
            min_distance_m: f64::NAN,
            max_distance_m: f64::NAN,
            ..model()
        };
        assert!((m.range_from_signal(-60.0) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_weak_signal_clamped_to_maximum() {
        assert_eq!(model().range_from_signal(-127.0), 100.0);
    }

    #[test]
    fn test_distance_monotonic_as_signal_decreases() {
        let m = model();
        let mut previous = 0.0;
        for rssi in (-127..=20).rev() {
            let d = m.range_from_signal(f64::from(rssi));
            assert!(d >= previous, "distance dropped at {} dBm", rssi);
            previous = d;
        }
    }

    #[test]
    fn test_window_drops_oldest() {
        let mut window = SignalWindow::new(3);
        for rssi in [-50, -52, -54, -56] {
            window.push(rssi);
        }
        assert_eq!(window.len(), 3);
        assert_eq!(window.iter().collect::<Vec<_>>(), vec![-52, -54, -56]);
        assert_eq!(window.latest(), Some(-56));
    }

    #[test]
    fn test_window_statistics() {
        let mut window = SignalWindow::new(10);
        assert!(window.mean().is_none());

        for rssi in [-50, -60] {
            window.push(rssi);
        }
        assert_eq!(window.mean(), Some(-55.0));
        assert_eq!(window.variance(), Some(25.0));
    }
}
