//! Observability / fuzzy-tracking monitor for the world-to-vision rotation.
//!
//! Watches the drift between the world frame and the aiding-sensor frame and
//! flags updates as unobservable when q_wv has not moved meaningfully
//! relative to its recent history, the only defense against absorbing
//! uncorrectable yaw drift into q_wv.

use nalgebra::UnitQuaternion;

pub const WINDOW: usize = 30;

pub struct FuzzyMonitor {
    /// Circular buffer of q_wv components (w, x, y, z), oldest-first once full.
    history: Vec<[f64; 4]>,
    next: usize,
}

impl FuzzyMonitor {
    pub fn new() -> Self {
        Self {
            history: Vec::with_capacity(WINDOW),
            next: 0,
        }
    }

    pub fn push(&mut self, q: &UnitQuaternion<f64>) {
        let comp = [q.w, q.i, q.j, q.k];
        if self.history.len() < WINDOW {
            self.history.push(comp);
        } else {
            self.history[self.next] = comp;
            self.next = (self.next + 1) % WINDOW;
        }
    }

    /// True when `q` deviates from the per-component median baseline of the
    /// window by more than `threshold` in any component. An empty or
    /// partially-filled window never flags (nothing to compare against yet).
    pub fn is_fuzzy(&self, q: &UnitQuaternion<f64>, threshold: f64) -> bool {
        if self.history.len() < WINDOW {
            return false;
        }
        let comp = [q.w, q.i, q.j, q.k];
        for c in 0..4 {
            let mut values: Vec<f64> = self.history.iter().map(|h| h[c]).collect();
            values.sort_by(|a, b| a.partial_cmp(b).unwrap());
            let median = values[values.len() / 2];
            if (comp[c] - median).abs() > threshold {
                return true;
            }
        }
        false
    }
}

impl Default for FuzzyMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_window_never_fuzzy() {
        let monitor = FuzzyMonitor::new();
        let q = UnitQuaternion::from_euler_angles(0.0, 0.0, 1.0);
        assert!(!monitor.is_fuzzy(&q, 0.01));
    }

    #[test]
    fn stable_window_flags_large_deviation() {
        let mut monitor = FuzzyMonitor::new();
        let baseline = UnitQuaternion::identity();
        for _ in 0..WINDOW {
            monitor.push(&baseline);
        }
        let drifted = UnitQuaternion::from_euler_angles(0.0, 0.0, 1.0);
        assert!(monitor.is_fuzzy(&drifted, 0.01));
        assert!(!monitor.is_fuzzy(&baseline, 0.01));
    }
}
