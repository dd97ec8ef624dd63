//! Ring-overwriting cache of raw IMU samples collected before initialization,
//! so aiding sensors can later query pre-start samples for alignment.

use crate::types::ImuSample;

pub const CACHE_SIZE: usize = 64;

pub struct ImuInputCache {
    entries: Vec<ImuSample>,
    next: usize,
    filled: usize,
}

impl ImuInputCache {
    pub fn new() -> Self {
        Self {
            entries: Vec::with_capacity(CACHE_SIZE),
            next: 0,
            filled: 0,
        }
    }

    pub fn push(&mut self, sample: ImuSample) {
        if self.entries.len() < CACHE_SIZE {
            self.entries.push(sample);
        } else {
            self.entries[self.next] = sample;
        }
        self.next = (self.next + 1) % CACHE_SIZE;
        self.filled = (self.filled + 1).min(CACHE_SIZE);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All retained samples with `t_start <= t <= t_end`, in chronological
    /// order. Supplements the bare cache with the read path the original
    /// implementation exposes to aiding sensor modules for alignment.
    pub fn between(&self, t_start: f64, t_end: f64) -> Vec<ImuSample> {
        let mut out: Vec<ImuSample> = self
            .entries
            .iter()
            .filter(|s| s.t >= t_start && s.t <= t_end)
            .copied()
            .collect();
        out.sort_by(|a, b| a.t.partial_cmp(&b.t).unwrap());
        out
    }
}

impl Default for ImuInputCache {
    fn default() -> Self {
        Self::new()
    }
}
