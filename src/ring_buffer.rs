//! Fixed-capacity circular history of state records.
//!
//! Capacity is tied to the 8-bit wrapping cursor: both must change together
//! or slot addressing silently breaks.

use crate::state::StateRecord;

pub const CAPACITY: usize = 256;

/// Outcome of a nearest-in-time lookup. The reference implementation's
/// naming is ambiguous between these two; here `TooEarly` always means
/// "the query time is later than anything buffered, the caller should wait
/// and retry" and `TooOld` always means "the query time is older than
/// everything retained, reject".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NearestResult {
    Found(usize),
    TooOld,
    TooEarly,
}

pub struct RingBuffer {
    slots: Vec<Option<StateRecord>>,
    /// 8-bit wrapping cursor pointing at the latest written slot. `None`
    /// before the first `append`.
    cursor: Option<u8>,
    len: usize,
}

impl RingBuffer {
    pub fn new() -> Self {
        Self {
            slots: vec![None; CAPACITY],
            cursor: None,
            len: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cursor.is_none()
    }

    /// Writes at the slot after the current latest cursor and advances it.
    /// Returns the index written.
    pub fn append(&mut self, record: StateRecord) -> usize {
        let next = match self.cursor {
            None => 0u8,
            Some(c) => c.wrapping_add(1),
        };
        self.slots[next as usize] = Some(record);
        self.cursor = Some(next);
        self.len = (self.len + 1).min(CAPACITY);
        next as usize
    }

    /// Overwrites a specific slot in place (used by the delayed updater and
    /// by re-propagation). Does not move the cursor.
    pub fn set(&mut self, idx: usize, record: StateRecord) {
        self.slots[idx] = Some(record);
    }

    pub fn get(&self, idx: usize) -> Option<&StateRecord> {
        self.slots[idx].as_ref()
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut StateRecord> {
        self.slots[idx].as_mut()
    }

    pub fn latest(&self) -> Option<(usize, &StateRecord)> {
        let idx = self.cursor? as usize;
        self.slots[idx].as_ref().map(|r| (idx, r))
    }

    pub fn latest_idx(&self) -> Option<usize> {
        self.cursor.map(|c| c as usize)
    }

    /// Logical index immediately after `idx`, wrapping at capacity. Used to
    /// walk forward from a delayed-update slot to the latest slot.
    pub fn next_idx(idx: usize) -> usize {
        (idx as u8).wrapping_add(1) as usize
    }

    /// How many logical steps separate `idx` from the current latest slot,
    /// walking forward with wraparound. Zero if `idx` is the latest slot.
    pub fn distance_to_latest(&self, idx: usize) -> Option<usize> {
        let latest = self.cursor? as usize;
        Some((latest as isize - idx as isize).rem_euclid(CAPACITY as isize) as usize)
    }

    /// Scans the buffer for the slot whose time is closest to `t`.
    pub fn nearest(&self, t: f64, tolerance: f64) -> NearestResult {
        let Some(latest) = self.cursor else {
            return NearestResult::TooEarly;
        };
        let latest = latest as usize;

        let newest_t = self.slots[latest].as_ref().unwrap().t;
        if t > newest_t {
            return NearestResult::TooEarly;
        }

        let mut best: Option<(usize, f64)> = None;
        let mut oldest_seen = newest_t;
        for step in 0..self.len {
            let idx = (latest as isize - step as isize).rem_euclid(CAPACITY as isize) as usize;
            let Some(record) = self.slots[idx].as_ref() else {
                continue;
            };
            oldest_seen = record.t;
            let dist = (record.t - t).abs();
            best = match best {
                None => Some((idx, dist)),
                Some((best_idx, best_dist)) => {
                    // Walking from newest to oldest, overwriting on ties
                    // means the oldest equidistant slot wins, per the
                    // documented tie-break rule.
                    if dist <= best_dist {
                        Some((idx, dist))
                    } else {
                        Some((best_idx, best_dist))
                    }
                }
            };
        }

        match best {
            Some((idx, _)) => {
                if t < oldest_seen - tolerance {
                    NearestResult::TooOld
                } else {
                    NearestResult::Found(idx)
                }
            }
            None => NearestResult::TooEarly,
        }
    }
}

impl Default for RingBuffer {
    fn default() -> Self {
        Self::new()
    }
}
