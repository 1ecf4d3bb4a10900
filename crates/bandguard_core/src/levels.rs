//! Level Snapshots
//!
//! Detected loudness per group (and the sub) accumulated by the audio
//! thread between two exchanges with the control thread.

use std::ops::AddAssign;

use serde::{Deserialize, Serialize};

use crate::config::MAX_GROUPS;

/// Number of level slots: the sub plus every group
pub const LEVEL_SLOTS: usize = MAX_GROUPS + 1;

/// Peak of the detected levels since the last reset
///
/// Index 0 is the sub, index `1 + group` a processing group. Values are
/// relative to the threshold: anything above 1.0 was attenuated.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Levels {
    groups: usize,
    count: usize,
    values: [f64; LEVEL_SLOTS],
}

impl Levels {
    pub fn new(groups: usize) -> Self {
        Self {
            groups: groups.min(MAX_GROUPS),
            count: 0,
            values: [0.0; LEVEL_SLOTS],
        }
    }

    pub fn groups(&self) -> usize {
        self.groups
    }

    /// Number of samples the snapshot covers
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn reset(&mut self) {
        self.values = [0.0; LEVEL_SLOTS];
        self.count = 0;
    }

    #[inline]
    pub fn next(&mut self) {
        self.count += 1;
    }

    /// Keep the maximum of the stored and the new value; indices past the
    /// last group are ignored
    #[inline]
    pub fn add_value(&mut self, index: usize, value: f64) {
        if index <= self.groups && value > self.values[index] {
            self.values[index] = value;
        }
    }

    /// Element-wise maximum, sample counts summed
    pub fn merge(&mut self, other: &Levels) {
        let slots = self.groups.min(other.groups) + 1;
        for (mine, theirs) in self.values.iter_mut().zip(&other.values).take(slots) {
            *mine = mine.max(*theirs);
        }
        self.count += other.count;
    }

    pub fn value(&self, index: usize) -> f64 {
        if index <= self.groups {
            self.values[index]
        } else {
            0.0
        }
    }

    /// Gain the detector applied for this level
    pub fn gain(&self, index: usize) -> f64 {
        1.0 / self.value(index).max(1.0)
    }

    /// Sub level followed by the group levels
    pub fn values(&self) -> &[f64] {
        &self.values[..=self.groups]
    }
}

impl AddAssign<&Levels> for Levels {
    fn add_assign(&mut self, other: &Levels) {
        self.merge(other);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_value_keeps_maximum() {
        let mut levels = Levels::new(2);
        levels.add_value(1, 0.5);
        levels.add_value(1, 0.3);
        levels.add_value(2, 1.5);
        levels.add_value(3, 9.0);
        assert_eq!(levels.value(1), 0.5);
        assert_eq!(levels.value(2), 1.5);
        assert_eq!(levels.value(3), 0.0, "beyond the configured groups");
        assert_eq!(levels.values().len(), 3);
    }

    #[test]
    fn test_merge_is_max_and_counts_sum() {
        let mut a = Levels::new(2);
        let mut b = Levels::new(2);
        a.add_value(0, 2.0);
        a.add_value(1, 0.1);
        b.add_value(0, 1.0);
        b.add_value(1, 0.7);
        for _ in 0..10 {
            a.next();
        }
        for _ in 0..5 {
            b.next();
        }

        a += &b;
        assert_eq!(a.value(0), 2.0);
        assert_eq!(a.value(1), 0.7);
        assert_eq!(a.count(), 15);
    }

    #[test]
    fn test_gain_and_reset() {
        let mut levels = Levels::new(1);
        levels.add_value(1, 4.0);
        levels.add_value(0, 0.5);
        assert!((levels.gain(1) - 0.25).abs() < 1e-12);
        assert_eq!(levels.gain(0), 1.0, "no attenuation below the threshold");

        levels.next();
        levels.reset();
        assert_eq!(levels.value(1), 0.0);
        assert_eq!(levels.count(), 0);
        assert_eq!(levels.groups(), 1);
    }

    #[test]
    fn test_serializes() {
        let mut levels = Levels::new(1);
        levels.add_value(1, 0.25);
        let json = serde_json::to_string(&levels).unwrap();
        assert!(json.contains("\"groups\":1"));
        assert!(json.contains("0.25"));
    }
}
