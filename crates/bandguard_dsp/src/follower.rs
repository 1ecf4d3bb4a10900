//! Peak followers
//!
//! Followers turn a jittery level signal into an envelope: hold the
//! maximum for a while, then relax along one-pole curves.

use crate::integration::{AttackRelease, IntegrationCoefficients};

/// Holds the highest value seen for a number of samples
#[derive(Debug, Clone, Copy, Default)]
pub struct HoldMax {
    hold_samples: usize,
    remaining: usize,
    peak: f64,
}

impl HoldMax {
    pub fn new(hold_samples: usize, initial: f64) -> Self {
        Self {
            hold_samples,
            remaining: 0,
            peak: initial,
        }
    }

    pub fn hold_samples(&self) -> usize {
        self.hold_samples
    }

    pub fn set_hold_samples(&mut self, samples: usize) {
        self.hold_samples = samples;
        self.remaining = self.remaining.min(samples);
    }

    pub fn reset(&mut self, value: f64) {
        self.remaining = 0;
        self.peak = value;
    }

    /// Returns the value the follower stage should integrate towards.
    ///
    /// `current` is the follower's present output: once the hold runs out the
    /// held peak collapses onto it, so the next peak above the decaying
    /// envelope restarts the hold.
    #[inline]
    pub fn apply(&mut self, input: f64, current: f64) -> f64 {
        if input > self.peak {
            self.peak = input;
            self.remaining = self.hold_samples;
            input
        } else if self.remaining > 0 {
            self.remaining -= 1;
            self.peak
        } else {
            self.peak = current;
            input
        }
    }
}

/// Hold, then attack/release, then a final attack smoothing stage
///
/// Used by the loudness detector to keep the gain from chattering when the
/// measured level hovers around the threshold.
#[derive(Debug, Clone, Copy, Default)]
pub struct SmoothHoldFollower {
    hold: HoldMax,
    envelope: AttackRelease,
    smoothing: IntegrationCoefficients,
    output: f64,
}

impl SmoothHoldFollower {
    pub fn new(hold_samples: usize, attack_samples: f64, release_samples: f64, initial: f64) -> Self {
        Self {
            hold: HoldMax::new(hold_samples, initial),
            envelope: AttackRelease::new(attack_samples, release_samples, initial),
            smoothing: IntegrationCoefficients::new(attack_samples),
            output: initial,
        }
    }

    /// Reconfigure time constants without touching the current envelope
    pub fn set_metrics(&mut self, hold_samples: usize, attack_samples: f64, release_samples: f64) {
        self.hold.set_hold_samples(hold_samples);
        self.envelope.set_attack_samples(attack_samples);
        self.envelope.set_release_samples(release_samples);
        self.smoothing.set_characteristic_samples(attack_samples);
    }

    pub fn hold_samples(&self) -> usize {
        self.hold.hold_samples()
    }

    pub fn set_output(&mut self, value: f64) {
        self.hold.reset(value);
        self.envelope.set_output(value);
        self.output = value;
    }

    pub fn output(&self) -> f64 {
        self.output
    }

    #[inline]
    pub fn apply(&mut self, input: f64) -> f64 {
        let target = self.hold.apply(input, self.envelope.output());
        let envelope = self.envelope.integrate(target);
        self.smoothing.integrate(envelope, &mut self.output)
    }
}
