//! Perceptive Loudness Detector
//!
//! Short bursts sound quieter than sustained sound at the same RMS level. The
//! detector runs a bank of mean-square integrators with window lengths spaced
//! geometrically from a slow window (seconds) down to a fast one (fractions
//! of a millisecond). Windows shorter than the perceptive reference window
//! are weighted down, and the detection is the loudest weighted window:
//!
//! ```text
//! window:  slow ... reference ... fast
//! weight:   1   ...    1      ... max(min_weight, (fast/ref)^(k * power))
//! ```
//!
//! The maximum (not the sum) goes through a hold/attack/release follower so
//! the resulting gain does not chatter.

use crate::error::DspError;
use crate::filter::check_sample_rate;
use crate::follower::SmoothHoldFollower;
use crate::integration::Integrator;

/// Maximum number of integration windows in a detector
pub const MAX_PERCEPTIVE_LEVELS: usize = 32;

pub const MIN_FAST_SECONDS: f64 = 0.0001;
pub const DEFAULT_FAST_SECONDS: f64 = 0.0004;
pub const MAX_FAST_SECONDS: f64 = 0.01;
pub const DEFAULT_SLOW_SECONDS: f64 = 2.4;
pub const MAX_SLOW_SECONDS: f64 = 10.0;
pub const MAX_HOLD_SECONDS: f64 = 0.02;
pub const MAX_RELEASE_SECONDS: f64 = 0.04;

/// Hold time of the detector follower never exceeds this, in seconds
pub const MAX_DETECTOR_HOLD_SECONDS: f64 = 0.001;

/// Tunable constants of the perceptive weighting curve
///
/// These are listening-test values, not a physical law, so they can be
/// overridden per detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerceptiveWeighting {
    /// Window length that is perceived at full loudness
    pub reference_seconds: f64,
    /// Exponent applied to the fast/reference ratio when weighting fast windows
    pub weight_power: f64,
    /// Lowest weight any window can get
    pub min_weight: f64,
    /// Smallest ratio between two adjacent window lengths
    pub min_step_factor: f64,
}

impl Default for PerceptiveWeighting {
    fn default() -> Self {
        Self {
            reference_seconds: 0.4,
            weight_power: 0.25,
            min_weight: 0.25,
            min_step_factor: 1.2,
        }
    }
}

/// Window lengths and weights of a perceptive detector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerceptiveMetrics {
    count: usize,
    perceptive: usize,
    slow_seconds: f64,
    fast_seconds: f64,
    weighting: PerceptiveWeighting,
}

impl Default for PerceptiveMetrics {
    fn default() -> Self {
        Self::new(3, 1, DEFAULT_SLOW_SECONDS, DEFAULT_FAST_SECONDS, PerceptiveWeighting::default())
    }
}

impl PerceptiveMetrics {
    /// Create metrics with `count` windows, window `perceptive` being the
    /// reference window
    ///
    /// The count is at least 2 and the reference window is never the fastest.
    /// The slow window is stretched so that slow steps are at least
    /// `min_step_factor` apart.
    pub fn new(
        count: usize,
        perceptive: usize,
        slow_seconds: f64,
        fast_seconds: f64,
        weighting: PerceptiveWeighting,
    ) -> Self {
        let count = count.clamp(2, MAX_PERCEPTIVE_LEVELS);
        let perceptive = perceptive.min(count - 2);
        // max/min rather than clamp: the lower bound may exceed MAX_SLOW_SECONDS
        let slowest_allowed = weighting.reference_seconds * weighting.min_step_factor.powi(perceptive as i32);
        let slow_seconds = slow_seconds.max(slowest_allowed).min(MAX_SLOW_SECONDS.max(slowest_allowed));
        let fast_seconds = if fast_seconds.is_nan() {
            DEFAULT_FAST_SECONDS
        } else {
            fast_seconds.clamp(MIN_FAST_SECONDS, MAX_FAST_SECONDS)
        };
        Self {
            count,
            perceptive,
            slow_seconds,
            fast_seconds,
            weighting,
        }
    }

    /// Spread at most `max_levels` windows evenly (geometrically) between
    /// `slow_seconds` and `fast_seconds`
    pub fn with_even_steps(
        slow_seconds: f64,
        fast_seconds: f64,
        max_levels: usize,
        weighting: PerceptiveWeighting,
    ) -> Self {
        let levels = max_levels.clamp(2, MAX_PERCEPTIVE_LEVELS);
        if levels == 2 {
            return Self::new(levels, 0, slow_seconds, fast_seconds, weighting);
        }
        let reference = weighting.reference_seconds;
        let step = weighting.min_step_factor.ln();
        let slow = slow_seconds.min(MAX_SLOW_SECONDS);
        let fast = fast_seconds.clamp(MIN_FAST_SECONDS, MAX_FAST_SECONDS);
        let max_slow_steps = (slow.ln() - reference.ln()) / step;
        let max_fast_steps = (reference.ln() - fast.ln()) / step;

        // Saturating float-to-int: negative step counts become zero
        let slow_steps = max_slow_steps as usize;
        let fast_steps = max_fast_steps as usize;
        if slow_steps == 0 {
            return Self::new(levels, 0, reference, fast, weighting);
        }
        if slow_steps + fast_steps < levels {
            return Self::new(slow_steps + fast_steps + 1, slow_steps, slow, fast, weighting);
        }

        let max_steps = levels - 1;
        let scale = max_steps as f64 / (max_slow_steps + max_fast_steps);
        let scaled_slow = max_slow_steps * scale;
        let scaled_fast = max_fast_steps * scale;
        let slow_steps = (scaled_slow as usize).max(1);
        let fast_steps = scaled_fast as usize;
        let extra = max_steps.saturating_sub(slow_steps + fast_steps);
        if extra > 1 && scaled_fast - scaled_slow <= 1.0 {
            return Self::new(levels, slow_steps + 1, slow_seconds, fast_seconds, weighting);
        }
        Self::new(levels, slow_steps, slow_seconds, fast_seconds, weighting)
    }

    /// Metrics spanning the window range of a detection configuration
    ///
    /// Fails unless `minimum_seconds < maximum_seconds`.
    pub fn from_windows(
        minimum_seconds: f64,
        maximum_seconds: f64,
        levels: usize,
        weighting: PerceptiveWeighting,
    ) -> Result<Self, DspError> {
        if !(minimum_seconds > 0.0 && minimum_seconds < maximum_seconds) {
            return Err(DspError::InvalidDetection {
                minimum: minimum_seconds,
                maximum: maximum_seconds,
            });
        }
        Ok(Self::with_even_steps(maximum_seconds, minimum_seconds, levels, weighting))
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Index of the reference window
    pub fn perceptive(&self) -> usize {
        self.perceptive
    }

    pub fn slow_steps(&self) -> usize {
        self.perceptive
    }

    pub fn fast_steps(&self) -> usize {
        self.count - 1 - self.perceptive
    }

    pub fn slow_seconds(&self) -> f64 {
        self.slow_seconds
    }

    pub fn fast_seconds(&self) -> f64 {
        self.fast_seconds
    }

    pub fn weighting(&self) -> &PerceptiveWeighting {
        &self.weighting
    }

    pub fn hold_seconds(&self) -> f64 {
        (3.0 * self.fast_seconds).min(MAX_HOLD_SECONDS)
    }

    pub fn attack_seconds(&self) -> f64 {
        0.5 * self.fast_seconds
    }

    pub fn release_seconds(&self) -> f64 {
        self.fast_seconds.min(MAX_RELEASE_SECONDS)
    }

    /// Window length of level `index` in seconds
    pub fn seconds(&self, index: usize) -> f64 {
        let reference = self.weighting.reference_seconds;
        let p = self.perceptive;
        if index < p {
            let exponent = index as f64 / p as f64;
            self.slow_seconds * (reference / self.slow_seconds).powf(exponent)
        } else if index == p {
            reference
        } else {
            let exponent = (index - p) as f64 / self.fast_steps() as f64;
            reference * (self.fast_seconds / reference).powf(exponent)
        }
    }

    /// Perceptive weight of level `index`
    pub fn weight(&self, index: usize) -> f64 {
        let p = self.perceptive;
        if index <= p {
            return 1.0;
        }
        let exponent = (index - p) as f64 / self.fast_steps() as f64;
        let base = self.fast_seconds / self.weighting.reference_seconds;
        base.powf(exponent * self.weighting.weight_power)
            .max(self.weighting.min_weight)
    }
}

/// Multi-window loudness detector with a smoothing follower
#[derive(Debug, Clone)]
pub struct PerceptiveDetector {
    windows: [Integrator; MAX_PERCEPTIVE_LEVELS],
    scales: [f64; MAX_PERCEPTIVE_LEVELS],
    count: usize,
    follower: SmoothHoldFollower,
}

impl Default for PerceptiveDetector {
    fn default() -> Self {
        Self {
            windows: [Integrator::default(); MAX_PERCEPTIVE_LEVELS],
            scales: [0.0; MAX_PERCEPTIVE_LEVELS],
            count: 0,
            follower: SmoothHoldFollower::default(),
        }
    }
}

impl PerceptiveDetector {
    pub fn new(sample_rate: f64, metrics: &PerceptiveMetrics, initial: f64) -> Result<Self, DspError> {
        let mut detector = Self::default();
        detector.configure(sample_rate, metrics, initial)?;
        Ok(detector)
    }

    /// Set window lengths, weights and follower times
    ///
    /// Every window average and the follower output are set to `initial`.
    pub fn configure(&mut self, sample_rate: f64, metrics: &PerceptiveMetrics, initial: f64) -> Result<(), DspError> {
        self.retune(sample_rate, metrics)?;
        self.reset(initial);
        Ok(())
    }

    /// Like [`configure`](Self::configure) but keeps the current averages
    pub fn retune(&mut self, sample_rate: f64, metrics: &PerceptiveMetrics) -> Result<(), DspError> {
        check_sample_rate(sample_rate)?;
        self.apply_metrics(sample_rate, metrics);
        Ok(())
    }

    /// [`retune`](Self::retune) for a sample rate that already passed
    /// [`check_sample_rate`]
    pub fn apply_metrics(&mut self, sample_rate: f64, metrics: &PerceptiveMetrics) {
        self.count = metrics.count();
        for index in 0..self.count {
            let samples = (metrics.seconds(index) * sample_rate).max(1.0);
            let weight = metrics.weight(index);
            self.windows[index].set_characteristic_samples(samples);
            self.scales[index] = weight * weight;
        }
        let hold = (sample_rate * metrics.hold_seconds().min(MAX_DETECTOR_HOLD_SECONDS)).round() as usize;
        self.follower.set_metrics(
            hold,
            metrics.attack_seconds() * sample_rate,
            metrics.release_seconds() * sample_rate,
        );
    }

    pub fn reset(&mut self, initial: f64) {
        let square = initial * initial;
        for window in &mut self.windows[..self.count] {
            window.set_output(square);
        }
        self.follower.set_output(initial);
    }

    /// Samples by which the detection trails the input
    pub fn latency(&self) -> usize {
        self.follower.hold_samples()
    }

    pub fn levels(&self) -> usize {
        self.count
    }

    /// Add one squared sample and return the smoothed detection
    ///
    /// `minimum` is a floor applied to the weighted mean square before the
    /// square root, so the detection never drops below `sqrt(minimum)`.
    ///
    /// # Real-time Safety
    /// No allocations, one integrator per level.
    #[inline]
    pub fn add_square_get_detection(&mut self, square: f64, minimum: f64) -> f64 {
        let mut loudest = minimum;
        for (window, &scale) in self.windows[..self.count].iter_mut().zip(&self.scales) {
            let weighted = window.integrate(square) * scale;
            if weighted > loudest {
                loudest = weighted;
            }
        }
        self.follower.apply(loudest.sqrt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics() -> PerceptiveMetrics {
        PerceptiveMetrics::with_even_steps(2.4, 0.0004, 11, PerceptiveWeighting::default())
    }

    #[test]
    fn test_metrics_count_bounds() {
        let m = PerceptiveMetrics::new(1, 5, 2.0, 0.001, PerceptiveWeighting::default());
        assert_eq!(m.count(), 2);
        assert_eq!(m.perceptive(), 0);
        assert_eq!(m.fast_steps(), 1);
    }

    #[test]
    fn test_even_steps_respects_max_levels() {
        for levels in [2, 3, 5, 11, 16, 32] {
            let m = PerceptiveMetrics::with_even_steps(4.0, 0.0004, levels, PerceptiveWeighting::default());
            assert!(m.count() <= levels, "{} levels requested, got {}", levels, m.count());
            assert!(m.count() >= 2);
            assert!(m.perceptive() < m.count() - 1);
        }
    }

    #[test]
    fn test_from_windows_rejects_inverted_range() {
        let weighting = PerceptiveWeighting::default();
        assert!(PerceptiveMetrics::from_windows(0.001, 4.0, 11, weighting).is_ok());
        assert!(matches!(
            PerceptiveMetrics::from_windows(4.0, 0.001, 11, weighting),
            Err(DspError::InvalidDetection { .. })
        ));
    }

    #[test]
    fn test_window_lengths_decrease() {
        let m = metrics();
        assert!((m.seconds(m.perceptive()) - 0.4).abs() < 1e-12);
        assert!((m.seconds(0) - m.slow_seconds()).abs() < 1e-12);
        assert!((m.seconds(m.count() - 1) - m.fast_seconds()).abs() < 1e-12);
        for i in 1..m.count() {
            assert!(
                m.seconds(i) < m.seconds(i - 1),
                "Window {} ({}s) not shorter than window {} ({}s)",
                i,
                m.seconds(i),
                i - 1,
                m.seconds(i - 1)
            );
        }
    }

    #[test]
    fn test_weights() {
        let m = metrics();
        for i in 0..=m.perceptive() {
            assert_eq!(m.weight(i), 1.0);
        }
        for i in m.perceptive() + 1..m.count() {
            let w = m.weight(i);
            assert!(w < 1.0 && w >= 0.25, "Weight {} out of range: {}", i, w);
            assert!(w <= m.weight(i - 1));
        }
    }

    #[test]
    fn test_follower_times() {
        let m = PerceptiveMetrics::new(5, 2, 3.0, 0.002, PerceptiveWeighting::default());
        assert!((m.hold_seconds() - 0.006).abs() < 1e-12);
        assert!((m.attack_seconds() - 0.001).abs() < 1e-12);
        assert!((m.release_seconds() - 0.002).abs() < 1e-12);
    }

    #[test]
    fn test_latency_is_capped_hold() {
        let detector = PerceptiveDetector::new(48000.0, &metrics(), 0.0).unwrap();
        // min(3 * 0.4ms, 1ms) at 48kHz
        assert_eq!(detector.latency(), 48);
    }

    #[test]
    fn test_louder_input_gives_higher_detection() {
        let m = metrics();
        let mut previous = 0.0;
        for amplitude in [0.1, 0.5, 1.0, 2.0, 4.0] {
            let mut detector = PerceptiveDetector::new(48000.0, &m, 0.0).unwrap();
            let mut detection = 0.0;
            for _ in 0..4800 {
                detection = detector.add_square_get_detection(amplitude * amplitude, 0.0);
            }
            assert!(
                detection > previous,
                "Amplitude {}: detection {} not above {}",
                amplitude,
                detection,
                previous
            );
            previous = detection;
        }
    }

    #[test]
    fn test_step_response_is_monotone() {
        let mut detector = PerceptiveDetector::new(48000.0, &metrics(), 0.0).unwrap();
        let mut previous = 0.0;
        for n in 0..48000 {
            let detection = detector.add_square_get_detection(1.0, 0.0);
            assert!(detection >= previous - 1e-12, "Sample {}: {} < {}", n, detection, previous);
            assert!(detection <= 1.0 + 1e-9, "Sample {}: {} above input", n, detection);
            previous = detection;
        }
    }

    #[test]
    fn test_silence_decays_towards_zero() {
        let mut detector = PerceptiveDetector::new(48000.0, &metrics(), 0.0).unwrap();
        for _ in 0..4800 {
            detector.add_square_get_detection(1.0, 0.0);
        }
        let loud = detector.add_square_get_detection(1.0, 0.0);
        let mut detection = loud;
        for _ in 0..48000 {
            detection = detector.add_square_get_detection(0.0, 0.0);
            assert!(detection >= 0.0);
        }
        assert!(detection < loud, "Detection should decay: {} vs {}", detection, loud);
    }

    #[test]
    fn test_minimum_floors_detection() {
        let mut detector = PerceptiveDetector::new(48000.0, &metrics(), 1.0).unwrap();
        for _ in 0..1000 {
            let detection = detector.add_square_get_detection(0.0, 1.0);
            assert!((detection - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_invalid_sample_rate() {
        assert!(PerceptiveDetector::new(0.0, &metrics(), 0.0).is_err());
    }
}
