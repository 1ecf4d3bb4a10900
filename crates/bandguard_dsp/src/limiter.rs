//! Peak Limiters
//!
//! A limiter turns a stream of peak values into a gain. The audio it is
//! applied to must be delayed by [`Limiter::latency`] samples, which lets
//! predictive variants reduce the gain *before* a peak reaches the output.
//!
//! Every variant keeps an internal envelope that never drops below the
//! threshold, and returns `threshold / envelope`, so the gain is always in
//! `(0, 1]`.

use std::f64::consts::FRAC_1_SQRT_2;

use serde::{Deserialize, Serialize};

use crate::integration::IntegrationCoefficients;

/// Look-ahead time of the predictive limiters
pub const LIMITER_PREDICTION_SECONDS: f64 = 0.001;

/// Default release time of the limiters
pub const LIMITER_RELEASE_SECONDS: f64 = 0.005;

/// Which limiter implementation to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimiterKind {
    /// Held exponential attack, cascaded release
    Cheap,
    /// No look-ahead: the gain follows peaks instantly
    ZeroPrediction,
    /// Linear ramps that reach every peak in time
    Triangular,
    /// Held peak through a four-stage attack smoother
    #[default]
    LookAhead,
}

/// Parameters shared by every limiter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimiterSettings {
    pub prediction_samples: usize,
    pub threshold: f64,
    pub sample_rate: f64,
    pub release_seconds: f64,
}

impl LimiterSettings {
    /// Default prediction and release for `sample_rate`
    pub fn for_sample_rate(sample_rate: f64, threshold: f64) -> Self {
        Self {
            prediction_samples: (LIMITER_PREDICTION_SECONDS * sample_rate).round() as usize,
            threshold,
            sample_rate,
            release_seconds: LIMITER_RELEASE_SECONDS,
        }
    }

    fn release_samples(&self) -> f64 {
        self.release_seconds * self.sample_rate
    }
}

/// Gain computer for one peak-detected signal
///
/// # Real-time Safety Contract
///
/// `gain()` must not allocate, lock or block. `configure()` and
/// `retune()` may be called from the audio thread as long as the
/// prediction stays within the capacity given at construction.
pub trait Limiter: Send {
    /// Apply settings and return to unity gain
    fn configure(&mut self, settings: &LimiterSettings);

    /// Apply settings while audio is flowing
    ///
    /// The envelope survives, so peaks already in the delay line stay
    /// limited. Only the release time changes in place; a different
    /// prediction or threshold falls back to [`configure`](Self::configure).
    fn retune(&mut self, settings: &LimiterSettings);

    /// Delay (in samples) the limited audio must be given
    fn latency(&self) -> usize;

    /// Feed one peak value (usually `|x|`) and return the gain for the
    /// sample `latency()` samples back
    fn gain(&mut self, sample: f64) -> f64;

    /// Return to the idle state (unity gain)
    fn reset(&mut self);
}

/// Holds each peak (scaled up to cancel the attack shortfall) for the
/// prediction time, then releases through two cascaded integrators
#[derive(Debug, Clone, Default)]
pub struct CheapLimiter {
    attack: IntegrationCoefficients,
    release: IntegrationCoefficients,
    hold: f64,
    first: f64,
    second: f64,
    threshold: f64,
    peak_factor: f64,
    hold_count: usize,
    latency: usize,
}

impl CheapLimiter {
    const PREDICTION_FACTOR: f64 = 0.3;

    fn set_release(&mut self, settings: &LimiterSettings) {
        self.release
            .set_characteristic_samples(settings.release_samples() * FRAC_1_SQRT_2);
    }
}

impl Limiter for CheapLimiter {
    fn configure(&mut self, settings: &LimiterSettings) {
        self.latency = settings.prediction_samples;
        self.attack
            .set_characteristic_samples(Self::PREDICTION_FACTOR * settings.prediction_samples as f64);
        self.threshold = settings.threshold;
        self.peak_factor = 1.0 / (1.0 - (-1.0 / Self::PREDICTION_FACTOR).exp());
        self.set_release(settings);
        self.reset();
    }

    fn retune(&mut self, settings: &LimiterSettings) {
        if settings.prediction_samples == self.latency && settings.threshold == self.threshold {
            self.set_release(settings);
        } else {
            self.configure(settings);
        }
    }

    fn latency(&self) -> usize {
        self.latency
    }

    #[inline]
    fn gain(&mut self, sample: f64) -> f64 {
        let peak = sample.max(self.threshold);
        if peak > self.hold {
            self.hold = peak * self.peak_factor;
            self.hold_count = self.latency + 1;
            self.attack.integrate(self.hold, &mut self.first);
            self.second = self.first;
        } else if self.hold_count > 0 {
            self.hold_count -= 1;
            self.attack.integrate(self.hold, &mut self.first);
            self.second = self.first;
        } else {
            self.hold = peak;
            self.release.integrate(peak, &mut self.first);
            self.release.integrate(self.first, &mut self.second);
        }
        (self.threshold / self.second).min(1.0)
    }

    fn reset(&mut self) {
        self.hold = self.threshold;
        self.hold_count = 0;
        self.first = self.threshold;
        self.second = self.threshold;
    }
}

/// Instant attack, cascaded release; no delay needed but the gain
/// changes abruptly on every new peak
#[derive(Debug, Clone, Default)]
pub struct ZeroPredictionLimiter {
    release: IntegrationCoefficients,
    first: f64,
    second: f64,
    threshold: f64,
}

impl ZeroPredictionLimiter {
    fn set_release(&mut self, settings: &LimiterSettings) {
        self.release
            .set_characteristic_samples(settings.release_samples() * FRAC_1_SQRT_2);
    }
}

impl Limiter for ZeroPredictionLimiter {
    fn configure(&mut self, settings: &LimiterSettings) {
        self.threshold = settings.threshold;
        self.set_release(settings);
        self.reset();
    }

    fn retune(&mut self, settings: &LimiterSettings) {
        if settings.threshold == self.threshold {
            self.set_release(settings);
        } else {
            self.configure(settings);
        }
    }

    fn latency(&self) -> usize {
        0
    }

    #[inline]
    fn gain(&mut self, sample: f64) -> f64 {
        let peak = sample.max(self.threshold);
        if peak >= self.first {
            self.first = peak;
            self.second = peak;
        } else {
            self.release.integrate(peak, &mut self.first);
            self.release.integrate(self.first, &mut self.second);
        }
        (self.threshold / self.second).min(1.0)
    }

    fn reset(&mut self) {
        self.first = self.threshold;
        self.second = self.threshold;
    }
}

/// Holds each peak for the prediction time and smooths it with four
/// cascaded attack integrators
///
/// The held value is scaled by the inverse of the cascade's step response
/// at `prediction` samples, so the smoothed envelope reaches the peak
/// exactly when the peak leaves the delay line.
#[derive(Debug, Clone, Default)]
pub struct LookAheadLimiter {
    attack: IntegrationCoefficients,
    release: IntegrationCoefficients,
    release_stages: [f64; 2],
    attack_stages: [f64; 4],
    overshoot: f64,
    hold_peak: f64,
    threshold: f64,
    prediction: usize,
    count: usize,
}

impl LookAheadLimiter {
    const MIN_ATTACK_SAMPLES: usize = 8;

    fn overshoot_for(attack: &IntegrationCoefficients, prediction: usize) -> f64 {
        let mut stages = [0.0; 4];
        for _ in 0..prediction {
            attack.integrate(1.0, &mut stages[0]);
            attack.integrate(stages[0], &mut stages[1]);
            attack.integrate(stages[1], &mut stages[2]);
            attack.integrate(stages[2], &mut stages[3]);
        }
        1.0 / stages[3]
    }

    fn set_release(&mut self, settings: &LimiterSettings) {
        self.release
            .set_characteristic_samples(settings.sample_rate * settings.release_seconds.clamp(0.001, 0.1));
    }
}

impl Limiter for LookAheadLimiter {
    fn configure(&mut self, settings: &LimiterSettings) {
        self.threshold = settings.threshold;
        self.prediction = settings.prediction_samples;
        if self.prediction == 0 {
            self.attack = IntegrationCoefficients::default();
            self.overshoot = 1.0;
        } else {
            let attack_samples = (self.prediction / 6).max(Self::MIN_ATTACK_SAMPLES);
            self.attack.set_characteristic_samples(attack_samples as f64);
            self.overshoot = Self::overshoot_for(&self.attack, self.prediction);
        }
        self.set_release(settings);
        self.reset();
    }

    fn retune(&mut self, settings: &LimiterSettings) {
        if settings.prediction_samples == self.prediction && settings.threshold == self.threshold {
            self.set_release(settings);
        } else {
            self.configure(settings);
        }
    }

    fn latency(&self) -> usize {
        self.prediction
    }

    #[inline]
    fn gain(&mut self, sample: f64) -> f64 {
        let limit = sample.max(self.threshold);
        if limit > self.hold_peak {
            self.hold_peak = limit;
            self.count = self.prediction;
        } else if self.count > 0 {
            self.count -= 1;
        } else {
            self.hold_peak = limit;
        }
        let corrected = self.threshold + (self.hold_peak - self.threshold) * self.overshoot;
        let [first, second] = &mut self.release_stages;
        if corrected > *second {
            *first = corrected;
            *second = corrected;
        } else {
            self.release.integrate(corrected, first);
            self.release.integrate(*first, second);
        }
        let mut value = *second;
        for stage in &mut self.attack_stages {
            value = self.attack.integrate(value, stage);
        }
        (self.threshold / value).min(1.0)
    }

    fn reset(&mut self) {
        self.release_stages = [self.threshold; 2];
        self.attack_stages = [self.threshold; 4];
        self.hold_peak = self.threshold;
        self.count = 0;
    }
}

/// Ramps the envelope up linearly, steep enough that every buffered peak
/// is reached by the time it leaves the delay line
///
/// This is the brick-wall variant: `|delayed(x)| * gain <= threshold` for
/// every sample.
#[derive(Debug, Clone)]
pub struct TriangularLimiter {
    // Ring of the last prediction + 1 peaks, floored at the threshold
    peaks: Vec<f64>,
    write: usize,
    prediction: usize,
    release: IntegrationCoefficients,
    envelope: f64,
    threshold: f64,
}

impl TriangularLimiter {
    /// Allocates room for predictions up to `max_prediction` samples
    pub fn new(max_prediction: usize) -> Self {
        Self {
            peaks: vec![0.0; max_prediction + 1],
            write: 0,
            prediction: 0,
            release: IntegrationCoefficients::default(),
            envelope: 0.0,
            threshold: 1.0,
        }
    }

    /// Largest prediction this limiter can be configured with
    pub fn max_prediction(&self) -> usize {
        self.peaks.len() - 1
    }
}

impl Limiter for TriangularLimiter {
    fn configure(&mut self, settings: &LimiterSettings) {
        self.prediction = settings.prediction_samples.min(self.max_prediction());
        self.threshold = settings.threshold;
        self.release.set_characteristic_samples(settings.release_samples());
        self.reset();
    }

    fn retune(&mut self, settings: &LimiterSettings) {
        let prediction = settings.prediction_samples.min(self.max_prediction());
        if prediction == self.prediction && settings.threshold == self.threshold {
            self.release.set_characteristic_samples(settings.release_samples());
        } else {
            self.configure(settings);
        }
    }

    fn latency(&self) -> usize {
        self.prediction
    }

    #[inline]
    fn gain(&mut self, sample: f64) -> f64 {
        let length = self.prediction + 1;
        self.peaks[self.write] = sample.max(self.threshold);

        // The peak of age `a` leaves the delay line in `prediction - a` samples
        let mut step = 0.0;
        let mut highest = self.threshold;
        for age in 0..length {
            let index = (self.write + length - age) % length;
            let peak = self.peaks[index];
            highest = highest.max(peak);
            let needed = (peak - self.envelope) / (self.prediction - age + 1) as f64;
            if needed > step {
                step = needed;
            }
        }
        if step > 0.0 {
            self.envelope += step;
        } else {
            self.release.integrate(highest, &mut self.envelope);
        }

        self.write += 1;
        if self.write == length {
            self.write = 0;
        }
        (self.threshold / self.envelope).min(1.0)
    }

    fn reset(&mut self) {
        let threshold = self.threshold;
        self.peaks.iter_mut().for_each(|p| *p = threshold);
        self.write = 0;
        self.envelope = threshold;
    }
}

/// A limiter of any kind, chosen at construction
#[derive(Debug, Clone)]
pub enum LimiterVariant {
    Cheap(CheapLimiter),
    ZeroPrediction(ZeroPredictionLimiter),
    Triangular(TriangularLimiter),
    LookAhead(LookAheadLimiter),
}

impl LimiterVariant {
    /// Create an unconfigured limiter; `max_prediction` sizes any buffers
    ///
    /// Allocates for [`LimiterKind::Triangular`].
    pub fn new(kind: LimiterKind, max_prediction: usize) -> Self {
        match kind {
            LimiterKind::Cheap => Self::Cheap(CheapLimiter::default()),
            LimiterKind::ZeroPrediction => Self::ZeroPrediction(ZeroPredictionLimiter::default()),
            LimiterKind::Triangular => Self::Triangular(TriangularLimiter::new(max_prediction)),
            LimiterKind::LookAhead => Self::LookAhead(LookAheadLimiter::default()),
        }
    }

    pub fn kind(&self) -> LimiterKind {
        match self {
            Self::Cheap(_) => LimiterKind::Cheap,
            Self::ZeroPrediction(_) => LimiterKind::ZeroPrediction,
            Self::Triangular(_) => LimiterKind::Triangular,
            Self::LookAhead(_) => LimiterKind::LookAhead,
        }
    }

    fn inner(&mut self) -> &mut dyn Limiter {
        match self {
            Self::Cheap(l) => l,
            Self::ZeroPrediction(l) => l,
            Self::Triangular(l) => l,
            Self::LookAhead(l) => l,
        }
    }
}

impl Limiter for LimiterVariant {
    fn configure(&mut self, settings: &LimiterSettings) {
        self.inner().configure(settings);
    }

    fn retune(&mut self, settings: &LimiterSettings) {
        self.inner().retune(settings);
    }

    fn latency(&self) -> usize {
        match self {
            Self::Cheap(l) => l.latency(),
            Self::ZeroPrediction(l) => l.latency(),
            Self::Triangular(l) => l.latency(),
            Self::LookAhead(l) => l.latency(),
        }
    }

    #[inline]
    fn gain(&mut self, sample: f64) -> f64 {
        // Static dispatch in the per-sample path
        match self {
            Self::Cheap(l) => l.gain(sample),
            Self::ZeroPrediction(l) => l.gain(sample),
            Self::Triangular(l) => l.gain(sample),
            Self::LookAhead(l) => l.gain(sample),
        }
    }

    fn reset(&mut self) {
        self.inner().reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KINDS: [LimiterKind; 4] = [
        LimiterKind::Cheap,
        LimiterKind::ZeroPrediction,
        LimiterKind::Triangular,
        LimiterKind::LookAhead,
    ];

    fn limiter(kind: LimiterKind, threshold: f64) -> LimiterVariant {
        let settings = LimiterSettings::for_sample_rate(48000.0, threshold);
        let mut limiter = LimiterVariant::new(kind, settings.prediction_samples);
        limiter.configure(&settings);
        limiter
    }

    /// Deterministic noise in [-amplitude, amplitude]
    fn noise(n: usize, amplitude: f64) -> f64 {
        let x = (n as u64).wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        ((x >> 11) as f64 / (1u64 << 53) as f64 * 2.0 - 1.0) * amplitude
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in KINDS {
            assert_eq!(LimiterVariant::new(kind, 48).kind(), kind);
        }
        assert_eq!(LimiterKind::default(), LimiterKind::LookAhead);
    }

    #[test]
    fn test_latency() {
        assert_eq!(limiter(LimiterKind::Cheap, 1.0).latency(), 48);
        assert_eq!(limiter(LimiterKind::ZeroPrediction, 1.0).latency(), 0);
        assert_eq!(limiter(LimiterKind::Triangular, 1.0).latency(), 48);
        assert_eq!(limiter(LimiterKind::LookAhead, 1.0).latency(), 48);
    }

    #[test]
    fn test_gain_is_unity_for_silence() {
        for kind in KINDS {
            let mut l = limiter(kind, 0.5);
            for n in 0..1000 {
                let gain = l.gain(0.0);
                assert!((gain - 1.0).abs() < 1e-12, "{:?} sample {}: gain {}", kind, n, gain);
            }
        }
    }

    #[test]
    fn test_gain_bounded() {
        for kind in KINDS {
            let mut l = limiter(kind, 0.3);
            for n in 0..48000 {
                let gain = l.gain(noise(n, 3.0).abs());
                assert!(gain > 0.0 && gain <= 1.0, "{:?} sample {}: gain {}", kind, n, gain);
            }
        }
    }

    #[test]
    fn test_gain_recovers_when_input_vanishes() {
        for kind in KINDS {
            let mut l = limiter(kind, 0.2);
            for n in 0..4800 {
                l.gain(noise(n, 2.0).abs());
            }
            let mut gain = 0.0;
            for _ in 0..48000 {
                gain = l.gain(0.0);
            }
            assert!(gain > 0.99, "{:?} did not recover: {}", kind, gain);
        }
    }

    #[test]
    fn test_step_with_look_ahead() {
        let threshold = 0.1;
        let mut l = limiter(LimiterKind::LookAhead, threshold);
        let prediction = l.latency();
        for _ in 0..4800 {
            l.gain(0.0);
        }
        for n in 0..4800 {
            let gain = l.gain(1.0);
            if n >= prediction {
                assert!(gain <= threshold + 1e-9, "Sample {} after step: gain {}", n, gain);
            }
        }
        let mut gain = 0.0;
        for _ in 0..24000 {
            gain = l.gain(0.0);
        }
        assert!(gain > 0.99, "Gain after 0.5s of silence: {}", gain);
    }

    #[test]
    fn test_step_response_and_recovery() {
        let threshold = 0.1;
        for kind in KINDS {
            let mut l = limiter(kind, threshold);
            let latency = l.latency();
            for _ in 0..4800 {
                l.gain(0.0);
            }
            for n in 0..4800 {
                let gain = l.gain(1.0);
                if n >= latency {
                    assert!(gain <= threshold + 1e-9, "{:?} sample {} after step: gain {}", kind, n, gain);
                }
            }

            // The step is still leaving the delay line, so the gain stays low
            let mut gain = 0.0;
            for _ in 0..latency + 48 {
                gain = l.gain(0.0);
            }
            assert!(gain < 0.5, "{:?} released too fast: {}", kind, gain);

            for _ in 0..4800 {
                gain = l.gain(0.0);
            }
            assert!(gain > 0.99, "{:?} gain after 0.1s of silence: {}", kind, gain);
        }
    }

    #[test]
    fn test_retune_keeps_envelope() {
        let threshold = 0.1;
        let slower = LimiterSettings {
            release_seconds: 0.05,
            ..LimiterSettings::for_sample_rate(48000.0, threshold)
        };
        for kind in KINDS {
            let mut l = limiter(kind, threshold);
            let latency = l.latency();
            for _ in 0..4800 {
                l.gain(1.0);
            }
            l.retune(&slower);
            assert_eq!(l.latency(), latency, "{:?} latency changed", kind);
            for n in 0..480 {
                let gain = l.gain(1.0);
                assert!(gain <= threshold + 1e-9, "{:?} sample {} after retune: gain {}", kind, n, gain);
            }
        }
    }

    #[test]
    fn test_retune_changes_release() {
        let threshold = 0.1;
        let slower = LimiterSettings {
            release_seconds: 0.05,
            ..LimiterSettings::for_sample_rate(48000.0, threshold)
        };
        for kind in KINDS {
            let mut fast = limiter(kind, threshold);
            let mut slow = limiter(kind, threshold);
            slow.retune(&slower);
            for _ in 0..4800 {
                fast.gain(1.0);
                slow.gain(1.0);
            }
            let (mut fast_gain, mut slow_gain) = (0.0, 0.0);
            for _ in 0..480 {
                fast_gain = fast.gain(0.0);
                slow_gain = slow.gain(0.0);
            }
            assert!(
                slow_gain < fast_gain,
                "{:?}: slow release {} not below fast release {}",
                kind,
                slow_gain,
                fast_gain
            );
        }
    }

    #[test]
    fn test_retune_with_new_threshold_resets() {
        for kind in KINDS {
            let mut l = limiter(kind, 0.1);
            for _ in 0..4800 {
                l.gain(1.0);
            }
            l.retune(&LimiterSettings::for_sample_rate(48000.0, 0.5));
            let gain = l.gain(0.0);
            assert!((gain - 1.0).abs() < 1e-12, "{:?} kept its envelope: {}", kind, gain);
        }
    }

    #[test]
    fn test_brick_wall_variants_never_exceed_threshold() {
        let threshold = 0.25;
        for kind in [LimiterKind::Triangular, LimiterKind::LookAhead] {
            let mut l = limiter(kind, threshold);
            let delay = l.latency();
            let mut history = vec![0.0; delay + 1];
            for n in 0..48000 {
                // Bursts of noise with varying loudness
                let amplitude = if (n / 1200) % 3 == 0 { 0.1 } else { 1.0 + (n % 7) as f64 };
                let x = noise(n, amplitude);
                let gain = l.gain(x.abs());
                history[n % (delay + 1)] = x;
                let delayed = history[(n + 1) % (delay + 1)];
                assert!(
                    (delayed * gain).abs() <= threshold * (1.0 + 1e-9),
                    "{:?} sample {}: {} exceeds {}",
                    kind,
                    n,
                    (delayed * gain).abs(),
                    threshold
                );
            }
        }
    }

    #[test]
    fn test_zero_prediction_is_immediate() {
        let mut l = limiter(LimiterKind::ZeroPrediction, 0.5);
        let gain = l.gain(2.0);
        assert!((gain - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_nan_input_is_ignored() {
        for kind in KINDS {
            let mut l = limiter(kind, 0.5);
            let gain = l.gain(f64::NAN);
            assert!(gain.is_finite() && gain <= 1.0, "{:?}: {}", kind, gain);
        }
    }

    #[test]
    fn test_triangular_prediction_clamped_to_capacity() {
        let mut l = TriangularLimiter::new(16);
        l.configure(&LimiterSettings::for_sample_rate(48000.0, 1.0));
        assert_eq!(l.latency(), 16);
    }
}
