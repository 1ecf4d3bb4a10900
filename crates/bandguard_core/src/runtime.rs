//! Runtime Parameters
//!
//! Scales, thresholds and delays derived from a [`ConfigSnapshot`] for one
//! sample rate. The audio thread keeps a target and an actual copy; the
//! continuous values of the actual copy glide towards the target so that a
//! new configuration never clicks.

use bandguard_dsp::{relative_band_weights, IntegrationCoefficients, SmoothedMatrix, MAX_BANDS};

use crate::config::{
    ConfigSnapshot, InputMatrix, MAX_DELAY, MAX_GROUPS, MAX_LOGICAL_INPUTS, MAX_PROCESSING_CHANNELS, MAX_THRESHOLD,
};

/// Parameters are smoothed once every this many samples
pub const CONTROL_INTERVAL: usize = 16;

/// Time constant of parameter smoothing in seconds
pub const APPROACH_SECONDS: f64 = 0.25;

const MIN_BAND_WEIGHT: f64 = 0.001;
const MAX_BAND_WEIGHT: f64 = 0.999;

/// Peak limiter threshold for a loudness threshold
pub fn limiter_threshold(threshold: f64) -> f64 {
    (4.0 * threshold).min(1.0)
}

/// Loudness threshold of one band for a group threshold
pub fn rms_threshold(threshold: f64, band_weight: f64) -> f64 {
    threshold * band_weight.clamp(MIN_BAND_WEIGHT, MAX_BAND_WEIGHT)
}

fn delay_samples(seconds: f64, sample_rate: f64) -> usize {
    (sample_rate * seconds.clamp(0.0, MAX_DELAY)).round() as usize
}

/// Per-group runtime values
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroupRuntime {
    pub delay: usize,
    pub use_sub: bool,
    pub mono: bool,
    /// Multiplier that puts each band's threshold at 1.0
    pub band_rms_scale: [f64; MAX_BANDS],
    pub limiter_scale: f64,
    pub limiter_threshold: f64,
}

impl Default for GroupRuntime {
    fn default() -> Self {
        Self {
            delay: 0,
            use_sub: true,
            mono: false,
            band_rms_scale: [MAX_BANDS as f64; MAX_BANDS],
            limiter_scale: 1.0,
            limiter_threshold: 1.0,
        }
    }
}

impl GroupRuntime {
    fn approach(&mut self, target: &GroupRuntime, coefficients: &IntegrationCoefficients) {
        coefficients.integrate(target.limiter_scale, &mut self.limiter_scale);
        coefficients.integrate(target.limiter_threshold, &mut self.limiter_threshold);
        for (actual, &goal) in self.band_rms_scale.iter_mut().zip(&target.band_rms_scale) {
            coefficients.integrate(goal, actual);
        }
        self.delay = target.delay;
        self.use_sub = target.use_sub;
        self.mono = target.mono;
    }
}

/// Everything the processor needs per sample, for one sample rate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuntimeData {
    pub groups: [GroupRuntime; MAX_GROUPS],
    pub group_count: usize,
    pub sub_limiter_scale: f64,
    pub sub_limiter_threshold: f64,
    pub sub_rms_scale: f64,
    pub sub_delay: usize,
}

impl Default for RuntimeData {
    fn default() -> Self {
        Self {
            groups: [GroupRuntime::default(); MAX_GROUPS],
            group_count: 0,
            sub_limiter_scale: 1.0,
            sub_limiter_threshold: 1.0,
            sub_rms_scale: 1.0,
            sub_delay: 0,
        }
    }
}

impl RuntimeData {
    /// Derive the runtime values of `snapshot` at `sample_rate`
    pub fn derive(snapshot: &ConfigSnapshot, sample_rate: f64) -> Self {
        let mut weights = [0.0; MAX_BANDS];
        let bands = relative_band_weights(snapshot.crossovers(), &mut weights);

        let mut data = Self {
            group_count: snapshot.structure.groups,
            ..Self::default()
        };
        let mut lowest_threshold = MAX_THRESHOLD;
        for (runtime, group) in data.groups.iter_mut().zip(snapshot.groups()) {
            let threshold = (group.threshold * snapshot.threshold_scaling).min(MAX_THRESHOLD);
            lowest_threshold = lowest_threshold.min(threshold);

            runtime.delay = delay_samples(group.delay, sample_rate);
            runtime.use_sub = group.use_sub;
            runtime.mono = group.mono;
            runtime.limiter_threshold = limiter_threshold(threshold);
            runtime.limiter_scale = 1.0 / runtime.limiter_threshold;
            for (scale, &weight) in runtime.band_rms_scale.iter_mut().zip(&weights[..bands]) {
                *scale = 1.0 / rms_threshold(threshold, weight);
            }
        }

        let sub_threshold = snapshot.relative_sub_threshold * lowest_threshold;
        data.sub_limiter_threshold = limiter_threshold(sub_threshold);
        data.sub_limiter_scale = 1.0 / data.sub_limiter_threshold;
        data.sub_rms_scale = 1.0 / rms_threshold(sub_threshold, weights[0]);
        data.sub_delay = delay_samples(snapshot.sub_delay, sample_rate);
        data.compensate_delays();
        data
    }

    /// Subtract the smallest of the sub and group delays from all of them
    fn compensate_delays(&mut self) {
        let minimum = self.groups[..self.group_count]
            .iter()
            .map(|group| group.delay)
            .fold(self.sub_delay, usize::min);
        self.sub_delay -= minimum;
        for group in self.groups[..self.group_count].iter_mut() {
            group.delay -= minimum;
        }
    }

    fn approach(&mut self, target: &RuntimeData, coefficients: &IntegrationCoefficients) {
        coefficients.integrate(target.sub_limiter_scale, &mut self.sub_limiter_scale);
        coefficients.integrate(target.sub_limiter_threshold, &mut self.sub_limiter_threshold);
        coefficients.integrate(target.sub_rms_scale, &mut self.sub_rms_scale);
        for (actual, goal) in self.groups.iter_mut().zip(&target.groups) {
            actual.approach(goal, coefficients);
        }
        self.group_count = target.group_count;
        self.sub_delay = target.sub_delay;
    }
}

/// Target and smoothed runtime values, plus the input routing
pub struct RuntimeParameters {
    target: RuntimeData,
    actual: RuntimeData,
    matrix: SmoothedMatrix<MAX_PROCESSING_CHANNELS, MAX_LOGICAL_INPUTS>,
    coefficients: IntegrationCoefficients,
    control_count: usize,
}

impl Default for RuntimeParameters {
    fn default() -> Self {
        Self {
            target: RuntimeData::default(),
            actual: RuntimeData::default(),
            matrix: SmoothedMatrix::new(InputMatrix::new(0, 0), 1.0),
            coefficients: IntegrationCoefficients::default(),
            control_count: 0,
        }
    }
}

impl RuntimeParameters {
    /// Number of smoothing steps in one approach time
    fn approach_steps(sample_rate: f64) -> f64 {
        APPROACH_SECONDS * sample_rate / CONTROL_INTERVAL as f64
    }

    /// Start from `snapshot`: runtime values are taken as they are, the
    /// input matrix fades in from silence
    pub fn init(&mut self, snapshot: &ConfigSnapshot, sample_rate: f64) {
        self.target = RuntimeData::derive(snapshot, sample_rate);
        self.actual = self.target;
        let steps = Self::approach_steps(sample_rate);
        self.coefficients.set_characteristic_samples(steps);
        let matrix = &snapshot.input_matrix;
        self.matrix = SmoothedMatrix::new(InputMatrix::new(matrix.outputs(), matrix.inputs()), steps);
        self.matrix.set_target(matrix);
        self.control_count = 0;
    }

    /// Install new targets; the actual values glide towards them
    pub fn modify(&mut self, snapshot: &ConfigSnapshot, sample_rate: f64) {
        self.target = RuntimeData::derive(snapshot, sample_rate);
        self.matrix.set_target(&snapshot.input_matrix);
    }

    /// Smoothing step, applied once every [`CONTROL_INTERVAL`] calls
    #[inline]
    pub fn approach(&mut self) {
        if self.control_count == 0 {
            self.actual.approach(&self.target, &self.coefficients);
            self.matrix.approach();
        }
        self.control_count += 1;
        if self.control_count == CONTROL_INTERVAL {
            self.control_count = 0;
        }
    }

    pub fn data(&self) -> &RuntimeData {
        &self.actual
    }

    pub fn target(&self) -> &RuntimeData {
        &self.target
    }

    pub fn input_matrix(&self) -> &InputMatrix {
        self.matrix.actual()
    }

    pub fn target_matrix(&self) -> &InputMatrix {
        self.matrix.target()
    }

    /// Route logical inputs to processing channels with the smoothed weights
    #[inline]
    pub fn route(&self, input: &[f64], output: &mut [f64]) {
        self.matrix.multiply(input, output);
    }
}
