//! Volume / Routing Matrix
//!
//! Maps a set of input channels onto a set of output channels with a gain
//! per `(output, input)` pair. Storage is fixed-size so the matrix is `Copy`
//! and can travel through the transport without allocating.

use crate::integration::IntegrationCoefficients;

pub const MIN_WEIGHT: f64 = 0.0;
pub const MAX_WEIGHT: f64 = 10.0;

/// Weights with a smaller magnitude are stored as zero
pub const WEIGHT_FLUSH: f64 = 1e-8;

/// Fixed-capacity gain matrix
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeMatrix<const OUTPUTS: usize, const INPUTS: usize> {
    weights: [[f64; INPUTS]; OUTPUTS],
    outputs: usize,
    inputs: usize,
}

impl<const OUTPUTS: usize, const INPUTS: usize> Default for VolumeMatrix<OUTPUTS, INPUTS> {
    fn default() -> Self {
        Self::new(OUTPUTS, INPUTS)
    }
}

impl<const OUTPUTS: usize, const INPUTS: usize> VolumeMatrix<OUTPUTS, INPUTS> {
    /// All-zero matrix using the first `outputs` x `inputs` cells
    pub fn new(outputs: usize, inputs: usize) -> Self {
        Self {
            weights: [[0.0; INPUTS]; OUTPUTS],
            outputs: outputs.min(OUTPUTS),
            inputs: inputs.min(INPUTS),
        }
    }

    pub fn outputs(&self) -> usize {
        self.outputs
    }

    pub fn inputs(&self) -> usize {
        self.inputs
    }

    /// Clamp a weight into `[MIN_WEIGHT, MAX_WEIGHT]`
    ///
    /// NaN and near-zero weights become zero.
    pub fn clamp_weight(weight: f64) -> f64 {
        if weight.is_nan() || weight.abs() < WEIGHT_FLUSH {
            0.0
        } else {
            weight.clamp(MIN_WEIGHT, MAX_WEIGHT)
        }
    }

    /// Set one weight; out-of-range cells are ignored
    pub fn set(&mut self, output: usize, input: usize, weight: f64) {
        if output < OUTPUTS && input < INPUTS {
            self.weights[output][input] = Self::clamp_weight(weight);
        }
    }

    pub fn get(&self, output: usize, input: usize) -> f64 {
        if output < OUTPUTS && input < INPUTS {
            self.weights[output][input]
        } else {
            0.0
        }
    }

    pub fn zero(&mut self) {
        self.weights = [[0.0; INPUTS]; OUTPUTS];
    }

    /// Unit diagonal, everything else zero
    pub fn identity(&mut self) {
        self.zero();
        for k in 0..self.outputs.min(self.inputs) {
            self.weights[k][k] = 1.0;
        }
    }

    /// Unit diagonal wrapped modulo the active counts, so that every active
    /// output and every active input is connected
    pub fn identity_wrapped(&mut self) {
        self.zero();
        if self.outputs == 0 || self.inputs == 0 {
            return;
        }
        for k in 0..self.outputs.max(self.inputs) {
            self.weights[k % self.outputs][k % self.inputs] = 1.0;
        }
    }

    /// Weighted sum of the active inputs for every active output
    ///
    /// # Real-time Safety
    /// No allocations.
    #[inline]
    pub fn apply(&self, input: &[f64], output: &mut [f64]) {
        let inputs = self.inputs.min(input.len());
        for (row, out) in self.weights.iter().zip(output.iter_mut()).take(self.outputs) {
            *out = row[..inputs].iter().zip(input).map(|(w, x)| w * x).sum();
        }
    }

    /// Move every cell one integration step towards `target`
    ///
    /// Each step covers the same fraction of the remaining distance, so the
    /// cells move monotonically and never overshoot.
    #[inline]
    pub fn approach(&mut self, target: &Self, coefficients: &IntegrationCoefficients) {
        for (row, target_row) in self.weights.iter_mut().zip(&target.weights) {
            for (cell, &goal) in row.iter_mut().zip(target_row) {
                coefficients.integrate(goal, cell);
            }
        }
        self.outputs = target.outputs;
        self.inputs = target.inputs;
    }
}

/// A matrix whose effective weights glide towards a target
#[derive(Debug, Clone, Copy, Default)]
pub struct SmoothedMatrix<const OUTPUTS: usize, const INPUTS: usize> {
    target: VolumeMatrix<OUTPUTS, INPUTS>,
    actual: VolumeMatrix<OUTPUTS, INPUTS>,
    coefficients: IntegrationCoefficients,
}

impl<const OUTPUTS: usize, const INPUTS: usize> SmoothedMatrix<OUTPUTS, INPUTS> {
    /// `approach_steps` is the characteristic number of
    /// [`approach`](Self::approach) calls
    pub fn new(initial: VolumeMatrix<OUTPUTS, INPUTS>, approach_steps: f64) -> Self {
        Self {
            target: initial,
            actual: initial,
            coefficients: IntegrationCoefficients::new(approach_steps),
        }
    }

    pub fn set_approach_steps(&mut self, steps: f64) {
        self.coefficients.set_characteristic_samples(steps);
    }

    /// Install a new target; the weights are clamped
    pub fn set_target(&mut self, target: &VolumeMatrix<OUTPUTS, INPUTS>) {
        let mut clamped = VolumeMatrix::new(target.outputs(), target.inputs());
        for output in 0..OUTPUTS {
            for input in 0..INPUTS {
                clamped.set(output, input, target.get(output, input));
            }
        }
        self.target = clamped;
    }

    /// Jump straight to the target
    pub fn snap(&mut self) {
        self.actual = self.target;
    }

    pub fn target(&self) -> &VolumeMatrix<OUTPUTS, INPUTS> {
        &self.target
    }

    pub fn actual(&self) -> &VolumeMatrix<OUTPUTS, INPUTS> {
        &self.actual
    }

    #[inline]
    pub fn approach(&mut self) {
        self.actual.approach(&self.target, &self.coefficients);
    }

    /// Apply the current (smoothed) weights
    #[inline]
    pub fn multiply(&self, input: &[f64], output: &mut [f64]) {
        self.actual.apply(input, output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Matrix = VolumeMatrix<4, 3>;

    #[test]
    fn test_set_clamps() {
        let mut m = Matrix::default();
        m.set(0, 0, 15.0);
        m.set(0, 1, -2.0);
        m.set(0, 2, f64::NAN);
        m.set(1, 0, 1e-9);
        m.set(9, 9, 1.0);
        assert_eq!(m.get(0, 0), MAX_WEIGHT);
        assert_eq!(m.get(0, 1), 0.0);
        assert_eq!(m.get(0, 2), 0.0);
        assert_eq!(m.get(1, 0), 0.0);
        assert_eq!(m.get(9, 9), 0.0);
    }

    #[test]
    fn test_identity_wrapped_uses_every_channel() {
        let mut m = VolumeMatrix::<4, 3>::new(4, 2);
        m.identity_wrapped();
        for output in 0..4 {
            let used: f64 = (0..2).map(|input| m.get(output, input)).sum();
            assert!(used > 0.0, "Output {} unconnected", output);
        }
        assert_eq!(m.get(2, 0), 1.0);
        assert_eq!(m.get(3, 1), 1.0);
        // Inactive input stays zero
        assert_eq!(m.get(0, 2), 0.0);
    }

    #[test]
    fn test_apply() {
        let mut m = VolumeMatrix::<2, 2>::new(2, 2);
        m.set(0, 0, 1.0);
        m.set(0, 1, 0.5);
        m.set(1, 1, 2.0);
        let mut out = [0.0; 2];
        m.apply(&[1.0, 2.0], &mut out);
        assert_eq!(out, [2.0, 4.0]);
    }

    #[test]
    fn test_approach_is_monotone_without_overshoot() {
        let mut start = VolumeMatrix::<2, 2>::new(2, 2);
        start.set(0, 0, 1.0);
        start.set(1, 1, 0.0);
        let mut target = VolumeMatrix::<2, 2>::new(2, 2);
        target.set(0, 0, 0.25);
        target.set(1, 1, 3.0);

        let mut smoothed = SmoothedMatrix::new(start, 750.0);
        smoothed.set_target(&target);

        let mut previous = *smoothed.actual();
        for step in 0..20000 {
            smoothed.approach();
            let current = *smoothed.actual();
            let falling = current.get(0, 0);
            let rising = current.get(1, 1);
            assert!(
                falling <= previous.get(0, 0) + 1e-12 && falling >= 0.25 - 1e-12,
                "Step {}: {}",
                step,
                falling
            );
            assert!(
                rising >= previous.get(1, 1) - 1e-12 && rising <= 3.0 + 1e-12,
                "Step {}: {}",
                step,
                rising
            );
            previous = current;
        }
        assert!((previous.get(0, 0) - 0.25).abs() < 1e-6);
        assert!((previous.get(1, 1) - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_set_target_clamps() {
        let mut target = VolumeMatrix::<2, 2>::new(2, 2);
        target.weights[0][0] = 15.0;
        let mut smoothed = SmoothedMatrix::new(VolumeMatrix::new(2, 2), 10.0);
        smoothed.set_target(&target);
        assert_eq!(smoothed.target().get(0, 0), 10.0);
    }
}
