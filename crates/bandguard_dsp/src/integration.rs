//! One-pole integration primitives
//!
//! Every smoothing stage in the crate is built from the same recurrence:
//!
//! ```text
//! y[n] = input * x[n] + history * y[n-1]
//! history = exp(-1 / characteristic_samples)
//! input = 1 - history
//! ```
//!
//! The characteristic sample count is the number of samples it takes the
//! output to cover `1 - 1/e` of a step.

/// Characteristic sample counts below this are treated as "no smoothing".
pub const MIN_CHARACTERISTIC_SAMPLES: f64 = 1e-6;

/// Coefficients of a one-pole integrator
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntegrationCoefficients {
    history: f64,
    input: f64,
}

impl Default for IntegrationCoefficients {
    /// Pass-through coefficients (output follows input immediately)
    fn default() -> Self {
        Self {
            history: 0.0,
            input: 1.0,
        }
    }
}

impl IntegrationCoefficients {
    pub fn new(characteristic_samples: f64) -> Self {
        let mut coefficients = Self::default();
        coefficients.set_characteristic_samples(characteristic_samples);
        coefficients
    }

    /// Recalculate the coefficients for a new time constant
    ///
    /// Non-finite or tiny values collapse to pass-through.
    pub fn set_characteristic_samples(&mut self, samples: f64) {
        if samples.is_finite() && samples >= MIN_CHARACTERISTIC_SAMPLES {
            self.history = (-1.0 / samples).exp();
            self.input = 1.0 - self.history;
        } else {
            self.history = 0.0;
            self.input = 1.0;
        }
    }

    /// The time constant these coefficients were derived from
    pub fn characteristic_samples(&self) -> f64 {
        if self.history <= 0.0 {
            0.0
        } else {
            -1.0 / self.history.ln()
        }
    }

    #[inline]
    pub fn history_multiplier(&self) -> f64 {
        self.history
    }

    #[inline]
    pub fn input_multiplier(&self) -> f64 {
        self.input
    }

    /// Integrate `input` into `output` and return the new output
    #[inline]
    pub fn integrate(&self, input: f64, output: &mut f64) -> f64 {
        *output = self.input * input + self.history * *output;
        *output
    }
}

/// A one-pole integrator that owns its output
#[derive(Debug, Clone, Copy, Default)]
pub struct Integrator {
    coefficients: IntegrationCoefficients,
    output: f64,
}

impl Integrator {
    pub fn new(characteristic_samples: f64, initial: f64) -> Self {
        Self {
            coefficients: IntegrationCoefficients::new(characteristic_samples),
            output: initial,
        }
    }

    pub fn set_characteristic_samples(&mut self, samples: f64) {
        self.coefficients.set_characteristic_samples(samples);
    }

    pub fn set_output(&mut self, value: f64) {
        self.output = value;
    }

    pub fn output(&self) -> f64 {
        self.output
    }

    #[inline]
    pub fn integrate(&mut self, input: f64) -> f64 {
        self.coefficients.integrate(input, &mut self.output)
    }
}

/// Integrator with separate rise (attack) and fall (release) time constants
#[derive(Debug, Clone, Copy, Default)]
pub struct AttackRelease {
    attack: IntegrationCoefficients,
    release: IntegrationCoefficients,
    output: f64,
}

impl AttackRelease {
    pub fn new(attack_samples: f64, release_samples: f64, initial: f64) -> Self {
        Self {
            attack: IntegrationCoefficients::new(attack_samples),
            release: IntegrationCoefficients::new(release_samples),
            output: initial,
        }
    }

    pub fn set_attack_samples(&mut self, samples: f64) {
        self.attack.set_characteristic_samples(samples);
    }

    pub fn set_release_samples(&mut self, samples: f64) {
        self.release.set_characteristic_samples(samples);
    }

    pub fn set_output(&mut self, value: f64) {
        self.output = value;
    }

    pub fn output(&self) -> f64 {
        self.output
    }

    #[inline]
    pub fn integrate(&mut self, input: f64) -> f64 {
        if input > self.output {
            self.attack.integrate(input, &mut self.output)
        } else {
            self.release.integrate(input, &mut self.output)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coefficients_sum_to_one() {
        for samples in [0.5, 1.0, 10.0, 480.0, 48000.0] {
            let c = IntegrationCoefficients::new(samples);
            let sum = c.input_multiplier() + c.history_multiplier();
            assert!((sum - 1.0).abs() < 1e-12, "samples {}: sum {}", samples, sum);
        }
    }

    #[test]
    fn test_tiny_time_constant_is_passthrough() {
        let c = IntegrationCoefficients::new(0.0);
        let mut y = 0.3;
        assert_eq!(c.integrate(0.7, &mut y), 0.7);

        let c = IntegrationCoefficients::new(f64::NAN);
        assert_eq!(c.input_multiplier(), 1.0);
    }

    #[test]
    fn test_characteristic_samples_round_trip() {
        let c = IntegrationCoefficients::new(250.0);
        assert!((c.characteristic_samples() - 250.0).abs() < 1e-6);
    }

    #[test]
    fn test_step_reaches_one_minus_one_over_e() {
        let samples = 100.0;
        let mut integrator = Integrator::new(samples, 0.0);
        for _ in 0..100 {
            integrator.integrate(1.0);
        }
        let expected = 1.0 - (-1.0_f64).exp();
        assert!(
            (integrator.output() - expected).abs() < 1e-9,
            "Output after one time constant: {}",
            integrator.output()
        );
    }

    #[test]
    fn test_attack_release_uses_both_rates() {
        let mut ar = AttackRelease::new(1.0, 1000.0, 0.0);
        ar.integrate(1.0);
        let after_attack = ar.output();
        assert!(after_attack > 0.6, "Fast attack should rise quickly: {}", after_attack);

        ar.set_output(1.0);
        ar.integrate(0.0);
        assert!(ar.output() > 0.99, "Slow release should barely move: {}", ar.output());
    }
}
