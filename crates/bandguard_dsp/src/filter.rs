//! Sample Filter Interface
//!
//! Defines the per-sample capability shared by every filter in the crate,
//! plus the Butterworth building blocks the crossovers are made of.

use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type, Q_BUTTERWORTH_F64};

use crate::error::DspError;

/// A single-channel, sample-at-a-time filter
///
/// # Real-time Safety Contract
///
/// Implementors MUST follow these rules in `process_sample()`:
/// - NO heap allocations
/// - NO locks, NO syscalls
/// - Constant time per sample
pub trait SampleFilter: Send {
    /// Filter one sample
    fn process_sample(&mut self, input: f64) -> f64;

    /// Clear internal state (delay elements)
    fn reset(&mut self);
}

/// A filter that passes its input unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl SampleFilter for Identity {
    #[inline]
    fn process_sample(&mut self, input: f64) -> f64 {
        input
    }

    fn reset(&mut self) {}
}

/// Pass type of a crossover branch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    Low,
    High,
}

/// Coefficients of a section that passes its input unchanged
pub const PASS_THROUGH: Coefficients<f64> = Coefficients {
    a1: 0.0,
    a2: 0.0,
    b0: 1.0,
    b1: 0.0,
    b2: 0.0,
};

/// Check that a sample rate can be used to design filters
pub fn check_sample_rate(sample_rate: f64) -> Result<(), DspError> {
    if sample_rate.is_finite() && sample_rate > 0.0 {
        Ok(())
    } else {
        Err(DspError::InvalidSampleRate(sample_rate))
    }
}

fn design(filter_type: Type<f64>, sample_rate: f64, frequency: f64, q: f64) -> Result<Coefficients<f64>, DspError> {
    check_sample_rate(sample_rate)?;
    if !(frequency.is_finite() && frequency > 0.0 && frequency < sample_rate / 2.0) {
        return Err(DspError::InvalidCoefficients {
            frequency,
            sample_rate,
        });
    }
    Coefficients::<f64>::from_params(filter_type, sample_rate.hz(), frequency.hz(), q).map_err(|_| {
        DspError::InvalidCoefficients {
            frequency,
            sample_rate,
        }
    })
}

/// Second-order Butterworth coefficients for one pass type
pub fn butterworth(pass: Pass, sample_rate: f64, frequency: f64) -> Result<Coefficients<f64>, DspError> {
    let filter_type = match pass {
        Pass::Low => Type::LowPass,
        Pass::High => Type::HighPass,
    };
    design(filter_type, sample_rate, frequency, Q_BUTTERWORTH_F64)
}

/// Second-order all-pass with the phase response of an LR4 crossover pair
///
/// LR4 low + LR4 high at the same cutoff equals this all-pass exactly.
pub fn crossover_allpass(sample_rate: f64, frequency: f64) -> Result<Coefficients<f64>, DspError> {
    design(Type::AllPass, sample_rate, frequency, Q_BUTTERWORTH_F64)
}

/// Fourth-order Linkwitz-Riley stage: two identical Butterworth biquads in series
pub struct LinkwitzRiley {
    first: DirectForm2Transposed<f64>,
    second: DirectForm2Transposed<f64>,
    pass: Pass,
}

impl LinkwitzRiley {
    pub fn new(pass: Pass, sample_rate: f64, frequency: f64) -> Result<Self, DspError> {
        let coefficients = butterworth(pass, sample_rate, frequency)?;
        Ok(Self {
            first: DirectForm2Transposed::<f64>::new(coefficients),
            second: DirectForm2Transposed::<f64>::new(coefficients),
            pass,
        })
    }

    pub fn pass(&self) -> Pass {
        self.pass
    }

    /// Install coefficients computed for a new cutoff, keeping filter state
    pub fn set_coefficients(&mut self, coefficients: Coefficients<f64>) {
        self.first.update_coefficients(coefficients);
        self.second.update_coefficients(coefficients);
    }
}

impl SampleFilter for LinkwitzRiley {
    #[inline]
    fn process_sample(&mut self, input: f64) -> f64 {
        self.second.run(self.first.run(input))
    }

    fn reset(&mut self) {
        self.first.reset_state();
        self.second.reset_state();
    }
}

/// Single biquad section, used for phase alignment and equalizers
pub struct Section {
    filter: DirectForm2Transposed<f64>,
}

impl Section {
    pub fn new(coefficients: Coefficients<f64>) -> Self {
        Self {
            filter: DirectForm2Transposed::<f64>::new(coefficients),
        }
    }

    pub fn set_coefficients(&mut self, coefficients: Coefficients<f64>) {
        self.filter.update_coefficients(coefficients);
    }
}

impl SampleFilter for Section {
    #[inline]
    fn process_sample(&mut self, input: f64) -> f64 {
        self.filter.run(input)
    }

    fn reset(&mut self) {
        self.filter.reset_state();
    }
}
