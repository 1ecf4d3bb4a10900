//! Linkwitz-Riley Crossover Bank
//!
//! Splits every channel into `crossovers + 1` frequency bands using a chain
//! of fourth-order Linkwitz-Riley stages:
//!
//! ```text
//! x ──┬─ LP(f0) ──────────────────── [AP(f1)] [AP(f2)] ─► band 0
//!     └─ HP(f0) ─┬─ LP(f1) ───────── [AP(f2)] ──────────► band 1
//!                └─ HP(f1) ─┬─ LP(f2) ──────────────────► band 2
//!                           └─ HP(f2) ──────────────────► band 3
//! ```
//!
//! LR4 low + LR4 high at one cutoff equals a second-order all-pass at that
//! cutoff. With the bracketed all-pass sections in place every band has seen
//! every crossover exactly once, so the band sum is an all-pass with a flat
//! magnitude response.

use crate::delay::MultiChannelDelay;
use crate::error::DspError;
use biquad::Coefficients;

use crate::filter::{
    butterworth, check_sample_rate, crossover_allpass, LinkwitzRiley, Pass, SampleFilter, Section, PASS_THROUGH,
};

/// Maximum number of crossover frequencies
pub const MAX_CROSSOVERS: usize = 12;

/// Maximum number of bands
pub const MAX_BANDS: usize = MAX_CROSSOVERS + 1;

/// Maximum number of channels one bank can split
pub const MAX_BANK_CHANNELS: usize = 64;

fn check_channels(channels: usize) -> Result<(), DspError> {
    if channels > MAX_BANK_CHANNELS {
        Err(DspError::TooManyChannels {
            requested: channels,
            capacity: MAX_BANK_CHANNELS,
        })
    } else {
        Ok(())
    }
}

/// Lowest crossover frequency the delay-compensated variant is sized for
pub const MIN_DELAY_COMPENSATED_FREQUENCY: f64 = 20.0;

/// Highest sample rate the delay-compensated variant is sized for
pub const MAX_DELAY_COMPENSATED_SAMPLE_RATE: f64 = 192000.0;

/// Frequency range used to divide energy between bands
pub const WEIGHT_LOW_FREQUENCY: f64 = 20.0;
pub const WEIGHT_HIGH_FREQUENCY: f64 = 8000.0;

/// Check a crossover frequency set against a sample rate
///
/// The set must hold between 1 and [`MAX_CROSSOVERS`] frequencies, in
/// strictly ascending order, each inside `(0, Nyquist)`.
pub fn validate_crossovers(frequencies: &[f64], sample_rate: f64) -> Result<(), DspError> {
    check_sample_rate(sample_rate)?;
    if frequencies.is_empty() || frequencies.len() > MAX_CROSSOVERS {
        return Err(DspError::InvalidCrossovers(format!(
            "expected 1 to {} crossovers, got {}",
            MAX_CROSSOVERS,
            frequencies.len()
        )));
    }
    let nyquist = sample_rate / 2.0;
    for (index, &frequency) in frequencies.iter().enumerate() {
        if !(frequency.is_finite() && frequency > 0.0 && frequency < nyquist) {
            return Err(DspError::InvalidCrossovers(format!(
                "crossover {} at {}Hz is outside (0, {}Hz)",
                index, frequency, nyquist
            )));
        }
        if index > 0 && frequency <= frequencies[index - 1] {
            return Err(DspError::InvalidCrossovers(format!(
                "crossover {} at {}Hz is not above {}Hz",
                index,
                frequency,
                frequencies[index - 1]
            )));
        }
    }
    Ok(())
}

/// Relative weight of each band in a pink-noise signal
///
/// Writes one weight per band (`frequencies.len() + 1` values) into `out`
/// and returns the number written. Each band's share of the energy between
/// [`WEIGHT_LOW_FREQUENCY`] and [`WEIGHT_HIGH_FREQUENCY`] is proportional to
/// the logarithm of its frequency span; the weight is the square root of
/// that share, so the squared weights sum to one.
pub fn relative_band_weights(frequencies: &[f64], out: &mut [f64]) -> usize {
    let bands = (frequencies.len() + 1).min(out.len());
    let total = (WEIGHT_HIGH_FREQUENCY / WEIGHT_LOW_FREQUENCY).ln();
    let clip = |f: f64| f.clamp(WEIGHT_LOW_FREQUENCY, WEIGHT_HIGH_FREQUENCY);
    for (band, weight) in out.iter_mut().take(bands).enumerate() {
        let low = if band == 0 {
            WEIGHT_LOW_FREQUENCY
        } else {
            clip(frequencies[band - 1])
        };
        let high = if band == frequencies.len() {
            WEIGHT_HIGH_FREQUENCY
        } else {
            clip(frequencies[band])
        };
        let share = if high > low { (high / low).ln() / total } else { 0.0 };
        *weight = share.sqrt();
    }
    bands
}

/// Coefficients for one frequency set, computed ahead of installing them
///
/// Designing can fail, installing cannot, so a bank is either fully
/// switched to a new set or left alone.
#[derive(Debug, Clone, Copy)]
pub struct CrossoverDesign {
    frequencies: [f64; MAX_CROSSOVERS],
    low: [Coefficients<f64>; MAX_CROSSOVERS],
    high: [Coefficients<f64>; MAX_CROSSOVERS],
    allpass: [Coefficients<f64>; MAX_CROSSOVERS],
    count: usize,
}

impl CrossoverDesign {
    pub fn new(sample_rate: f64, frequencies: &[f64]) -> Result<Self, DspError> {
        validate_crossovers(frequencies, sample_rate)?;
        let mut design = Self {
            frequencies: [0.0; MAX_CROSSOVERS],
            low: [PASS_THROUGH; MAX_CROSSOVERS],
            high: [PASS_THROUGH; MAX_CROSSOVERS],
            allpass: [PASS_THROUGH; MAX_CROSSOVERS],
            count: frequencies.len(),
        };
        for (index, &frequency) in frequencies.iter().enumerate() {
            design.frequencies[index] = frequency;
            design.low[index] = butterworth(Pass::Low, sample_rate, frequency)?;
            design.high[index] = butterworth(Pass::High, sample_rate, frequency)?;
            design.allpass[index] = crossover_allpass(sample_rate, frequency)?;
        }
        Ok(design)
    }

    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies[..self.count]
    }
}

/// Multi-channel Linkwitz-Riley crossover bank
pub struct CrossoverBank {
    sample_rate: f64,
    frequencies: Vec<f64>,
    channels: usize,
    // Index: crossover * channels + channel
    low: Vec<LinkwitzRiley>,
    high: Vec<LinkwitzRiley>,
    // One section per (band, later crossover) pair, per channel
    alignment: Vec<Section>,
    phase_aligned: bool,
}

impl CrossoverBank {
    /// Create a phase-aligned crossover bank
    ///
    /// Allocates; call during setup.
    pub fn new(sample_rate: f64, frequencies: &[f64], channels: usize) -> Result<Self, DspError> {
        check_channels(channels)?;
        validate_crossovers(frequencies, sample_rate)?;
        let mut bank = Self {
            sample_rate,
            frequencies: Vec::with_capacity(MAX_CROSSOVERS),
            channels,
            low: Vec::new(),
            high: Vec::new(),
            alignment: Vec::new(),
            phase_aligned: true,
        };
        bank.rebuild(frequencies)?;
        Ok(bank)
    }

    /// Number of crossover frequencies
    pub fn crossovers(&self) -> usize {
        self.frequencies.len()
    }

    pub fn bands(&self) -> usize {
        self.frequencies.len() + 1
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn is_phase_aligned(&self) -> bool {
        self.phase_aligned
    }

    /// Enable or disable the all-pass sections that flatten the band sum
    pub fn set_phase_aligned(&mut self, aligned: bool) {
        if aligned != self.phase_aligned {
            for section in &mut self.alignment {
                section.reset();
            }
            self.phase_aligned = aligned;
        }
    }

    /// Recompute every coefficient for a new sample rate or frequency set
    ///
    /// Filter state survives unless `reset_state` is set. Only a change in
    /// the number of crossovers allocates (and always resets).
    pub fn configure(&mut self, sample_rate: f64, frequencies: &[f64], reset_state: bool) -> Result<(), DspError> {
        let design = CrossoverDesign::new(sample_rate, frequencies)?;
        self.sample_rate = sample_rate;
        if frequencies.len() != self.frequencies.len() {
            return self.rebuild(frequencies);
        }
        self.apply(&design);
        if reset_state {
            self.reset();
        }
        Ok(())
    }

    /// Install a design with the current number of crossovers
    ///
    /// Keeps filter state. A design with a different count is ignored and
    /// `false` returned. Does not allocate.
    pub fn apply(&mut self, design: &CrossoverDesign) -> bool {
        if design.count != self.frequencies.len() {
            return false;
        }
        self.frequencies.copy_from_slice(design.frequencies());
        let channels = self.channels;
        let count = design.count;
        for crossover in 0..count {
            for channel in 0..channels {
                self.low[crossover * channels + channel].set_coefficients(design.low[crossover]);
                self.high[crossover * channels + channel].set_coefficients(design.high[crossover]);
            }
        }
        // Same (band, crossover) order as in `process`
        let mut pair = 0;
        for band in 0..count {
            for crossover in band + 1..count {
                for channel in 0..channels {
                    self.alignment[pair * channels + channel].set_coefficients(design.allpass[crossover]);
                }
                pair += 1;
            }
        }
        true
    }

    fn alignment_pairs(crossovers: usize) -> usize {
        crossovers * crossovers.saturating_sub(1) / 2
    }

    fn rebuild(&mut self, frequencies: &[f64]) -> Result<(), DspError> {
        let design = CrossoverDesign::new(self.sample_rate, frequencies)?;
        let channels = self.channels;
        let low = (0..frequencies.len() * channels)
            .map(|index| LinkwitzRiley::new(Pass::Low, self.sample_rate, frequencies[index / channels]))
            .collect::<Result<Vec<_>, _>>()?;
        let high = (0..frequencies.len() * channels)
            .map(|index| LinkwitzRiley::new(Pass::High, self.sample_rate, frequencies[index / channels]))
            .collect::<Result<Vec<_>, _>>()?;
        let pairs = Self::alignment_pairs(frequencies.len()) * channels;

        self.frequencies.clear();
        self.frequencies.extend_from_slice(frequencies);
        self.low = low;
        self.high = high;
        self.alignment = (0..pairs).map(|_| Section::new(PASS_THROUGH)).collect();
        self.apply(&design);
        Ok(())
    }

    /// Split one frame
    ///
    /// `input` holds one sample per channel; `output` receives
    /// `bands() * channels()` samples, band-major.
    ///
    /// # Real-time Safety
    /// No allocations. Cost is linear in channels times crossovers squared.
    #[inline]
    pub fn process(&mut self, input: &[f64], output: &mut [f64]) {
        let channels = self.channels;
        let count = self.frequencies.len();
        for (channel, &sample) in input.iter().enumerate().take(channels) {
            let mut residual = sample;
            let mut pair = 0;
            for crossover in 0..count {
                let index = crossover * channels + channel;
                let mut band = self.low[index].process_sample(residual);
                residual = self.high[index].process_sample(residual);
                let later = count - crossover - 1;
                if self.phase_aligned {
                    for offset in 0..later {
                        band = self.alignment[(pair + offset) * channels + channel].process_sample(band);
                    }
                }
                pair += later;
                output[index] = band;
            }
            output[count * channels + channel] = residual;
        }
    }

    /// Clear all filter state
    pub fn reset(&mut self) {
        self.low.iter_mut().for_each(SampleFilter::reset);
        self.high.iter_mut().for_each(SampleFilter::reset);
        self.alignment.iter_mut().for_each(SampleFilter::reset);
    }
}

/// Two-band crossover whose high band is the delayed input minus the low band
///
/// The low band is an LR4 low-pass; subtracting it from the input delayed by
/// half a period of the crossover frequency gives a high band that, added to
/// the low band, reconstructs the delayed input sample for sample.
pub struct DelayCompensatedCrossover {
    low: Vec<LinkwitzRiley>,
    delay: MultiChannelDelay,
    frequency: f64,
}

impl DelayCompensatedCrossover {
    pub fn new(sample_rate: f64, frequency: f64, channels: usize) -> Result<Self, DspError> {
        check_channels(channels)?;
        let capacity = (0.5 * MAX_DELAY_COMPENSATED_SAMPLE_RATE / MIN_DELAY_COMPENSATED_FREQUENCY).ceil() as usize;
        let low = (0..channels)
            .map(|_| LinkwitzRiley::new(Pass::Low, sample_rate, frequency))
            .collect::<Result<Vec<_>, _>>()?;
        let mut crossover = Self {
            low,
            delay: MultiChannelDelay::new(channels, capacity),
            frequency,
        };
        crossover.configure(sample_rate, frequency)?;
        Ok(crossover)
    }

    /// Delay needed to align the input with the low band at `frequency`
    pub fn delay_for(sample_rate: f64, frequency: f64) -> usize {
        (0.5 * sample_rate / frequency).round() as usize
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    /// Current compensation delay in samples
    pub fn latency(&self) -> usize {
        self.delay.delay(0)
    }

    pub fn configure(&mut self, sample_rate: f64, frequency: f64) -> Result<(), DspError> {
        if frequency < MIN_DELAY_COMPENSATED_FREQUENCY || sample_rate > MAX_DELAY_COMPENSATED_SAMPLE_RATE {
            return Err(DspError::InvalidCrossovers(format!(
                "delay compensation needs at least {}Hz at up to {}Hz sample rate",
                MIN_DELAY_COMPENSATED_FREQUENCY, MAX_DELAY_COMPENSATED_SAMPLE_RATE
            )));
        }
        validate_crossovers(&[frequency], sample_rate)?;
        let coefficients = butterworth(Pass::Low, sample_rate, frequency)?;
        for low in &mut self.low {
            low.set_coefficients(coefficients);
        }
        self.delay.set_all_delays(Self::delay_for(sample_rate, frequency));
        self.frequency = frequency;
        Ok(())
    }

    /// Split one frame into `[low..., high...]`
    ///
    /// # Real-time Safety
    /// No allocations.
    #[inline]
    pub fn process(&mut self, input: &[f64], output: &mut [f64]) {
        let channels = self.low.len();
        for (channel, &sample) in input.iter().enumerate().take(channels) {
            let low = self.low[channel].process_sample(sample);
            let delayed = self.delay.set_and_get(channel, sample);
            output[channel] = low;
            output[channels + channel] = delayed - low;
        }
        self.delay.next();
    }

    pub fn reset(&mut self) {
        self.low.iter_mut().for_each(SampleFilter::reset);
        self.delay.clear();
    }
}
