//! Parametric Equalizer
//!
//! Up to [`MAX_EQ_BANDS`] peaking sections per channel, used to shape the
//! response of a processing group or the sub channel after dynamics.
//! Based on the RBJ (Robert Bristow-Johnson) Audio EQ Cookbook.

use biquad::{Coefficients, Type};
use serde::{Deserialize, Serialize};

use crate::error::DspError;
use crate::filter::{check_sample_rate, SampleFilter, Section, PASS_THROUGH};

/// Maximum number of parametric sections per equalizer
pub const MAX_EQ_BANDS: usize = 2;

pub const MIN_CENTER_FREQUENCY: f64 = 20.0;
pub const DEFAULT_CENTER_FREQUENCY: f64 = 1000.0;
pub const MAX_CENTER_FREQUENCY: f64 = 22000.0;
pub const MIN_GAIN: f64 = 0.1;
pub const DEFAULT_GAIN: f64 = 1.0;
pub const MAX_GAIN: f64 = 10.0;
pub const MIN_BANDWIDTH: f64 = 0.25;
pub const DEFAULT_BANDWIDTH: f64 = 1.0;
pub const MAX_BANDWIDTH: f64 = 8.0;

/// One parametric (peaking) section
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EqualizerBand {
    /// Center frequency in Hz
    pub center: f64,
    /// Linear gain at the center frequency (1.0 = flat)
    pub gain: f64,
    /// Bandwidth in octaves
    pub bandwidth: f64,
}

impl Default for EqualizerBand {
    fn default() -> Self {
        Self {
            center: DEFAULT_CENTER_FREQUENCY,
            gain: DEFAULT_GAIN,
            bandwidth: DEFAULT_BANDWIDTH,
        }
    }
}

impl EqualizerBand {
    /// Clamp every field into its valid range
    pub fn normalized(self) -> Self {
        let clamp = |v: f64, min: f64, max: f64, default: f64| if v.is_nan() { default } else { v.clamp(min, max) };
        Self {
            center: clamp(self.center, MIN_CENTER_FREQUENCY, MAX_CENTER_FREQUENCY, DEFAULT_CENTER_FREQUENCY),
            gain: clamp(self.gain, MIN_GAIN, MAX_GAIN, DEFAULT_GAIN),
            bandwidth: clamp(self.bandwidth, MIN_BANDWIDTH, MAX_BANDWIDTH, DEFAULT_BANDWIDTH),
        }
    }

    /// Q of a peaking section spanning `bandwidth` octaves
    fn q(&self) -> f64 {
        let ratio = 2.0_f64.powf(self.bandwidth);
        ratio.sqrt() / (ratio - 1.0)
    }

    /// Generate BiQuad coefficients for this band
    ///
    /// A center above Nyquist is pulled down just below it, so that a
    /// configuration written for 96kHz still works at 44.1kHz.
    fn to_coefficients(self, sample_rate: f64) -> Result<Coefficients<f64>, DspError> {
        check_sample_rate(sample_rate)?;
        let band = self.normalized();
        let center = band.center.min(0.45 * sample_rate);
        let gain_db = 20.0 * band.gain.log10();
        Coefficients::<f64>::from_params(
            Type::PeakingEQ(gain_db),
            biquad::ToHertz::hz(sample_rate),
            biquad::ToHertz::hz(center),
            band.q(),
        )
        .map_err(|_| DspError::InvalidCoefficients {
            frequency: center,
            sample_rate,
        })
    }
}

/// Section coefficients for a set of bands, computed ahead of installing
#[derive(Debug, Clone, Copy)]
pub struct EqualizerDesign {
    coefficients: [Coefficients<f64>; MAX_EQ_BANDS],
    count: usize,
}

impl EqualizerDesign {
    /// A design without sections
    pub const FLAT: Self = Self {
        coefficients: [PASS_THROUGH; MAX_EQ_BANDS],
        count: 0,
    };

    /// Design up to [`MAX_EQ_BANDS`] sections
    pub fn new(bands: &[EqualizerBand], sample_rate: f64) -> Result<Self, DspError> {
        let mut design = Self::FLAT;
        for (slot, band) in design.coefficients.iter_mut().zip(bands) {
            *slot = band.to_coefficients(sample_rate)?;
            design.count += 1;
        }
        Ok(design)
    }

    pub fn bands(&self) -> usize {
        self.count
    }
}

/// Multi-channel parametric equalizer
///
/// Holds filter state for every channel and [`MAX_EQ_BANDS`] sections; only
/// the first `active` sections are run, so zero active bands is an identity.
pub struct Equalizer {
    // Index: band * channels + channel
    sections: Vec<Section>,
    channels: usize,
    active: usize,
}

impl Equalizer {
    /// Create a flat equalizer for `channels` channels
    ///
    /// Allocates; call during setup.
    pub fn new(channels: usize, sample_rate: f64) -> Result<Self, DspError> {
        let flat = EqualizerBand::default().to_coefficients(sample_rate)?;
        let sections = (0..MAX_EQ_BANDS * channels).map(|_| Section::new(flat)).collect();
        Ok(Self {
            sections,
            channels,
            active: 0,
        })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Number of sections currently in use
    pub fn active_bands(&self) -> usize {
        self.active
    }

    /// Install a new set of bands (at most [`MAX_EQ_BANDS`] are used)
    ///
    /// Recalculates coefficients without clearing state. Does not allocate.
    pub fn configure(&mut self, bands: &[EqualizerBand], sample_rate: f64) -> Result<(), DspError> {
        let design = EqualizerDesign::new(bands, sample_rate)?;
        self.apply(&design);
        Ok(())
    }

    /// Install a design computed with [`EqualizerDesign::new`]
    ///
    /// Cannot fail and does not allocate.
    pub fn apply(&mut self, design: &EqualizerDesign) {
        let count = design.count;
        for (index, &coefficients) in design.coefficients[..count].iter().enumerate() {
            for channel in 0..self.channels {
                self.sections[index * self.channels + channel].set_coefficients(coefficients);
            }
        }
        if count > self.active {
            // Newly enabled sections start from silence
            for section in &mut self.sections[self.active * self.channels..count * self.channels] {
                section.reset();
            }
        }
        self.active = count;
    }

    /// Filter one sample of one channel
    ///
    /// # Real-time Safety
    /// No allocations, at most [`MAX_EQ_BANDS`] biquads.
    #[inline]
    pub fn process_sample(&mut self, channel: usize, input: f64) -> f64 {
        let mut value = input;
        for band in 0..self.active {
            value = self.sections[band * self.channels + channel].process_sample(value);
        }
        value
    }

    /// Reset filter state (clear delay lines)
    pub fn reset(&mut self) {
        for section in &mut self.sections {
            section.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::test_signal::{sine_gain, to_db};

    #[test]
    fn test_default_band_is_flat() {
        let band = EqualizerBand::default();
        assert_eq!(band.gain, 1.0);
        assert_eq!(band.center, 1000.0);
    }

    #[test]
    fn test_normalized_clamps() {
        let band = EqualizerBand {
            center: 5.0,
            gain: 100.0,
            bandwidth: f64::NAN,
        }
        .normalized();
        assert_eq!(band.center, MIN_CENTER_FREQUENCY);
        assert_eq!(band.gain, MAX_GAIN);
        assert_eq!(band.bandwidth, DEFAULT_BANDWIDTH);
    }

    #[test]
    fn test_no_bands_is_passthrough() {
        let mut eq = Equalizer::new(2, 48000.0).unwrap();
        assert_eq!(eq.active_bands(), 0);
        assert_eq!(eq.process_sample(1, 0.5), 0.5);
    }

    #[test]
    fn test_boost_at_center() {
        let sample_rate = 48000.0;
        let mut eq = Equalizer::new(1, sample_rate).unwrap();
        let band = EqualizerBand {
            center: 1000.0,
            gain: 2.0,
            bandwidth: 1.0,
        };
        eq.configure(&[band], sample_rate).unwrap();

        let db = to_db(sine_gain(|x| eq.process_sample(0, x), 1000.0, sample_rate));
        assert!((db - 6.02).abs() < 0.3, "Expected +6dB at center, got {}dB", db);

        eq.reset();
        let far = to_db(sine_gain(|x| eq.process_sample(0, x), 50.0, sample_rate));
        assert!(far.abs() < 0.5, "Expected flat far from center, got {}dB", far);
    }

    #[test]
    fn test_failed_design_leaves_equalizer_alone() {
        let mut eq = Equalizer::new(1, 48000.0).unwrap();
        eq.configure(&[EqualizerBand::default()], 48000.0).unwrap();
        assert!(EqualizerDesign::new(&[EqualizerBand::default(); 2], 0.0).is_err());
        assert_eq!(eq.active_bands(), 1);

        eq.apply(&EqualizerDesign::FLAT);
        assert_eq!(eq.active_bands(), 0);
        assert_eq!(eq.process_sample(0, 0.25), 0.25);
    }

    #[test]
    fn test_extra_bands_ignored() {
        let mut eq = Equalizer::new(1, 48000.0).unwrap();
        let bands = [EqualizerBand::default(); 4];
        eq.configure(&bands, 48000.0).unwrap();
        assert_eq!(eq.active_bands(), MAX_EQ_BANDS);
    }

    #[test]
    fn test_center_above_nyquist_is_pulled_down() {
        let mut eq = Equalizer::new(1, 22050.0).unwrap();
        let band = EqualizerBand {
            center: 20000.0,
            ..Default::default()
        };
        assert!(eq.configure(&[band], 22050.0).is_ok());
    }
}
