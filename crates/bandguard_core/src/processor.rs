//! Dynamics Processor
//!
//! Runs the per-sample pipeline for one configuration structure at one
//! sample rate:
//!
//! ```text
//! logical inputs -> input matrix -> crossover bank
//!     lowest band of all channels -> sub -> detector -> EQ ------------.
//!     other bands, per group      -> detectors (gain 1/level)          |
//!                                 -> band sum, mono, sub mix           |
//!                                 -> group delay -> EQ -> peak limiter |
//!                                                         sub limiter <'
//! ```
//!
//! Detection runs ahead of the audio: every signal that is attenuated by a
//! detector or a limiter passes through a delay that matches the latency
//! of that detector or limiter.

use bandguard_dsp::{
    CrossoverBank, CrossoverDesign, DspError, Equalizer, EqualizerDesign, Limiter, LimiterSettings, LimiterVariant,
    MultiChannelDelay, PerceptiveDetector, PerceptiveMetrics, PerceptiveWeighting, MAX_DETECTOR_HOLD_SECONDS,
};

use crate::config::{ConfigSnapshot, DetectionConfig, Structure, MAX_DELAY, MAX_GROUPS};
use crate::error::{ConfigError, EngineResult};
use crate::levels::Levels;
use crate::runtime::RuntimeParameters;

/// Peak limiters work on signals scaled so that their threshold is 1.0
const PEAK_THRESHOLD: f64 = 1.0;

/// Starting value of every detector, in units of the threshold
const INITIAL_DETECTION: f64 = 1.0;

/// Detection windows of a detection configuration
fn detection_metrics(detection: &DetectionConfig) -> Result<PerceptiveMetrics, DspError> {
    PerceptiveMetrics::from_windows(
        detection.minimum_window_seconds,
        detection.maximum_window_seconds,
        detection.perceptive_levels,
        PerceptiveWeighting::default(),
    )
}

fn limiter_settings(sample_rate: f64, detection: &DetectionConfig) -> LimiterSettings {
    LimiterSettings {
        release_seconds: detection.fast_release_seconds,
        ..LimiterSettings::for_sample_rate(sample_rate, PEAK_THRESHOLD)
    }
}

#[inline]
fn finite_or_zero(x: f64) -> f64 {
    if x.is_finite() {
        x
    } else {
        0.0
    }
}

/// Multiband loudness and peak protection for all groups
pub struct DynamicsProcessor {
    structure: Structure,
    sample_rate: f64,
    snapshot: ConfigSnapshot,
    runtime: RuntimeParameters,

    crossover: CrossoverBank,
    sub_detector: PerceptiveDetector,
    // Index: (band - 1) * groups + group
    band_detectors: Vec<PerceptiveDetector>,
    // One per group, the sub limiter last
    limiters: Vec<LimiterVariant>,
    limiter_settings: LimiterSettings,
    group_equalizers: Vec<Equalizer>,
    sub_equalizer: Equalizer,

    // Channel 0 is the sub, then every processing channel
    group_delay: MultiChannelDelay,
    prediction_delay: MultiChannelDelay,
    // Channel 0 is the sub, then (band - 1) * channels + channel
    rms_delay: MultiChannelDelay,

    logical: Vec<f64>,
    routed: Vec<f64>,
    bands: Vec<f64>,
    merged: Vec<f64>,
    frame: Vec<f64>,

    levels: Levels,
}

impl DynamicsProcessor {
    /// Build every filter, detector and delay line for `sample_rate`
    ///
    /// Allocates; call between audio cycles only.
    pub fn new(snapshot: &ConfigSnapshot, sample_rate: f64) -> Result<Self, DspError> {
        let structure = snapshot.structure;
        let channels = structure.processing_channels();
        let groups = structure.groups;
        let crossovers = structure.crossovers;

        let crossover = CrossoverBank::new(sample_rate, snapshot.crossovers(), channels)?;
        let metrics = detection_metrics(&snapshot.detection)?;
        let sub_detector = PerceptiveDetector::new(sample_rate, &metrics, INITIAL_DETECTION)?;
        let band_detectors = (0..crossovers * groups)
            .map(|_| PerceptiveDetector::new(sample_rate, &metrics, INITIAL_DETECTION))
            .collect::<Result<Vec<_>, _>>()?;

        let limiter_settings = limiter_settings(sample_rate, &snapshot.detection);
        let limiters = (0..=groups)
            .map(|_| {
                let mut limiter = LimiterVariant::new(structure.limiter, limiter_settings.prediction_samples);
                limiter.configure(&limiter_settings);
                limiter
            })
            .collect::<Vec<_>>();

        let group_equalizers = (0..groups)
            .map(|_| Equalizer::new(structure.channels_per_group, sample_rate))
            .collect::<Result<Vec<_>, _>>()?;
        let sub_equalizer = Equalizer::new(1, sample_rate)?;

        let max_group_delay = (sample_rate * MAX_DELAY).round() as usize;
        let max_rms_delay = (sample_rate * MAX_DETECTOR_HOLD_SECONDS).round() as usize;
        let prediction = limiter_settings.prediction_samples;

        let mut processor = Self {
            structure,
            sample_rate,
            snapshot: *snapshot,
            runtime: RuntimeParameters::default(),
            crossover,
            sub_detector,
            band_detectors,
            limiters,
            limiter_settings,
            group_equalizers,
            sub_equalizer,
            group_delay: MultiChannelDelay::new(1 + channels, max_group_delay),
            prediction_delay: MultiChannelDelay::new(1 + channels, prediction),
            rms_delay: MultiChannelDelay::new(1 + crossovers * channels, max_rms_delay),
            logical: vec![0.0; structure.logical_inputs],
            routed: vec![0.0; channels],
            bands: vec![0.0; (crossovers + 1) * channels],
            merged: vec![0.0; channels],
            frame: vec![0.0; 1 + channels],
            levels: Levels::new(groups),
        };
        processor.runtime.init(snapshot, sample_rate);
        processor.configure_filters(snapshot)?;
        processor.configure_delays();
        Ok(processor)
    }

    pub fn structure(&self) -> &Structure {
        &self.structure
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// The configuration currently being approached
    pub fn snapshot(&self) -> &ConfigSnapshot {
        &self.snapshot
    }

    pub fn runtime(&self) -> &RuntimeParameters {
        &self.runtime
    }

    /// Samples from input to output
    pub fn latency(&self) -> usize {
        self.rms_delay.delay(0) + self.prediction_delay.delay(0)
    }

    pub fn levels(&self) -> &Levels {
        &self.levels
    }

    pub fn reset_levels(&mut self) {
        self.levels.reset();
    }

    /// Switch to new parameter values of the same structure
    ///
    /// Continuous values glide, discrete ones (delays, flags, filter
    /// coefficients) take effect at once. Limiters keep their envelopes.
    ///
    /// Every coefficient is computed before anything is touched, so a
    /// rejected snapshot leaves the processor exactly as it was. Does not
    /// allocate unless the snapshot is rejected.
    pub fn update_config(&mut self, snapshot: &ConfigSnapshot) -> EngineResult<()> {
        if let Some(difference) = self.structure.difference(&snapshot.structure) {
            return Err(ConfigError::StructureChanged(difference).into());
        }
        let crossover = CrossoverDesign::new(self.sample_rate, snapshot.crossovers())?;
        let metrics = detection_metrics(&snapshot.detection)?;
        let mut group_equalizers = [EqualizerDesign::FLAT; MAX_GROUPS];
        for (design, group) in group_equalizers.iter_mut().zip(snapshot.groups()) {
            *design = EqualizerDesign::new(group.equalizers.as_slice(), self.sample_rate)?;
        }
        let sub_equalizer = EqualizerDesign::new(snapshot.sub_equalizers.as_slice(), self.sample_rate)?;

        self.runtime.modify(snapshot, self.sample_rate);
        self.crossover.apply(&crossover);
        if snapshot.detection != self.snapshot.detection {
            self.sub_detector.apply_metrics(self.sample_rate, &metrics);
            for detector in &mut self.band_detectors {
                detector.apply_metrics(self.sample_rate, &metrics);
            }
            let settings = limiter_settings(self.sample_rate, &snapshot.detection);
            if settings != self.limiter_settings {
                self.limiters.iter_mut().for_each(|limiter| limiter.retune(&settings));
                self.limiter_settings = settings;
            }
        }
        for (equalizer, design) in self.group_equalizers.iter_mut().zip(&group_equalizers) {
            equalizer.apply(design);
        }
        self.sub_equalizer.apply(&sub_equalizer);
        self.snapshot = *snapshot;
        self.configure_delays();
        Ok(())
    }

    fn configure_filters(&mut self, snapshot: &ConfigSnapshot) -> Result<(), DspError> {
        for (equalizer, group) in self.group_equalizers.iter_mut().zip(snapshot.groups()) {
            equalizer.configure(group.equalizers.as_slice(), self.sample_rate)?;
        }
        self.sub_equalizer
            .configure(snapshot.sub_equalizers.as_slice(), self.sample_rate)
    }

    fn configure_delays(&mut self) {
        let rms_latency = self.sub_detector.latency();
        self.rms_delay.set_all_delays(rms_latency);
        self.prediction_delay.set_all_delays(self.limiters[0].latency());

        let target = self.runtime.target();
        let per_group = self.structure.channels_per_group;
        self.group_delay.set_delay(0, target.sub_delay);
        for (group, runtime) in target.groups[..self.structure.groups].iter().enumerate() {
            for channel in 0..per_group {
                self.group_delay.set_delay(1 + group * per_group + channel, runtime.delay);
            }
        }
    }

    /// Process one frame
    ///
    /// `input` holds one sample per logical input channel and `output` one
    /// sample per output: the sub first if it has its own output, then every
    /// processing channel. Non-finite samples are flushed to zero.
    ///
    /// # Real-time Safety
    /// No allocations, locks or I/O.
    pub fn process(&mut self, input: &[f64], output: &mut [f64]) {
        self.runtime.approach();
        for (logical, &x) in self.logical.iter_mut().zip(input) {
            *logical = finite_or_zero(x);
        }
        self.runtime.route(&self.logical, &mut self.routed);
        self.crossover.process(&self.routed, &mut self.bands);

        let sub = self.process_sub_rms();
        self.process_band_rms();
        self.levels.next();
        self.merge_bands(sub);
        self.process_group_limiters();
        self.process_sub_limiter(sub);

        self.group_delay.next();
        self.prediction_delay.next();
        self.rms_delay.next();

        self.write_output(output);
    }

    /// Sum of the lowest band of all channels, with its loudness gain and
    /// equalizer applied
    fn process_sub_rms(&mut self) -> f64 {
        let channels = self.structure.processing_channels();
        let sub: f64 = self.bands[..channels].iter().sum();
        let scaled = sub * self.runtime.data().sub_rms_scale;
        let detection = self.sub_detector.add_square_get_detection(scaled * scaled, 1.0);
        self.levels.add_value(0, detection);
        let attenuated = self.rms_delay.set_and_get(0, sub) / detection;
        self.sub_equalizer.process_sample(0, attenuated)
    }

    /// One detector per band and group, fed with the summed squares of the
    /// group's channels
    fn process_band_rms(&mut self) {
        let channels = self.structure.processing_channels();
        let groups = self.structure.groups;
        let per_group = self.structure.channels_per_group;
        let data = self.runtime.data();

        for band in 1..=self.structure.crossovers {
            for group in 0..groups {
                let scale = data.groups[group].band_rms_scale[band];
                let first = band * channels + group * per_group;
                let samples = &mut self.bands[first..first + per_group];

                let square_sum: f64 = samples.iter().map(|x| (x * scale) * (x * scale)).sum();
                let detection =
                    self.band_detectors[(band - 1) * groups + group].add_square_get_detection(square_sum, 1.0);
                self.levels.add_value(1 + group, detection);

                let gain = 1.0 / detection;
                let first_delay = 1 + (band - 1) * channels + group * per_group;
                for (channel, sample) in samples.iter_mut().enumerate() {
                    *sample = gain * self.rms_delay.set_and_get(first_delay + channel, *sample);
                }
            }
        }
    }

    /// Sum the bands of every channel, then apply mono and the sub mix
    fn merge_bands(&mut self, sub: f64) {
        let channels = self.structure.processing_channels();
        let per_group = self.structure.channels_per_group;
        let data = self.runtime.data();

        for (channel, merged) in self.merged.iter_mut().enumerate() {
            *merged = (1..=self.structure.crossovers)
                .map(|band| self.bands[band * channels + channel])
                .sum();
        }

        let sub_share = sub / per_group as f64;
        for (group, samples) in self.merged.chunks_exact_mut(per_group).enumerate() {
            let runtime = &data.groups[group];
            if runtime.mono {
                let average = samples.iter().sum::<f64>() / per_group as f64;
                samples.iter_mut().for_each(|x| *x = average);
            }
            if !runtime.use_sub {
                samples.iter_mut().for_each(|x| *x += sub_share);
            }
        }
    }

    /// Delay and equalize every group, then limit its peaks
    fn process_group_limiters(&mut self) {
        let per_group = self.structure.channels_per_group;
        let data = self.runtime.data();

        for group in 0..self.structure.groups {
            let first = 1 + group * per_group;
            let equalizer = &mut self.group_equalizers[group];
            let mut peak = 0.0_f64;
            for channel in 0..per_group {
                let offset = first + channel;
                let delayed = self.group_delay.set_and_get(offset, self.merged[offset - 1]);
                let equalized = equalizer.process_sample(channel, delayed);
                peak = peak.max(equalized.abs());
                self.frame[offset] = self.prediction_delay.set_and_get(offset, equalized);
            }

            let gain = self.limiters[group].gain(peak * data.groups[group].limiter_scale);
            for sample in &mut self.frame[first..first + per_group] {
                *sample *= gain;
            }
        }
    }

    fn process_sub_limiter(&mut self, sub: f64) {
        let limiter = &mut self.limiters[self.structure.groups];
        let gain = limiter.gain(sub.abs() * self.runtime.data().sub_limiter_scale);
        let limited = gain * self.prediction_delay.set_and_get(0, sub);
        self.frame[0] = self.group_delay.set_and_get(0, limited);
    }

    /// Map the processed frame onto the outputs
    ///
    /// Without a sub output the sub is spread over every output.
    fn write_output(&self, output: &mut [f64]) {
        let channels = &self.frame[1..];
        if self.structure.sub_output {
            if let Some((sub, rest)) = output.split_first_mut() {
                *sub = finite_or_zero(self.frame[0]);
                for (out, &x) in rest.iter_mut().zip(channels) {
                    *out = finite_or_zero(x);
                }
            }
        } else {
            let sub = self.frame[0] / (channels.len() as f64).sqrt();
            for (out, &x) in output.iter_mut().zip(channels) {
                *out = finite_or_zero(x + sub);
            }
        }
    }
}
