//! Speaker Configuration
//!
//! Value objects supplied whole by the configuration collaborator. They are
//! validated for structure when an engine is built, normalized (clamped) on
//! every apply, and flattened into a [`ConfigSnapshot`] that can travel
//! through the transport without allocating.

use serde::{Deserialize, Serialize};

use bandguard_dsp::ranges::{MAX_FAST_SECONDS, MIN_FAST_SECONDS};
use bandguard_dsp::{
    validate_crossovers, EqualizerBand, LimiterKind, VolumeMatrix, MAX_CROSSOVERS, MAX_EQ_BANDS, MAX_PERCEPTIVE_LEVELS,
};

use crate::error::ConfigError;

pub const MAX_CHANNELS_PER_GROUP: usize = 16;
pub const MAX_GROUPS: usize = 4;
pub const MAX_LOGICAL_INPUTS: usize = 32;
pub const MAX_PROCESSING_CHANNELS: usize = MAX_GROUPS * MAX_CHANNELS_PER_GROUP;

pub const MIN_THRESHOLD: f64 = 0.001;
pub const DEFAULT_THRESHOLD: f64 = 0.1;
pub const MAX_THRESHOLD: f64 = 0.9;

pub const MIN_DELAY: f64 = 0.0;
pub const MAX_DELAY: f64 = 0.02;

pub const MIN_THRESHOLD_SCALING: f64 = 1.0;
pub const MAX_THRESHOLD_SCALING: f64 = 5.0;

pub const MIN_REL_SUB_THRESHOLD: f64 = 0.25;
pub const DEFAULT_REL_SUB_THRESHOLD: f64 = std::f64::consts::SQRT_2;
pub const MAX_REL_SUB_THRESHOLD: f64 = 2.0;

pub const MIN_MAXIMUM_WINDOW: f64 = 0.4;
pub const DEFAULT_MAXIMUM_WINDOW: f64 = 0.4;
pub const MAX_MAXIMUM_WINDOW: f64 = 8.0;
pub const MIN_MINIMUM_WINDOW: f64 = MIN_FAST_SECONDS;
pub const DEFAULT_MINIMUM_WINDOW: f64 = 0.001;
pub const MAX_MINIMUM_WINDOW: f64 = MAX_FAST_SECONDS;
pub const MIN_PERCEPTIVE_LEVELS: usize = 2;
pub const DEFAULT_PERCEPTIVE_LEVELS: usize = 11;
pub const MIN_FAST_RELEASE: f64 = 0.001;
pub const DEFAULT_FAST_RELEASE: f64 = 0.02;
pub const MAX_FAST_RELEASE: f64 = 0.1;

pub const MIN_VOLUME: f64 = 0.0;
pub const MAX_VOLUME: f64 = 1.0;

/// Parametric equalizer section, as configured
pub type EqualizerConfig = EqualizerBand;

fn clamp_or(value: f64, min: f64, max: f64, default: f64) -> f64 {
    if value.is_nan() {
        default
    } else {
        value.clamp(min, max)
    }
}

fn truncate_equalizers(equalizers: &mut Vec<EqualizerConfig>) {
    equalizers.truncate(MAX_EQ_BANDS);
    for eq in equalizers.iter_mut() {
        *eq = eq.normalized();
    }
}

/// One processing group: a set of speakers sharing a threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupConfig {
    /// Loudness threshold, relative to full scale
    pub threshold: f64,

    /// Output delay in seconds
    pub delay: f64,

    /// When false the sub signal is mixed into this group's channels
    pub use_sub: bool,

    /// Sum all channels of the group into one mono signal
    pub mono: bool,

    pub equalizers: Vec<EqualizerConfig>,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            delay: 0.0,
            use_sub: true,
            mono: false,
            equalizers: Vec::new(),
        }
    }
}

impl GroupConfig {
    fn normalize(&mut self) {
        self.threshold = clamp_or(self.threshold, MIN_THRESHOLD, MAX_THRESHOLD, DEFAULT_THRESHOLD);
        self.delay = clamp_or(self.delay, MIN_DELAY, MAX_DELAY, 0.0);
        truncate_equalizers(&mut self.equalizers);
    }
}

/// Loudness detection and peak limiting
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Longest integration window in seconds
    pub maximum_window_seconds: f64,

    /// Shortest integration window in seconds
    pub minimum_window_seconds: f64,

    /// Number of integration windows between the two extremes
    pub perceptive_levels: usize,

    pub fast_release_seconds: f64,

    /// Use a look-ahead peak limiter; without it the limiter reacts
    /// instantly and adds no latency
    pub brick_wall: bool,

    /// Look-ahead limiter implementation used when `brick_wall` is set
    pub limiter: LimiterKind,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            maximum_window_seconds: DEFAULT_MAXIMUM_WINDOW,
            minimum_window_seconds: DEFAULT_MINIMUM_WINDOW,
            perceptive_levels: DEFAULT_PERCEPTIVE_LEVELS,
            fast_release_seconds: DEFAULT_FAST_RELEASE,
            brick_wall: true,
            limiter: LimiterKind::default(),
        }
    }
}

impl DetectionConfig {
    /// The limiter that will actually run
    pub fn limiter_kind(&self) -> LimiterKind {
        if self.brick_wall {
            self.limiter
        } else {
            LimiterKind::ZeroPrediction
        }
    }

    /// Check the window bounds before clamping
    pub fn validate(&self) -> Result<(), ConfigError> {
        let (min, max) = (self.minimum_window_seconds, self.maximum_window_seconds);
        if min.is_nan() || max.is_nan() || min >= max {
            return Err(ConfigError::InvalidDetection(format!(
                "minimum window {}s must be shorter than maximum window {}s",
                min, max
            )));
        }
        if self.perceptive_levels < MIN_PERCEPTIVE_LEVELS {
            return Err(ConfigError::InvalidDetection(format!(
                "at least {} perceptive levels needed, got {}",
                MIN_PERCEPTIVE_LEVELS, self.perceptive_levels
            )));
        }
        Ok(())
    }

    fn normalize(&mut self) {
        self.maximum_window_seconds = clamp_or(
            self.maximum_window_seconds,
            MIN_MAXIMUM_WINDOW,
            MAX_MAXIMUM_WINDOW,
            DEFAULT_MAXIMUM_WINDOW,
        );
        self.minimum_window_seconds = clamp_or(
            self.minimum_window_seconds,
            MIN_MINIMUM_WINDOW,
            MAX_MINIMUM_WINDOW,
            DEFAULT_MINIMUM_WINDOW,
        );
        self.perceptive_levels = self.perceptive_levels.clamp(MIN_PERCEPTIVE_LEVELS, MAX_PERCEPTIVE_LEVELS);
        self.fast_release_seconds = clamp_or(
            self.fast_release_seconds,
            MIN_FAST_RELEASE,
            MAX_FAST_RELEASE,
            DEFAULT_FAST_RELEASE,
        );
    }
}

/// A named set of input channels sharing a volume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogicalInputConfig {
    pub name: String,
    pub channels: usize,
    /// Linear volume (0.0 - 1.0)
    pub volume: f64,
}

impl Default for LogicalInputConfig {
    fn default() -> Self {
        Self {
            name: "main".to_string(),
            channels: 2,
            volume: 1.0,
        }
    }
}

/// The counts that are fixed for the lifetime of an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Structure {
    pub groups: usize,
    pub channels_per_group: usize,
    pub logical_inputs: usize,
    pub crossovers: usize,
    pub sub_output: bool,
    pub limiter: LimiterKind,
}

impl Structure {
    pub fn processing_channels(&self) -> usize {
        self.groups * self.channels_per_group
    }

    pub fn bands(&self) -> usize {
        self.crossovers + 1
    }

    /// Number of output buffers `process` expects
    pub fn outputs(&self) -> usize {
        self.processing_channels() + usize::from(self.sub_output)
    }

    /// Describe the first difference with `other`, if any
    pub fn difference(&self, other: &Structure) -> Option<String> {
        if self.groups != other.groups {
            Some(format!("groups {} -> {}", self.groups, other.groups))
        } else if self.channels_per_group != other.channels_per_group {
            Some(format!(
                "channels per group {} -> {}",
                self.channels_per_group, other.channels_per_group
            ))
        } else if self.logical_inputs != other.logical_inputs {
            Some(format!(
                "logical inputs {} -> {}",
                self.logical_inputs, other.logical_inputs
            ))
        } else if self.crossovers != other.crossovers {
            Some(format!("crossovers {} -> {}", self.crossovers, other.crossovers))
        } else if self.sub_output != other.sub_output {
            Some(format!("sub output {} -> {}", self.sub_output, other.sub_output))
        } else if self.limiter != other.limiter {
            Some(format!("limiter {:?} -> {:?}", self.limiter, other.limiter))
        } else {
            None
        }
    }
}

/// Complete speaker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeakerConfig {
    /// Number of processing groups (1 - 4)
    pub groups: usize,

    /// Channels in every group (1 - 16)
    pub channels_per_group: usize,

    pub group: Vec<GroupConfig>,

    pub logical_inputs: Vec<LogicalInputConfig>,

    /// Ascending crossover frequencies in Hz
    pub crossovers: Vec<f64>,

    /// Multiplies every group threshold (1.0 - 5.0)
    pub threshold_scaling: f64,

    /// Sub threshold relative to the lowest group threshold
    pub relative_sub_threshold: f64,

    /// Sub delay in seconds
    pub sub_delay: f64,

    /// Give the sub its own output; otherwise it is mixed into every output
    pub sub_output: bool,

    pub sub_equalizers: Vec<EqualizerConfig>,

    pub detection: DetectionConfig,

    /// Weight of each logical input channel (columns) in each processing
    /// channel (rows); empty means a wrapped identity
    pub input_matrix: Vec<Vec<f64>>,
}

impl Default for SpeakerConfig {
    fn default() -> Self {
        Self {
            groups: 1,
            channels_per_group: 2,
            group: vec![GroupConfig::default()],
            logical_inputs: vec![LogicalInputConfig::default()],
            crossovers: vec![80.0, 2000.0],
            threshold_scaling: MIN_THRESHOLD_SCALING,
            relative_sub_threshold: DEFAULT_REL_SUB_THRESHOLD,
            sub_delay: 0.0,
            sub_output: true,
            sub_equalizers: Vec::new(),
            detection: DetectionConfig::default(),
            input_matrix: Vec::new(),
        }
    }
}

impl SpeakerConfig {
    /// Parse a configuration from JSON
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn processing_channels(&self) -> usize {
        self.groups * self.channels_per_group
    }

    /// Total number of logical input channels
    pub fn logical_channels(&self) -> usize {
        self.logical_inputs.iter().map(|input| input.channels).sum()
    }

    pub fn structure(&self) -> Structure {
        Structure {
            groups: self.groups,
            channels_per_group: self.channels_per_group,
            logical_inputs: self.logical_channels(),
            crossovers: self.crossovers.len(),
            sub_output: self.sub_output,
            limiter: self.detection.limiter_kind(),
        }
    }

    /// Check counts, crossover order and detection windows
    ///
    /// Crossovers are checked against the Nyquist frequency once the sample
    /// rate is known.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.groups == 0 || self.groups > MAX_GROUPS {
            return Err(ConfigError::InvalidStructure(format!(
                "groups must be 1 - {}, got {}",
                MAX_GROUPS, self.groups
            )));
        }
        if self.channels_per_group == 0 || self.channels_per_group > MAX_CHANNELS_PER_GROUP {
            return Err(ConfigError::InvalidStructure(format!(
                "channels per group must be 1 - {}, got {}",
                MAX_CHANNELS_PER_GROUP, self.channels_per_group
            )));
        }
        if self.group.len() > self.groups {
            return Err(ConfigError::InvalidStructure(format!(
                "{} group entries for {} groups",
                self.group.len(),
                self.groups
            )));
        }
        if let Some(input) = self.logical_inputs.iter().find(|input| input.channels == 0) {
            return Err(ConfigError::InvalidStructure(format!(
                "logical input '{}' has no channels",
                input.name
            )));
        }
        let logical = self.logical_channels();
        if logical == 0 || logical > MAX_LOGICAL_INPUTS {
            return Err(ConfigError::InvalidStructure(format!(
                "logical input channels must be 1 - {}, got {}",
                MAX_LOGICAL_INPUTS, logical
            )));
        }
        self.validate_crossovers(f64::MAX)?;
        self.detection.validate()
    }

    /// Check the crossover frequencies against a sample rate
    pub fn validate_crossovers(&self, sample_rate: f64) -> Result<(), ConfigError> {
        if self.crossovers.is_empty() || self.crossovers.len() > MAX_CROSSOVERS {
            return Err(ConfigError::InvalidCrossovers(format!(
                "expected 1 - {} crossovers, got {}",
                MAX_CROSSOVERS,
                self.crossovers.len()
            )));
        }
        validate_crossovers(&self.crossovers, sample_rate).map_err(|e| ConfigError::InvalidCrossovers(e.to_string()))
    }

    /// Copy with every runtime value clamped into range
    ///
    /// Missing group entries get defaults, surplus equalizers are dropped
    /// and the input matrix is brought to its full shape.
    pub fn normalized(&self) -> Self {
        let mut config = self.clone();
        config.group.resize_with(config.groups, GroupConfig::default);
        config.group.iter_mut().for_each(GroupConfig::normalize);
        for input in config.logical_inputs.iter_mut() {
            input.volume = clamp_or(input.volume, MIN_VOLUME, MAX_VOLUME, MAX_VOLUME);
        }
        config.threshold_scaling = clamp_or(
            config.threshold_scaling,
            MIN_THRESHOLD_SCALING,
            MAX_THRESHOLD_SCALING,
            MIN_THRESHOLD_SCALING,
        );
        config.relative_sub_threshold = clamp_or(
            config.relative_sub_threshold,
            MIN_REL_SUB_THRESHOLD,
            MAX_REL_SUB_THRESHOLD,
            DEFAULT_REL_SUB_THRESHOLD,
        );
        config.sub_delay = clamp_or(config.sub_delay, MIN_DELAY, MAX_DELAY, 0.0);
        truncate_equalizers(&mut config.sub_equalizers);
        config.detection.normalize();

        let matrix = config.weight_matrix();
        config.input_matrix = (0..matrix.outputs())
            .map(|row| (0..matrix.inputs()).map(|column| matrix.get(row, column)).collect())
            .collect();
        config
    }

    /// The configured input weights, clamped, without logical volumes
    fn weight_matrix(&self) -> InputMatrix {
        let mut matrix = InputMatrix::new(self.processing_channels(), self.logical_channels());
        if self.input_matrix.is_empty() {
            matrix.identity_wrapped();
        } else {
            for (row, weights) in self.input_matrix.iter().enumerate() {
                for (column, &weight) in weights.iter().enumerate() {
                    matrix.set(row, column, weight);
                }
            }
        }
        matrix
    }

    /// Volume of one logical input channel
    pub fn volume_for_channel(&self, channel: usize) -> f64 {
        let mut first = 0;
        for input in &self.logical_inputs {
            if channel < first + input.channels {
                return clamp_or(input.volume, MIN_VOLUME, MAX_VOLUME, MAX_VOLUME);
            }
            first += input.channels;
        }
        0.0
    }

    /// Flatten into the fixed-size form carried by the transport
    ///
    /// Values are normalized on the way.
    pub fn snapshot(&self) -> ConfigSnapshot {
        let config = self.normalized();
        let mut snapshot = ConfigSnapshot {
            structure: config.structure(),
            ..ConfigSnapshot::default()
        };

        snapshot.crossovers[..config.crossovers.len().min(MAX_CROSSOVERS)]
            .copy_from_slice(&config.crossovers[..config.crossovers.len().min(MAX_CROSSOVERS)]);
        snapshot.threshold_scaling = config.threshold_scaling;
        snapshot.relative_sub_threshold = config.relative_sub_threshold;
        snapshot.sub_delay = config.sub_delay;
        snapshot.sub_equalizers = EqualizerSet::from_slice(&config.sub_equalizers);
        snapshot.detection = config.detection;
        for (target, group) in snapshot.group.iter_mut().zip(&config.group) {
            *target = GroupSnapshot {
                threshold: group.threshold,
                delay: group.delay,
                use_sub: group.use_sub,
                mono: group.mono,
                equalizers: EqualizerSet::from_slice(&group.equalizers),
            };
        }

        // Logical volumes are folded into the weights
        let weights = config.weight_matrix();
        let mut matrix = InputMatrix::new(weights.outputs(), weights.inputs());
        for column in 0..weights.inputs() {
            let volume = config.volume_for_channel(column);
            for row in 0..weights.outputs() {
                matrix.set(row, column, weights.get(row, column) * volume);
            }
        }
        snapshot.input_matrix = matrix;
        snapshot
    }
}

/// Routing of logical input channels to processing channels
pub type InputMatrix = VolumeMatrix<MAX_PROCESSING_CHANNELS, MAX_LOGICAL_INPUTS>;

/// Up to [`MAX_EQ_BANDS`] equalizer sections without allocation
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EqualizerSet {
    bands: [EqualizerBand; MAX_EQ_BANDS],
    count: usize,
}

impl EqualizerSet {
    pub fn from_slice(bands: &[EqualizerBand]) -> Self {
        let mut set = Self::default();
        for (slot, band) in set.bands.iter_mut().zip(bands) {
            *slot = band.normalized();
            set.count += 1;
        }
        set
    }

    pub fn as_slice(&self) -> &[EqualizerBand] {
        &self.bands[..self.count]
    }
}

/// Fixed-size form of [`GroupConfig`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroupSnapshot {
    pub threshold: f64,
    pub delay: f64,
    pub use_sub: bool,
    pub mono: bool,
    pub equalizers: EqualizerSet,
}

impl Default for GroupSnapshot {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            delay: 0.0,
            use_sub: true,
            mono: false,
            equalizers: EqualizerSet::default(),
        }
    }
}

/// Normalized configuration in a `Copy` form
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfigSnapshot {
    pub structure: Structure,
    pub crossovers: [f64; MAX_CROSSOVERS],
    pub threshold_scaling: f64,
    pub relative_sub_threshold: f64,
    pub sub_delay: f64,
    pub sub_equalizers: EqualizerSet,
    pub group: [GroupSnapshot; MAX_GROUPS],
    pub detection: DetectionConfig,
    /// Input weights with the logical volumes applied
    pub input_matrix: InputMatrix,
}

impl Default for ConfigSnapshot {
    fn default() -> Self {
        Self {
            structure: Structure {
                groups: 0,
                channels_per_group: 0,
                logical_inputs: 0,
                crossovers: 0,
                sub_output: false,
                limiter: LimiterKind::default(),
            },
            crossovers: [0.0; MAX_CROSSOVERS],
            threshold_scaling: MIN_THRESHOLD_SCALING,
            relative_sub_threshold: DEFAULT_REL_SUB_THRESHOLD,
            sub_delay: 0.0,
            sub_equalizers: EqualizerSet::default(),
            group: [GroupSnapshot::default(); MAX_GROUPS],
            detection: DetectionConfig::default(),
            input_matrix: InputMatrix::new(0, 0),
        }
    }
}

impl ConfigSnapshot {
    pub fn crossovers(&self) -> &[f64] {
        &self.crossovers[..self.structure.crossovers]
    }

    pub fn groups(&self) -> &[GroupSnapshot] {
        &self.group[..self.structure.groups]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stereo_pair() -> SpeakerConfig {
        SpeakerConfig {
            groups: 2,
            channels_per_group: 2,
            group: vec![GroupConfig::default(), GroupConfig::default()],
            logical_inputs: vec![LogicalInputConfig::default()],
            ..SpeakerConfig::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = SpeakerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.processing_channels(), 2);
        assert_eq!(config.logical_channels(), 2);
        assert_eq!(config.structure().outputs(), 3);
        assert_eq!(config.detection.perceptive_levels, 11);
        assert!((config.relative_sub_threshold - 2.0_f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_validation() {
        let mut config = SpeakerConfig::default();
        config.groups = 5;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidStructure(_))));

        let mut config = SpeakerConfig::default();
        config.channels_per_group = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidStructure(_))));

        let mut config = SpeakerConfig::default();
        config.logical_inputs = vec![LogicalInputConfig {
            channels: 40,
            ..LogicalInputConfig::default()
        }];
        assert!(matches!(config.validate(), Err(ConfigError::InvalidStructure(_))));

        let mut config = SpeakerConfig::default();
        config.crossovers = vec![1000.0, 100.0];
        assert!(matches!(config.validate(), Err(ConfigError::InvalidCrossovers(_))));

        let mut config = SpeakerConfig::default();
        config.crossovers.clear();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidCrossovers(_))));

        let mut config = SpeakerConfig::default();
        config.detection.minimum_window_seconds = 0.5;
        config.detection.maximum_window_seconds = 0.4;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidDetection(_))));

        let mut config = SpeakerConfig::default();
        config.detection.perceptive_levels = 1;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidDetection(_))));
    }

    #[test]
    fn test_crossovers_checked_against_nyquist() {
        let mut config = SpeakerConfig::default();
        config.crossovers = vec![100.0, 30000.0];
        assert!(config.validate().is_ok(), "no sample rate known yet");
        assert!(config.validate_crossovers(48000.0).is_err());
        assert!(config.validate_crossovers(96000.0).is_ok());
    }

    #[test]
    fn test_normalized_clamps_runtime_values() {
        let mut config = stereo_pair();
        config.group[0].threshold = 3.0;
        config.group[1].delay = -1.0;
        config.threshold_scaling = f64::NAN;
        config.sub_delay = 1.0;
        config.detection.perceptive_levels = 100;
        config.input_matrix = vec![vec![15.0, -1.0]];

        let normalized = config.normalized();
        assert_eq!(normalized.group[0].threshold, MAX_THRESHOLD);
        assert_eq!(normalized.group[1].delay, 0.0);
        assert_eq!(normalized.threshold_scaling, MIN_THRESHOLD_SCALING);
        assert_eq!(normalized.sub_delay, MAX_DELAY);
        assert_eq!(normalized.detection.perceptive_levels, MAX_PERCEPTIVE_LEVELS);
        assert_eq!(normalized.input_matrix.len(), 4, "one row per processing channel");
        assert_eq!(normalized.input_matrix[0], vec![10.0, 0.0]);
        assert_eq!(normalized.input_matrix[3], vec![0.0, 0.0]);
    }

    #[test]
    fn test_normalized_fills_groups() {
        let mut config = stereo_pair();
        config.group.truncate(1);
        assert!(config.validate().is_ok());
        assert_eq!(config.normalized().group.len(), 2);
    }

    #[test]
    fn test_structure_difference() {
        let a = stereo_pair().structure();
        assert!(a.difference(&a).is_none());

        let mut config = stereo_pair();
        config.crossovers.push(8000.0);
        let message = a.difference(&config.structure());
        assert!(message.is_some_and(|m| m.contains("crossovers")));

        let mut config = stereo_pair();
        config.detection.brick_wall = false;
        assert_eq!(config.structure().limiter, LimiterKind::ZeroPrediction);
        assert!(a.difference(&config.structure()).is_some());

        // Thresholds are not structural
        let mut config = stereo_pair();
        config.group[0].threshold = 0.5;
        assert!(a.difference(&config.structure()).is_none());
    }

    #[test]
    fn test_snapshot_applies_volumes() {
        let mut config = stereo_pair();
        config.logical_inputs = vec![
            LogicalInputConfig {
                name: "left".into(),
                channels: 1,
                volume: 0.5,
            },
            LogicalInputConfig {
                name: "right".into(),
                channels: 1,
                volume: 2.0,
            },
        ];
        let snapshot = config.snapshot();
        // Wrapped identity: 4 processing channels from 2 inputs
        assert_eq!(snapshot.input_matrix.get(0, 0), 0.5);
        assert_eq!(snapshot.input_matrix.get(1, 1), 1.0, "volume clamps to 1");
        assert_eq!(snapshot.input_matrix.get(2, 0), 0.5);
        assert_eq!(snapshot.input_matrix.get(3, 1), 1.0);
        assert_eq!(snapshot.input_matrix.get(0, 1), 0.0);
        assert_eq!(snapshot.groups().len(), 2);
        assert_eq!(snapshot.crossovers(), &[80.0, 2000.0]);
    }

    #[test]
    fn test_json_roundtrip_and_defaults() {
        let config = SpeakerConfig::from_json(r#"{"groups": 2, "crossovers": [120.0]}"#).unwrap();
        assert_eq!(config.groups, 2);
        assert_eq!(config.channels_per_group, 2, "missing fields take defaults");
        assert_eq!(config.crossovers, vec![120.0]);

        let json = config.to_json().unwrap();
        let parsed = SpeakerConfig::from_json(&json).unwrap();
        assert_eq!(parsed, config);

        assert!(matches!(SpeakerConfig::from_json("{"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_equalizer_set_limits() {
        let bands = vec![EqualizerBand::default(); 4];
        let set = EqualizerSet::from_slice(&bands);
        assert_eq!(set.as_slice().len(), MAX_EQ_BANDS);

        let mut group = GroupConfig {
            equalizers: bands,
            ..GroupConfig::default()
        };
        group.normalize();
        assert_eq!(group.equalizers.len(), MAX_EQ_BANDS);
    }
}
