//! Speaker Engine
//!
//! The engine is split in two halves that share nothing but the transport
//! and the published sample rate:
//!
//! - [`SpeakerEngine`] lives on the audio thread. `update_metrics` is
//!   called between cycles; `process` once per cycle.
//! - [`EngineControl`] is cloned freely across control threads. A mutex
//!   serialises those callers; the audio thread never sees it.
//!
//! Rust pattern: ownership makes the split explicit. `SpeakerEngine` is
//! `Send` but not `Clone`, so exactly one thread can process audio.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use bandguard_dsp::check_sample_rate;

use crate::config::{ConfigSnapshot, SpeakerConfig, Structure};
use crate::error::{ConfigError, EngineError, EngineResult, TransportError};
use crate::levels::Levels;
use crate::monitor::CancellationToken;
use crate::processor::DynamicsProcessor;
use crate::transport::{Transport, TransportReader, TransportWriter};

/// What travels between the two halves
///
/// Control fills `config` and `changed`; the audio thread writes `levels`.
#[derive(Debug, Clone, Copy)]
struct Exchange {
    config: ConfigSnapshot,
    changed: bool,
    levels: Levels,
}

/// Stream metrics published by the audio half
///
/// Rust pattern: there is no AtomicF64, so the sample rate is stored as its
/// bit pattern.
#[derive(Debug, Default)]
pub struct SharedMetrics {
    sample_rate_bits: AtomicU64,
    buffer_size: AtomicUsize,
}

impl SharedMetrics {
    fn publish(&self, sample_rate: f64, buffer_size: usize) {
        self.sample_rate_bits.store(sample_rate.to_bits(), Ordering::Release);
        self.buffer_size.store(buffer_size, Ordering::Release);
    }

    /// Sample rate, once the audio side reported one
    pub fn sample_rate(&self) -> Option<f64> {
        let rate = f64::from_bits(self.sample_rate_bits.load(Ordering::Acquire));
        (rate > 0.0).then_some(rate)
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size.load(Ordering::Acquire)
    }
}

/// Audio-thread half of the engine
pub struct SpeakerEngine {
    reader: TransportReader<Exchange>,
    metrics: Arc<SharedMetrics>,
    structure: Structure,
    // Latest configuration taken from the transport
    snapshot: ConfigSnapshot,
    processor: Option<DynamicsProcessor>,
    input_frame: Vec<f64>,
    output_frame: Vec<f64>,
    buffer_size: usize,
}

impl SpeakerEngine {
    /// Validate `config` and build both halves
    ///
    /// The structure of `config` (counts, sub output, limiter) is fixed for
    /// the lifetime of the engine. Audio can be processed after the first
    /// [`update_metrics`](Self::update_metrics).
    pub fn new(config: &SpeakerConfig) -> EngineResult<(SpeakerEngine, EngineControl)> {
        config.validate()?;
        let config = config.normalized();
        let snapshot = config.snapshot();
        let structure = snapshot.structure;

        let (writer, reader) = Transport::new(Exchange {
            config: snapshot,
            changed: false,
            levels: Levels::new(structure.groups),
        });
        let metrics = Arc::new(SharedMetrics::default());

        info!(
            "Engine created: {} groups x {} channels, {} logical inputs, {} crossovers, {:?} limiter",
            structure.groups, structure.channels_per_group, structure.logical_inputs, structure.crossovers, structure.limiter
        );

        let engine = SpeakerEngine {
            reader,
            metrics: Arc::clone(&metrics),
            structure,
            snapshot,
            processor: None,
            input_frame: vec![0.0; structure.logical_inputs],
            output_frame: vec![0.0; structure.outputs()],
            buffer_size: 0,
        };
        let control = EngineControl {
            state: Arc::new(Mutex::new(ControlState {
                writer,
                config,
                snapshot,
                structure,
            })),
            metrics,
            token: CancellationToken::new(),
        };
        Ok((engine, control))
    }

    pub fn structure(&self) -> &Structure {
        &self.structure
    }

    /// The configuration the audio thread is working towards
    pub fn snapshot(&self) -> &ConfigSnapshot {
        &self.snapshot
    }

    pub fn is_configured(&self) -> bool {
        self.processor.is_some()
    }

    /// Processing latency in samples, zero before the first metrics update
    pub fn latency(&self) -> usize {
        self.processor.as_ref().map_or(0, DynamicsProcessor::latency)
    }

    /// Set the sample rate and buffer size
    ///
    /// A new sample rate rebuilds every filter, detector, limiter and delay
    /// line from the latest configuration. Must not run concurrently with
    /// [`process`](Self::process); allocates.
    pub fn update_metrics(&mut self, sample_rate: f64, buffer_size: usize) -> EngineResult<()> {
        check_sample_rate(sample_rate)?;
        if buffer_size == 0 {
            return Err(EngineError::InvalidBufferSize(buffer_size));
        }

        let same_rate = self
            .processor
            .as_ref()
            .is_some_and(|processor| processor.sample_rate() == sample_rate);
        if !same_rate {
            self.processor = None;
            self.processor = Some(DynamicsProcessor::new(&self.snapshot, sample_rate)?);
        }
        self.buffer_size = buffer_size;
        self.metrics.publish(sample_rate, buffer_size);

        info!(
            "Engine metrics updated: {} Hz, {} frames, latency {} samples",
            sample_rate,
            buffer_size,
            self.latency()
        );
        Ok(())
    }

    /// Process one audio cycle
    ///
    /// `inputs` holds one buffer per logical input channel, `outputs` one
    /// per output (the sub first when it has its own output). Each buffer
    /// must hold at least `frames` samples. On failure every output that
    /// can be reached is filled with silence.
    ///
    /// # Real-time Safety
    /// No allocations, locks or I/O on the success path.
    pub fn process(&mut self, frames: usize, inputs: &[&[f32]], outputs: &mut [&mut [f32]]) -> EngineResult<()> {
        let Some(processor) = self.processor.as_mut() else {
            silence(frames, outputs);
            return Err(EngineError::NotConfigured);
        };
        if inputs.len() != self.structure.logical_inputs
            || outputs.len() != self.structure.outputs()
            || inputs.iter().any(|buffer| buffer.len() < frames)
            || outputs.iter().any(|buffer| buffer.len() < frames)
        {
            silence(frames, outputs);
            return Err(EngineError::BufferMismatch {
                expected_inputs: self.structure.logical_inputs,
                expected_outputs: self.structure.outputs(),
                frames,
                inputs: inputs.len(),
                outputs: outputs.len(),
            });
        }

        let mut slot = self.reader.try_consume();
        let mut result = Ok(());
        if slot.is_fresh() {
            processor.reset_levels();
            if slot.changed {
                result = processor.update_config(&slot.config);
                if result.is_ok() {
                    self.snapshot = slot.config;
                }
            }
        }

        for frame in 0..frames {
            for (sample, buffer) in self.input_frame.iter_mut().zip(inputs) {
                *sample = f64::from(buffer[frame]);
            }
            processor.process(&self.input_frame, &mut self.output_frame);
            for (buffer, &sample) in outputs.iter_mut().zip(&self.output_frame) {
                buffer[frame] = sample as f32;
            }
        }

        slot.levels = *processor.levels();
        result
    }
}

fn silence(frames: usize, outputs: &mut [&mut [f32]]) {
    for buffer in outputs.iter_mut() {
        let end = frames.min(buffer.len());
        buffer[..end].fill(0.0);
    }
}

struct ControlState {
    writer: TransportWriter<Exchange>,
    config: SpeakerConfig,
    snapshot: ConfigSnapshot,
    structure: Structure,
}

/// Control-thread half of the engine
#[derive(Clone)]
pub struct EngineControl {
    state: Arc<Mutex<ControlState>>,
    metrics: Arc<SharedMetrics>,
    token: CancellationToken,
}

impl EngineControl {
    /// Submit a new configuration and return the latest levels
    ///
    /// Structural changes and invalid crossovers are rejected; every other
    /// value is clamped into range. Waits at most `timeout` for the audio
    /// thread to take the previous submission.
    pub fn apply_config(&self, config: &SpeakerConfig, timeout: Duration) -> EngineResult<Levels> {
        config.validate()?;
        let mut state = self.state.lock();
        if let Some(difference) = state.structure.difference(&config.structure()) {
            return Err(ConfigError::StructureChanged(difference).into());
        }
        if let Some(sample_rate) = self.metrics.sample_rate() {
            config.validate_crossovers(sample_rate)?;
        }

        let config = config.normalized();
        let snapshot = config.snapshot();
        let exchange = Exchange {
            config: snapshot,
            changed: true,
            levels: Levels::new(state.structure.groups),
        };
        let previous = self.submit(&mut state, exchange, timeout)?;
        state.config = config;
        state.snapshot = snapshot;
        info!("Configuration applied");
        Ok(previous.levels)
    }

    /// Levels accumulated by the audio thread up to the previous exchange
    pub fn get_levels(&self, timeout: Duration) -> EngineResult<Levels> {
        let mut state = self.state.lock();
        let exchange = Exchange {
            config: state.snapshot,
            changed: false,
            levels: Levels::new(state.structure.groups),
        };
        let previous = self.submit(&mut state, exchange, timeout)?;
        Ok(previous.levels)
    }

    fn submit(&self, state: &mut ControlState, exchange: Exchange, timeout: Duration) -> EngineResult<Exchange> {
        match state.writer.submit(exchange, timeout, &self.token) {
            Ok(previous) => Ok(previous),
            Err(TransportError::Timeout) => {
                warn!("Audio thread did not pick up the previous exchange within {:?}", timeout);
                Err(EngineError::Timeout(timeout))
            }
            Err(e) => {
                debug!("Exchange aborted: {}", e);
                Err(e.into())
            }
        }
    }

    /// The last configuration that was applied, normalized
    pub fn config(&self) -> SpeakerConfig {
        self.state.lock().config.clone()
    }

    pub fn structure(&self) -> Structure {
        self.state.lock().structure
    }

    /// Sample rate reported by the audio half, if any
    pub fn sample_rate(&self) -> Option<f64> {
        self.metrics.sample_rate()
    }

    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    /// A handle on the same engine whose waits stop on `token`
    pub fn with_cancellation(&self, token: CancellationToken) -> Self {
        Self {
            state: Arc::clone(&self.state),
            metrics: Arc::clone(&self.metrics),
            token,
        }
    }

    /// Abort pending and future waits of every clone
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}
