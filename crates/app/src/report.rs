//! Reports printed by the CLI
//!
//! - `param_catalog`: every parameter with its range and display text
//! - `response_table`: analytic chain response at log-spaced frequencies
//! - `analyze_tones`: synthetic tones through processor and analyzer

use serde::Serialize;
use std::f32::consts::TAU;
use thiserror::Error;
use tracing::{debug, info};
use trieq_core::domain::audio::AudioError;
use trieq_core::domain::chain::{CoefficientError, MonoChain};
use trieq_core::domain::config::EqConfig;
use trieq_core::domain::display::{control_kind, map_to_log10, MAX_FREQUENCY_HZ, MIN_FREQUENCY_HZ};
use trieq_core::domain::filter::gain_to_db;
use trieq_core::domain::params::{ParamId, ParameterError, ParameterSnapshot, ParameterStore};
use trieq_core::domain::response::{chain_magnitude_at, RESPONSE_FLOOR_DB};
use trieq_core::domain::spectrum::bin_frequency;
use trieq_infra::audio::{EngineError, FifoStats};

pub type Result<T> = std::result::Result<T, ReportError>;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Parameter error: {0}")]
    Parameter(#[from] ParameterError),

    #[error("Filter design rejected: {0}")]
    Coefficients(#[from] CoefficientError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Invalid override '{0}' (expected \"Name=value\")")]
    InvalidOverride(String),
}

// ============================================================================
// PARAMETER OVERRIDES
// ============================================================================

/// Apply `"Name=value"` overrides, e.g. `"Peak Gain=6"`
///
/// Returns the snapshot after all overrides are stored.
pub fn apply_overrides(snapshot: &ParameterSnapshot, overrides: &[String]) -> Result<ParameterSnapshot> {
    let store = ParameterStore::from_snapshot(snapshot);
    for entry in overrides {
        let (name, value) = entry
            .split_once('=')
            .ok_or_else(|| ReportError::InvalidOverride(entry.clone()))?;
        let value: f32 = value
            .trim()
            .parse()
            .map_err(|_| ReportError::InvalidOverride(entry.clone()))?;
        let stored = store.set_by_name(name, value)?;
        debug!(param = name.trim(), requested = value, stored, "Override applied");
    }
    Ok(store.snapshot())
}

// ============================================================================
// PARAMETER CATALOG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamRow {
    pub id: &'static str,
    pub value: f32,
    pub display: String,
    pub min: f32,
    pub max: f32,
    pub step: f32,
    pub default: f32,
    pub min_label: Option<String>,
    pub max_label: Option<String>,
}

/// One row per parameter, in catalog order
pub fn param_catalog(snapshot: &ParameterSnapshot) -> Vec<ParamRow> {
    ParamId::ALL
        .into_iter()
        .map(|id| {
            let range = id.range();
            let value = snapshot.value(id);
            let kind = control_kind(id);
            let extremes = kind.extremes();
            ParamRow {
                id: id.id(),
                value,
                display: id.format_value(value),
                min: range.min,
                max: range.max,
                step: range.step,
                default: range.default,
                min_label: extremes.map(|(min, _)| min.to_string()),
                max_label: extremes.map(|(_, max)| max.to_string()),
            }
        })
        .collect()
}

// ============================================================================
// RESPONSE TABLE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResponseRow {
    pub frequency_hz: f64,
    pub magnitude_db: f64,
}

/// Chain response at `points` log-spaced frequencies from 20 Hz to 20 kHz
pub fn response_table(snapshot: &ParameterSnapshot, sample_rate: f64, points: usize) -> Result<Vec<ResponseRow>> {
    let mut chain = MonoChain::new();
    chain.update_from_snapshot(snapshot, sample_rate)?;

    let span = points.saturating_sub(1).max(1) as f64;
    Ok((0..points)
        .map(|i| {
            let frequency_hz = map_to_log10(i as f64 / span, MIN_FREQUENCY_HZ, MAX_FREQUENCY_HZ);
            ResponseRow {
                frequency_hz,
                magnitude_db: gain_to_db(
                    chain_magnitude_at(&chain, frequency_hz, sample_rate),
                    RESPONSE_FLOOR_DB,
                ),
            }
        })
        .collect())
}

// ============================================================================
// TONE ANALYSIS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SpectrumPeak {
    pub frequency_hz: f64,
    pub level_db: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyzeReport {
    pub tones_hz: Vec<f32>,
    pub amplitude: f32,
    pub blocks_processed: u64,
    pub fifo_stored: u64,
    pub fifo_displaced: u64,
    pub fifo_rejected: u64,
    pub peaks: Vec<SpectrumPeak>,
}

/// Levels this far above the analyzer floor count as peaks
const PEAK_THRESHOLD_DB: f32 = 12.0;

/// Run summed sine tones through the equalizer and report what the
/// analyzer sees
///
/// The signal is processed in blocks of the configured maximum size and the
/// analyzer is ticked after every block.
pub fn analyze_tones(config: &EqConfig, tones_hz: &[f32], amplitude: f32, seconds: f32) -> Result<AnalyzeReport> {
    let mut engine = trieq_infra::audio::EqEngine::new(config.clone())?;
    let mut processor = engine.take_processor()?;
    let mut analyzer = engine.spectrum_analyzer();
    let bounds = config.display_bounds();
    let range = config.analyzer_range();

    let sample_rate = config.engine.sample_rate as f32;
    let block_size = config.engine.max_block_size;
    let total_frames = (seconds.max(0.0) * sample_rate) as usize;

    let mut left = vec![0.0f32; block_size];
    let mut right = vec![0.0f32; block_size];
    let mut frame = 0usize;

    while frame < total_frames {
        let len = block_size.min(total_frames - frame);
        for (i, (l, r)) in left[..len].iter_mut().zip(right[..len].iter_mut()).enumerate() {
            let t = (frame + i) as f32 / sample_rate;
            let sample: f32 = tones_hz
                .iter()
                .map(|hz| amplitude * (TAU * hz * t).sin())
                .sum();
            *l = sample;
            *r = sample;
        }
        processor.process_block(&mut left[..len], &mut right[..len])?;
        analyzer.tick(&bounds, &range);
        frame += len;
    }

    let layout = analyzer.layout();
    let threshold = config.analyzer.floor_db + PEAK_THRESHOLD_DB;
    let levels = analyzer.latest_magnitudes();
    let mut peaks: Vec<SpectrumPeak> = (1..levels.len().saturating_sub(1))
        .filter(|&bin| {
            levels[bin] > threshold && levels[bin] >= levels[bin - 1] && levels[bin] > levels[bin + 1]
        })
        .map(|bin| SpectrumPeak {
            frequency_hz: bin_frequency(bin, layout.fft_size, layout.sample_rate),
            level_db: levels[bin],
        })
        .collect();
    peaks.sort_by(|a, b| b.level_db.total_cmp(&a.level_db));
    peaks.truncate(tones_hz.len().max(1) * 2);

    let FifoStats {
        stored,
        displaced,
        rejected,
    } = engine.fifo_stats();
    let report = AnalyzeReport {
        tones_hz: tones_hz.to_vec(),
        amplitude,
        blocks_processed: engine.processor_stats().blocks_processed(),
        fifo_stored: stored,
        fifo_displaced: displaced,
        fifo_rejected: rejected,
        peaks,
    };

    info!(
        blocks = report.blocks_processed,
        peaks = report.peaks.len(),
        "Tone analysis complete"
    );
    Ok(report)
}
