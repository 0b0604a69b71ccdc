//! Spectrum math for the analyzer trace
//!
//! Everything here is allocation-free after construction and independent of
//! the FFT backend:
//! - `FftOrder` / `WindowType`: analysis size and tapering window
//! - `compute_magnitudes_db`: complex bins → calibrated dB with a floor
//! - `SpectrumSmoother`: attack/release ballistics per bin
//! - `AnalyzerPathGenerator`: dB bins → one vertex per pixel column

use super::display::{column_frequency, map_to_log10, DbRange, DisplayBounds, MagnitudePath};
use super::display::{MAX_FREQUENCY_HZ, MIN_FREQUENCY_HZ};
use num_complex::Complex32;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;

/// Default analyzer floor (bottom of the trace)
pub const DEFAULT_FLOOR_DB: f32 = -48.0;

/// Default analyzer ceiling (top of the trace)
pub const DEFAULT_CEILING_DB: f32 = 0.0;

#[derive(Debug, Error, PartialEq)]
pub enum SpectrumError {
    #[error("Unsupported FFT size: {0} (expected 2048, 4096 or 8192)")]
    UnsupportedSize(u32),

    #[error("Unknown window: {0}")]
    UnknownWindow(String),
}

// ============================================================================
// ANALYSIS SIZE
// ============================================================================

/// FFT length as a power of two
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum FftOrder {
    #[default]
    Order2048 = 11,
    Order4096 = 12,
    Order8192 = 13,
}

impl FftOrder {
    /// Number of samples in the analysis window
    pub fn size(self) -> usize {
        1 << (self as usize)
    }

    /// Bins carried into the path (DC up to, excluding, Nyquist)
    pub fn bins(self) -> usize {
        self.size() / 2
    }
}

impl TryFrom<u32> for FftOrder {
    type Error = SpectrumError;

    fn try_from(size: u32) -> Result<Self, Self::Error> {
        match size {
            2048 => Ok(FftOrder::Order2048),
            4096 => Ok(FftOrder::Order4096),
            8192 => Ok(FftOrder::Order8192),
            other => Err(SpectrumError::UnsupportedSize(other)),
        }
    }
}

impl From<FftOrder> for u32 {
    fn from(order: FftOrder) -> Self {
        order.size() as u32
    }
}

// ============================================================================
// WINDOWS
// ============================================================================

/// Tapering window applied before the FFT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowType {
    Hann,
    Hamming,
    #[default]
    Blackman,
    Nuttall,
}

impl WindowType {
    pub const ALL: [WindowType; 4] = [
        WindowType::Hann,
        WindowType::Hamming,
        WindowType::Blackman,
        WindowType::Nuttall,
    ];

    pub fn name(self) -> &'static str {
        match self {
            WindowType::Hann => "hann",
            WindowType::Hamming => "hamming",
            WindowType::Blackman => "blackman",
            WindowType::Nuttall => "nuttall",
        }
    }

    /// Window coefficients of length `size`
    pub fn generate(self, size: usize) -> Vec<f32> {
        let coefficients: Vec<f64> = match self {
            WindowType::Hann => apodize::hanning_iter(size).collect(),
            WindowType::Hamming => apodize::hamming_iter(size).collect(),
            WindowType::Blackman => apodize::blackman_iter(size).collect(),
            WindowType::Nuttall => apodize::nuttall_iter(size).collect(),
        };
        coefficients.into_iter().map(|w| w as f32).collect()
    }
}

impl std::str::FromStr for WindowType {
    type Err = SpectrumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|w| w.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| SpectrumError::UnknownWindow(s.to_string()))
    }
}

/// Precomputed window with its amplitude compensation
#[derive(Debug, Clone)]
pub struct Window {
    kind: WindowType,
    coefficients: Vec<f32>,
    coherent_gain: f32,
}

impl Window {
    pub fn new(kind: WindowType, size: usize) -> Self {
        let coefficients = kind.generate(size);
        let coherent_gain = if coefficients.is_empty() {
            1.0
        } else {
            coefficients.iter().sum::<f32>() / coefficients.len() as f32
        };
        Self {
            kind,
            coefficients,
            coherent_gain,
        }
    }

    pub fn kind(&self) -> WindowType {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.coefficients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coefficients.is_empty()
    }

    /// Mean window value; a full-scale sine loses this factor in the FFT
    pub fn coherent_gain(&self) -> f32 {
        self.coherent_gain
    }

    /// Multiply `samples` by the window into `out`
    pub fn apply(&self, samples: &[f32], out: &mut [f32]) {
        for ((o, s), w) in out.iter_mut().zip(samples).zip(&self.coefficients) {
            *o = s * w;
        }
    }
}

// ============================================================================
// MAGNITUDES
// ============================================================================

/// Centre frequency of FFT bin `bin`
#[inline]
pub fn bin_frequency(bin: usize, fft_size: usize, sample_rate: f64) -> f64 {
    bin as f64 * sample_rate / fft_size as f64
}

/// Linear amplitude to dB, never below `floor_db`
#[inline]
pub fn amplitude_to_db(amplitude: f32, floor_db: f32) -> f32 {
    if amplitude > 0.0 {
        (20.0 * amplitude.log10()).max(floor_db)
    } else {
        floor_db
    }
}

/// Convert FFT output to calibrated levels
///
/// Magnitudes are scaled by `2 / (N * coherent_gain)` so a full-scale sine
/// centred on a bin reads 0 dB. Writes `min(bins.len(), out.len())` values.
pub fn compute_magnitudes_db(
    bins: &[Complex32],
    fft_size: usize,
    coherent_gain: f32,
    floor_db: f32,
    out: &mut [f32],
) {
    let scale = 2.0 / (fft_size as f32 * coherent_gain.max(f32::EPSILON));
    for (level, bin) in out.iter_mut().zip(bins) {
        *level = amplitude_to_db(bin.norm() * scale, floor_db);
    }
}

// ============================================================================
// SMOOTHING
// ============================================================================

/// Attack/release ballistics applied per bin in the dB domain
///
/// Coefficients are the fraction of the distance to the new value covered
/// per frame: 1.0 follows instantly, smaller values lag.
#[derive(Debug, Clone)]
pub struct SpectrumSmoother {
    attack: f32,
    release: f32,
    state: Vec<f32>,
}

impl SpectrumSmoother {
    pub fn new(bins: usize, attack: f32, release: f32, floor_db: f32) -> Self {
        Self {
            attack: attack.clamp(0.0, 1.0),
            release: release.clamp(0.0, 1.0),
            state: vec![floor_db; bins],
        }
    }

    /// Smooth `levels` in place against the previous frame
    pub fn apply(&mut self, levels: &mut [f32]) {
        for (current, previous) in levels.iter_mut().zip(self.state.iter_mut()) {
            let coefficient = if *current > *previous {
                self.attack
            } else {
                self.release
            };
            *previous += (*current - *previous) * coefficient;
            *current = *previous;
        }
    }

    pub fn reset(&mut self, floor_db: f32) {
        self.state.fill(floor_db);
    }
}

// ============================================================================
// PATH GENERATION
// ============================================================================

/// Bin spacing of a magnitude array
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinLayout {
    pub fft_size: usize,
    pub sample_rate: f64,
}

impl BinLayout {
    pub fn bin_width(&self) -> f64 {
        self.sample_rate / self.fft_size as f64
    }
}

/// Level of one pixel column spanning `[low_hz, high_hz]`
///
/// When several bins fall inside the column the loudest wins; otherwise
/// the level is interpolated between the two bins around `centre_hz`.
pub fn column_level(levels_db: &[f32], layout: &BinLayout, low_hz: f64, centre_hz: f64, high_hz: f64) -> f32 {
    if levels_db.is_empty() {
        return DEFAULT_FLOOR_DB;
    }
    let last = levels_db.len() - 1;
    let bin_width = layout.bin_width();

    let first_bin = (low_hz / bin_width).ceil().max(0.0) as usize;
    let last_bin = ((high_hz / bin_width).floor().max(0.0) as usize).min(last);
    if last_bin > first_bin {
        return levels_db[first_bin..=last_bin]
            .iter()
            .copied()
            .fold(f32::NEG_INFINITY, f32::max);
    }

    let position = (centre_hz / bin_width).max(0.0);
    let lower = (position.floor() as usize).min(last);
    let upper = (lower + 1).min(last);
    let fraction = (position - lower as f64).clamp(0.0, 1.0) as f32;
    levels_db[lower] + (levels_db[upper] - levels_db[lower]) * fraction
}

/// Turns analyzer frames into screen paths, keeping only what the renderer
/// will actually draw
///
/// Each [`generate`](Self::generate) queues one path. The renderer calls
/// [`take_latest`](Self::take_latest), which drains the queue and keeps the
/// newest. Drained paths are recycled, so steady-state operation does not
/// allocate.
#[derive(Debug)]
pub struct AnalyzerPathGenerator {
    queue: VecDeque<MagnitudePath>,
    spare: Vec<MagnitudePath>,
    capacity: usize,
    levels: Vec<f64>,
}

impl AnalyzerPathGenerator {
    /// `capacity` bounds how many unread paths are kept
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: VecDeque::with_capacity(capacity),
            spare: Vec::with_capacity(capacity),
            capacity,
            levels: Vec::new(),
        }
    }

    /// Build one path from a frame of levels and queue it
    pub fn generate(&mut self, levels_db: &[f32], layout: &BinLayout, bounds: &DisplayBounds, range: &DbRange) {
        let width = bounds.columns();
        self.levels.clear();

        let span = width.saturating_sub(1).max(1) as f64;
        for column in 0..width {
            let edge = |offset: f64| {
                let proportion = ((column as f64 + offset) / span).clamp(0.0, 1.0);
                map_to_log10(proportion, MIN_FREQUENCY_HZ, MAX_FREQUENCY_HZ)
            };
            let level = column_level(
                levels_db,
                layout,
                edge(-0.5),
                column_frequency(column, width),
                edge(0.5),
            );
            self.levels.push(f64::from(level));
        }

        let mut path = if self.queue.len() >= self.capacity {
            // Oldest unread path is overwritten
            self.queue.pop_front().unwrap_or_default()
        } else {
            self.spare.pop().unwrap_or_default()
        };
        path.rebuild(&self.levels, bounds, range);
        self.queue.push_back(path);
    }

    pub fn num_paths_available(&self) -> usize {
        self.queue.len()
    }

    /// Drain every queued path into `out`, leaving the newest there
    ///
    /// Returns false (and leaves `out` untouched) when nothing was queued.
    pub fn take_latest(&mut self, out: &mut MagnitudePath) -> bool {
        let mut found = false;
        while let Some(path) = self.queue.pop_front() {
            let previous = std::mem::replace(out, path);
            self.spare.push(previous);
            found = true;
        }
        found
    }
}
