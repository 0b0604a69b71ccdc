//! Parameter catalog, parameter store and immutable snapshots
//!
//! The store is the single source of truth for the seven user-facing
//! parameters. Values live in atomics so any thread (including the audio
//! thread) can sample them without locking. Change notification goes through
//! registered [`ParameterListener`]s, which is how the real-time update
//! protocol learns that coefficients must be recomputed.

use atomic_float::AtomicF32;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tracing::{debug, trace};

/// Errors raised by the parameter layer
#[derive(Debug, Error, PartialEq)]
pub enum ParameterError {
    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),

    #[error("Non-finite value for {id}: {value}")]
    NonFinite { id: ParamId, value: f32 },

    #[error("{id} out of range: {value} (expected {min}..={max})")]
    OutOfRange {
        id: ParamId,
        value: f32,
        min: f32,
        max: f32,
    },

    #[error("Invalid slope: {0} dB/oct (expected 12, 24, 36 or 48)")]
    InvalidSlope(u32),
}

pub type Result<T> = std::result::Result<T, ParameterError>;

/// Number of parameters in the catalog
pub const PARAM_COUNT: usize = 7;

/// Identifier of a parameter in the fixed catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamId {
    LowCutFreq,
    HighCutFreq,
    PeakFreq,
    PeakGain,
    PeakQuality,
    LowCutSlope,
    HighCutSlope,
}

impl ParamId {
    /// Catalog order, which is also the storage order
    pub const ALL: [ParamId; PARAM_COUNT] = [
        ParamId::LowCutFreq,
        ParamId::HighCutFreq,
        ParamId::PeakFreq,
        ParamId::PeakGain,
        ParamId::PeakQuality,
        ParamId::LowCutSlope,
        ParamId::HighCutSlope,
    ];

    /// Stable external identifier
    pub fn id(self) -> &'static str {
        match self {
            ParamId::LowCutFreq => "LowCut Freq",
            ParamId::HighCutFreq => "HighCut Freq",
            ParamId::PeakFreq => "Peak Freq",
            ParamId::PeakGain => "Peak Gain",
            ParamId::PeakQuality => "Peak Quality",
            ParamId::LowCutSlope => "LowCut Slope",
            ParamId::HighCutSlope => "HighCut Slope",
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.id() == id)
    }

    /// Whether this is one of the four-way slope choices
    pub fn is_choice(self) -> bool {
        matches!(self, ParamId::LowCutSlope | ParamId::HighCutSlope)
    }

    /// Range metadata
    pub fn range(self) -> ParamRange {
        match self {
            ParamId::LowCutFreq => ParamRange::new(20.0, 20000.0, 1.0, 0.25, 20.0),
            ParamId::HighCutFreq => ParamRange::new(20.0, 20000.0, 1.0, 0.25, 20000.0),
            ParamId::PeakFreq => ParamRange::new(20.0, 20000.0, 1.0, 0.25, 750.0),
            ParamId::PeakGain => ParamRange::new(-24.0, 24.0, 0.5, 1.0, 0.0),
            ParamId::PeakQuality => ParamRange::new(0.1, 10.0, 0.05, 1.0, 1.0),
            ParamId::LowCutSlope | ParamId::HighCutSlope => {
                ParamRange::new(0.0, 3.0, 1.0, 1.0, 0.0)
            }
        }
    }

    /// Human readable value, e.g. `"750 Hz"`, `"1.20 kHz"`, `"+6.0 dB"`
    pub fn format_value(self, value: f32) -> String {
        match self {
            ParamId::LowCutFreq | ParamId::HighCutFreq | ParamId::PeakFreq => {
                if value >= 1000.0 {
                    format!("{:.2} kHz", value / 1000.0)
                } else {
                    format!("{:.0} Hz", value)
                }
            }
            ParamId::PeakGain => format!("{:+.1} dB", value),
            ParamId::PeakQuality => format!("{:.2}", value),
            ParamId::LowCutSlope | ParamId::HighCutSlope => {
                Slope::from_value(value).label().to_string()
            }
        }
    }
}

impl fmt::Display for ParamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for ParamId {
    type Err = ParameterError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_id(s.trim()).ok_or_else(|| ParameterError::UnknownParameter(s.to_string()))
    }
}

/// Range metadata of a parameter
///
/// Normalisation follows the skewed-range convention used by plugin hosts:
/// `normalized = proportion ^ skew`, so a skew of 0.25 spreads the low end
/// of a frequency range over most of the control travel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamRange {
    pub min: f32,
    pub max: f32,
    pub step: f32,
    pub skew: f32,
    pub default: f32,
}

impl ParamRange {
    pub const fn new(min: f32, max: f32, step: f32, skew: f32, default: f32) -> Self {
        Self {
            min,
            max,
            step,
            skew,
            default,
        }
    }

    pub fn clamp(&self, value: f32) -> f32 {
        value.clamp(self.min, self.max)
    }

    pub fn contains(&self, value: f32) -> bool {
        value >= self.min && value <= self.max
    }

    /// Clamp and round to the nearest legal step
    pub fn snap(&self, value: f32) -> f32 {
        let clamped = self.clamp(value);
        if self.step <= 0.0 {
            return clamped;
        }
        // f64 keeps grid points such as 0.1 + 18 * 0.05 exact after rounding back
        let steps = ((f64::from(clamped) - f64::from(self.min)) / f64::from(self.step)).round();
        self.clamp((f64::from(self.min) + steps * f64::from(self.step)) as f32)
    }

    /// Map a value into [0, 1]
    pub fn to_normalized(&self, value: f32) -> f32 {
        let proportion = (self.clamp(value) - self.min) / (self.max - self.min);
        if (self.skew - 1.0).abs() > f32::EPSILON {
            proportion.powf(self.skew)
        } else {
            proportion
        }
    }

    /// Map a [0, 1] control position back to a value
    pub fn from_normalized(&self, normalized: f32) -> f32 {
        let normalized = normalized.clamp(0.0, 1.0);
        let proportion = if (self.skew - 1.0).abs() > f32::EPSILON && normalized > 0.0 {
            (normalized.ln() / self.skew).exp()
        } else {
            normalized
        };
        self.min + (self.max - self.min) * proportion
    }
}

/// Steepness of a cut filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum Slope {
    #[default]
    Db12,
    Db24,
    Db36,
    Db48,
}

impl Slope {
    pub const ALL: [Slope; 4] = [Slope::Db12, Slope::Db24, Slope::Db36, Slope::Db48];

    /// Choice index, 0..=3
    pub fn index(self) -> usize {
        self as usize
    }

    /// Out-of-range indices saturate at the steepest slope
    pub fn from_index(index: usize) -> Self {
        Self::ALL[index.min(Self::ALL.len() - 1)]
    }

    /// Decode the float stored for a choice parameter
    pub fn from_value(value: f32) -> Self {
        if value.is_finite() && value > 0.0 {
            Self::from_index(value.round() as usize)
        } else {
            Slope::Db12
        }
    }

    /// Butterworth order realised by this slope
    pub fn order(self) -> usize {
        2 * (self.index() + 1)
    }

    /// Number of second-order sections enabled for this slope
    pub fn active_stages(self) -> usize {
        self.index() + 1
    }

    pub fn db_per_octave(self) -> u32 {
        12 * (self.index() as u32 + 1)
    }

    pub fn label(self) -> &'static str {
        match self {
            Slope::Db12 => "12 db/Oct",
            Slope::Db24 => "24 db/Oct",
            Slope::Db36 => "36 db/Oct",
            Slope::Db48 => "48 db/Oct",
        }
    }
}

impl TryFrom<u32> for Slope {
    type Error = ParameterError;

    fn try_from(db_per_octave: u32) -> Result<Self> {
        match db_per_octave {
            12 => Ok(Slope::Db12),
            24 => Ok(Slope::Db24),
            36 => Ok(Slope::Db36),
            48 => Ok(Slope::Db48),
            other => Err(ParameterError::InvalidSlope(other)),
        }
    }
}

impl From<Slope> for u32 {
    fn from(slope: Slope) -> Self {
        slope.db_per_octave()
    }
}

/// Immutable capture of every parameter at one instant
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterSnapshot {
    pub peak_freq_hz: f32,
    pub peak_gain_db: f32,
    pub peak_q: f32,
    pub low_cut_freq_hz: f32,
    pub high_cut_freq_hz: f32,
    pub low_cut_slope: Slope,
    pub high_cut_slope: Slope,
}

impl Default for ParameterSnapshot {
    fn default() -> Self {
        Self {
            peak_freq_hz: ParamId::PeakFreq.range().default,
            peak_gain_db: ParamId::PeakGain.range().default,
            peak_q: ParamId::PeakQuality.range().default,
            low_cut_freq_hz: ParamId::LowCutFreq.range().default,
            high_cut_freq_hz: ParamId::HighCutFreq.range().default,
            low_cut_slope: Slope::Db12,
            high_cut_slope: Slope::Db12,
        }
    }
}

impl ParameterSnapshot {
    /// Raw value as stored by the parameter store
    pub fn value(&self, id: ParamId) -> f32 {
        match id {
            ParamId::LowCutFreq => self.low_cut_freq_hz,
            ParamId::HighCutFreq => self.high_cut_freq_hz,
            ParamId::PeakFreq => self.peak_freq_hz,
            ParamId::PeakGain => self.peak_gain_db,
            ParamId::PeakQuality => self.peak_q,
            ParamId::LowCutSlope => self.low_cut_slope.index() as f32,
            ParamId::HighCutSlope => self.high_cut_slope.index() as f32,
        }
    }

    /// Copy with one parameter replaced (snapped into its range)
    #[must_use]
    pub fn with(mut self, id: ParamId, value: f32) -> Self {
        let value = id.range().snap(value);
        match id {
            ParamId::LowCutFreq => self.low_cut_freq_hz = value,
            ParamId::HighCutFreq => self.high_cut_freq_hz = value,
            ParamId::PeakFreq => self.peak_freq_hz = value,
            ParamId::PeakGain => self.peak_gain_db = value,
            ParamId::PeakQuality => self.peak_q = value,
            ParamId::LowCutSlope => self.low_cut_slope = Slope::from_value(value),
            ParamId::HighCutSlope => self.high_cut_slope = Slope::from_value(value),
        }
        self
    }

    /// Check every value against the catalog
    pub fn validate(&self) -> Result<()> {
        for id in ParamId::ALL {
            let value = self.value(id);
            let range = id.range();
            if !value.is_finite() {
                return Err(ParameterError::NonFinite { id, value });
            }
            if !range.contains(value) {
                return Err(ParameterError::OutOfRange {
                    id,
                    value,
                    min: range.min,
                    max: range.max,
                });
            }
        }
        Ok(())
    }
}

/// Observer invoked whenever a parameter value changes
pub trait ParameterListener: Send + Sync {
    fn parameter_changed(&self, id: ParamId, value: f32);
}

/// Handle returned by [`ParameterStore::add_listener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Thread-safe store of the current parameter values
///
/// Reads are wait-free atomic loads. Writes happen on control threads and
/// notify listeners synchronously after the new value is visible.
pub struct ParameterStore {
    values: [AtomicF32; PARAM_COUNT],
    listeners: RwLock<Vec<(ListenerId, Arc<dyn ParameterListener>)>>,
    next_listener: AtomicU64,
}

impl ParameterStore {
    /// Create a store holding the catalog defaults
    pub fn new() -> Self {
        Self::from_snapshot(&ParameterSnapshot::default())
    }

    /// Create a store initialised from a snapshot (values are snapped)
    pub fn from_snapshot(snapshot: &ParameterSnapshot) -> Self {
        Self {
            values: ParamId::ALL.map(|id| AtomicF32::new(id.range().snap(snapshot.value(id)))),
            listeners: RwLock::new(Vec::new()),
            next_listener: AtomicU64::new(0),
        }
    }

    /// Current raw value
    pub fn get(&self, id: ParamId) -> f32 {
        self.values[id.index()].load(Ordering::Relaxed)
    }

    /// Current value as a [0, 1] control position
    pub fn get_normalized(&self, id: ParamId) -> f32 {
        id.range().to_normalized(self.get(id))
    }

    /// Set a raw value; returns the value actually stored after snapping
    ///
    /// Listeners are notified only when the stored value changes.
    pub fn set(&self, id: ParamId, value: f32) -> Result<f32> {
        if !value.is_finite() {
            return Err(ParameterError::NonFinite { id, value });
        }
        let snapped = id.range().snap(value);
        let previous = self.values[id.index()].swap(snapped, Ordering::Relaxed);
        if previous != snapped {
            debug!(param = %id, from = previous, to = snapped, "Parameter changed");
            self.notify(id, snapped);
        }
        Ok(snapped)
    }

    /// Set from a [0, 1] control position
    pub fn set_normalized(&self, id: ParamId, normalized: f32) -> Result<f32> {
        if !normalized.is_finite() {
            return Err(ParameterError::NonFinite {
                id,
                value: normalized,
            });
        }
        self.set(id, id.range().from_normalized(normalized))
    }

    /// Set by external identifier, e.g. `"Peak Gain"`
    pub fn set_by_name(&self, name: &str, value: f32) -> Result<f32> {
        let id: ParamId = name.parse()?;
        self.set(id, value)
    }

    /// Store every value of a snapshot
    pub fn apply_snapshot(&self, snapshot: &ParameterSnapshot) -> Result<()> {
        for id in ParamId::ALL {
            self.set(id, snapshot.value(id))?;
        }
        Ok(())
    }

    /// Sample every parameter into an immutable snapshot
    pub fn snapshot(&self) -> ParameterSnapshot {
        ParameterSnapshot {
            peak_freq_hz: self.get(ParamId::PeakFreq),
            peak_gain_db: self.get(ParamId::PeakGain),
            peak_q: self.get(ParamId::PeakQuality),
            low_cut_freq_hz: self.get(ParamId::LowCutFreq),
            high_cut_freq_hz: self.get(ParamId::HighCutFreq),
            low_cut_slope: Slope::from_value(self.get(ParamId::LowCutSlope)),
            high_cut_slope: Slope::from_value(self.get(ParamId::HighCutSlope)),
        }
    }

    /// Register an observer for every parameter
    pub fn add_listener(&self, listener: Arc<dyn ParameterListener>) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        trace!(listener = id.0, "Parameter listener added");
        id
    }

    /// Unregister an observer; returns false if it was not registered
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        before != listeners.len()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn notify(&self, id: ParamId, value: f32) {
        let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
        for (_, listener) in listeners.iter() {
            listener.parameter_changed(id, value);
        }
    }
}

impl Default for ParameterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ParameterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParameterStore")
            .field("snapshot", &self.snapshot())
            .field("listeners", &self.listener_count())
            .finish()
    }
}
