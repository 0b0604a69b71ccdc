//! Fixed three-position mono filter chain
//!
//! Topology: low-cut cascade → peak biquad → high-cut cascade. Each cascade
//! holds [`MAX_CUT_STAGES`] biquads that are pruned by bypass flags, never
//! removed, so changing the slope does not reallocate or reset anything.
//! Disabled stages keep whatever coefficients and state they last had; they
//! are inert because they never run.
//!
//! Every setter is a plain field assignment: no allocation, no locking, no
//! panics. The chain is owned by exactly one consumer thread, which calls
//! the setters between blocks.

use super::filter::{BiquadCoeffs, BiquadFilter, ChainCoefficients, CutCoefficients, MAX_CUT_STAGES};
use super::params::{ParameterSnapshot, Slope};
use super::sync::BypassSwitches;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::trace;

/// Raised when freshly designed coefficients cannot be installed
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum CoefficientError {
    #[error("Non-finite coefficients designed for {position}; previous filter kept")]
    NonFinite { position: ChainPosition },
}

/// Position of a filter in the mono chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChainPosition {
    LowCut,
    Peak,
    HighCut,
}

impl ChainPosition {
    pub const ALL: [ChainPosition; 3] = [
        ChainPosition::LowCut,
        ChainPosition::Peak,
        ChainPosition::HighCut,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            ChainPosition::LowCut => "LowCut",
            ChainPosition::Peak => "Peak",
            ChainPosition::HighCut => "HighCut",
        }
    }
}

impl fmt::Display for ChainPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// CUT CASCADE
// ============================================================================

/// Four independently bypassable biquad stages in series
#[derive(Debug, Clone, PartialEq)]
pub struct CutFilter {
    stages: [BiquadFilter; MAX_CUT_STAGES],
    bypassed: [bool; MAX_CUT_STAGES],
}

impl Default for CutFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl CutFilter {
    /// All stages bypassed with unity coefficients
    pub fn new() -> Self {
        Self {
            stages: Default::default(),
            bypassed: [true; MAX_CUT_STAGES],
        }
    }

    /// Replace one stage's coefficients; returns false for a bad index
    #[inline]
    pub fn set_stage_coefficients(&mut self, stage: usize, coeffs: BiquadCoeffs) -> bool {
        match self.stages.get_mut(stage) {
            Some(filter) => {
                filter.set_coeffs(coeffs);
                true
            }
            None => false,
        }
    }

    /// Toggle one stage; returns false for a bad index
    #[inline]
    pub fn set_bypassed(&mut self, stage: usize, bypassed: bool) -> bool {
        match self.bypassed.get_mut(stage) {
            Some(flag) => {
                *flag = bypassed;
                true
            }
            None => false,
        }
    }

    /// Out-of-range stages report as bypassed
    pub fn is_bypassed(&self, stage: usize) -> bool {
        self.bypassed.get(stage).copied().unwrap_or(true)
    }

    pub fn stage(&self, stage: usize) -> Option<&BiquadFilter> {
        self.stages.get(stage)
    }

    /// Number of stages currently enabled
    pub fn active_stages(&self) -> usize {
        self.bypassed.iter().filter(|b| !**b).count()
    }

    /// Coefficients of the enabled stages, in cascade order
    pub fn enabled_coefficients(&self) -> impl Iterator<Item = &BiquadCoeffs> {
        self.stages
            .iter()
            .zip(self.bypassed.iter())
            .filter(|(_, bypassed)| !**bypassed)
            .map(|(stage, _)| stage.coeffs())
    }

    /// Run every enabled stage over the buffer
    pub fn process(&mut self, buffer: &mut [f32]) {
        for (stage, bypassed) in self.stages.iter_mut().zip(self.bypassed.iter()) {
            if !*bypassed {
                stage.process(buffer);
            }
        }
    }

    pub fn reset(&mut self) {
        for stage in &mut self.stages {
            stage.reset();
        }
    }
}

/// Install a cut design into a cascade
///
/// Bypasses all four stages, then assigns coefficients to and enables
/// stages `0..=slope.index()`. Stage 0 is therefore active whenever any
/// stage is. Stages above the slope keep stale coefficients but stay
/// bypassed.
pub fn update_cut_filter(cascade: &mut CutFilter, coefficients: &CutCoefficients, slope: Slope) {
    for stage in 0..MAX_CUT_STAGES {
        cascade.set_bypassed(stage, true);
    }

    for stage in 0..slope.active_stages() {
        if let Some(coeffs) = coefficients.get(stage) {
            cascade.set_stage_coefficients(stage, *coeffs);
            cascade.set_bypassed(stage, false);
        }
    }
}

// ============================================================================
// MONO CHAIN
// ============================================================================

/// Enabled/bypassed state of each chain position, for the display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BypassState {
    pub low_cut_bypassed: bool,
    pub peak_bypassed: bool,
    pub high_cut_bypassed: bool,
    pub low_cut_active_stages: usize,
    pub high_cut_active_stages: usize,
}

/// One channel's signal path
#[derive(Debug, Clone, PartialEq)]
pub struct MonoChain {
    low_cut: CutFilter,
    peak: BiquadFilter,
    high_cut: CutFilter,
    position_bypassed: [bool; 3],
}

impl Default for MonoChain {
    fn default() -> Self {
        Self::new()
    }
}

impl MonoChain {
    /// Transparent chain: cut stages bypassed, unity peak
    pub fn new() -> Self {
        Self {
            low_cut: CutFilter::new(),
            peak: BiquadFilter::default(),
            high_cut: CutFilter::new(),
            position_bypassed: [false; 3],
        }
    }

    pub fn low_cut(&self) -> &CutFilter {
        &self.low_cut
    }

    pub fn low_cut_mut(&mut self) -> &mut CutFilter {
        &mut self.low_cut
    }

    pub fn high_cut(&self) -> &CutFilter {
        &self.high_cut
    }

    pub fn high_cut_mut(&mut self) -> &mut CutFilter {
        &mut self.high_cut
    }

    pub fn peak(&self) -> &BiquadFilter {
        &self.peak
    }

    #[inline]
    pub fn set_peak_coefficients(&mut self, coeffs: BiquadCoeffs) {
        self.peak.set_coeffs(coeffs);
    }

    /// Bypass a whole position (all of a cascade, or the peak)
    #[inline]
    pub fn set_bypassed(&mut self, position: ChainPosition, bypassed: bool) {
        self.position_bypassed[position.index()] = bypassed;
    }

    pub fn is_bypassed(&self, position: ChainPosition) -> bool {
        self.position_bypassed[position.index()]
    }

    /// Copy the shared switches into this chain; true if anything changed
    pub fn sync_bypass(&mut self, switches: &BypassSwitches) -> bool {
        let mut changed = false;
        for position in ChainPosition::ALL {
            let bypassed = switches.is_bypassed(position);
            if self.position_bypassed[position.index()] != bypassed {
                self.position_bypassed[position.index()] = bypassed;
                changed = true;
            }
        }
        changed
    }

    /// Install a complete design, or nothing at all
    ///
    /// Non-finite designs are rejected before any stage is touched, so the
    /// previously installed filter stays active.
    pub fn apply(&mut self, coefficients: &ChainCoefficients) -> Result<(), CoefficientError> {
        if !coefficients.low_cut.is_finite() {
            return Err(CoefficientError::NonFinite {
                position: ChainPosition::LowCut,
            });
        }
        if !coefficients.peak.is_finite() {
            return Err(CoefficientError::NonFinite {
                position: ChainPosition::Peak,
            });
        }
        if !coefficients.high_cut.is_finite() {
            return Err(CoefficientError::NonFinite {
                position: ChainPosition::HighCut,
            });
        }

        update_cut_filter(&mut self.low_cut, &coefficients.low_cut, coefficients.low_cut_slope);
        self.peak.set_coeffs(coefficients.peak);
        update_cut_filter(&mut self.high_cut, &coefficients.high_cut, coefficients.high_cut_slope);
        Ok(())
    }

    /// Design from a snapshot and install
    pub fn update_from_snapshot(
        &mut self,
        snapshot: &ParameterSnapshot,
        sample_rate: f64,
    ) -> Result<(), CoefficientError> {
        self.apply(&ChainCoefficients::design(snapshot, sample_rate))
    }

    /// Process one block in place
    pub fn process(&mut self, buffer: &mut [f32]) {
        if !self.is_bypassed(ChainPosition::LowCut) {
            self.low_cut.process(buffer);
        }
        if !self.is_bypassed(ChainPosition::Peak) {
            self.peak.process(buffer);
        }
        if !self.is_bypassed(ChainPosition::HighCut) {
            self.high_cut.process(buffer);
        }
    }

    /// Clear all filter memory (start of a session)
    pub fn reset(&mut self) {
        self.low_cut.reset();
        self.peak.reset();
        self.high_cut.reset();
        trace!("Mono chain state cleared");
    }

    pub fn bypass_state(&self) -> BypassState {
        BypassState {
            low_cut_bypassed: self.is_bypassed(ChainPosition::LowCut),
            peak_bypassed: self.is_bypassed(ChainPosition::Peak),
            high_cut_bypassed: self.is_bypassed(ChainPosition::HighCut),
            low_cut_active_stages: self.low_cut.active_stages(),
            high_cut_active_stages: self.high_cut.active_stages(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
