//! Biquad filters and the coefficient factory
//!
//! This module provides:
//! - `BiquadCoeffs`: one second-order section, normalised so `a0 == 1`
//! - `BiquadFilter`: Direct Form I state for one section
//! - `design_peak` / `design_cut`: pure functions mapping parameters to
//!   coefficients (bell filter, Butterworth cut cascades)
//!
//! Design functions return fixed-size values and never allocate, so the
//! audio thread may call them at the top of a block.

use super::params::{ParameterSnapshot, Slope};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Maximum number of second-order sections in a cut cascade
pub const MAX_CUT_STAGES: usize = 4;

/// Parameter range limits the factory clamps to in release builds
pub mod limits {
    pub const GAIN_DB_MIN: f32 = -24.0;
    pub const GAIN_DB_MAX: f32 = 24.0;
    pub const Q_MIN: f32 = 0.1;
    pub const Q_MAX: f32 = 10.0;
    /// Highest usable design frequency as a fraction of the sample rate
    pub const MAX_FREQ_RATIO: f64 = 0.499;
    pub const MIN_FREQ_HZ: f64 = 1.0;
}

/// State magnitudes below this are flushed to zero
const DENORMAL_FLOOR: f64 = 1.0e-25;

// ============================================================================
// BIQUAD COEFFICIENTS
// ============================================================================

/// Biquad filter coefficients
///
/// Stored in f64: cut filters near 20 Hz put their poles very close to the
/// unit circle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BiquadCoeffs {
    /// Numerator coefficients
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    /// Denominator coefficients (a0 is normalized to 1.0)
    pub a1: f64,
    pub a2: f64,
}

impl Default for BiquadCoeffs {
    fn default() -> Self {
        // Unity gain (no filtering)
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
        }
    }
}

impl BiquadCoeffs {
    fn normalized(b0: f64, b1: f64, b2: f64, a0: f64, a1: f64, a2: f64) -> Self {
        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }

    /// Calculate coefficients for a peaking (bell) filter
    ///
    /// # Parameters
    /// - `sample_rate`: Audio sample rate in Hz
    /// - `freq`: Center frequency in Hz
    /// - `q`: Quality factor (bandwidth)
    /// - `gain_factor`: Linear gain at the center frequency
    #[must_use]
    pub fn peaking(sample_rate: f64, freq: f64, q: f64, gain_factor: f64) -> Self {
        let a = gain_factor.max(0.0).sqrt();
        let w0 = 2.0 * PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / (2.0 * q);

        let b0 = 1.0 + alpha * a;
        let b1 = -2.0 * cos_w0;
        let b2 = 1.0 - alpha * a;

        let a0 = 1.0 + alpha / a;
        let a1 = -2.0 * cos_w0;
        let a2 = 1.0 - alpha / a;

        Self::normalized(b0, b1, b2, a0, a1, a2)
    }

    /// Calculate coefficients for a second-order high-pass section
    ///
    /// Bilinear transform with frequency pre-warping, so the analog corner
    /// lands exactly on `freq`.
    #[must_use]
    pub fn high_pass(sample_rate: f64, freq: f64, q: f64) -> Self {
        let n = (PI * freq / sample_rate).tan();
        let n_squared = n * n;
        let inv_q = 1.0 / q;
        let c1 = 1.0 / (1.0 + inv_q * n + n_squared);

        Self {
            b0: c1,
            b1: -2.0 * c1,
            b2: c1,
            a1: c1 * 2.0 * (n_squared - 1.0),
            a2: c1 * (1.0 - inv_q * n + n_squared),
        }
    }

    /// Calculate coefficients for a second-order low-pass section
    #[must_use]
    pub fn low_pass(sample_rate: f64, freq: f64, q: f64) -> Self {
        let n = 1.0 / (PI * freq / sample_rate).tan();
        let n_squared = n * n;
        let inv_q = 1.0 / q;
        let c1 = 1.0 / (1.0 + inv_q * n + n_squared);

        Self {
            b0: c1,
            b1: 2.0 * c1,
            b2: c1,
            a1: c1 * 2.0 * (1.0 - n_squared),
            a2: c1 * (1.0 - inv_q * n + n_squared),
        }
    }

    /// True when every coefficient is a finite number
    pub fn is_finite(&self) -> bool {
        [self.b0, self.b1, self.b2, self.a1, self.a2]
            .iter()
            .all(|c| c.is_finite())
    }

    /// Linear magnitude of the transfer function at `freq`
    pub fn magnitude_at(&self, freq: f64, sample_rate: f64) -> f64 {
        let w = 2.0 * PI * freq / sample_rate;
        let z1 = Complex64::from_polar(1.0, -w);
        let z2 = z1 * z1;

        let numerator = self.b0 + z1 * self.b1 + z2 * self.b2;
        let denominator = 1.0 + z1 * self.a1 + z2 * self.a2;

        numerator.norm() / denominator.norm()
    }
}

// ============================================================================
// BIQUAD FILTER
// ============================================================================

/// Stateful biquad filter using Direct Form I
///
/// Direct Form I is chosen over Transposed Direct Form II for:
/// - Better numerical stability with low-frequency filters
/// - Coefficient swaps between blocks without transients from mixed state
#[derive(Debug, Clone, PartialEq)]
pub struct BiquadFilter {
    coeffs: BiquadCoeffs,
    // Previous input samples (x[n-1], x[n-2])
    x1: f64,
    x2: f64,
    // Previous output samples (y[n-1], y[n-2])
    y1: f64,
    y2: f64,
}

impl Default for BiquadFilter {
    fn default() -> Self {
        Self::new(BiquadCoeffs::default())
    }
}

impl BiquadFilter {
    /// Create a new biquad filter with given coefficients
    pub fn new(coeffs: BiquadCoeffs) -> Self {
        Self {
            coeffs,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        }
    }

    /// Replace the coefficients as one value; filter state is kept
    #[inline]
    pub fn set_coeffs(&mut self, coeffs: BiquadCoeffs) {
        self.coeffs = coeffs;
    }

    pub fn coeffs(&self) -> &BiquadCoeffs {
        &self.coeffs
    }

    /// Process a single sample
    #[inline]
    pub fn process_sample(&mut self, x: f32) -> f32 {
        let x = f64::from(x);
        let c = &self.coeffs;
        // Direct Form I: y[n] = b0*x[n] + b1*x[n-1] + b2*x[n-2]
        //                        - a1*y[n-1] - a2*y[n-2]
        let mut y = c.b0 * x + c.b1 * self.x1 + c.b2 * self.x2 - c.a1 * self.y1 - c.a2 * self.y2;
        if y.abs() < DENORMAL_FLOOR {
            y = 0.0;
        }

        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;

        y as f32
    }

    /// Process a buffer of samples in place
    pub fn process(&mut self, buffer: &mut [f32]) {
        for sample in buffer.iter_mut() {
            *sample = self.process_sample(*sample);
        }
    }

    /// Reset filter state
    pub fn reset(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.y1 = 0.0;
        self.y2 = 0.0;
    }
}

// ============================================================================
// COEFFICIENT FACTORY
// ============================================================================

/// Which cut filter a cascade implements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CutKind {
    /// Removes content below the cutoff (Butterworth high-pass)
    LowCut,
    /// Removes content above the cutoff (Butterworth low-pass)
    HighCut,
}

/// Second-order sections of one Butterworth cut filter
///
/// Fixed capacity of [`MAX_CUT_STAGES`]; `len` sections are meaningful.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CutCoefficients {
    sections: [BiquadCoeffs; MAX_CUT_STAGES],
    len: usize,
}

impl CutCoefficients {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, index: usize) -> Option<&BiquadCoeffs> {
        self.as_slice().get(index)
    }

    pub fn as_slice(&self) -> &[BiquadCoeffs] {
        &self.sections[..self.len]
    }

    pub fn iter(&self) -> impl Iterator<Item = &BiquadCoeffs> {
        self.as_slice().iter()
    }

    pub fn is_finite(&self) -> bool {
        self.iter().all(BiquadCoeffs::is_finite)
    }
}

/// Q of section `index` when a Butterworth filter of `order` is split into
/// second-order sections
pub fn butterworth_section_q(order: usize, index: usize) -> f64 {
    let order = order as f64;
    1.0 / (2.0 * ((2.0 * index as f64 + 1.0) * PI / (2.0 * order)).cos())
}

fn sanitize_frequency(freq_hz: f64, sample_rate: f64) -> f64 {
    debug_assert!(
        freq_hz > 0.0 && freq_hz < sample_rate * 0.5,
        "design frequency {freq_hz} Hz outside (0, {}) Hz",
        sample_rate * 0.5
    );
    let max = sample_rate * limits::MAX_FREQ_RATIO;
    if freq_hz.is_finite() {
        freq_hz.clamp(limits::MIN_FREQ_HZ, max)
    } else {
        max
    }
}

/// Design the peak (bell) filter from a snapshot
///
/// Gain is converted from decibels to a linear factor, `10^(dB/20)`.
pub fn design_peak(snapshot: &ParameterSnapshot, sample_rate: f64) -> BiquadCoeffs {
    debug_assert!(
        (limits::GAIN_DB_MIN..=limits::GAIN_DB_MAX).contains(&snapshot.peak_gain_db),
        "peak gain {} dB out of range",
        snapshot.peak_gain_db
    );
    debug_assert!(snapshot.peak_q > 0.0, "peak Q must be positive");

    let freq = sanitize_frequency(f64::from(snapshot.peak_freq_hz), sample_rate);
    let q = f64::from(snapshot.peak_q.clamp(limits::Q_MIN, limits::Q_MAX));
    let gain_db = f64::from(
        snapshot
            .peak_gain_db
            .clamp(limits::GAIN_DB_MIN, limits::GAIN_DB_MAX),
    );

    BiquadCoeffs::peaking(sample_rate, freq, q, db_to_gain(gain_db))
}

/// Design a Butterworth cut filter of `order` as `order / 2` sections
///
/// `order` must be 2, 4, 6 or 8 and `0 < cutoff_hz < sample_rate / 2`.
pub fn design_cut(kind: CutKind, cutoff_hz: f64, sample_rate: f64, order: usize) -> CutCoefficients {
    debug_assert!(
        order >= 2 && order <= 2 * MAX_CUT_STAGES && order % 2 == 0,
        "unsupported cut order {order}"
    );
    let cutoff = sanitize_frequency(cutoff_hz, sample_rate);
    let order = (order & !1).clamp(2, 2 * MAX_CUT_STAGES);

    let mut sections = [BiquadCoeffs::default(); MAX_CUT_STAGES];
    let len = order / 2;
    for (index, section) in sections.iter_mut().enumerate().take(len) {
        let q = butterworth_section_q(order, index);
        *section = match kind {
            CutKind::LowCut => BiquadCoeffs::high_pass(sample_rate, cutoff, q),
            CutKind::HighCut => BiquadCoeffs::low_pass(sample_rate, cutoff, q),
        };
    }

    CutCoefficients { sections, len }
}

/// Design the low-cut cascade from a snapshot
pub fn design_low_cut(snapshot: &ParameterSnapshot, sample_rate: f64) -> CutCoefficients {
    design_cut(
        CutKind::LowCut,
        f64::from(snapshot.low_cut_freq_hz),
        sample_rate,
        snapshot.low_cut_slope.order(),
    )
}

/// Design the high-cut cascade from a snapshot
pub fn design_high_cut(snapshot: &ParameterSnapshot, sample_rate: f64) -> CutCoefficients {
    design_cut(
        CutKind::HighCut,
        f64::from(snapshot.high_cut_freq_hz),
        sample_rate,
        snapshot.high_cut_slope.order(),
    )
}

/// Everything one mono chain needs, designed together so it can be
/// validated before any of it is installed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChainCoefficients {
    pub low_cut: CutCoefficients,
    pub low_cut_slope: Slope,
    pub peak: BiquadCoeffs,
    pub high_cut: CutCoefficients,
    pub high_cut_slope: Slope,
}

impl ChainCoefficients {
    pub fn design(snapshot: &ParameterSnapshot, sample_rate: f64) -> Self {
        Self {
            low_cut: design_low_cut(snapshot, sample_rate),
            low_cut_slope: snapshot.low_cut_slope,
            peak: design_peak(snapshot, sample_rate),
            high_cut: design_high_cut(snapshot, sample_rate),
            high_cut_slope: snapshot.high_cut_slope,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.low_cut.is_finite() && self.peak.is_finite() && self.high_cut.is_finite()
    }
}

/// Convert decibels to a linear gain factor
#[inline]
pub fn db_to_gain(db: f64) -> f64 {
    10.0_f64.powf(db / 20.0)
}

/// Convert a linear gain factor to decibels, floored at `floor_db`
#[inline]
pub fn gain_to_db(gain: f64, floor_db: f64) -> f64 {
    if gain > 0.0 {
        (20.0 * gain.log10()).max(floor_db)
    } else {
        floor_db
    }
}

// ============================================================================
// TESTS
// ============================================================================
