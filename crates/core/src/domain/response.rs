//! Analytic magnitude response of the filter chain
//!
//! The curve is evaluated from the coefficients actually installed in a
//! [`MonoChain`], so what the display draws is what the audio thread runs
//! (given both consumers synced to the same snapshot).

use super::chain::{BypassState, ChainPosition, MonoChain};
use super::display::{column_frequency, DbRange, DisplayBounds, MagnitudePath};
use super::filter::gain_to_db;
use super::params::{ListenerId, ParameterStore};
use super::sync::{BypassSwitches, DirtyFlag, SessionRate};
use std::sync::Arc;
use tracing::{debug, warn};

/// Lowest level the response can report, far below any drawable range
pub const RESPONSE_FLOOR_DB: f64 = -200.0;

/// Linear magnitude of the whole chain at `freq`
///
/// Bypassed positions and bypassed cut stages contribute a factor of 1.
pub fn chain_magnitude_at(chain: &MonoChain, freq: f64, sample_rate: f64) -> f64 {
    let mut magnitude = 1.0;

    if !chain.is_bypassed(ChainPosition::LowCut) {
        for coeffs in chain.low_cut().enabled_coefficients() {
            magnitude *= coeffs.magnitude_at(freq, sample_rate);
        }
    }
    if !chain.is_bypassed(ChainPosition::Peak) {
        magnitude *= chain.peak().coeffs().magnitude_at(freq, sample_rate);
    }
    if !chain.is_bypassed(ChainPosition::HighCut) {
        for coeffs in chain.high_cut().enabled_coefficients() {
            magnitude *= coeffs.magnitude_at(freq, sample_rate);
        }
    }

    magnitude
}

/// Chain response in dB for each of `width` log-spaced columns
pub fn response_magnitudes_db(chain: &MonoChain, sample_rate: f64, width: usize, out: &mut Vec<f64>) {
    out.clear();
    out.extend((0..width).map(|column| {
        let freq = column_frequency(column, width);
        gain_to_db(chain_magnitude_at(chain, freq, sample_rate), RESPONSE_FLOOR_DB)
    }));
}

/// Response curve as a path, one vertex per column of `bounds`
pub fn response_curve(
    chain: &MonoChain,
    sample_rate: f64,
    bounds: &DisplayBounds,
    range: &DbRange,
) -> MagnitudePath {
    let mut levels = Vec::with_capacity(bounds.columns());
    response_magnitudes_db(chain, sample_rate, bounds.columns(), &mut levels);

    let mut path = MagnitudePath::with_capacity(levels.len());
    path.rebuild(&levels, bounds, range);
    path
}

/// Display-side consumer of parameter changes
///
/// Owns a private chain mirror and its own [`DirtyFlag`], so it never
/// competes with the audio processor for a change notification. Call
/// [`tick`](Self::tick) at the refresh rate.
pub struct ResponseCurve {
    store: Arc<ParameterStore>,
    dirty: Arc<DirtyFlag>,
    listener: ListenerId,
    switches: Arc<BypassSwitches>,
    chain: MonoChain,
    sample_rate: f64,
    session: Option<Arc<SessionRate>>,
    bounds: DisplayBounds,
    range: DbRange,
    levels_db: Vec<f64>,
    path: MagnitudePath,
    rejected_updates: u64,
}

impl ResponseCurve {
    pub fn new(
        store: Arc<ParameterStore>,
        switches: Arc<BypassSwitches>,
        sample_rate: f64,
        bounds: DisplayBounds,
        range: DbRange,
    ) -> Self {
        // Starts dirty so the first tick designs the chain
        let dirty = Arc::new(DirtyFlag::dirty());
        let listener = store.add_listener(dirty.clone());

        Self {
            store,
            dirty,
            listener,
            switches,
            chain: MonoChain::new(),
            sample_rate,
            session: None,
            bounds,
            range,
            levels_db: Vec::with_capacity(bounds.columns()),
            path: MagnitudePath::with_capacity(bounds.columns()),
            rejected_updates: 0,
        }
    }

    /// Resync with the store; returns true if the path was recomputed
    pub fn tick(&mut self) -> bool {
        if let Some(hz) = self.session.as_ref().map(|session| session.as_f64()) {
            if hz != self.sample_rate {
                debug!(sample_rate = hz, "Response curve following new session");
                self.set_sample_rate(hz);
            }
        }

        let bypass_changed = self.chain.sync_bypass(&self.switches);
        let params_changed = self.dirty.take();

        if params_changed {
            let snapshot = self.store.snapshot();
            if let Err(e) = self.chain.update_from_snapshot(&snapshot, self.sample_rate) {
                self.rejected_updates += 1;
                warn!("Response curve update rejected: {}", e);
            }
        }

        if params_changed || bypass_changed {
            self.recompute();
            true
        } else {
            false
        }
    }

    /// Resize the plot; the path is rebuilt immediately
    pub fn set_bounds(&mut self, bounds: DisplayBounds) {
        self.bounds = bounds;
        self.recompute();
    }

    /// New session sample rate; the chain is redesigned on the next tick
    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
        self.dirty.mark();
    }

    /// Track the processor's session rate from now on
    pub fn follow(&mut self, session: Arc<SessionRate>) {
        self.session = Some(session);
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn path(&self) -> &MagnitudePath {
        &self.path
    }

    /// Per-column levels behind the current path
    pub fn levels_db(&self) -> &[f64] {
        &self.levels_db
    }

    pub fn chain(&self) -> &MonoChain {
        &self.chain
    }

    pub fn bypass_state(&self) -> BypassState {
        self.chain.bypass_state()
    }

    pub fn rejected_updates(&self) -> u64 {
        self.rejected_updates
    }

    fn recompute(&mut self) {
        response_magnitudes_db(
            &self.chain,
            self.sample_rate,
            self.bounds.columns(),
            &mut self.levels_db,
        );
        self.path.rebuild(&self.levels_db, &self.bounds, &self.range);
        debug!(columns = self.levels_db.len(), "Response curve recomputed");
    }
}

impl Drop for ResponseCurve {
    fn drop(&mut self) {
        self.store.remove_listener(self.listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::params::{ParamId, ParameterSnapshot};
    use approx::assert_relative_eq;

    const SAMPLE_RATE: f64 = 48000.0;

    fn reference_chain() -> MonoChain {
        let snapshot = ParameterSnapshot::default()
            .with(ParamId::PeakFreq, 750.0)
            .with(ParamId::PeakGain, 6.0)
            .with(ParamId::PeakQuality, 1.0)
            .with(ParamId::LowCutFreq, 20.0)
            .with(ParamId::HighCutFreq, 20000.0);
        let mut chain = MonoChain::new();
        chain.update_from_snapshot(&snapshot, SAMPLE_RATE).unwrap();
        chain
    }

    fn level_db(chain: &MonoChain, freq: f64) -> f64 {
        gain_to_db(chain_magnitude_at(chain, freq, SAMPLE_RATE), RESPONSE_FLOOR_DB)
    }

    #[test]
    fn test_all_bypassed_is_flat() {
        let mut chain = reference_chain();
        for position in ChainPosition::ALL {
            chain.set_bypassed(position, true);
        }
        let mut levels = Vec::new();
        response_magnitudes_db(&chain, SAMPLE_RATE, 256, &mut levels);
        assert_eq!(levels.len(), 256);
        assert!(levels.iter().all(|db| *db == 0.0));
    }

    #[test]
    fn test_reference_settings() {
        let chain = reference_chain();

        assert!((level_db(&chain, 750.0) - 6.0).abs() < 0.1);

        // Band edges sit on the cut corners
        for edge in [20.0, 20000.0] {
            let db = level_db(&chain, edge);
            assert!(db < 0.5 && db > -3.5, "{edge} Hz: {db} dB");
        }
        // Well inside the passband the cuts are transparent
        for inside in [40.0, 10000.0] {
            let peak_only = gain_to_db(
                chain.peak().coeffs().magnitude_at(inside, SAMPLE_RATE),
                RESPONSE_FLOOR_DB,
            );
            assert!((level_db(&chain, inside) - peak_only).abs() < 0.5);
        }
    }

    #[test]
    fn test_bypassed_cut_stage_contributes_unity() {
        let mut chain = reference_chain();
        chain.set_bypassed(ChainPosition::Peak, true);
        chain.set_bypassed(ChainPosition::HighCut, true);
        let with_low_cut = chain_magnitude_at(&chain, 20.0, SAMPLE_RATE);
        assert_relative_eq!(with_low_cut, std::f64::consts::FRAC_1_SQRT_2, epsilon = 1e-6);

        chain.low_cut_mut().set_bypassed(0, true);
        assert_eq!(chain_magnitude_at(&chain, 20.0, SAMPLE_RATE), 1.0);
    }

    #[test]
    fn test_response_curve_path_width() {
        let chain = reference_chain();
        let bounds = DisplayBounds::sized(600.0, 132.0);
        let path = response_curve(&chain, SAMPLE_RATE, &bounds, &DbRange::RESPONSE);
        assert_eq!(path.len(), 600);
        // +6 dB bell pulls the middle of the curve above the 0 dB line
        let zero_line = DbRange::RESPONSE.map_to_y(0.0, &bounds);
        assert!(path.points().iter().any(|p| p.y < zero_line));
    }

    #[test]
    fn test_response_curve_consumer_tracks_store() {
        let store = Arc::new(ParameterStore::new());
        let switches = Arc::new(BypassSwitches::new());
        let mut curve = ResponseCurve::new(
            store.clone(),
            switches.clone(),
            SAMPLE_RATE,
            DisplayBounds::sized(300.0, 100.0),
            DbRange::RESPONSE,
        );

        assert!(curve.tick());
        assert!(!curve.tick());
        assert_eq!(curve.path().len(), 300);

        store.set(ParamId::PeakGain, 12.0).unwrap();
        assert!(curve.tick());
        let max = curve.levels_db().iter().cloned().fold(f64::MIN, f64::max);
        assert!((max - 12.0).abs() < 0.2, "max {max}");

        switches.set(ChainPosition::Peak, true);
        assert!(curve.tick());
        assert!(curve.bypass_state().peak_bypassed);
        assert_eq!(curve.rejected_updates(), 0);
    }

    #[test]
    fn test_response_curve_follows_session_rate() {
        let store = Arc::new(ParameterStore::from_snapshot(
            &ParameterSnapshot::default().with(ParamId::HighCutFreq, 18000.0),
        ));
        let session = Arc::new(SessionRate::new(48000));
        let bounds = DisplayBounds::sized(200.0, 100.0);
        let mut curve = ResponseCurve::new(
            store.clone(),
            Arc::new(BypassSwitches::new()),
            SAMPLE_RATE,
            bounds,
            DbRange::RESPONSE,
        );
        curve.follow(session.clone());
        assert!(curve.tick());
        assert!(!curve.tick());

        session.set(96000);
        assert!(curve.tick());
        assert_relative_eq!(curve.sample_rate(), 96000.0);

        let mut expected_chain = MonoChain::new();
        expected_chain
            .update_from_snapshot(&store.snapshot(), 96000.0)
            .unwrap();
        let mut expected = Vec::new();
        response_magnitudes_db(&expected_chain, 96000.0, bounds.columns(), &mut expected);
        assert_eq!(curve.levels_db().len(), expected.len());
        for (got, want) in curve.levels_db().iter().zip(expected.iter()) {
            assert_relative_eq!(got, want, epsilon = 1e-9);
        }

        // Nothing further to do until the session or parameters change again
        assert!(!curve.tick());
    }

    #[test]
    fn test_response_curve_unregisters_on_drop() {
        let store = Arc::new(ParameterStore::new());
        let curve = ResponseCurve::new(
            store.clone(),
            Arc::new(BypassSwitches::new()),
            SAMPLE_RATE,
            DisplayBounds::sized(10.0, 10.0),
            DbRange::RESPONSE,
        );
        assert_eq!(store.listener_count(), 1);
        drop(curve);
        assert_eq!(store.listener_count(), 0);
    }
}
