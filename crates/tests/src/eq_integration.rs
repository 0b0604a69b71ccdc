//! Integration tests for the equalizer pipeline
//!
//! These tests drive the public API across crates: parameters flow from the
//! store to the processor and the display consumers, audio flows from the
//! processor through the FIFO into the analyzer.

use approx::assert_relative_eq;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use trieq_core::domain::{
    chain_magnitude_at, design_peak, db_to_gain, update_cut_filter, BypassSwitches,
    ChainPosition, CutFilter, CutKind, DbRange, DirtyFlag, DisplayBounds, EqConfig,
    EqProcessor, MonoChain, NullTap, ParamId, ParameterSnapshot, ParameterStore, ProcessSpec,
    PushOutcome, ResponseCurve, Slope, TapChannel, MAX_CUT_STAGES,
};
use trieq_core::domain::filter::design_cut;
use trieq_infra::audio::{BlockFifo, EqEngine, SpectrumAnalyzer};

const SAMPLE_RATE: f64 = 48000.0;

fn generate_sine_wave(frequency: f32, sample_rate: u32, num_samples: usize, amplitude: f32) -> Vec<f32> {
    (0..num_samples)
        .map(|i| amplitude * (2.0 * std::f32::consts::PI * frequency * i as f32 / sample_rate as f32).sin())
        .collect()
}

fn rms(samples: &[f32]) -> f32 {
    (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
}

fn reference_snapshot() -> ParameterSnapshot {
    ParameterSnapshot::default()
        .with(ParamId::PeakFreq, 750.0)
        .with(ParamId::PeakGain, 6.0)
        .with(ParamId::PeakQuality, 1.0)
        .with(ParamId::LowCutFreq, 20.0)
        .with(ParamId::HighCutFreq, 20000.0)
}

fn response_db(chain: &MonoChain, freq: f64) -> f64 {
    20.0 * chain_magnitude_at(chain, freq, SAMPLE_RATE).log10()
}

// ============================================================================
// FILTER DESIGN
// ============================================================================

#[test]
fn test_peak_gain_at_centre_frequency() {
    for (freq, gain, q) in [(750.0, 6.0, 1.0), (100.0, -12.0, 0.5), (8000.0, 24.0, 4.0)] {
        let snapshot = ParameterSnapshot::default()
            .with(ParamId::PeakFreq, freq)
            .with(ParamId::PeakGain, gain)
            .with(ParamId::PeakQuality, q);
        let coeffs = design_peak(&snapshot, SAMPLE_RATE);

        let magnitude = coeffs.magnitude_at(f64::from(freq), SAMPLE_RATE);
        assert_relative_eq!(magnitude, db_to_gain(f64::from(gain)), epsilon = 1e-6);
    }
}

#[test]
fn test_every_slope_enables_slope_plus_one_stages() {
    let mut cascade = CutFilter::new();
    for slope in [Slope::Db48, Slope::Db12, Slope::Db36, Slope::Db24] {
        let coefficients = design_cut(CutKind::LowCut, 100.0, SAMPLE_RATE, slope.order());
        update_cut_filter(&mut cascade, &coefficients, slope);

        let enabled = slope.index() + 1;
        for stage in 0..MAX_CUT_STAGES {
            assert_eq!(cascade.is_bypassed(stage), stage >= enabled, "{slope:?} stage {stage}");
        }
        assert_eq!(cascade.active_stages(), enabled);
    }
}

// ============================================================================
// RESPONSE
// ============================================================================

#[test]
fn test_all_positions_bypassed_is_flat() {
    let mut chain = MonoChain::new();
    chain
        .update_from_snapshot(&reference_snapshot().with(ParamId::PeakGain, 24.0), SAMPLE_RATE)
        .unwrap();
    for position in ChainPosition::ALL {
        chain.set_bypassed(position, true);
    }

    for freq in [20.0, 100.0, 750.0, 5000.0, 20000.0] {
        assert_relative_eq!(response_db(&chain, freq), 0.0, epsilon = 1e-9);
    }
}

#[test]
fn test_reference_response() {
    let mut chain = MonoChain::new();
    chain.update_from_snapshot(&reference_snapshot(), SAMPLE_RATE).unwrap();

    assert_relative_eq!(response_db(&chain, 750.0), 6.0, epsilon = 0.05);
    // A Butterworth cut is -3.01 dB at its own cutoff, so the 20 Hz and
    // 20 kHz corners lose that much; the bell adds only a few mdB there
    assert_relative_eq!(response_db(&chain, 20.0), -3.01, epsilon = 0.01);
    assert_relative_eq!(response_db(&chain, 20000.0), -3.01, epsilon = 0.01);
    // Well inside the passband and away from the bell
    assert!(response_db(&chain, 40.0).abs() < 0.5);
    assert!(response_db(&chain, 10000.0).abs() < 0.5);
}

#[test]
fn test_high_cut_attenuates_highs_not_lows() {
    let snapshot = ParameterSnapshot::default()
        .with(ParamId::HighCutFreq, 1000.0)
        .with(ParamId::HighCutSlope, 3.0);
    let mut chain = MonoChain::new();
    chain.update_from_snapshot(&snapshot, SAMPLE_RATE).unwrap();

    assert!(response_db(&chain, 100.0).abs() < 0.5);
    assert!(response_db(&chain, 4000.0) < -40.0);
}

// ============================================================================
// UPDATE PROTOCOL
// ============================================================================

#[test]
fn test_independent_consumers_each_see_one_change() {
    let store = Arc::new(ParameterStore::new());
    let audio = Arc::new(DirtyFlag::new());
    let display = Arc::new(DirtyFlag::new());
    store.add_listener(audio.clone());
    store.add_listener(display.clone());

    store.set(ParamId::PeakGain, 3.0).unwrap();

    assert!(audio.take());
    assert!(!audio.take());
    // The audio side consuming its flag leaves the display's intact
    assert!(display.take());
    assert!(!display.take());
}

#[test]
fn test_processor_and_response_curve_agree() {
    let store = Arc::new(ParameterStore::from_snapshot(&reference_snapshot()));
    let switches = Arc::new(BypassSwitches::new());
    let mut processor = EqProcessor::new(
        store.clone(),
        switches.clone(),
        ProcessSpec::new(48000, 4096),
        NullTap,
        TapChannel::Left,
    )
    .unwrap();
    let mut curve = ResponseCurve::new(
        store.clone(),
        switches.clone(),
        SAMPLE_RATE,
        DisplayBounds::sized(300.0, 100.0),
        DbRange::RESPONSE,
    );

    store.set(ParamId::PeakGain, 12.0).unwrap();
    assert!(curve.tick());

    // Settle the filters on the first half, measure the second
    let input = generate_sine_wave(750.0, 48000, 8192, 0.1);
    let mut left = input.clone();
    let mut right = input.clone();
    let (settle_left, measure_left) = left.split_at_mut(4096);
    let (settle_right, measure_right) = right.split_at_mut(4096);
    processor.process_block(settle_left, settle_right).unwrap();
    processor.process_block(measure_left, measure_right).unwrap();

    let measured_db = 20.0 * (rms(measure_left) / rms(&input[4096..])).log10();
    let analytic_db = response_db(curve.chain(), 750.0);
    assert!((f64::from(measured_db) - analytic_db).abs() < 0.3, "{measured_db} vs {analytic_db}");
    assert_eq!(processor.bypass_state(), curve.bypass_state());
}

#[test]
fn test_parameter_changes_while_processing() {
    let store = Arc::new(ParameterStore::new());
    let switches = Arc::new(BypassSwitches::new());
    let mut processor = EqProcessor::new(
        store.clone(),
        switches.clone(),
        ProcessSpec::new(48000, 256),
        NullTap,
        TapChannel::Mid,
    )
    .unwrap();
    let stats = processor.stats();
    let running = Arc::new(AtomicBool::new(true));

    let audio_running = running.clone();
    let audio = thread::spawn(move || {
        let mut left = vec![0.0f32; 256];
        let mut right = vec![0.0f32; 256];
        while audio_running.load(Ordering::Acquire) {
            left.fill(0.25);
            right.fill(-0.25);
            processor.process_block(&mut left, &mut right).unwrap();
            assert!(left.iter().chain(&right).all(|s| s.is_finite()));
        }
        processor
    });

    for step in 0..200 {
        let gain = (step % 49) as f32 - 24.0;
        store.set(ParamId::PeakGain, gain).unwrap();
        store.set(ParamId::LowCutSlope, (step % 4) as f32).unwrap();
        switches.set(ChainPosition::HighCut, step % 2 == 0);
        thread::sleep(Duration::from_micros(200));
    }
    running.store(false, Ordering::Release);
    let mut processor = audio.join().unwrap();

    // One last block picks up whatever is still pending
    let mut left = vec![0.0f32; 16];
    let mut right = vec![0.0f32; 16];
    processor.process_block(&mut left, &mut right).unwrap();

    let state = processor.bypass_state();
    assert!(!state.high_cut_bypassed);
    assert_eq!(state.low_cut_active_stages, Slope::from_value(store.get(ParamId::LowCutSlope)).active_stages());
    assert!(stats.coefficient_updates() >= 1);
    assert_eq!(stats.rejected_updates(), 0);
}

// ============================================================================
// FIFO AND ANALYZER
// ============================================================================

#[test]
fn test_fifo_bounded_without_consumer() {
    let fifo = BlockFifo::new(30, 128);
    let block = vec![0.5f32; 128];

    for i in 0..100 {
        let outcome = fifo.push_block(&block);
        if i < 30 {
            assert_eq!(outcome, PushOutcome::Stored);
        } else {
            assert_eq!(outcome, PushOutcome::DisplacedOldest);
        }
        assert!(fifo.len() <= 30);
    }
    assert_eq!(fifo.len(), 30);
}

#[test]
fn test_silence_through_pipeline_reads_at_floor() {
    let mut engine = EqEngine::new(EqConfig::default()).unwrap();
    let mut processor = engine.take_processor().unwrap();
    let mut analyzer = engine.spectrum_analyzer();
    let bounds = DisplayBounds::sized(400.0, 200.0);

    let mut left = vec![0.0f32; 512];
    let mut right = vec![0.0f32; 512];
    for _ in 0..engine.config().analyzer.fft_size.size() / 512 {
        processor.process_block(&mut left, &mut right).unwrap();
    }
    assert!(analyzer.tick(&bounds, &DbRange::ANALYZER));

    assert!(analyzer.latest_magnitudes().iter().all(|db| *db <= -48.0));
    // Every vertex on the bottom edge
    assert!(analyzer.path().points().iter().all(|p| p.y == bounds.bottom()));
}

#[test]
fn test_analyzer_sees_eq_boost() {
    let tone = 1500.0f32; // bin 64 of a 2048-point FFT at 48 kHz
    let measure = |gain_db: f32| {
        let mut config = EqConfig::default();
        config.analyzer.smoothing_attack = 1.0;
        config.analyzer.smoothing_release = 1.0;
        config.parameters = config
            .parameters
            .with(ParamId::PeakFreq, tone)
            .with(ParamId::PeakGain, gain_db);

        let mut engine = EqEngine::new(config).unwrap();
        let mut processor = engine.take_processor().unwrap();
        let mut analyzer: SpectrumAnalyzer = engine.spectrum_analyzer();
        let bounds = engine.config().display_bounds();

        let signal = generate_sine_wave(tone, 48000, 512 * 40, 0.1);
        for chunk in signal.chunks(512) {
            let mut left = chunk.to_vec();
            let mut right = chunk.to_vec();
            processor.process_block(&mut left, &mut right).unwrap();
            analyzer.tick(&bounds, &DbRange::ANALYZER);
        }
        analyzer.peak().unwrap()
    };

    let (flat_hz, flat_db) = measure(0.0);
    let (boost_hz, boost_db) = measure(12.0);
    assert!((flat_hz - 1500.0).abs() < 1.0);
    assert!((boost_hz - 1500.0).abs() < 1.0);
    assert!((flat_db + 20.0).abs() < 0.5, "{flat_db}");
    assert!((boost_db - flat_db - 12.0).abs() < 0.5, "{flat_db} -> {boost_db}");
}

// ============================================================================
// VISUALIZER
// ============================================================================

#[test]
fn test_visualizer_follows_parameters_and_audio() {
    let mut config = EqConfig::default();
    config.display.width = 120;
    config.display.height = 60;
    config.display.refresh_rate_hz = 200;

    let mut engine = EqEngine::new(config).unwrap();
    let mut processor = engine.take_processor().unwrap();
    let mut visualizer = engine.spawn_visualizer().unwrap();

    let signal = generate_sine_wave(1000.0, 48000, 512 * 8, 0.5);
    for chunk in signal.chunks(512) {
        let mut left = chunk.to_vec();
        let mut right = chunk.to_vec();
        processor.process_block(&mut left, &mut right).unwrap();
    }
    engine.switches().set(ChainPosition::LowCut, true);

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let frame = visualizer.latest();
        if (frame.spectrum_ready && frame.bypass.low_cut_bypassed) || Instant::now() > deadline {
            break;
        }
        thread::sleep(Duration::from_millis(5));
    }

    let frame = visualizer.latest().clone();
    assert!(frame.spectrum_ready);
    assert!(frame.bypass.low_cut_bypassed);
    assert_eq!(frame.response.len(), 120);
    assert_eq!(frame.spectrum.len(), 120);
    visualizer.stop();
}
