//! Equalizer engine: wires the shared state and runs the visualizer
//!
//! [`EqEngine`] builds everything one equalizer instance shares from an
//! [`EqConfig`] and hands out the two sides:
//! - the real-time [`EqProcessor`], tapped into the analyzer FIFO
//! - a [`VisualizerThread`] that refreshes the response and spectrum paths
//!   at the display rate and publishes them through a triple buffer
//!
//! Display consumers created here follow the processor's [`SessionRate`],
//! so preparing the processor at a new rate also reaches a running
//! visualizer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};
use triple_buffer::TripleBuffer;
use trieq_core::domain::audio::{AudioError, ProcessSpec};
use trieq_core::domain::chain::BypassState;
use trieq_core::domain::config::{ConfigError, EqConfig};
use trieq_core::domain::display::{DbRange, DisplayBounds, MagnitudePath};
use trieq_core::domain::params::ParameterStore;
use trieq_core::domain::processor::{EqProcessor, ProcessorStats};
use trieq_core::domain::response::ResponseCurve;
use trieq_core::domain::sync::{BypassSwitches, SessionRate};

use super::analyzer::{AnalyzerState, SpectrumAnalyzer};
use super::lockfree_buffer::{BlockFifo, FifoStats, SampleFifo};

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Processor has already been handed out")]
    ProcessorTaken,

    #[error("Failed to start visualizer thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Processor type produced by the engine
pub type TappedProcessor = EqProcessor<SampleFifo>;

/// Shared state of one equalizer instance
pub struct EqEngine {
    config: EqConfig,
    store: Arc<ParameterStore>,
    switches: Arc<BypassSwitches>,
    fifo: Arc<BlockFifo>,
    processor: Option<TappedProcessor>,
    processor_stats: Arc<ProcessorStats>,
    session: Arc<SessionRate>,
}

impl EqEngine {
    /// Validate `config` and build the store, switches, FIFO and processor
    pub fn new(config: EqConfig) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(ParameterStore::from_snapshot(&config.parameters));
        let switches = Arc::new(BypassSwitches::new());
        let fifo = Arc::new(BlockFifo::new(
            config.analyzer.fifo_capacity,
            config.analyzer.fifo_block_size,
        ));

        let processor = EqProcessor::new(
            store.clone(),
            switches.clone(),
            config.process_spec(),
            SampleFifo::new(fifo.clone()),
            config.engine.tap_channel,
        )?;
        let processor_stats = processor.stats();
        let session = processor.session_rate();

        info!(
            sample_rate = config.engine.sample_rate,
            fft_size = config.analyzer.fft_size.size(),
            fifo_capacity = fifo.capacity(),
            "Equalizer engine ready"
        );

        Ok(Self {
            config,
            store,
            switches,
            fifo,
            processor: Some(processor),
            processor_stats,
            session,
        })
    }

    pub fn config(&self) -> &EqConfig {
        &self.config
    }

    /// Parameter store shared by every consumer
    pub fn store(&self) -> &Arc<ParameterStore> {
        &self.store
    }

    pub fn switches(&self) -> &Arc<BypassSwitches> {
        &self.switches
    }

    pub fn fifo(&self) -> &Arc<BlockFifo> {
        &self.fifo
    }

    pub fn fifo_stats(&self) -> FifoStats {
        self.fifo.stats()
    }

    pub fn processor_stats(&self) -> &Arc<ProcessorStats> {
        &self.processor_stats
    }

    /// Sample rate of the current session
    pub fn sample_rate(&self) -> u32 {
        self.session.hz()
    }

    /// Shared session rate, updated whenever the processor is prepared
    pub fn session_rate(&self) -> &Arc<SessionRate> {
        &self.session
    }

    /// Start a new session on the processor still held by the engine
    ///
    /// Once the processor has been handed out, call
    /// [`EqProcessor::prepare`] on it instead; consumers follow either way.
    pub fn prepare(&mut self, spec: ProcessSpec) -> Result<()> {
        let processor = self.processor.as_mut().ok_or(EngineError::ProcessorTaken)?;
        processor.prepare(spec)?;
        self.config.engine.sample_rate = spec.sample_rate.hz();
        self.config.engine.max_block_size = spec.max_block_size;
        Ok(())
    }

    /// Hand the real-time processor to the audio side (once)
    pub fn take_processor(&mut self) -> Result<TappedProcessor> {
        self.processor.take().ok_or(EngineError::ProcessorTaken)
    }

    /// A new response-curve consumer with its own dirty flag
    pub fn response_curve(&self) -> ResponseCurve {
        let mut curve = ResponseCurve::new(
            self.store.clone(),
            self.switches.clone(),
            self.session.as_f64(),
            self.config.display_bounds(),
            self.config.response_range(),
        );
        curve.follow(self.session.clone());
        curve
    }

    /// The analyzer reading this engine's FIFO
    ///
    /// The FIFO has a single consumer; create one analyzer per engine.
    pub fn spectrum_analyzer(&self) -> SpectrumAnalyzer {
        let mut analyzer =
            SpectrumAnalyzer::new(self.fifo.clone(), &self.config.analyzer, self.session.as_f64());
        analyzer.follow(self.session.clone());
        analyzer
    }

    /// Start the display refresh loop on its own thread
    pub fn spawn_visualizer(&self) -> Result<VisualizerThread> {
        VisualizerThread::spawn(
            self.response_curve(),
            self.spectrum_analyzer(),
            VisualizerSettings {
                bounds: self.config.display_bounds(),
                analyzer_range: self.config.analyzer_range(),
                refresh_rate_hz: self.config.display.refresh_rate_hz,
            },
        )
    }
}

// ============================================================================
// VISUALIZER
// ============================================================================

/// Everything the renderer needs for one redraw
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisualFrame {
    /// Increments each time a new frame is published
    pub sequence: u64,
    pub response: MagnitudePath,
    pub spectrum: MagnitudePath,
    pub bypass: BypassState,
    pub spectrum_ready: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct VisualizerSettings {
    pub bounds: DisplayBounds,
    pub analyzer_range: DbRange,
    pub refresh_rate_hz: u32,
}

/// Produce the next frame if anything changed
///
/// Returns true when `frame` was updated.
pub fn refresh_frame(
    response: &mut ResponseCurve,
    analyzer: &mut SpectrumAnalyzer,
    settings: &VisualizerSettings,
    frame: &mut VisualFrame,
) -> bool {
    let response_changed = response.tick();
    let spectrum_changed = analyzer.tick(&settings.bounds, &settings.analyzer_range);

    if !(response_changed || spectrum_changed || frame.sequence == 0) {
        return false;
    }

    frame.sequence += 1;
    frame.response.clone_from(response.path());
    frame.spectrum.clone_from(analyzer.path());
    frame.bypass = response.bypass_state();
    frame.spectrum_ready = analyzer.state() != AnalyzerState::Accumulating;
    true
}

/// Display refresh loop running on a dedicated thread
///
/// Frames are read with [`latest`](Self::latest); the loop stops when the
/// handle is dropped or [`stop`](Self::stop) is called.
pub struct VisualizerThread {
    output: triple_buffer::Output<VisualFrame>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl VisualizerThread {
    pub fn spawn(
        mut response: ResponseCurve,
        mut analyzer: SpectrumAnalyzer,
        settings: VisualizerSettings,
    ) -> Result<Self> {
        let (mut input, output) = TripleBuffer::new(&VisualFrame::default()).split();
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();
        let period = Duration::from_secs_f64(1.0 / f64::from(settings.refresh_rate_hz.max(1)));

        let handle = thread::Builder::new()
            .name("trieq-visualizer".into())
            .spawn(move || {
                debug!(period_ms = period.as_millis() as u64, "Visualizer loop started");
                let mut frame = VisualFrame::default();

                while thread_running.load(Ordering::Acquire) {
                    let started = Instant::now();
                    if refresh_frame(&mut response, &mut analyzer, &settings, &mut frame) {
                        input.write(frame.clone());
                    }

                    let elapsed = started.elapsed();
                    if elapsed > period {
                        warn!(
                            elapsed_ms = elapsed.as_millis() as u64,
                            "Visualizer frame overran refresh period"
                        );
                    }
                    thread::sleep(period.saturating_sub(elapsed));
                }

                debug!(frames = frame.sequence, "Visualizer loop stopped");
            })?;

        info!(refresh_rate_hz = settings.refresh_rate_hz, "Visualizer started");

        Ok(Self {
            output,
            running,
            handle: Some(handle),
        })
    }

    /// Most recently published frame
    pub fn latest(&mut self) -> &VisualFrame {
        self.output.read()
    }

    /// True if a frame was published since the last [`latest`](Self::latest)
    pub fn has_new_frame(&self) -> bool {
        self.output.updated()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
            && self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the loop and wait for the thread to exit
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Visualizer thread panicked");
            }
        }
    }
}

impl Drop for VisualizerThread {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trieq_core::domain::chain::{ChainPosition, MonoChain};
    use trieq_core::domain::params::ParamId;
    use trieq_core::domain::response::chain_magnitude_at;

    fn test_config() -> EqConfig {
        let mut config = EqConfig::default();
        config.display.width = 200;
        config.display.height = 100;
        config.display.refresh_rate_hz = 120;
        config
    }

    #[test]
    fn test_engine_rejects_low_sample_rate() {
        let mut config = test_config();
        config.engine.sample_rate = 22050;
        assert!(matches!(EqEngine::new(config), Err(EngineError::Config(_))));
    }

    #[test]
    fn test_processor_handed_out_once() {
        let mut engine = EqEngine::new(test_config()).unwrap();
        assert!(engine.take_processor().is_ok());
        assert!(matches!(engine.take_processor(), Err(EngineError::ProcessorTaken)));
    }

    #[test]
    fn test_processor_feeds_analyzer() {
        let mut engine = EqEngine::new(test_config()).unwrap();
        let mut processor = engine.take_processor().unwrap();
        let mut analyzer = engine.spectrum_analyzer();

        let mut left = vec![0.5f32; 512];
        let mut right = vec![0.5f32; 512];
        for _ in 0..4 {
            processor.process_block(&mut left, &mut right).unwrap();
        }
        assert_eq!(engine.fifo().len(), 4);

        let bounds = engine.config().display_bounds();
        assert!(analyzer.tick(&bounds, &engine.config().analyzer_range()));
        assert_eq!(analyzer.path().len(), 200);
        assert_eq!(engine.processor_stats().blocks_processed(), 4);
    }

    #[test]
    fn test_session_rate_change_reaches_display_consumers() {
        let mut engine = EqEngine::new(test_config()).unwrap();
        let mut processor = engine.take_processor().unwrap();
        let mut response = engine.response_curve();
        let mut analyzer = engine.spectrum_analyzer();
        let bounds = engine.config().display_bounds();
        let range = engine.config().analyzer_range();
        assert!(response.tick());

        processor.prepare(ProcessSpec::new(96000, 512)).unwrap();
        assert_eq!(engine.sample_rate(), 96000);

        let tone: Vec<f32> = (0..512 * 16)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 1000.0 * i as f32 / 96000.0).sin())
            .collect();
        for block in tone.chunks(512) {
            let mut left = block.to_vec();
            let mut right = block.to_vec();
            processor.process_block(&mut left, &mut right).unwrap();
        }

        assert!(analyzer.tick(&bounds, &range));
        assert_eq!(analyzer.layout().sample_rate, 96000.0);
        let (peak_hz, _) = analyzer.peak().unwrap();
        assert!((peak_hz - 1000.0).abs() <= 96000.0 / 2048.0, "peak {peak_hz}");

        // Redesigned at 96 kHz without any parameter change
        assert!(response.tick());
        assert_eq!(response.sample_rate(), 96000.0);
        let mut expected = MonoChain::new();
        expected
            .update_from_snapshot(&engine.store().snapshot(), 96000.0)
            .unwrap();
        for freq in [20.0, 1000.0, 15000.0, 30000.0] {
            let got = chain_magnitude_at(response.chain(), freq, 96000.0);
            let want = chain_magnitude_at(&expected, freq, 96000.0);
            assert!((got - want).abs() < 1e-9, "{freq} Hz: {got} vs {want}");
        }
    }

    #[test]
    fn test_engine_prepare_requires_held_processor() {
        let mut engine = EqEngine::new(test_config()).unwrap();
        let mut analyzer = engine.spectrum_analyzer();

        engine.prepare(ProcessSpec::new(88200, 1024)).unwrap();
        assert_eq!(engine.sample_rate(), 88200);
        assert_eq!(engine.config().engine.sample_rate, 88200);
        assert_eq!(engine.config().engine.max_block_size, 1024);
        analyzer.tick(&engine.config().display_bounds(), &engine.config().analyzer_range());
        assert_eq!(analyzer.layout().sample_rate, 88200.0);

        assert!(matches!(
            engine.prepare(ProcessSpec::new(1000, 512)),
            Err(EngineError::Audio(_))
        ));
        assert_eq!(engine.sample_rate(), 88200);

        let processor = engine.take_processor().unwrap();
        assert_eq!(processor.spec().max_block_size, 1024);
        assert!(matches!(
            engine.prepare(ProcessSpec::new(48000, 512)),
            Err(EngineError::ProcessorTaken)
        ));
    }

    #[test]
    fn test_refresh_frame_tracks_changes() {
        let engine = EqEngine::new(test_config()).unwrap();
        let mut response = engine.response_curve();
        let mut analyzer = engine.spectrum_analyzer();
        let settings = VisualizerSettings {
            bounds: engine.config().display_bounds(),
            analyzer_range: engine.config().analyzer_range(),
            refresh_rate_hz: 60,
        };
        let mut frame = VisualFrame::default();

        assert!(refresh_frame(&mut response, &mut analyzer, &settings, &mut frame));
        assert_eq!(frame.sequence, 1);
        assert_eq!(frame.response.len(), 200);
        assert!(!frame.spectrum_ready);

        // Nothing changed
        assert!(!refresh_frame(&mut response, &mut analyzer, &settings, &mut frame));

        engine.switches().set(ChainPosition::Peak, true);
        assert!(refresh_frame(&mut response, &mut analyzer, &settings, &mut frame));
        assert!(frame.bypass.peak_bypassed);

        engine.store().set(ParamId::PeakGain, 6.0).unwrap();
        assert!(refresh_frame(&mut response, &mut analyzer, &settings, &mut frame));
        assert_eq!(frame.sequence, 3);
    }

    #[test]
    fn test_visualizer_publishes_and_stops() {
        let engine = EqEngine::new(test_config()).unwrap();
        let mut visualizer = engine.spawn_visualizer().unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while visualizer.latest().sequence == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(visualizer.latest().sequence >= 1);
        assert_eq!(visualizer.latest().response.len(), 200);
        assert!(visualizer.is_running());

        visualizer.stop();
        assert!(!visualizer.is_running());
    }
}
