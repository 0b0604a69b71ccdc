//! FFT spectrum analyzer consuming the block FIFO
//!
//! Runs on the analysis (non real-time) thread. Each call to
//! [`SpectrumAnalyzer::tick`]:
//! 1. drains every block from the FIFO into the sliding window
//! 2. queues one magnitude frame per block once the window is full
//! 3. smooths each queued frame and turns it into a path
//! 4. keeps only the newest path for the renderer
//!
//! An analyzer that [`follow`](SpectrumAnalyzer::follow)s a [`SessionRate`]
//! restarts its history and bin layout when the processor is prepared at a
//! new rate.

use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, trace};
use trieq_core::domain::config::AnalyzerConfig;
use trieq_core::domain::display::{DbRange, DisplayBounds, MagnitudePath};
use trieq_core::domain::spectrum::{
    bin_frequency, compute_magnitudes_db, AnalyzerPathGenerator, BinLayout, SpectrumSmoother,
    Window,
};
use trieq_core::domain::sync::SessionRate;

use super::lockfree_buffer::BlockFifo;

/// Frames allowed to wait between FFT and path generation
const MAX_QUEUED_FRAMES: usize = 8;

/// Fixed-length window over the most recent samples
#[derive(Debug, Clone)]
pub struct SlidingAnalysisBuffer {
    samples: Vec<f32>,
    received: usize,
}

impl SlidingAnalysisBuffer {
    pub fn new(len: usize) -> Self {
        Self {
            samples: vec![0.0; len],
            received: 0,
        }
    }

    /// Shift out the oldest `block.len()` samples and append `block`
    pub fn push_block(&mut self, block: &[f32]) {
        let len = self.samples.len();
        if block.len() >= len {
            self.samples.copy_from_slice(&block[block.len() - len..]);
        } else {
            self.samples.copy_within(block.len().., 0);
            self.samples[len - block.len()..].copy_from_slice(block);
        }
        self.received = (self.received + block.len()).min(len);
    }

    /// True once a whole window of real samples has arrived
    pub fn is_full(&self) -> bool {
        self.received == self.samples.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn reset(&mut self) {
        self.samples.fill(0.0);
        self.received = 0;
    }
}

/// Where the analyzer is in its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyzerState {
    /// Fewer than a window of samples received
    Accumulating,
    /// Window full, frames being produced
    Ready,
    /// A path has been generated and can be drawn
    PathAvailable,
}

pub struct SpectrumAnalyzer {
    fifo: Arc<BlockFifo>,
    block: Vec<f32>,
    window_buffer: SlidingAnalysisBuffer,
    window: Window,
    fft: Arc<dyn Fft<f32>>,
    windowed: Vec<f32>,
    spectrum: Vec<Complex32>,
    scratch: Vec<Complex32>,
    frames: VecDeque<Vec<f32>>,
    spare_frames: Vec<Vec<f32>>,
    latest_frame: Vec<f32>,
    smoother: SpectrumSmoother,
    generator: AnalyzerPathGenerator,
    path: MagnitudePath,
    layout: BinLayout,
    session: Option<Arc<SessionRate>>,
    floor_db: f32,
    state: AnalyzerState,
}

impl SpectrumAnalyzer {
    pub fn new(fifo: Arc<BlockFifo>, config: &AnalyzerConfig, sample_rate: f64) -> Self {
        let size = config.fft_size.size();
        let bins = config.fft_size.bins();

        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(size);
        let scratch = vec![Complex32::new(0.0, 0.0); fft.get_inplace_scratch_len()];

        debug!(
            fft_size = size,
            window = config.window.name(),
            sample_rate,
            "Spectrum analyzer created"
        );

        Self {
            block: vec![0.0; fifo.block_size()],
            fifo,
            window_buffer: SlidingAnalysisBuffer::new(size),
            window: Window::new(config.window, size),
            fft,
            windowed: vec![0.0; size],
            spectrum: vec![Complex32::new(0.0, 0.0); size],
            scratch,
            frames: VecDeque::with_capacity(MAX_QUEUED_FRAMES),
            spare_frames: (0..MAX_QUEUED_FRAMES).map(|_| vec![config.floor_db; bins]).collect(),
            latest_frame: vec![config.floor_db; bins],
            smoother: SpectrumSmoother::new(
                bins,
                config.smoothing_attack,
                config.smoothing_release,
                config.floor_db,
            ),
            generator: AnalyzerPathGenerator::new(MAX_QUEUED_FRAMES),
            path: MagnitudePath::new(),
            layout: BinLayout {
                fft_size: size,
                sample_rate,
            },
            session: None,
            floor_db: config.floor_db,
            state: AnalyzerState::Accumulating,
        }
    }

    /// Drain the FIFO, analyze, and refresh the path
    ///
    /// Returns true if a new path is available.
    pub fn tick(&mut self, bounds: &DisplayBounds, range: &DbRange) -> bool {
        if let Some(hz) = self.session.as_ref().map(|session| session.as_f64()) {
            if hz != self.layout.sample_rate {
                debug!(sample_rate = hz, "Spectrum analyzer following new session");
                self.restart(hz);
            }
        }

        let mut blocks = 0;
        while self.fifo.pop_block(&mut self.block) {
            self.window_buffer.push_block(&self.block);
            blocks += 1;
            if self.window_buffer.is_full() {
                self.state = AnalyzerState::Ready;
                self.produce_frame();
            }
        }

        while let Some(mut frame) = self.frames.pop_front() {
            self.smoother.apply(&mut frame);
            self.generator.generate(&frame, &self.layout, bounds, range);
            std::mem::swap(&mut self.latest_frame, &mut frame);
            self.spare_frames.push(frame);
        }

        let updated = self.generator.take_latest(&mut self.path);
        if updated {
            self.state = AnalyzerState::PathAvailable;
        }
        trace!(blocks, updated, "Analyzer tick");
        updated
    }

    fn produce_frame(&mut self) {
        self.window.apply(self.window_buffer.as_slice(), &mut self.windowed);
        for (bin, sample) in self.spectrum.iter_mut().zip(&self.windowed) {
            *bin = Complex32::new(*sample, 0.0);
        }
        self.fft.process_with_scratch(&mut self.spectrum, &mut self.scratch);

        let mut frame = match self.spare_frames.pop() {
            Some(frame) => frame,
            None => match self.frames.pop_front() {
                Some(oldest) => oldest,
                None => vec![self.floor_db; self.layout.fft_size / 2],
            },
        };
        compute_magnitudes_db(
            &self.spectrum[..frame.len()],
            self.layout.fft_size,
            self.window.coherent_gain(),
            self.floor_db,
            &mut frame,
        );
        self.frames.push_back(frame);
    }

    /// Newest generated path (empty until the first full window)
    pub fn path(&self) -> &MagnitudePath {
        &self.path
    }

    /// Smoothed levels behind the newest path, one per bin
    pub fn latest_magnitudes(&self) -> &[f32] {
        &self.latest_frame
    }

    /// Frequency and level of the loudest bin in the newest frame
    pub fn peak(&self) -> Option<(f64, f32)> {
        self.latest_frame
            .iter()
            .enumerate()
            .skip(1)
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(bin, level)| {
                (
                    bin_frequency(bin, self.layout.fft_size, self.layout.sample_rate),
                    *level,
                )
            })
    }

    pub fn state(&self) -> AnalyzerState {
        self.state
    }

    pub fn layout(&self) -> BinLayout {
        self.layout
    }

    /// Track the processor's session rate from now on
    pub fn follow(&mut self, session: Arc<SessionRate>) {
        self.session = Some(session);
    }

    /// Forget all history, queued blocks included (new session)
    pub fn reset(&mut self, sample_rate: f64) {
        let mut scratch = vec![0.0; self.block.len()];
        while self.fifo.pop_block(&mut scratch) {}
        self.restart(sample_rate);
    }

    // Blocks still in the FIFO stay queued; any from the old session leave
    // the window once it refills.
    fn restart(&mut self, sample_rate: f64) {
        self.window_buffer.reset();
        self.frames.clear();
        self.smoother.reset(self.floor_db);
        self.latest_frame.fill(self.floor_db);
        self.path.clear();
        self.layout.sample_rate = sample_rate;
        self.state = AnalyzerState::Accumulating;
    }
}
