//! Threaded side of the equalizer
//!
//! - `lockfree_buffer`: block FIFO from the audio thread to the analyzer
//! - `analyzer`: FFT spectrum analysis on the FIFO's consumer side
//! - `engine`: wiring from configuration, plus the visualizer thread

pub mod analyzer;
pub mod engine;
pub mod lockfree_buffer;

pub use analyzer::{AnalyzerState, SlidingAnalysisBuffer, SpectrumAnalyzer};
pub use engine::{
    refresh_frame, EngineError, EqEngine, TappedProcessor, VisualFrame, VisualizerSettings,
    VisualizerThread,
};
pub use lockfree_buffer::{BlockFifo, FifoStats, SampleFifo};
