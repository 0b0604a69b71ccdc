//! Domain entities and business rules

pub mod audio;
pub mod chain;
pub mod config;
pub mod display;
pub mod filter;
pub mod params;
pub mod processor;
pub mod response;
pub mod spectrum;
pub mod sync;

// Re-export specific items to avoid ambiguous glob imports
pub use audio::{
    AudioError, AudioTap, NullTap, ProcessSpec, PushOutcome, SampleRate, TapChannel,
    MIN_SAMPLE_RATE_HZ,
};
pub use chain::{
    update_cut_filter, BypassState, ChainPosition, CoefficientError, CutFilter, MonoChain,
};
pub use config::{
    AnalyzerConfig, ConfigError, ConfigManager, DisplayConfig, EngineConfig, EqConfig,
};
pub use display::{
    control_kind, ControlKind, DbRange, DisplayBounds, MagnitudePath, PathPoint,
};
pub use filter::{
    db_to_gain, design_cut, design_high_cut, design_low_cut, design_peak, gain_to_db,
    BiquadCoeffs, BiquadFilter, ChainCoefficients, CutCoefficients, CutKind, MAX_CUT_STAGES,
};
pub use params::{
    ListenerId, ParamId, ParamRange, ParameterError, ParameterListener, ParameterSnapshot,
    ParameterStore, Slope, PARAM_COUNT,
};
pub use processor::{Channel, EqProcessor, ProcessorStats};
pub use response::{chain_magnitude_at, response_curve, response_magnitudes_db, ResponseCurve};
pub use spectrum::{
    AnalyzerPathGenerator, BinLayout, FftOrder, SpectrumError, SpectrumSmoother, Window,
    WindowType,
};
pub use sync::{BypassSwitches, DirtyFlag, SessionRate};
