//! Processing-session abstractions and domain errors
//!
//! This module defines the types shared by every stage of the equalizer:
//! the session description handed to `prepare`, the channel selection for
//! the analysis tap, and the [`AudioTap`] seam through which the audio
//! thread hands processed blocks to the analysis side. Lock-free
//! implementations of the tap live in the `infra` crate.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur in the processing subsystem
#[derive(Debug, Error)]
pub enum AudioError {
    /// Session description is unusable (zero sample rate, zero block size...)
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A block larger than the prepared maximum was handed to the processor
    #[error("Block of {len} frames exceeds prepared maximum of {max}")]
    BlockTooLarge { len: usize, max: usize },

    /// Left and right buffers of a block differ in length
    #[error("Channel length mismatch: left={left}, right={right}")]
    ChannelMismatch { left: usize, right: usize },

    /// Interleaved stereo block with an unpaired sample
    #[error("Interleaved stereo block has odd length {len}")]
    OddInterleavedLength { len: usize },
}

pub type Result<T> = std::result::Result<T, AudioError>;

/// Sample rates must exceed this so every catalog frequency (up to 20 kHz)
/// stays below Nyquist
pub const MIN_SAMPLE_RATE_HZ: u32 = 40_000;

/// Audio sample rate in Hz
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleRate {
    Hz44100,
    Hz48000,
    Hz88200,
    Hz96000,
    Custom(u32),
}

impl SampleRate {
    pub fn hz(&self) -> u32 {
        match self {
            SampleRate::Hz44100 => 44100,
            SampleRate::Hz48000 => 48000,
            SampleRate::Hz88200 => 88200,
            SampleRate::Hz96000 => 96000,
            SampleRate::Custom(hz) => *hz,
        }
    }

    pub fn from_hz(hz: u32) -> Self {
        match hz {
            44100 => SampleRate::Hz44100,
            48000 => SampleRate::Hz48000,
            88200 => SampleRate::Hz88200,
            96000 => SampleRate::Hz96000,
            hz => SampleRate::Custom(hz),
        }
    }

    /// Sample rate as used by the coefficient maths
    pub fn as_f64(&self) -> f64 {
        f64::from(self.hz())
    }

    /// Highest representable frequency
    pub fn nyquist(&self) -> f64 {
        self.as_f64() * 0.5
    }
}

/// Description of one processing session
///
/// The sample rate may only change between sessions, i.e. through a new
/// call to `prepare`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProcessSpec {
    pub sample_rate: SampleRate,
    /// Largest block (in frames per channel) the host will deliver
    pub max_block_size: usize,
}

impl Default for ProcessSpec {
    fn default() -> Self {
        Self {
            sample_rate: SampleRate::Hz48000,
            max_block_size: 512,
        }
    }
}

impl ProcessSpec {
    pub fn new(sample_rate: u32, max_block_size: usize) -> Self {
        Self {
            sample_rate: SampleRate::from_hz(sample_rate),
            max_block_size,
        }
    }

    /// Reject sessions the processor cannot run
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate.hz() <= MIN_SAMPLE_RATE_HZ {
            return Err(AudioError::InvalidConfiguration(format!(
                "sample rate must exceed {} Hz, got {}",
                MIN_SAMPLE_RATE_HZ,
                self.sample_rate.hz()
            )));
        }
        if self.max_block_size == 0 {
            return Err(AudioError::InvalidConfiguration(
                "max block size must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Which signal the analysis tap observes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TapChannel {
    #[default]
    Left,
    Right,
    /// Average of left and right
    Mid,
}

/// Outcome of handing one block to the analysis FIFO
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Block stored, nothing lost
    Stored,
    /// FIFO was full; the oldest unread block was dropped to make room
    DisplacedOldest,
    /// No free slot at this instant; the block was not stored
    Rejected,
}

/// Receiver of processed audio on the real-time thread
///
/// Implementations must not block, lock or allocate.
pub trait AudioTap: Send {
    /// Hand over processed mono samples of any length
    fn push_samples(&mut self, samples: &[f32]);
}

/// Tap that discards everything, for sessions without a visualizer
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTap;

impl AudioTap for NullTap {
    fn push_samples(&mut self, _samples: &[f32]) {}
}
