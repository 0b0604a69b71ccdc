//! Stereo equalizer processor (the real-time consumer)
//!
//! Owns one [`MonoChain`] per channel and syncs them with the parameter
//! store at the top of each block:
//! 1. `take()` the processor's own dirty flag
//! 2. on success, snapshot the store, design once, install into both chains
//! 3. copy the shared position bypass switches
//! 4. filter left and right, then hand the selected channel to the tap
//!
//! Nothing on this path locks, allocates or logs. Events the control side
//! wants to report are counted in [`ProcessorStats`].

use super::audio::{AudioError, AudioTap, NullTap, ProcessSpec, Result, TapChannel};
use super::chain::{BypassState, MonoChain};
use super::filter::ChainCoefficients;
use super::params::{ListenerId, ParameterStore};
use super::sync::{BypassSwitches, DirtyFlag, SessionRate};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

/// Counters written by the audio thread, readable from anywhere
#[derive(Debug, Default)]
pub struct ProcessorStats {
    blocks_processed: AtomicU64,
    coefficient_updates: AtomicU64,
    rejected_updates: AtomicU64,
}

impl ProcessorStats {
    pub fn blocks_processed(&self) -> u64 {
        self.blocks_processed.load(Ordering::Relaxed)
    }

    /// Snapshots successfully installed
    pub fn coefficient_updates(&self) -> u64 {
        self.coefficient_updates.load(Ordering::Relaxed)
    }

    /// Designs discarded because they were not finite
    pub fn rejected_updates(&self) -> u64 {
        self.rejected_updates.load(Ordering::Relaxed)
    }
}

/// Channel of a stereo processor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Left,
    Right,
}

pub struct EqProcessor<T: AudioTap = NullTap> {
    store: Arc<ParameterStore>,
    dirty: Arc<DirtyFlag>,
    listener: ListenerId,
    switches: Arc<BypassSwitches>,
    session: Arc<SessionRate>,
    left: MonoChain,
    right: MonoChain,
    spec: ProcessSpec,
    tap: T,
    tap_channel: TapChannel,
    scratch_left: Vec<f32>,
    scratch_right: Vec<f32>,
    scratch_mid: Vec<f32>,
    stats: Arc<ProcessorStats>,
}

impl<T: AudioTap> EqProcessor<T> {
    /// Create a processor prepared for `spec`
    pub fn new(
        store: Arc<ParameterStore>,
        switches: Arc<BypassSwitches>,
        spec: ProcessSpec,
        tap: T,
        tap_channel: TapChannel,
    ) -> Result<Self> {
        spec.validate()?;

        // Starts dirty so the first block designs the chains
        let dirty = Arc::new(DirtyFlag::dirty());
        let listener = store.add_listener(dirty.clone());

        info!(
            sample_rate = spec.sample_rate.hz(),
            max_block_size = spec.max_block_size,
            tap = ?tap_channel,
            "Equalizer processor created"
        );

        Ok(Self {
            store,
            dirty,
            listener,
            switches,
            session: Arc::new(SessionRate::new(spec.sample_rate.hz())),
            left: MonoChain::new(),
            right: MonoChain::new(),
            spec,
            tap,
            tap_channel,
            scratch_left: vec![0.0; spec.max_block_size],
            scratch_right: vec![0.0; spec.max_block_size],
            scratch_mid: vec![0.0; spec.max_block_size],
            stats: Arc::new(ProcessorStats::default()),
        })
    }

    /// Start a new session (not real-time safe)
    ///
    /// Clears filter memory, resizes scratch space and forces a redesign at
    /// the new sample rate on the next block. The rate is published through
    /// [`session_rate`](Self::session_rate) for the display consumers.
    pub fn prepare(&mut self, spec: ProcessSpec) -> Result<()> {
        spec.validate()?;
        self.spec = spec;
        self.scratch_left.resize(spec.max_block_size, 0.0);
        self.scratch_right.resize(spec.max_block_size, 0.0);
        self.scratch_mid.resize(spec.max_block_size, 0.0);
        self.left.reset();
        self.right.reset();
        self.dirty.mark();
        self.session.set(spec.sample_rate.hz());
        info!(
            sample_rate = spec.sample_rate.hz(),
            max_block_size = spec.max_block_size,
            "Equalizer processor prepared"
        );
        Ok(())
    }

    /// Pull pending parameter changes into both chains
    ///
    /// Returns true if new coefficients were installed. At most one update
    /// happens per call.
    pub fn sync_coefficients(&mut self) -> bool {
        self.left.sync_bypass(&self.switches);
        self.right.sync_bypass(&self.switches);

        if !self.dirty.take() {
            return false;
        }

        let snapshot = self.store.snapshot();
        let coefficients = ChainCoefficients::design(&snapshot, self.spec.sample_rate.as_f64());
        // Both chains validate the same design, so they accept or reject together
        match self
            .left
            .apply(&coefficients)
            .and_then(|()| self.right.apply(&coefficients))
        {
            Ok(()) => {
                self.stats.coefficient_updates.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => {
                self.stats.rejected_updates.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Process one stereo block in place
    pub fn process_block(&mut self, left: &mut [f32], right: &mut [f32]) -> Result<()> {
        if left.len() != right.len() {
            return Err(AudioError::ChannelMismatch {
                left: left.len(),
                right: right.len(),
            });
        }
        self.check_block_len(left.len())?;
        self.run_block(left, right);
        Ok(())
    }

    /// Process one interleaved stereo block (`L R L R ...`) in place
    pub fn process_interleaved(&mut self, interleaved: &mut [f32]) -> Result<()> {
        if interleaved.len() % 2 != 0 {
            return Err(AudioError::OddInterleavedLength {
                len: interleaved.len(),
            });
        }
        let frames = interleaved.len() / 2;
        self.check_block_len(frames)?;

        // Moved out and back in; no allocation
        let mut left = std::mem::take(&mut self.scratch_left);
        let mut right = std::mem::take(&mut self.scratch_right);

        for (frame, pair) in interleaved.chunks_exact(2).enumerate() {
            left[frame] = pair[0];
            right[frame] = pair[1];
        }

        self.run_block(&mut left[..frames], &mut right[..frames]);

        for (frame, pair) in interleaved.chunks_exact_mut(2).enumerate() {
            pair[0] = left[frame];
            pair[1] = right[frame];
        }

        self.scratch_left = left;
        self.scratch_right = right;
        Ok(())
    }

    fn check_block_len(&self, frames: usize) -> Result<()> {
        if frames > self.spec.max_block_size {
            return Err(AudioError::BlockTooLarge {
                len: frames,
                max: self.spec.max_block_size,
            });
        }
        Ok(())
    }

    fn run_block(&mut self, left: &mut [f32], right: &mut [f32]) {
        self.sync_coefficients();

        self.left.process(left);
        self.right.process(right);

        match self.tap_channel {
            TapChannel::Left => self.tap.push_samples(left),
            TapChannel::Right => self.tap.push_samples(right),
            TapChannel::Mid => {
                let mid = &mut self.scratch_mid[..left.len()];
                for ((m, l), r) in mid.iter_mut().zip(left.iter()).zip(right.iter()) {
                    *m = 0.5 * (l + r);
                }
                self.tap.push_samples(mid);
            }
        }

        self.stats.blocks_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn chain(&self, channel: Channel) -> &MonoChain {
        match channel {
            Channel::Left => &self.left,
            Channel::Right => &self.right,
        }
    }

    pub fn bypass_state(&self) -> BypassState {
        self.left.bypass_state()
    }

    pub fn spec(&self) -> ProcessSpec {
        self.spec
    }

    /// Sample rate of the prepared session, shared with display consumers
    pub fn session_rate(&self) -> Arc<SessionRate> {
        self.session.clone()
    }

    pub fn tap_channel(&self) -> TapChannel {
        self.tap_channel
    }

    pub fn tap(&self) -> &T {
        &self.tap
    }

    pub fn tap_mut(&mut self) -> &mut T {
        &mut self.tap
    }

    /// Shared handle on the processor's counters
    pub fn stats(&self) -> Arc<ProcessorStats> {
        self.stats.clone()
    }
}

impl<T: AudioTap> Drop for EqProcessor<T> {
    fn drop(&mut self) {
        self.store.remove_listener(self.listener);
    }
}
