//! Dirty-flag protocol between parameter writers and coefficient consumers
//!
//! Every consumer that mirrors the filter chain (the audio processor, the
//! response-curve display) owns one [`DirtyFlag`] registered as a listener
//! on the shared [`ParameterStore`](super::params::ParameterStore). Writers
//! mark it, the consumer clears it with a compare-and-swap at a block or
//! tick boundary and then recomputes its coefficients.
//!
//! Position-level bypass travels the same way: [`BypassSwitches`] are plain
//! atomics the control side writes and each consumer compares against its
//! own chain at the next boundary.
//!
//! The session sample rate is shared the same way: [`SessionRate`] is
//! written by `prepare` and polled by the display consumers.

use super::chain::ChainPosition;
use super::params::{ParamId, ParameterListener};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// One-bit "parameters changed since this consumer last synced" signal
#[derive(Debug, Default)]
pub struct DirtyFlag {
    dirty: AtomicBool,
}

impl DirtyFlag {
    /// Create a clean flag
    pub fn new() -> Self {
        Self {
            dirty: AtomicBool::new(false),
        }
    }

    /// Create a flag that forces one initial sync
    pub fn dirty() -> Self {
        Self {
            dirty: AtomicBool::new(true),
        }
    }

    /// Move to Dirty. Repeated marks before a `take` coalesce.
    #[inline]
    pub fn mark(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Atomically test Dirty and set Clean
    ///
    /// Returns true to exactly one caller per Clean→Dirty transition. Safe
    /// to call from the real-time thread.
    #[inline]
    pub fn take(&self) -> bool {
        self.dirty
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Peek without clearing
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }
}

impl ParameterListener for DirtyFlag {
    fn parameter_changed(&self, _id: ParamId, _value: f32) {
        self.mark();
    }
}

/// Shared per-position bypass switches
#[derive(Debug, Default)]
pub struct BypassSwitches {
    flags: [AtomicBool; 3],
}

impl BypassSwitches {
    /// Every position active
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, position: ChainPosition, bypassed: bool) {
        self.flags[position.index()].store(bypassed, Ordering::Release);
    }

    #[inline]
    pub fn is_bypassed(&self, position: ChainPosition) -> bool {
        self.flags[position.index()].load(Ordering::Acquire)
    }
}

/// Sample rate of the current processing session
///
/// The processor publishes here when a new session is prepared; consumers
/// compare it against the rate they last designed for.
#[derive(Debug)]
pub struct SessionRate {
    hz: AtomicU32,
}

impl SessionRate {
    pub fn new(hz: u32) -> Self {
        Self {
            hz: AtomicU32::new(hz),
        }
    }

    pub fn set(&self, hz: u32) {
        self.hz.store(hz, Ordering::Release);
    }

    #[inline]
    pub fn hz(&self) -> u32 {
        self.hz.load(Ordering::Acquire)
    }

    #[inline]
    pub fn as_f64(&self) -> f64 {
        f64::from(self.hz())
    }
}
