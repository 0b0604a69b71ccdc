//! Lock-free block FIFO between the audio thread and the analysis thread
//!
//! The FIFO moves fixed-size blocks of mono samples. All storage is
//! preallocated: blocks circulate between a `free` pool and the `filled`
//! queue, so neither side allocates after construction.
//!
//! Performance characteristics:
//! - Lock-free (crossbeam `ArrayQueue`, no mutex contention)
//! - Producer never blocks; a full FIFO displaces its oldest block
//! - Cache-padded counters to keep the two threads off each other's lines

use crossbeam::queue::ArrayQueue;
use crossbeam::utils::CachePadded;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use trieq_core::domain::audio::{AudioTap, PushOutcome};

/// Bounded queue of fixed-size sample blocks
///
/// One more block than `capacity` is allocated so the producer still finds
/// a free block while the consumer is copying one out. The producer sees
/// [`PushOutcome::Rejected`] only in the rare instant when the FIFO is full
/// and that spare block is in the consumer's hands.
pub struct BlockFifo {
    filled: ArrayQueue<Vec<f32>>,
    free: ArrayQueue<Vec<f32>>,
    block_size: usize,
    stored: CachePadded<AtomicU64>,
    displaced: CachePadded<AtomicU64>,
    rejected: CachePadded<AtomicU64>,
}

impl BlockFifo {
    /// Create a FIFO holding up to `capacity` blocks of `block_size` samples
    ///
    /// Both values are raised to at least 1.
    pub fn new(capacity: usize, block_size: usize) -> Self {
        let capacity = capacity.max(1);
        let block_size = block_size.max(1);

        let free = ArrayQueue::new(capacity + 1);
        for _ in 0..=capacity {
            // Cannot fail: the pool was sized for exactly these blocks
            let _ = free.push(vec![0.0; block_size]);
        }

        Self {
            filled: ArrayQueue::new(capacity),
            free,
            block_size,
            stored: CachePadded::new(AtomicU64::new(0)),
            displaced: CachePadded::new(AtomicU64::new(0)),
            rejected: CachePadded::new(AtomicU64::new(0)),
        }
    }

    /// Copy one block in (producer)
    ///
    /// `samples` must hold exactly `block_size` samples; anything else is
    /// rejected. Never blocks, never allocates.
    pub fn push_block(&self, samples: &[f32]) -> PushOutcome {
        if samples.len() != self.block_size {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return PushOutcome::Rejected;
        }

        let Some(mut block) = self.free.pop() else {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return PushOutcome::Rejected;
        };
        block.copy_from_slice(samples);

        match self.filled.force_push(block) {
            None => {
                self.stored.fetch_add(1, Ordering::Relaxed);
                PushOutcome::Stored
            }
            Some(oldest) => {
                // Back to the pool; the pool always has room for it
                let _ = self.free.push(oldest);
                self.displaced.fetch_add(1, Ordering::Relaxed);
                PushOutcome::DisplacedOldest
            }
        }
    }

    /// Copy the oldest block out (consumer); false when empty
    ///
    /// Copies `min(block_size, out.len())` samples.
    pub fn pop_block(&self, out: &mut [f32]) -> bool {
        match self.filled.pop() {
            Some(block) => {
                let n = block.len().min(out.len());
                out[..n].copy_from_slice(&block[..n]);
                let _ = self.free.push(block);
                true
            }
            None => false,
        }
    }

    /// Blocks waiting to be read
    pub fn len(&self) -> usize {
        self.filled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filled.is_empty()
    }

    /// Maximum number of unread blocks
    pub fn capacity(&self) -> usize {
        self.filled.capacity()
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn stats(&self) -> FifoStats {
        FifoStats {
            stored: self.stored.load(Ordering::Relaxed),
            displaced: self.displaced.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

/// Push outcome counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FifoStats {
    pub stored: u64,
    pub displaced: u64,
    pub rejected: u64,
}

/// Producer-side accumulator feeding a [`BlockFifo`]
///
/// Hosts deliver blocks of arbitrary size; this re-blocks them into the
/// FIFO's fixed block size. Leftover samples wait for the next call.
pub struct SampleFifo {
    fifo: Arc<BlockFifo>,
    pending: Vec<f32>,
    filled: usize,
}

impl SampleFifo {
    pub fn new(fifo: Arc<BlockFifo>) -> Self {
        let pending = vec![0.0; fifo.block_size()];
        Self {
            fifo,
            pending,
            filled: 0,
        }
    }

    /// Samples accumulated but not yet pushed
    pub fn pending(&self) -> usize {
        self.filled
    }

    pub fn fifo(&self) -> &Arc<BlockFifo> {
        &self.fifo
    }
}

impl AudioTap for SampleFifo {
    fn push_samples(&mut self, mut samples: &[f32]) {
        while !samples.is_empty() {
            let take = (self.pending.len() - self.filled).min(samples.len());
            self.pending[self.filled..self.filled + take].copy_from_slice(&samples[..take]);
            self.filled += take;
            samples = &samples[take..];

            if self.filled == self.pending.len() {
                self.fifo.push_block(&self.pending);
                self.filled = 0;
            }
        }
    }
}
