//! Header of the shared memory group segment.
//!
//! This module defines the structure stored at the start of the segment:
//! identification, the barrier counters and the broadcast payload.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_utils::{Backoff, CachePadded};

/// Number of `u64` words a single broadcast can carry.
pub const PAYLOAD_WORDS: usize = 16;

/// Upper bound of the sleep between barrier polls once spinning gave up.
const MAX_POLL_SLEEP: Duration = Duration::from_millis(1);

/// Group segment header.
///
/// The barrier is a centralized counter with a generation number: the last
/// rank to arrive resets the counter and bumps the generation, which releases
/// everyone waiting on the previous generation.
#[repr(C, align(64))]
pub struct GroupHeader {
    /// Magic value to identify a valid group segment.
    pub magic: AtomicU64,

    /// Version of the segment format.
    pub version: AtomicU64,

    /// Number of ranks in the group.
    pub ranks: AtomicUsize,

    /// Number of ranks that opened the segment.
    pub attached: AtomicUsize,

    /// Ranks that reached the current barrier.
    pub arrived: CachePadded<AtomicUsize>,

    /// Completed barrier count.
    pub generation: CachePadded<AtomicU64>,

    /// Broadcast payload, written by the root before a barrier.
    pub payload: [AtomicU64; PAYLOAD_WORDS],
}

impl GroupHeader {
    /// Magic value to identify a valid group segment.
    pub const MAGIC: u64 = 0x48_57_50_4C_47_52_50_30; // "HWPLGRP0" in hex

    /// Current version of the segment format.
    pub const VERSION: u64 = 1;

    /// Creates a new header for `ranks` ranks.
    pub fn new(ranks: usize) -> Self {
        Self {
            magic: AtomicU64::new(Self::MAGIC),
            version: AtomicU64::new(Self::VERSION),
            ranks: AtomicUsize::new(ranks),
            attached: AtomicUsize::new(0),
            arrived: CachePadded::new(AtomicUsize::new(0)),
            generation: CachePadded::new(AtomicU64::new(0)),
            payload: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    /// Validates the header to ensure it's a group segment we understand.
    pub fn validate(&self) -> bool {
        self.magic.load(Ordering::Relaxed) == Self::MAGIC
            && self.version.load(Ordering::Relaxed) == Self::VERSION
            && self.ranks.load(Ordering::Relaxed) > 0
    }

    /// Number of ranks in the group.
    pub fn ranks(&self) -> usize {
        self.ranks.load(Ordering::Relaxed)
    }

    /// Registers one more rank and returns the new attached count.
    pub fn attach(&self) -> usize {
        self.attached.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Number of ranks that opened the segment.
    pub fn attached(&self) -> usize {
        self.attached.load(Ordering::Acquire)
    }

    /// Completed barrier count.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Blocks until all ranks of the group called `barrier`. Never times out.
    pub fn barrier(&self) {
        let ranks = self.ranks();
        let generation = self.generation.load(Ordering::Acquire);

        if self.arrived.fetch_add(1, Ordering::AcqRel) + 1 == ranks {
            self.arrived.store(0, Ordering::Relaxed);
            self.generation.fetch_add(1, Ordering::Release);
            return;
        }

        let backoff = Backoff::new();
        let mut sleep = Duration::from_micros(1);
        while self.generation.load(Ordering::Acquire) == generation {
            if backoff.is_completed() {
                thread::sleep(sleep);
                sleep = (sleep * 2).min(MAX_POLL_SLEEP);
            } else {
                backoff.snooze();
            }
        }
    }

    /// Stores `words` into the payload area.
    pub fn publish(&self, words: &[u64]) {
        for (slot, word) in self.payload.iter().zip(words) {
            slot.store(*word, Ordering::Relaxed);
        }
    }

    /// Copies the payload area into `words`.
    pub fn read_payload(&self, words: &mut [u64]) {
        for (word, slot) in words.iter_mut().zip(&self.payload) {
            *word = slot.load(Ordering::Relaxed);
        }
    }
}
