//! Run configuration
//!
//! The configuration is decided once on rank 0, broadcast to every rank as a
//! fixed block of words, and read-only afterwards.

use std::num::{NonZeroU32, NonZeroUsize};

use crate::bench::{FloatLoop, NthPrime, WorkUnit};
use crate::error::{Error, Result};
use crate::group::Collective;

/// Number of `u64` words a configuration occupies on the wire.
pub const CONFIG_WORDS: usize = 16;

/// "HWPLACE1"
const FORMAT_TAG: u64 = 0x4857_504C_4143_4531;

const FLAG_VERBOSE: u64 = 1 << 0;
const FLAG_RESULTS: u64 = 1 << 1;
const FLAG_CSV: u64 = 1 << 2;
const FLAG_RANK_LINE: u64 = 1 << 3;
const FLAG_LOGICAL: u64 = 1 << 4;
const FLAG_BIND: u64 = 1 << 5;

const KIND_PRIME: u64 = 1;
const KIND_LOOP: u64 = 2;

/// Which numbering the report uses for PUs and cores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexMode {
    /// OS-assigned ids.
    #[default]
    Physical,
    /// Topology traversal order.
    Logical,
}

/// The synthetic work unit and its size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Workload {
    /// Find the n-th prime.
    NthPrime {
        /// Index into the prime sequence.
        n: u32,
    },
    /// Floating-point loop.
    FloatLoop {
        /// Inner iterations per unit.
        iters: u64,
    },
}

impl Workload {
    /// Instantiate the work unit.
    pub fn work_unit(&self) -> Box<dyn WorkUnit> {
        match *self {
            Self::NthPrime { n } => Box::new(NthPrime::new(n)),
            Self::FloatLoop { iters } => Box::new(FloatLoop::new(iters)),
        }
    }
}

/// What gets printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutputFlags {
    /// Debug diagnostics on stderr.
    pub verbose: bool,
    /// Print the timing sample of every rank.
    pub results: bool,
    /// Comma-separated output.
    pub csv: bool,
    /// Print one rank-level placement line before the parallel phase.
    pub rank_line: bool,
}

/// Immutable configuration shared by all ranks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunConfig {
    /// Work unit executed by both phases.
    pub workload: Workload,
    /// Repetitions of each phase.
    pub reps: NonZeroU32,
    /// Output selection.
    pub output: OutputFlags,
    /// Numbering used in reports.
    pub index: IndexMode,
    /// Team size of the parallel phase.
    pub threads: NonZeroUsize,
    /// Pin team threads to CPUs.
    pub bind: bool,
    /// Number of ranks in the job.
    pub ranks: NonZeroUsize,
}

impl RunConfig {
    /// Encode into the broadcast wire format.
    pub fn to_words(&self) -> [u64; CONFIG_WORDS] {
        let mut flags = 0;
        for (set, bit) in [
            (self.output.verbose, FLAG_VERBOSE),
            (self.output.results, FLAG_RESULTS),
            (self.output.csv, FLAG_CSV),
            (self.output.rank_line, FLAG_RANK_LINE),
            (self.index == IndexMode::Logical, FLAG_LOGICAL),
            (self.bind, FLAG_BIND),
        ] {
            if set {
                flags |= bit;
            }
        }

        let (kind, param) = match self.workload {
            Workload::NthPrime { n } => (KIND_PRIME, u64::from(n)),
            Workload::FloatLoop { iters } => (KIND_LOOP, iters),
        };

        let mut words = [0u64; CONFIG_WORDS];
        words[0] = FORMAT_TAG;
        words[1] = flags;
        words[2] = kind;
        words[3] = param;
        words[4] = u64::from(self.reps.get());
        words[5] = self.threads.get() as u64;
        words[6] = self.ranks.get() as u64;
        words
    }

    /// Decode the broadcast wire format.
    pub fn from_words(words: &[u64; CONFIG_WORDS]) -> Result<Self> {
        if words[0] != FORMAT_TAG {
            return Err(Error::MalformedConfig(format!(
                "unexpected format tag {:#x}",
                words[0]
            )));
        }

        let flags = words[1];
        let workload = match words[2] {
            KIND_PRIME => Workload::NthPrime {
                n: narrow(words[3], "nth")?,
            },
            KIND_LOOP => Workload::FloatLoop { iters: words[3] },
            other => {
                return Err(Error::MalformedConfig(format!("unknown work kind {other}")))
            }
        };

        let reps = NonZeroU32::new(narrow(words[4], "repetitions")?)
            .ok_or_else(|| Error::MalformedConfig("zero repetitions".to_string()))?;
        let threads = NonZeroUsize::new(narrow(words[5], "threads")?)
            .ok_or_else(|| Error::MalformedConfig("zero threads".to_string()))?;
        let ranks = NonZeroUsize::new(narrow(words[6], "ranks")?)
            .ok_or_else(|| Error::MalformedConfig("zero ranks".to_string()))?;

        Ok(Self {
            workload,
            reps,
            output: OutputFlags {
                verbose: flags & FLAG_VERBOSE != 0,
                results: flags & FLAG_RESULTS != 0,
                csv: flags & FLAG_CSV != 0,
                rank_line: flags & FLAG_RANK_LINE != 0,
            },
            index: if flags & FLAG_LOGICAL != 0 {
                IndexMode::Logical
            } else {
                IndexMode::Physical
            },
            threads,
            bind: flags & FLAG_BIND != 0,
            ranks,
        })
    }

    /// Distribute the configuration from rank 0 to every rank.
    ///
    /// Rank 0 passes `Some`, all other ranks pass `None`. Every rank returns
    /// the configuration decided by rank 0. This is a collective call.
    pub fn share(config: Option<&Self>, group: &dyn Collective) -> Result<Self> {
        let mut words = match (group.rank(), config) {
            (0, Some(config)) => config.to_words(),
            (0, None) => {
                return Err(Error::MalformedConfig(
                    "rank 0 has no configuration to broadcast".to_string(),
                ))
            }
            _ => [0u64; CONFIG_WORDS],
        };

        group.broadcast(&mut words)?;
        Self::from_words(&words)
    }
}

fn narrow<T: TryFrom<u64>>(value: u64, what: &str) -> Result<T> {
    T::try_from(value).map_err(|_| Error::MalformedConfig(format!("{what} out of range: {value}")))
}
