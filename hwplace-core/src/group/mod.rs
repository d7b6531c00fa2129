//! Process group coordination.
//!
//! A job is a fixed set of ranks that take part in every collective call. A
//! rank that skips a barrier or broadcast hangs the whole job; there is no
//! timeout.

mod header;
pub mod launch;
mod shm;

pub use header::{GroupHeader, PAYLOAD_WORDS};
pub use launch::{Bootstrap, Launch};
pub use shm::ShmGroup;

use crate::error::Result;

/// Collective operations over a fixed set of ranks.
pub trait Collective: Send + Sync {
    /// Rank of the calling process, in `0..size()`.
    fn rank(&self) -> usize;

    /// Number of ranks in the group.
    fn size(&self) -> usize;

    /// Block until every rank called `barrier`.
    fn barrier(&self);

    /// Copy `words` from rank 0 into `words` of every rank.
    ///
    /// Synchronizes like a barrier. All ranks must pass the same length.
    fn broadcast(&self, words: &mut [u64]) -> Result<()>;
}

/// A group of one rank.
#[derive(Debug, Clone, Copy, Default)]
pub struct Solo;

impl Collective for Solo {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn barrier(&self) {}

    fn broadcast(&self, _words: &mut [u64]) -> Result<()> {
        Ok(())
    }
}

/// Run `f` on each rank in turn, rank 0 first.
///
/// Every rank passes `size()` barriers even if its own `f` fails; the error is
/// returned after the last barrier.
pub fn in_rank_order<F>(group: &dyn Collective, f: F) -> Result<()>
where
    F: FnOnce() -> Result<()>,
{
    let mut f = Some(f);
    let mut outcome = Ok(());

    for turn in 0..group.size() {
        if turn == group.rank() {
            if let Some(f) = f.take() {
                outcome = f();
            }
        }
        group.barrier();
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_solo() {
        let mut words: [u64; 3] = [1, 2, 3];
        Solo.broadcast(&mut words).unwrap();
        assert_eq!(words, [1, 2, 3]);
        assert_eq!(Solo.rank(), 0);
        assert_eq!(Solo.size(), 1);
    }

    #[test]
    fn test_in_rank_order_returns_error_after_round() {
        let err = in_rank_order(&Solo, || Err(Error::TeamPanicked(0))).unwrap_err();
        assert!(matches!(err, Error::TeamPanicked(0)));

        let mut ran = false;
        in_rank_order(&Solo, || {
            ran = true;
            Ok(())
        })
        .unwrap();
        assert!(ran);
    }
}
