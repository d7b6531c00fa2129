//! Thread builder for measurement teams
//!
//! This module spawns the scoped threads of a measurement team and, when
//! binding is requested, pins team thread `i` to the `i`-th CPU the process
//! is allowed to run on.

use std::io;
use std::thread::{self, Scope, ScopedJoinHandle};

use core_affinity::CoreId;

/// Result of attempting to pin a thread to a specific core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinningResult {
    /// Successfully pinned to the requested core
    Success,
    /// Successfully pinned, but to a different core than requested
    SuccessDifferentCore(usize),
    /// Pinning is not supported on this platform
    Unsupported,
    /// Pinning failed for some other reason
    Failed,
}

/// Builder for team threads
#[derive(Debug, Clone)]
pub struct ThreadBuilder {
    /// Whether team threads get pinned
    bind: bool,
    /// CPUs the process may run on, in OS order
    core_ids: Option<Vec<CoreId>>,
}

impl ThreadBuilder {
    /// Create a thread builder. With `bind`, the allowed CPU list is queried once.
    pub fn new(bind: bool) -> Self {
        let core_ids = if bind {
            core_affinity::get_core_ids()
        } else {
            None
        };

        if bind && core_ids.is_none() {
            tracing::warn!("Thread binding requested but CPU list is unavailable");
        }

        Self { bind, core_ids }
    }

    /// Index into the allowed CPU list used for the given team thread
    pub fn core_for_worker(&self, worker_idx: usize) -> Option<usize> {
        match &self.core_ids {
            Some(ids) if self.bind && !ids.is_empty() => Some(worker_idx % ids.len()),
            _ => None,
        }
    }

    /// Spawn team thread `worker_idx` inside `scope`
    pub fn spawn_scoped<'scope, 'env, F, T>(
        &self,
        scope: &'scope Scope<'scope, 'env>,
        worker_idx: usize,
        f: F,
    ) -> io::Result<ScopedJoinHandle<'scope, T>>
    where
        F: FnOnce() -> T + Send + 'scope,
        T: Send + 'scope,
    {
        let target = self
            .core_for_worker(worker_idx)
            .zip(self.core_ids.as_ref())
            .map(|(idx, ids)| (idx, ids[idx]));
        let bind = self.bind;

        thread::Builder::new()
            .name(format!("team-{worker_idx}"))
            .spawn_scoped(scope, move || {
                if bind {
                    let pinning_result = match target {
                        Some((idx, core)) if idx == worker_idx => pin_thread_to_core(core),
                        Some((idx, core)) => match pin_thread_to_core(core) {
                            PinningResult::Success => PinningResult::SuccessDifferentCore(idx),
                            other => other,
                        },
                        None => PinningResult::Unsupported,
                    };

                    match pinning_result {
                        PinningResult::Success => {}
                        PinningResult::SuccessDifferentCore(idx) => tracing::debug!(
                            "Team thread {worker_idx} wrapped around to CPU slot {idx}"
                        ),
                        other => tracing::warn!(
                            "Team thread {worker_idx} pinning: {other:?}"
                        ),
                    }
                }

                f()
            })
    }
}

/// Attempt to pin the current thread to a specific CPU
fn pin_thread_to_core(core: CoreId) -> PinningResult {
    if core_affinity::set_for_current(core) {
        PinningResult::Success
    } else {
        PinningResult::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_unbound_threads_run() {
        let builder = ThreadBuilder::new(false);
        assert_eq!(builder.core_for_worker(0), None);

        let counter = AtomicUsize::new(0);
        thread::scope(|scope| {
            let handles: Vec<_> = (0..3)
                .map(|idx| {
                    builder
                        .spawn_scoped(scope, idx, || counter.fetch_add(1, Ordering::Relaxed))
                        .unwrap()
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }
        });

        assert_eq!(counter.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_bound_slots_wrap_around() {
        let builder = ThreadBuilder::new(true);
        let Some(cpus) = core_affinity::get_core_ids().map(|ids| ids.len()) else {
            return;
        };

        assert_eq!(builder.core_for_worker(0), Some(0));
        assert_eq!(builder.core_for_worker(cpus), Some(0));

        let name = thread::scope(|scope| {
            builder
                .spawn_scoped(scope, 0, || thread::current().name().map(str::to_owned))
                .unwrap()
                .join()
                .unwrap()
        });
        assert_eq!(name.as_deref(), Some("team-0"));
    }
}
