//! Launching the ranks of a job.
//!
//! Rank 0 creates the group segment and starts ranks `1..R` as copies of the
//! current executable. Launched ranks only receive their bootstrap arguments;
//! everything else reaches them through the configuration broadcast.

use std::ffi::OsString;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use uuid::Uuid;

use crate::group::{Collective, ShmGroup};

/// Command-line flag carrying the rank of a launched process.
pub const RANK_FLAG: &str = "--rank";

/// Command-line flag carrying the group segment path.
pub const GROUP_FLAG: &str = "--group";

/// What a launched rank needs to join its group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bootstrap {
    /// Rank of the launched process.
    pub rank: usize,
    /// Path of the group segment.
    pub group: PathBuf,
}

impl Bootstrap {
    /// Arguments handed to the launched process.
    pub fn args(&self) -> Vec<OsString> {
        vec![
            RANK_FLAG.into(),
            self.rank.to_string().into(),
            GROUP_FLAG.into(),
            self.group.clone().into_os_string(),
        ]
    }

    /// Open the group segment as this rank.
    pub fn join(&self) -> Result<ShmGroup> {
        ShmGroup::open(&self.group, self.rank).with_context(|| {
            format!(
                "Rank {} failed to join group segment {}",
                self.rank,
                self.group.display()
            )
        })
    }
}

/// A running job seen from rank 0.
#[derive(Debug)]
pub struct Launch {
    group: ShmGroup,
    children: Vec<(usize, Child)>,
}

impl Launch {
    /// Start a job of `ranks` ranks running the current executable.
    pub fn start(ranks: NonZeroUsize) -> Result<Self> {
        let exe = std::env::current_exe().context("Failed to locate the current executable")?;
        Self::start_program(&exe, ranks)
    }

    /// Start a job of `ranks` ranks running `program` for ranks `1..ranks`.
    ///
    /// Returns once every rank opened the group segment. Fails, and stops
    /// the ranks already started, if one exits before joining.
    pub fn start_program(program: &Path, ranks: NonZeroUsize) -> Result<Self> {
        let path = ShmGroup::default_path(Uuid::new_v4());
        let group = ShmGroup::create(&path, ranks.get())
            .with_context(|| format!("Failed to create group segment {}", path.display()))?;

        let mut launch = Self {
            group,
            children: Vec::with_capacity(ranks.get() - 1),
        };

        for rank in 1..ranks.get() {
            let bootstrap = Bootstrap {
                rank,
                group: path.clone(),
            };

            let spawned = Command::new(program)
                .args(bootstrap.args())
                .stdin(Stdio::null())
                .spawn();

            match spawned {
                Ok(child) => launch.children.push((rank, child)),
                Err(err) => {
                    launch.kill();
                    return Err(err).with_context(|| {
                        format!("Failed to launch rank {rank} from {}", program.display())
                    });
                }
            }
        }

        launch.await_attached()?;
        tracing::debug!("All {} ranks joined {}", ranks, path.display());

        Ok(launch)
    }

    fn await_attached(&mut self) -> Result<()> {
        let ranks = self.group.size();
        let mut sleep = Duration::from_micros(50);

        while self.group.attached() < ranks {
            let exited = self.children.iter_mut().find_map(|(rank, child)| {
                child
                    .try_wait()
                    .ok()
                    .flatten()
                    .map(|status| (*rank, status))
            });

            if let Some((rank, status)) = exited {
                self.kill();
                bail!("Rank {rank} exited with {status} before joining the group");
            }

            thread::sleep(sleep);
            sleep = (sleep * 2).min(Duration::from_millis(10));
        }

        Ok(())
    }

    /// Group handle of rank 0.
    pub fn group(&self) -> &ShmGroup {
        &self.group
    }

    /// Wait for every launched rank and check how it exited.
    pub fn finish(mut self) -> Result<()> {
        let mut failed = Vec::new();

        for (rank, mut child) in self.children.drain(..) {
            let status = child
                .wait()
                .with_context(|| format!("Failed to wait for rank {rank}"))?;
            if !status.success() {
                tracing::warn!("Rank {} exited with {}", rank, status);
                failed.push(rank);
            }
        }

        if !failed.is_empty() {
            bail!("Ranks {failed:?} did not complete successfully");
        }

        Ok(())
    }

    fn kill(&mut self) {
        for (rank, mut child) in self.children.drain(..) {
            if let Err(err) = child.kill() {
                tracing::debug!("Failed to stop rank {}: {}", rank, err);
            }
            let _ = child.wait();
        }
    }
}

impl Drop for Launch {
    fn drop(&mut self) {
        // Ranks still running here can only be stuck in a collective.
        self.kill();
    }
}
