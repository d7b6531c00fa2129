//! Job driver
//!
//! Runs the weak-scaling measurement on every rank of a job and writes the
//! reports in rank order. Rank 0 owns the configuration; launched ranks
//! receive it through the group before doing anything else.

use std::io::Write;
use std::time::Instant;

use anyhow::{Context, Result};
use sysinfo::{System, SystemExt};

use crate::arch::{self, HardwareIdentity, ThreadBuilder, Topology};
use crate::bench::{AffinitySnapshot, WeakScaling};
use crate::config::RunConfig;
use crate::error::Error;
use crate::group::{in_rank_order, Bootstrap, Collective, Launch, Solo};
use crate::logging::LogHandle;
use crate::report::Reporter;

/// How this process takes part in the job.
#[derive(Debug, Clone)]
pub enum Role {
    /// Rank 0, started by the user.
    Root(RunConfig),
    /// A rank launched by rank 0.
    Member(Bootstrap),
}

/// Machine-level state shared by every phase of one rank.
#[derive(Debug)]
pub struct Session {
    topology: Topology,
    identity: Box<dyn HardwareIdentity>,
    host: String,
    started: Instant,
}

impl Session {
    /// Detect topology, identity backend and host name.
    pub fn detect() -> Result<Self> {
        let topology = arch::detect_cpu_topology();
        let identity = arch::detect_identity().context("No way to read the current PU")?;
        tracing::debug!(
            "Using {} identity over {} PUs",
            identity.name(),
            topology.pus().len()
        );

        Ok(Self::new(topology, identity, host_name()))
    }

    /// Session over explicit parts.
    pub fn new(topology: Topology, identity: Box<dyn HardwareIdentity>, host: String) -> Self {
        Self {
            topology,
            identity,
            host,
            started: Instant::now(),
        }
    }

    /// Host name printed in placement lines.
    pub fn host(&self) -> &str {
        &self.host
    }
}

/// Host name of this machine, `unknown` if it cannot be read.
pub fn host_name() -> String {
    System::new()
        .host_name()
        .unwrap_or_else(|| "unknown".to_string())
}

/// Run this process's part of the job, writing reports to stdout.
pub fn run(role: Role, log: &LogHandle) -> Result<()> {
    let session = Session::detect()?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    match role {
        Role::Root(config) if config.ranks.get() == 1 => {
            execute(Some(&config), &Solo, &session, log, &mut out)
        }
        Role::Root(config) => {
            let launch = Launch::start(config.ranks)?;
            execute(Some(&config), launch.group(), &session, log, &mut out)?;
            launch.finish()
        }
        Role::Member(bootstrap) => {
            let group = bootstrap.join()?;
            execute(None, &group, &session, log, &mut out)
        }
    }
}

/// One rank's measurement and reporting. Every rank must call this.
///
/// A rank whose team fails or whose output breaks still takes part in every
/// collective; its first failure is returned after the final barrier.
pub fn execute(
    config: Option<&RunConfig>,
    group: &dyn Collective,
    session: &Session,
    log: &LogHandle,
    out: &mut impl Write,
) -> Result<()> {
    let rank = group.rank();
    let config =
        RunConfig::share(config, group).context("Failed to receive the run configuration")?;
    log.set_verbose(config.output.verbose);
    tracing::debug!("Rank {} of {} running {:?}", rank, group.size(), config);

    let work = config.workload.work_unit();
    let protocol = WeakScaling::new(work.as_ref(), config.threads, config.reps)
        .with_builder(ThreadBuilder::new(config.bind));
    let reporter = Reporter::new(&config, rank, session.host());

    let (serial, serial_checksum) = protocol.serial_phase();
    tracing::debug!(
        "Rank {} serial phase: {:?} for {} x {}",
        rank,
        serial,
        config.reps,
        work.describe()
    );

    let mut written = Ok(());

    if config.output.rank_line {
        let snapshot = AffinitySnapshot::capture(session.identity.as_ref(), &session.topology);
        let round = in_rank_order(group, || reporter.write_rank_line(out, &snapshot));
        written = written.and(round);
    }

    let team = protocol.parallel_phase(session.identity.as_ref(), &session.topology);
    if let Ok(run) = &team {
        tracing::debug!(
            "Rank {} parallel phase: {:?} on {} threads",
            rank,
            run.elapsed,
            protocol.threads()
        );
    }

    let round = in_rank_order(group, || match &team {
        Ok(run) => reporter.write_team(out, &run.placements),
        Err(_) => Ok(()),
    });
    written = written.and(round);

    if config.output.results {
        let round = in_rank_order(group, || match &team {
            Ok(run) => reporter.write_results(out, &protocol.sample(serial, run.elapsed)),
            Err(_) => Ok(()),
        });
        written = written.and(round);
    }

    group.barrier();
    if rank == 0 {
        let elapsed = session.started.elapsed().as_secs_f64();
        let summary = writeln!(out, "Elapsed time: {elapsed:.6}").and_then(|()| out.flush());
        written = written.and(summary.map_err(Error::from));
    }

    let run = team.with_context(|| format!("Rank {rank} team failed"))?;
    written.with_context(|| format!("Rank {rank} failed to write its report"))?;
    tracing::debug!(
        "Rank {} checksums: serial {:#x}, parallel {:#x}",
        rank,
        serial_checksum,
        run.checksum
    );

    Ok(())
}
