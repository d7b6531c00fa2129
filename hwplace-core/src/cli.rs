//! CLI arguments shared by the benchmark binaries

use std::num::{NonZeroU32, NonZeroUsize};
use std::path::PathBuf;

use clap::Args;

use crate::config::{IndexMode, OutputFlags, RunConfig, Workload};
use crate::group::Bootstrap;

/// Reporting, team and job options common to every benchmark
#[derive(Args, Copy, Clone, Debug, Eq, PartialEq)]
pub struct CommonArgs {
    /// Print diagnostics on stderr
    #[arg(long)]
    pub verbose: bool,

    /// Print the serial and parallel timings of every rank
    #[arg(long)]
    pub results: bool,

    /// Print comma-separated rows instead of sentences
    #[arg(long)]
    pub csv: bool,

    /// Report logical PU and core indices instead of OS ids
    #[arg(long)]
    pub logical: bool,

    /// Number of team threads per rank
    ///
    /// Defaults to the number of CPUs available to the process.
    #[arg(long)]
    pub threads: Option<NonZeroUsize>,

    /// Pin team thread i to the i-th allowed CPU
    #[arg(long)]
    pub bind: bool,

    /// Number of ranks to launch
    #[arg(long, default_value = "1")]
    pub np: NonZeroUsize,
}

impl CommonArgs {
    /// Run configuration for `workload`.
    pub fn config(&self, workload: Workload, reps: NonZeroU32, rank_line: bool) -> RunConfig {
        let threads = self
            .threads
            .or_else(|| NonZeroUsize::new(num_cpus::get()))
            .unwrap_or(NonZeroUsize::MIN);

        RunConfig {
            workload,
            reps,
            output: OutputFlags {
                verbose: self.verbose,
                results: self.results,
                csv: self.csv,
                rank_line,
            },
            index: if self.logical {
                IndexMode::Logical
            } else {
                IndexMode::Physical
            },
            threads,
            bind: self.bind,
            ranks: self.np,
        }
    }
}

/// Arguments a launched rank receives instead of user options
#[derive(Args, Clone, Debug, Default, Eq, PartialEq)]
pub struct BootstrapArgs {
    #[arg(long, hide = true, requires = "group")]
    rank: Option<usize>,

    #[arg(long, hide = true, requires = "rank")]
    group: Option<PathBuf>,
}

impl BootstrapArgs {
    /// Bootstrap of a launched rank, `None` on rank 0.
    pub fn bootstrap(&self) -> Option<Bootstrap> {
        match (self.rank, &self.group) {
            (Some(rank), Some(group)) => Some(Bootstrap {
                rank,
                group: group.clone(),
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct TestCli {
        #[command(flatten)]
        common: CommonArgs,

        #[command(flatten)]
        bootstrap: BootstrapArgs,
    }

    fn parse(args: &[&str]) -> Result<TestCli, clap::Error> {
        TestCli::try_parse_from(std::iter::once("bench").chain(args.iter().copied()))
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&[]).unwrap();
        assert_eq!(cli.common.np.get(), 1);
        assert!(cli.common.threads.is_none());
        assert!(cli.bootstrap.bootstrap().is_none());

        let config = cli
            .common
            .config(Workload::NthPrime { n: 5 }, NonZeroU32::MIN, false);
        assert_eq!(config.threads.get(), num_cpus::get().max(1));
        assert_eq!(config.index, IndexMode::Physical);
        assert_eq!(config.output, OutputFlags::default());
    }

    #[test]
    fn test_flags_reach_config() {
        let cli = parse(&[
            "--verbose", "--results", "--csv", "--logical", "--bind", "--threads", "3", "--np", "2",
        ])
        .unwrap();
        let config = cli
            .common
            .config(Workload::FloatLoop { iters: 9 }, NonZeroU32::MIN, true);

        assert!(config.output.verbose);
        assert!(config.output.results);
        assert!(config.output.csv);
        assert!(config.output.rank_line);
        assert!(config.bind);
        assert_eq!(config.index, IndexMode::Logical);
        assert_eq!(config.threads.get(), 3);
        assert_eq!(config.ranks.get(), 2);
    }

    #[test]
    fn test_rejects_malformed_numbers() {
        assert!(parse(&["--threads", "0"]).is_err());
        assert!(parse(&["--threads", "four"]).is_err());
        assert!(parse(&["--np", "0"]).is_err());
        assert!(parse(&["--np", "-1"]).is_err());
    }

    #[test]
    fn test_bootstrap_args() {
        let cli = parse(&["--rank", "2", "--group", "/dev/shm/hwplace-x"]).unwrap();
        let bootstrap = cli.bootstrap.bootstrap().unwrap();
        assert_eq!(bootstrap.rank, 2);
        assert_eq!(bootstrap.group, PathBuf::from("/dev/shm/hwplace-x"));

        // Round trip through the launcher's own argument list.
        let args: Vec<String> = bootstrap
            .args()
            .into_iter()
            .map(|a| a.into_string().unwrap())
            .collect();
        let again = parse(&args.iter().map(String::as_str).collect::<Vec<_>>()).unwrap();
        assert_eq!(again.bootstrap.bootstrap(), Some(bootstrap));

        assert!(parse(&["--rank", "2"]).is_err());
    }
}
