//! Report formatting
//!
//! Renders placement and timing lines in the human-readable or CSV layout.
//! Both layouts carry the same values; only the separators differ.

use std::io::Write;

use crate::bench::{AffinitySnapshot, TimingSample};
use crate::config::{IndexMode, RunConfig};
use crate::error::Result;

/// Header of the CSV placement rows.
pub const CSV_TEAM_HEADER: &str = "Rank, Thread, PU ID, Core ID, NUMA ID, Host";

/// Header of the CSV result rows.
pub const CSV_RESULTS_HEADER: &str = "Rank, Serial, Parallel, Overhead, Threads";

/// Title of the human-readable results block.
pub const RESULTS_TITLE: &str = "Results (time in seconds)";

/// Header of the human-readable result rows.
pub const RESULTS_HEADER: &str = "Rank\tSerial\tParallel\tOverhead\tnThreads";

/// Formats the lines of one rank.
#[derive(Debug, Clone, Copy)]
pub struct Reporter<'a> {
    rank: usize,
    csv: bool,
    index: IndexMode,
    host: &'a str,
}

impl<'a> Reporter<'a> {
    /// Reporter for `rank` running on `host`.
    pub fn new(config: &RunConfig, rank: usize, host: &'a str) -> Self {
        Self {
            rank,
            csv: config.output.csv,
            index: config.index,
            host,
        }
    }

    fn labels(&self) -> (&'static str, &'static str) {
        match self.index {
            IndexMode::Physical => ("PU", "core"),
            IndexMode::Logical => ("lPU", "lcore"),
        }
    }

    /// Placement of the rank's main thread, before the parallel phase.
    pub fn rank_line(&self, snapshot: &AffinitySnapshot) -> String {
        let (pu, core) = snapshot.indices(self.index);
        let (pu_label, core_label) = self.labels();
        format!(
            "Rank-only: Rank {}, {pu_label} {pu}, {core_label} {core}, NUMA id {} ({}).",
            self.rank, snapshot.numa, self.host
        )
    }

    /// Placement of team thread `thread` of `threads`.
    pub fn team_line(&self, thread: usize, threads: usize, snapshot: &AffinitySnapshot) -> String {
        let (pu, core) = snapshot.indices(self.index);
        if self.csv {
            format!(
                "{}, {thread}, {pu}, {core}, {}, {}",
                self.rank, snapshot.numa, self.host
            )
        } else {
            let (pu_label, core_label) = self.labels();
            format!(
                "Team: Rank {}, thread {thread} of {threads} on {pu_label} {pu}, {core_label} {core}, NUMA id {} ({}).",
                self.rank, snapshot.numa, self.host
            )
        }
    }

    /// Timing sample of this rank.
    pub fn results_line(&self, sample: &TimingSample) -> String {
        let (serial, parallel, overhead) = (
            sample.serial_secs(),
            sample.parallel_secs(),
            sample.overhead_secs(),
        );
        if self.csv {
            format!(
                "{}, {serial:.4}, {parallel:.4}, {overhead:.5}, {}",
                self.rank, sample.threads
            )
        } else {
            format!(
                "{}:\t{serial:8.4}\t{parallel:8.4}\t{overhead:8.5}\t{:8}",
                self.rank, sample.threads
            )
        }
    }

    /// Lines preceding the result rows. Only rank 0 prints them.
    pub fn results_header(&self) -> &'static [&'static str] {
        match (self.rank, self.csv) {
            (0, true) => &[CSV_RESULTS_HEADER],
            (0, false) => &[RESULTS_TITLE, RESULTS_HEADER],
            _ => &[],
        }
    }

    /// Write the rank-level placement line.
    pub fn write_rank_line(&self, out: &mut impl Write, snapshot: &AffinitySnapshot) -> Result<()> {
        writeln!(out, "{}", self.rank_line(snapshot))?;
        out.flush()?;
        Ok(())
    }

    /// Write the placement of every team thread, in thread order.
    pub fn write_team(&self, out: &mut impl Write, placements: &[AffinitySnapshot]) -> Result<()> {
        if self.csv {
            writeln!(out, "{CSV_TEAM_HEADER}")?;
        }
        for (thread, snapshot) in placements.iter().enumerate() {
            writeln!(out, "{}", self.team_line(thread, placements.len(), snapshot))?;
        }
        out.flush()?;
        Ok(())
    }

    /// Write the timing sample, preceded by the header on rank 0.
    pub fn write_results(&self, out: &mut impl Write, sample: &TimingSample) -> Result<()> {
        for line in self.results_header() {
            writeln!(out, "{line}")?;
        }
        writeln!(out, "{}", self.results_line(sample))?;
        out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OutputFlags, Workload};
    use std::num::{NonZeroU32, NonZeroUsize};
    use std::time::Duration;

    fn config(csv: bool, index: IndexMode) -> RunConfig {
        RunConfig {
            workload: Workload::NthPrime { n: 10 },
            reps: NonZeroU32::MIN,
            output: OutputFlags {
                csv,
                results: true,
                ..OutputFlags::default()
            },
            index,
            threads: NonZeroUsize::new(4).unwrap(),
            bind: false,
            ranks: NonZeroUsize::new(2).unwrap(),
        }
    }

    fn snapshot() -> AffinitySnapshot {
        AffinitySnapshot {
            pu: 9,
            numa: 1,
            logical_pu: 3,
            core: 4,
            logical_core: 2,
        }
    }

    fn sample() -> TimingSample {
        TimingSample {
            serial: Duration::from_micros(12_340),
            parallel: Duration::from_micros(13_000),
            threads: NonZeroUsize::new(4).unwrap(),
            reps: NonZeroU32::MIN,
        }
    }

    fn numbers(line: &str) -> Vec<String> {
        line.split(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-'))
            .map(|t| t.trim_matches('.'))
            .filter(|t| !t.is_empty() && t.chars().any(|c| c.is_ascii_digit()))
            .map(str::to_owned)
            .collect()
    }

    #[test]
    fn test_team_line_human() {
        let config = config(false, IndexMode::Physical);
        let reporter = Reporter::new(&config, 1, "node07");
        assert_eq!(
            reporter.team_line(2, 4, &snapshot()),
            "Team: Rank 1, thread 2 of 4 on PU 9, core 4, NUMA id 1 (node07)."
        );

        let config = self::config(false, IndexMode::Logical);
        let reporter = Reporter::new(&config, 1, "node07");
        assert_eq!(
            reporter.team_line(2, 4, &snapshot()),
            "Team: Rank 1, thread 2 of 4 on lPU 3, lcore 2, NUMA id 1 (node07)."
        );
    }

    #[test]
    fn test_csv_and_human_carry_same_values() {
        for index in [IndexMode::Physical, IndexMode::Logical] {
            let human_config = config(false, index);
            let csv_config = config(true, index);
            let human = Reporter::new(&human_config, 1, "node07");
            let csv = Reporter::new(&csv_config, 1, "node07");

            // Human team lines also carry the team size after the thread id.
            let mut human_team = numbers(&human.team_line(2, 4, &snapshot()));
            human_team.remove(2);
            assert_eq!(human_team, numbers(&csv.team_line(2, 4, &snapshot())));
            assert!(csv.team_line(2, 4, &snapshot()).ends_with("node07"));

            assert_eq!(
                numbers(&human.results_line(&sample())),
                numbers(&csv.results_line(&sample()))
            );
        }
    }

    #[test]
    fn test_results_line_values() {
        let config = config(false, IndexMode::Physical);
        let reporter = Reporter::new(&config, 0, "h");
        assert_eq!(
            numbers(&reporter.results_line(&sample())),
            vec!["0", "0.0123", "0.0130", "0.00066", "4"]
        );
    }

    #[test]
    fn test_negative_overhead_is_printed() {
        let config = config(true, IndexMode::Physical);
        let reporter = Reporter::new(&config, 0, "h");
        let fast = TimingSample {
            parallel: Duration::from_micros(10_000),
            ..sample()
        };
        assert!(reporter.results_line(&fast).contains("-0.00234"));
    }

    #[test]
    fn test_write_team_csv_header_once() {
        let config = config(true, IndexMode::Physical);
        let reporter = Reporter::new(&config, 0, "h");
        let mut out = Vec::new();
        reporter
            .write_team(&mut out, &[snapshot(), snapshot()])
            .unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec![CSV_TEAM_HEADER, "0, 0, 9, 4, 1, h", "0, 1, 9, 4, 1, h"]);
    }

    #[test]
    fn test_results_header_only_on_rank_zero() {
        let config = config(false, IndexMode::Physical);
        let mut out = Vec::new();
        Reporter::new(&config, 0, "h")
            .write_results(&mut out, &sample())
            .unwrap();
        Reporter::new(&config, 1, "h")
            .write_results(&mut out, &sample())
            .unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], RESULTS_TITLE);
        assert_eq!(lines[1], RESULTS_HEADER);
        assert!(lines[2].starts_with("0:"));
        assert!(lines[3].starts_with("1:"));
    }

    #[test]
    fn test_rank_line() {
        let config = config(false, IndexMode::Physical);
        let reporter = Reporter::new(&config, 0, "h");
        assert_eq!(
            reporter.rank_line(&snapshot()),
            "Rank-only: Rank 0, PU 9, core 4, NUMA id 1 (h)."
        );
    }
}
