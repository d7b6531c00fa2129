use std::num::NonZeroU32;

use anyhow::Result;
use clap::Parser;
use hwplace_core::cli::{BootstrapArgs, CommonArgs};
use hwplace_core::config::Workload;
use hwplace_core::driver::{self, Role};
use hwplace_core::logging;

/// Compare one n-th prime search against a team running one search per thread
#[derive(Parser, Debug)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// Print the placement of each rank's main thread before the team starts
    #[arg(long)]
    mpi: bool,

    /// Index into the prime sequence
    #[arg(long, default_value_t = 10_000, value_parser = clap::value_parser!(u32).range(1..))]
    nth: u32,

    #[command(flatten)]
    bootstrap: BootstrapArgs,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let log = logging::init(cli.common.verbose);

    let role = match cli.bootstrap.bootstrap() {
        Some(bootstrap) => Role::Member(bootstrap),
        None => Role::Root(cli.common.config(
            Workload::NthPrime { n: cli.nth },
            NonZeroU32::MIN,
            cli.mpi,
        )),
    };

    driver::run(role, &log)
}
