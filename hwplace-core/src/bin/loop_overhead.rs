use std::num::NonZeroU32;

use anyhow::Result;
use clap::Parser;
use hwplace_core::cli::{BootstrapArgs, CommonArgs};
use hwplace_core::config::Workload;
use hwplace_core::driver::{self, Role};
use hwplace_core::logging;

/// Compare a repeated floating-point loop against a team running one loop per thread
#[derive(Parser, Debug)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// Inner iterations of one loop
    #[arg(long, default_value_t = 100_000, value_parser = clap::value_parser!(u64).range(1..))]
    work_iters: u64,

    /// Repetitions of both the serial and the parallel phase
    #[arg(long, default_value = "1000")]
    loop_reps: NonZeroU32,

    #[command(flatten)]
    bootstrap: BootstrapArgs,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let log = logging::init(cli.common.verbose);

    let role = match cli.bootstrap.bootstrap() {
        Some(bootstrap) => Role::Member(bootstrap),
        None => Role::Root(cli.common.config(
            Workload::FloatLoop {
                iters: cli.work_iters,
            },
            cli.loop_reps,
            false,
        )),
    };

    driver::run(role, &log)
}
