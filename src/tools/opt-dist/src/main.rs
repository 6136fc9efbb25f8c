use clap::Parser;
use log::LevelFilter;

use crate::benchmark::RustcPerf;
use crate::config::{Args, Config};
use crate::environment::create_environment;
use crate::exec::ProcessExecutor;
use crate::stages::StagedBuild;
use crate::timer::Timer;
use crate::utils::{format_env_variables, print_binary_sizes, print_free_disk_space};

mod benchmark;
mod config;
mod environment;
mod exec;
mod metrics;
mod stages;
mod timer;
mod training;
mod utils;

#[cfg(test)]
mod testing;

fn main() -> anyhow::Result<()> {
    env_logger::builder()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .format_timestamp_millis()
        .init();

    let config = Config::from_args(Args::parse())?;
    log::info!("Running multi-stage build using {config:?}");
    log::info!("Environment values\n{}", format_env_variables());

    let env = create_environment(&config)?;
    let executor = ProcessExecutor;
    let runner = RustcPerf::new(&executor);
    let build =
        StagedBuild { config: &config, env: env.as_ref(), executor: &executor, runner: &runner };

    let mut timer = Timer::new();
    let result = build.execute(&mut timer);
    if let Err(error) = &result {
        log::error!("The multi-stage build has failed: {error:?}");
    }

    timer.print_stats();
    if let Err(error) = print_free_disk_space() {
        log::warn!("Cannot print free disk space: {error:?}");
    }

    result?;
    print_binary_sizes(env.as_ref())?;
    Ok(())
}
