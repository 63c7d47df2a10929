// main.rs

// --- External Crate Imports ---
use anyhow::{Error, Result};
use clap::Parser;
use genocall::cli::CliArgs;
use genocall::config::RunConfig;
use genocall::engine::GenotypeCallOrchestrator;
use log::{error, info};
use std::process::ExitCode;
use std::time::Instant;

// --- Main Function ---
fn main() -> ExitCode {
    let cli_args = CliArgs::parse();

    // Initialize logger
    let log_level = cli_args
        .log_level
        .parse::<log::LevelFilter>()
        .unwrap_or_else(|_| {
            eprintln!(
                "Warning: Invalid log level '{}' provided. Defaulting to Info.",
                cli_args.log_level
            );
            log::LevelFilter::Info
        });
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp_micros()
        .init();

    match run(&cli_args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            println!("FATAL ERROR: {:#}", e);
            error!("{:#}", e);
            ExitCode::from(1)
        }
    }
}

fn run(cli_args: &CliArgs) -> Result<(), Error> {
    let total_time_start = Instant::now();
    info!("Starting genocall with args: {:?}", cli_args);

    // --- 1. Validate configuration ---
    let config = RunConfig::try_from(cli_args)?;
    info!(
        "Configured {} sample(s), method '{}', outputs under {}",
        config.samples.len(),
        config.method,
        config.out_dir.display()
    );

    // --- 2. Run ---
    let outcome = GenotypeCallOrchestrator::new(&config).run()?;

    info!(
        "Genotyped {} probesets on {} samples ({} failed). Gender method: {}.",
        outcome.probeset_count,
        outcome.sample_count,
        outcome.failed_probeset_count,
        outcome.gender_method
    );
    for path in &outcome.outputs {
        info!("Wrote {}", path.display());
    }
    info!(
        "genocall finished successfully in {:.2?}.",
        total_time_start.elapsed()
    );
    Ok(())
}
