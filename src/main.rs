// src/main.rs
//! cvssuck - CLI entry point

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use cvssuck::cli;
use cvssuck::mirror::Mirror;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let matches = match cli::command().try_get_matches() {
        Ok(matches) => matches,
        Err(err) => {
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = err.print();
            std::process::exit(code);
        }
    };

    let invocation = match cli::invocation_from(&matches) {
        Ok(invocation) => invocation,
        Err(message) => {
            eprintln!("cvssuck: {message}");
            std::process::exit(1);
        }
    };

    if let Err(err) = run(invocation) {
        eprintln!("cvssuck: {err:#}");
        std::process::exit(1);
    }
}

fn run(invocation: cli::Invocation) -> Result<()> {
    let mut mirror = Mirror::new(&invocation.cvsroot, invocation.config)
        .context("setting up scratch workspace")?;
    mirror.run(&invocation.jobs)
        .context("mirroring failed")?;
    Ok(())
}
