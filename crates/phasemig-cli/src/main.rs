//! phasemig command-line client
//!
//! Manages migration configurations: record selection per phase, child
//! resolution from record exports, phase plans and rollback plans.

mod commands;
mod config;
mod export;
mod formatter;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::commands::Session;
use crate::config::Args;

const DEFAULT_LOG_FILTER: &str = "phasemig_core=info,phasemig_cli=info";

#[tokio::main]
async fn main() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let (config, command) = Args::parse().into_config();

    let result = match Session::open(config) {
        Ok(session) => session.execute(command).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(output) => {
            if !output.is_empty() {
                println!("{}", output);
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
