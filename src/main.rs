//! Pre-imputation QC main executable

pub mod common;
pub mod err;
pub mod qc;

use std::process::{ExitCode, Termination};

use clap::{Args, Parser, Subcommand};
use console::{Emoji, Term};

/// CLI parser based on clap.
#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Pre-imputation QC of genotyped cohorts",
    long_about = "This tool filters variants and samples of a case/control cohort before imputation"
)]
struct Cli {
    /// Commonly used arguments
    #[command(flatten)]
    common: common::Args,

    /// The sub command to run
    #[command(subcommand)]
    command: Commands,
}

/// Enum supporting the parsing of top-level commands.
#[derive(Debug, Subcommand)]
enum Commands {
    /// QC related commands.
    Qc(Qc),
}

/// Parsing of "qc *" sub commands.
#[derive(Debug, Args)]
#[command(args_conflicts_with_subcommands = true)]
struct Qc {
    /// The sub command to run
    #[command(subcommand)]
    command: QcCommands,
}

/// Enum supporting the parsing of "qc *" sub commands.
#[allow(clippy::large_enum_variant)]
#[derive(Debug, Subcommand)]
enum QcCommands {
    Run(qc::cli::run::Args),
    Stats(qc::cli::stats::Args),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Build a tracing subscriber according to the configuration in `cli.common`.
    let collector = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(match cli.common.verbose.log_level() {
            Some(level) => match level {
                log::Level::Error => tracing::Level::ERROR,
                log::Level::Warn => tracing::Level::WARN,
                log::Level::Info => tracing::Level::INFO,
                log::Level::Debug => tracing::Level::DEBUG,
                log::Level::Trace => tracing::Level::TRACE,
            },
            None => tracing::Level::INFO,
        })
        .compact()
        .finish();

    // Install collector and go into sub commands.
    let term = Term::stderr();
    let result = tracing::subscriber::with_default(collector, || {
        match &cli.command {
            Commands::Qc(qc) => match &qc.command {
                QcCommands::Run(args) => qc::cli::run::run(&cli.common, args)?,
                QcCommands::Stats(args) => qc::cli::stats::run(&cli.common, args)?,
            },
        }
        term.write_line(&format!("All done. Have a nice day!{}", Emoji(" 😃", "")))?;

        Ok::<(), anyhow::Error>(())
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:?}", e);
            e.chain()
                .find_map(|cause| cause.downcast_ref::<err::QcError>())
                .map(|qc_error| qc_error.clone().report())
                .unwrap_or(ExitCode::FAILURE)
        }
    }
}
