//! Command-line interface for the tessera incremental cache.
//!
//! Provides `tessera update` to bring the cache of a project up to date and
//! `tessera clean` to drop it. Libraries are read from JSON descriptors
//! (`*.klib.json`) listed in `tessera.toml`.

#![warn(missing_docs)]

mod clean;
mod descriptor;
mod project;
mod update;

use std::process;

use clap::{Parser, Subcommand, ValueEnum};

/// Incremental cross-module compilation cache.
#[derive(Parser, Debug)]
#[command(name = "tessera", version, about = "Tessera incremental cache")]
pub struct Cli {
    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose (debug-level) output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to a custom `tessera.toml` configuration file.
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// The subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Bring the incremental cache up to date.
    Update(UpdateArgs),
    /// Remove the cache directory.
    Clean,
}

/// Arguments for the `tessera update` subcommand.
#[derive(Parser, Debug)]
pub struct UpdateArgs {
    /// Main-library files to rebuild regardless of their fingerprints.
    #[arg(long, num_args = 1..)]
    pub dirty: Vec<String>,

    /// Output format for the run summary.
    #[arg(short, long, value_enum, default_value_t = ReportFormat::Text)]
    pub format: ReportFormat,
}

/// Summary output format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    /// Human-readable terminal output.
    Text,
    /// Machine-readable JSON output.
    Json,
}

/// Global settings derived from CLI flags.
pub struct GlobalArgs {
    /// Whether to suppress non-error output.
    pub quiet: bool,
    /// Whether to print verbose/debug information.
    pub verbose: bool,
    /// Optional path to a custom config file.
    pub config: Option<String>,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.quiet, cli.verbose);

    let global = GlobalArgs {
        quiet: cli.quiet,
        verbose: cli.verbose,
        config: cli.config,
    };

    let result = match cli.command {
        Command::Update(ref args) => update::run(args, &global),
        Command::Clean => clean::run(&global),
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    }
}

/// Installs the log subscriber. `RUST_LOG` wins over the verbosity flags.
fn init_tracing(quiet: bool, verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let default_level = if verbose {
        "debug"
    } else if quiet {
        "error"
    } else {
        "warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn parse_update_default() {
        let cli = Cli::parse_from(["tessera", "update"]);
        match cli.command {
            Command::Update(ref args) => {
                assert!(args.dirty.is_empty());
                assert_eq!(args.format, ReportFormat::Text);
            }
            _ => panic!("expected Update command"),
        }
    }

    #[test]
    fn parse_update_with_args() {
        let cli = Cli::parse_from([
            "tessera", "update", "--dirty", "a.kt", "b.kt", "--format", "json",
        ]);
        match cli.command {
            Command::Update(ref args) => {
                assert_eq!(args.dirty, vec!["a.kt", "b.kt"]);
                assert_eq!(args.format, ReportFormat::Json);
            }
            _ => panic!("expected Update command"),
        }
    }

    #[test]
    fn parse_clean() {
        let cli = Cli::parse_from(["tessera", "clean"]);
        assert!(matches!(cli.command, Command::Clean));
    }

    #[test]
    fn parse_global_flags() {
        let cli = Cli::parse_from(["tessera", "--quiet", "update"]);
        assert!(cli.quiet);
        assert!(!cli.verbose);
    }

    #[test]
    fn parse_config_path() {
        let cli = Cli::parse_from(["tessera", "clean", "--config", "/p/tessera.toml"]);
        assert_eq!(cli.config.as_deref(), Some("/p/tessera.toml"));
    }
}
