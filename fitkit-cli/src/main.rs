//! fitkit CLI: run, check and inspect configuration-driven training experiments.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// fitkit: train a model described by a config file
#[derive(Parser, Debug)]
#[command(name = "fitkit", version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only report errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug, PartialEq)]
enum Commands {
    /// Train an experiment in a fresh run directory
    Run {
        /// Experiment config (TOML or JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Directory that receives timestamped run directories
        #[arg(long, default_value = fitkit_core::training::runner::DEFAULT_BASE_DIR)]
        base_dir: PathBuf,
    },
    /// Resolve every component and the data without training
    Check {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// List registered component names
    Registry,
}

fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "fitkit", "fitkit")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "fitkit.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    commands::handle_command(cli.command)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_run_defaults_base_dir() {
        let cli = Cli::try_parse_from(["fitkit", "run", "-c", "exp.toml"]).unwrap();
        assert_eq!(
            cli.command,
            Commands::Run {
                config: PathBuf::from("exp.toml"),
                base_dir: PathBuf::from("runs"),
            }
        );
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn test_global_verbosity_after_subcommand() {
        let cli = Cli::try_parse_from(["fitkit", "check", "--config", "a.json", "-vv"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(!cli.quiet);
    }

    #[test]
    fn test_run_requires_config() {
        assert!(Cli::try_parse_from(["fitkit", "run"]).is_err());
        assert!(Cli::try_parse_from(["fitkit", "registry", "-q"]).unwrap().quiet);
    }
}
