//! `tollgate` -- CLI binary for the tollgate cost governor.
//!
//! Provides the following subcommands:
//!
//! - `tollgate config show` -- Print the resolved configuration as JSON.
//! - `tollgate config validate` -- Run configuration validation.
//! - `tollgate ceiling --spend <usd>` -- Show the band and ceiling for a spend.
//! - `tollgate simulate` -- Drive a synthetic workload against an in-memory warehouse.

use clap::{Parser, Subcommand};

mod commands;

/// Cost-governed ingestion and query admission.
#[derive(Parser)]
#[command(name = "tollgate", about = "Cost-governed ingestion and query admission", version)]
struct Cli {
    /// Enable verbose (debug-level) logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Inspect or validate configuration.
    Config {
        #[command(subcommand)]
        action: ConfigCmd,
    },

    /// Show the utilization band and per-query ceiling for a given spend.
    Ceiling(commands::ceiling::CeilingArgs),

    /// Run a synthetic ingest and query workload against an in-memory warehouse.
    Simulate(commands::simulate::SimulateArgs),
}

/// Subcommands for `tollgate config`.
#[derive(Subcommand)]
enum ConfigCmd {
    /// Print the resolved configuration as JSON.
    Show {
        /// Config file path (overrides auto-discovery).
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Validate the configuration and print diagnostics.
    Validate {
        /// Config file path (overrides auto-discovery).
        #[arg(short, long)]
        config: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Config { action } => match action {
            ConfigCmd::Show { config } => {
                let cfg = commands::load_config(config.as_deref())?;
                commands::config_cmd::config_show(&cfg)?;
            }
            ConfigCmd::Validate { config } => {
                let cfg = commands::load_config(config.as_deref())?;
                commands::config_cmd::config_validate(&cfg)?;
            }
        },
        Commands::Ceiling(args) => commands::ceiling::run(args)?,
        Commands::Simulate(args) => commands::simulate::run(args).await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_without_error() {
        Cli::command().debug_assert();
    }

    #[test]
    fn verbose_flag_is_global() {
        let cli = Cli::try_parse_from(["tollgate", "config", "show", "--verbose"]).unwrap();
        assert!(cli.verbose);
    }

    #[test]
    fn config_show_with_path() {
        let cli = Cli::try_parse_from([
            "tollgate", "config", "show", "--config", "/tmp/tollgate.json",
        ])
        .unwrap();
        match cli.command {
            Commands::Config {
                action: ConfigCmd::Show { config },
            } => assert_eq!(config.as_deref(), Some("/tmp/tollgate.json")),
            _ => panic!("expected config show"),
        }
    }

    #[test]
    fn config_validate_parses() {
        let result = Cli::try_parse_from(["tollgate", "config", "validate"]);
        assert!(result.is_ok());
    }

    #[test]
    fn ceiling_requires_spend() {
        assert!(Cli::try_parse_from(["tollgate", "ceiling"]).is_err());

        let cli = Cli::try_parse_from(["tollgate", "ceiling", "--spend", "76"]).unwrap();
        match cli.command {
            Commands::Ceiling(args) => assert_eq!(args.spend, 76.0),
            _ => panic!("expected ceiling"),
        }
    }

    #[test]
    fn simulate_defaults() {
        let cli = Cli::try_parse_from(["tollgate", "simulate"]).unwrap();
        match cli.command {
            Commands::Simulate(args) => {
                assert_eq!(args.records, 1_000);
                assert_eq!(args.queries, 20);
            }
            _ => panic!("expected simulate"),
        }
    }

    #[test]
    fn simulate_with_overrides() {
        let result = Cli::try_parse_from([
            "tollgate", "simulate",
            "--records", "50",
            "--queries", "5",
            "--query-cost", "1.5",
            "--prior-spend", "80",
            "--json",
        ]);
        assert!(result.is_ok());
    }

    #[test]
    fn unknown_subcommand_rejected() {
        assert!(Cli::try_parse_from(["tollgate", "serve"]).is_err());
    }
}
