pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use parley_core::config::LoggingConfig;
use rust_decimal::Decimal;

#[derive(Debug, Parser)]
#[command(
    name = "parley",
    about = "Parley negotiation CLI",
    long_about = "Run buyer/seller negotiations, inspect effective configuration, and check decision outputs.",
    after_help = "Examples:\n  parley negotiate --script replies.json\n  parley negotiate --config parley.toml --max-rounds 5\n  parley config\n  parley check-decision 'TRUE_<1.0>'"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Run one negotiation to agreement or abort and print the outcome as JSON")]
    Negotiate {
        #[arg(long, help = "Config file to load instead of parley.toml")]
        config: Option<PathBuf>,
        #[arg(long, help = "JSON array of scripted gateway replies, replayed in call order")]
        script: Option<PathBuf>,
        #[arg(long, help = "Override negotiation.max_rounds")]
        max_rounds: Option<u32>,
        #[arg(long, help = "Override negotiation.resource_id")]
        resource: Option<String>,
        #[arg(long, default_value = "100", help = "Balance credited to the buyer before the run")]
        buyer_funds: Decimal,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config {
        #[arg(long, help = "Config file to load instead of parley.toml")]
        config: Option<PathBuf>,
    },
    #[command(about = "Parse one decision output with the strict TRUE_<price>/FALSE_<price> grammar")]
    CheckDecision {
        #[arg(help = "Raw gateway output to check")]
        output: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Negotiate { config, script, max_rounds, resource, buyer_funds } => {
            commands::negotiate::run(commands::negotiate::NegotiateArgs {
                config_path: config,
                script_path: script,
                max_rounds,
                resource_id: resource,
                buyer_funds,
                interactive: true,
            })
        }
        Command::Config { config } => commands::config::run(config.as_deref()),
        Command::CheckDecision { output } => commands::check_decision::run(&output),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

/// Logs go to stderr so command payloads on stdout stay machine-readable.
pub fn init_logging(logging: &LoggingConfig) {
    use parley_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    let installed = match logging.format {
        Compact => builder.compact().try_init(),
        Pretty => builder.pretty().try_init(),
        Json => builder.json().try_init(),
    };
    if installed.is_err() {
        tracing::debug!(event_name = "system.logging.already_initialized", "subscriber already set");
    }
}
