// ============================================================================
// src/main.rs – permission-log-sink entrypoint
// ============================================================================

use anyhow::Result;
use clap::{Parser, Subcommand};
use permission_log_sink::cmd::{doctor, serve, submit, verify};
use permission_log_sink::config::Config;
use permission_log_sink::event::PermissionEvent;
use permission_log_sink::ui::UX;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "permission-log-sink")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Config file (TOML by extension, YAML otherwise)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug diagnostics
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress non-error console output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sink until SIGTERM/SIGINT
    Serve,

    /// Send one permission event to a running sink
    Log {
        /// Caller-supplied epoch milliseconds (defaults to now)
        #[arg(long, allow_hyphen_values = true)]
        timestamp: Option<i64>,
        #[arg(long)]
        source: String,
        #[arg(long)]
        package: String,
        #[arg(long)]
        permission: String,
        #[arg(long)]
        outcome: String,
        #[arg(long)]
        details: Option<String>,
    },

    /// Check the log directory, log file and endpoint
    Doctor,

    /// Decode every record of the log file
    Verify {
        /// Log file to check (defaults to the configured one)
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = Config::resolve(cli.config.as_deref())?;

    let level = if cli.verbose {
        "debug"
    } else {
        cfg.logging.level.as_str()
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let ui = UX::new(cli.quiet);
    match cli.command {
        Commands::Serve => serve::run_serve(&cfg),
        Commands::Log {
            timestamp,
            source,
            package,
            permission,
            outcome,
            details,
        } => {
            let event = PermissionEvent {
                timestamp_millis: timestamp.unwrap_or_else(|| chrono::Utc::now().timestamp_millis()),
                source_component: source,
                package_name: package,
                permission,
                outcome,
                details,
            };
            submit::run_submit(&ui, &cfg, &event)
        }
        Commands::Doctor => doctor::run_doctor(&ui, &cfg),
        Commands::Verify { file } => {
            let path = file.unwrap_or_else(|| cfg.storage.log_path());
            verify::run_verify(&ui, &path)
        }
    }
}
