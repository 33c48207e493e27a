//! opticache-replay - Feeds recorded cache events through the engine.

mod output;
mod replay;

use std::path::PathBuf;

use cache_config_and_utils::{init_logging, Config, Paths};
use clap::{Parser, Subcommand};
use tracing::info;

use crate::replay::ReplayOptions;

/// Replay recorded cache events and inspect the resulting state.
#[derive(Parser)]
#[command(name = "opticache-replay")]
#[command(about = "Replay JSONL cache events and print query results")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(short, long, default_value = "text", global = true)]
    format: output::OutputFormat,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "OPTICACHE_LOG_LEVEL", global = true)]
    log_level: Option<String>,

    /// Base directory for config and logs. Defaults to ~/.opticache
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply every event in a JSONL file (`-` for stdin)
    Replay {
        /// Event file, one wire event per line
        events: PathBuf,

        /// Only print these query aliases (repeatable)
        #[arg(short, long = "alias")]
        aliases: Vec<String>,

        /// Print the whole final snapshot instead of query results
        #[arg(long)]
        snapshot: bool,

        /// Keep query results when a listener detaches without saying
        #[arg(long)]
        preserve_cache: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    let mut config = Config::load(&paths)?;
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    init_logging(&paths, "opticache-replay", &config.log_level)?;

    match cli.command {
        Commands::Replay {
            events,
            aliases,
            snapshot,
            preserve_cache,
        } => {
            let mut reducer = config.reducer_options();
            reducer.preserve_cache_after_unset |= preserve_cache;
            info!(path = %events.display(), "replaying events");

            let report = replay::replay_path(
                &events,
                &ReplayOptions {
                    reducer,
                    aliases,
                },
            )?;
            if snapshot {
                output::print_json(&report.snapshot);
            } else {
                output::print(&report, &cli.format);
            }
        }
    }

    Ok(())
}
