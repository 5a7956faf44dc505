//! Read-only diagnostics for the xrdp-setup installation ledger.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use xrdp_setup_core::{Config, Ledger, LedgerEntry};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Alternate config file.
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the current installation mode.
    Current,
    /// List recorded runs, oldest first.
    History {
        /// Emit raw JSON Lines.
        #[arg(long)]
        json: bool,
        /// Only show the most recent N entries.
        #[arg(long, value_name = "N")]
        limit: Option<usize>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = match args.config.as_ref() {
        Some(path) => Config::load_from_path(path).context("read config from path")?,
        None => Config::load_default().context("read default config")?,
    };
    let mut ledger = Ledger::new(config.ledger.path.clone());
    if let Some(marker) = config.ledger.legacy_marker.as_ref() {
        ledger = ledger.with_legacy_marker(marker.clone());
    }

    match args.command {
        Command::Current => {
            let mode = ledger.current_mode().context("read ledger")?;
            println!("{mode}");
        }
        Command::History { json, limit } => {
            let history = ledger.history().context("read ledger")?;
            let entries = tail(&history, limit);
            if json {
                for entry in entries {
                    println!("{}", serde_json::to_string(entry)?);
                }
            } else {
                println!(
                    "ledger {}: {} entries",
                    ledger.path().display(),
                    history.len()
                );
                for entry in entries {
                    println!("{}", format_entry(entry));
                }
            }
        }
    }

    Ok(())
}

fn tail(entries: &[LedgerEntry], limit: Option<usize>) -> &[LedgerEntry] {
    match limit {
        Some(limit) => &entries[entries.len().saturating_sub(limit)..],
        None => entries,
    }
}

fn format_entry(entry: &LedgerEntry) -> String {
    let mut line = format!(
        "- {time} {requested} -> {resulting} [flags: {flags}] {summary}",
        time = entry.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
        requested = entry.requested,
        resulting = entry.resulting,
        flags = entry.flags.describe(),
        summary = entry.summary
    );
    if let Some(complete) = entry.rollback_complete {
        line.push_str(if complete {
            " (rolled back)"
        } else {
            " (rollback incomplete)"
        });
    }
    line
}
