//! xrdp-setup entrypoint: probe, admit, run stages, and record the outcome.

mod actions;
mod checks;
mod detect;
mod events;
#[cfg(test)]
mod fake;
mod host;
mod model;
mod paths;
mod render;
mod runtime_config;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::mpsc;
use std::thread;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use crossterm::style::Stylize;
use tracing::{info, warn};
use xrdp_setup_core::{Ledger, RequestedConfiguration, RequestedMode};

use crate::actions::{execute_run, format_checks, format_environment, ActionContext};
use crate::checks::Checks;
use crate::detect::{Probe, SystemProbe};
use crate::host::SystemHost;
use crate::model::{RunReport, RunStatus};
use crate::paths::{format_with_home, InstallPaths};
use crate::render::Renderer;
use crate::runtime_config::{init_tracing, load_config};

#[derive(Parser, Debug)]
#[command(author, version, about = "Install, customize, or remove xrdp")]
struct Args {
    /// Build xrdp and xorgxrdp from source instead of the distribution package.
    #[arg(short = 'c', long, conflicts_with = "remove")]
    custom: bool,
    /// Remove xrdp regardless of how it was installed.
    #[arg(short = 'r', long)]
    remove: bool,
    /// Build from the upstream development branch (custom only).
    #[arg(short = 'd', long)]
    dev: bool,
    /// Enable sound redirection.
    #[arg(short = 's', long)]
    sound: bool,
    /// Show every command and its output.
    #[arg(short = 'v', long)]
    verbose: bool,
    /// Install the CUDA toolkit (requires a loaded NVIDIA driver).
    #[arg(long)]
    cuda: bool,
    /// Build the Nexarian fork with GPU acceleration (custom only).
    #[arg(long)]
    nexarian: bool,
    /// Alternate config file.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

impl Args {
    fn requested_configuration(&self) -> RequestedConfiguration {
        let mode = if self.remove {
            RequestedMode::Remove
        } else if self.custom {
            RequestedMode::Custom
        } else {
            RequestedMode::Standard
        };
        let custom = mode == RequestedMode::Custom;
        if self.dev && !custom {
            warn!("--dev only applies to --custom builds; ignoring it");
        }
        if self.nexarian && !custom {
            warn!("--nexarian only applies to --custom builds; ignoring it");
        }
        RequestedConfiguration {
            mode,
            use_dev_branch: self.dev && custom,
            use_fork_variant: self.nexarian && custom,
            enable_sound: self.sound,
            install_cuda_toolkit: self.cuda,
            verbose: self.verbose,
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Ok(status) => ExitCode::from(status.exit_code()),
        Err(err) => {
            eprintln!("{} {err:#}", "error:".red().bold());
            ExitCode::from(1)
        }
    }
}

fn run(args: Args) -> Result<RunStatus> {
    let config = load_config(&args)?;
    init_tracing(&config, args.verbose);
    let request = args.requested_configuration();
    let paths = InstallPaths::discover(&config)?;

    let mut ledger = Ledger::new(config.ledger.path.clone());
    if let Some(marker) = config.ledger.legacy_marker.as_ref() {
        ledger = ledger.with_legacy_marker(marker.clone());
    }

    let environment = SystemProbe.probe();
    let checks = Checks::run(&environment.os);
    println!("{}", "Host".bold());
    for line in format_environment(&environment) {
        println!("{line}");
    }
    if request.verbose {
        println!("{}", "Preflight".bold());
        for line in format_checks(&checks) {
            println!("{line}");
        }
    }
    let preflight = checks.ready_for(request.mode);
    info!(
        mode = %request.mode,
        flags = %request.flags().describe(),
        downloads = %format_with_home(&paths.download_dir),
        "starting run"
    );

    let renderer = Renderer::new(request.verbose);
    let (log_tx, log_rx) = mpsc::channel();
    let worker = thread::spawn(move || {
        let mut host = SystemHost::new(log_tx.clone());
        let mut ctx = ActionContext {
            request: &request,
            environment: &environment,
            paths: &paths,
            config: &config,
            host: &mut host,
            probe: &SystemProbe,
            log_tx,
        };
        execute_run(&mut ctx, &ledger, preflight)
    });

    // Ends once the worker and its host drop their senders.
    for event in log_rx {
        renderer.render(&event);
    }

    let report = worker
        .join()
        .map_err(|_| anyhow!("installer worker panicked"))?
        .context("read installation ledger")?;
    print_outcome(&report);
    Ok(report.status())
}

fn print_outcome(report: &RunReport) {
    let status = report.status();
    match status {
        RunStatus::Succeeded => {
            println!(
                "{} xrdp is now in {} mode",
                "Success:".green().bold(),
                report.requested.target_mode()
            );
        }
        RunStatus::Rejected => {
            eprintln!("{} {}", "Rejected:".red().bold(), report.decision);
            eprintln!("Nothing was changed.");
        }
        RunStatus::StageFailed | RunStatus::RemovalFailed | RunStatus::LedgerWriteFailed => {
            if let Some((kind, err)) = report.failure() {
                eprintln!("{} {} failed: {err}", "Failed:".red().bold(), kind.label());
            }
            if status == RunStatus::RemovalFailed {
                eprintln!("The host is in an indeterminate state; rerun with --remove.");
            }
            match report.rollback.as_ref() {
                Some(rollback) if rollback.is_complete() => {
                    eprintln!("Rollback completed ({} steps).", rollback.attempted);
                }
                Some(rollback) => {
                    eprintln!(
                        "Rollback incomplete; {} of {} steps failed:",
                        rollback.failures.len(),
                        rollback.attempted
                    );
                    for failure in &rollback.failures {
                        eprintln!("- {failure}");
                    }
                }
                None => {}
            }
            if let Some(reason) = report.ledger_error.as_ref() {
                eprintln!(
                    "{} the run could not be recorded: {reason}",
                    "Ledger:".red().bold()
                );
            }
        }
    }
}
