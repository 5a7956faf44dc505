//! Best-effort compensation for a failed install run.
//!
//! Stages are undone in reverse order, and so are the effects inside each
//! stage. A compensation that fails is logged and reported, never raised.

use tracing::{error, info, warn};

use crate::events::ProgressEvent;
use crate::host::HostCommand;
use crate::model::{CompletedStage, Effect, RollbackReport, StageError};

use super::{log_line, run_command, ActionContext};

pub fn rollback(ctx: &mut ActionContext, completed: &[CompletedStage]) -> RollbackReport {
    let _ = ctx.log_tx.send(ProgressEvent::RollbackStarted);
    let mut report = RollbackReport::default();

    for stage in completed.iter().rev() {
        info!(stage = stage.kind.label(), effects = stage.effects.len(), "rolling back stage");
        for effect in stage.effects.iter().rev() {
            report.attempted += 1;
            let description = effect.describe();
            let outcome = compensate(ctx, effect);
            let error = outcome.err().map(|err| err.to_string());
            if let Some(reason) = error.as_ref() {
                error!(effect = %description, %reason, "rollback step failed");
                report.failures.push(format!("{description}: {reason}"));
            }
            let _ = ctx.log_tx.send(ProgressEvent::RollbackStep {
                effect: description,
                error,
            });
        }
    }

    report
}

fn compensate(ctx: &mut ActionContext, effect: &Effect) -> Result<(), StageError> {
    match effect {
        Effect::PackagesInstalled(packages) => {
            let purge = HostCommand::new("apt-get")
                .args(["purge", "-y", "--autoremove"])
                .args(packages.iter().cloned())
                .env("DEBIAN_FRONTEND", "noninteractive")
                .privileged();
            run_command(ctx, purge).map(|_| ())
        }
        // Build steps leave root-owned files in the tree.
        Effect::SourceTreeCloned(path) => Ok(ctx.host.remove_path(path, true)?),
        Effect::TreeMovedAside { path, backup } => {
            if ctx.host.path_exists(path) {
                ctx.host.remove_path(path, true)?;
            }
            let restore = HostCommand::new("mv")
                .arg("-T")
                .arg(backup.display().to_string())
                .arg(path.display().to_string())
                .privileged();
            run_command(ctx, restore).map(|_| ())
        }
        Effect::ModuleInstalled { source_dir } => {
            let uninstall = HostCommand::new("make")
                .arg("uninstall")
                .current_dir(source_dir)
                .privileged();
            run_command(ctx, uninstall).map(|_| ())
        }
        Effect::FileWritten {
            path,
            previous,
            privileged,
        } => match previous {
            Some(contents) => Ok(ctx.host.write_file(path, contents, *privileged)?),
            None => Ok(ctx.host.remove_path(path, *privileged)?),
        },
        Effect::ServicesEnabled(units) => {
            let disable = HostCommand::new("systemctl")
                .args(["disable", "--now"])
                .args(units.iter().cloned())
                .privileged();
            run_command(ctx, disable).map(|_| ())
        }
    }
}

/// Drop the trees parked by a run that succeeded.
pub fn discard_backups(ctx: &mut ActionContext, completed: &[CompletedStage]) {
    let backups = completed
        .iter()
        .flat_map(|stage| stage.effects.iter())
        .filter_map(|effect| match effect {
            Effect::TreeMovedAside { backup, .. } => Some(backup.clone()),
            _ => None,
        })
        .collect::<Vec<_>>();
    for backup in backups {
        if let Err(err) = ctx.host.remove_path(&backup, true) {
            warn!(%err, path = %backup.display(), "previous tree left in place");
            log_line(ctx, format!("Warning: could not remove {}", backup.display()));
        }
    }
}
