//! One installer run: admission, stages, rollback, and the ledger record.

use tracing::{error, info, warn};
use xrdp_setup_core::util::log_snippet;
use xrdp_setup_core::{reconcile, Decision, Ledger, LedgerEntry, LedgerError, RequestedMode};

use crate::events::ProgressEvent;
use crate::host::HostCommand;
use crate::model::{CompletedStage, RollbackReport, RunReport, StageResult};

use super::{
    build_plan, discard_backups, log_line, rollback, run_stage, stage_enabled, ActionContext,
    StageKind,
};

/// Drive a run to a terminal state.
///
/// Rejected runs return before any host command and leave the ledger
/// untouched. Every admitted run attempts exactly one ledger append. The
/// error case is limited to an unreadable ledger, which is checked before
/// anything changes.
pub fn execute_run(
    ctx: &mut ActionContext,
    ledger: &Ledger,
    preflight: Result<(), String>,
) -> Result<RunReport, LedgerError> {
    let requested = ctx.request.mode;
    let current = ledger.current_mode()?;
    info!(%current, %requested, "reconciling requested mode");

    let decision = match preflight {
        Err(reason) => Decision::Reject(reason),
        Ok(()) => reconcile(requested, current),
    };
    if !decision.is_proceed() {
        warn!(%decision, "run rejected");
        return Ok(RunReport::rejected(requested, decision));
    }

    let mut report = RunReport {
        requested,
        decision,
        stages: Vec::new(),
        rollback: None,
        ledger_error: None,
    };

    if let Err(reason) = prepare_ledger(ctx, ledger) {
        error!(%reason, "ledger is not writable; nothing was changed");
        report.ledger_error = Some(reason);
        return Ok(report);
    }

    let completed = run_plan(ctx, &mut report);

    if report.failure().is_some() && requested != RequestedMode::Remove {
        let rollback_report = rollback(ctx, &completed);
        if rollback_report.is_complete() {
            info!(steps = rollback_report.attempted, "rollback complete");
        } else {
            error!(failures = rollback_report.failures.len(), "rollback incomplete");
        }
        report.rollback = Some(rollback_report);
    } else if report.failure().is_none() {
        discard_backups(ctx, &completed);
    }

    let entry = ledger_entry(ctx, &report);
    if let Err(err) = ledger.append(&entry) {
        error!(%err, "failed to record the run");
        report.ledger_error = Some(err.to_string());
    }

    Ok(report)
}

/// Run planned stages in order, stopping at the first failure.
fn run_plan(ctx: &mut ActionContext, report: &mut RunReport) -> Vec<CompletedStage> {
    let mut completed = Vec::new();
    for kind in build_plan(report.requested) {
        if !stage_enabled(kind, ctx.request) {
            send(ctx, ProgressEvent::StageFinished(kind, StageResult::Skipped));
            report.stages.push((kind, StageResult::Skipped));
            continue;
        }

        send(ctx, ProgressEvent::StageStarted(kind));
        info!(stage = kind.label(), "stage started");
        let mut effects = Vec::new();
        let result = match run_stage(kind, ctx, &mut effects) {
            Ok(()) => StageResult::Success,
            Err(err) => {
                error!(stage = kind.label(), error = %log_snippet(&err.to_string()), "stage failed");
                StageResult::Failed(err)
            }
        };
        let failed = matches!(result, StageResult::Failed(_));
        completed.push(CompletedStage { kind, effects });
        send(ctx, ProgressEvent::StageFinished(kind, result.clone()));
        report.stages.push((kind, result));
        if failed {
            break;
        }
    }
    completed
}

/// Make sure the ledger directory exists and belongs to the operator.
fn prepare_ledger(ctx: &mut ActionContext, ledger: &Ledger) -> Result<(), String> {
    if ledger.is_writable() {
        return Ok(());
    }
    let directory = ledger.directory().to_path_buf();
    log_line(ctx, format!("Preparing ledger directory {}", directory.display()));
    let (uid, gid) = ctx.paths.owner;
    let create = HostCommand::new("install")
        .args(["-d", "-m", "755", "-o"])
        .arg(uid.to_string())
        .arg("-g")
        .arg(gid.to_string())
        .arg(directory.display().to_string())
        .privileged();
    let output = ctx.host.run(&create).map_err(|err| err.to_string())?;
    if !output.success() || !ledger.is_writable() {
        return Err(format!(
            "ledger directory {} is not writable",
            directory.display()
        ));
    }
    Ok(())
}

fn ledger_entry(ctx: &ActionContext, report: &RunReport) -> LedgerEntry {
    let flags = ctx.request.flags();
    let Some((kind, err)) = report.failure() else {
        let summary = format!(
            "{} run completed: {}",
            report.requested,
            stage_summary(&report.stages)
        );
        return LedgerEntry::succeeded(report.requested, flags, summary);
    };

    let mut summary = format!("{} failed: {}", kind.label(), err);
    if kind == StageKind::Removal {
        summary = format!("indeterminate state; {summary}");
    }
    LedgerEntry::failed(
        report.requested,
        flags,
        log_snippet(&summary),
        Some(kind.label().to_string()),
        report.rollback.as_ref().map(RollbackReport::is_complete),
    )
}

fn stage_summary(stages: &[(StageKind, StageResult)]) -> String {
    stages
        .iter()
        .map(|(kind, result)| format!("{} {}", kind.label(), result.label()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn send(ctx: &ActionContext, event: ProgressEvent) {
    let _ = ctx.log_tx.send(event);
}
