//! Mode-independent removal of xrdp and everything this tool configured.

use tracing::warn;

use crate::host::HostCommand;
use crate::model::StageError;

use super::actions_finalize::{MANAGED_MARKER, XRDP_UNITS};
use super::actions_sound::SOUND_MODULE_TREES;
use super::{installed_packages, log_line, module_installed, run_command, ActionContext};

const XRDP_PACKAGES: &[&str] = &["xrdp", "xorgxrdp"];

pub fn run_removal(ctx: &mut ActionContext) -> Result<(), StageError> {
    stop_units(ctx)?;
    uninstall_sound_modules(ctx)?;

    let candidates = XRDP_PACKAGES
        .iter()
        .map(|name| name.to_string())
        .collect::<Vec<_>>();
    let installed = installed_packages(ctx, &candidates)?;
    if installed.is_empty() {
        log_line(ctx, "No xrdp packages are installed");
    } else {
        let purge = HostCommand::new("apt-get")
            .args(["purge", "-y"])
            .args(installed.iter().cloned())
            .env("DEBIAN_FRONTEND", "noninteractive")
            .privileged();
        run_command(ctx, purge)?;
    }
    run_command(
        ctx,
        HostCommand::new("apt-get")
            .args(["autoremove", "-y"])
            .env("DEBIAN_FRONTEND", "noninteractive")
            .privileged(),
    )?;

    remove_session_files(ctx)?;
    remove_legacy_marker(ctx)
}

fn stop_units(ctx: &mut ActionContext) -> Result<(), StageError> {
    let disable = HostCommand::new("systemctl")
        .args(["disable", "--now"])
        .args(XRDP_UNITS.iter().copied())
        .privileged();
    let output = ctx.host.run(&disable)?;
    if !output.success() {
        warn!(command = %disable.label(), "xrdp units could not be disabled");
        log_line(ctx, "Warning: xrdp units are not present or could not be disabled");
    }
    Ok(())
}

fn uninstall_sound_modules(ctx: &mut ActionContext) -> Result<(), StageError> {
    for module in SOUND_MODULE_TREES {
        let dir = ctx.paths.source_dir(module);
        if !module_installed(ctx, &dir) {
            continue;
        }
        let uninstall = HostCommand::new("make")
            .arg("uninstall")
            .current_dir(&dir)
            .privileged();
        let output = ctx.host.run(&uninstall)?;
        if output.success() {
            log_line(ctx, format!("Uninstalled {module}"));
        } else {
            warn!(%module, "sound module uninstall failed");
            log_line(ctx, format!("Warning: could not uninstall {module}"));
        }
    }
    Ok(())
}

fn remove_session_files(ctx: &mut ActionContext) -> Result<(), StageError> {
    let files = [ctx.paths.xsessionrc.clone(), ctx.paths.xsession.clone()];
    for path in files {
        let Some(contents) = ctx.host.read_file(&path) else {
            continue;
        };
        if contents.lines().next() != Some(MANAGED_MARKER) {
            log_line(ctx, format!("Keeping {} (not managed by this tool)", path.display()));
            continue;
        }
        ctx.host.remove_path(&path, false)?;
        log_line(ctx, format!("Removed {}", path.display()));
    }
    Ok(())
}

fn remove_legacy_marker(ctx: &mut ActionContext) -> Result<(), StageError> {
    let Some(marker) = ctx.config.ledger.legacy_marker.clone() else {
        return Ok(());
    };
    if !ctx.host.path_exists(&marker) {
        return Ok(());
    }
    if let Err(err) = ctx.host.remove_path(&marker, true) {
        warn!(%err, marker = %marker.display(), "legacy marker left in place");
        log_line(ctx, format!("Warning: could not remove {}", marker.display()));
    }
    Ok(())
}
