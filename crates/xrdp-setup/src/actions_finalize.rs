//! Session and service finalization for a fresh xrdp install.

use std::path::PathBuf;

use xrdp_setup_core::{DesktopEnvironment, SessionHints};

use crate::host::HostCommand;
use crate::model::{Effect, StageError};

use super::{apt_install, log_line, run_command, ActionContext};

/// First line of every session file this tool writes.
pub(crate) const MANAGED_MARKER: &str = "# Managed by xrdp-setup";

pub(crate) const XRDP_UNITS: &[&str] = &["xrdp.service", "xrdp-sesman.service"];

const GNOME_DATA_DIRS: &str = "/usr/share/ubuntu:/usr/local/share/:/usr/share/:/var/lib/snapd/desktop";

pub fn run_finalize(ctx: &mut ActionContext, effects: &mut Vec<Effect>) -> Result<(), StageError> {
    let desktop = ctx.environment.desktop;
    log_line(ctx, format!("Configuring the {} session", desktop.label()));

    let xsessionrc = xsessionrc_contents(desktop, &ctx.environment.session);
    let xsession = xsession_contents(desktop);
    let rc_path = ctx.paths.xsessionrc.clone();
    let session_path = ctx.paths.xsession.clone();
    write_tracked(ctx, rc_path, &xsessionrc, false, effects)?;
    write_tracked(ctx, session_path, &xsession, false, effects)?;

    let xwrapper = ctx.paths.xwrapper.clone();
    let current = ctx.host.read_file(&xwrapper);
    let updated = allow_any_user(current.as_deref());
    if current.as_deref() != Some(updated.as_str()) {
        write_tracked(ctx, xwrapper, &updated, true, effects)?;
    }

    if desktop == DesktopEnvironment::Gnome {
        apt_install(ctx, &["gnome-tweaks"], effects)?;
    }

    enable_units(ctx, effects)
}

fn write_tracked(
    ctx: &mut ActionContext,
    path: PathBuf,
    contents: &str,
    privileged: bool,
    effects: &mut Vec<Effect>,
) -> Result<(), StageError> {
    let previous = ctx.host.read_file(&path);
    ctx.host.write_file(&path, contents, privileged)?;
    log_line(ctx, format!("Wrote {}", path.display()));
    effects.push(Effect::FileWritten {
        path,
        previous,
        privileged,
    });
    Ok(())
}

fn enable_units(ctx: &mut ActionContext, effects: &mut Vec<Effect>) -> Result<(), StageError> {
    run_command(
        ctx,
        HostCommand::new("systemctl").arg("daemon-reload").privileged(),
    )?;

    let mut newly_enabled = Vec::new();
    for unit in XRDP_UNITS {
        let check = HostCommand::new("systemctl").args(["is-enabled", "--quiet", *unit]);
        let enabled = ctx.host.run(&check)?.success();
        if !enabled {
            newly_enabled.push(unit.to_string());
        }
    }

    if !newly_enabled.is_empty() {
        let enable = HostCommand::new("systemctl")
            .arg("enable")
            .args(newly_enabled.iter().cloned())
            .privileged();
        let result = run_command(ctx, enable);
        effects.push(Effect::ServicesEnabled(newly_enabled));
        result?;
    }

    run_command(
        ctx,
        HostCommand::new("systemctl")
            .args(["restart", "xrdp.service"])
            .privileged(),
    )
    .map(|_| ())
}

/// Command that starts the desktop inside an Xorg session.
pub(crate) fn session_command(desktop: DesktopEnvironment) -> &'static str {
    match desktop {
        DesktopEnvironment::Gnome => "gnome-session",
        DesktopEnvironment::Kde => "startplasma-x11",
        DesktopEnvironment::Xfce => "startxfce4",
        DesktopEnvironment::Mate => "mate-session",
        DesktopEnvironment::Cinnamon => "cinnamon-session",
        DesktopEnvironment::Budgie => "budgie-desktop",
        DesktopEnvironment::Lxqt => "startlxqt",
        DesktopEnvironment::Unknown => "x-session-manager",
    }
}

pub(crate) fn xsession_contents(desktop: DesktopEnvironment) -> String {
    format!("{MANAGED_MARKER}\nexec {}\n", session_command(desktop))
}

/// Environment exported before the remote session starts.
pub(crate) fn xsessionrc_contents(desktop: DesktopEnvironment, hints: &SessionHints) -> String {
    let mut lines = vec![MANAGED_MARKER.to_string()];
    match desktop {
        DesktopEnvironment::Gnome => {
            let mode = hints.session_mode.as_deref().unwrap_or("ubuntu");
            let current = hints.current_desktop.as_deref().unwrap_or("ubuntu:GNOME");
            let data_dirs = hints.data_dirs.as_deref().unwrap_or(GNOME_DATA_DIRS);
            let default_config = format!("/etc/xdg/xdg-{mode}:/etc/xdg");
            let config_dirs = hints.config_dirs.as_deref().unwrap_or(&default_config);
            lines.push(format!("export GNOME_SHELL_SESSION_MODE={mode}"));
            lines.push(format!("export XDG_CURRENT_DESKTOP={current}"));
            lines.push(format!("export XDG_DATA_DIRS={data_dirs}"));
            lines.push(format!("export XDG_CONFIG_DIRS={config_dirs}"));
        }
        DesktopEnvironment::Unknown => {}
        other => {
            let current = hints.current_desktop.as_deref().unwrap_or(other.label());
            lines.push(format!("export XDG_CURRENT_DESKTOP={current}"));
            if let Some(data_dirs) = hints.data_dirs.as_deref() {
                lines.push(format!("export XDG_DATA_DIRS={data_dirs}"));
            }
            if let Some(config_dirs) = hints.config_dirs.as_deref() {
                lines.push(format!("export XDG_CONFIG_DIRS={config_dirs}"));
            }
        }
    }
    lines.push(String::new());
    lines.join("\n")
}

/// Xwrapper config that lets non-console users start Xorg.
pub(crate) fn allow_any_user(current: Option<&str>) -> String {
    let Some(current) = current else {
        return "allowed_users=anybody\n".to_string();
    };
    let mut found = false;
    let mut lines = current
        .lines()
        .map(|line| {
            if line.trim_start().starts_with("allowed_users=") {
                found = true;
                "allowed_users=anybody".to_string()
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>();
    if !found {
        lines.push("allowed_users=anybody".to_string());
    }
    let mut updated = lines.join("\n");
    updated.push('\n');
    updated
}
