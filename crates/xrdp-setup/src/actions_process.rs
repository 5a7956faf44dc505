//! Command helpers shared by the stages.

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::events::ProgressEvent;
use crate::host::{HostCommand, ProcessError};
use crate::model::{Effect, StageError};

use super::ActionContext;

pub fn log_line(ctx: &ActionContext, line: impl Into<String>) {
    let _ = ctx.log_tx.send(ProgressEvent::LogLine(line.into()));
}

/// Run a command and turn a non-zero exit into a stage error.
pub fn run_command(ctx: &mut ActionContext, command: HostCommand) -> Result<String, StageError> {
    let output = ctx.host.run(&command)?;
    if output.success() {
        Ok(output.output)
    } else {
        Err(ProcessError::from_output(&command, &output).into())
    }
}

/// Subset of `candidates` that dpkg reports as installed.
pub fn installed_packages(
    ctx: &mut ActionContext,
    candidates: &[String],
) -> Result<BTreeSet<String>, StageError> {
    if candidates.is_empty() {
        return Ok(BTreeSet::new());
    }
    let query = HostCommand::new("dpkg-query")
        .args(["-W", "-f=${Package} ${Status}\\n"])
        .args(candidates.iter().cloned());
    // dpkg-query exits non-zero when any name is unknown; the output still lists the rest.
    let output = ctx.host.run(&query)?;
    Ok(parse_installed(&output.output))
}

pub(crate) fn parse_installed(output: &str) -> BTreeSet<String> {
    output
        .lines()
        .filter_map(|line| {
            let fields = line.split_whitespace().collect::<Vec<_>>();
            match fields.as_slice() {
                [name, _, _, "installed"] => Some((*name).to_string()),
                _ => None,
            }
        })
        .collect()
}

pub fn apt_update(ctx: &mut ActionContext) -> Result<(), StageError> {
    let update = HostCommand::new("apt-get")
        .arg("update")
        .env("DEBIAN_FRONTEND", "noninteractive")
        .privileged();
    run_command(ctx, update).map(|_| ())
}

/// Install packages and record the ones this run added, even when apt fails midway.
pub fn apt_install(
    ctx: &mut ActionContext,
    packages: &[&str],
    effects: &mut Vec<Effect>,
) -> Result<(), StageError> {
    let wanted = packages.iter().map(|name| name.to_string()).collect::<Vec<_>>();
    let before = installed_packages(ctx, &wanted)?;

    let install = HostCommand::new("apt-get")
        .args(["install", "-y"])
        .args(wanted.iter().cloned())
        .env("DEBIAN_FRONTEND", "noninteractive")
        .privileged();
    let result = run_command(ctx, install);

    let after = match installed_packages(ctx, &wanted) {
        Ok(after) => after,
        Err(err) => {
            debug!(%err, "post-install package query failed");
            BTreeSet::new()
        }
    };
    let added = wanted
        .into_iter()
        .filter(|name| after.contains(name) && !before.contains(name))
        .collect::<Vec<_>>();
    if !added.is_empty() {
        info!(packages = %added.join(" "), "packages installed");
        effects.push(Effect::PackagesInstalled(added));
    }

    result.map(|_| ())
}

/// Suffix of a tree parked by [`move_aside`].
const BACKUP_SUFFIX: &str = ".xrdp-setup-prev";

/// Fresh recursive clone into `dest`. An existing tree is parked, not deleted.
pub fn clone_repo(
    ctx: &mut ActionContext,
    url: &str,
    reference: Option<&str>,
    dest: &Path,
    effects: &mut Vec<Effect>,
) -> Result<(), StageError> {
    move_aside(ctx, dest, effects)?;

    let mut clone = HostCommand::new("git").args(["clone", "--recursive"]);
    if let Some(reference) = reference {
        clone = clone.args(["--branch", reference]);
    }
    let clone = clone.arg(url).arg(dest.display().to_string());
    let result = run_command(ctx, clone);

    // A half-finished clone still leaves a directory behind.
    if result.is_ok() || ctx.host.path_exists(dest) {
        effects.push(Effect::SourceTreeCloned(dest.to_path_buf()));
    }
    result.map(|_| ())
}

/// Rename an existing tree to its backup path so rollback can put it back.
///
/// Any older backup at that path is dropped first. Nothing happens when
/// `path` does not exist.
pub fn move_aside(
    ctx: &mut ActionContext,
    path: &Path,
    effects: &mut Vec<Effect>,
) -> Result<(), StageError> {
    if !ctx.host.path_exists(path) {
        return Ok(());
    }
    let backup = backup_path(path);
    if ctx.host.path_exists(&backup) {
        ctx.host.remove_path(&backup, true)?;
    }
    log_line(ctx, format!("Moving existing {} aside", path.display()));
    let park = HostCommand::new("mv")
        .arg("-T")
        .arg(path.display().to_string())
        .arg(backup.display().to_string())
        .privileged();
    run_command(ctx, park)?;
    effects.push(Effect::TreeMovedAside {
        path: path.to_path_buf(),
        backup,
    });
    Ok(())
}

pub(crate) fn backup_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(BACKUP_SUFFIX);
    path.with_file_name(name)
}

/// `./bootstrap`, `./configure`, `make -j` in a source tree.
pub fn build_autotools(
    ctx: &mut ActionContext,
    dir: &Path,
    configure_args: &[&str],
    configure_env: &[(&str, String)],
) -> Result<(), StageError> {
    run_command(ctx, HostCommand::new("./bootstrap").current_dir(dir))?;

    let mut configure = HostCommand::new("./configure")
        .args(configure_args.iter().copied())
        .current_dir(dir);
    for (key, value) in configure_env {
        configure = configure.env(*key, value.clone());
    }
    run_command(ctx, configure)?;

    let jobs = ctx.paths.jobs.max(1);
    run_command(
        ctx,
        HostCommand::new("make")
            .args(["-j".to_string(), jobs.to_string()])
            .current_dir(dir),
    )
    .map(|_| ())
}
