//! Base install stage: distribution packages or source-built xrdp.

use std::path::Path;

use tracing::info;
use xrdp_setup_core::{RequestedMode, SourcesConfig};

use crate::host::HostCommand;
use crate::model::{Effect, StageError};

use super::{
    apt_install, apt_update, build_autotools, clone_repo, installed_packages, log_line,
    run_command, ActionContext,
};

const BUILD_PREREQUISITES: &[&str] = &[
    "git",
    "jq",
    "xvfb",
    "libmp3lame-dev",
    "curl",
    "libfuse-dev",
    "libx11-dev",
    "libxfixes-dev",
    "libssl-dev",
    "libpam0g-dev",
    "libtool",
    "libjpeg-dev",
    "flex",
    "bison",
    "gettext",
    "autoconf",
    "libxml-parser-perl",
    "xsltproc",
    "libxrandr-dev",
    "python3-libxml2",
    "nasm",
    "pkg-config",
    "intltool",
    "checkinstall",
];

const XRDP_CONFIGURE_ARGS: &[&str] = &[
    "--enable-fuse",
    "--enable-jpeg",
    "--enable-rfxcodec",
    "--enable-mp3lame",
    "--enable-vsock",
];

/// Where the xrdp and xorgxrdp sources come from for one run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct SourceSelection {
    pub owner: String,
    pub xrdp_ref: String,
    pub xorgxrdp_ref: String,
}

impl SourceSelection {
    pub(crate) fn choose(sources: &SourcesConfig, dev_branch: bool, fork_variant: bool) -> Self {
        if fork_variant {
            return Self {
                owner: sources.fork_owner.clone(),
                xrdp_ref: sources.fork_branch.clone(),
                xorgxrdp_ref: sources.fork_branch.clone(),
            };
        }
        if dev_branch {
            return Self {
                owner: sources.upstream_owner.clone(),
                xrdp_ref: sources.dev_branch.clone(),
                xorgxrdp_ref: sources.dev_branch.clone(),
            };
        }
        Self {
            owner: sources.upstream_owner.clone(),
            xrdp_ref: sources.xrdp_stable_ref.clone(),
            xorgxrdp_ref: sources.xorgxrdp_stable_ref.clone(),
        }
    }

    pub(crate) fn repo_url(&self, repo: &str) -> String {
        format!("https://github.com/{}/{repo}.git", self.owner)
    }
}

pub fn run_base_install(ctx: &mut ActionContext, effects: &mut Vec<Effect>) -> Result<(), StageError> {
    prepare_apt(ctx, effects)?;
    // pactl is what the sound probe relies on.
    apt_install(ctx, &["pulseaudio-utils"], effects)?;

    match ctx.request.mode {
        RequestedMode::Standard => {
            log_line(ctx, "Installing xrdp from the distribution archive");
            apt_install(ctx, &["xrdp"], effects)
        }
        RequestedMode::Custom => install_from_source(ctx, effects),
        RequestedMode::Remove => Err(StageError::Precondition(
            "base install does not run for removal".to_string(),
        )),
    }
}

fn prepare_apt(ctx: &mut ActionContext, effects: &mut Vec<Effect>) -> Result<(), StageError> {
    if !ctx.environment.os.is_debian() {
        return Ok(());
    }
    let sources = ctx.paths.apt_sources.clone();
    if let Some(current) = ctx.host.read_file(&sources) {
        let updated = disable_cdrom_sources(&current);
        if updated != current {
            log_line(ctx, "Disabling cdrom apt sources");
            ctx.host.write_file(&sources, &updated, true)?;
            effects.push(Effect::FileWritten {
                path: sources,
                previous: Some(current),
                privileged: true,
            });
        }
    }
    apt_update(ctx)
}

pub(crate) fn disable_cdrom_sources(contents: &str) -> String {
    let mut updated = contents
        .lines()
        .map(|line| {
            if line.trim_start().starts_with("deb cdrom:") {
                format!("#{line}")
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n");
    if contents.ends_with('\n') {
        updated.push('\n');
    }
    updated
}

fn install_from_source(ctx: &mut ActionContext, effects: &mut Vec<Effect>) -> Result<(), StageError> {
    log_line(ctx, "Installing build prerequisites");
    apt_install(ctx, BUILD_PREREQUISITES, effects)?;

    let release = ctx.environment.os.version_id.clone();
    let dev = format!("xserver-xorg-dev-hwe-{release}");
    let core = format!("xserver-xorg-core-hwe-{release}");
    if ctx.environment.xorg_hwe {
        apt_install(ctx, &[dev.as_str(), core.as_str()], effects)?;
    } else {
        apt_install(ctx, &["xserver-xorg-dev", "xserver-xorg-core"], effects)?;
    }

    let selection = SourceSelection::choose(
        &ctx.config.sources,
        ctx.request.use_dev_branch,
        ctx.request.use_fork_variant,
    );
    info!(
        owner = %selection.owner,
        xrdp = %selection.xrdp_ref,
        xorgxrdp = %selection.xorgxrdp_ref,
        "building xrdp from source"
    );

    let xrdp_dir = ctx.paths.source_dir("xrdp");
    let xorgxrdp_dir = ctx.paths.source_dir("xorgxrdp");
    clone_repo(
        ctx,
        &selection.repo_url("xrdp"),
        Some(&selection.xrdp_ref),
        &xrdp_dir,
        effects,
    )?;
    clone_repo(
        ctx,
        &selection.repo_url("xorgxrdp"),
        Some(&selection.xorgxrdp_ref),
        &xorgxrdp_dir,
        effects,
    )?;

    build_autotools(ctx, &xrdp_dir, XRDP_CONFIGURE_ARGS, &[])?;
    register_package(ctx, &xrdp_dir, "xrdp", &selection.xrdp_ref, effects)?;

    build_autotools(ctx, &xorgxrdp_dir, &[], &[])?;
    register_package(ctx, &xorgxrdp_dir, "xorgxrdp", &selection.xorgxrdp_ref, effects)
}

/// Install a built tree as a dpkg package so removal can purge it.
fn register_package(
    ctx: &mut ActionContext,
    dir: &Path,
    name: &str,
    reference: &str,
    effects: &mut Vec<Effect>,
) -> Result<(), StageError> {
    let names = [name.to_string()];
    let before = installed_packages(ctx, &names)?;
    let checkinstall = HostCommand::new("checkinstall")
        .arg(format!("--pkgname={name}"))
        .arg(format!("--pkgversion={}", package_version(reference)))
        .arg("--default")
        .current_dir(dir)
        .privileged();
    let result = run_command(ctx, checkinstall);
    let after = installed_packages(ctx, &names).unwrap_or_default();
    if after.contains(name) && !before.contains(name) {
        effects.push(Effect::PackagesInstalled(vec![name.to_string()]));
    }
    result.map(|_| ())
}

/// dpkg versions must start with a digit; branch names get a placeholder.
pub(crate) fn package_version(reference: &str) -> String {
    let trimmed = reference.strip_prefix('v').unwrap_or(reference);
    if trimmed.starts_with(|ch: char| ch.is_ascii_digit()) {
        return trimmed.to_string();
    }
    let sanitized = reference
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '.' })
        .collect::<String>();
    format!("0.0.0+{sanitized}")
}
