//! Sound redirection stage for PipeWire and PulseAudio hosts.

use std::path::Path;

use xrdp_setup_core::AudioSubsystem;

use crate::host::HostCommand;
use crate::model::{Effect, StageError};

use super::{
    apt_install, build_autotools, clone_repo, log_line, move_aside, run_command, ActionContext,
};

const PIPEWIRE_MODULE: &str = "pipewire-module-xrdp";
const PULSEAUDIO_MODULE: &str = "pulseaudio-module-xrdp";
const PULSEAUDIO_SOURCES: &str = "pulseaudio.src";

const PIPEWIRE_BUILD_DEPS: &[&str] = &[
    "git",
    "pkg-config",
    "autotools-dev",
    "libtool",
    "make",
    "gcc",
    "libpipewire-0.3-dev",
    "libspa-0.2-dev",
];

const PULSEAUDIO_BUILD_DEPS: &[&str] = &[
    "git",
    "build-essential",
    "dpkg-dev",
    "autoconf",
    "libtool",
    "libpulse-dev",
];

/// Source trees that may hold an installed sound module.
pub(crate) const SOUND_MODULE_TREES: &[&str] = &[PIPEWIRE_MODULE, PULSEAUDIO_MODULE];

pub fn run_sound(ctx: &mut ActionContext, effects: &mut Vec<Effect>) -> Result<(), StageError> {
    match ctx.environment.audio {
        AudioSubsystem::None => Err(StageError::Precondition(
            "no sound server detected (PipeWire or PulseAudio required)".to_string(),
        )),
        AudioSubsystem::PipeWire => install_pipewire_module(ctx, effects),
        AudioSubsystem::PulseAudio => install_pulseaudio_module(ctx, effects),
    }
}

fn install_pipewire_module(ctx: &mut ActionContext, effects: &mut Vec<Effect>) -> Result<(), StageError> {
    log_line(ctx, "Building the PipeWire xrdp module");
    apt_install(ctx, PIPEWIRE_BUILD_DEPS, effects)?;

    let dir = ctx.paths.source_dir(PIPEWIRE_MODULE);
    let preinstalled = module_installed(ctx, &dir);
    let url = module_url(&ctx.config.sources.upstream_owner, PIPEWIRE_MODULE);
    clone_repo(ctx, &url, None, &dir, effects)?;
    build_autotools(ctx, &dir, &[], &[])?;
    install_module(ctx, &dir, preinstalled, effects)
}

fn install_pulseaudio_module(ctx: &mut ActionContext, effects: &mut Vec<Effect>) -> Result<(), StageError> {
    log_line(ctx, "Building the PulseAudio xrdp module");
    apt_install(ctx, PULSEAUDIO_BUILD_DEPS, effects)?;

    let dir = ctx.paths.source_dir(PULSEAUDIO_MODULE);
    let preinstalled = module_installed(ctx, &dir);
    let url = module_url(&ctx.config.sources.upstream_owner, PULSEAUDIO_MODULE);
    clone_repo(ctx, &url, None, &dir, effects)?;

    // The module compiles against the configured PulseAudio source tree.
    let pulse_dir = ctx.paths.source_dir(PULSEAUDIO_SOURCES);
    move_aside(ctx, &pulse_dir, effects)?;
    let fetch_sources = HostCommand::new("./scripts/install_pulseaudio_sources_apt.sh")
        .arg("-d")
        .arg(pulse_dir.display().to_string())
        .current_dir(&dir);
    let fetched = run_command(ctx, fetch_sources);
    if fetched.is_ok() || ctx.host.path_exists(&pulse_dir) {
        effects.push(Effect::SourceTreeCloned(pulse_dir.clone()));
    }
    fetched?;

    let pulse_env = [("PULSE_DIR", pulse_dir.display().to_string())];
    build_autotools(ctx, &dir, &[], &pulse_env)?;
    install_module(ctx, &dir, preinstalled, effects)
}

/// A configured tree means `make install` ran from it on an earlier run.
pub(crate) fn module_installed(ctx: &ActionContext, dir: &Path) -> bool {
    ctx.host.path_exists(&dir.join("Makefile"))
}

fn install_module(
    ctx: &mut ActionContext,
    dir: &Path,
    preinstalled: bool,
    effects: &mut Vec<Effect>,
) -> Result<(), StageError> {
    let install = HostCommand::new("make")
        .arg("install")
        .current_dir(dir)
        .privileged();
    let result = run_command(ctx, install);
    // A module that predates this run stays installed on rollback; its
    // parked tree comes back with it.
    if preinstalled {
        log_line(ctx, format!("Installing over the existing module from {}", dir.display()));
    } else {
        // A partial `make install` still leaves files to uninstall.
        effects.push(Effect::ModuleInstalled {
            source_dir: dir.to_path_buf(),
        });
    }
    result.map(|_| ())
}

fn module_url(owner: &str, module: &str) -> String {
    format!("https://github.com/{owner}/{module}.git")
}
