//! Installer stage orchestration and shared exports.

#[path = "actions_base.rs"]
mod actions_base;
#[path = "actions_finalize.rs"]
mod actions_finalize;
#[path = "actions_format.rs"]
mod actions_format;
#[path = "actions_gpu.rs"]
mod actions_gpu;
#[path = "actions_plan.rs"]
mod actions_plan;
#[path = "actions_process.rs"]
mod actions_process;
#[path = "actions_remove.rs"]
mod actions_remove;
#[path = "actions_rollback.rs"]
mod actions_rollback;
#[path = "actions_run.rs"]
mod actions_run;
#[path = "actions_sound.rs"]
mod actions_sound;
#[path = "actions_state.rs"]
mod actions_state;

pub use actions_format::{format_checks, format_environment};
pub use actions_plan::{build_plan, run_stage, stage_enabled, StageKind};
pub use actions_run::execute_run;
pub use actions_state::ActionContext;

pub(super) use actions_base::run_base_install;
pub(super) use actions_finalize::run_finalize;
pub(super) use actions_gpu::run_gpu_toolkit;
pub(super) use actions_process::{
    apt_install, apt_update, build_autotools, clone_repo, installed_packages, log_line,
    move_aside, run_command,
};
pub(super) use actions_remove::run_removal;
pub(super) use actions_rollback::{discard_backups, rollback};
pub(super) use actions_sound::{module_installed, run_sound};

#[cfg(test)]
#[path = "actions_tests.rs"]
mod actions_tests;
