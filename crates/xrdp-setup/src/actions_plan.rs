//! Planning and dispatch for installer stages.
//!
//! Keeps the stage order in one place so install and removal runs stay
//! predictable.

use xrdp_setup_core::{RequestedConfiguration, RequestedMode};

use crate::model::{Effect, StageError};

use super::{run_base_install, run_finalize, run_gpu_toolkit, run_removal, run_sound, ActionContext};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StageKind {
    BaseInstall,
    Sound,
    GpuToolkit,
    Finalize,
    Removal,
}

impl StageKind {
    pub fn label(self) -> &'static str {
        match self {
            StageKind::BaseInstall => "Base install",
            StageKind::Sound => "Sound redirection",
            StageKind::GpuToolkit => "CUDA toolkit",
            StageKind::Finalize => "Finalize session",
            StageKind::Removal => "Remove xrdp",
        }
    }
}

pub fn build_plan(mode: RequestedMode) -> Vec<StageKind> {
    match mode {
        RequestedMode::Standard | RequestedMode::Custom => vec![
            StageKind::BaseInstall,
            StageKind::Sound,
            StageKind::GpuToolkit,
            StageKind::Finalize,
        ],
        RequestedMode::Remove => vec![StageKind::Removal],
    }
}

/// Optional stages are reported as skipped when their flag is off.
pub fn stage_enabled(kind: StageKind, request: &RequestedConfiguration) -> bool {
    match kind {
        StageKind::Sound => request.enable_sound,
        StageKind::GpuToolkit => request.install_cuda_toolkit,
        StageKind::BaseInstall | StageKind::Finalize | StageKind::Removal => true,
    }
}

pub fn run_stage(
    kind: StageKind,
    ctx: &mut ActionContext,
    effects: &mut Vec<Effect>,
) -> Result<(), StageError> {
    match kind {
        StageKind::BaseInstall => run_base_install(ctx, effects),
        StageKind::Sound => run_sound(ctx, effects),
        StageKind::GpuToolkit => run_gpu_toolkit(ctx, effects),
        StageKind::Finalize => run_finalize(ctx, effects),
        StageKind::Removal => run_removal(ctx),
    }
}
