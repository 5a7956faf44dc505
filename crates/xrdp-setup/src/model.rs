//! Shared installer types for stage results, effects, and run reports.

use std::path::PathBuf;

use thiserror::Error;
use xrdp_setup_core::{Decision, RequestedMode};

use crate::actions::StageKind;
use crate::host::ProcessError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StageError {
    #[error("precondition failed: {0}")]
    Precondition(String),
    #[error(transparent)]
    Process(#[from] ProcessError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StageResult {
    Success,
    Skipped,
    Failed(StageError),
}

impl StageResult {
    pub fn label(&self) -> &'static str {
        match self {
            StageResult::Success => "done",
            StageResult::Skipped => "skipped",
            StageResult::Failed(_) => "failed",
        }
    }
}

/// A host change made by a stage, with enough detail to undo it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    /// Packages that were not installed before this run.
    PackagesInstalled(Vec<String>),
    SourceTreeCloned(PathBuf),
    /// A tree that predates this run, renamed to `backup`.
    TreeMovedAside { path: PathBuf, backup: PathBuf },
    /// `make install` ran in this tree and no module was installed from it before.
    ModuleInstalled { source_dir: PathBuf },
    FileWritten {
        path: PathBuf,
        previous: Option<String>,
        privileged: bool,
    },
    ServicesEnabled(Vec<String>),
}

impl Effect {
    pub fn describe(&self) -> String {
        match self {
            Effect::PackagesInstalled(packages) => {
                format!("installed packages {}", packages.join(" "))
            }
            Effect::SourceTreeCloned(path) => format!("cloned {}", path.display()),
            Effect::TreeMovedAside { path, .. } => format!("moved aside {}", path.display()),
            Effect::ModuleInstalled { source_dir } => {
                format!("installed module from {}", source_dir.display())
            }
            Effect::FileWritten { path, previous, .. } => match previous {
                Some(_) => format!("updated {}", path.display()),
                None => format!("created {}", path.display()),
            },
            Effect::ServicesEnabled(units) => format!("enabled {}", units.join(" ")),
        }
    }
}

/// Effects recorded by one stage, including a stage that failed midway.
#[derive(Clone, Debug)]
pub struct CompletedStage {
    pub kind: StageKind,
    pub effects: Vec<Effect>,
}

#[derive(Clone, Debug, Default)]
pub struct RollbackReport {
    pub attempted: usize,
    pub failures: Vec<String>,
}

impl RollbackReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct RunReport {
    pub requested: RequestedMode,
    pub decision: Decision,
    pub stages: Vec<(StageKind, StageResult)>,
    pub rollback: Option<RollbackReport>,
    pub ledger_error: Option<String>,
}

impl RunReport {
    pub fn rejected(requested: RequestedMode, decision: Decision) -> Self {
        Self {
            requested,
            decision,
            stages: Vec::new(),
            rollback: None,
            ledger_error: None,
        }
    }

    pub fn failure(&self) -> Option<(StageKind, &StageError)> {
        self.stages.iter().find_map(|(kind, result)| match result {
            StageResult::Failed(err) => Some((*kind, err)),
            _ => None,
        })
    }

    pub fn status(&self) -> RunStatus {
        if !self.decision.is_proceed() {
            return RunStatus::Rejected;
        }
        if self.ledger_error.is_some() {
            return RunStatus::LedgerWriteFailed;
        }
        match self.failure() {
            Some(_) if self.requested == RequestedMode::Remove => RunStatus::RemovalFailed,
            Some(_) => RunStatus::StageFailed,
            None => RunStatus::Succeeded,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RunStatus {
    Succeeded,
    Rejected,
    StageFailed,
    RemovalFailed,
    LedgerWriteFailed,
}

impl RunStatus {
    pub fn exit_code(self) -> u8 {
        match self {
            RunStatus::Succeeded => 0,
            RunStatus::Rejected => 3,
            RunStatus::StageFailed => 4,
            RunStatus::RemovalFailed => 5,
            RunStatus::LedgerWriteFailed => 6,
        }
    }
}
