//! Event types used to coordinate the renderer and the worker thread.

use crate::actions::StageKind;
use crate::model::StageResult;

#[derive(Clone, Debug)]
pub enum ProgressEvent {
    StageStarted(StageKind),
    StageFinished(StageKind, StageResult),
    Command(String),
    Output(String),
    LogLine(String),
    RollbackStarted,
    RollbackStep { effect: String, error: Option<String> },
}
