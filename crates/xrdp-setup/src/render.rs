//! Line-oriented progress rendering for the terminal.

use crossterm::style::{StyledContent, Stylize};

use crate::events::ProgressEvent;
use crate::model::StageResult;

pub struct Renderer {
    verbose: bool,
}

impl Renderer {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    pub fn render(&self, event: &ProgressEvent) {
        if let Some(line) = self.format(event) {
            println!("{line}");
        }
    }

    /// Rendered line for an event, `None` when the event is hidden.
    fn format(&self, event: &ProgressEvent) -> Option<String> {
        match event {
            ProgressEvent::StageStarted(kind) => {
                Some(format!("{} {}", "==>".cyan().bold(), kind.label().bold()))
            }
            ProgressEvent::StageFinished(kind, result) => {
                let mut line = format!("{} {}", status_tag(result), kind.label());
                if let StageResult::Failed(err) = result {
                    line.push_str(&format!(": {err}"));
                }
                Some(line)
            }
            ProgressEvent::Command(label) if self.verbose => {
                Some(format!("{} {}", "$".dark_grey(), label))
            }
            ProgressEvent::Output(line) if self.verbose => Some(format!("    {line}")),
            ProgressEvent::Command(_) | ProgressEvent::Output(_) => None,
            ProgressEvent::LogLine(line) => Some(format!("    {line}")),
            ProgressEvent::RollbackStarted => Some(format!(
                "{} rolling back changes from this run",
                "==>".yellow().bold()
            )),
            ProgressEvent::RollbackStep { effect, error } => Some(match error {
                None => format!("    {} undo {effect}", "ok".green()),
                Some(reason) => format!("    {} undo {effect}: {reason}", "failed".red()),
            }),
        }
    }
}

fn status_tag(result: &StageResult) -> StyledContent<&'static str> {
    match result {
        StageResult::Success => "[done]".green(),
        StageResult::Skipped => "[skipped]".yellow(),
        StageResult::Failed(_) => "[failed]".red().bold(),
    }
}
