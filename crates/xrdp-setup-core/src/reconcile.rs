//! Table-driven admission of a requested mode against the recorded mode.

use std::fmt;

use crate::model::{InstallationMode, RequestedMode};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Proceed,
    Reject(String),
    RequireRemovalFirst {
        current: InstallationMode,
        requested: RequestedMode,
    },
}

impl Decision {
    pub fn is_proceed(&self) -> bool {
        matches!(self, Decision::Proceed)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Proceed => f.write_str("proceed"),
            Decision::Reject(reason) => write!(f, "rejected: {reason}"),
            Decision::RequireRemovalFirst { current, requested } => write!(
                f,
                "xrdp is installed in {current} mode; run with --remove before a {requested} install"
            ),
        }
    }
}

/// Decide whether a run may proceed. Standard and custom installs never mix.
pub fn reconcile(requested: RequestedMode, current: InstallationMode) -> Decision {
    match (current, requested) {
        (_, RequestedMode::Remove) => Decision::Proceed,
        (InstallationMode::None, _) => Decision::Proceed,
        (InstallationMode::Standard, RequestedMode::Standard) => Decision::Proceed,
        (InstallationMode::Custom, RequestedMode::Custom) => Decision::Proceed,
        (InstallationMode::Standard, RequestedMode::Custom)
        | (InstallationMode::Custom, RequestedMode::Standard) => {
            Decision::RequireRemovalFirst { current, requested }
        }
    }
}
