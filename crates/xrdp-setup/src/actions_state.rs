//! Shared state handed to every stage.

use std::sync::mpsc::Sender;

use xrdp_setup_core::{Config, HostEnvironment, RequestedConfiguration};

use crate::detect::Probe;
use crate::events::ProgressEvent;
use crate::host::Host;
use crate::paths::InstallPaths;

pub struct ActionContext<'a> {
    pub request: &'a RequestedConfiguration,
    /// Snapshot taken once before reconciliation.
    pub environment: &'a HostEnvironment,
    pub paths: &'a InstallPaths,
    pub config: &'a Config,
    pub host: &'a mut dyn Host,
    pub probe: &'a dyn Probe,
    pub log_tx: Sender<ProgressEvent>,
}
