//! Installation data model shared by the installer and diagnostics tools.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How xrdp is currently installed on the host.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallationMode {
    None,
    Standard,
    Custom,
}

impl InstallationMode {
    pub fn label(self) -> &'static str {
        match self {
            InstallationMode::None => "none",
            InstallationMode::Standard => "standard",
            InstallationMode::Custom => "custom",
        }
    }

    /// Parse the single-word marker written by the legacy installer script.
    pub fn from_marker(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "standard" => Some(InstallationMode::Standard),
            "custom" => Some(InstallationMode::Custom),
            _ => None,
        }
    }
}

impl fmt::Display for InstallationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Mode requested by the operator for one run.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestedMode {
    Standard,
    Custom,
    Remove,
}

impl RequestedMode {
    pub fn label(self) -> &'static str {
        match self {
            RequestedMode::Standard => "standard",
            RequestedMode::Custom => "custom",
            RequestedMode::Remove => "remove",
        }
    }

    /// Installation mode this request produces when it succeeds.
    pub fn target_mode(self) -> InstallationMode {
        match self {
            RequestedMode::Standard => InstallationMode::Standard,
            RequestedMode::Custom => InstallationMode::Custom,
            RequestedMode::Remove => InstallationMode::None,
        }
    }
}

impl fmt::Display for RequestedMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Optional features requested alongside the mode.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestFlags {
    pub sound: bool,
    pub cuda: bool,
    pub dev_branch: bool,
    pub fork_variant: bool,
}

impl RequestFlags {
    pub fn describe(&self) -> String {
        let mut enabled = Vec::new();
        if self.sound {
            enabled.push("sound");
        }
        if self.cuda {
            enabled.push("cuda");
        }
        if self.dev_branch {
            enabled.push("dev");
        }
        if self.fork_variant {
            enabled.push("nexarian");
        }
        if enabled.is_empty() {
            "none".to_string()
        } else {
            enabled.join(", ")
        }
    }
}

/// Validated options for one run. Built once and only read afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestedConfiguration {
    pub mode: RequestedMode,
    pub use_dev_branch: bool,
    pub use_fork_variant: bool,
    pub enable_sound: bool,
    pub install_cuda_toolkit: bool,
    pub verbose: bool,
}

impl RequestedConfiguration {
    pub fn flags(&self) -> RequestFlags {
        RequestFlags {
            sound: self.enable_sound,
            cuda: self.install_cuda_toolkit,
            dev_branch: self.use_dev_branch,
            fork_variant: self.use_fork_variant,
        }
    }

    pub fn is_removal(&self) -> bool {
        self.mode == RequestedMode::Remove
    }
}

/// Terminal state recorded for a run.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultingMode {
    None,
    Standard,
    Custom,
    Failed,
}

impl ResultingMode {
    /// Installation mode established by this result, `None` for failed runs.
    pub fn established_mode(self) -> Option<InstallationMode> {
        match self {
            ResultingMode::None => Some(InstallationMode::None),
            ResultingMode::Standard => Some(InstallationMode::Standard),
            ResultingMode::Custom => Some(InstallationMode::Custom),
            ResultingMode::Failed => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ResultingMode::None => "none",
            ResultingMode::Standard => "standard",
            ResultingMode::Custom => "custom",
            ResultingMode::Failed => "failed",
        }
    }
}

impl From<InstallationMode> for ResultingMode {
    fn from(mode: InstallationMode) -> Self {
        match mode {
            InstallationMode::None => ResultingMode::None,
            InstallationMode::Standard => ResultingMode::Standard,
            InstallationMode::Custom => ResultingMode::Custom,
        }
    }
}

impl fmt::Display for ResultingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One immutable ledger record per attempted run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub timestamp: DateTime<Utc>,
    pub requested: RequestedMode,
    pub resulting: ResultingMode,
    #[serde(default)]
    pub flags: RequestFlags,
    pub summary: String,
    /// Stage that failed, when the run did not succeed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<String>,
    /// Whether rollback undid every recorded effect; absent when no rollback ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_complete: Option<bool>,
}

impl LedgerEntry {
    pub fn succeeded(
        requested: RequestedMode,
        flags: RequestFlags,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            requested,
            resulting: requested.target_mode().into(),
            flags,
            summary: summary.into(),
            failed_stage: None,
            rollback_complete: None,
        }
    }

    pub fn failed(
        requested: RequestedMode,
        flags: RequestFlags,
        summary: impl Into<String>,
        failed_stage: Option<String>,
        rollback_complete: Option<bool>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            requested,
            resulting: ResultingMode::Failed,
            flags,
            summary: summary.into(),
            failed_stage,
            rollback_complete,
        }
    }

    pub fn is_success(&self) -> bool {
        self.resulting != ResultingMode::Failed
    }
}

/// Operating system identity read from os-release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsIdentity {
    /// Lowercase distribution id (`ubuntu`, `debian`), `unknown` if unreadable.
    pub id: String,
    pub version_id: String,
    pub pretty_name: String,
    pub codename: Option<String>,
}

impl OsIdentity {
    pub fn unknown() -> Self {
        Self {
            id: "unknown".to_string(),
            version_id: String::new(),
            pretty_name: "unknown".to_string(),
            codename: None,
        }
    }

    pub fn is_debian(&self) -> bool {
        self.id == "debian"
    }

    pub fn is_ubuntu(&self) -> bool {
        self.id == "ubuntu"
    }

    pub fn is_supported(&self) -> bool {
        match self.id.as_str() {
            "ubuntu" => matches!(self.version_id.as_str(), "20.04" | "22.04" | "24.04"),
            "debian" => matches!(self.version_id.as_str(), "11" | "12"),
            _ => false,
        }
    }

    /// Repository slug used by vendor package repositories, e.g. `ubuntu2404`.
    pub fn repo_slug(&self) -> Option<String> {
        if !self.is_supported() {
            return None;
        }
        Some(format!("{}{}", self.id, self.version_id.replace('.', "")))
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DesktopEnvironment {
    Gnome,
    Kde,
    Xfce,
    Mate,
    Cinnamon,
    Budgie,
    Lxqt,
    Unknown,
}

impl DesktopEnvironment {
    pub fn label(self) -> &'static str {
        match self {
            DesktopEnvironment::Gnome => "GNOME",
            DesktopEnvironment::Kde => "KDE",
            DesktopEnvironment::Xfce => "XFCE",
            DesktopEnvironment::Mate => "MATE",
            DesktopEnvironment::Cinnamon => "Cinnamon",
            DesktopEnvironment::Budgie => "Budgie",
            DesktopEnvironment::Lxqt => "LXQt",
            DesktopEnvironment::Unknown => "unknown",
        }
    }

    /// Classify an `XDG_CURRENT_DESKTOP` style value (colon separated).
    pub fn from_desktop_string(value: &str) -> Self {
        for part in value.split(':') {
            let part = part.trim().to_ascii_lowercase();
            let desktop = match part.as_str() {
                "gnome" | "gnome-classic" | "gnome-flashback" => DesktopEnvironment::Gnome,
                "kde" | "plasma" => DesktopEnvironment::Kde,
                "xfce" => DesktopEnvironment::Xfce,
                "mate" => DesktopEnvironment::Mate,
                "x-cinnamon" | "cinnamon" => DesktopEnvironment::Cinnamon,
                "budgie" | "budgie-desktop" => DesktopEnvironment::Budgie,
                "lxqt" => DesktopEnvironment::Lxqt,
                _ => continue,
            };
            return desktop;
        }
        DesktopEnvironment::Unknown
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AudioSubsystem {
    PipeWire,
    PulseAudio,
    None,
}

impl AudioSubsystem {
    pub fn label(self) -> &'static str {
        match self {
            AudioSubsystem::PipeWire => "PipeWire",
            AudioSubsystem::PulseAudio => "PulseAudio",
            AudioSubsystem::None => "none",
        }
    }
}

/// Raw session identifiers carried into the generated session files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionHints {
    pub current_desktop: Option<String>,
    pub session_mode: Option<String>,
    pub desktop_session: Option<String>,
    pub data_dirs: Option<String>,
    pub config_dirs: Option<String>,
}

/// Read-only snapshot of the host taken at the start of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEnvironment {
    pub os: OsIdentity,
    pub desktop: DesktopEnvironment,
    pub session: SessionHints,
    pub audio: AudioSubsystem,
    pub gpu_driver: bool,
    /// Xorg hardware-enablement stack installed (Ubuntu only).
    pub xorg_hwe: bool,
}
