//! Read-only host inspection for install workflows.
//!
//! Sub-probes that cannot reach a conclusion degrade to `Unknown`/`None`
//! with a warning instead of failing the run.

use std::env;
use std::fs;
use std::path::Path;
use std::process::Command;

use thiserror::Error;
use tracing::{debug, warn};
use xrdp_setup_core::{AudioSubsystem, DesktopEnvironment, HostEnvironment, OsIdentity, SessionHints};

const OS_RELEASE: &str = "/etc/os-release";
const PROC_MODULES: &str = "/proc/modules";
const NVIDIA_DRIVER_VERSION: &str = "/proc/driver/nvidia/version";

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to read {path}: {reason}")]
    Unreadable { path: String, reason: String },
    #[error("{0} did not identify the distribution")]
    Incomplete(String),
    #[error("{what} is inconclusive: {reason}")]
    Inconclusive { what: &'static str, reason: String },
}

pub trait Probe {
    fn probe(&self) -> HostEnvironment;

    /// Fresh GPU driver check, taken right before toolkit installation.
    fn gpu_driver_loaded(&self) -> bool;
}

/// Probe backed by the running system.
pub struct SystemProbe;

impl Probe for SystemProbe {
    fn probe(&self) -> HostEnvironment {
        let os = detect_os().unwrap_or_else(|err| {
            warn!(%err, "operating system probe degraded to unknown");
            OsIdentity::unknown()
        });
        let session = session_hints(|key| env::var(key).ok());
        let desktop = detect_desktop(&session);
        let audio = detect_audio().unwrap_or_else(|err| {
            warn!(%err, "audio probe degraded to none");
            AudioSubsystem::None
        });
        let gpu_driver = self.gpu_driver_loaded();
        let xorg_hwe = detect_xorg_hwe(&os);

        let environment = HostEnvironment {
            os,
            desktop,
            session,
            audio,
            gpu_driver,
            xorg_hwe,
        };
        debug!(?environment, "host environment probed");
        environment
    }

    fn gpu_driver_loaded(&self) -> bool {
        if Path::new(NVIDIA_DRIVER_VERSION).exists() {
            return true;
        }
        match fs::read_to_string(PROC_MODULES) {
            Ok(modules) => modules_include_gpu_driver(&modules),
            Err(err) => {
                warn!(%err, "unable to read loaded kernel modules");
                false
            }
        }
    }
}

fn detect_os() -> Result<OsIdentity, ProbeError> {
    let contents = fs::read_to_string(OS_RELEASE).map_err(|err| ProbeError::Unreadable {
        path: OS_RELEASE.to_string(),
        reason: err.to_string(),
    })?;
    parse_os_release(&contents).ok_or_else(|| ProbeError::Incomplete(OS_RELEASE.to_string()))
}

/// Parse os-release key/value content; `None` when `ID` is missing.
pub fn parse_os_release(contents: &str) -> Option<OsIdentity> {
    let mut id = None;
    let mut version_id = String::new();
    let mut pretty_name = None;
    let mut codename = None;
    let mut ubuntu_codename = None;

    for line in contents.lines() {
        let Some((key, value)) = line.trim().split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"').trim_matches('\'').to_string();
        match key {
            "ID" => id = Some(value.to_ascii_lowercase()),
            "VERSION_ID" => version_id = value,
            "PRETTY_NAME" => pretty_name = Some(value),
            "VERSION_CODENAME" if !value.is_empty() => codename = Some(value),
            "UBUNTU_CODENAME" if !value.is_empty() => ubuntu_codename = Some(value),
            _ => {}
        }
    }

    let id = id?;
    Some(OsIdentity {
        pretty_name: pretty_name.unwrap_or_else(|| format!("{id} {version_id}")),
        id,
        version_id,
        codename: ubuntu_codename.or(codename),
    })
}

/// Collect session identifiers; a tty/ssh session carries no desktop hints.
pub fn session_hints(lookup: impl Fn(&str) -> Option<String>) -> SessionHints {
    let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
    let on_tty = non_empty("XDG_SESSION_TYPE").as_deref() == Some("tty");
    if on_tty {
        return SessionHints::default();
    }
    SessionHints {
        current_desktop: non_empty("XDG_CURRENT_DESKTOP"),
        session_mode: non_empty("GNOME_SHELL_SESSION_MODE"),
        desktop_session: non_empty("DESKTOP_SESSION").or_else(|| non_empty("GDMSESSION")),
        data_dirs: non_empty("XDG_DATA_DIRS"),
        config_dirs: non_empty("XDG_CONFIG_DIRS"),
    }
}

pub fn detect_desktop(session: &SessionHints) -> DesktopEnvironment {
    let from_current = session
        .current_desktop
        .as_deref()
        .map(DesktopEnvironment::from_desktop_string)
        .unwrap_or(DesktopEnvironment::Unknown);
    if from_current != DesktopEnvironment::Unknown {
        return from_current;
    }
    session
        .desktop_session
        .as_deref()
        .map(DesktopEnvironment::from_desktop_string)
        .unwrap_or(DesktopEnvironment::Unknown)
}

fn detect_audio() -> Result<AudioSubsystem, ProbeError> {
    match Command::new("pactl").arg("info").output() {
        Ok(output) if output.status.success() => {
            let info = String::from_utf8_lossy(&output.stdout);
            if let Some(audio) = parse_pactl_server(&info) {
                return Ok(audio);
            }
        }
        Ok(_) => debug!("pactl could not reach a sound server"),
        Err(err) => debug!(%err, "pactl unavailable"),
    }

    // Fall back to process names when pactl is missing or the server is idle.
    if !pgrep_exact("pipewire").is_empty() {
        return Ok(AudioSubsystem::PipeWire);
    }
    if !pgrep_exact("pulseaudio").is_empty() {
        return Ok(AudioSubsystem::PulseAudio);
    }
    if Path::new("/usr/bin/pipewire").exists() || Path::new("/usr/bin/pulseaudio").exists() {
        return Err(ProbeError::Inconclusive {
            what: "sound server",
            reason: "installed but not running".to_string(),
        });
    }
    Ok(AudioSubsystem::None)
}

/// Classify the `Server Name:` line of `pactl info`.
pub fn parse_pactl_server(info: &str) -> Option<AudioSubsystem> {
    let line = info
        .lines()
        .find_map(|line| line.trim().strip_prefix("Server Name:"))?;
    if line.contains("PipeWire") {
        Some(AudioSubsystem::PipeWire)
    } else if line.to_ascii_lowercase().contains("pulseaudio") {
        Some(AudioSubsystem::PulseAudio)
    } else {
        None
    }
}

pub fn modules_include_gpu_driver(modules: &str) -> bool {
    modules
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .any(|name| name == "nvidia")
}

fn detect_xorg_hwe(os: &OsIdentity) -> bool {
    if !os.is_ubuntu() || os.version_id.is_empty() {
        return false;
    }
    let package = format!("xserver-xorg-core-hwe-{}", os.version_id);
    let output = Command::new("dpkg-query")
        .args(["-W", "-f=${Status}", package.as_str()])
        .output();
    match output {
        Ok(output) => String::from_utf8_lossy(&output.stdout).ends_with(" installed"),
        Err(err) => {
            warn!(%err, "dpkg-query unavailable; assuming no HWE stack");
            false
        }
    }
}

fn pgrep_exact(name: &str) -> Vec<u32> {
    let output = Command::new("pgrep").arg("-x").arg(name).output();
    let Ok(output) = output else {
        return Vec::new();
    };
    if !output.status.success() {
        return Vec::new();
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .lines()
        .filter_map(|line| line.trim().parse::<u32>().ok())
        .collect()
}
