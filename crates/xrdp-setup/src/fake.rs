//! Scripted host and probe used by the pipeline tests.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use xrdp_setup_core::{
    AudioSubsystem, DesktopEnvironment, HostEnvironment, OsIdentity, SessionHints,
};

use crate::detect::Probe;
use crate::host::{CommandOutput, Host, HostCommand, ProcessError};

/// Side effect fired once, the first time a command label contains the pattern.
pub type Trigger = (String, Box<dyn FnMut() + Send>);

/// In-memory host that models dpkg, systemd units, files, and directories.
#[derive(Default)]
pub struct FakeHost {
    pub commands: Vec<HostCommand>,
    pub installed: BTreeSet<String>,
    pub enabled_units: BTreeSet<String>,
    pub files: HashMap<PathBuf, String>,
    pub dirs: BTreeSet<PathBuf>,
    /// Commands whose label contains one of these fail with status 1.
    pub failing: Vec<String>,
    pub trigger: Option<Trigger>,
}

impl FakeHost {
    pub fn with_installed(packages: &[&str]) -> Self {
        Self {
            installed: packages.iter().map(|name| name.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn fail_on(&mut self, pattern: &str) {
        self.failing.push(pattern.to_string());
    }

    pub fn labels(&self) -> Vec<String> {
        self.commands.iter().map(HostCommand::label).collect()
    }

    pub fn on_command(&mut self, pattern: &str, action: impl FnMut() + Send + 'static) {
        self.trigger = Some((pattern.to_string(), Box::new(action)));
    }

    fn rename_tree(&mut self, from: &Path, to: &Path) {
        let moved = |path: &Path| match path.strip_prefix(from) {
            Ok(rest) if rest.as_os_str().is_empty() => Some(to.to_path_buf()),
            Ok(rest) => Some(to.join(rest)),
            Err(_) => None,
        };
        self.dirs = self
            .dirs
            .iter()
            .map(|dir| moved(dir).unwrap_or_else(|| dir.clone()))
            .collect();
        self.files = self
            .files
            .drain()
            .map(|(file, contents)| (moved(&file).unwrap_or(file), contents))
            .collect();
    }

    fn simulate(&mut self, command: &HostCommand) -> CommandOutput {
        let operands = command
            .args
            .iter()
            .filter(|arg| !arg.starts_with('-'))
            .cloned()
            .collect::<Vec<_>>();
        match command.program.as_str() {
            "dpkg-query" => {
                let mut lines = Vec::new();
                let mut missing = false;
                for package in &operands {
                    if self.installed.contains(package) {
                        lines.push(format!("{package} install ok installed"));
                    } else {
                        missing = true;
                        lines.push(format!("dpkg-query: no packages found matching {package}"));
                    }
                }
                output(if missing { 1 } else { 0 }, lines.join("\n"))
            }
            "apt-get" => {
                match operands.first().map(String::as_str) {
                    Some("install") => self.installed.extend(operands[1..].iter().cloned()),
                    Some("purge") => {
                        for package in &operands[1..] {
                            self.installed.remove(package);
                        }
                    }
                    _ => {}
                }
                output(0, String::new())
            }
            "dpkg" => {
                self.installed.insert("cuda-keyring".to_string());
                output(0, String::new())
            }
            "checkinstall" => {
                if let Some(name) = command
                    .args
                    .iter()
                    .find_map(|arg| arg.strip_prefix("--pkgname="))
                {
                    self.installed.insert(name.to_string());
                }
                output(0, String::new())
            }
            "git" => {
                if let Some(dest) = operands.last() {
                    self.dirs.insert(PathBuf::from(dest));
                }
                output(0, String::new())
            }
            "mv" => {
                if let [from, to] = operands.as_slice() {
                    self.rename_tree(Path::new(from), Path::new(to));
                }
                output(0, String::new())
            }
            "./scripts/install_pulseaudio_sources_apt.sh" => {
                if let Some(dest) = operands.first() {
                    self.dirs.insert(PathBuf::from(dest));
                }
                output(0, String::new())
            }
            "systemctl" => match operands.first().map(String::as_str) {
                Some("is-enabled") => {
                    let enabled = operands[1..]
                        .iter()
                        .all(|unit| self.enabled_units.contains(unit));
                    output(if enabled { 0 } else { 1 }, String::new())
                }
                Some("enable") => {
                    self.enabled_units.extend(operands[1..].iter().cloned());
                    output(0, String::new())
                }
                Some("disable") => {
                    for unit in &operands[1..] {
                        self.enabled_units.remove(unit);
                    }
                    output(0, String::new())
                }
                _ => output(0, String::new()),
            },
            _ => output(0, String::new()),
        }
    }
}

fn output(status: i32, output: String) -> CommandOutput {
    CommandOutput {
        status: Some(status),
        output,
    }
}

impl Host for FakeHost {
    fn run(&mut self, command: &HostCommand) -> Result<CommandOutput, ProcessError> {
        self.commands.push(command.clone());
        let label = command.label();
        let fire = self
            .trigger
            .as_ref()
            .is_some_and(|(pattern, _)| label.contains(pattern.as_str()));
        if fire {
            if let Some((_, mut action)) = self.trigger.take() {
                action();
            }
        }
        if self.failing.iter().any(|pattern| label.contains(pattern)) {
            return Ok(output(1, "simulated failure".to_string()));
        }
        Ok(self.simulate(command))
    }

    fn read_file(&self, path: &Path) -> Option<String> {
        self.files.get(path).cloned()
    }

    fn path_exists(&self, path: &Path) -> bool {
        self.files.contains_key(path) || self.dirs.contains(path)
    }

    fn write_file(
        &mut self,
        path: &Path,
        contents: &str,
        _privileged: bool,
    ) -> Result<(), ProcessError> {
        self.files.insert(path.to_path_buf(), contents.to_string());
        Ok(())
    }

    fn remove_path(&mut self, path: &Path, _privileged: bool) -> Result<(), ProcessError> {
        self.files.retain(|file, _| !file.starts_with(path));
        self.dirs.retain(|dir| !dir.starts_with(path));
        Ok(())
    }
}

pub struct FakeProbe {
    pub environment: HostEnvironment,
    pub gpu_driver: bool,
}

impl FakeProbe {
    pub fn ubuntu_gnome() -> Self {
        Self {
            environment: HostEnvironment {
                os: OsIdentity {
                    id: "ubuntu".to_string(),
                    version_id: "24.04".to_string(),
                    pretty_name: "Ubuntu 24.04 LTS".to_string(),
                    codename: Some("noble".to_string()),
                },
                desktop: DesktopEnvironment::Gnome,
                session: SessionHints::default(),
                audio: AudioSubsystem::PipeWire,
                gpu_driver: false,
                xorg_hwe: false,
            },
            gpu_driver: false,
        }
    }
}

impl Probe for FakeProbe {
    fn probe(&self) -> HostEnvironment {
        self.environment.clone()
    }

    fn gpu_driver_loaded(&self) -> bool {
        self.gpu_driver
    }
}
