//! Process and filesystem boundary between the installer and the host.
//!
//! Stages only talk to the machine through [`Host`], which keeps the
//! orchestration testable with a scripted host.

use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc::Sender;
use std::thread;

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};
use xrdp_setup_core::util::tail_lines;

use crate::events::ProgressEvent;

/// Lines of captured output kept in error messages.
const FAILURE_TAIL_LINES: usize = 20;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostCommand {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub privileged: bool,
}

impl HostCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            privileged: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Run through sudo.
    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }

    /// Full argument vector, including the sudo wrapper for privileged commands.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 4);
        if self.privileged {
            // -n: the credential prompt happens once up front, never mid-stage.
            argv.extend(["sudo", "-n", "--"].map(String::from));
            if !self.env.is_empty() {
                argv.push("env".to_string());
                argv.extend(self.env.iter().map(|(key, value)| format!("{key}={value}")));
            }
        }
        argv.push(self.program.clone());
        argv.extend(self.args.iter().cloned());
        argv
    }

    /// Human-readable command line used in logs and failure reasons.
    pub fn label(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 2);
        if self.privileged {
            parts.push("sudo".to_string());
        }
        parts.push(self.program.clone());
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when the process was killed by a signal.
    pub status: Option<i32>,
    pub output: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("`{command}` {}{}", status_label(.status), output_suffix(.output))]
pub struct ProcessError {
    pub command: String,
    /// Exit code; `None` if the command could not be started or was signalled.
    pub status: Option<i32>,
    pub output: String,
}

impl ProcessError {
    pub fn from_output(command: &HostCommand, output: &CommandOutput) -> Self {
        Self {
            command: command.label(),
            status: output.status,
            output: output.output.clone(),
        }
    }

    pub fn io(command: impl Into<String>, err: &io::Error) -> Self {
        Self {
            command: command.into(),
            status: None,
            output: err.to_string(),
        }
    }
}

fn status_label(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("exited with status {code}"),
        None => "did not complete".to_string(),
    }
}

fn output_suffix(output: &str) -> String {
    let tail = tail_lines(output, FAILURE_TAIL_LINES);
    if tail.is_empty() {
        String::new()
    } else {
        format!(":\n{tail}")
    }
}

pub trait Host {
    /// Run a command to completion. Errors only when it cannot be started;
    /// a non-zero exit is reported through [`CommandOutput::status`].
    fn run(&mut self, command: &HostCommand) -> Result<CommandOutput, ProcessError>;

    fn read_file(&self, path: &Path) -> Option<String>;

    fn path_exists(&self, path: &Path) -> bool;

    fn write_file(
        &mut self,
        path: &Path,
        contents: &str,
        privileged: bool,
    ) -> Result<(), ProcessError>;

    fn remove_path(&mut self, path: &Path, privileged: bool) -> Result<(), ProcessError>;
}

/// Prompts for sudo credentials at most once per run.
#[derive(Default)]
struct SudoSession {
    validated: bool,
}

impl SudoSession {
    fn ensure(&mut self) -> Result<(), ProcessError> {
        if self.validated {
            // Extend the cached timestamp without ever prompting again.
            let _ = Command::new("sudo")
                .args(["-n", "-v"])
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
            return Ok(());
        }

        let status = Command::new("sudo")
            .arg("-v")
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|err| ProcessError::io("sudo -v", &err))?;
        if !status.success() {
            return Err(ProcessError {
                command: "sudo -v".to_string(),
                status: status.code(),
                output: "privilege escalation was refused".to_string(),
            });
        }
        self.validated = true;
        Ok(())
    }
}

/// Host implementation backed by real subprocesses and files.
pub struct SystemHost {
    log_tx: Sender<ProgressEvent>,
    sudo: SudoSession,
}

impl SystemHost {
    pub fn new(log_tx: Sender<ProgressEvent>) -> Self {
        Self {
            log_tx,
            sudo: SudoSession::default(),
        }
    }
}

impl Host for SystemHost {
    fn run(&mut self, command: &HostCommand) -> Result<CommandOutput, ProcessError> {
        if command.privileged {
            self.sudo.ensure()?;
        }

        let label = command.label();
        let _ = self.log_tx.send(ProgressEvent::Command(label.clone()));
        debug!(command = %label, "running command");

        let argv = command.argv();
        let mut process = Command::new(&argv[0]);
        process.args(&argv[1..]);
        if !command.privileged {
            process.envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }
        if let Some(dir) = command.cwd.as_ref() {
            process.current_dir(dir);
        }

        let mut child = process
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| ProcessError::io(label.clone(), &err))?;

        let stdout_handle = child.stdout.take().map(|stream| {
            let tx = self.log_tx.clone();
            thread::spawn(move || read_stream(stream, tx))
        });
        let stderr_handle = child.stderr.take().map(|stream| {
            let tx = self.log_tx.clone();
            thread::spawn(move || read_stream(stream, tx))
        });

        let status = child
            .wait()
            .map_err(|err| ProcessError::io(label.clone(), &err))?;

        let mut lines = Vec::new();
        for handle in [stdout_handle, stderr_handle].into_iter().flatten() {
            if let Ok(captured) = handle.join() {
                lines.extend(captured);
            }
        }

        Ok(CommandOutput {
            status: status.code(),
            output: lines.join("\n"),
        })
    }

    fn read_file(&self, path: &Path) -> Option<String> {
        fs::read_to_string(path).ok()
    }

    fn path_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn write_file(
        &mut self,
        path: &Path,
        contents: &str,
        privileged: bool,
    ) -> Result<(), ProcessError> {
        let label = format!("write {}", path.display());
        if !privileged {
            let parent = path.parent().unwrap_or_else(|| Path::new("."));
            fs::create_dir_all(parent).map_err(|err| ProcessError::io(label.clone(), &err))?;
            let mut temp =
                NamedTempFile::new_in(parent).map_err(|err| ProcessError::io(label.clone(), &err))?;
            temp.write_all(contents.as_bytes())
                .map_err(|err| ProcessError::io(label.clone(), &err))?;
            temp.persist(path)
                .map_err(|err| ProcessError::io(label.clone(), &err.error))?;
            return Ok(());
        }

        // Stage as the operator, then let root install it in place.
        let mut temp = NamedTempFile::new().map_err(|err| ProcessError::io(label.clone(), &err))?;
        temp.write_all(contents.as_bytes())
            .and_then(|_| temp.flush())
            .map_err(|err| ProcessError::io(label.clone(), &err))?;
        let install = HostCommand::new("install")
            .args(["-D", "-m", "644"])
            .arg(temp.path().display().to_string())
            .arg(path.display().to_string())
            .privileged();
        let output = self.run(&install)?;
        if output.success() {
            Ok(())
        } else {
            Err(ProcessError::from_output(&install, &output))
        }
    }

    fn remove_path(&mut self, path: &Path, privileged: bool) -> Result<(), ProcessError> {
        if privileged {
            let remove = HostCommand::new("rm")
                .args(["-rf", "--"])
                .arg(path.display().to_string())
                .privileged();
            let output = self.run(&remove)?;
            return if output.success() {
                Ok(())
            } else {
                Err(ProcessError::from_output(&remove, &output))
            };
        }

        let label = format!("remove {}", path.display());
        let result = if path.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };
        match result {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "path already absent");
                Ok(())
            }
            Err(err) => Err(ProcessError::io(label, &err)),
        }
    }
}

fn sanitize_output_line(line: &str) -> String {
    line.replace('\r', "")
}

fn read_stream(stream: impl io::Read, tx: Sender<ProgressEvent>) -> Vec<String> {
    let reader = BufReader::new(stream);
    let mut captured = Vec::new();
    for line in reader.lines().map_while(Result::ok) {
        let line = sanitize_output_line(&line);
        let _ = tx.send(ProgressEvent::Output(line.clone()));
        captured.push(line);
    }
    captured
}
