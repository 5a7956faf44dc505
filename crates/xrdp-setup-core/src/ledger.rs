//! Append-only installation ledger stored as JSON Lines.
//!
//! The current installation mode is always derived from the ledger and never
//! stored on its own. Appends rewrite the file through a temporary sibling and
//! an atomic rename, so readers observe either the previous ledger or the
//! ledger with the complete new entry.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::{InstallationMode, LedgerEntry};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("failed to read ledger {path}: {reason}")]
    ReadFailed { path: PathBuf, reason: String },
    #[error(
        "ledger {path} line {line} is not a valid entry: {reason}; \
         fix or delete that line, or move the file aside to start a new history"
    )]
    Corrupt {
        path: PathBuf,
        line: usize,
        reason: String,
    },
    #[error("failed to write ledger {path}: {reason}")]
    WriteFailed { path: PathBuf, reason: String },
}

#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
    legacy_marker: Option<PathBuf>,
}

impl Ledger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            legacy_marker: None,
        }
    }

    /// Consult a legacy single-word mode marker when no successful entry exists.
    pub fn with_legacy_marker(mut self, marker: impl Into<PathBuf>) -> Self {
        self.legacy_marker = Some(marker.into());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn legacy_marker(&self) -> Option<&Path> {
        self.legacy_marker.as_deref()
    }

    /// Directory that holds the ledger file.
    pub fn directory(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    /// All entries in append order. A missing ledger is an empty history.
    pub fn history(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(LedgerError::ReadFailed {
                    path: self.path.clone(),
                    reason: err.to_string(),
                })
            }
        };
        parse_entries(&self.path, &contents)
    }

    pub fn current_mode(&self) -> Result<InstallationMode, LedgerError> {
        let history = self.history()?;
        if let Some(mode) = derive_mode(&history) {
            return Ok(mode);
        }
        Ok(self.legacy_mode().unwrap_or(InstallationMode::None))
    }

    /// Durably append one entry; the file is replaced atomically.
    pub fn append(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        let write_err = |reason: String| LedgerError::WriteFailed {
            path: self.path.clone(),
            reason,
        };

        let mut contents = match fs::read(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(write_err(err.to_string())),
        };
        if !contents.is_empty() && !contents.ends_with(b"\n") {
            contents.push(b'\n');
        }
        let line = serde_json::to_string(entry).map_err(|err| write_err(err.to_string()))?;
        contents.extend_from_slice(line.as_bytes());
        contents.push(b'\n');

        let directory = self.directory();
        fs::create_dir_all(directory).map_err(|err| write_err(err.to_string()))?;
        let mut temp =
            NamedTempFile::new_in(directory).map_err(|err| write_err(err.to_string()))?;
        temp.write_all(&contents)
            .map_err(|err| write_err(err.to_string()))?;
        temp.as_file()
            .sync_all()
            .map_err(|err| write_err(err.to_string()))?;
        let file = temp
            .persist(&self.path)
            .map_err(|err| write_err(err.error.to_string()))?;
        if let Err(err) = set_readable(&file) {
            warn!(%err, path = %self.path.display(), "ledger may not be readable by other users");
        }
        sync_directory(directory);

        debug!(
            path = %self.path.display(),
            resulting = %entry.resulting,
            "ledger entry appended"
        );
        Ok(())
    }

    /// Check that the ledger directory accepts new files without touching the ledger.
    pub fn is_writable(&self) -> bool {
        let directory = self.directory();
        directory.is_dir() && NamedTempFile::new_in(directory).is_ok()
    }

    fn legacy_mode(&self) -> Option<InstallationMode> {
        let marker = self.legacy_marker.as_ref()?;
        let contents = fs::read_to_string(marker).ok()?;
        let first = contents.lines().next().unwrap_or_default();
        let mode = InstallationMode::from_marker(first);
        if mode.is_none() {
            warn!(path = %marker.display(), "legacy mode marker not recognized");
        }
        mode
    }
}

/// Mode established by the most recent successful entry.
pub fn derive_mode(entries: &[LedgerEntry]) -> Option<InstallationMode> {
    entries
        .iter()
        .rev()
        .find_map(|entry| entry.resulting.established_mode())
}

fn parse_entries(path: &Path, contents: &str) -> Result<Vec<LedgerEntry>, LedgerError> {
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str::<LedgerEntry>(line).map_err(|err| LedgerError::Corrupt {
                path: path.to_path_buf(),
                line: index + 1,
                reason: err.to_string(),
            })
        })
        .collect()
}

#[cfg(unix)]
fn set_readable(file: &fs::File) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    // Diagnostics tooling run by other users reads the ledger.
    file.set_permissions(fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn set_readable(_file: &fs::File) -> io::Result<()> {
    Ok(())
}

fn sync_directory(directory: &Path) {
    if let Ok(dir) = fs::File::open(directory) {
        let _ = dir.sync_all();
    }
}
