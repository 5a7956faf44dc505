//! Filesystem layout helpers for installation paths.

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, Result};
use xrdp_setup_core::Config;

pub struct InstallPaths {
    pub home: PathBuf,
    /// Where source trees and downloaded packages are staged.
    pub download_dir: PathBuf,
    pub xsessionrc: PathBuf,
    pub xsession: PathBuf,
    pub xwrapper: PathBuf,
    pub apt_sources: PathBuf,
    /// Operator uid/gid, used to hand the ledger directory to the operator.
    pub owner: (u32, u32),
    pub jobs: usize,
}

impl InstallPaths {
    pub fn discover(config: &Config) -> Result<Self> {
        let home = home_dir()?;
        let download_dir = match config.build.download_dir.as_ref() {
            Some(dir) => dir.clone(),
            None => xdg_download_dir().unwrap_or_else(|| home.join("Downloads")),
        };
        // SAFETY: getuid/getgid cannot fail and have no preconditions.
        let owner = unsafe { (libc::getuid(), libc::getgid()) };
        let mut paths = Self::rooted_at(home, download_dir, owner);
        paths.jobs = build_jobs(config.build.jobs);
        Ok(paths)
    }

    pub fn rooted_at(home: PathBuf, download_dir: PathBuf, owner: (u32, u32)) -> Self {
        Self {
            xsessionrc: home.join(".xsessionrc"),
            xsession: home.join(".xsession"),
            home,
            download_dir,
            xwrapper: PathBuf::from("/etc/X11/Xwrapper.config"),
            apt_sources: PathBuf::from("/etc/apt/sources.list"),
            owner,
            jobs: 1,
        }
    }

    pub fn source_dir(&self, name: &str) -> PathBuf {
        self.download_dir.join(name)
    }
}

pub fn home_dir() -> Result<PathBuf> {
    let home = env::var("HOME").map_err(|_| anyhow!("HOME is not set"))?;
    Ok(PathBuf::from(home))
}

pub fn format_with_home(path: &Path) -> String {
    if let Ok(home) = home_dir() {
        if let Ok(stripped) = path.strip_prefix(&home) {
            let mut rendered = PathBuf::from("$HOME");
            rendered.push(stripped);
            return rendered.display().to_string();
        }
    }
    path.display().to_string()
}

fn xdg_download_dir() -> Option<PathBuf> {
    let output = Command::new("xdg-user-dir").arg("DOWNLOAD").output().ok()?;
    if !output.status.success() {
        return None;
    }
    let dir = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if dir.is_empty() {
        None
    } else {
        Some(PathBuf::from(dir))
    }
}

fn build_jobs(configured: Option<usize>) -> usize {
    configured
        .filter(|jobs| *jobs > 0)
        .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
        .unwrap_or(1)
}
