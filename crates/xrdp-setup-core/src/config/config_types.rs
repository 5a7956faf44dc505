//! Configuration types and defaults for xrdp-setup.
//!
//! Keeps schema definitions in one place for easier auditing.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration loaded from config.toml.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub ledger: LedgerConfig,
    pub build: BuildConfig,
    pub sources: SourcesConfig,
    pub cuda: CudaConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// JSON Lines ledger of installation runs.
    pub path: PathBuf,
    /// Single-word mode file written by the older installer script.
    pub legacy_marker: Option<PathBuf>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/xrdp-setup/ledger.jsonl"),
            legacy_marker: Some(PathBuf::from("/etc/xrdp/xrdp-installer-check.log")),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Where source trees are cloned; defaults to the XDG download directory.
    pub download_dir: Option<PathBuf>,
    /// Parallel make jobs; defaults to the available CPU count.
    pub jobs: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub upstream_owner: String,
    pub fork_owner: String,
    /// Release ref used for custom builds without --dev.
    pub xrdp_stable_ref: String,
    pub xorgxrdp_stable_ref: String,
    pub dev_branch: String,
    pub fork_branch: String,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            upstream_owner: "neutrinolabs".to_string(),
            fork_owner: "Nexarian".to_string(),
            xrdp_stable_ref: "v0.10.1".to_string(),
            xorgxrdp_stable_ref: "v0.10.2".to_string(),
            dev_branch: "devel".to_string(),
            fork_branch: "mainline_merge".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CudaConfig {
    pub repo_base: String,
    pub keyring_package: String,
    pub toolkit_packages: Vec<String>,
}

impl Default for CudaConfig {
    fn default() -> Self {
        Self {
            repo_base: "https://developer.download.nvidia.com/compute/cuda/repos".to_string(),
            keyring_package: "cuda-keyring_1.1-1_all.deb".to_string(),
            toolkit_packages: vec!["cuda-toolkit".to_string()],
        }
    }
}
