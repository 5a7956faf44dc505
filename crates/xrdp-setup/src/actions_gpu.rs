//! CUDA toolkit stage.

use std::env::consts::ARCH;

use tracing::info;
use xrdp_setup_core::OsIdentity;

use crate::host::HostCommand;
use crate::model::{Effect, StageError};

use super::{apt_install, apt_update, installed_packages, log_line, run_command, ActionContext};

const KEYRING_PACKAGE: &str = "cuda-keyring";

pub fn run_gpu_toolkit(ctx: &mut ActionContext, effects: &mut Vec<Effect>) -> Result<(), StageError> {
    // Probe again: the driver may have been unloaded since the run started.
    if !ctx.probe.gpu_driver_loaded() {
        return Err(StageError::Precondition(
            "no NVIDIA driver is loaded; install the GPU driver before the CUDA toolkit".to_string(),
        ));
    }

    let url = keyring_url(
        &ctx.config.cuda.repo_base,
        &ctx.environment.os,
        ARCH,
        &ctx.config.cuda.keyring_package,
    )
    .map_err(StageError::Precondition)?;
    info!(%url, "installing CUDA repository keyring");

    let deb = ctx.paths.source_dir(&ctx.config.cuda.keyring_package);
    let download_dir = ctx.paths.download_dir.display().to_string();
    run_command(ctx, HostCommand::new("mkdir").args(["-p", download_dir.as_str()]))?;
    run_command(
        ctx,
        HostCommand::new("wget")
            .args(["-q", "-O"])
            .arg(deb.display().to_string())
            .arg(url),
    )?;

    let keyring = [KEYRING_PACKAGE.to_string()];
    let before = installed_packages(ctx, &keyring)?;
    let install_keyring = HostCommand::new("dpkg")
        .arg("-i")
        .arg(deb.display().to_string())
        .privileged();
    let installed = run_command(ctx, install_keyring);
    let after = installed_packages(ctx, &keyring).unwrap_or_default();
    if after.contains(KEYRING_PACKAGE) && !before.contains(KEYRING_PACKAGE) {
        effects.push(Effect::PackagesInstalled(keyring.to_vec()));
    }
    if let Err(err) = ctx.host.remove_path(&deb, false) {
        log_line(ctx, format!("Warning: could not remove {}: {err}", deb.display()));
    }
    installed?;

    apt_update(ctx)?;
    let toolkit = ctx.config.cuda.toolkit_packages.clone();
    let toolkit = toolkit.iter().map(String::as_str).collect::<Vec<_>>();
    apt_install(ctx, &toolkit, effects)
}

/// Vendor keyring location for a distribution and CPU architecture.
pub(crate) fn keyring_url(
    repo_base: &str,
    os: &OsIdentity,
    arch: &str,
    package: &str,
) -> Result<String, String> {
    let slug = os
        .repo_slug()
        .ok_or_else(|| format!("no CUDA repository for {}", os.pretty_name))?;
    let arch = match arch {
        "x86_64" => "x86_64",
        "aarch64" => "sbsa",
        other => return Err(format!("no CUDA repository for architecture {other}")),
    };
    Ok(format!(
        "{}/{slug}/{arch}/{package}",
        repo_base.trim_end_matches('/')
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn os(id: &str, version: &str) -> OsIdentity {
        OsIdentity {
            id: id.to_string(),
            version_id: version.to_string(),
            pretty_name: format!("{id} {version}"),
            codename: None,
        }
    }

    #[test]
    fn keyring_url_uses_distribution_slug() {
        let url = keyring_url(
            "https://developer.download.nvidia.com/compute/cuda/repos/",
            &os("ubuntu", "22.04"),
            "x86_64",
            "cuda-keyring_1.1-1_all.deb",
        )
        .expect("url");
        assert_eq!(
            url,
            "https://developer.download.nvidia.com/compute/cuda/repos/ubuntu2204/x86_64/cuda-keyring_1.1-1_all.deb"
        );
        let arm = keyring_url("https://repo", &os("debian", "12"), "aarch64", "k.deb").expect("arm");
        assert_eq!(arm, "https://repo/debian12/sbsa/k.deb");
    }

    #[test]
    fn keyring_url_rejects_unknown_targets() {
        assert!(keyring_url("https://repo", &OsIdentity::unknown(), "x86_64", "k.deb").is_err());
        assert!(keyring_url("https://repo", &os("ubuntu", "24.04"), "riscv64", "k.deb").is_err());
    }
}
