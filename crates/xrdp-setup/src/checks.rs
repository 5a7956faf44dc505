//! Host preflight checks for privilege model, distribution, and tooling.

use xrdp_setup_core::{program_in_path, OsIdentity, RequestedMode};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CheckState {
    Ok,
    Warn,
    Fail,
}

pub struct CheckItem {
    pub label: &'static str,
    pub state: CheckState,
    pub detail: String,
}

pub struct Checks {
    pub user: CheckItem,
    pub os: CheckItem,
    pub sudo: CheckItem,
    pub apt: CheckItem,
    pub git: CheckItem,
}

impl Checks {
    pub fn run(os: &OsIdentity) -> Self {
        // SAFETY: geteuid cannot fail and has no preconditions.
        let is_root = unsafe { libc::geteuid() } == 0;
        Self::evaluate(is_root, os, program_in_path)
    }

    pub fn evaluate(is_root: bool, os: &OsIdentity, has_program: impl Fn(&str) -> bool) -> Self {
        let user = if is_root {
            CheckItem::fail("user", "running as root; run as the desktop user (sudo is used per command)")
        } else {
            CheckItem::ok("user", "unprivileged")
        };

        let os = if os.is_supported() {
            CheckItem::ok("os", &os.pretty_name)
        } else {
            CheckItem::fail(
                "os",
                &format!(
                    "{} is not supported (Ubuntu 20.04/22.04/24.04, Debian 11/12)",
                    os.pretty_name
                ),
            )
        };

        let sudo = presence(&has_program, "sudo", CheckState::Fail);
        let apt = presence(&has_program, "apt-get", CheckState::Fail);
        let git = presence(&has_program, "git", CheckState::Warn);

        Self {
            user,
            os,
            sudo,
            apt,
            git,
        }
    }

    pub fn items(&self) -> [&CheckItem; 5] {
        [&self.user, &self.os, &self.sudo, &self.apt, &self.git]
    }

    pub fn ready_for(&self, mode: RequestedMode) -> Result<(), String> {
        if self.user.state == CheckState::Fail {
            return Err(self.user.detail.clone());
        }
        if self.sudo.state == CheckState::Fail {
            return Err("sudo is required".to_string());
        }
        if self.apt.state == CheckState::Fail {
            return Err("apt-get is required".to_string());
        }
        match mode {
            RequestedMode::Standard => {
                if self.os.state == CheckState::Fail {
                    return Err(self.os.detail.clone());
                }
            }
            RequestedMode::Custom => {
                if self.os.state == CheckState::Fail {
                    return Err(self.os.detail.clone());
                }
                if self.git.state != CheckState::Ok {
                    return Err("git is required for custom builds".to_string());
                }
            }
            RequestedMode::Remove => {}
        }
        Ok(())
    }
}

impl CheckItem {
    fn ok(label: &'static str, detail: &str) -> Self {
        Self {
            label,
            state: CheckState::Ok,
            detail: detail.to_string(),
        }
    }

    fn warn(label: &'static str, detail: &str) -> Self {
        Self {
            label,
            state: CheckState::Warn,
            detail: detail.to_string(),
        }
    }

    fn fail(label: &'static str, detail: &str) -> Self {
        Self {
            label,
            state: CheckState::Fail,
            detail: detail.to_string(),
        }
    }
}

fn presence(has_program: impl Fn(&str) -> bool, program: &'static str, missing: CheckState) -> CheckItem {
    if has_program(program) {
        CheckItem::ok(program, "available")
    } else if missing == CheckState::Warn {
        CheckItem::warn(program, "not installed")
    } else {
        CheckItem::fail(program, "not installed")
    }
}
