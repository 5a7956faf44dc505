//! Formatting helpers for detection and preflight summaries.

use xrdp_setup_core::HostEnvironment;

use crate::checks::{CheckState, Checks};

pub fn format_environment(environment: &HostEnvironment) -> Vec<String> {
    let desktop = match environment.session.current_desktop.as_deref() {
        Some(raw) => format!("{} ({raw})", environment.desktop.label()),
        None => environment.desktop.label().to_string(),
    };
    vec![
        format!("- os: {}", environment.os.pretty_name),
        format!("- desktop: {desktop}"),
        format!("- sound server: {}", environment.audio.label()),
        format!(
            "- nvidia driver: {}",
            if environment.gpu_driver { "loaded" } else { "not loaded" }
        ),
        format!(
            "- xorg hwe stack: {}",
            if environment.xorg_hwe { "yes" } else { "no" }
        ),
    ]
}

pub fn format_checks(checks: &Checks) -> Vec<String> {
    checks
        .items()
        .iter()
        .map(|item| {
            let state = match item.state {
                CheckState::Ok => "ok",
                CheckState::Warn => "warn",
                CheckState::Fail => "fail",
            };
            format!("- {}: {} ({})", item.label, state, item.detail)
        })
        .collect()
}
