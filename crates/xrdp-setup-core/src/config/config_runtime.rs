//! Runtime adjustments applied after the config file is parsed.

use std::env;
use std::path::PathBuf;

use super::Config;

pub const LEDGER_ENV: &str = "XRDP_SETUP_LEDGER";

pub(super) fn apply_env_overrides(config: &mut Config) {
    apply_ledger_override(config, env::var(LEDGER_ENV).ok().as_deref());
}

fn apply_ledger_override(config: &mut Config, value: Option<&str>) {
    let Some(value) = value.map(str::trim).filter(|value| !value.is_empty()) else {
        return;
    };
    config.ledger.path = PathBuf::from(value);
}
