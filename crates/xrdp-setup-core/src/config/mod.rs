//! Configuration module wiring for xrdp-setup.
//!
//! Keeps config types, I/O, and runtime overrides in separate files.

mod config_io;
mod config_runtime;
mod config_types;

pub use config_io::ConfigError;
pub use config_runtime::LEDGER_ENV;
pub use config_types::*;
