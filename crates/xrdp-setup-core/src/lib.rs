//! Shared types, ledger, and configuration for xrdp-setup.

pub mod config;
pub mod ledger;
pub mod model;
pub mod reconcile;
pub mod util;

pub use config::*;
pub use ledger::{derive_mode, Ledger, LedgerError};
pub use model::*;
pub use reconcile::{reconcile, Decision};
pub use util::program_in_path;
