//! Server process supervision: the singleton lock, runtime files, detaching
//! from the terminal and draining the bus on shutdown.

mod errors;
mod files;
mod guard;
pub(crate) mod launch;

pub use errors::LaunchError;
pub use launch::{LaunchMode, run_daemon};

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");
pub(crate) const FOREGROUND_ENV_VAR: &str = "NETKEEP_FOREGROUND";
