//! Error types for request dispatch failures.
//!
//! Failures a client can recover from are folded into the reply; the variants
//! here are the ones the engine cannot express as an `rpc-error`.

use std::fmt;

use thiserror::Error;

use crate::modules::{ModuleError, RegistryError};

/// An undo path that failed during rollback.
#[derive(Debug)]
pub struct UndoFailure {
    /// Module whose undo path failed.
    pub module: String,
    /// Failure reported by the module.
    pub source: ModuleError,
}

impl fmt::Display for UndoFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.module, self.source)
    }
}

/// Errors surfaced by the dispatch engine.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Rolling back a partially applied request failed, so device state is
    /// unknown. Every module whose undo failed is listed, in the order the
    /// undo paths ran.
    #[error("rollback of '{operation}' failed in {}", list_failures(.failures))]
    Inconsistent {
        /// Operation being rolled back.
        operation: String,
        /// Undo paths that failed.
        failures: Vec<UndoFailure>,
    },

    /// The module registry could not be consulted.
    #[error("module registry unavailable: {0}")]
    Registry(#[from] RegistryError),
}

fn list_failures(failures: &[UndoFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl DispatchError {
    /// Reports whether the failure leaves the device in an unknown state.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Inconsistent { .. })
    }

    /// Names the modules left in an unknown state.
    pub fn failed_modules(&self) -> Vec<&str> {
        match self {
            Self::Inconsistent { failures, .. } => {
                failures.iter().map(|failure| failure.module.as_str()).collect()
            }
            Self::Registry(_) => Vec::new(),
        }
    }
}
