//! Routing of client requests to configuration modules.
//!
//! The engine selects every enabled module that implements the requested
//! operation and serves one of the namespaces the request targets, calls them
//! in registration order and folds their results into a single reply. How a
//! failure in one module affects the others is governed by the request's
//! `error-option`:
//!
//! - `stop-on-error` (default): later modules are skipped and earlier changes
//!   stay applied.
//! - `continue-on-error`: every module runs and all failures are reported.
//! - `rollback-on-error`: earlier changes are undone in reverse order. A
//!   failed undo is fatal because device state is no longer known.
//!
//! Target namespaces come from the top-level keys of `config` (for edits) or
//! `filter` (for reads), or from the namespace of the operation element.

mod engine;
mod errors;
mod policy;

pub use self::engine::{DispatchEngine, DispatchOutcome, ModuleResult, ModuleStatus};
pub use self::errors::{DispatchError, UndoFailure};
pub use self::policy::ErrorOption;

/// Tracing target for dispatch operations.
pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");
