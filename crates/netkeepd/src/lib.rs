//! Management server for netkeep agents.
//!
//! The server owns device configuration. Per-connection agents speak the
//! management protocol to clients and reach the server over a bus socket
//! configured via [`netkeep_config`]. Each bus connection is served by
//! [`BusServer`], which keeps the [`SessionRegistry`] in step with live agents
//! and routes requests through the [`DispatchEngine`] to the modules held in
//! the [`ModuleRegistry`].
//!
//! Bootstrap loads configuration, initialises structured telemetry, prepares
//! the socket filesystem and registers the built-in modules. Health reporting
//! hooks emit structured events at each stage, and a rollback that cannot be
//! completed is surfaced to the [`HealthReporter`] as a fatal inconsistency
//! because device state is then unknown.
//!
//! Session lifecycle and configuration changes are appended to an
//! [`EventJournal`] that notification workers poll through the bus.

mod bootstrap;
mod bus;
pub mod dispatch;
pub mod events;
mod health;
pub mod modules;
mod process;
pub mod sessions;
pub mod telemetry;
mod transport;

pub use bootstrap::{
    BootstrapError, ConfigLoader, Daemon, StaticConfigLoader, SystemConfigLoader, bootstrap_with,
};
pub use bus::BusServer;
pub use dispatch::{
    DispatchEngine, DispatchError, DispatchOutcome, ErrorOption, ModuleResult, ModuleStatus,
};
pub use events::{EventJournal, TerminationReason};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use modules::{Module, ModuleRegistry};
pub use process::{LaunchError, LaunchMode, run_daemon};
pub use sessions::SessionRegistry;
pub use telemetry::{TelemetryError, TelemetryHandle};

#[cfg(test)]
mod tests;
