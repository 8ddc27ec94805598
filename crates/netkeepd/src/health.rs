//! Structured health reporting for server lifecycle events.

use std::sync::Arc;

use crate::bootstrap::BootstrapError;
use crate::dispatch::DispatchError;
use crate::modules::{ModuleSummary, RegistryError};

use netkeep_config::Config;

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Observer trait used to surface lifecycle events to telemetry sinks.
pub trait HealthReporter: Send + Sync {
    /// Invoked before configuration loading begins.
    fn bootstrap_starting(&self);

    /// Invoked after bootstrap completes successfully.
    fn bootstrap_succeeded(&self, config: &Config);

    /// Invoked when bootstrap fails.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// Invoked after a module joins the registry.
    fn module_registered(&self, module: &ModuleSummary);

    /// Invoked when a module cannot be registered.
    fn module_failed(&self, name: &str, error: &RegistryError);

    /// Invoked when a rollback failed and device state is unknown.
    fn fatal_inconsistency(&self, error: &DispatchError);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter,
{
    fn bootstrap_starting(&self) {
        (**self).bootstrap_starting();
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        (**self).bootstrap_succeeded(config);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        (**self).bootstrap_failed(error);
    }

    fn module_registered(&self, module: &ModuleSummary) {
        (**self).module_registered(module);
    }

    fn module_failed(&self, name: &str, error: &RegistryError) {
        (**self).module_failed(name, error);
    }

    fn fatal_inconsistency(&self, error: &DispatchError) {
        (**self).fatal_inconsistency(error);
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn bootstrap_starting(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_starting",
            "starting server bootstrap"
        );
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_succeeded",
            socket = %config.server_socket(),
            log_filter = %config.log_filter(),
            log_format = ?config.log_format(),
            journal_capacity = config.event_journal_capacity(),
            "server bootstrap completed"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "bootstrap_failed",
            error = %error,
            "server bootstrap failed"
        );
    }

    fn module_registered(&self, module: &ModuleSummary) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "module_registered",
            module = %module.name,
            id = module.id,
            repository = ?module.repository,
            enabled = module.enabled,
            "module registered"
        );
    }

    fn module_failed(&self, name: &str, error: &RegistryError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "module_failed",
            module = name,
            error = %error,
            "module registration failed"
        );
    }

    fn fatal_inconsistency(&self, error: &DispatchError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "fatal_inconsistency",
            error = %error,
            modules = ?error.failed_modules(),
            "device state unknown; operator attention required"
        );
    }
}
