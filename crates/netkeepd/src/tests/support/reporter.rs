//! Test double for [`HealthReporter`] that records structured events for assertions.

use std::sync::Mutex;

use crate::bootstrap::BootstrapError;
use crate::dispatch::DispatchError;
use crate::health::HealthReporter;
use crate::modules::{ModuleSummary, RegistryError};

use netkeep_config::Config;

/// Structured health events tracked during scenarios.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HealthEvent {
    /// Bootstrap started.
    BootstrapStarting,
    /// Bootstrap completed successfully.
    BootstrapSucceeded,
    /// Bootstrap failed with an error description.
    BootstrapFailed(String),
    /// A module was registered, with its enabled state.
    ModuleRegistered { name: String, enabled: bool },
    /// A module could not be registered.
    ModuleFailed(String),
    /// A rollback failed.
    FatalInconsistency(String),
}

/// Records health events for assertions.
#[derive(Debug, Default)]
pub struct RecordingHealthReporter {
    events: Mutex<Vec<HealthEvent>>,
}

impl RecordingHealthReporter {
    /// Captures a copy of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<HealthEvent> {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .clone()
    }

    fn record(&self, event: HealthEvent) {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .push(event);
    }
}

impl HealthReporter for RecordingHealthReporter {
    fn bootstrap_starting(&self) {
        self.record(HealthEvent::BootstrapStarting);
    }

    fn bootstrap_succeeded(&self, _config: &Config) {
        self.record(HealthEvent::BootstrapSucceeded);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        self.record(HealthEvent::BootstrapFailed(error.to_string()));
    }

    fn module_registered(&self, module: &ModuleSummary) {
        self.record(HealthEvent::ModuleRegistered {
            name: module.name.clone(),
            enabled: module.enabled,
        });
    }

    fn module_failed(&self, name: &str, _error: &RegistryError) {
        self.record(HealthEvent::ModuleFailed(name.to_owned()));
    }

    fn fatal_inconsistency(&self, error: &DispatchError) {
        self.record(HealthEvent::FatalInconsistency(error.to_string()));
    }
}
