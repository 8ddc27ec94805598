//! Server bootstrap orchestration.

use std::sync::Arc;

use ortho_config::{OrthoConfig, OrthoError};
use thiserror::Error;

use netkeep_config::{Config, SocketPreparationError};

use crate::bus::BusServer;
use crate::events::EventJournal;
use crate::health::HealthReporter;
use crate::modules::monitoring::MonitoringModule;
use crate::modules::system::SystemModule;
use crate::modules::{Module, ModuleRegistry, RegistryError};
use crate::sessions::SessionRegistry;
use crate::telemetry::{self, TelemetryError, TelemetryHandle};

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the server configuration.
    ///
    /// # Errors
    ///
    /// Returns the loader error when any configuration layer is invalid.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that delegates to [`Config::load`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load()
    }
}

/// Loader returning a configuration resolved earlier.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    /// Wraps an already resolved configuration.
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// Errors surfaced during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// Socket preparation failed.
    #[error("failed to prepare server socket: {source}")]
    Socket {
        /// Filesystem error reported while preparing the socket directory.
        #[source]
        source: SocketPreparationError,
    },
    /// A built-in module could not be registered.
    #[error("failed to register module '{name}': {source}")]
    Module {
        /// Module that was rejected.
        name: String,
        /// Registry failure.
        #[source]
        source: RegistryError,
    },
}

/// Result of a successful bootstrap invocation.
pub struct Daemon {
    config: Config,
    telemetry: TelemetryHandle,
    server: Arc<BusServer>,
}

impl Daemon {
    /// Accessor for the resolved configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Accessor for the telemetry handle, primarily useful for testing.
    #[must_use]
    pub const fn telemetry(&self) -> TelemetryHandle {
        self.telemetry
    }

    /// Bus server wired to the registries.
    #[must_use]
    pub fn server(&self) -> Arc<BusServer> {
        Arc::clone(&self.server)
    }
}

/// Bootstraps the server using the supplied collaborators.
///
/// # Errors
///
/// Returns [`BootstrapError`] when configuration, telemetry, the socket
/// directory or a built-in module cannot be set up. Each failure is also
/// passed to the reporter.
pub fn bootstrap_with(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn HealthReporter>,
) -> Result<Daemon, BootstrapError> {
    reporter.bootstrap_starting();

    let config = match loader.load() {
        Ok(config) => config,
        Err(source) => return Err(fail(&*reporter, BootstrapError::Configuration { source })),
    };

    let telemetry = match telemetry::initialise(&config) {
        Ok(handle) => handle,
        Err(source) => return Err(fail(&*reporter, BootstrapError::Telemetry { source })),
    };

    if let Err(source) = config.server_socket().prepare_filesystem() {
        return Err(fail(&*reporter, BootstrapError::Socket { source }));
    }

    let sessions = Arc::new(SessionRegistry::new());
    let modules = ModuleRegistry::new();
    let builtins: [Arc<dyn Module>; 2] = [
        Arc::new(SystemModule::new()),
        Arc::new(MonitoringModule::new(Arc::clone(&sessions))),
    ];
    for module in builtins {
        if let Err(error) = register(&modules, module, &config, &*reporter) {
            return Err(fail(&*reporter, error));
        }
    }

    let journal = Arc::new(EventJournal::new(config.event_journal_capacity()));
    let server = Arc::new(BusServer::new(
        sessions,
        modules,
        journal,
        Arc::clone(&reporter),
        config.max_frame_bytes(),
    ));
    reporter.bootstrap_succeeded(&config);

    Ok(Daemon {
        config,
        telemetry,
        server,
    })
}

fn register(
    modules: &ModuleRegistry,
    module: Arc<dyn Module>,
    config: &Config,
    reporter: &dyn HealthReporter,
) -> Result<(), BootstrapError> {
    let name = module.descriptor().name().to_owned();
    let added = if config.is_module_disabled(&name) {
        modules.add_disabled(module)
    } else {
        modules.add(module)
    };
    if let Err(source) = added {
        reporter.module_failed(&name, &source);
        return Err(BootstrapError::Module { name, source });
    }
    let summaries = modules
        .summaries()
        .map_err(|source| BootstrapError::Module {
            name: name.clone(),
            source,
        })?;
    if let Some(summary) = summaries.iter().find(|summary| summary.name == name) {
        reporter.module_registered(summary);
    }
    Ok(())
}

fn fail(reporter: &dyn HealthReporter, error: BootstrapError) -> BootstrapError {
    reporter.bootstrap_failed(&error);
    error
}
