//! Launch sequencing for the server process.
//!
//! The sequence is: load configuration, take the singleton lock, optionally
//! detach, publish pid and health files, start the bus listener and then block
//! until a termination signal arrives. On the way out the listener stops
//! accepting and the bus ends every live session before the runtime files are
//! removed.

use std::env;
use std::ffi::OsStr;
use std::sync::Arc;

use daemonize_me::Daemon;
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::info;

use netkeep_config::RuntimePaths;

use crate::StructuredHealthReporter;
use crate::bootstrap::{ConfigLoader, StaticConfigLoader, SystemConfigLoader, bootstrap_with};
use crate::health::HealthReporter;
use crate::transport::{ConnectionHandler, SocketListener};

use super::errors::LaunchError;
use super::guard::{HealthState, ProcessGuard};
use super::{FOREGROUND_ENV_VAR, PROCESS_TARGET};

/// Launch mode for the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Fork into the background and detach from the controlling terminal.
    Background,
    /// Remain attached to the terminal; used for debugging and tests.
    Foreground,
}

impl LaunchMode {
    fn detect() -> Self {
        if env::var_os(FOREGROUND_ENV_VAR).is_some() {
            Self::Foreground
        } else {
            Self::Background
        }
    }
}

/// Detaches the process from its controlling terminal.
pub(crate) trait Daemonizer: Send + Sync {
    fn daemonize(&self, paths: &RuntimePaths) -> Result<(), LaunchError>;
}

/// Blocks until the server should stop.
pub(crate) trait ShutdownSignal: Send + Sync {
    fn wait(&self) -> Result<(), LaunchError>;
}

/// Forks via `daemonize-me`, working from the runtime directory.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct SystemDaemonizer;

impl Daemonizer for SystemDaemonizer {
    fn daemonize(&self, paths: &RuntimePaths) -> Result<(), LaunchError> {
        info!(
            target: PROCESS_TARGET,
            runtime = %paths.runtime_dir().display(),
            "detaching netkeepd"
        );
        Daemon::new()
            .work_dir(paths.runtime_dir())
            .name(OsStr::new(env!("CARGO_PKG_NAME")))
            .start()?;
        Ok(())
    }
}

/// Waits for the first of SIGTERM, SIGINT, SIGQUIT or SIGHUP.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct TerminationSignals;

impl ShutdownSignal for TerminationSignals {
    fn wait(&self) -> Result<(), LaunchError> {
        let mut signals =
            Signals::new([SIGTERM, SIGINT, SIGQUIT, SIGHUP]).map_err(LaunchError::Signals)?;
        if let Some(signal) = signals.forever().next() {
            info!(target: PROCESS_TARGET, signal, "shutdown signal received");
        }
        Ok(())
    }
}

/// Process-level collaborators needed to control the server lifecycle.
pub(crate) struct ProcessControl<D, S> {
    pub(crate) mode: LaunchMode,
    pub(crate) daemonizer: D,
    pub(crate) shutdown: S,
}

/// Service dependencies required to construct the server runtime.
pub(crate) struct ServiceDeps<L> {
    pub(crate) loader: L,
    pub(crate) reporter: Arc<dyn HealthReporter>,
}

/// Collaborators required to launch the server runtime.
pub(crate) struct LaunchPlan<L, D, S> {
    pub(crate) process: ProcessControl<D, S>,
    pub(crate) services: ServiceDeps<L>,
}

/// Runs the server using the production collaborators.
///
/// # Errors
///
/// Returns [`LaunchError`] when any launch step fails or the server cannot
/// shut down cleanly.
pub fn run_daemon() -> Result<(), LaunchError> {
    run_daemon_with(LaunchPlan {
        process: ProcessControl {
            mode: LaunchMode::detect(),
            daemonizer: SystemDaemonizer,
            shutdown: TerminationSignals,
        },
        services: ServiceDeps {
            loader: SystemConfigLoader,
            reporter: Arc::new(StructuredHealthReporter::new()),
        },
    })
}

/// Runs the server with injected collaborators.
pub(crate) fn run_daemon_with<L, D, S>(plan: LaunchPlan<L, D, S>) -> Result<(), LaunchError>
where
    L: ConfigLoader,
    D: Daemonizer,
    S: ShutdownSignal,
{
    let LaunchPlan { process, services } = plan;
    let ProcessControl {
        mode,
        daemonizer,
        shutdown,
    } = process;
    let ServiceDeps { loader, reporter } = services;

    info!(target: PROCESS_TARGET, ?mode, "starting server runtime");
    let config = loader.load()?;
    config.server_socket().prepare_filesystem()?;
    let guard = ProcessGuard::acquire(RuntimePaths::from_config(&config)?)?;
    if mode == LaunchMode::Background {
        daemonizer.daemonize(guard.paths())?;
    }
    guard.write_pid(std::process::id())?;
    guard.write_health(HealthState::Starting)?;
    let listener = SocketListener::bind(config.server_socket())?;

    let daemon = bootstrap_with(&StaticConfigLoader::new(config), reporter)?;
    let server = daemon.server();
    let handler: Arc<dyn ConnectionHandler> = Arc::clone(&server) as Arc<dyn ConnectionHandler>;
    let listener_handle = listener.start(handler)?;
    guard.write_health(HealthState::Ready)?;
    shutdown.wait()?;

    guard.write_health(HealthState::Stopping)?;
    listener_handle.shutdown();
    listener_handle.join()?;
    let ended = server.shut_down();
    info!(
        target: PROCESS_TARGET,
        sessions_ended = ended,
        "shutdown sequence completed"
    );
    Ok(())
}
