//! Failures that stop the server process from starting or stopping cleanly.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use nix::errno::Errno;
use ortho_config::OrthoError;
use thiserror::Error;

use netkeep_config::{RuntimePathsError, SocketPreparationError};

use crate::bootstrap::BootstrapError;
use crate::transport::ListenerError;

/// Errors surfaced while launching or supervising the server process.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {0}")]
    Config(#[from] Arc<OrthoError>),
    /// Preparing the socket filesystem failed.
    #[error("failed to prepare server socket: {0}")]
    Socket(#[from] SocketPreparationError),
    /// Runtime file locations could not be derived.
    #[error(transparent)]
    RuntimePaths(#[from] RuntimePathsError),
    /// A live server already holds the lock.
    #[error("netkeepd already running with pid {pid}")]
    AlreadyRunning {
        /// PID recorded in the existing PID file.
        pid: u32,
    },
    /// Creating, replacing or removing a runtime file failed.
    #[error("failed to {action} '{path}': {source}")]
    RuntimeFile {
        /// What was being done to the file.
        action: &'static str,
        /// File path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Checking whether the PID in a stale lock is alive failed.
    #[error("failed to check existing process {pid}: {source}")]
    CheckProcess {
        /// PID named by the PID file.
        pid: u32,
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
    /// Serialising the health snapshot failed.
    #[error("failed to serialise health snapshot: {0}")]
    HealthSerialise(#[from] serde_json::Error),
    /// Detaching from the terminal failed.
    #[error("failed to daemonise: {0}")]
    Daemonize(#[from] daemonize_me::DaemonError),
    /// Termination signal handlers could not be installed.
    #[error("failed to install signal handlers: {0}")]
    Signals(#[source] io::Error),
    /// Bootstrapping the server failed.
    #[error("server bootstrap failed: {0}")]
    Bootstrap(#[from] BootstrapError),
    /// The bus listener failed.
    #[error("bus listener failed: {0}")]
    Listener(#[from] ListenerError),
}
