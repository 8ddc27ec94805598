//! Test configuration loaders for scenarios covering success and failure paths.

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;

use ortho_config::{OrthoConfig, OrthoError};
use tempfile::TempDir;

use netkeep_config::{Config, SocketEndpoint};

use crate::bootstrap::ConfigLoader;

/// Loader that provisions a Unix socket path under a temporary directory.
#[derive(Clone)]
pub struct TestConfigLoader {
    socket_dir: Arc<TempDir>,
    disabled_modules: Vec<String>,
}

impl TestConfigLoader {
    #[must_use]
    pub fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temporary directory for socket");
        Self {
            socket_dir: Arc::new(dir),
            disabled_modules: Vec::new(),
        }
    }

    /// Starts the named module disabled.
    pub fn disable(&mut self, name: &str) {
        self.disabled_modules.push(name.to_owned());
    }

    /// Directory holding the socket and the runtime artefacts.
    #[must_use]
    pub fn runtime_dir(&self) -> PathBuf {
        self.socket_dir.path().to_path_buf()
    }

    fn socket_path(&self) -> String {
        self.socket_dir
            .path()
            .join("netkeepd.sock")
            .to_str()
            .expect("temporary socket path was not valid UTF-8")
            .to_owned()
    }
}

impl Default for TestConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader for TestConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(Config {
            server_socket: SocketEndpoint::unix(self.socket_path()),
            disabled_modules: self.disabled_modules.clone(),
            ..Config::default()
        })
    }
}

/// Loader that intentionally fails by passing an invalid socket URL.
pub struct FailingConfigLoader;

impl ConfigLoader for FailingConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        let args = vec![
            OsString::from("netkeepd"),
            OsString::from("--server-socket"),
            OsString::from("invalid://socket"),
        ];
        Config::load_from_iter(args)
    }
}
