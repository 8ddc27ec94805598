//! Process supervision test world shared across BDD scenarios.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;

use netkeep_bus::{BusClient, BusSignal, BusStream, DEFAULT_MAX_FRAME_BYTES};
use netkeep_config::{RuntimePaths, SocketEndpoint};
use netkeep_proto::{Capability, CapabilitySet, capability};

use crate::health::HealthReporter;
use crate::process::LaunchError;
use crate::process::launch::{
    Daemonizer, LaunchMode, LaunchPlan, ProcessControl, ServiceDeps, ShutdownSignal,
    run_daemon_with,
};

use super::{RecordingHealthReporter, TestConfigLoader};

const WAIT_TIMEOUT: Duration = Duration::from_secs(2);
const POLL_INTERVAL: Duration = Duration::from_millis(25);

pub type StepResult = Result<(), String>;

pub struct ProcessTestWorld {
    loader: TestConfigLoader,
    reporter: Arc<RecordingHealthReporter>,
    daemonizer: TestDaemonizer,
    shutdown: TestShutdownSignal,
    handle: Option<thread::JoinHandle<Result<(), LaunchError>>>,
    result: Option<Result<(), LaunchError>>,
    agent: Option<BusClient<BusStream>>,
}

impl Default for ProcessTestWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTestWorld {
    pub fn new() -> Self {
        Self {
            loader: TestConfigLoader::new(),
            reporter: Arc::new(RecordingHealthReporter::default()),
            daemonizer: TestDaemonizer::default(),
            shutdown: TestShutdownSignal::new(),
            handle: None,
            result: None,
            agent: None,
        }
    }

    fn plan(
        &self,
        mode: LaunchMode,
        shutdown: TestShutdownSignal,
    ) -> LaunchPlan<TestConfigLoader, TestDaemonizer, TestShutdownSignal> {
        LaunchPlan {
            process: ProcessControl {
                mode,
                daemonizer: self.daemonizer.clone(),
                shutdown,
            },
            services: ServiceDeps {
                loader: self.loader.clone(),
                reporter: Arc::clone(&self.reporter) as Arc<dyn HealthReporter>,
            },
        }
    }

    pub fn start_background(&mut self) -> StepResult {
        if self.handle.is_some() {
            return Err(String::from("server already running"));
        }
        let plan = self.plan(LaunchMode::Background, self.shutdown.clone());
        self.handle = Some(thread::spawn(move || run_daemon_with(plan)));
        Ok(())
    }

    pub fn start_foreground(&mut self, pretrigger: bool) {
        let shutdown = TestShutdownSignal::new();
        if pretrigger {
            shutdown.trigger();
        }
        let plan = self.plan(LaunchMode::Foreground, shutdown);
        self.result = Some(run_daemon_with(plan));
    }

    pub fn join_background(&mut self) -> StepResult {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| String::from("server not running"))?;
        match handle.join() {
            Ok(result) => {
                self.result = Some(result);
                Ok(())
            }
            Err(_) => Err(String::from("server thread panicked")),
        }
    }

    pub fn trigger_shutdown(&self) {
        self.shutdown.trigger();
    }

    pub fn wait_for_ready(&self) -> StepResult {
        let deadline = Instant::now() + WAIT_TIMEOUT;
        while Instant::now() < deadline {
            if self
                .read_health()
                .is_ok_and(|snapshot| snapshot_status(&snapshot) == "ready")
            {
                return Ok(());
            }
            thread::sleep(POLL_INTERVAL);
        }
        Err(String::from("server did not publish ready health snapshot"))
    }

    pub fn lock_path(&self) -> PathBuf {
        self.loader.runtime_dir().join("netkeepd.lock")
    }

    pub fn pid_path(&self) -> PathBuf {
        self.loader.runtime_dir().join("netkeepd.pid")
    }

    pub fn health_path(&self) -> PathBuf {
        self.loader.runtime_dir().join("netkeepd.health")
    }

    pub fn socket_endpoint(&self) -> SocketEndpoint {
        SocketEndpoint::unix(
            self.loader
                .runtime_dir()
                .join("netkeepd.sock")
                .to_string_lossy()
                .into_owned(),
        )
    }

    pub fn read_health(&self) -> Result<Value, String> {
        let content = fs::read_to_string(self.health_path()).map_err(|error| error.to_string())?;
        serde_json::from_str(&content).map_err(|error| error.to_string())
    }

    pub fn write_stale_runtime(&self) -> StepResult {
        fs::write(self.lock_path(), b"").map_err(|error| error.to_string())?;
        fs::write(self.pid_path(), b"0\n").map_err(|error| error.to_string())
    }

    /// Asks the running server for its event streams over the bus.
    pub fn server_info_streams(&self) -> Result<Vec<String>, String> {
        let mut client = BusClient::connect(&self.socket_endpoint(), DEFAULT_MAX_FRAME_BYTES)
            .map_err(|error| error.to_string())?;
        client
            .server_info()
            .map(|info| info.streams)
            .map_err(|error| error.to_string())
    }

    /// Connects an agent to the running server and registers `session_id`.
    pub fn register_agent_session(&mut self, session_id: &str) -> StepResult {
        let mut client = BusClient::connect(&self.socket_endpoint(), DEFAULT_MAX_FRAME_BYTES)
            .map_err(|error| error.to_string())?;
        let capabilities: CapabilitySet =
            std::iter::once(Capability::new(capability::BASE_1_1)).collect();
        client
            .register_session(session_id, &capabilities, Some("admin"), None)
            .map_err(|error| error.to_string())?;
        self.agent = Some(client);
        Ok(())
    }

    /// Next signal pushed to the registered agent.
    pub fn agent_signal(&mut self) -> Result<BusSignal, String> {
        self.agent
            .as_mut()
            .ok_or_else(|| String::from("no agent connected"))?
            .read_signal()
            .map_err(|error| error.to_string())
    }

    pub fn daemonizer_calls(&self) -> usize {
        self.daemonizer.calls()
    }

    pub fn last_result(&self) -> Option<&Result<(), LaunchError>> {
        self.result.as_ref()
    }

    pub fn last_error(&self) -> Option<&LaunchError> {
        self.result.as_ref()?.as_ref().err()
    }
}

#[derive(Clone, Default)]
pub struct TestDaemonizer {
    calls: Arc<AtomicUsize>,
}

impl TestDaemonizer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Daemonizer for TestDaemonizer {
    fn daemonize(&self, _paths: &RuntimePaths) -> Result<(), LaunchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Clone)]
pub struct TestShutdownSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl TestShutdownSignal {
    pub fn new() -> Self {
        Self {
            inner: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    pub fn trigger(&self) {
        let (lock, cvar) = &*self.inner;
        let mut triggered = lock.lock().expect("shutdown mutex poisoned");
        *triggered = true;
        cvar.notify_all();
    }
}

impl ShutdownSignal for TestShutdownSignal {
    fn wait(&self) -> Result<(), LaunchError> {
        let (lock, cvar) = &*self.inner;
        let mut triggered = lock.lock().expect("shutdown mutex poisoned");
        while !*triggered {
            triggered = cvar
                .wait(triggered)
                .expect("shutdown mutex poisoned during wait");
        }
        Ok(())
    }
}

pub fn snapshot_status(snapshot: &Value) -> &str {
    snapshot
        .get("status")
        .and_then(Value::as_str)
        .expect("health snapshot should contain a status field")
}
