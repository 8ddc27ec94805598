//! Built-in module for host identity, clock and NTP settings.
//!
//! Configuration lives in memory and is exchanged as JSON under the
//! `ietf-system` namespace:
//!
//! ```json
//! {"system": {
//!     "hostname": "edge-1",
//!     "clock": {"timezone-name": "Europe/Prague"},
//!     "ntp": {"enabled": true, "server": [
//!         {"name": "pool", "udp": {"address": "pool.ntp.org"}, "association-type": "pool"}
//!     ]}
//! }}
//! ```
//!
//! Edits are validated against a copy of the running configuration and only
//! committed when the whole edit applies, so a failed edit never leaves a
//! partial change behind.

use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use time::{Duration, OffsetDateTime};
use tracing::{info, warn};

use netkeep_proto::{RpcError, timestamp};

use super::{MODULES_TARGET, Module, ModuleDescriptor, ModuleError, ModuleReply};

mod edit;

/// Namespace served by the system module.
pub const SYSTEM_NAMESPACE: &str = "urn:ietf:params:xml:ns:yang:ietf-system";

const DEFAULT_HOSTNAME: &str = "netkeep";
const CURRENT_DATETIME: &str = "current-datetime";

/// Running configuration of the system module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SystemConfig {
    /// Host name.
    pub hostname: String,
    /// Configured time zone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clock: Option<Timezone>,
    /// NTP client settings.
    #[serde(default)]
    pub ntp: NtpConfig,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            hostname: DEFAULT_HOSTNAME.to_owned(),
            clock: None,
            ntp: NtpConfig::default(),
        }
    }
}

/// Time zone given either by name or by UTC offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Timezone {
    /// Zone database name, such as `Europe/Prague`.
    TimezoneName(String),
    /// Offset from UTC in minutes.
    TimezoneUtcOffset(i16),
}

/// NTP client settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NtpConfig {
    /// Whether the NTP client runs.
    pub enabled: bool,
    /// Configured servers, keyed by name.
    #[serde(default)]
    pub server: Vec<NtpServer>,
}

/// One NTP server entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NtpServer {
    /// Entry key.
    pub name: String,
    /// UDP transport settings.
    pub udp: UdpAddress,
    /// How the server is used.
    #[serde(default)]
    pub association_type: AssociationType,
}

/// UDP address of an NTP server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UdpAddress {
    /// Host name or IP address.
    pub address: String,
}

/// NTP association mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssociationType {
    /// Unicast server.
    #[default]
    Server,
    /// Symmetric peer.
    Peer,
    /// Pool of servers behind one name.
    Pool,
}

/// Host power transitions requested through RPCs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction {
    /// Reboot the host.
    Restart,
    /// Power the host off.
    Shutdown,
}

impl PowerAction {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Restart => "restart",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Performs host power transitions.
pub trait PowerControl: Send + Sync {
    /// Requests `action`.
    ///
    /// # Errors
    ///
    /// Returns a [`ModuleError`] when the transition cannot be scheduled.
    fn request(&self, action: PowerAction) -> Result<(), ModuleError>;
}

/// Power control that records requests in the log without acting on them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingPowerControl;

impl PowerControl for LoggingPowerControl {
    fn request(&self, action: PowerAction) -> Result<(), ModuleError> {
        warn!(
            target: MODULES_TARGET,
            action = action.as_str(),
            "host power transition requested"
        );
        Ok(())
    }
}

#[derive(Debug)]
struct SystemState {
    config: SystemConfig,
    clock_offset: Duration,
    boot_time: OffsetDateTime,
}

/// Module managing host name, time zone and NTP settings.
pub struct SystemModule {
    descriptor: ModuleDescriptor,
    state: Mutex<SystemState>,
    power: Box<dyn PowerControl>,
}

impl SystemModule {
    /// Builds the module with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(SystemConfig::default())
    }

    /// Builds the module with an initial configuration.
    #[must_use]
    pub fn with_config(config: SystemConfig) -> Self {
        Self {
            descriptor: ModuleDescriptor::new("system", 1)
                .with_repository(1)
                .with_capability(SYSTEM_NAMESPACE)
                .with_operations([
                    "get",
                    "get-config",
                    "edit-config",
                    "set-current-datetime",
                    "system-restart",
                    "system-shutdown",
                ]),
            state: Mutex::new(SystemState {
                config,
                clock_offset: Duration::ZERO,
                boot_time: OffsetDateTime::now_utc(),
            }),
            power: Box::new(LoggingPowerControl),
        }
    }

    /// Replaces the power control backend.
    #[must_use]
    pub fn with_power_control(mut self, power: Box<dyn PowerControl>) -> Self {
        self.power = power;
        self
    }

    /// Returns a copy of the running configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::Internal`] if the state lock is poisoned.
    pub fn config(&self) -> Result<SystemConfig, ModuleError> {
        Ok(self.lock()?.config.clone())
    }

    fn lock(&self) -> Result<MutexGuard<'_, SystemState>, ModuleError> {
        self.state
            .lock()
            .map_err(|_| ModuleError::internal("system state lock poisoned"))
    }

    fn config_data(config: &SystemConfig) -> Result<Value, ModuleError> {
        serde_json::to_value(config)
            .map_err(|error| ModuleError::internal(format!("encoding configuration: {error}")))
    }

    fn get(&self, include_state: bool) -> Result<ModuleReply, ModuleError> {
        let state = self.lock()?;
        let mut body = json!({ "system": Self::config_data(&state.config)? });
        if include_state && let Value::Object(members) = &mut body {
            let now = OffsetDateTime::now_utc() + state.clock_offset;
            members.insert(
                String::from("system-state"),
                json!({
                    "platform": {
                        "os-name": std::env::consts::OS,
                        "machine": std::env::consts::ARCH,
                    },
                    "clock": {
                        "current-datetime": timestamp::format(now),
                        "boot-datetime": timestamp::format(state.boot_time),
                    },
                }),
            );
        }
        Ok(ModuleReply::data(json!({ SYSTEM_NAMESPACE: body })))
    }

    fn edit_config(&self, content: &Value) -> Result<ModuleReply, ModuleError> {
        let mut state = self.lock()?;
        let Some(edit) = edit::namespace_edit(content, SYSTEM_NAMESPACE) else {
            return Ok(ModuleReply::ok());
        };
        let default_operation = edit::default_operation(content)?;
        let mut next = state.config.clone();
        edit::apply(&mut next, edit, default_operation)?;
        if next == state.config {
            return Ok(ModuleReply::ok());
        }
        let prior = Self::config_data(&state.config)?;
        info!(
            target: MODULES_TARGET,
            module = "system",
            hostname = %next.hostname,
            ntp_enabled = next.ntp.enabled,
            "system configuration changed"
        );
        state.config = next;
        Ok(ModuleReply::changed(prior))
    }

    fn set_current_datetime(&self, content: &Value) -> Result<ModuleReply, ModuleError> {
        let requested = match content.get(CURRENT_DATETIME) {
            Some(Value::String(text)) => timestamp::parse(text).map_err(|error| {
                RpcError::invalid_value(CURRENT_DATETIME).with_message(error.to_string())
            })?,
            Some(_) => return Err(RpcError::invalid_value(CURRENT_DATETIME).into()),
            None => return Err(RpcError::missing_element(CURRENT_DATETIME).into()),
        };
        let mut state = self.lock()?;
        if state.config.ntp.enabled {
            return Err(RpcError::operation_failed()
                .with_message("the clock is controlled by NTP")
                .into());
        }
        state.clock_offset = requested - OffsetDateTime::now_utc();
        info!(
            target: MODULES_TARGET,
            module = "system",
            current_datetime = %timestamp::format(requested),
            "system clock set"
        );
        Ok(ModuleReply::ok())
    }
}

impl Default for SystemModule {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for SystemModule {
    fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    fn execute(&self, operation: &str, content: &Value) -> Result<ModuleReply, ModuleError> {
        match operation {
            "get" => self.get(true),
            "get-config" => self.get(false),
            "edit-config" => self.edit_config(content),
            "set-current-datetime" => self.set_current_datetime(content),
            "system-restart" => self.power.request(PowerAction::Restart).map(|()| ModuleReply::ok()),
            "system-shutdown" => self
                .power
                .request(PowerAction::Shutdown)
                .map(|()| ModuleReply::ok()),
            other => Err(ModuleError::unsupported(other)),
        }
    }

    fn supports_rollback(&self) -> bool {
        true
    }

    fn undo(&self, operation: &str, prior_state: &Value) -> Result<(), ModuleError> {
        if operation != "edit-config" {
            return Err(ModuleError::unsupported(operation));
        }
        let prior: SystemConfig = serde_json::from_value(prior_state.clone())
            .map_err(|error| ModuleError::internal(format!("decoding prior state: {error}")))?;
        self.lock()?.config = prior;
        info!(
            target: MODULES_TARGET,
            module = "system",
            "system configuration restored"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests;
