//! Read-only module reporting live sessions.

use std::sync::Arc;

use serde_json::{Value, json};

use netkeep_proto::timestamp;

use super::{Module, ModuleDescriptor, ModuleError, ModuleReply};
use crate::sessions::{Session, SessionRegistry};

/// Namespace served by the monitoring module.
pub const MONITORING_NAMESPACE: &str = "urn:ietf:params:xml:ns:yang:ietf-netconf-monitoring";

/// Exposes the session table as state data.
pub struct MonitoringModule {
    descriptor: ModuleDescriptor,
    sessions: Arc<SessionRegistry>,
}

impl MonitoringModule {
    /// Builds the module over the server's session registry.
    #[must_use]
    pub fn new(sessions: Arc<SessionRegistry>) -> Self {
        Self {
            descriptor: ModuleDescriptor::new("monitoring", 0)
                .with_capability(MONITORING_NAMESPACE)
                .with_operations(["get"]),
            sessions,
        }
    }
}

impl Module for MonitoringModule {
    fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    fn execute(&self, operation: &str, _content: &Value) -> Result<ModuleReply, ModuleError> {
        if operation != "get" {
            return Err(ModuleError::unsupported(operation));
        }
        let sessions = self
            .sessions
            .snapshot()
            .map_err(|error| ModuleError::internal(error.to_string()))?;
        let entries: Vec<Value> = sessions.iter().map(session_entry).collect();
        Ok(ModuleReply::data(json!({
            MONITORING_NAMESPACE: {
                "netconf-state": { "sessions": { "session": entries } }
            }
        })))
    }
}

fn session_entry(session: &Session) -> Value {
    json!({
        "session-id": session.id(),
        "username": session.username(),
        "transport-identity": session.transport_identity(),
        "owner": session.owner().as_str(),
        "status": session.status().as_str(),
        "login-time": timestamp::format(session.login_time()),
    })
}
