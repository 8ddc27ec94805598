//! Request inspection: error-option and target namespaces.

use serde_json::{Map, Value};

use netkeep_proto::{CapabilitySet, Rpc, RpcError};

const ERROR_OPTION: &str = "error-option";

/// Partial-failure policy for requests spanning several modules.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorOption {
    /// Stop at the first failure and keep earlier changes.
    #[default]
    StopOnError,
    /// Run every module and report every failure.
    ContinueOnError,
    /// Stop at the first failure and undo earlier changes.
    RollbackOnError,
}

impl ErrorOption {
    /// Reads the policy from the request parameters.
    ///
    /// # Errors
    ///
    /// Returns `invalid-value` naming `error-option` for unknown values.
    pub fn from_rpc(rpc: &Rpc) -> Result<Self, RpcError> {
        let Some(value) = rpc.param(ERROR_OPTION) else {
            return Ok(Self::default());
        };
        match value.as_str() {
            Some("stop-on-error") => Ok(Self::StopOnError),
            Some("continue-on-error") => Ok(Self::ContinueOnError),
            Some("rollback-on-error") => Ok(Self::RollbackOnError),
            _ => Err(RpcError::invalid_value(ERROR_OPTION)),
        }
    }

    /// Value as it appears on the wire.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StopOnError => "stop-on-error",
            Self::ContinueOnError => "continue-on-error",
            Self::RollbackOnError => "rollback-on-error",
        }
    }
}

/// Namespaces named by the request, before negotiation is applied.
pub(super) fn target_markers(rpc: &Rpc) -> Vec<String> {
    let from_tree = ["config", "filter"]
        .into_iter()
        .filter_map(|key| rpc.param(key).and_then(Value::as_object))
        .flat_map(Map::keys)
        .cloned();
    let mut markers: Vec<String> = Vec::new();
    for marker in rpc.namespace.iter().cloned().chain(from_tree) {
        if !markers.contains(&marker) {
            markers.push(marker);
        }
    }
    markers
}

/// Capabilities the engine will route on.
///
/// Markers the session never negotiated are dropped. `None` means markers were
/// given but none survived.
pub(super) fn routing_capabilities(
    markers: &[String],
    negotiated: &CapabilitySet,
) -> Option<CapabilitySet> {
    if markers.is_empty() {
        return Some(negotiated.clone());
    }
    let surviving: CapabilitySet = markers
        .iter()
        .filter(|marker| negotiated.contains(marker))
        .map(String::as_str)
        .collect();
    (!surviving.is_empty()).then_some(surviving)
}

/// Restricts `config` and `filter` trees to the namespaces a module serves.
pub(super) fn narrow_content(content: &Value, served: &CapabilitySet) -> Value {
    let Value::Object(members) = content else {
        return content.clone();
    };
    let narrowed = members
        .iter()
        .map(|(key, value)| {
            let value = match (key.as_str(), value) {
                ("config" | "filter", Value::Object(tree)) => Value::Object(
                    tree.iter()
                        .filter(|(namespace, _)| served.contains(namespace))
                        .map(|(namespace, subtree)| (namespace.clone(), subtree.clone()))
                        .collect(),
                ),
                _ => value.clone(),
            };
            (key.clone(), value)
        })
        .collect();
    Value::Object(narrowed)
}
