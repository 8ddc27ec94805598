//! Configuration module contract and registry.
//!
//! A module owns one slice of the device's configuration or state. It declares
//! the capabilities (data-model namespaces) it serves and the operations it
//! implements; the dispatch engine selects modules through the
//! [`ModuleRegistry`] and calls [`Module::execute`] without holding the
//! registry lock.

use std::collections::BTreeSet;

use netkeep_proto::{Capability, CapabilitySet, RpcError};
use serde_json::Value;
use thiserror::Error;

pub mod monitoring;
mod registry;
pub mod system;

pub use self::registry::{ModuleLease, ModuleRegistry, ModuleSummary, RegistryError};

pub(crate) const MODULES_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::modules");

/// Static description of a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDescriptor {
    name: String,
    id: u32,
    repository: Option<u32>,
    capabilities: CapabilitySet,
    operations: BTreeSet<String>,
}

impl ModuleDescriptor {
    /// Describes a module with the given unique name and numeric id.
    ///
    /// Id `0` is reserved for modules that expose no configuration.
    #[must_use]
    pub fn new(name: impl Into<String>, id: u32) -> Self {
        Self {
            name: name.into(),
            id,
            repository: None,
            capabilities: CapabilitySet::new(),
            operations: BTreeSet::new(),
        }
    }

    /// Associates the module with a persisted configuration repository.
    #[must_use]
    pub const fn with_repository(mut self, repository: u32) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Adds a served capability.
    #[must_use]
    pub fn with_capability(mut self, capability: impl Into<Capability>) -> Self {
        self.capabilities.insert(capability);
        self
    }

    /// Adds implemented operations.
    #[must_use]
    pub fn with_operations<I, S>(mut self, operations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.operations.extend(operations.into_iter().map(Into::into));
        self
    }

    /// Unique module name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Numeric module identifier.
    #[must_use]
    pub const fn id(&self) -> u32 {
        self.id
    }

    /// Repository identifier for modules owning persisted configuration.
    #[must_use]
    pub const fn repository(&self) -> Option<u32> {
        self.repository
    }

    /// Served capabilities.
    #[must_use]
    pub const fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    /// Implemented operations.
    #[must_use]
    pub const fn operations(&self) -> &BTreeSet<String> {
        &self.operations
    }

    /// Reports whether the module implements `operation`.
    #[must_use]
    pub fn implements(&self, operation: &str) -> bool {
        self.operations.contains(operation)
    }
}

/// Successful result of [`Module::execute`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleReply {
    /// Data returned to the client, keyed by namespace.
    pub data: Option<Value>,
    /// State captured before a configuration change, used by [`Module::undo`].
    pub prior_state: Option<Value>,
}

impl ModuleReply {
    /// Reply without data or state change.
    #[must_use]
    pub fn ok() -> Self {
        Self::default()
    }

    /// Reply carrying data.
    #[must_use]
    pub fn data(data: Value) -> Self {
        Self {
            data: Some(data),
            prior_state: None,
        }
    }

    /// Reply recording a configuration change and the state it replaced.
    #[must_use]
    pub fn changed(prior_state: Value) -> Self {
        Self {
            data: None,
            prior_state: Some(prior_state),
        }
    }

    /// Reports whether the call changed configuration.
    #[must_use]
    pub const fn is_change(&self) -> bool {
        self.prior_state.is_some()
    }
}

/// Failures reported by modules.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModuleError {
    /// The request was refused with a protocol-visible error.
    #[error("{0}")]
    Rejected(RpcError),
    /// The module does not implement the requested operation or undo path.
    #[error("operation '{operation}' is not supported")]
    Unsupported {
        /// Requested operation.
        operation: String,
    },
    /// The module failed internally.
    #[error("module failure: {message}")]
    Internal {
        /// Operator-facing description.
        message: String,
    },
}

impl ModuleError {
    /// Builds an internal failure.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Builds an unsupported-operation failure.
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    /// Converts the failure into the error reported to the client.
    #[must_use]
    pub fn to_rpc_error(&self) -> RpcError {
        match self {
            Self::Rejected(error) => error.clone(),
            Self::Unsupported { operation } => RpcError::operation_not_supported()
                .with_message(format!("operation '{operation}' is not supported")),
            Self::Internal { message } => RpcError::operation_failed().with_message(message.clone()),
        }
    }
}

impl From<RpcError> for ModuleError {
    fn from(error: RpcError) -> Self {
        Self::Rejected(error)
    }
}

/// Contract implemented by every configuration module.
///
/// Implementations must be safe to call from several dispatch threads at once.
pub trait Module: Send + Sync {
    /// Static description of the module.
    fn descriptor(&self) -> &ModuleDescriptor;

    /// Capabilities served by the module.
    fn capabilities(&self) -> &CapabilitySet {
        self.descriptor().capabilities()
    }

    /// Operations implemented by the module.
    fn operations(&self) -> &BTreeSet<String> {
        self.descriptor().operations()
    }

    /// Applies `operation` with its parameters.
    ///
    /// # Errors
    ///
    /// Returns a [`ModuleError`] describing why the request failed; the module
    /// must leave its state unchanged in that case.
    fn execute(&self, operation: &str, content: &Value) -> Result<ModuleReply, ModuleError>;

    /// Reports whether [`Module::undo`] can restore prior state.
    fn supports_rollback(&self) -> bool {
        false
    }

    /// Restores the state captured before a successful `operation`.
    ///
    /// # Errors
    ///
    /// Any error leaves the device in an unknown state.
    fn undo(&self, operation: &str, prior_state: &Value) -> Result<(), ModuleError> {
        let _ = prior_state;
        Err(ModuleError::unsupported(operation))
    }
}

#[cfg(test)]
mod tests;
