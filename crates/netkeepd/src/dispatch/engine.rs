//! Module selection and partial-failure handling.

use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use netkeep_proto::{CapabilitySet, Reply, Rpc, RpcError};

use crate::modules::{ModuleLease, ModuleRegistry};

use super::DISPATCH_TARGET;
use super::errors::{DispatchError, UndoFailure};
use super::policy::{self, ErrorOption};

/// How one module fared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleStatus {
    /// The module applied or answered the request.
    Succeeded,
    /// The module rejected the request.
    Failed,
    /// The module applied the request and was later undone.
    RolledBack,
}

/// Per-module entry of a [`DispatchOutcome`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleResult {
    /// Numeric module identifier.
    pub module_id: u32,
    /// Module name.
    pub module: String,
    /// What happened.
    pub status: ModuleStatus,
    /// Failure message, for failed modules.
    pub detail: Option<String>,
}

/// Result of dispatching one request.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    /// Reply to relay to the client.
    pub reply: Reply,
    /// Modules that ran, in the order they were called.
    pub results: Vec<ModuleResult>,
    /// Modules whose changes remain applied, in the order they ran.
    pub changed: Vec<String>,
}

impl DispatchOutcome {
    fn rejected(rpc: &Rpc, error: RpcError) -> Self {
        Self {
            reply: Reply::error(error).for_message(rpc.message_id.clone()),
            results: Vec::new(),
            changed: Vec::new(),
        }
    }

    /// Results of the modules that failed, in the order they failed.
    pub fn failures(&self) -> impl Iterator<Item = &ModuleResult> {
        self.results
            .iter()
            .filter(|result| result.status == ModuleStatus::Failed)
    }

    /// Reports whether configuration changed.
    pub fn is_change(&self) -> bool {
        !self.changed.is_empty()
    }
}

/// Routes requests to modules drawn from a [`ModuleRegistry`].
#[derive(Debug, Clone)]
pub struct DispatchEngine {
    modules: ModuleRegistry,
}

struct Applied<'a> {
    lease: &'a ModuleLease,
    prior_state: Value,
    result: usize,
}

impl DispatchEngine {
    /// Creates an engine over `modules`.
    pub const fn new(modules: ModuleRegistry) -> Self {
        Self { modules }
    }

    /// Dispatches `rpc` on behalf of a session that negotiated `negotiated`.
    ///
    /// Module failures are reported in the returned reply.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Inconsistent`] when a rollback could not be
    /// completed and [`DispatchError::Registry`] when the registry lock is
    /// poisoned.
    pub fn dispatch(
        &self,
        rpc: &Rpc,
        negotiated: &CapabilitySet,
    ) -> Result<DispatchOutcome, DispatchError> {
        let option = match ErrorOption::from_rpc(rpc) {
            Ok(option) => option,
            Err(error) => return Ok(DispatchOutcome::rejected(rpc, error)),
        };
        let markers = policy::target_markers(rpc);
        let Some(routing) = policy::routing_capabilities(&markers, negotiated) else {
            debug!(
                target: DISPATCH_TARGET,
                operation = %rpc.operation,
                ?markers,
                "request targets no negotiated namespace"
            );
            return Ok(DispatchOutcome::rejected(
                rpc,
                RpcError::operation_not_supported()
                    .with_message("the requested namespaces were not negotiated"),
            ));
        };

        let leases = self.modules.find_implementing(&rpc.operation, &routing)?;
        if leases.is_empty() {
            return Ok(DispatchOutcome::rejected(
                rpc,
                RpcError::operation_not_supported()
                    .with_message(format!("no module implements '{}'", rpc.operation)),
            ));
        }
        if option == ErrorOption::RollbackOnError
            && let Some(lease) = leases
                .iter()
                .find(|lease| !lease.module().supports_rollback())
        {
            return Ok(DispatchOutcome::rejected(
                rpc,
                RpcError::operation_not_supported()
                    .with_bad_element("error-option")
                    .with_message(format!(
                        "module '{}' cannot roll back changes",
                        lease.module().descriptor().name()
                    )),
            ));
        }

        debug!(
            target: DISPATCH_TARGET,
            operation = %rpc.operation,
            modules = leases.len(),
            error_option = option.as_str(),
            "dispatching request"
        );
        Self::apply(rpc, option, &leases)
    }

    fn apply(
        rpc: &Rpc,
        option: ErrorOption,
        leases: &[ModuleLease],
    ) -> Result<DispatchOutcome, DispatchError> {
        let mut applied: Vec<Applied<'_>> = Vec::new();
        let mut results: Vec<ModuleResult> = Vec::new();
        let mut errors = Vec::new();
        let mut data: Option<Value> = None;

        for lease in leases {
            let module = lease.module();
            let descriptor = module.descriptor();
            let content = policy::narrow_content(&rpc.content, module.capabilities());
            let mut result = ModuleResult {
                module_id: descriptor.id(),
                module: descriptor.name().to_owned(),
                status: ModuleStatus::Succeeded,
                detail: None,
            };
            match module.execute(&rpc.operation, &content) {
                Ok(reply) => {
                    if let Some(fragment) = reply.data {
                        let merged = data.get_or_insert_with(|| Value::Object(Map::new()));
                        merge_data(merged, fragment);
                    }
                    if let Some(prior_state) = reply.prior_state {
                        applied.push(Applied {
                            lease,
                            prior_state,
                            result: results.len(),
                        });
                    }
                    results.push(result);
                }
                Err(failure) => {
                    warn!(
                        target: DISPATCH_TARGET,
                        module = descriptor.name(),
                        operation = %rpc.operation,
                        error = %failure,
                        "module rejected request"
                    );
                    let error = failure.to_rpc_error().with_module(descriptor.name());
                    result.status = ModuleStatus::Failed;
                    result.detail = Some(
                        error
                            .error_message
                            .clone()
                            .unwrap_or_else(|| error.error_tag.to_string()),
                    );
                    results.push(result);
                    errors.push(error);
                    match option {
                        ErrorOption::ContinueOnError => {}
                        ErrorOption::StopOnError => break,
                        ErrorOption::RollbackOnError => {
                            Self::roll_back(&rpc.operation, &applied)?;
                            for entry in applied.drain(..) {
                                if let Some(undone) = results.get_mut(entry.result) {
                                    undone.status = ModuleStatus::RolledBack;
                                }
                            }
                            break;
                        }
                    }
                }
            }
        }

        let changed: Vec<String> = applied
            .iter()
            .map(|entry| entry.lease.module().descriptor().name().to_owned())
            .collect();
        if !changed.is_empty() {
            info!(
                target: DISPATCH_TARGET,
                operation = %rpc.operation,
                modules = ?changed,
                "configuration changed"
            );
        }
        let reply = if errors.is_empty() {
            data.map_or_else(Reply::ok, Reply::data)
        } else {
            Reply::errors(errors)
        };
        Ok(DispatchOutcome {
            reply: reply.for_message(rpc.message_id.clone()),
            results,
            changed,
        })
    }

    /// Undoes `applied` in reverse order. Each undo runs once; a failure is
    /// recorded and the remaining modules are still restored.
    fn roll_back(operation: &str, applied: &[Applied<'_>]) -> Result<(), DispatchError> {
        let mut failures = Vec::new();
        for entry in applied.iter().rev() {
            let module = entry.lease.module();
            let name = module.descriptor().name();
            match module.undo(operation, &entry.prior_state) {
                Ok(()) => info!(
                    target: DISPATCH_TARGET,
                    module = name,
                    operation,
                    "module change rolled back"
                ),
                Err(source) => {
                    error!(
                        target: DISPATCH_TARGET,
                        module = name,
                        operation,
                        error = %source,
                        "rollback failed; device state is unknown"
                    );
                    failures.push(UndoFailure {
                        module: name.to_owned(),
                        source,
                    });
                }
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(DispatchError::Inconsistent {
                operation: operation.to_owned(),
                failures,
            })
        }
    }
}

/// Deep-merges `fragment` into `target`; scalars in `fragment` win.
fn merge_data(target: &mut Value, fragment: Value) {
    match (target, fragment) {
        (Value::Object(existing), Value::Object(incoming)) => {
            for (key, value) in incoming {
                match existing.get_mut(&key) {
                    Some(slot) => merge_data(slot, value),
                    None => {
                        existing.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}
