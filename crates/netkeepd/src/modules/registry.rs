//! Reference-counted table of configuration modules.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use netkeep_proto::CapabilitySet;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{MODULES_TARGET, Module};

/// Errors raised by registry operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Another module already uses the name.
    #[error("module name '{name}' is already registered")]
    NameInUse {
        /// Conflicting name.
        name: String,
    },
    /// An enabled module already uses the numeric identifier.
    #[error("module id {id} is already used by '{holder}'")]
    IdInUse {
        /// Conflicting identifier.
        id: u32,
        /// Name of the module holding the identifier.
        holder: String,
    },
    /// No module with the name is registered.
    #[error("module '{name}' is not registered")]
    NotFound {
        /// Requested name.
        name: String,
    },
    /// Dispatches against the module did not drain in time.
    #[error("module '{name}' still has {in_flight} call(s) in flight")]
    Busy {
        /// Module being removed.
        name: String,
        /// Calls still holding a lease.
        in_flight: usize,
    },
    /// The registry lock was poisoned by a panicking thread.
    #[error("module registry lock poisoned")]
    Poisoned,
}

/// Point-in-time view of one registered module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSummary {
    /// Module name.
    pub name: String,
    /// Numeric identifier.
    pub id: u32,
    /// Repository identifier, if any.
    pub repository: Option<u32>,
    /// Whether new dispatches may select the module.
    pub enabled: bool,
    /// Calls currently holding a lease.
    pub in_flight: usize,
}

struct Entry {
    module: Arc<dyn Module>,
    enabled: bool,
    in_flight: usize,
}

#[derive(Default)]
struct State {
    entries: BTreeMap<u64, Entry>,
    next_seq: u64,
}

impl State {
    fn seq_of(&self, name: &str) -> Option<u64> {
        self.entries
            .iter()
            .find(|(_, entry)| entry.module.descriptor().name() == name)
            .map(|(seq, _)| *seq)
    }

    fn check_id(&self, module: &dyn Module, skip: Option<u64>) -> Result<(), RegistryError> {
        let id = module.descriptor().id();
        if id == 0 {
            return Ok(());
        }
        let holder = self.entries.iter().find(|(seq, entry)| {
            Some(**seq) != skip && entry.enabled && entry.module.descriptor().id() == id
        });
        match holder {
            Some((_, entry)) => Err(RegistryError::IdInUse {
                id,
                holder: entry.module.descriptor().name().to_owned(),
            }),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    drained: Condvar,
}

impl Shared {
    fn lock(&self) -> Result<MutexGuard<'_, State>, RegistryError> {
        self.state.lock().map_err(|_| RegistryError::Poisoned)
    }
}

/// Table of configuration modules in registration order.
///
/// Cloning the registry yields another handle to the same table.
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    shared: Arc<Shared>,
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRegistry").finish_non_exhaustive()
    }
}

impl ModuleRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an enabled module.
    ///
    /// A disabled, idle module with the same name is replaced; the newcomer
    /// takes the last position in registration order.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NameInUse`] when the name belongs to an
    /// enabled or busy module and [`RegistryError::IdInUse`] when a non-zero
    /// numeric id collides with an enabled module.
    pub fn add(&self, module: Arc<dyn Module>) -> Result<(), RegistryError> {
        self.insert(module, true)
    }

    /// Registers a module that starts disabled.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NameInUse`] when the name is taken.
    pub fn add_disabled(&self, module: Arc<dyn Module>) -> Result<(), RegistryError> {
        self.insert(module, false)
    }

    fn insert(&self, module: Arc<dyn Module>, enabled: bool) -> Result<(), RegistryError> {
        let name = module.descriptor().name().to_owned();
        let mut state = self.shared.lock()?;
        if let Some(seq) = state.seq_of(&name) {
            let replaceable = state
                .entries
                .get(&seq)
                .is_some_and(|entry| !entry.enabled && entry.in_flight == 0);
            if !replaceable {
                return Err(RegistryError::NameInUse { name });
            }
            state.entries.remove(&seq);
        }
        if enabled {
            state.check_id(module.as_ref(), None)?;
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        info!(
            target: MODULES_TARGET,
            module = %name,
            id = module.descriptor().id(),
            enabled,
            "module registered"
        );
        state.entries.insert(
            seq,
            Entry {
                module,
                enabled,
                in_flight: 0,
            },
        );
        Ok(())
    }

    /// Disables a module, waits for in-flight calls to drain, then drops it.
    ///
    /// The module is disabled immediately so no new dispatch selects it.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for unknown names and
    /// [`RegistryError::Busy`] when calls are still in flight after
    /// `drain_timeout`; the module then stays registered but disabled.
    pub fn remove(
        &self,
        name: &str,
        drain_timeout: Duration,
    ) -> Result<Arc<dyn Module>, RegistryError> {
        let mut state = self.shared.lock()?;
        let seq = state.seq_of(name).ok_or_else(|| RegistryError::NotFound {
            name: name.to_owned(),
        })?;
        if let Some(entry) = state.entries.get_mut(&seq) {
            entry.enabled = false;
        }
        let (mut state, _) = self
            .shared
            .drained
            .wait_timeout_while(state, drain_timeout, |state| {
                state
                    .entries
                    .get(&seq)
                    .is_some_and(|entry| entry.in_flight > 0)
            })
            .map_err(|_| RegistryError::Poisoned)?;
        let in_flight = state.entries.get(&seq).map_or(0, |entry| entry.in_flight);
        if in_flight > 0 {
            warn!(
                target: MODULES_TARGET,
                module = name,
                in_flight,
                "module removal timed out; module left disabled"
            );
            return Err(RegistryError::Busy {
                name: name.to_owned(),
                in_flight,
            });
        }
        let entry = state
            .entries
            .remove(&seq)
            .ok_or_else(|| RegistryError::NotFound {
                name: name.to_owned(),
            })?;
        info!(target: MODULES_TARGET, module = name, "module removed");
        Ok(entry.module)
    }

    /// Enables or disables a module.
    ///
    /// Disabling does not affect calls that already hold a lease.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for unknown names and
    /// [`RegistryError::IdInUse`] when enabling would duplicate an id.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), RegistryError> {
        let mut state = self.shared.lock()?;
        let seq = state.seq_of(name).ok_or_else(|| RegistryError::NotFound {
            name: name.to_owned(),
        })?;
        if enabled {
            let module = state
                .entries
                .get(&seq)
                .map(|entry| Arc::clone(&entry.module));
            if let Some(module) = module {
                state.check_id(module.as_ref(), Some(seq))?;
            }
        }
        if let Some(entry) = state.entries.get_mut(&seq) {
            entry.enabled = enabled;
        }
        info!(target: MODULES_TARGET, module = name, enabled, "module state changed");
        Ok(())
    }

    /// Looks up the first module with the numeric id, in registration order.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Poisoned`] if the registry lock is poisoned.
    pub fn get_by_id(&self, id: u32) -> Result<Option<Arc<dyn Module>>, RegistryError> {
        self.find(|module| module.descriptor().id() == id)
    }

    /// Looks up a module by name.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Poisoned`] if the registry lock is poisoned.
    pub fn get_by_name(&self, name: &str) -> Result<Option<Arc<dyn Module>>, RegistryError> {
        self.find(|module| module.descriptor().name() == name)
    }

    /// Looks up the module owning a configuration repository.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Poisoned`] if the registry lock is poisoned.
    pub fn get_by_repository_id(
        &self,
        repository: u32,
    ) -> Result<Option<Arc<dyn Module>>, RegistryError> {
        self.find(|module| module.descriptor().repository() == Some(repository))
    }

    fn find(
        &self,
        predicate: impl Fn(&dyn Module) -> bool,
    ) -> Result<Option<Arc<dyn Module>>, RegistryError> {
        let state = self.shared.lock()?;
        Ok(state
            .entries
            .values()
            .find(|entry| predicate(entry.module.as_ref()))
            .map(|entry| Arc::clone(&entry.module)))
    }

    /// Reports whether the named module is registered and enabled.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Poisoned`] if the registry lock is poisoned.
    pub fn is_enabled(&self, name: &str) -> Result<bool, RegistryError> {
        let state = self.shared.lock()?;
        Ok(state
            .seq_of(name)
            .and_then(|seq| state.entries.get(&seq))
            .is_some_and(|entry| entry.enabled))
    }

    /// Selects every enabled module implementing `operation` that shares a
    /// capability with `required`, in registration order.
    ///
    /// Each selected module is returned as a lease that keeps it registered
    /// until the lease is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Poisoned`] if the registry lock is poisoned.
    pub fn find_implementing(
        &self,
        operation: &str,
        required: &CapabilitySet,
    ) -> Result<Vec<ModuleLease>, RegistryError> {
        let mut state = self.shared.lock()?;
        let mut leases = Vec::new();
        for (seq, entry) in &mut state.entries {
            let descriptor = entry.module.descriptor();
            if entry.enabled
                && descriptor.implements(operation)
                && descriptor.capabilities().intersects(required)
            {
                entry.in_flight += 1;
                leases.push(ModuleLease {
                    shared: Arc::clone(&self.shared),
                    seq: *seq,
                    module: Arc::clone(&entry.module),
                });
            }
        }
        debug!(
            target: MODULES_TARGET,
            operation,
            selected = leases.len(),
            "modules selected"
        );
        Ok(leases)
    }

    /// Summaries of every registered module in registration order.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Poisoned`] if the registry lock is poisoned.
    pub fn summaries(&self) -> Result<Vec<ModuleSummary>, RegistryError> {
        let state = self.shared.lock()?;
        Ok(state
            .entries
            .values()
            .map(|entry| {
                let descriptor = entry.module.descriptor();
                ModuleSummary {
                    name: descriptor.name().to_owned(),
                    id: descriptor.id(),
                    repository: descriptor.repository(),
                    enabled: entry.enabled,
                    in_flight: entry.in_flight,
                }
            })
            .collect())
    }

    /// Union of the capabilities served by enabled modules.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Poisoned`] if the registry lock is poisoned.
    pub fn capabilities(&self) -> Result<CapabilitySet, RegistryError> {
        let state = self.shared.lock()?;
        Ok(state
            .entries
            .values()
            .filter(|entry| entry.enabled)
            .flat_map(|entry| entry.module.capabilities().iter().cloned())
            .collect())
    }
}

/// In-flight reference to a selected module.
///
/// While a lease is alive the registry will not release the module; dropping
/// the lease wakes any pending removal.
pub struct ModuleLease {
    shared: Arc<Shared>,
    seq: u64,
    module: Arc<dyn Module>,
}

impl ModuleLease {
    /// The leased module.
    #[must_use]
    pub fn module(&self) -> &dyn Module {
        self.module.as_ref()
    }
}

impl fmt::Debug for ModuleLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleLease")
            .field("module", &self.module.descriptor().name())
            .finish_non_exhaustive()
    }
}

impl Drop for ModuleLease {
    fn drop(&mut self) {
        let mut state = self
            .shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = state.entries.get_mut(&self.seq) {
            entry.in_flight = entry.in_flight.saturating_sub(1);
        }
        drop(state);
        self.shared.drained.notify_all();
    }
}
