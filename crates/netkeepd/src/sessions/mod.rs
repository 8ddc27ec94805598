//! Registry of live protocol sessions.
//!
//! The registry is the single source of truth for which agent connection owns
//! which session and what that session negotiated. Records are keyed by
//! session identifier, with an auxiliary index from owning connection to
//! session so that a dropped connection can be cleaned up without scanning.
//! Every operation takes the one registry lock; readers receive cloned
//! snapshots and never hold the lock while they work.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use netkeep_proto::CapabilitySet;
use thiserror::Error;
use time::OffsetDateTime;

const SESSIONS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::sessions");

/// Identity of one agent connection on the bus.
///
/// Identifiers follow the `:1.<n>` form and are never reused for the lifetime
/// of the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerId(String);

impl OwnerId {
    /// Builds the owner identity for the `n`th accepted connection.
    #[must_use]
    pub fn from_sequence(n: u64) -> Self {
        Self(format!(":1.{n}"))
    }

    /// Returns the identity as text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Capability exchange has not completed.
    Negotiating,
    /// The session accepts requests.
    Working,
    /// Termination was requested and is in progress.
    Terminating,
    /// The session has ended.
    Closed,
}

impl SessionStatus {
    /// Returns the lowercase name used in logs and monitoring data.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Negotiating => "negotiating",
            Self::Working => "working",
            Self::Terminating => "terminating",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Details supplied when a session is registered.
#[derive(Debug, Clone)]
pub struct SessionRegistration {
    id: String,
    owner: OwnerId,
    capabilities: CapabilitySet,
    username: Option<String>,
    transport_identity: Option<String>,
}

impl SessionRegistration {
    /// Describes a session negotiated by `owner`.
    #[must_use]
    pub fn new(id: impl Into<String>, owner: OwnerId, capabilities: CapabilitySet) -> Self {
        Self {
            id: id.into(),
            owner,
            capabilities,
            username: None,
            transport_identity: None,
        }
    }

    /// Records the local account the agent runs as.
    #[must_use]
    pub fn with_username(mut self, username: Option<String>) -> Self {
        self.username = username;
        self
    }

    /// Records the identity asserted by the secure transport.
    #[must_use]
    pub fn with_transport_identity(mut self, identity: Option<String>) -> Self {
        self.transport_identity = identity;
        self
    }
}

/// Read-only view of a registered session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    id: String,
    owner: OwnerId,
    capabilities: Arc<CapabilitySet>,
    username: Option<String>,
    transport_identity: Option<String>,
    login_time: OffsetDateTime,
    status: SessionStatus,
}

impl Session {
    /// Session identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Connection that owns the session.
    #[must_use]
    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    /// Capabilities negotiated at handshake; immutable afterwards.
    #[must_use]
    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    /// Shared handle to the negotiated capabilities.
    #[must_use]
    pub fn capabilities_handle(&self) -> Arc<CapabilitySet> {
        Arc::clone(&self.capabilities)
    }

    /// Local account the agent runs as.
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Identity asserted by the secure transport.
    #[must_use]
    pub fn transport_identity(&self) -> Option<&str> {
        self.transport_identity.as_deref()
    }

    /// Time the session was registered.
    #[must_use]
    pub fn login_time(&self) -> OffsetDateTime {
        self.login_time
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.status
    }
}

/// Errors raised by registry operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// The identifier is already registered.
    #[error("session {id} already exists")]
    Duplicate {
        /// Conflicting identifier.
        id: String,
    },
    /// The owning connection already holds a session.
    #[error("connection {owner} already owns session {id}")]
    OwnerBusy {
        /// Owning connection.
        owner: OwnerId,
        /// Session it already owns.
        id: String,
    },
    /// No session with the identifier exists.
    #[error("session {id} does not exist")]
    NotFound {
        /// Requested identifier.
        id: String,
    },
    /// The registry lock was poisoned by a panicking thread.
    #[error("session registry lock poisoned")]
    Poisoned,
}

#[derive(Debug, Default)]
struct SessionTable {
    by_id: HashMap<String, Session>,
    by_owner: HashMap<OwnerId, String>,
}

/// Table of live sessions.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    table: Mutex<SessionTable>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, SessionTable>, SessionError> {
        self.table.lock().map_err(|_| SessionError::Poisoned)
    }

    /// Registers a session that has completed its handshake.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Duplicate`] if the identifier is present and
    /// [`SessionError::OwnerBusy`] if the connection already owns a session.
    pub fn add(&self, registration: SessionRegistration) -> Result<Session, SessionError> {
        let mut table = self.lock()?;
        if table.by_id.contains_key(&registration.id) {
            return Err(SessionError::Duplicate {
                id: registration.id,
            });
        }
        if let Some(existing) = table.by_owner.get(&registration.owner) {
            return Err(SessionError::OwnerBusy {
                owner: registration.owner,
                id: existing.clone(),
            });
        }
        let session = Session {
            id: registration.id,
            owner: registration.owner,
            capabilities: Arc::new(registration.capabilities),
            username: registration.username,
            transport_identity: registration.transport_identity,
            login_time: OffsetDateTime::now_utc(),
            status: SessionStatus::Working,
        };
        table
            .by_owner
            .insert(session.owner.clone(), session.id.clone());
        table.by_id.insert(session.id.clone(), session.clone());
        tracing::info!(
            target: SESSIONS_TARGET,
            session_id = %session.id,
            owner = %session.owner,
            capabilities = session.capabilities.len(),
            "session registered"
        );
        Ok(session)
    }

    /// Removes a session by identifier. Absent identifiers are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Poisoned`] if the registry lock is poisoned.
    pub fn remove_by_id(&self, id: &str) -> Result<Option<Session>, SessionError> {
        let mut table = self.lock()?;
        let removed = table.by_id.remove(id);
        if let Some(session) = &removed {
            table.by_owner.remove(&session.owner);
        }
        Ok(removed.map(close))
    }

    /// Removes the session owned by a connection. Unknown owners are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Poisoned`] if the registry lock is poisoned.
    pub fn remove_by_owner(&self, owner: &OwnerId) -> Result<Option<Session>, SessionError> {
        let mut table = self.lock()?;
        let removed = table
            .by_owner
            .remove(owner)
            .and_then(|id| table.by_id.remove(&id));
        Ok(removed.map(close))
    }

    /// Looks up a session by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Poisoned`] if the registry lock is poisoned.
    pub fn get_by_id(&self, id: &str) -> Result<Option<Session>, SessionError> {
        Ok(self.lock()?.by_id.get(id).cloned())
    }

    /// Looks up the session owned by a connection.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Poisoned`] if the registry lock is poisoned.
    pub fn get_by_owner(&self, owner: &OwnerId) -> Result<Option<Session>, SessionError> {
        let table = self.lock()?;
        Ok(table
            .by_owner
            .get(owner)
            .and_then(|id| table.by_id.get(id))
            .cloned())
    }

    /// Updates the lifecycle state of a session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotFound`] for unknown identifiers.
    pub fn set_status(&self, id: &str, status: SessionStatus) -> Result<(), SessionError> {
        let mut table = self.lock()?;
        let session = table.by_id.get_mut(id).ok_or_else(|| SessionError::NotFound {
            id: id.to_owned(),
        })?;
        session.status = status;
        Ok(())
    }

    /// Returns a snapshot of all sessions ordered by login time.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Poisoned`] if the registry lock is poisoned.
    pub fn snapshot(&self) -> Result<Vec<Session>, SessionError> {
        let mut sessions: Vec<Session> = self.lock()?.by_id.values().cloned().collect();
        sessions.sort_by(|left, right| {
            left.login_time
                .cmp(&right.login_time)
                .then_with(|| left.id.cmp(&right.id))
        });
        Ok(sessions)
    }

    /// Number of live sessions.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Poisoned`] if the registry lock is poisoned.
    pub fn len(&self) -> Result<usize, SessionError> {
        Ok(self.lock()?.by_id.len())
    }
}

fn close(mut session: Session) -> Session {
    session.status = SessionStatus::Closed;
    tracing::info!(
        target: SESSIONS_TARGET,
        session_id = %session.id,
        owner = %session.owner,
        "session removed"
    );
    session
}
