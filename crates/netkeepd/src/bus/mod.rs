//! Serves agent connections on the bus socket.
//!
//! Every accepted connection is one owner. Requests on a connection are
//! answered strictly in order; `terminate` signals for the owner's session
//! may be pushed by other connections at any time, so all writes to a
//! connection go through one mutex-guarded handle. When a connection ends the
//! owner's session is dropped from the registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, error, info, warn};

use netkeep_bus::{
    BusError, BusRequest, BusResponse, BusSignal, FrameReader, ServerFrame, write_frame,
};
use netkeep_proto::{Capability, CapabilitySet, DEFAULT_STREAM, ErrorTag, Rpc, RpcError, capability};

use crate::dispatch::DispatchEngine;
use crate::events::{EventJournal, TerminationReason};
use crate::health::HealthReporter;
use crate::modules::{ModuleRegistry, RegistryError};
use crate::sessions::{
    OwnerId, Session, SessionError, SessionRegistration, SessionRegistry, SessionStatus,
};
use crate::transport::{ConnectionHandler, ConnectionStream};

const BUS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::bus");

/// Protocol capabilities the server offers on top of module namespaces.
const PROTOCOL_CAPABILITIES: [&str; 6] = [
    capability::BASE_1_0,
    capability::BASE_1_1,
    capability::WRITABLE_RUNNING,
    capability::ROLLBACK_ON_ERROR,
    capability::NOTIFICATION,
    capability::INTERLEAVE,
];

type Writer = Arc<Mutex<ConnectionStream>>;

/// Shared state behind the bus listener.
pub struct BusServer {
    sessions: Arc<SessionRegistry>,
    modules: ModuleRegistry,
    engine: DispatchEngine,
    journal: Arc<EventJournal>,
    reporter: Arc<dyn HealthReporter>,
    peers: Mutex<HashMap<OwnerId, Writer>>,
    next_owner: AtomicU64,
    max_frame_bytes: usize,
}

impl BusServer {
    /// Builds a server over the shared registries.
    pub fn new(
        sessions: Arc<SessionRegistry>,
        modules: ModuleRegistry,
        journal: Arc<EventJournal>,
        reporter: Arc<dyn HealthReporter>,
        max_frame_bytes: usize,
    ) -> Self {
        Self {
            engine: DispatchEngine::new(modules.clone()),
            sessions,
            modules,
            journal,
            reporter,
            peers: Mutex::new(HashMap::new()),
            next_owner: AtomicU64::new(0),
            max_frame_bytes,
        }
    }

    /// Session table shared with the monitoring module.
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Module table used for dispatch.
    pub const fn modules(&self) -> &ModuleRegistry {
        &self.modules
    }

    /// Event journal served to notification workers.
    pub fn journal(&self) -> &Arc<EventJournal> {
        &self.journal
    }

    fn next_owner(&self) -> OwnerId {
        OwnerId::from_sequence(self.next_owner.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn attach(&self, owner: &OwnerId, writer: Writer) -> bool {
        match self.peers.lock() {
            Ok(mut peers) => {
                peers.insert(owner.clone(), writer);
                true
            }
            Err(_) => false,
        }
    }

    fn writer_for(&self, owner: &OwnerId) -> Option<Writer> {
        self.peers
            .lock()
            .ok()
            .and_then(|peers| peers.get(owner).map(Arc::clone))
    }

    fn detach(&self, owner: &OwnerId) {
        if let Ok(mut peers) = self.peers.lock() {
            peers.remove(owner);
        }
        match self.sessions.remove_by_owner(owner) {
            Ok(Some(session)) => {
                info!(
                    target: BUS_TARGET,
                    event = "session_dropped",
                    session_id = session.id(),
                    owner = %owner,
                    "agent connection lost; session dropped"
                );
                self.journal_end(&session, TerminationReason::Dropped, None);
            }
            Ok(None) => {}
            Err(error) => warn!(
                target: BUS_TARGET,
                owner = %owner,
                error = %error,
                "failed to drop sessions of disconnected agent"
            ),
        }
    }

    /// Ends every live session ahead of process exit.
    ///
    /// Each owning agent receives a `terminate` signal with no killer and the
    /// session is journalled as killed. Agent connections are then closed so
    /// their handler threads stop reading. Returns the number of sessions
    /// ended.
    pub fn shut_down(&self) -> usize {
        let sessions = self.sessions.snapshot().unwrap_or_else(|error| {
            warn!(target: BUS_TARGET, error = %error, "session table unreadable during shutdown");
            Vec::new()
        });
        let mut ended = 0;
        for session in sessions {
            if let Some(writer) = self.writer_for(session.owner()) {
                let signal = ServerFrame::Signal(BusSignal::Terminate {
                    session_id: session.id().to_owned(),
                    killed_by: None,
                });
                if let Err(error) = send(&writer, &signal) {
                    debug!(
                        target: BUS_TARGET,
                        session_id = session.id(),
                        error = %error,
                        "failed to signal agent during shutdown"
                    );
                }
            }
            match self.sessions.remove_by_id(session.id()) {
                Ok(Some(_)) => {
                    self.journal_end(&session, TerminationReason::Killed, None);
                    ended += 1;
                }
                Ok(None) => {}
                Err(error) => warn!(
                    target: BUS_TARGET,
                    session_id = session.id(),
                    error = %error,
                    "failed to remove session during shutdown"
                ),
            }
        }

        let writers: Vec<Writer> = self
            .peers
            .lock()
            .map(|mut peers| peers.drain().map(|(_, writer)| writer).collect())
            .unwrap_or_default();
        for writer in writers {
            let closed = writer.lock().map(|stream| stream.shutdown());
            if let Ok(Err(error)) = closed {
                debug!(target: BUS_TARGET, error = %error, "agent connection already closed");
            }
        }
        info!(
            target: BUS_TARGET,
            event = "bus_drained",
            sessions = ended,
            "all sessions ended for shutdown"
        );
        ended
    }

    /// Answers one request from `owner`.
    pub(crate) fn serve(&self, owner: &OwnerId, request: BusRequest) -> BusResponse {
        let method = request.method();
        debug!(target: BUS_TARGET, owner = %owner, method, "serving bus request");
        let result = match request {
            BusRequest::GetServerInfo => self.server_info(),
            BusRequest::RegisterSession {
                session_id,
                capabilities,
                username,
                transport_identity,
            } => self.register(
                SessionRegistration::new(session_id, owner.clone(), capabilities)
                    .with_username(username)
                    .with_transport_identity(transport_identity),
            ),
            BusRequest::ReleaseSession { session_id } => self.release(owner, &session_id),
            BusRequest::TerminateSession { session_id, target } => {
                self.terminate(owner, &session_id, &target)
            }
            BusRequest::Dispatch { session_id, rpc } => self.dispatch(owner, &session_id, &rpc),
            BusRequest::FetchEvents {
                session_id,
                stream,
                after,
                limit,
            } => self.fetch_events(&session_id, &stream, after, limit),
            BusRequest::SetModuleEnabled { name, enabled } => {
                self.set_module_enabled(&name, enabled)
            }
        };
        result.unwrap_or_else(|error| {
            debug!(
                target: BUS_TARGET,
                owner = %owner,
                method,
                tag = error.error_tag.as_str(),
                "bus request rejected"
            );
            BusResponse::Error { error }
        })
    }

    fn server_info(&self) -> Result<BusResponse, RpcError> {
        let mut capabilities: CapabilitySet =
            PROTOCOL_CAPABILITIES.into_iter().map(Capability::new).collect();
        capabilities.extend(self.modules.capabilities().map_err(internal)?.iter().cloned());
        Ok(BusResponse::ServerInfo {
            capabilities,
            streams: vec![DEFAULT_STREAM.to_owned()],
        })
    }

    fn register(&self, registration: SessionRegistration) -> Result<BusResponse, RpcError> {
        let session = self.sessions.add(registration).map_err(|error| match error {
            SessionError::Duplicate { ref id } => RpcError::new(ErrorTag::InUse)
                .with_session_id(id.clone())
                .with_message(error.to_string()),
            SessionError::OwnerBusy { ref id, .. } => RpcError::new(ErrorTag::InUse)
                .with_session_id(id.clone())
                .with_message(error.to_string()),
            other => internal(other),
        })?;
        info!(
            target: BUS_TARGET,
            event = "session_started",
            session_id = session.id(),
            owner = %session.owner(),
            username = session.username(),
            "session registered"
        );
        if let Err(error) = self.journal.session_started(&session) {
            warn!(target: BUS_TARGET, error = %error, "failed to journal session start");
        }
        Ok(BusResponse::Ok)
    }

    fn owned_session(&self, owner: &OwnerId, session_id: &str) -> Result<Session, RpcError> {
        let session = self
            .sessions
            .get_by_id(session_id)
            .map_err(internal)?
            .ok_or_else(|| unknown_session(session_id))?;
        if session.owner() != owner {
            return Err(RpcError::new(ErrorTag::AccessDenied)
                .with_session_id(session_id)
                .with_message("session belongs to another agent"));
        }
        Ok(session)
    }

    fn release(&self, owner: &OwnerId, session_id: &str) -> Result<BusResponse, RpcError> {
        let session = self.owned_session(owner, session_id)?;
        if self.sessions.remove_by_id(session.id()).map_err(internal)?.is_some() {
            info!(
                target: BUS_TARGET,
                event = "session_closed",
                session_id,
                "session released"
            );
            self.journal_end(&session, TerminationReason::Closed, None);
        }
        Ok(BusResponse::Ok)
    }

    fn terminate(
        &self,
        owner: &OwnerId,
        session_id: &str,
        target: &str,
    ) -> Result<BusResponse, RpcError> {
        self.owned_session(owner, session_id)?;
        if target == session_id {
            return Err(RpcError::invalid_value("session-id")
                .with_message("a session cannot kill itself"));
        }
        let victim = self
            .sessions
            .get_by_id(target)
            .map_err(internal)?
            .ok_or_else(|| unknown_session(target))?;
        self.mark_terminating(target)?;

        let signal = ServerFrame::Signal(BusSignal::Terminate {
            session_id: target.to_owned(),
            killed_by: Some(session_id.to_owned()),
        });
        match self.writer_for(victim.owner()) {
            Some(writer) => {
                if let Err(error) = send(&writer, &signal) {
                    warn!(
                        target: BUS_TARGET,
                        session_id = target,
                        error = %error,
                        "failed to signal terminated agent"
                    );
                }
            }
            None => warn!(
                target: BUS_TARGET,
                session_id = target,
                "terminated session has no live agent connection"
            ),
        }

        if self.sessions.remove_by_id(target).map_err(internal)?.is_some() {
            info!(
                target: BUS_TARGET,
                event = "session_killed",
                session_id = target,
                killed_by = session_id,
                "session terminated"
            );
            self.journal_end(&victim, TerminationReason::Killed, Some(session_id));
        }
        Ok(BusResponse::Ok)
    }

    /// Flags `target` for termination; the owner may have released it since
    /// it was looked up.
    fn mark_terminating(&self, target: &str) -> Result<(), RpcError> {
        self.sessions
            .set_status(target, SessionStatus::Terminating)
            .map_err(|error| match error {
                SessionError::NotFound { .. } => unknown_session(target),
                other => internal(other),
            })
    }

    fn dispatch(
        &self,
        owner: &OwnerId,
        session_id: &str,
        rpc: &Rpc,
    ) -> Result<BusResponse, RpcError> {
        let session = self.owned_session(owner, session_id)?;
        match self.engine.dispatch(rpc, session.capabilities()) {
            Ok(outcome) => {
                if outcome.is_change()
                    && let Err(error) =
                        self.journal
                            .config_changed(&session, &rpc.operation, &outcome.changed)
                {
                    warn!(target: BUS_TARGET, error = %error, "failed to journal config change");
                }
                Ok(BusResponse::Reply {
                    reply: outcome.reply,
                })
            }
            Err(failure) if failure.is_fatal() => {
                error!(
                    target: BUS_TARGET,
                    session_id,
                    operation = %rpc.operation,
                    error = %failure,
                    "dispatch left the device in an unknown state"
                );
                self.reporter.fatal_inconsistency(&failure);
                Ok(BusResponse::Fatal {
                    message: failure.to_string(),
                })
            }
            Err(failure) => Err(internal(failure)),
        }
    }

    fn fetch_events(
        &self,
        session_id: &str,
        stream: &str,
        after: u64,
        limit: usize,
    ) -> Result<BusResponse, RpcError> {
        if self.sessions.get_by_id(session_id).map_err(internal)?.is_none() {
            return Err(unknown_session(session_id));
        }
        let (records, last) = self
            .journal
            .fetch(stream, after, limit)
            .map_err(internal)?;
        Ok(BusResponse::Events { records, last })
    }

    fn set_module_enabled(&self, name: &str, enabled: bool) -> Result<BusResponse, RpcError> {
        match self.modules.set_enabled(name, enabled) {
            Ok(()) => {
                info!(
                    target: BUS_TARGET,
                    event = "module_toggled",
                    module = name,
                    enabled,
                    "module state changed"
                );
                Ok(BusResponse::Ok)
            }
            Err(RegistryError::NotFound { .. }) => Err(RpcError::invalid_value("name")
                .with_message(format!("module '{name}' is not registered"))),
            Err(other) => Err(internal(other)),
        }
    }

    fn journal_end(&self, session: &Session, reason: TerminationReason, killed_by: Option<&str>) {
        if let Err(error) = self.journal.session_ended(session, reason, killed_by) {
            warn!(target: BUS_TARGET, error = %error, "failed to journal session end");
        }
    }
}

impl ConnectionHandler for BusServer {
    fn handle(&self, stream: ConnectionStream) {
        let owner = self.next_owner();
        let peer = stream.peer();
        let writer = match stream.try_clone() {
            Ok(clone) => Arc::new(Mutex::new(clone)),
            Err(error) => {
                warn!(target: BUS_TARGET, peer = %peer, error = %error, "failed to clone connection");
                return;
            }
        };
        if !self.attach(&owner, Arc::clone(&writer)) {
            warn!(target: BUS_TARGET, peer = %peer, "peer table poisoned; refusing connection");
            return;
        }
        debug!(target: BUS_TARGET, owner = %owner, peer = %peer, "agent connected");

        let mut reader = FrameReader::new(stream, self.max_frame_bytes);
        loop {
            let response = match reader.read_frame::<BusRequest>() {
                Ok(Some(request)) => self.serve(&owner, request),
                Ok(None) => break,
                Err(BusError::Decode(error)) => BusResponse::Error {
                    error: RpcError::malformed_message(error.to_string()),
                },
                Err(BusError::FrameTooLarge { limit }) => {
                    let rejection = ServerFrame::Response(BusResponse::Error {
                        error: RpcError::malformed_message(format!(
                            "bus frame exceeds {limit} bytes"
                        )),
                    });
                    if let Err(error) = send(&writer, &rejection) {
                        debug!(target: BUS_TARGET, owner = %owner, error = %error, "failed to reject oversized frame");
                    }
                    break;
                }
                Err(error) => {
                    debug!(target: BUS_TARGET, owner = %owner, error = %error, "agent read failed");
                    break;
                }
            };
            if let Err(error) = send(&writer, &ServerFrame::Response(response)) {
                debug!(target: BUS_TARGET, owner = %owner, error = %error, "agent write failed");
                break;
            }
        }

        self.detach(&owner);
        if let Err(error) = reader.get_ref().shutdown() {
            debug!(target: BUS_TARGET, owner = %owner, error = %error, "connection shutdown failed");
        }
        debug!(target: BUS_TARGET, owner = %owner, "agent disconnected");
    }
}

fn send(writer: &Writer, frame: &ServerFrame) -> Result<(), BusError> {
    let mut stream = writer.lock().map_err(|_| {
        BusError::Io(std::io::Error::other("connection writer lock poisoned"))
    })?;
    write_frame(&mut *stream, frame)
}

fn internal(error: impl std::fmt::Display) -> RpcError {
    RpcError::operation_failed().with_message(error.to_string())
}

fn unknown_session(session_id: &str) -> RpcError {
    RpcError::invalid_value("session-id")
        .with_session_id(session_id)
        .with_message(format!("session {session_id} does not exist"))
}

#[cfg(test)]
mod tests;
