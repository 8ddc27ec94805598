//! Scripted stand-in for the server's bus socket.

use std::collections::BTreeSet;
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use serde_json::json;
use tempfile::TempDir;

use netkeep_bus::{
    BusRequest, BusResponse, BusSignal, DEFAULT_MAX_FRAME_BYTES, EventRecord, FrameReader,
    ServerFrame, write_frame,
};
use netkeep_config::SocketEndpoint;
use netkeep_proto::{CapabilitySet, DEFAULT_STREAM, Reply, RpcError};

/// Behaviour the fake server follows.
#[derive(Debug, Clone, Default)]
pub struct ServerScript {
    /// Capabilities returned by `get-server-info`.
    pub capabilities: CapabilitySet,
    /// Journal contents.
    pub events: Vec<EventRecord>,
    /// Error returned for every `release-session`.
    pub release_error: Option<RpcError>,
    /// Response returned for every `dispatch`; echoes the operation when
    /// unset.
    pub dispatch: Option<BusResponse>,
    /// Sessions registered by other agents.
    pub other_sessions: Vec<String>,
}

#[derive(Debug, Default)]
struct ServerState {
    script: ServerScript,
    requests: Vec<BusRequest>,
    sessions: BTreeSet<String>,
    connections: Vec<Arc<Mutex<UnixStream>>>,
}

impl ServerState {
    fn answer(&mut self, request: BusRequest) -> BusResponse {
        self.requests.push(request.clone());
        match request {
            BusRequest::GetServerInfo => BusResponse::ServerInfo {
                capabilities: self.script.capabilities.clone(),
                streams: vec![DEFAULT_STREAM.to_owned()],
            },
            BusRequest::RegisterSession { session_id, .. } => {
                self.sessions.insert(session_id);
                BusResponse::Ok
            }
            BusRequest::ReleaseSession { session_id } => match &self.script.release_error {
                Some(error) => BusResponse::Error {
                    error: error.clone(),
                },
                None => {
                    self.sessions.remove(&session_id);
                    BusResponse::Ok
                }
            },
            BusRequest::TerminateSession { target, .. } => {
                if self.sessions.remove(&target) {
                    BusResponse::Ok
                } else {
                    BusResponse::Error {
                        error: RpcError::invalid_value("session-id"),
                    }
                }
            }
            BusRequest::Dispatch { rpc, .. } => self.script.dispatch.clone().unwrap_or_else(|| {
                BusResponse::Reply {
                    reply: Reply::data(json!({ "operation": rpc.operation })),
                }
            }),
            BusRequest::FetchEvents {
                session_id,
                stream,
                after,
                limit,
            } => {
                if !self.sessions.contains(&session_id) {
                    return BusResponse::Error {
                        error: RpcError::invalid_value("session-id"),
                    };
                }
                let records = self
                    .script
                    .events
                    .iter()
                    .filter(|record| record.seq > after && record.stream == stream)
                    .take(limit)
                    .cloned()
                    .collect();
                let last = self.script.events.last().map_or(0, |record| record.seq);
                BusResponse::Events { records, last }
            }
            BusRequest::SetModuleEnabled { .. } => BusResponse::Ok,
        }
    }
}

/// Bus server double listening on a Unix socket in a temporary directory.
pub struct FakeServer {
    _dir: TempDir,
    endpoint: SocketEndpoint,
    state: Arc<Mutex<ServerState>>,
}

impl FakeServer {
    /// Starts serving `script`.
    pub fn start(script: ServerScript) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("netkeepd.sock");
        let listener = UnixListener::bind(&path).expect("bind fake server");
        let mut state = ServerState {
            script,
            ..ServerState::default()
        };
        state.sessions.extend(state.script.other_sessions.iter().cloned());
        let state = Arc::new(Mutex::new(state));
        let accept_state = Arc::clone(&state);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let state = Arc::clone(&accept_state);
                thread::spawn(move || serve_connection(stream, &state));
            }
        });
        Self {
            endpoint: SocketEndpoint::unix(path.to_string_lossy().into_owned()),
            _dir: dir,
            state,
        }
    }

    /// Socket agents should dial.
    pub fn endpoint(&self) -> &SocketEndpoint {
        &self.endpoint
    }

    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().expect("fake server state")
    }

    /// Methods received so far, in arrival order.
    pub fn methods(&self) -> Vec<&'static str> {
        self.state().requests.iter().map(BusRequest::method).collect()
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<BusRequest> {
        self.state().requests.clone()
    }

    /// Appends a record to the journal.
    pub fn publish(&self, record: EventRecord) {
        self.state().script.events.push(record);
    }

    /// Reports whether the server still holds `session_id`.
    pub fn has_session(&self, session_id: &str) -> bool {
        self.state().sessions.contains(session_id)
    }

    /// Pushes a terminate signal down the first connection, which belongs to
    /// the agent's main loop.
    pub fn terminate(&self, session_id: &str, killed_by: &str) -> Result<(), String> {
        let connection = self
            .state()
            .connections
            .first()
            .cloned()
            .ok_or("no agent connected")?;
        self.state().sessions.remove(session_id);
        let signal = ServerFrame::Signal(BusSignal::Terminate {
            session_id: session_id.to_owned(),
            killed_by: Some(killed_by.to_owned()),
        });
        let mut stream = connection.lock().expect("connection");
        write_frame(&mut *stream, &signal).map_err(|error| error.to_string())
    }
}

fn serve_connection(stream: UnixStream, state: &Mutex<ServerState>) {
    let Ok(read_half) = stream.try_clone() else {
        return;
    };
    let writer = Arc::new(Mutex::new(stream));
    state
        .lock()
        .expect("fake server state")
        .connections
        .push(Arc::clone(&writer));
    let mut reader = FrameReader::new(read_half, DEFAULT_MAX_FRAME_BYTES);
    while let Ok(Some(request)) = reader.read_frame::<BusRequest>() {
        let response = state.lock().expect("fake server state").answer(request);
        let mut stream = writer.lock().expect("connection");
        if write_frame(&mut *stream, &ServerFrame::Response(response)).is_err() {
            break;
        }
    }
}
