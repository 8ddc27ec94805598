//! Agent-side bus client.
//!
//! [`BusClient`] issues one request at a time and waits for its response.
//! Signals that arrive while a call is outstanding are queued and handed out
//! later through [`BusClient::take_signal`], so no termination request is lost
//! behind a reply.

use std::collections::VecDeque;
use std::io::{Read, Write};

use netkeep_config::SocketEndpoint;
use netkeep_proto::{CapabilitySet, Reply, Rpc};

use crate::error::BusError;
use crate::frame::{FrameReader, write_frame};
use crate::protocol::{BusRequest, BusResponse, BusSignal, EventRecord, ServerFrame};
use crate::transport::{self, BusStream};

/// Capabilities and streams advertised by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    /// Capabilities offered to clients.
    pub capabilities: CapabilitySet,
    /// Event streams available for subscription.
    pub streams: Vec<String>,
}

/// Journal records returned by [`BusClient::fetch_events`].
#[derive(Debug, Clone, PartialEq)]
pub struct EventBatch {
    /// Records newer than the requested cursor, in sequence order.
    pub records: Vec<EventRecord>,
    /// Highest sequence number issued by the server.
    pub last: u64,
}

/// Connection to the server's bus socket.
#[derive(Debug)]
pub struct BusClient<S> {
    reader: FrameReader<S>,
    pending: VecDeque<BusSignal>,
}

impl BusClient<BusStream> {
    /// Dials `endpoint` and wraps the connection.
    ///
    /// # Errors
    ///
    /// Propagates connection failures from [`transport::connect`].
    pub fn connect(endpoint: &SocketEndpoint, limit: usize) -> Result<Self, BusError> {
        transport::connect(endpoint).map(|stream| Self::new(stream, limit))
    }
}

impl<S: Read + Write> BusClient<S> {
    /// Wraps an established stream.
    pub fn new(stream: S, limit: usize) -> Self {
        Self {
            reader: FrameReader::new(stream, limit),
            pending: VecDeque::new(),
        }
    }

    /// Returns the underlying stream.
    pub fn get_ref(&self) -> &S {
        self.reader.get_ref()
    }

    /// Reports whether received bytes wait in the read buffer.
    ///
    /// Callers multiplexing the socket with `poll` must drain buffered frames
    /// before waiting on the descriptor again.
    pub fn has_buffered(&self) -> bool {
        !self.pending.is_empty() || self.reader.has_buffered()
    }

    /// Sends `request` and waits for its response.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Disconnected`] when the server closes the
    /// connection before responding, or any framing error.
    pub fn call(&mut self, request: &BusRequest) -> Result<BusResponse, BusError> {
        write_frame(self.reader.get_mut(), request)?;
        loop {
            match self.reader.read_frame::<ServerFrame>()? {
                Some(ServerFrame::Response(response)) => return Ok(response),
                Some(ServerFrame::Signal(signal)) => self.pending.push_back(signal),
                None => return Err(BusError::Disconnected),
            }
        }
    }

    /// Pops a signal queued during an earlier call.
    pub fn take_signal(&mut self) -> Option<BusSignal> {
        self.pending.pop_front()
    }

    /// Reads the next signal, blocking until one arrives.
    ///
    /// Use this only when the socket is known to be readable and no call is
    /// outstanding.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Disconnected`] on end of stream and
    /// [`BusError::UnexpectedResponse`] if a response arrives unrequested.
    pub fn read_signal(&mut self) -> Result<BusSignal, BusError> {
        if let Some(signal) = self.pending.pop_front() {
            return Ok(signal);
        }
        match self.reader.read_frame::<ServerFrame>()? {
            Some(ServerFrame::Signal(signal)) => Ok(signal),
            Some(ServerFrame::Response(response)) => Err(BusError::UnexpectedResponse {
                expected: "signal",
                received: response.kind(),
            }),
            None => Err(BusError::Disconnected),
        }
    }

    /// Queries the server's capabilities and event streams.
    ///
    /// # Errors
    ///
    /// Propagates transport failures and rejections.
    pub fn server_info(&mut self) -> Result<ServerInfo, BusError> {
        match self.call(&BusRequest::GetServerInfo)? {
            BusResponse::ServerInfo {
                capabilities,
                streams,
            } => Ok(ServerInfo {
                capabilities,
                streams,
            }),
            other => Err(unexpected("server-info", other)),
        }
    }

    /// Registers a negotiated session.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Rejected`] when the server refuses the session, for
    /// example because the identifier is already registered.
    pub fn register_session(
        &mut self,
        session_id: &str,
        capabilities: &CapabilitySet,
        username: Option<&str>,
        transport_identity: Option<&str>,
    ) -> Result<(), BusError> {
        let request = BusRequest::RegisterSession {
            session_id: session_id.to_owned(),
            capabilities: capabilities.clone(),
            username: username.map(str::to_owned),
            transport_identity: transport_identity.map(str::to_owned),
        };
        expect_ok(self.call(&request)?)
    }

    /// Releases the caller's session.
    ///
    /// # Errors
    ///
    /// Propagates transport failures and rejections.
    pub fn release_session(&mut self, session_id: &str) -> Result<(), BusError> {
        expect_ok(self.call(&BusRequest::ReleaseSession {
            session_id: session_id.to_owned(),
        })?)
    }

    /// Asks the server to terminate `target` on behalf of `session_id`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Rejected`] carrying the protocol error when the
    /// target is unknown or names the caller.
    pub fn terminate_session(&mut self, session_id: &str, target: &str) -> Result<(), BusError> {
        expect_ok(self.call(&BusRequest::TerminateSession {
            session_id: session_id.to_owned(),
            target: target.to_owned(),
        })?)
    }

    /// Routes a request to the configuration modules.
    ///
    /// Rejections are folded into an error reply; only transport failures and
    /// server inconsistencies surface as errors.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Fatal`] when the server reports an inconsistent
    /// state, or any transport failure.
    pub fn dispatch(&mut self, session_id: &str, rpc: &Rpc) -> Result<Reply, BusError> {
        let request = BusRequest::Dispatch {
            session_id: session_id.to_owned(),
            rpc: rpc.clone(),
        };
        match self.call(&request)? {
            BusResponse::Reply { reply } => Ok(reply),
            BusResponse::Error { error } => Ok(Reply::error(error)),
            BusResponse::Fatal { message } => Err(BusError::Fatal { message }),
            other => Err(unexpected("reply", other)),
        }
    }

    /// Reads journal records newer than `after`.
    ///
    /// # Errors
    ///
    /// Propagates transport failures and rejections.
    pub fn fetch_events(
        &mut self,
        session_id: &str,
        stream: &str,
        after: u64,
        limit: usize,
    ) -> Result<EventBatch, BusError> {
        let request = BusRequest::FetchEvents {
            session_id: session_id.to_owned(),
            stream: stream.to_owned(),
            after,
            limit,
        };
        match self.call(&request)? {
            BusResponse::Events { records, last } => Ok(EventBatch { records, last }),
            other => Err(unexpected("events", other)),
        }
    }

    /// Enables or disables a module by name.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Rejected`] when the module is unknown or busy.
    pub fn set_module_enabled(&mut self, name: &str, enabled: bool) -> Result<(), BusError> {
        expect_ok(self.call(&BusRequest::SetModuleEnabled {
            name: name.to_owned(),
            enabled,
        })?)
    }
}

fn expect_ok(response: BusResponse) -> Result<(), BusError> {
    match response {
        BusResponse::Ok => Ok(()),
        other => Err(unexpected("ok", other)),
    }
}

fn unexpected(expected: &'static str, response: BusResponse) -> BusError {
    match response {
        BusResponse::Error { error } => BusError::Rejected { error },
        BusResponse::Fatal { message } => BusError::Fatal { message },
        other => BusError::UnexpectedResponse {
            expected,
            received: other.kind(),
        },
    }
}
