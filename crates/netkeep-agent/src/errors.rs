//! Error types for the agent runtime.

use std::io;
use std::sync::Arc;

use netkeep_bus::BusError;
use netkeep_proto::{CodecError, FramingError, NegotiationError};
use ortho_config::OrthoError;
use thiserror::Error;

use crate::telemetry::TelemetryError;

/// Failures that end the agent with a non-zero exit status.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {0}")]
    Configuration(Arc<OrthoError>),
    /// Telemetry could not be installed.
    #[error("failed to initialise telemetry: {0}")]
    Telemetry(#[from] TelemetryError),
    /// Termination signal handlers could not be installed.
    #[error("failed to install signal handlers: {0}")]
    Signals(#[source] io::Error),
    /// The client transport descriptors could not be opened.
    #[error("failed to open the client transport: {0}")]
    Stdio(#[source] io::Error),
    /// The server could not be reached.
    #[error("cannot connect to the netkeep server: {0}")]
    Connect(#[source] BusError),
    /// The server did not advertise its capabilities.
    #[error("cannot get server capabilities: {0}")]
    Discovery(#[source] BusError),
    /// The client closed its transport before completing the handshake.
    #[error("client closed the connection during the handshake")]
    HandshakeClosed,
    /// A stop was requested before the handshake completed.
    #[error("stopped before the handshake completed")]
    Interrupted,
    /// The client's hello could not be decoded.
    #[error("invalid client hello: {0}")]
    Hello(#[source] CodecError),
    /// Client and server share no base protocol version.
    #[error("capability negotiation failed: {0}")]
    Negotiation(#[from] NegotiationError),
    /// The server refused to record the session.
    #[error("failed to register session {session_id}: {source}")]
    Registration {
        /// Session that was refused.
        session_id: String,
        /// Bus failure.
        #[source]
        source: BusError,
    },
    /// The client byte stream is unusable.
    #[error("client transport failed: {0}")]
    Framing(#[from] FramingError),
    /// The client descriptor reported an error condition.
    #[error("client transport reported an error")]
    ClientFailed,
    /// A message could not be written to the client.
    #[error("failed to write to the client: {0}")]
    Write(#[source] io::Error),
    /// A message could not be encoded.
    #[error("failed to encode message: {0}")]
    Encode(#[from] CodecError),
    /// Waiting for input failed.
    #[error("poll failed: {0}")]
    Poll(#[source] nix::errno::Errno),
    /// The connection to the server broke while the session was working.
    #[error("lost connection to the netkeep server: {0}")]
    Server(#[source] BusError),
    /// The server reported that device state is no longer known.
    #[error("server reported an inconsistent state: {message}")]
    Inconsistent {
        /// Server diagnostic.
        message: String,
    },
}
