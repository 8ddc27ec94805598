//! Errors raised by bus clients and frame codecs.

use std::io;

use netkeep_proto::RpcError;
use thiserror::Error;

/// Failures encountered while talking over the bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// Establishing the connection failed.
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        /// Endpoint that was dialled.
        endpoint: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// A TCP endpoint did not resolve to any address.
    #[error("could not resolve {endpoint}: {source}")]
    Resolve {
        /// Endpoint that failed to resolve.
        endpoint: String,
        /// Underlying resolver error.
        #[source]
        source: io::Error,
    },
    /// Reading or writing the connection failed.
    #[error("bus I/O failed: {0}")]
    Io(#[from] io::Error),
    /// A frame could not be serialised.
    #[error("failed to encode bus frame: {0}")]
    Encode(#[source] serde_json::Error),
    /// A frame could not be parsed.
    #[error("failed to decode bus frame: {0}")]
    Decode(#[source] serde_json::Error),
    /// A frame exceeded the configured size limit.
    #[error("bus frame exceeds {limit} bytes")]
    FrameTooLarge {
        /// Maximum frame size in bytes.
        limit: usize,
    },
    /// The peer closed the connection.
    #[error("bus connection closed by peer")]
    Disconnected,
    /// The server answered with a response of the wrong kind.
    #[error("expected {expected} response, received {received}")]
    UnexpectedResponse {
        /// Response kind the call expects.
        expected: &'static str,
        /// Response kind that arrived.
        received: &'static str,
    },
    /// The server rejected the call.
    #[error("request rejected: {error}")]
    Rejected {
        /// Structured reason.
        error: RpcError,
    },
    /// The server reported an unrecoverable inconsistency.
    #[error("server failure: {message}")]
    Fatal {
        /// Operator-facing description.
        message: String,
    },
}

impl BusError {
    /// Reports whether the connection is no longer usable.
    #[must_use]
    pub const fn is_connection_lost(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Io(_))
    }
}
