//! Wire types exchanged over the bus.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use netkeep_proto::{CapabilitySet, Reply, Rpc, RpcError};

/// Method calls an agent issues to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "kebab-case")]
pub enum BusRequest {
    /// Fetch the capabilities and event streams the server offers.
    GetServerInfo,
    /// Record a session negotiated by the calling agent.
    #[serde(rename_all = "kebab-case")]
    RegisterSession {
        /// Identifier issued during the handshake.
        session_id: String,
        /// Capabilities negotiated with the client.
        capabilities: CapabilitySet,
        /// Local account the agent runs as.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        /// Identity asserted by the transport, such as a certificate subject.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transport_identity: Option<String>,
    },
    /// Release the calling agent's session after `close-session`.
    #[serde(rename_all = "kebab-case")]
    ReleaseSession {
        /// Session being closed.
        session_id: String,
    },
    /// Terminate another session.
    #[serde(rename_all = "kebab-case")]
    TerminateSession {
        /// Session issuing the request.
        session_id: String,
        /// Session to terminate.
        target: String,
    },
    /// Route a request to the configuration modules.
    #[serde(rename_all = "kebab-case")]
    Dispatch {
        /// Session issuing the request.
        session_id: String,
        /// Request, forwarded verbatim.
        rpc: Rpc,
    },
    /// Read journal events newer than `after`.
    #[serde(rename_all = "kebab-case")]
    FetchEvents {
        /// Subscribed session.
        session_id: String,
        /// Event stream.
        stream: String,
        /// Last sequence number already seen.
        after: u64,
        /// Maximum number of records returned.
        limit: usize,
    },
    /// Enable or disable a configuration module.
    #[serde(rename_all = "kebab-case")]
    SetModuleEnabled {
        /// Module name.
        name: String,
        /// Desired state.
        enabled: bool,
    },
}

impl BusRequest {
    /// Method name used in logs.
    #[must_use]
    pub const fn method(&self) -> &'static str {
        match self {
            Self::GetServerInfo => "get-server-info",
            Self::RegisterSession { .. } => "register-session",
            Self::ReleaseSession { .. } => "release-session",
            Self::TerminateSession { .. } => "terminate-session",
            Self::Dispatch { .. } => "dispatch",
            Self::FetchEvents { .. } => "fetch-events",
            Self::SetModuleEnabled { .. } => "set-module-enabled",
        }
    }
}

/// Replies to [`BusRequest`] method calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum BusResponse {
    /// The call succeeded without a result.
    Ok,
    /// Capabilities and event streams.
    ServerInfo {
        /// Capabilities offered to clients.
        capabilities: CapabilitySet,
        /// Event streams available for subscription.
        streams: Vec<String>,
    },
    /// Reply produced by dispatch.
    Reply {
        /// Reply to relay to the client.
        reply: Reply,
    },
    /// Journal records.
    Events {
        /// Records in sequence order.
        records: Vec<EventRecord>,
        /// Highest sequence number issued so far.
        last: u64,
    },
    /// The call was rejected.
    Error {
        /// Structured reason.
        error: RpcError,
    },
    /// The server reached an inconsistent state while serving the call.
    Fatal {
        /// Operator-facing description.
        message: String,
    },
}

impl BusResponse {
    /// Variant name used in diagnostics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::ServerInfo { .. } => "server-info",
            Self::Reply { .. } => "reply",
            Self::Events { .. } => "events",
            Self::Error { .. } => "error",
            Self::Fatal { .. } => "fatal",
        }
    }
}

/// Unsolicited messages pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "kebab-case")]
pub enum BusSignal {
    /// The agent's session was terminated administratively.
    #[serde(rename_all = "kebab-case")]
    Terminate {
        /// Terminated session.
        session_id: String,
        /// Session that requested the termination.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        killed_by: Option<String>,
    },
}

/// Frames travelling from server to agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServerFrame {
    /// Reply to the most recent request.
    Response(BusResponse),
    /// Unsolicited signal.
    Signal(BusSignal),
}

/// One entry of the server's event journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Monotonic sequence number, starting at 1.
    pub seq: u64,
    /// Time the event was recorded.
    #[serde(with = "netkeep_proto::timestamp::rfc3339")]
    pub time: OffsetDateTime,
    /// Stream the event belongs to.
    pub stream: String,
    /// Event payload keyed by event name.
    pub event: Value,
}
