//! Typed protocol messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::capability::CapabilitySet;
use crate::error::RpcError;

/// Operation name for `close-session`.
pub const CLOSE_SESSION: &str = "close-session";
/// Operation name for `kill-session`.
pub const KILL_SESSION: &str = "kill-session";
/// Operation name for `create-subscription`.
pub const CREATE_SUBSCRIPTION: &str = "create-subscription";

// ---------------------------------------------------------------------------
// Hello
// ---------------------------------------------------------------------------

/// Capability exchange sent by both peers at session start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Hello {
    /// Session identifier; present only in the server's hello.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Advertised capabilities.
    pub capabilities: CapabilitySet,
}

impl Hello {
    /// Builds the hello a client sends.
    #[must_use]
    pub const fn client(capabilities: CapabilitySet) -> Self {
        Self {
            session_id: None,
            capabilities,
        }
    }

    /// Builds the hello the server side sends.
    #[must_use]
    pub fn server(session_id: impl Into<String>, capabilities: CapabilitySet) -> Self {
        Self {
            session_id: Some(session_id.into()),
            capabilities,
        }
    }
}

// ---------------------------------------------------------------------------
// Rpc
// ---------------------------------------------------------------------------

/// Classification used to route session-lifecycle operations locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// Graceful termination of the issuing session.
    CloseSession,
    /// Administrative termination of another session.
    KillSession,
    /// Start of asynchronous event delivery.
    CreateSubscription,
    /// Any other operation, forwarded for dispatch.
    Generic,
}

/// A client request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Rpc {
    /// Identifier echoed in the reply.
    pub message_id: String,
    /// Operation name, such as `get-config` or `edit-config`.
    pub operation: String,
    /// Namespace of the operation element for data-model specific RPCs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Operation parameters.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub content: Value,
}

impl Rpc {
    /// Builds a request without parameters.
    #[must_use]
    pub fn new(message_id: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            operation: operation.into(),
            namespace: None,
            content: Value::Null,
        }
    }

    /// Attaches operation parameters.
    #[must_use]
    pub fn with_content(mut self, content: Value) -> Self {
        self.content = content;
        self
    }

    /// Attaches the operation namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Classifies the operation.
    #[must_use]
    pub fn kind(&self) -> OperationKind {
        match self.operation.as_str() {
            CLOSE_SESSION => OperationKind::CloseSession,
            KILL_SESSION => OperationKind::KillSession,
            CREATE_SUBSCRIPTION => OperationKind::CreateSubscription,
            _ => OperationKind::Generic,
        }
    }

    /// Looks up a top-level parameter.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.content.get(name)
    }
}

// ---------------------------------------------------------------------------
// Reply
// ---------------------------------------------------------------------------

/// Outcome carried by a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyBody {
    /// The operation succeeded without data.
    Ok,
    /// The operation succeeded and produced data.
    Data(Value),
    /// The operation failed.
    Errors(Vec<RpcError>),
}

/// Response to one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "ReplyRepr", try_from = "ReplyRepr")]
pub struct Reply {
    /// Identifier of the request this reply answers.
    pub message_id: Option<String>,
    /// Reply outcome.
    pub body: ReplyBody,
}

impl Reply {
    /// Successful reply without data.
    #[must_use]
    pub const fn ok() -> Self {
        Self {
            message_id: None,
            body: ReplyBody::Ok,
        }
    }

    /// Successful reply carrying data.
    #[must_use]
    pub const fn data(data: Value) -> Self {
        Self {
            message_id: None,
            body: ReplyBody::Data(data),
        }
    }

    /// Failed reply carrying one error.
    #[must_use]
    pub fn error(error: RpcError) -> Self {
        Self::errors(vec![error])
    }

    /// Failed reply carrying several errors, in occurrence order.
    #[must_use]
    pub const fn errors(errors: Vec<RpcError>) -> Self {
        Self {
            message_id: None,
            body: ReplyBody::Errors(errors),
        }
    }

    /// Sets the request identifier the reply answers.
    #[must_use]
    pub fn for_message(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    /// Reports whether the reply signals success.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        !matches!(self.body, ReplyBody::Errors(_))
    }

    /// Returns the errors carried by a failed reply.
    #[must_use]
    pub fn rpc_errors(&self) -> &[RpcError] {
        match &self.body {
            ReplyBody::Errors(errors) => errors,
            ReplyBody::Ok | ReplyBody::Data(_) => &[],
        }
    }

    /// Returns the data carried by a successful reply.
    #[must_use]
    pub const fn data_value(&self) -> Option<&Value> {
        match &self.body {
            ReplyBody::Data(data) => Some(data),
            ReplyBody::Ok | ReplyBody::Errors(_) => None,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ReplyRepr {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message_id: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    rpc_error: Vec<RpcError>,
}

impl From<Reply> for ReplyRepr {
    fn from(reply: Reply) -> Self {
        let mut repr = Self {
            message_id: reply.message_id,
            ok: false,
            data: None,
            rpc_error: Vec::new(),
        };
        match reply.body {
            ReplyBody::Ok => repr.ok = true,
            ReplyBody::Data(data) => repr.data = Some(data),
            ReplyBody::Errors(errors) => repr.rpc_error = errors,
        }
        repr
    }
}

impl TryFrom<ReplyRepr> for Reply {
    type Error = String;

    fn try_from(repr: ReplyRepr) -> Result<Self, Self::Error> {
        let body = match (repr.ok, repr.data, repr.rpc_error.is_empty()) {
            (true, None, true) => ReplyBody::Ok,
            (false, Some(data), true) => ReplyBody::Data(data),
            (false, None, false) => ReplyBody::Errors(repr.rpc_error),
            _ => {
                return Err(String::from(
                    "rpc-reply must carry exactly one of ok, data, or rpc-error",
                ));
            }
        };
        Ok(Self {
            message_id: repr.message_id,
            body,
        })
    }
}

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

/// Asynchronous event delivered to a subscribed client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Notification {
    /// Time at which the event was generated.
    #[serde(with = "crate::timestamp::rfc3339")]
    pub event_time: OffsetDateTime,
    /// Event stream the notification belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<String>,
    /// Journal sequence number of the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    /// Event payload, keyed by event name.
    pub event: Value,
}

impl Notification {
    /// Builds a notification for an event payload.
    #[must_use]
    pub const fn new(event_time: OffsetDateTime, event: Value) -> Self {
        Self {
            event_time,
            stream: None,
            sequence: None,
            event,
        }
    }

    /// Tags the notification with its stream and journal sequence.
    #[must_use]
    pub fn from_stream(mut self, stream: impl Into<String>, sequence: u64) -> Self {
        self.stream = Some(stream.into());
        self.sequence = Some(sequence);
        self
    }
}

// ---------------------------------------------------------------------------
// Envelopes
// ---------------------------------------------------------------------------

/// Messages a client sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Capability exchange.
    Hello(Hello),
    /// Request.
    Rpc(Rpc),
}

/// Messages sent towards a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Capability exchange.
    Hello(Hello),
    /// Reply to a request.
    RpcReply(Reply),
    /// Asynchronous event.
    Notification(Notification),
}
