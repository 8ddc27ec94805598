//! Conversion between frames and typed messages.

use thiserror::Error;

use crate::message::{ClientMessage, Hello, Notification, Reply, Rpc, ServerMessage};

/// Errors raised while encoding or decoding a message.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The frame is not valid JSON or does not match the message schema.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    /// A message other than the expected one arrived.
    #[error("expected {expected} message")]
    Unexpected {
        /// Kind of message that was expected.
        expected: &'static str,
    },
}

/// Result of decoding one frame received after the handshake.
#[derive(Debug)]
pub enum Decoded {
    /// A request to process.
    Rpc(Rpc),
    /// The frame carried nothing to process.
    NoMessage,
    /// A well-formed message that is not a request.
    Unknown(&'static str),
    /// The frame could not be parsed.
    Malformed(CodecError),
}

/// Decodes a frame received from the client once the session is working.
#[must_use]
pub fn decode_request(frame: &[u8]) -> Decoded {
    if frame.iter().all(u8::is_ascii_whitespace) {
        return Decoded::NoMessage;
    }
    match serde_json::from_slice::<ClientMessage>(frame) {
        Ok(ClientMessage::Rpc(rpc)) => Decoded::Rpc(rpc),
        Ok(ClientMessage::Hello(_)) => Decoded::Unknown("hello"),
        Err(error) => Decoded::Malformed(CodecError::Malformed(error)),
    }
}

/// Decodes the client's hello.
///
/// # Errors
///
/// Returns [`CodecError::Malformed`] for unparseable frames and
/// [`CodecError::Unexpected`] when the frame holds a request instead.
pub fn decode_hello(frame: &[u8]) -> Result<Hello, CodecError> {
    match serde_json::from_slice::<ClientMessage>(frame)? {
        ClientMessage::Hello(hello) => Ok(hello),
        ClientMessage::Rpc(_) => Err(CodecError::Unexpected { expected: "hello" }),
    }
}

fn encode(message: &ServerMessage) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(message)?)
}

/// Encodes the server-side hello.
///
/// # Errors
///
/// Returns [`CodecError::Malformed`] if serialisation fails.
pub fn encode_hello(hello: &Hello) -> Result<Vec<u8>, CodecError> {
    encode(&ServerMessage::Hello(hello.clone()))
}

/// Encodes a reply.
///
/// # Errors
///
/// Returns [`CodecError::Malformed`] if serialisation fails.
pub fn encode_reply(reply: &Reply) -> Result<Vec<u8>, CodecError> {
    encode(&ServerMessage::RpcReply(reply.clone()))
}

/// Encodes a notification.
///
/// # Errors
///
/// Returns [`CodecError::Malformed`] if serialisation fails.
pub fn encode_notification(notification: &Notification) -> Result<Vec<u8>, CodecError> {
    encode(&ServerMessage::Notification(notification.clone()))
}
