//! Client end of the agent's transport.

use std::collections::VecDeque;
use std::io::Write;
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::time::Duration;

use serde_json::Value;

use netkeep_proto::{FrameDecoder, Hello, Notification, Reply, ServerMessage, write_frame};

const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Speaks the client protocol to an agent over a socket pair.
pub struct TestClient {
    stream: UnixStream,
    decoder: FrameDecoder,
    notifications: VecDeque<Notification>,
}

impl TestClient {
    /// Wraps the client end of the transport.
    pub fn new(stream: UnixStream) -> Result<Self, String> {
        stream
            .set_read_timeout(Some(READ_TIMEOUT))
            .map_err(|error| error.to_string())?;
        Ok(Self {
            stream,
            decoder: FrameDecoder::new(1 << 20),
            notifications: VecDeque::new(),
        })
    }

    /// Sends one JSON message.
    pub fn send(&mut self, message: &Value) -> Result<(), String> {
        let payload = serde_json::to_vec(message).map_err(|error| error.to_string())?;
        self.send_raw(&payload)
    }

    /// Sends a framed payload as is.
    pub fn send_raw(&mut self, payload: &[u8]) -> Result<(), String> {
        write_frame(&mut self.stream, payload).map_err(|error| error.to_string())?;
        self.stream.flush().map_err(|error| error.to_string())
    }

    /// Closes both directions of the transport.
    pub fn hang_up(&self) -> Result<(), String> {
        self.stream
            .shutdown(Shutdown::Both)
            .map_err(|error| error.to_string())
    }

    fn next_message(&mut self) -> Result<ServerMessage, String> {
        loop {
            if let Some(frame) = self.decoder.next_frame().map_err(|error| error.to_string())? {
                return serde_json::from_slice(&frame).map_err(|error| error.to_string());
            }
            let read = self
                .decoder
                .fill_from(&mut self.stream)
                .map_err(|error| error.to_string())?;
            if read == 0 {
                return Err(String::from("agent closed the transport"));
            }
        }
    }

    /// Reads the server hello.
    pub fn hello(&mut self) -> Result<Hello, String> {
        match self.next_message()? {
            ServerMessage::Hello(hello) => Ok(hello),
            other => Err(format!("expected hello, got {other:?}")),
        }
    }

    /// Reads the next reply, queueing notifications that arrive first.
    pub fn reply(&mut self) -> Result<Reply, String> {
        loop {
            match self.next_message()? {
                ServerMessage::RpcReply(reply) => return Ok(reply),
                ServerMessage::Notification(notification) => {
                    self.notifications.push_back(notification);
                }
                ServerMessage::Hello(_) => return Err(String::from("unexpected hello")),
            }
        }
    }

    /// Reads the next notification.
    pub fn notification(&mut self) -> Result<Notification, String> {
        if let Some(notification) = self.notifications.pop_front() {
            return Ok(notification);
        }
        match self.next_message()? {
            ServerMessage::Notification(notification) => Ok(notification),
            other => Err(format!("expected notification, got {other:?}")),
        }
    }
}
