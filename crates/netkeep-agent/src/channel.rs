//! Outbound half of the client transport.
//!
//! The main loop and a notification worker both write to the client. Every
//! message is encoded and written under one mutex, so a notification can fall
//! between two replies but never inside one.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use netkeep_proto::{
    Hello, Notification, Reply, encode_hello, encode_notification, encode_reply, write_frame,
};

use crate::errors::AgentError;

/// Shared, serialised writer to the client.
#[derive(Debug)]
pub struct ClientChannel<W> {
    inner: Arc<Mutex<W>>,
}

impl<W> Clone for ClientChannel<W> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<W: Write> ClientChannel<W> {
    /// Wraps the client writer.
    pub fn new(writer: W) -> Self {
        Self {
            inner: Arc::new(Mutex::new(writer)),
        }
    }

    /// Holds the channel so several messages go out back to back.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Write`] if a previous writer panicked.
    pub fn lock(&self) -> Result<ChannelLock<'_, W>, AgentError> {
        self.inner
            .lock()
            .map(|writer| ChannelLock { writer })
            .map_err(|_| AgentError::Write(io::Error::other("client channel poisoned")))
    }

    /// Sends the server-side hello.
    ///
    /// # Errors
    ///
    /// Returns encoding or write failures.
    pub fn send_hello(&self, hello: &Hello) -> Result<(), AgentError> {
        self.lock()?.send_hello(hello)
    }

    /// Sends a reply.
    ///
    /// # Errors
    ///
    /// Returns encoding or write failures.
    pub fn send_reply(&self, reply: &Reply) -> Result<(), AgentError> {
        self.lock()?.send_reply(reply)
    }

    /// Sends a notification.
    ///
    /// # Errors
    ///
    /// Returns encoding or write failures.
    pub fn send_notification(&self, notification: &Notification) -> Result<(), AgentError> {
        self.lock()?.send_notification(notification)
    }
}

/// Exclusive access to the client writer.
pub struct ChannelLock<'a, W> {
    writer: MutexGuard<'a, W>,
}

impl<W: Write> ChannelLock<'_, W> {
    fn send(&mut self, payload: &[u8]) -> Result<(), AgentError> {
        write_frame(&mut *self.writer, payload).map_err(AgentError::Write)
    }

    /// Sends the server-side hello.
    ///
    /// # Errors
    ///
    /// Returns encoding or write failures.
    pub fn send_hello(&mut self, hello: &Hello) -> Result<(), AgentError> {
        self.send(&encode_hello(hello)?)
    }

    /// Sends a reply.
    ///
    /// # Errors
    ///
    /// Returns encoding or write failures.
    pub fn send_reply(&mut self, reply: &Reply) -> Result<(), AgentError> {
        self.send(&encode_reply(reply)?)
    }

    /// Sends a notification.
    ///
    /// # Errors
    ///
    /// Returns encoding or write failures.
    pub fn send_notification(&mut self, notification: &Notification) -> Result<(), AgentError> {
        self.send(&encode_notification(notification)?)
    }
}
