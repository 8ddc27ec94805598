//! Socket listener for the server's bus endpoint.
//!
//! The listener binds the configured endpoint, accepts agent connections in a
//! background thread and hands each one to a [`ConnectionHandler`] on its own
//! thread, so a slow agent never delays others.

mod errors;
mod handler;
mod listener;

pub(crate) use self::errors::ListenerError;
pub(crate) use self::handler::{ConnectionHandler, ConnectionStream};
pub(crate) use self::listener::SocketListener;
#[cfg(test)]
pub(crate) use self::listener::ListenerHandle;

const LISTENER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");
