//! Doubles for the two peers an agent talks to.

mod client;
mod fake_server;

pub use client::TestClient;
pub use fake_server::{FakeServer, ServerScript};
