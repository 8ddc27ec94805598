//! Identity material gathered before the handshake.

use std::env;

use nix::unistd::{User, geteuid};
use tracing::debug;

use crate::AGENT_TARGET;

/// Environment attribute carrying the subject of a TLS client certificate.
pub const CLIENT_DN_VAR: &str = "SSL_CLIENT_DN";

/// Identity bound to the session at registration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Local account the agent runs as.
    pub username: Option<String>,
    /// Identity asserted by the transport, if it authenticated the peer.
    pub transport_identity: Option<String>,
}

impl Credentials {
    /// Collects credentials from the process environment.
    ///
    /// Missing material is not an error; the session then proceeds without a
    /// pre-bound identity.
    #[must_use]
    pub fn from_environment() -> Self {
        let username = match User::from_uid(geteuid()) {
            Ok(user) => user.map(|user| user.name),
            Err(error) => {
                debug!(target: AGENT_TARGET, error = %error, "account lookup failed");
                None
            }
        };
        Self::from_parts(username, env::var(CLIENT_DN_VAR).ok())
    }

    /// Builds credentials from already gathered values, ignoring blanks.
    #[must_use]
    pub fn from_parts(username: Option<String>, transport_identity: Option<String>) -> Self {
        let present = |value: Option<String>| value.filter(|text| !text.trim().is_empty());
        Self {
            username: present(username),
            transport_identity: present(transport_identity),
        }
    }
}
