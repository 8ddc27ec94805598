//! Capability URIs and negotiated capability sets.
//!
//! A capability is an opaque URI. Protocol capabilities may carry query
//! parameters (`...:with-defaults:1.0?basic-mode=explicit`); two capabilities
//! are considered the same when their base URIs, the text before `?`, match.


use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Base protocol, end-of-message framing.
pub const BASE_1_0: &str = "urn:ietf:params:netconf:base:1.0";
/// Base protocol, chunked framing.
pub const BASE_1_1: &str = "urn:ietf:params:netconf:base:1.1";
/// Direct writes to the running datastore.
pub const WRITABLE_RUNNING: &str = "urn:ietf:params:netconf:capability:writable-running:1.0";
/// Candidate datastore.
pub const CANDIDATE: &str = "urn:ietf:params:netconf:capability:candidate:1.0";
/// `rollback-on-error` error option.
pub const ROLLBACK_ON_ERROR: &str = "urn:ietf:params:netconf:capability:rollback-on-error:1.0";
/// `validate` operation.
pub const VALIDATE: &str = "urn:ietf:params:netconf:capability:validate:1.1";
/// Startup datastore.
pub const STARTUP: &str = "urn:ietf:params:netconf:capability:startup:1.0";
/// Event notifications via `create-subscription`.
pub const NOTIFICATION: &str = "urn:ietf:params:netconf:capability:notification:1.0";
/// Interleaving of notifications with ordinary replies.
pub const INTERLEAVE: &str = "urn:ietf:params:netconf:capability:interleave:1.0";

const BASE_CAPABILITIES: [&str; 2] = [BASE_1_0, BASE_1_1];

// ---------------------------------------------------------------------------
// Capability
// ---------------------------------------------------------------------------

/// A single capability URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capability(String);

impl Capability {
    /// Wraps a capability URI.
    #[must_use]
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    /// Returns the full URI, including any query parameters.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the URI without query parameters.
    #[must_use]
    pub fn base(&self) -> &str {
        base_uri(&self.0)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Capability {
    fn from(uri: &str) -> Self {
        Self::new(uri)
    }
}

impl From<String> for Capability {
    fn from(uri: String) -> Self {
        Self(uri)
    }
}

fn base_uri(uri: &str) -> &str {
    uri.split_once('?').map_or(uri, |(base, _)| base)
}

// ---------------------------------------------------------------------------
// CapabilitySet
// ---------------------------------------------------------------------------

/// Insertion-ordered set of capabilities, unique by base URI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Capability>", into = "Vec<Capability>")]
pub struct CapabilitySet {
    entries: Vec<Capability>,
}

impl CapabilitySet {
    /// Creates an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Adds a capability; returns `false` when its base URI was already present.
    pub fn insert(&mut self, capability: impl Into<Capability>) -> bool {
        let capability = capability.into();
        if self.contains(capability.base()) {
            return false;
        }
        self.entries.push(capability);
        true
    }

    /// Reports whether a capability with the given base URI is present.
    ///
    /// Query parameters on `uri` are ignored.
    #[must_use]
    pub fn contains(&self, uri: &str) -> bool {
        let wanted = base_uri(uri);
        self.entries.iter().any(|entry| entry.base() == wanted)
    }

    /// Reports whether the two sets share at least one capability.
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.entries
            .iter()
            .any(|entry| other.contains(entry.base()))
    }

    /// Returns the entries of `self` whose base URI also appears in `other`.
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Self {
        self.entries
            .iter()
            .filter(|entry| other.contains(entry.base()))
            .cloned()
            .collect()
    }

    /// Iterates over the capabilities in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.entries.iter()
    }

    /// Iterates over base URIs in insertion order.
    pub fn base_uris(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(Capability::base)
    }

    /// Number of capabilities in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Reports whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<C> FromIterator<C> for CapabilitySet
where
    C: Into<Capability>,
{
    fn from_iter<I: IntoIterator<Item = C>>(iter: I) -> Self {
        let mut set = Self::new();
        for capability in iter {
            set.insert(capability);
        }
        set
    }
}

impl<C> Extend<C> for CapabilitySet
where
    C: Into<Capability>,
{
    fn extend<I: IntoIterator<Item = C>>(&mut self, iter: I) {
        for capability in iter {
            self.insert(capability);
        }
    }
}

impl From<Vec<Capability>> for CapabilitySet {
    fn from(entries: Vec<Capability>) -> Self {
        entries.into_iter().collect()
    }
}

impl From<CapabilitySet> for Vec<Capability> {
    fn from(set: CapabilitySet) -> Self {
        set.entries
    }
}

impl<'a> IntoIterator for &'a CapabilitySet {
    type Item = &'a Capability;
    type IntoIter = std::slice::Iter<'a, Capability>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

// ---------------------------------------------------------------------------
// Negotiation
// ---------------------------------------------------------------------------

/// Errors raised while negotiating a session's capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NegotiationError {
    /// The peers share no base protocol version.
    #[error("no common base protocol capability")]
    NoCommonBase,
}

/// Negotiates the capabilities of a session.
///
/// The result keeps the server's capabilities, with the server's query
/// parameters, that the client also advertised. Both peers must share a base
/// protocol capability.
///
/// # Errors
///
/// Returns [`NegotiationError::NoCommonBase`] when neither base:1.0 nor
/// base:1.1 is common to both peers.
pub fn negotiate(
    server: &CapabilitySet,
    client: &CapabilitySet,
) -> Result<CapabilitySet, NegotiationError> {
    let negotiated = server.intersection(client);
    if BASE_CAPABILITIES
        .iter()
        .any(|base| negotiated.contains(base))
    {
        Ok(negotiated)
    } else {
        Err(NegotiationError::NoCommonBase)
    }
}
