//! Bounded journal of server events replayed to subscribers.
//!
//! Records carry a sequence number that grows by one per event, so agents
//! can poll with the last number they saw and never miss or repeat an event
//! that is still retained.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use serde_json::{Value, json};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::debug;

use netkeep_bus::EventRecord;
use netkeep_proto::DEFAULT_STREAM;

use crate::sessions::Session;

const EVENTS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::events");

/// Default number of retained records.
pub const DEFAULT_JOURNAL_CAPACITY: usize = 1024;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// The client sent `close-session`.
    Closed,
    /// Another session sent `kill-session`.
    Killed,
    /// The agent connection was lost.
    Dropped,
}

impl TerminationReason {
    /// Value reported in `termination-reason`.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Killed => "killed",
            Self::Dropped => "dropped",
        }
    }
}

/// Journal failures.
#[derive(Debug, Error)]
pub enum JournalError {
    /// The journal lock was poisoned by a panicking writer.
    #[error("event journal lock poisoned")]
    Poisoned,
}

#[derive(Debug)]
struct Ring {
    records: VecDeque<EventRecord>,
    last_seq: u64,
}

/// Ring buffer of [`EventRecord`]s.
#[derive(Debug)]
pub struct EventJournal {
    ring: Mutex<Ring>,
    capacity: usize,
}

impl EventJournal {
    /// Creates a journal retaining at most `capacity` records.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ring: Mutex::new(Ring {
                records: VecDeque::with_capacity(capacity),
                last_seq: 0,
            }),
            capacity,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Ring>, JournalError> {
        self.ring.lock().map_err(|_| JournalError::Poisoned)
    }

    /// Appends `event` to the default stream and returns its sequence number.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::Poisoned`] if the journal lock is poisoned.
    pub fn record(&self, event: Value) -> Result<u64, JournalError> {
        let mut ring = self.lock()?;
        ring.last_seq += 1;
        let seq = ring.last_seq;
        if ring.records.len() == self.capacity {
            ring.records.pop_front();
        }
        ring.records.push_back(EventRecord {
            seq,
            time: OffsetDateTime::now_utc(),
            stream: DEFAULT_STREAM.to_owned(),
            event,
        });
        debug!(target: EVENTS_TARGET, seq, "event recorded");
        Ok(seq)
    }

    /// Records `netconf-session-start`.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::Poisoned`] if the journal lock is poisoned.
    pub fn session_started(&self, session: &Session) -> Result<u64, JournalError> {
        self.record(json!({
            "netconf-session-start": {
                "username": session.username(),
                "session-id": session.id(),
            }
        }))
    }

    /// Records `netconf-session-end`.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::Poisoned`] if the journal lock is poisoned.
    pub fn session_ended(
        &self,
        session: &Session,
        reason: TerminationReason,
        killed_by: Option<&str>,
    ) -> Result<u64, JournalError> {
        let mut body = json!({
            "username": session.username(),
            "session-id": session.id(),
            "termination-reason": reason.as_str(),
        });
        if let (Some(killer), Value::Object(members)) = (killed_by, &mut body) {
            members.insert(String::from("killed-by"), Value::from(killer));
        }
        self.record(json!({ "netconf-session-end": body }))
    }

    /// Records `netconf-config-change` for the modules a session changed.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::Poisoned`] if the journal lock is poisoned.
    pub fn config_changed(
        &self,
        session: &Session,
        operation: &str,
        modules: &[String],
    ) -> Result<u64, JournalError> {
        let edits: Vec<Value> = modules
            .iter()
            .map(|module| json!({ "target": module, "operation": operation }))
            .collect();
        self.record(json!({
            "netconf-config-change": {
                "changed-by": {
                    "username": session.username(),
                    "session-id": session.id(),
                },
                "datastore": "running",
                "edit": edits,
            }
        }))
    }

    /// Returns up to `limit` records of `stream` newer than `after`, plus the
    /// highest sequence number issued so far.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::Poisoned`] if the journal lock is poisoned.
    pub fn fetch(
        &self,
        stream: &str,
        after: u64,
        limit: usize,
    ) -> Result<(Vec<EventRecord>, u64), JournalError> {
        let ring = self.lock()?;
        let records = ring
            .records
            .iter()
            .filter(|record| record.seq > after && record.stream == stream)
            .take(limit)
            .cloned()
            .collect();
        Ok((records, ring.last_seq))
    }
}

impl Default for EventJournal {
    fn default() -> Self {
        Self::new(DEFAULT_JOURNAL_CAPACITY)
    }
}
