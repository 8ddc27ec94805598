//! Notification delivery for a subscribed session.
//!
//! A session holds at most one subscription. The worker opens its own bus
//! connection, so polling the event journal never interleaves with the main
//! loop's request traffic. It replays stored events first when the
//! subscription names a start time, then follows the journal until the stop
//! time passes, the session ends or the client stops reading.

use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use serde_json::json;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use netkeep_bus::{BusClient, BusError, BusStream, DEFAULT_MAX_FRAME_BYTES, EventBatch};
use netkeep_config::SocketEndpoint;
use netkeep_proto::{Notification, SubscriptionRequest};

use crate::channel::ClientChannel;
use crate::errors::AgentError;
use crate::signals::StopFlag;

const NOTIFY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::notify");

/// Journal records requested per poll.
pub(crate) const EVENT_BATCH: usize = 64;

/// Event sent once stored events have been replayed.
pub(crate) const REPLAY_COMPLETE: &str = "replayComplete";

/// Event sent when the subscription's stop time has passed.
pub(crate) const NOTIFICATION_COMPLETE: &str = "notificationComplete";

/// Marks whether the session already has a subscription.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionSlot(Arc<AtomicBool>);

impl SubscriptionSlot {
    /// Reports whether a subscription currently holds the slot.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Claims the slot unless a subscription already holds it.
    #[must_use]
    pub fn try_claim(&self) -> Option<SlotGuard> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SlotGuard(Arc::clone(&self.0)))
    }
}

/// Frees the slot when dropped.
#[derive(Debug)]
pub struct SlotGuard(Arc<AtomicBool>);

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// How a delivery run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeliveryEnd {
    /// The stop time passed.
    Completed,
    /// The server no longer knows the session.
    SessionClosed,
    /// The agent is shutting down.
    Stopped,
}

/// Everything a notification worker needs, moved onto its thread.
pub(crate) struct NotificationJob<W> {
    pub(crate) session_id: String,
    pub(crate) request: SubscriptionRequest,
    pub(crate) endpoint: SocketEndpoint,
    pub(crate) poll_interval: Duration,
    pub(crate) channel: ClientChannel<W>,
    pub(crate) stop: StopFlag,
    pub(crate) _slot: SlotGuard,
}

impl<W: Write + Send + 'static> NotificationJob<W> {
    /// Starts the worker thread.
    pub(crate) fn spawn(self) -> io::Result<()> {
        thread::Builder::new()
            .name(format!("notify-{}", self.session_id))
            .spawn(move || self.run())
            .map(drop)
    }

    fn run(self) {
        info!(
            target: NOTIFY_TARGET,
            session_id = %self.session_id,
            stream = %self.request.stream,
            replay = self.request.is_replay(),
            "notification delivery started"
        );
        match self.deliver() {
            Ok(end) => info!(
                target: NOTIFY_TARGET,
                session_id = %self.session_id,
                end = ?end,
                "notification delivery finished"
            ),
            Err(error) => warn!(
                target: NOTIFY_TARGET,
                session_id = %self.session_id,
                error = %error,
                "notification delivery aborted"
            ),
        }
    }

    pub(crate) fn deliver(&self) -> Result<DeliveryEnd, AgentError> {
        let mut bus = BusClient::connect(&self.endpoint, DEFAULT_MAX_FRAME_BYTES)
            .map_err(AgentError::Connect)?;
        let Some(head) = self.fetch(&mut bus, u64::MAX, 0)? else {
            return Ok(DeliveryEnd::SessionClosed);
        };
        let mut cursor = head.last;
        if self.request.is_replay() {
            if self.catch_up(&mut bus, 0, Some(head.last))?.is_none() {
                return Ok(DeliveryEnd::SessionClosed);
            }
            self.send_marker(REPLAY_COMPLETE)?;
        }
        loop {
            if self.stop.is_raised() {
                return Ok(DeliveryEnd::Stopped);
            }
            if self.request.has_ended(OffsetDateTime::now_utc()) {
                // Events journalled since the last poll may still predate the
                // stop time.
                if self.catch_up(&mut bus, cursor, None)?.is_none() {
                    return Ok(DeliveryEnd::SessionClosed);
                }
                self.send_marker(NOTIFICATION_COMPLETE)?;
                return Ok(DeliveryEnd::Completed);
            }
            let Some(batch) = self.fetch(&mut bus, cursor, EVENT_BATCH)? else {
                return Ok(DeliveryEnd::SessionClosed);
            };
            if !batch.records.is_empty() {
                cursor = self.forward(&batch, cursor, None)?;
            }
            if batch.records.len() < EVENT_BATCH {
                thread::sleep(self.poll_interval);
            }
        }
    }

    /// Sends every stored record after `cursor`, stopping at `horizon` when
    /// one is given. Returns the advanced cursor, or `None` if the session
    /// disappeared.
    fn catch_up(
        &self,
        bus: &mut BusClient<BusStream>,
        mut cursor: u64,
        horizon: Option<u64>,
    ) -> Result<Option<u64>, AgentError> {
        while horizon.is_none_or(|limit| cursor < limit) {
            let Some(batch) = self.fetch(bus, cursor, EVENT_BATCH)? else {
                return Ok(None);
            };
            let next = self.forward(&batch, cursor, horizon)?;
            let exhausted = next == cursor || batch.records.len() < EVENT_BATCH;
            cursor = next;
            if exhausted {
                break;
            }
        }
        Ok(Some(cursor))
    }

    /// Reads records after `after`. `None` means the session is gone.
    fn fetch(
        &self,
        bus: &mut BusClient<BusStream>,
        after: u64,
        limit: usize,
    ) -> Result<Option<EventBatch>, AgentError> {
        match bus.fetch_events(&self.session_id, &self.request.stream, after, limit) {
            Ok(batch) => Ok(Some(batch)),
            Err(BusError::Rejected { error }) => {
                debug!(
                    target: NOTIFY_TARGET,
                    session_id = %self.session_id,
                    error = %error,
                    "event fetch rejected"
                );
                Ok(None)
            }
            Err(error) => Err(AgentError::Server(error)),
        }
    }

    /// Sends the accepted records of `batch` up to `horizon` and returns the
    /// advanced cursor.
    fn forward(
        &self,
        batch: &EventBatch,
        mut cursor: u64,
        horizon: Option<u64>,
    ) -> Result<u64, AgentError> {
        for record in &batch.records {
            if horizon.is_some_and(|limit| record.seq > limit) {
                break;
            }
            cursor = record.seq;
            if !self.request.accepts(record.time, &record.event) {
                continue;
            }
            let notification = Notification::new(record.time, record.event.clone())
                .from_stream(&record.stream, record.seq);
            self.channel.send_notification(&notification)?;
        }
        Ok(cursor)
    }

    fn send_marker(&self, name: &str) -> Result<(), AgentError> {
        let notification = Notification::new(OffsetDateTime::now_utc(), json!({ name: {} }));
        self.channel.send_notification(&notification)
    }
}

#[cfg(test)]
mod tests;
