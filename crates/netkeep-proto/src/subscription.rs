//! `create-subscription` parameters and event filtering.
//!
//! A subscription names an event stream, an optional subtree filter, and an
//! optional replay window. [`SubscriptionRequest::check`] applies the
//! acceptance rules before any delivery worker starts; afterwards
//! [`SubscriptionRequest::accepts`] decides, per event, whether it is sent.

use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::error::RpcError;
use crate::timestamp;

/// Stream used when the request names none.
pub const DEFAULT_STREAM: &str = "NETCONF";

const STREAM: &str = "stream";
const FILTER: &str = "filter";
const START_TIME: &str = "startTime";
const STOP_TIME: &str = "stopTime";

/// Parsed `create-subscription` parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionRequest {
    /// Event stream to subscribe to.
    pub stream: String,
    /// Subtree filter applied to event payloads.
    pub filter: Option<SubtreeFilter>,
    /// Start of the replay window.
    pub start_time: Option<OffsetDateTime>,
    /// End of the subscription.
    pub stop_time: Option<OffsetDateTime>,
}

impl SubscriptionRequest {
    /// Subscription to `stream` without filter or replay.
    #[must_use]
    pub fn live(stream: impl Into<String>) -> Self {
        Self {
            stream: stream.into(),
            filter: None,
            start_time: None,
            stop_time: None,
        }
    }

    /// Parses the parameters of a `create-subscription` request.
    ///
    /// # Errors
    ///
    /// Returns `invalid-value` for parameters of the wrong type or timestamps
    /// that are not RFC 3339.
    pub fn from_content(content: &Value) -> Result<Self, RpcError> {
        let stream = match content.get(STREAM) {
            None | Some(Value::Null) => DEFAULT_STREAM.to_owned(),
            Some(Value::String(name)) => name.clone(),
            Some(_) => return Err(RpcError::invalid_value(STREAM)),
        };
        let filter = match content.get(FILTER) {
            None | Some(Value::Null) => None,
            Some(value @ Value::Object(_)) => Some(SubtreeFilter::new(value.clone())),
            Some(_) => return Err(RpcError::invalid_value(FILTER)),
        };
        Ok(Self {
            stream,
            filter,
            start_time: parse_time(content, START_TIME)?,
            stop_time: parse_time(content, STOP_TIME)?,
        })
    }

    /// Applies the acceptance rules for a new subscription.
    ///
    /// # Errors
    ///
    /// - unknown stream: `invalid-value` naming `stream`;
    /// - start time in the future: `bad-element` naming `startTime`;
    /// - stop time without start time: `missing-element` naming `startTime`;
    /// - stop time before start time: `bad-element` naming `stopTime`.
    pub fn check(&self, streams: &[String], now: OffsetDateTime) -> Result<(), RpcError> {
        if !streams.iter().any(|stream| stream == &self.stream) {
            return Err(RpcError::invalid_value(STREAM)
                .with_message(format!("event stream '{}' does not exist", self.stream)));
        }
        if let Some(start) = self.start_time
            && start > now
        {
            return Err(RpcError::bad_element(START_TIME)
                .with_message("start time lies in the future"));
        }
        match (self.start_time, self.stop_time) {
            (None, Some(_)) => Err(RpcError::missing_element(START_TIME)
                .with_message("stop time requires a start time")),
            (Some(start), Some(stop)) if stop < start => Err(RpcError::bad_element(STOP_TIME)
                .with_message("stop time precedes start time")),
            _ => Ok(()),
        }
    }

    /// Reports whether stored events should be replayed first.
    #[must_use]
    pub const fn is_replay(&self) -> bool {
        self.start_time.is_some()
    }

    /// Reports whether the subscription's stop time has passed.
    #[must_use]
    pub fn has_ended(&self, now: OffsetDateTime) -> bool {
        self.stop_time.is_some_and(|stop| now >= stop)
    }

    /// Decides whether an event is delivered.
    ///
    /// Events outside the replay window or rejected by the filter are skipped.
    #[must_use]
    pub fn accepts(&self, event_time: OffsetDateTime, event: &Value) -> bool {
        if self.start_time.is_some_and(|start| event_time < start) {
            return false;
        }
        if self.stop_time.is_some_and(|stop| event_time > stop) {
            return false;
        }
        self.filter
            .as_ref()
            .is_none_or(|filter| filter.matches(event))
    }
}

fn parse_time(content: &Value, field: &'static str) -> Result<Option<OffsetDateTime>, RpcError> {
    match content.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => timestamp::parse(text).map(Some).map_err(|error| {
            RpcError::invalid_value(field).with_message(format!("invalid timestamp: {error}"))
        }),
        Some(_) => Err(RpcError::invalid_value(field)),
    }
}

/// Subtree filter over JSON event payloads.
///
/// Every member of the filter object must appear in the event. Nested objects
/// recurse, an empty object or `null` only requires presence, and any other
/// value must compare equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtreeFilter(Value);

impl SubtreeFilter {
    /// Wraps a filter document.
    #[must_use]
    pub const fn new(filter: Value) -> Self {
        Self(filter)
    }

    /// Returns the filter document.
    #[must_use]
    pub const fn as_value(&self) -> &Value {
        &self.0
    }

    /// Tests an event payload against the filter.
    #[must_use]
    pub fn matches(&self, event: &Value) -> bool {
        subtree_matches(&self.0, event)
    }
}

fn subtree_matches(filter: &Value, candidate: &Value) -> bool {
    match filter {
        Value::Null => true,
        Value::Object(selectors) if selectors.is_empty() => true,
        Value::Object(selectors) => candidate
            .as_object()
            .is_some_and(|members| members_match(selectors, members)),
        other => other == candidate,
    }
}

fn members_match(selectors: &Map<String, Value>, members: &Map<String, Value>) -> bool {
    selectors.iter().all(|(name, selector)| {
        members
            .get(name)
            .is_some_and(|member| subtree_matches(selector, member))
    })
}
