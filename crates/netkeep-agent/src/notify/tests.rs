use std::sync::Mutex;
use std::time::Instant;

use netkeep_bus::EventRecord;
use netkeep_proto::{CapabilitySet, DEFAULT_STREAM, FrameDecoder, ServerMessage};
use time::Duration as TimeSpan;

use super::*;
use crate::tests::support::{FakeServer, ServerScript};

/// Client writer the test can read back after the worker has finished.
#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().expect("captured bytes").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Captured {
    fn notifications(&self) -> Vec<Notification> {
        let mut decoder = FrameDecoder::new(1 << 20);
        decoder.push(&self.0.lock().expect("captured bytes"));
        let mut notifications = Vec::new();
        while let Some(frame) = decoder.next_frame().expect("frame") {
            match serde_json::from_slice(&frame).expect("server message") {
                ServerMessage::Notification(notification) => notifications.push(notification),
                other => panic!("unexpected message {other:?}"),
            }
        }
        notifications
    }
}

fn event_name(notification: &Notification) -> String {
    notification
        .event
        .as_object()
        .and_then(|members| members.keys().next().cloned())
        .unwrap_or_default()
}

fn job(
    server: &FakeServer,
    request: SubscriptionRequest,
    poll_interval: Duration,
    output: Captured,
) -> NotificationJob<Captured> {
    NotificationJob {
        session_id: String::from("7"),
        request,
        endpoint: server.endpoint().clone(),
        poll_interval,
        channel: ClientChannel::new(output),
        stop: StopFlag::new(),
        _slot: SubscriptionSlot::default().try_claim().expect("slot"),
    }
}

#[test]
fn a_slot_admits_one_subscription() {
    let slot = SubscriptionSlot::default();
    let guard = slot.try_claim().expect("first claim");
    assert!(slot.is_active());
    assert!(slot.try_claim().is_none());
    drop(guard);
    assert!(!slot.is_active());
    assert!(slot.try_claim().is_some());
}

#[test]
fn clones_share_the_slot() {
    let slot = SubscriptionSlot::default();
    let observer = slot.clone();
    let _guard = slot.try_claim().expect("claim");
    assert!(observer.is_active());
}

#[test]
fn racing_claims_yield_a_single_guard() {
    let slot = SubscriptionSlot::default();
    let winners: Vec<bool> = (0..8)
        .map(|_| {
            let slot = slot.clone();
            thread::spawn(move || slot.try_claim().map(std::mem::forget).is_some())
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|handle| handle.join().expect("claimant"))
        .collect();
    assert_eq!(winners.iter().filter(|won| **won).count(), 1);
}

#[test]
fn events_journalled_before_the_stop_time_arrive_before_completion() {
    let server = FakeServer::start(ServerScript {
        capabilities: CapabilitySet::default(),
        other_sessions: vec![String::from("7")],
        ..ServerScript::default()
    });
    let now = OffsetDateTime::now_utc();
    let request = SubscriptionRequest {
        start_time: Some(now - TimeSpan::seconds(1)),
        stop_time: Some(now + TimeSpan::milliseconds(400)),
        ..SubscriptionRequest::live(DEFAULT_STREAM)
    };
    let output = Captured::default();
    // The worker's only live poll happens before the event exists and the
    // next one falls after the stop time.
    let job = job(&server, request, Duration::from_secs(1), output.clone());

    let started = Instant::now();
    thread::scope(|scope| {
        scope.spawn(|| {
            thread::sleep(Duration::from_millis(150));
            server.publish(EventRecord {
                seq: 1,
                time: now + TimeSpan::milliseconds(150),
                stream: DEFAULT_STREAM.to_owned(),
                event: json!({ "netconf-config-change": { "changed-by": "admin" } }),
            });
        });
        assert_eq!(job.deliver().expect("deliver"), DeliveryEnd::Completed);
    });
    assert!(started.elapsed() >= Duration::from_millis(400));

    let names: Vec<String> = output.notifications().iter().map(event_name).collect();
    assert_eq!(
        names,
        [REPLAY_COMPLETE, "netconf-config-change", NOTIFICATION_COMPLETE]
    );
}

#[test]
fn events_after_the_stop_time_are_withheld() {
    let server = FakeServer::start(ServerScript {
        other_sessions: vec![String::from("7")],
        ..ServerScript::default()
    });
    let now = OffsetDateTime::now_utc();
    let request = SubscriptionRequest {
        start_time: Some(now - TimeSpan::seconds(1)),
        stop_time: Some(now + TimeSpan::milliseconds(50)),
        ..SubscriptionRequest::live(DEFAULT_STREAM)
    };
    server.publish(EventRecord {
        seq: 1,
        time: now + TimeSpan::seconds(5),
        stream: DEFAULT_STREAM.to_owned(),
        event: json!({ "netconf-session-start": {} }),
    });
    let output = Captured::default();
    let job = job(&server, request, Duration::from_millis(20), output.clone());

    assert_eq!(job.deliver().expect("deliver"), DeliveryEnd::Completed);
    let names: Vec<String> = output.notifications().iter().map(event_name).collect();
    assert_eq!(names, [REPLAY_COMPLETE, NOTIFICATION_COMPLETE]);
}
