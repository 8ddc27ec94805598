//! Unit tests for bus request handling.

use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::thread;

use mockall::mock;
use rstest::{fixture, rstest};
use serde_json::{Value, json};

use netkeep_bus::{DEFAULT_MAX_FRAME_BYTES, FrameReader, ServerFrame, write_frame};
use netkeep_proto::{Capability, CapabilitySet, ErrorTag, Rpc, RpcError, capability};

use super::*;
use crate::modules::system::{SYSTEM_NAMESPACE, SystemModule};
use crate::modules::{Module, ModuleDescriptor, ModuleError, ModuleReply};
use crate::tests::support::{HealthEvent, RecordingHealthReporter};

mock! {
    pub Backend {}

    impl Module for Backend {
        fn descriptor(&self) -> &ModuleDescriptor;
        fn execute(&self, operation: &str, content: &Value) -> Result<ModuleReply, ModuleError>;
        fn supports_rollback(&self) -> bool;
        fn undo(&self, operation: &str, prior_state: &Value) -> Result<(), ModuleError>;
    }
}

struct Harness {
    server: BusServer,
    reporter: Arc<RecordingHealthReporter>,
}

impl Harness {
    fn with_modules(modules: ModuleRegistry) -> Self {
        let reporter = Arc::new(RecordingHealthReporter::default());
        let server = BusServer::new(
            Arc::new(SessionRegistry::new()),
            modules,
            Arc::new(EventJournal::new(16)),
            Arc::clone(&reporter) as Arc<dyn HealthReporter>,
            DEFAULT_MAX_FRAME_BYTES,
        );
        Self { server, reporter }
    }

    fn register(&self, owner: u64, session_id: &str, uris: &[&str]) -> BusResponse {
        let capabilities: CapabilitySet = uris.iter().copied().map(Capability::new).collect();
        self.server.serve(
            &OwnerId::from_sequence(owner),
            BusRequest::RegisterSession {
                session_id: session_id.to_owned(),
                capabilities,
                username: Some(String::from("admin")),
                transport_identity: None,
            },
        )
    }

    fn dispatch(&self, owner: u64, session_id: &str, rpc: Rpc) -> BusResponse {
        self.server.serve(
            &OwnerId::from_sequence(owner),
            BusRequest::Dispatch {
                session_id: session_id.to_owned(),
                rpc,
            },
        )
    }

    fn journal_events(&self, name: &str) -> Vec<Value> {
        let (records, _) = self
            .server
            .journal()
            .fetch(DEFAULT_STREAM, 0, 64)
            .expect("fetch journal");
        records
            .into_iter()
            .filter_map(|record| record.event.get(name).cloned())
            .collect()
    }
}

#[fixture]
fn harness() -> Harness {
    let modules = ModuleRegistry::new();
    modules
        .add(Arc::new(SystemModule::new()))
        .expect("register system module");
    Harness::with_modules(modules)
}

fn rejection(response: BusResponse) -> RpcError {
    match response {
        BusResponse::Error { error } => error,
        other => panic!("expected a rejection, got {other:?}"),
    }
}

fn reply_errors(response: &BusResponse) -> Vec<ErrorTag> {
    match response {
        BusResponse::Reply { reply } => reply
            .rpc_errors()
            .iter()
            .map(|error| error.error_tag)
            .collect(),
        other => panic!("expected a reply, got {other:?}"),
    }
}

fn hostname_edit(hostname: &str) -> Rpc {
    Rpc::new("7", "edit-config").with_content(json!({
        "config": { SYSTEM_NAMESPACE: { "system": { "hostname": hostname } } }
    }))
}

#[rstest]
fn server_info_lists_protocol_and_module_capabilities(harness: Harness) {
    let BusResponse::ServerInfo {
        capabilities,
        streams,
    } = harness
        .server
        .serve(&OwnerId::from_sequence(1), BusRequest::GetServerInfo)
    else {
        panic!("expected server info");
    };
    assert!(capabilities.contains(capability::BASE_1_1));
    assert!(capabilities.contains(capability::NOTIFICATION));
    assert!(capabilities.contains(SYSTEM_NAMESPACE));
    assert_eq!(streams, [DEFAULT_STREAM]);
}

#[rstest]
fn duplicate_session_ids_are_in_use(harness: Harness) {
    assert_eq!(harness.register(1, "5", &[capability::BASE_1_1]), BusResponse::Ok);
    let error = rejection(harness.register(2, "5", &[capability::BASE_1_1]));
    assert_eq!(error.error_tag, ErrorTag::InUse);
    assert_eq!(error.error_info.session_id.as_deref(), Some("5"));
}

#[rstest]
fn a_connection_owns_one_session(harness: Harness) {
    assert_eq!(harness.register(1, "5", &[capability::BASE_1_1]), BusResponse::Ok);
    let error = rejection(harness.register(1, "6", &[capability::BASE_1_1]));
    assert_eq!(error.error_tag, ErrorTag::InUse);
    assert_eq!(error.error_info.session_id.as_deref(), Some("5"));
}

#[rstest]
fn only_the_owner_may_release_a_session(harness: Harness) {
    harness.register(1, "5", &[capability::BASE_1_1]);
    let release = |owner| {
        harness.server.serve(
            &OwnerId::from_sequence(owner),
            BusRequest::ReleaseSession {
                session_id: String::from("5"),
            },
        )
    };

    assert_eq!(rejection(release(2)).error_tag, ErrorTag::AccessDenied);
    assert_eq!(release(1), BusResponse::Ok);

    let ended = harness.journal_events("netconf-session-end");
    assert_eq!(ended.len(), 1);
    assert_eq!(ended[0]["termination-reason"], "closed");
    assert!(harness.server.sessions().get_by_id("5").expect("lookup").is_none());
}

#[rstest]
#[case::itself("5")]
#[case::unknown("99")]
fn kill_targets_must_be_other_live_sessions(harness: Harness, #[case] target: &str) {
    harness.register(1, "5", &[capability::BASE_1_1]);
    let error = rejection(harness.server.serve(
        &OwnerId::from_sequence(1),
        BusRequest::TerminateSession {
            session_id: String::from("5"),
            target: target.to_owned(),
        },
    ));
    assert_eq!(error.error_tag, ErrorTag::InvalidValue);
    assert_eq!(error.bad_element_name(), Some("session-id"));
}

#[rstest]
fn a_victim_released_mid_kill_is_an_unknown_session(harness: Harness) {
    harness.register(2, "6", &[capability::BASE_1_1]);
    harness.server.serve(
        &OwnerId::from_sequence(2),
        BusRequest::ReleaseSession {
            session_id: String::from("6"),
        },
    );

    let error = harness
        .server
        .mark_terminating("6")
        .expect_err("released session cannot be marked");
    assert_eq!(error.error_tag, ErrorTag::InvalidValue);
    assert_eq!(error.bad_element_name(), Some("session-id"));
}

#[rstest]
fn killing_a_session_without_a_connection_still_removes_it(harness: Harness) {
    harness.register(1, "5", &[capability::BASE_1_1]);
    harness.register(2, "6", &[capability::BASE_1_1]);
    let response = harness.server.serve(
        &OwnerId::from_sequence(1),
        BusRequest::TerminateSession {
            session_id: String::from("5"),
            target: String::from("6"),
        },
    );
    assert_eq!(response, BusResponse::Ok);
    assert!(harness.server.sessions().get_by_id("6").expect("lookup").is_none());
    let ended = harness.journal_events("netconf-session-end");
    assert_eq!(ended[0]["killed-by"], "5");
}

#[rstest]
fn shutting_down_ends_every_session(harness: Harness) {
    harness.register(1, "5", &[capability::BASE_1_1]);
    harness.register(2, "6", &[capability::BASE_1_1]);

    assert_eq!(harness.server.shut_down(), 2);

    assert!(harness.server.sessions().snapshot().expect("snapshot").is_empty());
    let ended = harness.journal_events("netconf-session-end");
    assert_eq!(ended.len(), 2);
    for event in ended {
        assert_eq!(event["termination-reason"], "killed");
        assert!(event.get("killed-by").is_none());
    }
}

#[rstest]
fn shutting_down_signals_and_disconnects_agents(harness: Harness) {
    let (agent, server_end) = UnixStream::pair().expect("socket pair");
    let mut requests = agent.try_clone().expect("clone agent end");
    let mut frames = FrameReader::new(agent, DEFAULT_MAX_FRAME_BYTES);

    thread::scope(|scope| {
        scope.spawn(|| harness.server.handle(ConnectionStream::Unix(server_end)));
        write_frame(
            &mut requests,
            &BusRequest::RegisterSession {
                session_id: String::from("5"),
                capabilities: [Capability::new(capability::BASE_1_1)].into_iter().collect(),
                username: None,
                transport_identity: None,
            },
        )
        .expect("send registration");
        let registered: ServerFrame = frames.read_frame().expect("read").expect("frame");
        assert_eq!(registered, ServerFrame::Response(BusResponse::Ok));

        assert_eq!(harness.server.shut_down(), 1);

        let signal: ServerFrame = frames.read_frame().expect("read").expect("frame");
        assert_eq!(
            signal,
            ServerFrame::Signal(BusSignal::Terminate {
                session_id: String::from("5"),
                killed_by: None,
            })
        );
        assert!(frames.read_frame::<ServerFrame>().expect("clean close").is_none());
    });
    assert!(harness.server.sessions().snapshot().expect("snapshot").is_empty());
}

#[rstest]
fn edits_are_journalled_as_config_changes(harness: Harness) {
    harness.register(1, "5", &[capability::BASE_1_1, SYSTEM_NAMESPACE]);
    let response = harness.dispatch(1, "5", hostname_edit("edge-1"));
    assert!(reply_errors(&response).is_empty());

    let changes = harness.journal_events("netconf-config-change");
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0]["edit"][0]["target"], "system");
    assert_eq!(changes[0]["changed-by"]["session-id"], "5");
}

#[rstest]
fn dispatch_checks_session_ownership(harness: Harness) {
    harness.register(1, "5", &[capability::BASE_1_1, SYSTEM_NAMESPACE]);
    let error = rejection(harness.dispatch(2, "5", hostname_edit("edge-1")));
    assert_eq!(error.error_tag, ErrorTag::AccessDenied);
    assert!(harness.journal_events("netconf-config-change").is_empty());
}

#[rstest]
fn fetching_events_requires_a_session(harness: Harness) {
    let error = rejection(harness.server.serve(
        &OwnerId::from_sequence(1),
        BusRequest::FetchEvents {
            session_id: String::from("404"),
            stream: DEFAULT_STREAM.to_owned(),
            after: 0,
            limit: 10,
        },
    ));
    assert_eq!(error.error_tag, ErrorTag::InvalidValue);
}

#[rstest]
fn fetching_events_returns_newer_records(harness: Harness) {
    harness.register(1, "5", &[capability::BASE_1_1]);
    harness.register(2, "6", &[capability::BASE_1_1]);
    let response = harness.server.serve(
        &OwnerId::from_sequence(1),
        BusRequest::FetchEvents {
            session_id: String::from("5"),
            stream: DEFAULT_STREAM.to_owned(),
            after: 1,
            limit: 10,
        },
    );
    let BusResponse::Events { records, last } = response else {
        panic!("expected events");
    };
    assert_eq!(last, 2);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].event["netconf-session-start"]["session-id"], "6");
}

#[rstest]
fn toggling_an_unknown_module_names_the_element(harness: Harness) {
    let error = rejection(harness.server.serve(
        &OwnerId::from_sequence(1),
        BusRequest::SetModuleEnabled {
            name: String::from("bgp"),
            enabled: false,
        },
    ));
    assert_eq!(error.error_tag, ErrorTag::InvalidValue);
    assert_eq!(error.bad_element_name(), Some("name"));
}

#[rstest]
fn disabled_modules_stop_serving_requests(harness: Harness) {
    harness.register(1, "5", &[capability::BASE_1_1, SYSTEM_NAMESPACE]);
    let toggled = harness.server.serve(
        &OwnerId::from_sequence(1),
        BusRequest::SetModuleEnabled {
            name: String::from("system"),
            enabled: false,
        },
    );
    assert_eq!(toggled, BusResponse::Ok);

    let response = harness.dispatch(1, "5", hostname_edit("edge-1"));
    assert_eq!(reply_errors(&response), [ErrorTag::OperationNotSupported]);
}

fn mocked(name: &str, id: u32) -> MockBackend {
    let mut backend = MockBackend::new();
    backend.expect_descriptor().return_const(
        ModuleDescriptor::new(name, id)
            .with_capability(format!("urn:example:{name}"))
            .with_operations(["edit-config"]),
    );
    backend.expect_supports_rollback().return_const(true);
    backend
}

#[test]
fn failed_rollback_is_reported_as_fatal() {
    let mut applied = mocked("alpha", 1);
    applied
        .expect_execute()
        .returning(|_, _| Ok(ModuleReply::changed(json!({"before": 1}))));
    applied
        .expect_undo()
        .times(1)
        .returning(|_, _| Err(ModuleError::internal("alpha snapshot lost")));
    let mut failing = mocked("beta", 2);
    failing
        .expect_execute()
        .returning(|_, _| Err(RpcError::operation_failed().with_message("beta refused").into()));

    let modules = ModuleRegistry::new();
    modules.add(Arc::new(applied)).expect("register alpha");
    modules.add(Arc::new(failing)).expect("register beta");
    let harness = Harness::with_modules(modules);
    harness.register(
        1,
        "5",
        &[capability::BASE_1_1, "urn:example:alpha", "urn:example:beta"],
    );

    let rpc = Rpc::new("9", "edit-config").with_content(json!({
        "error-option": "rollback-on-error",
        "config": { "urn:example:alpha": {}, "urn:example:beta": {} }
    }));
    let response = harness.dispatch(1, "5", rpc);

    assert!(matches!(response, BusResponse::Fatal { ref message } if message.contains("alpha")));
    assert!(
        harness
            .reporter
            .events()
            .iter()
            .any(|event| matches!(event, HealthEvent::FatalInconsistency(_)))
    );
    assert!(harness.journal_events("netconf-config-change").is_empty());
}
