//! Unit tests for the system module.

use mockall::mock;
use rstest::{fixture, rstest};
use serde_json::{Value, json};

use netkeep_proto::ErrorTag;

use super::*;

mock! {
    pub Power {}
    impl PowerControl for Power {
        fn request(&self, action: PowerAction) -> Result<(), ModuleError>;
    }
}

#[fixture]
fn module() -> SystemModule {
    SystemModule::new()
}

fn edit(body: &Value) -> Value {
    json!({ "config": { SYSTEM_NAMESPACE: { "system": body } } })
}

fn rejected_tag(result: Result<ModuleReply, ModuleError>) -> ErrorTag {
    match result {
        Err(ModuleError::Rejected(error)) => error.error_tag,
        other => panic!("expected a rejected edit, got {other:?}"),
    }
}

fn with_servers(module: &SystemModule) {
    module
        .execute(
            "edit-config",
            &edit(&json!({
                "ntp": { "server": [
                    { "name": "a", "udp": { "address": "10.0.0.1" } },
                    { "name": "b", "udp": { "address": "10.0.0.2" }, "association-type": "pool" },
                ]}
            })),
        )
        .expect("seed servers");
}

#[rstest]
fn get_config_reports_defaults(module: SystemModule) {
    let reply = module.execute("get-config", &Value::Null).expect("get-config");
    let data = reply.data.expect("data returned");
    assert_eq!(data[SYSTEM_NAMESPACE]["system"]["hostname"], "netkeep");
    assert!(data[SYSTEM_NAMESPACE].get("system-state").is_none());
}

#[rstest]
fn get_includes_clock_state(module: SystemModule) {
    let reply = module.execute("get", &Value::Null).expect("get");
    let data = reply.data.expect("data returned");
    let clock = &data[SYSTEM_NAMESPACE]["system-state"]["clock"];
    assert!(clock["current-datetime"].is_string());
    assert!(clock["boot-datetime"].is_string());
}

#[rstest]
fn merge_updates_hostname_and_reports_prior_state(module: SystemModule) {
    let reply = module
        .execute("edit-config", &edit(&json!({ "hostname": "edge-1" })))
        .expect("edit");
    assert!(reply.is_change());
    assert_eq!(
        reply.prior_state.expect("prior state")["hostname"],
        "netkeep"
    );
    assert_eq!(module.config().expect("config").hostname, "edge-1");
}

#[rstest]
fn unchanged_edit_is_not_a_change(module: SystemModule) {
    let reply = module
        .execute("edit-config", &edit(&json!({ "hostname": "netkeep" })))
        .expect("edit");
    assert!(!reply.is_change());
}

#[rstest]
fn edit_without_system_content_is_a_no_op(module: SystemModule) {
    let reply = module
        .execute("edit-config", &json!({ "config": {} }))
        .expect("edit");
    assert!(!reply.is_change());
}

#[rstest]
#[case::both_zone_forms(json!({ "clock": { "timezone-name": "UTC", "timezone-utc-offset": 60 } }), ErrorTag::InvalidValue)]
#[case::unknown_zone(json!({ "clock": { "timezone-name": "Mars/Olympus" } }), ErrorTag::InvalidValue)]
#[case::odd_offset(json!({ "clock": { "timezone-utc-offset": 17 } }), ErrorTag::InvalidValue)]
#[case::unknown_leaf(json!({ "location": "rack 4" }), ErrorTag::UnknownElement)]
#[case::missing_address(json!({ "ntp": { "server": { "name": "x" } } }), ErrorTag::MissingElement)]
#[case::bad_hostname(json!({ "hostname": "-bad-" }), ErrorTag::InvalidValue)]
#[case::create_existing_container(json!({ "operation": "create" }), ErrorTag::DataExists)]
fn invalid_edits_are_rejected(module: SystemModule, #[case] body: Value, #[case] tag: ErrorTag) {
    assert_eq!(rejected_tag(module.execute("edit-config", &edit(&body))), tag);
    assert_eq!(module.config().expect("config"), SystemConfig::default());
}

#[rstest]
fn failed_edits_leave_no_partial_change(module: SystemModule) {
    let body = json!({ "hostname": "edge-2", "clock": { "timezone-name": "Nowhere" } });
    rejected_tag(module.execute("edit-config", &edit(&body)));
    assert_eq!(module.config().expect("config").hostname, "netkeep");
}

#[rstest]
fn timezone_forms_replace_each_other(module: SystemModule) {
    module
        .execute("edit-config", &edit(&json!({ "clock": { "timezone-name": "Europe/Prague" } })))
        .expect("set name");
    module
        .execute("edit-config", &edit(&json!({ "clock": { "timezone-utc-offset": 330 } })))
        .expect("set offset");
    assert_eq!(
        module.config().expect("config").clock,
        Some(Timezone::TimezoneUtcOffset(330))
    );
}

#[rstest]
fn server_entries_merge_by_name(module: SystemModule) {
    with_servers(&module);
    module
        .execute(
            "edit-config",
            &edit(&json!({ "ntp": { "server": { "name": "a", "association-type": "peer" } } })),
        )
        .expect("merge");
    let servers = module.config().expect("config").ntp.server;
    assert_eq!(servers.len(), 2);
    let first = servers.first().expect("first server");
    assert_eq!(first.association_type, AssociationType::Peer);
    assert_eq!(first.udp.address, "10.0.0.1");
}

#[rstest]
#[case::delete_present("delete", "a", Ok(1))]
#[case::delete_absent("delete", "zz", Err(ErrorTag::DataMissing))]
#[case::remove_absent("remove", "zz", Ok(2))]
#[case::create_present("create", "b", Err(ErrorTag::DataExists))]
fn server_entry_operations(
    module: SystemModule,
    #[case] operation: &str,
    #[case] name: &str,
    #[case] expected: Result<usize, ErrorTag>,
) {
    with_servers(&module);
    let body = json!({ "ntp": { "server": { "name": name, "operation": operation } } });
    let result = module.execute("edit-config", &edit(&body));
    match expected {
        Ok(count) => {
            result.expect("edit applies");
            assert_eq!(module.config().expect("config").ntp.server.len(), count);
        }
        Err(tag) => assert_eq!(rejected_tag(result), tag),
    }
}

#[rstest]
fn default_operation_replace_resets_omitted_leaves(module: SystemModule) {
    with_servers(&module);
    let mut content = edit(&json!({ "hostname": "edge-3" }));
    content["default-operation"] = json!("replace");
    module.execute("edit-config", &content).expect("replace");
    let config = module.config().expect("config");
    assert_eq!(config.hostname, "edge-3");
    assert!(config.ntp.server.is_empty());
}

#[rstest]
fn unknown_default_operation_is_rejected(module: SystemModule) {
    let mut content = edit(&json!({ "hostname": "edge-3" }));
    content["default-operation"] = json!("overwrite");
    assert_eq!(
        rejected_tag(module.execute("edit-config", &content)),
        ErrorTag::InvalidValue
    );
}

#[rstest]
fn undo_restores_the_prior_snapshot(module: SystemModule) {
    assert!(module.supports_rollback());
    let reply = module
        .execute("edit-config", &edit(&json!({ "hostname": "edge-4" })))
        .expect("edit");
    let prior = reply.prior_state.expect("prior state");
    module.undo("edit-config", &prior).expect("undo");
    assert_eq!(module.config().expect("config"), SystemConfig::default());
}

#[rstest]
fn set_current_datetime_requires_a_value(module: SystemModule) {
    assert_eq!(
        rejected_tag(module.execute("set-current-datetime", &json!({}))),
        ErrorTag::MissingElement
    );
    assert_eq!(
        rejected_tag(module.execute(
            "set-current-datetime",
            &json!({ "current-datetime": "yesterday" })
        )),
        ErrorTag::InvalidValue
    );
}

#[rstest]
fn set_current_datetime_is_refused_under_ntp(module: SystemModule) {
    module
        .execute("edit-config", &edit(&json!({ "ntp": { "enabled": true } })))
        .expect("enable ntp");
    let content = json!({ "current-datetime": "2030-01-01T00:00:00Z" });
    assert_eq!(
        rejected_tag(module.execute("set-current-datetime", &content)),
        ErrorTag::OperationFailed
    );
}

#[rstest]
fn set_current_datetime_shifts_reported_clock(module: SystemModule) {
    let content = json!({ "current-datetime": "2030-01-01T00:00:00Z" });
    module
        .execute("set-current-datetime", &content)
        .expect("set clock");
    let data = module
        .execute("get", &Value::Null)
        .expect("get")
        .data
        .expect("data returned");
    let reported = data[SYSTEM_NAMESPACE]["system-state"]["clock"]["current-datetime"]
        .as_str()
        .expect("timestamp string")
        .to_owned();
    assert!(reported.starts_with("2030-01-01T00:00"), "got {reported}");
}

#[rstest]
#[case::restart("system-restart", PowerAction::Restart)]
#[case::shutdown("system-shutdown", PowerAction::Shutdown)]
fn power_rpcs_reach_the_backend(#[case] operation: &str, #[case] action: PowerAction) {
    let mut power = MockPower::new();
    power
        .expect_request()
        .withf(move |requested| *requested == action)
        .times(1)
        .returning(|_| Ok(()));
    let module = SystemModule::new().with_power_control(Box::new(power));
    let reply = module.execute(operation, &Value::Null).expect("power rpc");
    assert!(reply.data.is_none());
}

#[rstest]
fn unknown_operations_are_unsupported(module: SystemModule) {
    assert!(matches!(
        module.execute("commit", &Value::Null),
        Err(ModuleError::Unsupported { .. })
    ));
}
