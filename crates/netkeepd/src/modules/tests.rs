//! Unit tests for the module contract and registry.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mockall::mock;
use netkeep_proto::{Capability, CapabilitySet, ErrorTag};
use rstest::{fixture, rstest};
use serde_json::{Value, json};

use super::*;

const NS_A: &str = "urn:example:a";
const NS_B: &str = "urn:example:b";

mock! {
    pub Backend {}

    impl Module for Backend {
        fn descriptor(&self) -> &ModuleDescriptor;
        fn execute(&self, operation: &str, content: &Value) -> Result<ModuleReply, ModuleError>;
        fn supports_rollback(&self) -> bool;
        fn undo(&self, operation: &str, prior_state: &Value) -> Result<(), ModuleError>;
    }
}

struct StubModule {
    descriptor: ModuleDescriptor,
}

impl StubModule {
    fn shared(name: &str, id: u32, namespace: &str, operations: &[&str]) -> Arc<dyn Module> {
        Arc::new(Self {
            descriptor: ModuleDescriptor::new(name, id)
                .with_capability(namespace)
                .with_operations(operations.iter().copied()),
        })
    }
}

impl Module for StubModule {
    fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    fn execute(&self, _operation: &str, _content: &Value) -> Result<ModuleReply, ModuleError> {
        Ok(ModuleReply::ok())
    }
}

fn caps(uris: &[&str]) -> CapabilitySet {
    uris.iter().copied().map(Capability::new).collect()
}

fn names(leases: &[ModuleLease]) -> Vec<String> {
    leases
        .iter()
        .map(|lease| lease.module().descriptor().name().to_owned())
        .collect()
}

#[fixture]
fn registry() -> ModuleRegistry {
    let registry = ModuleRegistry::new();
    for module in [
        StubModule::shared("alpha", 1, NS_A, &["get", "edit-config"]),
        StubModule::shared("beta", 2, NS_B, &["get"]),
        StubModule::shared("gamma", 3, NS_A, &["get", "edit-config"]),
    ] {
        registry.add(module).expect("register module");
    }
    registry
}

#[rstest]
fn selection_follows_registration_order(registry: ModuleRegistry) {
    let leases = registry
        .find_implementing("edit-config", &caps(&[NS_A, NS_B]))
        .expect("select");
    assert_eq!(names(&leases), ["alpha", "gamma"]);
}

#[rstest]
#[case::capability_filter("get", &[NS_B], &["beta"])]
#[case::unknown_operation("commit", &[NS_A, NS_B], &[])]
#[case::no_shared_capability("get", &["urn:example:c"], &[])]
fn selection_requires_operation_and_capability(
    registry: ModuleRegistry,
    #[case] operation: &str,
    #[case] required: &[&str],
    #[case] expected: &[&str],
) {
    let leases = registry
        .find_implementing(operation, &caps(required))
        .expect("select");
    assert_eq!(names(&leases), expected);
}

#[rstest]
fn disabled_modules_are_skipped_without_revoking_leases(registry: ModuleRegistry) {
    let held = registry
        .find_implementing("get", &caps(&[NS_B]))
        .expect("select");
    registry.set_enabled("beta", false).expect("disable");
    assert!(
        registry
            .find_implementing("get", &caps(&[NS_B]))
            .expect("select")
            .is_empty()
    );
    let result = held
        .first()
        .map(|lease| lease.module().execute("get", &Value::Null));
    assert!(matches!(result, Some(Ok(_))));
}

#[rstest]
fn names_and_enabled_ids_must_be_unique(registry: ModuleRegistry) {
    assert_eq!(
        registry.add(StubModule::shared("alpha", 9, NS_A, &["get"])),
        Err(RegistryError::NameInUse {
            name: String::from("alpha")
        })
    );
    assert!(matches!(
        registry.add(StubModule::shared("delta", 2, NS_A, &["get"])),
        Err(RegistryError::IdInUse { id: 2, .. })
    ));
}

#[rstest]
fn reserved_id_zero_may_repeat(registry: ModuleRegistry) {
    registry
        .add(StubModule::shared("stats-a", 0, NS_A, &["get"]))
        .expect("first id 0 module");
    registry
        .add(StubModule::shared("stats-b", 0, NS_B, &["get"]))
        .expect("second id 0 module");
    let first = registry.get_by_id(0).expect("lookup").expect("present");
    assert_eq!(first.descriptor().name(), "stats-a");
}

#[rstest]
fn disabled_ids_can_be_reused_but_not_re_enabled(registry: ModuleRegistry) {
    registry.set_enabled("beta", false).expect("disable");
    registry
        .add(StubModule::shared("delta", 2, NS_B, &["get"]))
        .expect("id 2 is free while beta is disabled");
    assert!(matches!(
        registry.set_enabled("beta", true),
        Err(RegistryError::IdInUse { id: 2, .. })
    ));
}

#[rstest]
fn lookups_by_repository(registry: ModuleRegistry) {
    let module: Arc<dyn Module> = Arc::new(StubModule {
        descriptor: ModuleDescriptor::new("store", 7)
            .with_repository(4)
            .with_capability(NS_A)
            .with_operations(["get-config"]),
    });
    registry.add(module).expect("register");
    let found = registry
        .get_by_repository_id(4)
        .expect("lookup")
        .expect("present");
    assert_eq!(found.descriptor().name(), "store");
    assert!(registry.get_by_repository_id(5).expect("lookup").is_none());
}

#[rstest]
fn removal_waits_for_in_flight_calls(registry: ModuleRegistry) {
    let leases = registry
        .find_implementing("get", &caps(&[NS_B]))
        .expect("select");
    let busy = registry.remove("beta", Duration::from_millis(20));
    assert_eq!(
        busy.map(|_| ()),
        Err(RegistryError::Busy {
            name: String::from("beta"),
            in_flight: 1
        })
    );
    assert!(!registry.is_enabled("beta").expect("state"));

    let releaser = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        drop(leases);
    });
    let removed = registry
        .remove("beta", Duration::from_secs(5))
        .expect("removal after drain");
    assert_eq!(removed.descriptor().name(), "beta");
    releaser.join().expect("join releaser");
    assert!(registry.get_by_name("beta").expect("lookup").is_none());
}

#[rstest]
fn removing_unknown_modules_fails(registry: ModuleRegistry) {
    assert!(matches!(
        registry.remove("omega", Duration::ZERO),
        Err(RegistryError::NotFound { .. })
    ));
}

#[test]
fn default_undo_is_unsupported() {
    let module = StubModule::shared("alpha", 1, NS_A, &["edit-config"]);
    assert!(!module.supports_rollback());
    let error = module
        .undo("edit-config", &json!({}))
        .expect_err("no undo path");
    assert_eq!(error.to_rpc_error().error_tag, ErrorTag::OperationNotSupported);
}

#[test]
fn leased_mocks_are_invoked_through_the_registry() {
    let descriptor = ModuleDescriptor::new("mocked", 5)
        .with_capability(NS_A)
        .with_operations(["get"]);
    let mut backend = MockBackend::new();
    backend.expect_descriptor().return_const(descriptor);
    backend
        .expect_execute()
        .withf(|operation, _| operation == "get")
        .times(1)
        .returning(|_, _| Ok(ModuleReply::data(json!({NS_A: {"up": true}}))));
    let registry = ModuleRegistry::new();
    registry.add(Arc::new(backend)).expect("register mock");

    let leases = registry
        .find_implementing("get", &caps(&[NS_A]))
        .expect("select");
    let reply = leases
        .first()
        .map(|lease| lease.module().execute("get", &Value::Null));
    assert!(matches!(reply, Some(Ok(ModuleReply { data: Some(_), .. }))));
}
