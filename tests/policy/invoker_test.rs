//! Tests for `PolicyInvoker` and the built-in registry.

use serde_json::json;

use policy_composition::error::ErrorCode;
use policy_composition::policies::{builtin_registry, names};
use policy_composition::policy::PolicyError;

use crate::support::{invocations, Harness};

#[test]
fn builtin_registry_holds_every_policy() {
    let registry = builtin_registry();
    for name in [
        names::QUERY_PROCESSOR,
        names::DATA_MOVEMENT,
        names::DATA_REPLICATION,
        names::DATA_VERIFICATION,
        names::DATA_RETENTION,
        names::ACCESS_TIME,
        names::FILESYSTEM_USAGE,
        names::VERIFY_CHECKSUM,
        names::LOG_CONTEXT,
        names::EVENT_DELEGATE_COLLECTION_METADATA,
        names::EVENT_GENERATOR_RESOURCE_METADATA,
    ] {
        assert!(registry.contains(name), "{name} should be registered");
    }
    assert_eq!(registry.len(), 11);
}

#[test]
fn registering_same_name_replaces_policy() {
    let h = Harness::new();
    let before = h.registry.len();
    h.record(names::LOG_CONTEXT);
    assert_eq!(h.registry.len(), before);
}

#[tokio::test]
async fn unknown_policy_is_an_error() {
    let h = Harness::new();
    let err = h
        .invoker()
        .invoke("irods_policy_missing", json!({}), json!({}))
        .await
        .expect_err("unknown");
    assert!(matches!(err, PolicyError::UnknownPolicy(ref name) if name == "irods_policy_missing"));
    assert_eq!(err.code(), ErrorCode::InvalidInputParam);
}

#[tokio::test]
async fn null_configuration_becomes_empty_object() {
    let h = Harness::new();
    let log = h.record("test_recorder");
    h.invoker()
        .invoke("test_recorder", json!({ "k": "v" }), serde_json::Value::Null)
        .await
        .expect("invoke");
    let calls = invocations(&log);
    assert_eq!(calls[0].0, json!({ "k": "v" }));
    assert_eq!(calls[0].1, json!({}));
}

#[tokio::test]
async fn serialized_boundary_returns_empty_buffer_for_null_output() {
    let h = Harness::new();
    h.record("test_recorder");
    let out = h
        .invoker()
        .invoke_serialized("test_recorder", r#"{"logical_path":"/z/f"}"#, "")
        .await
        .expect("invoke");
    assert_eq!(out, "");
}

#[tokio::test]
async fn serialized_boundary_rejects_invalid_json() {
    let h = Harness::new();
    let err = h
        .invoker()
        .invoke_serialized(names::LOG_CONTEXT, "{not json", "{}")
        .await
        .expect_err("invalid json");
    assert_eq!(err.code, ErrorCode::InvalidInputParam.as_i32());
    assert!(err.message.contains("parameters"));
}

#[tokio::test]
async fn serialized_boundary_reports_policy_errors() {
    let h = Harness::new();
    h.fail("test_failing");
    let err = h
        .invoker()
        .invoke_serialized("test_failing", "{}", "{}")
        .await
        .expect_err("failing policy");
    assert_eq!(err.code, ErrorCode::InvalidInputParam.as_i32());
    assert!(err.message.contains("injected failure"));
}

#[tokio::test]
async fn log_context_accepts_anything() {
    let h = Harness::new();
    let out = h
        .invoker()
        .invoke(names::LOG_CONTEXT, json!({ "a": 1 }), json!({ "b": 2 }))
        .await
        .expect("log context");
    assert!(out.is_null());
}
