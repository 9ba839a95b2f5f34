//! `irods_policy_access_time` and `irods_policy_filesystem_usage`.

use serde_json::{json, Value};

use policy_composition::error::ErrorCode;
use policy_composition::policies::names;
use policy_composition::policy::PolicyError;
use policy_composition::services::{AvuAction, EntityType, FilesystemStats};

use crate::support::Harness;

#[tokio::test]
async fn access_time_is_stamped_as_owner() {
    let h = Harness::new();
    h.catalog.respond(
        "SELECT USER_NAME WHERE COLL_NAME = '/z/home' AND DATA_NAME = 'f'",
        &[&["alice"]],
    );
    let before = chrono::Utc::now().timestamp();

    h.invoker()
        .invoke(
            names::ACCESS_TIME,
            json!({ "user_name": "bob", "logical_path": "/z/home/f" }),
            Value::Null,
        )
        .await
        .expect("stamp");

    let writes = h.metadata.writes();
    assert_eq!(writes.len(), 1);
    let op = &writes[0];
    assert_eq!(op.action, AvuAction::Set);
    assert_eq!(op.entity_type, EntityType::DataObject);
    assert_eq!(op.target, "/z/home/f");
    assert_eq!(op.avu.attribute, "irods::access_time");
    assert_eq!(op.as_user.as_deref(), Some("alice"));
    let stamped: i64 = op.avu.value.parse().expect("epoch seconds");
    assert!(stamped >= before);
}

#[tokio::test]
async fn access_time_falls_back_to_acting_user() {
    let h = Harness::new();
    h.invoker()
        .invoke(
            names::ACCESS_TIME,
            json!({ "user_name": "bob", "logical_path": "/z/home/f" }),
            json!({ "attribute": "last_access" }),
        )
        .await
        .expect("stamp");

    let writes = h.metadata.writes();
    assert_eq!(writes[0].avu.attribute, "last_access");
    assert_eq!(writes[0].as_user.as_deref(), Some("bob"));
}

#[tokio::test]
async fn access_time_requires_a_path() {
    let h = Harness::new();
    let err = h
        .invoker()
        .invoke(names::ACCESS_TIME, json!({ "user_name": "bob" }), Value::Null)
        .await
        .expect_err("no path");
    assert_eq!(err.code(), ErrorCode::InvalidInputParam);
}

fn collection_harness() -> Harness {
    let h = Harness::new();
    h.catalog
        .respond("SELECT USER_NAME WHERE COLL_NAME = '/z/c'", &[&["alice"]]);
    h.catalog.respond(
        "SELECT COLL_NAME, DATA_NAME WHERE COLL_NAME = '/z/c'",
        &[&["/z/c", "a"]],
    );
    h.catalog.respond(
        "COLL_NAME LIKE '/z/c/%'",
        &[&["/z/c/sub", "b"], &["/z/c/sub", "c"]],
    );
    h
}

fn collection_params() -> Value {
    json!({
        "user_name": "bob",
        "logical_path": "/z/c",
        "cond_input": { "collection": "" },
    })
}

#[tokio::test]
async fn empty_collection_flag_stamps_only_the_path() {
    let h = collection_harness();
    h.invoker()
        .invoke(names::ACCESS_TIME, collection_params(), Value::Null)
        .await
        .expect("stamp");
    let targets: Vec<String> = h.metadata.writes().into_iter().map(|op| op.target).collect();
    assert_eq!(targets, vec!["/z/c"]);
}

#[tokio::test]
async fn collection_operation_stamps_every_object_beneath() {
    let h = collection_harness();
    h.invoker()
        .invoke(
            names::ACCESS_TIME,
            json!({
                "user_name": "bob",
                "logical_path": "/z/c",
                "cond_input": { "collection": "1" },
            }),
            Value::Null,
        )
        .await
        .expect("stamp");

    let writes = h.metadata.writes();
    let targets: Vec<&str> = writes.iter().map(|op| op.target.as_str()).collect();
    assert_eq!(targets, vec!["/z/c/a", "/z/c/sub/b", "/z/c/sub/c"]);
    assert!(writes
        .iter()
        .all(|op| op.as_user.as_deref() == Some("alice")));
}

#[tokio::test]
async fn collection_write_failures_are_aggregated() {
    let h = collection_harness();
    h.metadata.fail_writes_to("/z/c/sub/b");
    let err = h
        .invoker()
        .invoke(
            names::ACCESS_TIME,
            json!({
                "logical_path": "/z/c",
                "cond_input": { "collection": "1" },
            }),
            Value::Null,
        )
        .await
        .expect_err("one write fails");

    assert_eq!(h.metadata.writes().len(), 3);
    let PolicyError::Aggregated { failures } = err else {
        panic!("expected aggregated failure, got {err:?}");
    };
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].code, ErrorCode::MetadataFailure.as_i32());
    assert!(failures[0].message.contains("/z/c/sub/b"));
}

// ── Filesystem usage ────────────────────────────────────────────

#[tokio::test]
async fn filesystem_usage_is_recorded_on_the_resource() {
    let h = Harness::new();
    h.resources.set_vault("ufs0", "/var/lib/vault");
    h.storage.set_filesystem(FilesystemStats {
        available_blocks: 25,
        total_blocks: 100,
    });

    h.invoker()
        .invoke(
            names::FILESYSTEM_USAGE,
            json!({ "source_resource": "ufs0" }),
            Value::Null,
        )
        .await
        .expect("usage");

    let writes = h.metadata.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].entity_type, EntityType::Resource);
    assert_eq!(writes[0].target, "ufs0");
    assert_eq!(
        writes[0].avu.attribute,
        "irods::resource::filesystem_percent_used"
    );
    assert_eq!(writes[0].avu.value, "75.000000");
}

#[tokio::test]
async fn filesystem_without_blocks_is_an_error() {
    let h = Harness::new();
    h.resources.set_vault("ufs0", "/var/lib/vault");
    h.storage.set_filesystem(FilesystemStats {
        available_blocks: 0,
        total_blocks: 0,
    });
    let err = h
        .invoker()
        .invoke(
            names::FILESYSTEM_USAGE,
            json!({ "source_resource": "ufs0" }),
            Value::Null,
        )
        .await
        .expect_err("zero blocks");
    assert_eq!(err.code(), ErrorCode::StorageFailure);
    assert!(h.metadata.writes().is_empty());
}

#[tokio::test]
async fn filesystem_usage_of_unknown_resource_fails() {
    let h = Harness::new();
    let err = h
        .invoker()
        .invoke(
            names::FILESYSTEM_USAGE,
            json!({ "source_resource": "nowhere" }),
            Value::Null,
        )
        .await
        .expect_err("unknown resource");
    assert_eq!(err.code(), ErrorCode::InvalidResource);

    let err = h
        .invoker()
        .invoke(names::FILESYSTEM_USAGE, json!({}), Value::Null)
        .await
        .expect_err("no resource");
    assert_eq!(err.code(), ErrorCode::InvalidInputParam);
}
