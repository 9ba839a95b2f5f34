//! The collection metadata delegate and the resource metadata generator.

use serde_json::{json, Value};

use policy_composition::error::ErrorCode;
use policy_composition::policies::names;
use policy_composition::policy::PolicyError;
use policy_composition::services::{Avu, EntityType};

use crate::support::{invocations, Harness};

// ── Delegate ────────────────────────────────────────────────────

fn delegate_configuration() -> Value {
    json!({
        "policies_to_invoke": [
            {
                "policy": "test_archive",
                "conditional": { "metadata": { "attribute": "archive" } },
                "configuration": { "destination_resource": "tape" }
            }
        ]
    })
}

#[tokio::test]
async fn delegate_forwards_to_policies_matching_ancestor_metadata() {
    let h = Harness::new();
    let log = h.record("test_archive");
    h.catalog.data_object("/z/home/c/f");
    h.metadata
        .attach(EntityType::Collection, "/z/home", Avu::new("archive", "yes", ""));
    h.metadata
        .attach(EntityType::Collection, "/z/home/c", Avu::new("owner", "alice", ""));

    h.invoker()
        .invoke(
            names::EVENT_DELEGATE_COLLECTION_METADATA,
            json!({ "event": "PUT", "logical_path": "/z/home/c/f" }),
            delegate_configuration(),
        )
        .await
        .expect("delegate");

    let calls = invocations(&log);
    assert_eq!(calls.len(), 1);
    let (parameters, configuration) = &calls[0];
    assert_eq!(parameters["event"], "PUT");
    assert_eq!(parameters["conditional"]["metadata"]["attribute"], "archive");
    assert_eq!(parameters["conditional"]["metadata"]["value"], "yes");
    assert_eq!(
        parameters["conditional"]["metadata"]["entity_type"],
        "data_object"
    );
    assert_eq!(configuration, &json!({ "destination_resource": "tape" }));
}

#[tokio::test]
async fn delegate_invokes_once_per_matching_collection() {
    let h = Harness::new();
    let log = h.record("test_archive");
    h.catalog.data_object("/z/home/f");
    h.metadata
        .attach(EntityType::Collection, "/z/home", Avu::new("archive", "yes", ""));
    h.metadata
        .attach(EntityType::Collection, "/z", Avu::new("archive", "zone", ""));

    h.invoker()
        .invoke(
            names::EVENT_DELEGATE_COLLECTION_METADATA,
            json!({ "logical_path": "/z/home/f" }),
            delegate_configuration(),
        )
        .await
        .expect("delegate");

    let values: Vec<Value> = invocations(&log)
        .into_iter()
        .map(|(p, _)| p["conditional"]["metadata"]["value"].clone())
        .collect();
    assert_eq!(values, vec![json!("yes"), json!("zone")]);
}

#[tokio::test]
async fn delegate_without_matching_metadata_invokes_nothing() {
    let h = Harness::new();
    let log = h.record("test_archive");
    h.catalog.data_object("/z/home/f");

    h.invoker()
        .invoke(
            names::EVENT_DELEGATE_COLLECTION_METADATA,
            json!({ "logical_path": "/z/home/f" }),
            delegate_configuration(),
        )
        .await
        .expect("delegate");
    assert!(invocations(&log).is_empty());
}

#[tokio::test]
async fn delegate_aggregates_failing_targets() {
    let h = Harness::new();
    h.fail("test_archive");
    h.catalog.data_object("/z/home/f");
    h.metadata
        .attach(EntityType::Collection, "/z/home", Avu::new("archive", "yes", ""));

    let err = h
        .invoker()
        .invoke(
            names::EVENT_DELEGATE_COLLECTION_METADATA,
            json!({ "logical_path": "/z/home/f" }),
            delegate_configuration(),
        )
        .await
        .expect_err("target fails");
    let PolicyError::Aggregated { failures } = err else {
        panic!("expected aggregated failure, got {err:?}");
    };
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].policy, "test_archive");
}

#[tokio::test]
async fn delegate_requires_policies_and_path() {
    let h = Harness::new();
    let invoker = h.invoker();

    let err = invoker
        .invoke(
            names::EVENT_DELEGATE_COLLECTION_METADATA,
            json!({ "logical_path": "/z/f" }),
            Value::Null,
        )
        .await
        .expect_err("no policies");
    assert_eq!(err.code(), ErrorCode::InvalidInputParam);

    let err = invoker
        .invoke(
            names::EVENT_DELEGATE_COLLECTION_METADATA,
            json!({}),
            delegate_configuration(),
        )
        .await
        .expect_err("no path");
    assert!(err.to_string().contains("logical_path"));
}

// ── Generator ───────────────────────────────────────────────────

fn tiers(h: &Harness, attribute: &str) {
    h.catalog.respond(
        &format!("META_RESC_ATTR_NAME = '{attribute}'"),
        &[&["tier0", "0"], &["tier1", "1"], &["tier2", "2"]],
    );
}

#[tokio::test]
async fn generator_invokes_each_consecutive_resource_pair() {
    let h = Harness::new();
    let log = h.record("test_tiering");
    tiers(&h, "irods::storage_tier");

    h.invoker()
        .invoke(
            names::EVENT_GENERATOR_RESOURCE_METADATA,
            json!({ "user_name": "rods" }),
            json!({
                "policies_to_invoke": [
                    { "policy": "test_tiering", "configuration": { "mode": "trim_single_replica" } }
                ],
                "conditional": { "metadata": { "attribute": "irods::storage_tier" } }
            }),
        )
        .await
        .expect("generate");

    let calls = invocations(&log);
    let pairs: Vec<(Value, Value)> = calls
        .iter()
        .map(|(p, _)| (p["source_resource"].clone(), p["destination_resource"].clone()))
        .collect();
    assert_eq!(
        pairs,
        vec![
            (json!("tier0"), json!("tier1")),
            (json!("tier1"), json!("tier2")),
        ]
    );
    assert!(calls.iter().all(|(p, _)| p["user_name"] == "rods"));
    assert!(calls
        .iter()
        .all(|(_, c)| c == &json!({ "mode": "trim_single_replica" })));
}

#[tokio::test]
async fn generator_substitutes_query_results_into_metadata() {
    let h = Harness::new();
    let log = h.record("test_tiering");
    tiers(&h, "site::tier");

    h.invoker()
        .invoke(
            names::EVENT_GENERATOR_RESOURCE_METADATA,
            json!({ "query_results": ["site::tier"] }),
            json!({
                "policies_to_invoke": [{ "policy": "test_tiering" }],
                "conditional": { "metadata": { "attribute": "{0}" } }
            }),
        )
        .await
        .expect("generate");

    assert_eq!(invocations(&log).len(), 2);
    assert!(h
        .catalog
        .queries()
        .iter()
        .any(|q| q.contains("META_RESC_ATTR_NAME = 'site::tier'")));
}

#[tokio::test]
async fn generator_without_resources_does_nothing() {
    let h = Harness::new();
    let log = h.record("test_tiering");
    h.invoker()
        .invoke(
            names::EVENT_GENERATOR_RESOURCE_METADATA,
            json!({}),
            json!({
                "policies_to_invoke": [{ "policy": "test_tiering" }],
                "conditional": { "metadata": { "attribute": "untagged" } }
            }),
        )
        .await
        .expect("nothing to generate");
    assert!(invocations(&log).is_empty());
}

#[tokio::test]
async fn generator_aggregates_failures_and_checks_configuration() {
    let h = Harness::new();
    h.fail("test_tiering");
    tiers(&h, "irods::storage_tier");
    let invoker = h.invoker();

    let err = invoker
        .invoke(
            names::EVENT_GENERATOR_RESOURCE_METADATA,
            json!({}),
            json!({
                "policies_to_invoke": [{ "policy": "test_tiering" }],
                "conditional": { "metadata": { "attribute": "irods::storage_tier" } }
            }),
        )
        .await
        .expect_err("every pair fails");
    let PolicyError::Aggregated { failures } = err else {
        panic!("expected aggregated failure, got {err:?}");
    };
    assert_eq!(failures.len(), 2);

    let err = invoker
        .invoke(
            names::EVENT_GENERATOR_RESOURCE_METADATA,
            json!({}),
            json!({ "policies_to_invoke": [{ "policy": "test_tiering" }] }),
        )
        .await
        .expect_err("no conditional metadata");
    assert!(err.to_string().contains("missing conditional metadata"));
}
