//! Tests for `src/query/mod.rs`: query-driven fan-out.

use serde_json::{json, Map, Value};

use policy_composition::query::{self, ChainedPolicy, QueryError, QueryIteration};

use crate::support::{invocations, Harness};

const QUERY: &str = "SELECT COLL_NAME, DATA_NAME WHERE RESC_NAME = 'ufs0'";

fn chained(name: &str) -> ChainedPolicy {
    ChainedPolicy {
        policy_to_invoke: name.to_owned(),
        ..ChainedPolicy::default()
    }
}

fn iteration(policies: Vec<ChainedPolicy>) -> QueryIteration {
    QueryIteration {
        query: QUERY.to_owned(),
        number_of_threads: 2,
        policies,
        ..QueryIteration::default()
    }
}

#[tokio::test]
async fn every_row_reaches_every_chained_policy() {
    let h = Harness::new();
    h.catalog
        .respond(QUERY, &[&["/z/c", "a"], &["/z/c", "b"], &["/z/d", "c"]]);
    let first = h.record("test_first");
    let second = h.record("test_second");

    let summary = query::run(
        &h.invoker(),
        iteration(vec![chained("test_first"), chained("test_second")]),
    )
    .await
    .expect("run");

    assert_eq!(summary.rows, 3);
    assert_eq!(summary.invocations, 6);
    assert!(!summary.used_default_rows);

    let mut rows: Vec<Value> = invocations(&first)
        .into_iter()
        .map(|(params, _)| params["query_results"].clone())
        .collect();
    rows.sort_by_key(Value::to_string);
    assert_eq!(
        rows,
        vec![json!(["/z/c", "a"]), json!(["/z/c", "b"]), json!(["/z/d", "c"])]
    );
    assert_eq!(invocations(&second).len(), 3);
}

#[tokio::test]
async fn chained_parameters_win_over_base_parameters() {
    let h = Harness::new();
    h.catalog.respond(QUERY, &[&["/z/c", "a"]]);
    let log = h.record("test_recorder");

    let mut base = Map::new();
    base.insert("user_name".to_owned(), json!("rods"));
    base.insert("source_resource".to_owned(), json!("ufs0"));
    let mut it = iteration(vec![ChainedPolicy {
        policy_to_invoke: "test_recorder".to_owned(),
        parameters: Some(json!({ "source_resource": "override" })),
        configuration: Some(json!({ "own": true })),
    }]);
    it.base_parameters = base;
    it.default_configuration = json!({ "shared": true });

    query::run(&h.invoker(), it).await.expect("run");

    let calls = invocations(&log);
    assert_eq!(calls[0].0["source_resource"], "override");
    assert_eq!(calls[0].0["user_name"], "rods");
    assert_eq!(calls[0].1, json!({ "own": true }));
}

#[tokio::test]
async fn default_configuration_applies_without_own() {
    let h = Harness::new();
    h.catalog.respond(QUERY, &[&["/z/c", "a"]]);
    let log = h.record("test_recorder");
    let mut it = iteration(vec![chained("test_recorder")]);
    it.default_configuration = json!({ "shared": true });

    query::run(&h.invoker(), it).await.expect("run");
    assert_eq!(invocations(&log)[0].1, json!({ "shared": true }));
}

#[tokio::test]
async fn empty_result_uses_default_rows() {
    let h = Harness::new();
    let log = h.record("test_recorder");
    let mut it = iteration(vec![chained("test_recorder")]);
    it.default_rows = vec![vec!["fallback".to_owned()]];

    let summary = query::run(&h.invoker(), it).await.expect("run");

    assert!(summary.used_default_rows);
    assert_eq!(summary.rows, 1);
    assert_eq!(summary.invocations, 1);
    assert_eq!(invocations(&log)[0].0["query_results"], json!(["fallback"]));
}

#[tokio::test]
async fn empty_result_without_defaults_is_success() {
    let h = Harness::new();
    let log = h.record("test_recorder");
    let summary = query::run(&h.invoker(), iteration(vec![chained("test_recorder")]))
        .await
        .expect("no rows is success");
    assert_eq!(summary.rows, 0);
    assert!(invocations(&log).is_empty());
}

#[tokio::test]
async fn row_failures_are_collected_after_all_rows() {
    let h = Harness::new();
    h.catalog.respond(QUERY, &[&["a"], &["b"], &["c"], &["d"]]);
    h.fail("test_failing");
    let log = h.record("test_recorder");

    let err = query::run(
        &h.invoker(),
        iteration(vec![chained("test_failing"), chained("test_recorder")]),
    )
    .await
    .expect_err("failures");

    match err {
        QueryError::RowFailures { failed, errors, .. } => {
            assert_eq!(failed, 4);
            let indices: Vec<usize> = errors.iter().map(|e| e.row_index).collect();
            assert_eq!(indices, vec![0, 1, 2, 3]);
            assert!(errors.iter().all(|e| e.policy == "test_failing"));
        }
        other => panic!("expected row failures, got {other:?}"),
    }
    assert_eq!(invocations(&log).len(), 4);
}

#[tokio::test]
async fn stop_on_error_ends_the_row_chain() {
    let h = Harness::new();
    h.catalog.respond(QUERY, &[&["a"], &["b"]]);
    h.fail("test_failing");
    let log = h.record("test_recorder");
    let mut it = iteration(vec![chained("test_failing"), chained("test_recorder")]);
    it.stop_on_error = true;

    let err = query::run(&h.invoker(), it).await.expect_err("failures");
    assert!(matches!(err, QueryError::RowFailures { failed: 2, .. }));
    assert!(invocations(&log).is_empty());
}

#[tokio::test]
async fn query_failure_is_reported() {
    let h = Harness::new();
    h.catalog.fail("RESC_NAME = 'ufs0'");
    h.record("test_recorder");
    let err = query::run(&h.invoker(), iteration(vec![chained("test_recorder")]))
        .await
        .expect_err("query fails");
    assert!(matches!(err, QueryError::Service(_)));
}

#[tokio::test]
async fn more_threads_than_rows_still_processes_each_row_once() {
    let h = Harness::new();
    h.catalog.respond(QUERY, &[&["a"], &["b"]]);
    let log = h.record("test_recorder");
    let mut it = iteration(vec![chained("test_recorder")]);
    it.number_of_threads = 16;

    let summary = query::run(&h.invoker(), it).await.expect("run");
    assert_eq!(summary.invocations, 2);
    assert_eq!(invocations(&log).len(), 2);
}

#[test]
fn chained_policy_accepts_policy_alias() {
    let c: ChainedPolicy =
        serde_json::from_value(json!({ "policy": "irods_policy_data_retention" })).expect("decode");
    assert_eq!(c.policy_to_invoke, "irods_policy_data_retention");
}
