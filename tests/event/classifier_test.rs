//! Tests for `src/event/classifier.rs`: interception-point classification.

use policy_composition::event::arguments::{
    CallArguments, CollectionInput, CondInput, DataObjInput, GeneralAdminInput, ModAvuInput,
    OpenedDataObjInput, O_CREAT, O_TRUNC, O_WRONLY, UNREG_OPR,
};
use policy_composition::event::classifier::{
    bulk_put_sizes, classify, resolve_close_event, ClassifierError,
};
use policy_composition::event::session::{ClientInfo, SessionContext};
use policy_composition::event::Event;

fn session() -> SessionContext {
    SessionContext::new(ClientInfo::for_user("alice", "tempZone"))
}

fn data_obj(path: &str) -> CallArguments {
    CallArguments::DataObj {
        input: DataObjInput::for_path(path),
    }
}

fn open_with(path: &str, open_flags: i32, handle: u32) -> CallArguments {
    CallArguments::Open {
        input: DataObjInput {
            obj_path: path.to_owned(),
            open_flags,
            ..DataObjInput::default()
        },
        handle: Some(handle),
    }
}

fn descriptor(handle: u32) -> CallArguments {
    CallArguments::Descriptor {
        input: OpenedDataObjInput {
            l1_desc_inx: handle,
            ..OpenedDataObjInput::default()
        },
    }
}

fn hierarchy(operation: &str) -> CallArguments {
    CallArguments::HierarchyResolution {
        operation: operation.to_owned(),
    }
}

fn events_of(classified: &[policy_composition::event::classifier::ClassifiedEvent]) -> Vec<Event> {
    classified.iter().map(|c| c.event).collect()
}

// ── Table-driven operations ─────────────────────────────────────

#[test]
fn put_post_yields_stamped_put_record() {
    let mut s = session();
    let classified = classify(
        &mut s,
        "pep_api_data_obj_put_post",
        &data_obj("/tempZone/home/alice/a.txt"),
    )
    .expect("classify");

    assert_eq!(events_of(&classified), vec![Event::Put]);
    let record = &classified[0].record;
    assert_eq!(record.field("event"), "PUT");
    assert_eq!(record.field("policy_enforcement_point"), "pep_api_data_obj_put_post");
    assert_eq!(record.field("logical_path"), "/tempZone/home/alice/a.txt");
    assert_eq!(record.field("user_name"), "alice");
    assert_eq!(
        record.get("comm").and_then(|c| c.get("zone")),
        Some(&serde_json::json!("tempZone"))
    );
}

#[test]
fn source_resource_comes_from_hierarchy_root() {
    let mut s = session();
    let mut cond_input = CondInput::new();
    cond_input.insert("resc_hier".to_owned(), "ufs_root;ufs0".to_owned());
    let arguments = CallArguments::DataObj {
        input: DataObjInput {
            obj_path: "/z/f".to_owned(),
            cond_input,
            ..DataObjInput::default()
        },
    };
    let classified = classify(&mut s, "data_obj_get_post", &arguments).expect("classify");
    assert_eq!(events_of(&classified), vec![Event::Get]);
    assert_eq!(classified[0].record.field("source_resource"), "ufs_root");
}

#[test]
fn unregister_operation_overrides_unlink() {
    let mut s = session();
    let arguments = CallArguments::DataObj {
        input: DataObjInput {
            obj_path: "/z/f".to_owned(),
            opr_type: UNREG_OPR,
            ..DataObjInput::default()
        },
    };
    let classified = classify(&mut s, "data_obj_unlink_post", &arguments).expect("classify");
    assert_eq!(events_of(&classified), vec![Event::Unregister]);

    let classified = classify(&mut s, "data_obj_unlink_post", &data_obj("/z/f")).expect("classify");
    assert_eq!(events_of(&classified), vec![Event::Unlink]);
}

#[test]
fn every_phase_is_classified() {
    for phase in ["pre", "post", "except", "finally"] {
        let mut s = session();
        let pep = format!("data_obj_repl_{phase}");
        let classified = classify(&mut s, &pep, &data_obj("/z/f")).expect("classify");
        assert_eq!(events_of(&classified), vec![Event::Replication], "phase {phase}");
    }
}

// ── Open / close correlation ────────────────────────────────────

#[test]
fn create_then_close_reports_put() {
    let mut s = session();
    assert!(classify(&mut s, "resolve_hierarchy_pre", &hierarchy("CREATE"))
        .expect("resolve")
        .is_empty());
    assert!(classify(
        &mut s,
        "data_obj_create_post",
        &open_with("/z/new.txt", O_CREAT | O_WRONLY, 3)
    )
    .expect("open")
    .is_empty());

    let classified = classify(&mut s, "data_obj_close_post", &descriptor(3)).expect("close");
    assert_eq!(events_of(&classified), vec![Event::Put]);
    assert_eq!(classified[0].record.field("logical_path"), "/z/new.txt");
    assert_eq!(s.in_flight_count(), 0);
}

#[test]
fn open_for_read_or_write_resolves_at_close() {
    let mut s = session();
    classify(&mut s, "resolve_hierarchy_pre", &hierarchy("OPEN")).expect("resolve");

    classify(&mut s, "data_obj_open_post", &open_with("/z/read", 0, 4)).expect("open");
    let classified = classify(&mut s, "data_obj_close_post", &descriptor(4)).expect("close");
    assert_eq!(events_of(&classified), vec![Event::Get]);

    classify(&mut s, "data_obj_open_post", &open_with("/z/write", O_WRONLY, 5)).expect("open");
    let classified = classify(&mut s, "data_obj_close_post", &descriptor(5)).expect("close");
    assert_eq!(events_of(&classified), vec![Event::Write]);
}

#[test]
fn truncating_open_reports_truncate_at_open_and_close() {
    let mut s = session();
    classify(&mut s, "resolve_hierarchy_pre", &hierarchy("OPEN")).expect("resolve");

    let opened = classify(
        &mut s,
        "data_obj_open_post",
        &open_with("/z/f", O_WRONLY | O_TRUNC, 6),
    )
    .expect("open");
    assert_eq!(events_of(&opened), vec![Event::Truncate]);

    let closed = classify(&mut s, "data_obj_close_post", &descriptor(6)).expect("close");
    assert_eq!(events_of(&closed), vec![Event::Write, Event::Truncate]);
}

#[test]
fn pre_close_peeks_and_post_close_releases() {
    let mut s = session();
    classify(&mut s, "resolve_hierarchy_pre", &hierarchy("OPEN")).expect("resolve");
    classify(&mut s, "data_obj_open_post", &open_with("/z/f", 0, 7)).expect("open");

    classify(&mut s, "data_obj_close_pre", &descriptor(7)).expect("pre close");
    assert_eq!(s.in_flight_count(), 1);
    classify(&mut s, "data_obj_close_post", &descriptor(7)).expect("post close");
    assert_eq!(s.in_flight_count(), 0);
}

#[test]
fn replica_close_reads_handle_from_payload() {
    let mut s = session();
    classify(&mut s, "resolve_hierarchy_pre", &hierarchy("CREATE")).expect("resolve");
    classify(&mut s, "replica_open_post", &open_with("/z/f", O_CREAT, 9)).expect("open");

    let arguments = CallArguments::ReplicaClose {
        payload: r#"{"fd": 9}"#.to_owned(),
    };
    let classified = classify(&mut s, "replica_close_post", &arguments).expect("close");
    assert_eq!(events_of(&classified), vec![Event::Put]);
}

#[test]
fn replica_close_with_bad_payload_is_invalid() {
    let mut s = session();
    let arguments = CallArguments::ReplicaClose {
        payload: "not json".to_owned(),
    };
    let err = classify(&mut s, "replica_close_post", &arguments).expect_err("bad payload");
    assert!(matches!(err, ClassifierError::InvalidArgument { .. }));
}

#[test]
fn close_without_hierarchy_resolution_is_an_error() {
    let mut s = session();
    classify(&mut s, "data_obj_open_post", &open_with("/z/f", 0, 2)).expect("open");
    let err = classify(&mut s, "data_obj_close_post", &descriptor(2)).expect_err("no hierarchy");
    assert!(matches!(err, ClassifierError::MissingHierarchyOperation { .. }));
}

#[test]
fn close_of_unknown_handle_fails_except_in_finally() {
    let mut s = session();
    classify(&mut s, "resolve_hierarchy_pre", &hierarchy("OPEN")).expect("resolve");

    let err = classify(&mut s, "data_obj_close_post", &descriptor(42)).expect_err("unknown");
    assert!(matches!(err, ClassifierError::UnknownHandle { handle: 42, .. }));

    let classified = classify(&mut s, "data_obj_close_finally", &descriptor(42)).expect("finally");
    assert!(classified.is_empty());
}

#[test]
fn seek_uses_open_record() {
    let mut s = session();
    classify(&mut s, "data_obj_open_post", &open_with("/z/f", 0, 8)).expect("open");
    let classified = classify(&mut s, "data_obj_lseek_post", &descriptor(8)).expect("seek");
    assert_eq!(events_of(&classified), vec![Event::Seek]);
    assert_eq!(classified[0].record.field("logical_path"), "/z/f");
    assert_eq!(s.in_flight_count(), 1);
}

#[test]
fn close_event_resolution_table() {
    assert_eq!(resolve_close_event("CREATE", 0), Some(Event::Put));
    assert_eq!(resolve_close_event("OPEN", 0), Some(Event::Get));
    assert_eq!(resolve_close_event("OPEN", O_WRONLY), Some(Event::Write));
    assert_eq!(resolve_close_event("unlink", 0), Some(Event::Unlink));
    assert_eq!(resolve_close_event("bogus", 0), None);
}

// ── Bulk upload ─────────────────────────────────────────────────

#[test]
fn bulk_put_emits_create_per_object_with_sizes() {
    let mut s = session();
    let arguments = CallArguments::BulkPut {
        logical_paths: vec!["/z/a".to_owned(), "/z/b".to_owned(), "/z/c".to_owned()],
        offsets: vec![100, 250, 400],
        cond_input: CondInput::new(),
    };
    let classified = classify(&mut s, "bulk_data_obj_put_post", &arguments).expect("bulk");

    assert_eq!(
        events_of(&classified),
        vec![Event::Create, Event::Create, Event::Create]
    );
    let sizes: Vec<&str> = classified
        .iter()
        .map(|c| c.record.field("data_size"))
        .collect();
    assert_eq!(sizes, vec!["100", "150", "150"]);
    assert_eq!(classified[2].record.field("logical_path"), "/z/c");
}

#[test]
fn bulk_put_rejects_mismatched_and_decreasing_offsets() {
    let mut s = session();
    let mismatched = CallArguments::BulkPut {
        logical_paths: vec!["/z/a".to_owned()],
        offsets: vec![10, 20],
        cond_input: CondInput::new(),
    };
    assert!(matches!(
        classify(&mut s, "bulk_data_obj_put_post", &mismatched),
        Err(ClassifierError::InvalidArgument { .. })
    ));

    assert_eq!(bulk_put_sizes(&[10, 5]), None);
    assert_eq!(bulk_put_sizes(&[]), Some(vec![]));
}

// ── Copy / rename ───────────────────────────────────────────────

#[test]
fn copy_reports_source_then_destination() {
    let mut s = session();
    let arguments = CallArguments::Copy {
        source: DataObjInput::for_path("/z/src"),
        destination: DataObjInput::for_path("/z/dst"),
    };
    let classified = classify(&mut s, "data_obj_copy_post", &arguments).expect("copy");
    assert_eq!(events_of(&classified), vec![Event::Copy, Event::Copy]);
    assert_eq!(classified[0].record.field("logical_path"), "/z/src");
    assert_eq!(classified[1].record.field("logical_path"), "/z/dst");
}

#[test]
fn rename_reports_source_before_and_destination_after() {
    let mut s = session();
    let arguments = CallArguments::Copy {
        source: DataObjInput::for_path("/z/old"),
        destination: DataObjInput::for_path("/z/new"),
    };
    let pre = classify(&mut s, "data_obj_rename_pre", &arguments).expect("pre");
    assert_eq!(pre[0].record.field("logical_path"), "/z/old");
    let post = classify(&mut s, "data_obj_rename_post", &arguments).expect("post");
    assert_eq!(events_of(&post), vec![Event::Rename]);
    assert_eq!(post[0].record.field("logical_path"), "/z/new");
}

// ── Collections, metadata, administration ───────────────────────

#[test]
fn collection_create_and_remove() {
    let mut s = session();
    let arguments = CallArguments::Collection {
        input: CollectionInput {
            coll_name: "/z/home/alice/c".to_owned(),
            ..CollectionInput::default()
        },
    };
    let created = classify(&mut s, "coll_create_post", &arguments).expect("create");
    assert_eq!(events_of(&created), vec![Event::Create]);
    assert_eq!(created[0].record.field("logical_path"), "/z/home/alice/c");

    let removed = classify(&mut s, "rm_coll_post", &arguments).expect("remove");
    assert_eq!(events_of(&removed), vec![Event::Remove]);
}

#[test]
fn metadata_records_entity_and_triple() {
    let mut s = session();
    let arguments = CallArguments::ModAvu {
        input: ModAvuInput {
            operation: "add".to_owned(),
            entity_option: "-C".to_owned(),
            entity: "/z/home/alice".to_owned(),
            attribute: "archive".to_owned(),
            value: "true".to_owned(),
            units: String::new(),
        },
    };
    let classified = classify(&mut s, "mod_avu_metadata_post", &arguments).expect("metadata");
    assert_eq!(events_of(&classified), vec![Event::Metadata]);
    let record = &classified[0].record;
    assert_eq!(record.field("logical_path"), "/z/home/alice");
    assert_eq!(record.metadata_field("entity_type"), "collection");
    assert_eq!(record.metadata_field("attribute"), "archive");

    let resource = CallArguments::ModAvu {
        input: ModAvuInput {
            entity_option: "-R".to_owned(),
            entity: "ufs0".to_owned(),
            ..ModAvuInput::default()
        },
    };
    let classified = classify(&mut s, "mod_avu_metadata_pre", &resource).expect("metadata");
    assert_eq!(classified[0].record.field("source_resource"), "ufs0");
}

#[test]
fn metadata_with_unknown_entity_option_is_invalid() {
    let mut s = session();
    let arguments = CallArguments::ModAvu {
        input: ModAvuInput {
            entity_option: "-x".to_owned(),
            ..ModAvuInput::default()
        },
    };
    let err = classify(&mut s, "mod_avu_metadata_post", &arguments).expect_err("bad option");
    assert!(matches!(err, ClassifierError::InvalidArgument { .. }));
}

#[test]
fn general_admin_maps_operation_and_target() {
    let mut s = session();
    let add_user = CallArguments::GeneralAdmin {
        input: GeneralAdminInput {
            operation: "add".to_owned(),
            target: "user".to_owned(),
            name: "bob".to_owned(),
            arguments: vec!["rodsuser".to_owned()],
        },
    };
    let classified = classify(&mut s, "general_admin_post", &add_user).expect("admin");
    assert_eq!(events_of(&classified), vec![Event::Create]);
    assert_eq!(classified[0].record.field("user_name"), "bob");

    let rm_resource = CallArguments::GeneralAdmin {
        input: GeneralAdminInput {
            operation: "rm".to_owned(),
            target: "resource".to_owned(),
            name: "ufs0".to_owned(),
            arguments: Vec::new(),
        },
    };
    let classified = classify(&mut s, "general_admin_post", &rm_resource).expect("admin");
    assert_eq!(events_of(&classified), vec![Event::Remove]);
    assert_eq!(classified[0].record.field("source_resource"), "ufs0");

    let ignored = CallArguments::GeneralAdmin {
        input: GeneralAdminInput {
            operation: "add".to_owned(),
            target: "group".to_owned(),
            ..GeneralAdminInput::default()
        },
    };
    assert!(classify(&mut s, "general_admin_post", &ignored)
        .expect("admin")
        .is_empty());
}

// ── Rejections ──────────────────────────────────────────────────

#[test]
fn unknown_and_malformed_names_are_rejected() {
    let mut s = session();
    let err = classify(&mut s, "frobnicate_post", &data_obj("/z/f")).expect_err("unknown");
    assert!(matches!(
        err,
        ClassifierError::UnsupportedInterceptionPoint { .. }
    ));

    let err = classify(&mut s, "data_obj_put", &data_obj("/z/f")).expect_err("no phase");
    assert!(matches!(err, ClassifierError::MalformedName(_)));
}

#[test]
fn wrong_argument_variant_is_rejected() {
    let mut s = session();
    let arguments = CallArguments::Collection {
        input: CollectionInput::default(),
    };
    let err = classify(&mut s, "data_obj_put_post", &arguments).expect_err("wrong variant");
    assert!(matches!(
        err,
        ClassifierError::UnexpectedArguments {
            expected: "data_obj",
            actual: "collection",
            ..
        }
    ));
}
