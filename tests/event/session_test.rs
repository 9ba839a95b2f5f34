//! Tests for `src/event/session.rs`: per-session correlation state.

use policy_composition::event::session::{ClientInfo, SessionContext};
use policy_composition::event::{Event, EventRecord};

fn record(path: &str) -> EventRecord {
    let mut record = EventRecord::default();
    record.insert("logical_path", path);
    record
}

#[test]
fn sessions_have_distinct_ids() {
    let a = SessionContext::new(ClientInfo::for_user("rods", "tempZone"));
    let b = SessionContext::new(ClientInfo::for_user("rods", "tempZone"));
    assert_ne!(a.id(), b.id());
}

#[test]
fn peek_keeps_record_and_release_removes_it() {
    let mut session = SessionContext::new(ClientInfo::for_user("alice", "tempZone"));
    session.track(3, record("/tempZone/home/alice/a.txt"));

    let peeked = session.peek(3).expect("tracked record");
    assert_eq!(peeked.field("logical_path"), "/tempZone/home/alice/a.txt");
    assert_eq!(session.in_flight_count(), 1);

    let released = session.release(3).expect("tracked record");
    assert_eq!(released.field("logical_path"), "/tempZone/home/alice/a.txt");
    assert_eq!(session.in_flight_count(), 0);
    assert!(session.release(3).is_none());
}

#[test]
fn tracking_same_handle_replaces_record() {
    let mut session = SessionContext::new(ClientInfo::for_user("alice", "tempZone"));
    session.track(5, record("/z/old"));
    session.track(5, record("/z/new"));
    assert_eq!(session.in_flight_count(), 1);
    assert_eq!(session.peek(5).expect("tracked").field("logical_path"), "/z/new");
}

#[test]
fn hierarchy_operation_is_last_one_set() {
    let mut session = SessionContext::new(ClientInfo::for_user("alice", "tempZone"));
    assert!(session.hierarchy_operation().is_none());
    session.set_hierarchy_operation("OPEN");
    session.set_hierarchy_operation("CREATE");
    assert_eq!(session.hierarchy_operation(), Some("CREATE"));
}

#[test]
fn client_comm_carries_user_and_proxy() {
    let client = ClientInfo::for_user("alice", "tempZone");
    let comm = client.to_comm();
    assert_eq!(comm["user_name"], "alice");
    assert_eq!(comm["proxy_user_name"], "alice");
    assert_eq!(comm["zone"], "tempZone");
}

#[test]
fn stamped_record_reports_its_event() {
    let mut r = record("/z/f");
    r.stamp(Event::Put, "pep_api_data_obj_put_post");
    assert_eq!(r.event(), Some(Event::Put));
    assert_eq!(r.field("policy_enforcement_point"), "pep_api_data_obj_put_post");
}
