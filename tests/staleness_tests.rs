use std::collections::BTreeMap;

use serde_json::json;

use graphmirror::schema::{self, Schema};
use graphmirror::{
    ConnectionResponse, EndCursor, Mirror, NodeRef, OwnDataRecord, PageInfo,
};

fn tracker_schema() -> Schema {
    let mut types = Schema::new();
    types.insert(
        "Repository".into(),
        schema::object([
            ("id", schema::id()),
            ("url", schema::primitive()),
            ("issues", schema::connection("Issue")),
        ]),
    );
    types.insert(
        "Issue".into(),
        schema::object([("id", schema::id()), ("title", schema::primitive())]),
    );
    types.insert(
        "User".into(),
        schema::object([("id", schema::id()), ("login", schema::primitive())]),
    );
    types
}

fn user_record(id: &str, login: &str) -> OwnDataRecord {
    let mut primitives = BTreeMap::new();
    primitives.insert("login".to_string(), json!(login));
    OwnDataRecord {
        typename: "User".into(),
        id: id.into(),
        primitives,
        links: BTreeMap::new(),
    }
}

fn page(end_cursor: Option<&str>, has_next_page: bool) -> ConnectionResponse {
    ConnectionResponse {
        total_count: 0,
        page_info: PageInfo {
            end_cursor: end_cursor.map(|c| c.to_string()),
            has_next_page,
        },
        nodes: Vec::new(),
    }
}

#[test]
fn test_cutoff_selects_strictly_older_objects() {
    let mirror = Mirror::open_in_memory(tracker_schema()).expect("mirror");
    for id in ["user:a", "user:b", "user:c"] {
        mirror.register_object("User", id).expect("register");
    }
    let u1 = mirror.create_update(1).expect("u1");
    let u2 = mirror.create_update(2).expect("u2");
    mirror
        .update_own_data(u1, &[user_record("user:a", "alice")])
        .expect("touch a at u1");
    mirror
        .update_own_data(u2, &[user_record("user:b", "bob")])
        .expect("touch b at u2");

    // user:c never touched, user:a touched before the cutoff, user:b exactly
    // at the cutoff (not strictly older).
    let outdated = mirror.find_outdated(u2).expect("find outdated");
    let mut ids: Vec<&str> = outdated.objects.iter().map(|o| o.id.as_str()).collect();
    ids.sort();
    assert_eq!(ids, vec!["user:a", "user:c"]);

    let u3 = mirror.create_update(3).expect("u3");
    let outdated = mirror.find_outdated(u3).expect("find outdated");
    let mut ids: Vec<&str> = outdated.objects.iter().map(|o| o.id.as_str()).collect();
    ids.sort();
    assert_eq!(ids, vec!["user:a", "user:b", "user:c"]);
}

#[test]
fn test_outdated_objects_carry_typenames() {
    let mirror = Mirror::open_in_memory(tracker_schema()).expect("mirror");
    mirror.register_object("User", "user:a").expect("register");
    let cutoff = mirror.create_update(1).expect("cutoff");
    let outdated = mirror.find_outdated(cutoff).expect("find outdated");
    assert_eq!(
        outdated.objects,
        vec![NodeRef {
            typename: "User".into(),
            id: "user:a".into(),
        }]
    );
}

#[test]
fn test_unfetched_connection_reported_without_cursor() {
    let mirror = Mirror::open_in_memory(tracker_schema()).expect("mirror");
    mirror
        .register_object("Repository", "repo:1")
        .expect("register");
    let cutoff = mirror.create_update(1).expect("cutoff");
    let outdated = mirror.find_outdated(cutoff).expect("find outdated");
    assert_eq!(outdated.connections.len(), 1);
    let connection = &outdated.connections[0];
    assert_eq!(connection.object_id, "repo:1");
    assert_eq!(connection.fieldname, "issues");
    assert_eq!(connection.end_cursor, EndCursor::Unfetched);
}

#[test]
fn test_connection_cursor_states_after_fetches() {
    let mirror = Mirror::open_in_memory(tracker_schema()).expect("mirror");
    mirror
        .register_object("Repository", "repo:1")
        .expect("register");

    let u1 = mirror.create_update(1).expect("u1");
    mirror
        .update_connection(u1, "repo:1", "issues", &page(Some("cursor:10"), true))
        .expect("first page");
    let u2 = mirror.create_update(2).expect("u2");

    // Fetched at u1, so outdated at cutoff u2 with its stored cursor.
    let outdated = mirror.find_outdated(u2).expect("find outdated");
    assert_eq!(outdated.connections.len(), 1);
    assert_eq!(
        outdated.connections[0].end_cursor,
        EndCursor::Cursor("cursor:10".into())
    );

    // Not outdated at its own update id.
    let outdated = mirror.find_outdated(u1).expect("find outdated");
    assert!(outdated.connections.is_empty());

    // An explicit null cursor is distinct from "never fetched".
    mirror
        .update_connection(u2, "repo:1", "issues", &page(None, false))
        .expect("empty refetch");
    let u3 = mirror.create_update(3).expect("u3");
    let outdated = mirror.find_outdated(u3).expect("find outdated");
    assert_eq!(outdated.connections[0].end_cursor, EndCursor::Null);
}
