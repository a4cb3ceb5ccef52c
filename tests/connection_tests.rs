use rusqlite::params;

use graphmirror::schema::{self, Schema};
use graphmirror::{ConnectionResponse, Mirror, MirrorError, NodeRef, PageInfo};

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
    types
}

fn issue(n: usize) -> Option<NodeRef> {
    Some(NodeRef {
        typename: "Issue".into(),
        id: format!("issue:{n}"),
    })
}

fn page(nodes: Vec<Option<NodeRef>>, end_cursor: &str, has_next_page: bool) -> ConnectionResponse {
    ConnectionResponse {
        total_count: 12,
        page_info: PageInfo {
            end_cursor: Some(end_cursor.to_string()),
            has_next_page,
        },
        nodes,
    }
}

fn prepared_mirror() -> Mirror {
    let mirror = Mirror::open_in_memory(tracker_schema()).expect("mirror");
    mirror
        .register_object("Repository", "repo:1")
        .expect("register repo");
    mirror
}

fn entries(mirror: &Mirror) -> Vec<(i64, Option<String>)> {
    let mut stmt = mirror
        .connection()
        .prepare(
            "SELECT e.idx, e.child_id FROM connection_entries e
             JOIN connections c ON c.rowid = e.connection_id
             WHERE c.object_id = ?1 AND c.fieldname = ?2
             ORDER BY e.idx",
        )
        .expect("prepare");
    stmt.query_map(params!["repo:1", "issues"], |row| {
        Ok((row.get(0)?, row.get(1)?))
    })
    .expect("rows")
    .map(|entry| entry.expect("entry"))
    .collect()
}

#[test]
fn test_merge_appends_entries_and_advances_bookkeeping() {
    let mirror = prepared_mirror();
    let update = mirror.create_update(1).expect("update");
    mirror
        .update_connection(update, "repo:1", "issues", &page(vec![issue(0), issue(1)], "c2", true))
        .expect("merge");

    assert_eq!(
        entries(&mirror),
        vec![
            (1, Some("issue:0".to_string())),
            (2, Some("issue:1".to_string())),
        ]
    );
    let (last_update, total_count, has_next_page, end_cursor): (i64, i64, bool, String) = mirror
        .connection()
        .query_row(
            "SELECT last_update, total_count, has_next_page, end_cursor
             FROM connections WHERE object_id = ?1 AND fieldname = ?2",
            params!["repo:1", "issues"],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .expect("connection row");
    assert_eq!(last_update, update.0);
    assert_eq!(total_count, 12);
    assert!(has_next_page);
    assert_eq!(end_cursor, "c2");
}

#[test]
fn test_merge_registers_nodes_on_sight() {
    let mirror = prepared_mirror();
    let update = mirror.create_update(1).expect("update");
    mirror
        .update_connection(update, "repo:1", "issues", &page(vec![issue(0)], "c1", false))
        .expect("merge");
    let typename: String = mirror
        .connection()
        .query_row(
            "SELECT typename FROM objects WHERE id = ?1",
            params!["issue:0"],
            |row| row.get(0),
        )
        .expect("registered node");
    assert_eq!(typename, "Issue");
    // The new object got its own skeleton and is reported as outdated.
    let cutoff = mirror.create_update(2).expect("cutoff");
    let outdated = mirror.find_outdated(cutoff).expect("outdated");
    assert!(outdated.objects.iter().any(|o| o.id == "issue:0"));
}

#[test]
fn test_null_nodes_consume_indices() {
    let mirror = prepared_mirror();
    let update = mirror.create_update(1).expect("update");
    mirror
        .update_connection(
            update,
            "repo:1",
            "issues",
            &page(vec![issue(0), None, issue(1)], "c3", false),
        )
        .expect("merge");
    assert_eq!(
        entries(&mirror),
        vec![
            (1, Some("issue:0".to_string())),
            (2, None),
            (3, Some("issue:1".to_string())),
        ]
    );
}

#[test]
fn test_indices_never_reused_after_external_delete() {
    let mirror = prepared_mirror();
    let update = mirror.create_update(1).expect("update");
    mirror
        .update_connection(update, "repo:1", "issues", &page(vec![issue(0), issue(1)], "c2", true))
        .expect("first merge");

    mirror
        .connection()
        .execute(
            "DELETE FROM connection_entries WHERE idx = 1",
            [],
        )
        .expect("external delete");

    mirror
        .update_connection(update, "repo:1", "issues", &page(vec![issue(2), issue(3)], "c4", false))
        .expect("second merge");
    assert_eq!(
        entries(&mirror),
        vec![
            (2, Some("issue:1".to_string())),
            (3, Some("issue:2".to_string())),
            (4, Some("issue:3".to_string())),
        ]
    );
}

#[test]
fn test_merge_unknown_connection_fails() {
    let mirror = prepared_mirror();
    let update = mirror.create_update(1).expect("update");
    let err = mirror
        .update_connection(update, "repo:1", "stars", &page(vec![], "c0", false))
        .expect_err("no such field");
    assert!(matches!(err, MirrorError::NoSuchConnection { .. }));
    let err = mirror
        .update_connection(update, "repo:2", "issues", &page(vec![], "c0", false))
        .expect_err("no such object");
    assert!(matches!(err, MirrorError::NoSuchConnection { .. }));
}

#[test]
fn test_merge_with_invalid_node_rolls_back() {
    let mirror = prepared_mirror();
    let update = mirror.create_update(1).expect("update");
    let response = page(
        vec![
            issue(0),
            Some(NodeRef {
                typename: "Ghost".into(),
                id: "ghost:1".into(),
            }),
        ],
        "c2",
        true,
    );
    let err = mirror
        .update_connection(update, "repo:1", "issues", &response)
        .expect_err("unknown node type");
    assert!(matches!(err, MirrorError::UnknownType(_)));

    // Nothing from the failed page is visible, including the valid node.
    assert!(entries(&mirror).is_empty());
    let registered: i64 = mirror
        .connection()
        .query_row(
            "SELECT COUNT(*) FROM objects WHERE id = ?1",
            params!["issue:0"],
            |row| row.get(0),
        )
        .expect("count");
    assert_eq!(registered, 0);
    let last_update: Option<i64> = mirror
        .connection()
        .query_row(
            "SELECT last_update FROM connections WHERE object_id = ?1 AND fieldname = ?2",
            params!["repo:1", "issues"],
            |row| row.get(0),
        )
        .expect("connection row");
    assert_eq!(last_update, None);
}

#[test]
fn test_merge_node_type_conflict_rolls_back() {
    let mirror = prepared_mirror();
    let update = mirror.create_update(1).expect("update");
    let response = page(
        vec![Some(NodeRef {
            typename: "Issue".into(),
            id: "repo:1".into(),
        })],
        "c1",
        false,
    );
    let err = mirror
        .update_connection(update, "repo:1", "issues", &response)
        .expect_err("retyped node");
    assert!(matches!(err, MirrorError::TypeConflict { .. }));
    assert!(entries(&mirror).is_empty());
}
