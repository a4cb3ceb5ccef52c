use std::collections::BTreeMap;

use serde_json::json;

use graphmirror::bench_utils::demo_schema;
use graphmirror::{
    ConnectionResponse, EndCursor, Mirror, NodeRef, OwnDataRecord, PageInfo,
};

fn main() {
    if let Err(err) = run() {
        eprintln!("basic_usage error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mirror = Mirror::open_in_memory(demo_schema())?;
    mirror.register_object("Repository", "repo:demo")?;

    // Ask what needs fetching; everything is stale on a fresh mirror.
    let cutoff = mirror.create_update(now_millis())?;
    let outdated = mirror.find_outdated(cutoff)?;
    println!(
        "stale objects: {:?}",
        outdated.objects.iter().map(|o| &o.id).collect::<Vec<_>>()
    );
    for connection in &outdated.connections {
        let selection =
            mirror.query_connection(&connection.fieldname, &connection.end_cursor, 50);
        println!(
            "would fetch {}.{} with {:?}",
            connection.object_id, connection.fieldname, selection
        );
    }

    // Merge a page as if the remote had answered.
    let update = mirror.create_update(now_millis())?;
    let page = ConnectionResponse {
        total_count: 2,
        page_info: PageInfo {
            end_cursor: Some("cursor:2".into()),
            has_next_page: false,
        },
        nodes: vec![issue_ref(1), issue_ref(2)],
    };
    mirror.update_connection(update, "repo:demo", "issues", &page)?;

    // Fill in one issue's own data.
    let update = mirror.create_update(now_millis())?;
    mirror.update_own_data(update, &[issue_record(1, "mirror the remote graph")])?;
    println!("issue:1 data: {:?}", mirror.own_data("Issue", "issue:1")?);

    let remaining = mirror.find_outdated(update)?;
    println!(
        "still stale: {} objects, {} connections",
        remaining.objects.len(),
        remaining.connections.len()
    );
    let selection = mirror.query_connection("issues", &EndCursor::Cursor("cursor:2".into()), 50);
    println!("next page query: {selection:?}");
    Ok(())
}

fn issue_ref(n: usize) -> Option<NodeRef> {
    Some(NodeRef {
        typename: "Issue".into(),
        id: format!("issue:{n}"),
    })
}

fn issue_record(n: usize, title: &str) -> OwnDataRecord {
    let mut primitives = BTreeMap::new();
    primitives.insert("title".to_string(), json!(title));
    primitives.insert("number".to_string(), json!(n));
    let mut links = BTreeMap::new();
    links.insert(
        "author".to_string(),
        Some(NodeRef {
            typename: "User".into(),
            id: "user:demo".into(),
        }),
    );
    OwnDataRecord {
        typename: "Issue".into(),
        id: format!("issue:{n}"),
        primitives,
        links,
    }
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
