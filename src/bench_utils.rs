use rand::{Rng, SeedableRng, rngs::StdRng};
use serde_json::json;
use std::collections::BTreeMap;

use crate::mirror::{ConnectionResponse, NodeRef, OwnDataRecord, PageInfo};
use crate::schema::{self, Schema};

/// Issue-tracker-shaped schema used by the benchmarks and the demo.
pub fn demo_schema() -> Schema {
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
        schema::object([
            ("id", schema::id()),
            ("title", schema::primitive()),
            ("number", schema::primitive()),
            ("author", schema::node("Actor")),
            ("comments", schema::connection("Comment")),
        ]),
    );
    types.insert(
        "Comment".into(),
        schema::object([
            ("id", schema::id()),
            ("body", schema::primitive()),
            ("author", schema::node("Actor")),
        ]),
    );
    types.insert(
        "User".into(),
        schema::object([("id", schema::id()), ("login", schema::primitive())]),
    );
    types.insert(
        "Bot".into(),
        schema::object([("id", schema::id()), ("login", schema::primitive())]),
    );
    types.insert("Actor".into(), schema::union_type(&["User", "Bot"]));
    types
}

/// Deterministic batch of issue records referencing a small author pool.
pub fn generate_issue_records(count: usize, seed: u64) -> Vec<OwnDataRecord> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|n| {
            let author_id = rng.gen_range(0..16);
            let author = if rng.gen_bool(0.9) {
                NodeRef {
                    typename: "User".into(),
                    id: format!("user:{author_id}"),
                }
            } else {
                NodeRef {
                    typename: "Bot".into(),
                    id: format!("bot:{author_id}"),
                }
            };
            let mut primitives = BTreeMap::new();
            primitives.insert("title".to_string(), json!(format!("issue {n}")));
            primitives.insert("number".to_string(), json!(n as i64));
            let mut links = BTreeMap::new();
            links.insert("author".to_string(), Some(author));
            OwnDataRecord {
                typename: "Issue".into(),
                id: format!("issue:{n}"),
                primitives,
                links,
            }
        })
        .collect()
}

/// Deterministic sequence of connection pages, occasionally with holes.
pub fn generate_issue_pages(pages: usize, page_size: usize, seed: u64) -> Vec<ConnectionResponse> {
    let mut rng = StdRng::seed_from_u64(seed);
    let total = (pages * page_size) as i64;
    let mut next_node = 0usize;
    (0..pages)
        .map(|page| {
            let nodes = (0..page_size)
                .map(|_| {
                    let node = if rng.gen_bool(0.02) {
                        None
                    } else {
                        Some(NodeRef {
                            typename: "Issue".into(),
                            id: format!("issue:{next_node}"),
                        })
                    };
                    next_node += 1;
                    node
                })
                .collect();
            ConnectionResponse {
                total_count: total,
                page_info: PageInfo {
                    end_cursor: Some(format!("cursor:{}", (page + 1) * page_size)),
                    has_next_page: page + 1 < pages,
                },
                nodes,
            }
        })
        .collect()
}
