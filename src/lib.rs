//! SQLite-backed local mirror of a remote GraphQL-shaped object graph.
//! Run Criterion benchmarks with `cargo bench` to inspect reports under `target/criterion`.

pub mod bench_utils;
pub mod errors;
pub mod mirror;
pub mod query;
pub mod schema;
pub mod transaction;

pub use crate::errors::MirrorError;
pub use crate::mirror::{
    ConnectionResponse, EndCursor, Mirror, NodeRef, Outdated, OutdatedConnection, OwnDataRecord,
    PageInfo, UpdateId,
};
pub use crate::query::{Field, SelectionSet, Value, build_connection_query, build_own_data_query};
pub use crate::schema::{FieldSpec, NodeType, ObjectInfo, Schema, SchemaInfo, is_sql_safe};
pub use crate::transaction::run_in_transaction;
