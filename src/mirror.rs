//! Local relational mirror of a remote GraphQL-shaped object graph.
//!
//! The mirror owns one SQLite connection exclusively. Callers drive the sync
//! loop from outside: ask [`Mirror::find_outdated`] what is stale, build the
//! matching query, execute it remotely, and feed the response back through
//! [`Mirror::update_own_data`] or [`Mirror::update_connection`]. Only the
//! merge step is transactional; network fetches happen outside any open
//! transaction.

use std::collections::BTreeMap;
use std::path::Path;

use rusqlite::{Connection, OptionalExtension, ToSql, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::errors::{self, MirrorError};
use crate::query::{SelectionSet, build_connection_query, build_own_data_query};
use crate::schema::{NodeType, ObjectInfo, Schema, SchemaInfo};
use crate::transaction::run_in_transaction;

/// Bump when the persisted layout changes; part of the `meta` descriptor, so
/// stores written by one layout refuse to open under another.
const FORMAT_VERSION: &str = "0.1.0";

/// Logical-clock id of one row in the append-only update log. Ordering is
/// log ordering, not wall-clock ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UpdateId(pub i64);

/// Typed reference to one object in the remote graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRef {
    #[serde(rename = "__typename")]
    pub typename: String,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub end_cursor: Option<String>,
    pub has_next_page: bool,
}

/// One page of a paginated connection, as returned by the remote fetcher.
/// `nodes` may contain holes; a hole still occupies an entry index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionResponse {
    pub total_count: i64,
    pub page_info: PageInfo,
    pub nodes: Vec<Option<NodeRef>>,
}

/// One object's scalar and link fields, as returned by the remote fetcher.
/// Every primitive and link field declared for the record's type must be
/// present; absence is an error, not an implicit null.
#[derive(Debug, Clone, PartialEq)]
pub struct OwnDataRecord {
    pub typename: String,
    pub id: String,
    pub primitives: BTreeMap<String, serde_json::Value>,
    pub links: BTreeMap<String, Option<NodeRef>>,
}

/// Pagination state of a mirrored connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndCursor {
    /// Never fetched; the page request must omit the `after` argument.
    Unfetched,
    /// Last fetch returned an explicit null cursor (empty connection);
    /// passing `after: null` restarts from the beginning.
    Null,
    Cursor(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutdatedConnection {
    pub object_id: String,
    pub fieldname: String,
    pub end_cursor: EndCursor,
}

/// Everything last refreshed strictly before some cutoff, or never.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outdated {
    pub objects: Vec<NodeRef>,
    pub connections: Vec<OutdatedConnection>,
}

#[derive(Serialize)]
struct Descriptor<'a> {
    version: &'static str,
    schema: &'a Schema,
}

const STRUCTURAL_DDL: &str = r#"
CREATE TABLE updates (
    rowid INTEGER PRIMARY KEY,
    time_epoch_millis INTEGER NOT NULL
);
CREATE TABLE objects (
    id TEXT NOT NULL PRIMARY KEY,
    typename TEXT NOT NULL,
    last_update INTEGER,
    FOREIGN KEY (last_update) REFERENCES updates (rowid)
);
CREATE TABLE links (
    rowid INTEGER PRIMARY KEY,
    parent_id TEXT NOT NULL,
    fieldname TEXT NOT NULL,
    child_id TEXT,
    UNIQUE (parent_id, fieldname),
    FOREIGN KEY (parent_id) REFERENCES objects (id),
    FOREIGN KEY (child_id) REFERENCES objects (id)
);
CREATE TABLE connections (
    rowid INTEGER PRIMARY KEY,
    object_id TEXT NOT NULL,
    fieldname TEXT NOT NULL,
    last_update INTEGER,
    total_count INTEGER,
    has_next_page BOOLEAN,
    end_cursor TEXT,
    UNIQUE (object_id, fieldname),
    FOREIGN KEY (object_id) REFERENCES objects (id),
    FOREIGN KEY (last_update) REFERENCES updates (rowid)
);
CREATE TABLE connection_entries (
    rowid INTEGER PRIMARY KEY,
    connection_id INTEGER NOT NULL,
    idx INTEGER NOT NULL,
    child_id TEXT,
    UNIQUE (connection_id, idx),
    FOREIGN KEY (connection_id) REFERENCES connections (rowid),
    FOREIGN KEY (child_id) REFERENCES objects (id)
);
CREATE INDEX idx_connection_entries__connection_id
    ON connection_entries (connection_id);
"#;

#[derive(Debug)]
pub struct Mirror {
    conn: Connection,
    schema: Schema,
    info: SchemaInfo,
}

impl Mirror {
    /// Take exclusive ownership of `conn` and initialize (or re-open) the
    /// mirror inside it. A fresh store gets the structural tables plus one
    /// data table per object type; a previously initialized store must have
    /// been created with a byte-identical canonical schema descriptor, or
    /// this fails with [`MirrorError::SchemaMismatch`] and leaves the store
    /// untouched.
    pub fn new(conn: Connection, schema: Schema) -> Result<Self, MirrorError> {
        let info = SchemaInfo::compile(&schema)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(errors::from_sqlite)?;
        let mirror = Mirror { conn, schema, info };
        mirror.initialize()?;
        Ok(mirror)
    }

    pub fn open<P: AsRef<Path>>(path: P, schema: Schema) -> Result<Self, MirrorError> {
        let conn = Connection::open(path).map_err(errors::from_sqlite)?;
        Mirror::new(conn, schema)
    }

    pub fn open_in_memory(schema: Schema) -> Result<Self, MirrorError> {
        let conn = Connection::open_in_memory().map_err(errors::from_sqlite)?;
        Mirror::new(conn, schema)
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Raw handle for read-only inspection. All writes must go through the
    /// mirror's own methods; the store is single-writer-owned.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn initialize(&self) -> Result<(), MirrorError> {
        let descriptor = serde_json::to_string(&Descriptor {
            version: FORMAT_VERSION,
            schema: &self.schema,
        })
        .map_err(|e| MirrorError::store(e.to_string()))?;
        run_in_transaction(&self.conn, || {
            // Singleton metadata row, primary key pinned to zero. Only the
            // first ever insert succeeds; the store is locked to its first
            // schema from then on.
            self.conn
                .execute_batch(
                    "CREATE TABLE IF NOT EXISTS meta (
                        zero INTEGER PRIMARY KEY CHECK (zero = 0),
                        schema TEXT NOT NULL
                    )",
                )
                .map_err(errors::from_sqlite)?;
            let existing: Option<String> = self
                .conn
                .query_row("SELECT schema FROM meta", [], |row| row.get(0))
                .optional()
                .map_err(errors::from_sqlite)?;
            match existing {
                Some(blob) if blob == descriptor => {
                    trace!("mirror store already initialized");
                    return Ok(());
                }
                Some(_) => return Err(MirrorError::SchemaMismatch),
                None => {}
            }
            self.conn
                .execute_batch(STRUCTURAL_DDL)
                .map_err(errors::from_sqlite)?;
            let mut data_tables = 0usize;
            for (typename, node_type) in &self.schema {
                if let NodeType::Object { .. } = node_type {
                    let object = self.info.object(typename)?;
                    self.conn
                        .execute_batch(&own_data_table_ddl(typename, &object.primitives))
                        .map_err(errors::from_sqlite)?;
                    data_tables += 1;
                }
            }
            self.conn
                .execute(
                    "INSERT INTO meta (zero, schema) VALUES (0, ?1)",
                    params![descriptor],
                )
                .map_err(errors::from_sqlite)?;
            debug!(data_tables, "initialized mirror store");
            Ok(())
        })
    }

    /// Append one row to the update log and return its id. Distinct calls
    /// return distinct ids even for identical timestamps; the id comes from
    /// the log's own sequence, not from the wall clock.
    pub fn create_update(&self, time_epoch_millis: i64) -> Result<UpdateId, MirrorError> {
        self.conn
            .execute(
                "INSERT INTO updates (time_epoch_millis) VALUES (?1)",
                params![time_epoch_millis],
            )
            .map_err(errors::from_sqlite)?;
        Ok(UpdateId(self.conn.last_insert_rowid()))
    }

    /// Register an object id under a typename, creating its skeleton rows:
    /// the object row, an all-null own-data row, and one blank connection
    /// row per connection field. Idempotent for an already-registered id of
    /// the same type; registering it under another type fails without
    /// changing anything. Link rows are not created here; their values are
    /// unknown until the own-data updater sees them.
    pub fn register_object(&self, typename: &str, id: &str) -> Result<(), MirrorError> {
        run_in_transaction(&self.conn, || self.register_object_inner(typename, id))
    }

    fn register_object_inner(&self, typename: &str, id: &str) -> Result<(), MirrorError> {
        let object = self.info.object(typename)?;
        if let Some(stored) = self.object_typename(id)? {
            if stored != typename {
                return Err(MirrorError::TypeConflict {
                    id: id.to_string(),
                    stored,
                    requested: typename.to_string(),
                });
            }
            return Ok(());
        }
        self.conn
            .execute(
                "INSERT INTO objects (id, typename) VALUES (?1, ?2)",
                params![id, typename],
            )
            .map_err(errors::from_sqlite)?;
        self.conn
            .execute(
                &format!(
                    "INSERT INTO \"{}\" (id) VALUES (?1)",
                    own_data_table(typename)
                ),
                params![id],
            )
            .map_err(errors::from_sqlite)?;
        for fieldname in &object.connections {
            self.conn
                .execute(
                    "INSERT INTO connections (object_id, fieldname) VALUES (?1, ?2)",
                    params![id, fieldname],
                )
                .map_err(errors::from_sqlite)?;
        }
        trace!(typename, id, "registered object");
        Ok(())
    }

    fn object_typename(&self, id: &str) -> Result<Option<String>, MirrorError> {
        self.conn
            .query_row(
                "SELECT typename FROM objects WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(errors::from_sqlite)
    }

    /// Every object and connection whose `last_update` is null or strictly
    /// less than `cutoff` on the logical clock. Result ordering is
    /// deterministic for identical store state but otherwise unspecified.
    pub fn find_outdated(&self, cutoff: UpdateId) -> Result<Outdated, MirrorError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT typename, id FROM objects
                 WHERE last_update IS NULL OR last_update < ?1
                 ORDER BY id",
            )
            .map_err(errors::from_sqlite)?;
        let rows = stmt
            .query_map(params![cutoff.0], |row| {
                Ok(NodeRef {
                    typename: row.get(0)?,
                    id: row.get(1)?,
                })
            })
            .map_err(errors::from_sqlite)?;
        let mut objects = Vec::new();
        for object in rows {
            objects.push(object.map_err(errors::from_sqlite)?);
        }

        let mut stmt = self
            .conn
            .prepare(
                "SELECT object_id, fieldname, last_update IS NULL, end_cursor
                 FROM connections
                 WHERE last_update IS NULL OR last_update < ?1
                 ORDER BY object_id, fieldname",
            )
            .map_err(errors::from_sqlite)?;
        let rows = stmt
            .query_map(params![cutoff.0], |row| {
                let never_fetched: bool = row.get(2)?;
                let end_cursor: Option<String> = row.get(3)?;
                Ok(OutdatedConnection {
                    object_id: row.get(0)?,
                    fieldname: row.get(1)?,
                    end_cursor: if never_fetched {
                        EndCursor::Unfetched
                    } else {
                        match end_cursor {
                            None => EndCursor::Null,
                            Some(cursor) => EndCursor::Cursor(cursor),
                        }
                    },
                })
            })
            .map_err(errors::from_sqlite)?;
        let mut connections = Vec::new();
        for connection in rows {
            connections.push(connection.map_err(errors::from_sqlite)?);
        }
        Ok(Outdated {
            objects,
            connections,
        })
    }

    /// Selection requesting one page of a connection; see
    /// [`build_connection_query`].
    pub fn query_connection(
        &self,
        fieldname: &str,
        cursor: &EndCursor,
        page_size: u32,
    ) -> SelectionSet {
        build_connection_query(fieldname, cursor, page_size)
    }

    /// Selection requesting an object's scalar and link fields; see
    /// [`build_own_data_query`].
    pub fn query_own_data(&self, typename: &str) -> Result<SelectionSet, MirrorError> {
        build_own_data_query(&self.info, typename)
    }

    /// Merge one fetched page into a connection. Referenced objects are
    /// registered on sight; every node (including holes) is appended past
    /// the connection's current maximum entry index, so indices are never
    /// reused or reordered. Finally the connection's pagination bookkeeping
    /// advances to `update`.
    pub fn update_connection(
        &self,
        update: UpdateId,
        object_id: &str,
        fieldname: &str,
        response: &ConnectionResponse,
    ) -> Result<(), MirrorError> {
        run_in_transaction(&self.conn, || {
            let connection_id: i64 = self
                .conn
                .query_row(
                    "SELECT rowid FROM connections WHERE object_id = ?1 AND fieldname = ?2",
                    params![object_id, fieldname],
                    |row| row.get(0),
                )
                .optional()
                .map_err(errors::from_sqlite)?
                .ok_or_else(|| MirrorError::NoSuchConnection {
                    object_id: object_id.to_string(),
                    fieldname: fieldname.to_string(),
                })?;
            let mut next_index: i64 = self
                .conn
                .query_row(
                    "SELECT COALESCE(MAX(idx), 0) + 1 FROM connection_entries
                     WHERE connection_id = ?1",
                    params![connection_id],
                    |row| row.get(0),
                )
                .map_err(errors::from_sqlite)?;
            for node in &response.nodes {
                let child_id = match node {
                    Some(node_ref) => {
                        self.register_object_inner(&node_ref.typename, &node_ref.id)?;
                        Some(node_ref.id.as_str())
                    }
                    None => None,
                };
                self.conn
                    .execute(
                        "INSERT INTO connection_entries (connection_id, idx, child_id)
                         VALUES (?1, ?2, ?3)",
                        params![connection_id, next_index, child_id],
                    )
                    .map_err(errors::from_sqlite)?;
                next_index += 1;
            }
            self.conn
                .execute(
                    "UPDATE connections
                     SET last_update = ?1, total_count = ?2,
                         has_next_page = ?3, end_cursor = ?4
                     WHERE rowid = ?5",
                    params![
                        update.0,
                        response.total_count,
                        response.page_info.has_next_page,
                        response.page_info.end_cursor,
                        connection_id
                    ],
                )
                .map_err(errors::from_sqlite)?;
            debug!(
                object_id,
                fieldname,
                appended = response.nodes.len(),
                "merged connection page"
            );
            Ok(())
        })
    }

    /// Merge a batch of own-data records for one object type. The whole
    /// batch is one atomic unit; any invalid record rolls back every record.
    /// Each record's subject must already be registered (only link targets
    /// are created on sight), and every declared primitive and link field
    /// must be present.
    pub fn update_own_data(
        &self,
        update: UpdateId,
        records: &[OwnDataRecord],
    ) -> Result<(), MirrorError> {
        let Some(first) = records.first() else {
            return Ok(());
        };
        for record in records {
            if record.typename != first.typename {
                return Err(MirrorError::InconsistentTypenames(
                    first.typename.clone(),
                    record.typename.clone(),
                ));
            }
        }
        let typename = first.typename.as_str();
        let object = self.info.object(typename)?;
        let update_sql = own_data_update_sql(typename, &object.primitives);
        run_in_transaction(&self.conn, || {
            for record in records {
                self.write_own_data(update, object, &update_sql, record)?;
            }
            debug!(typename, records = records.len(), "merged own data");
            Ok(())
        })
    }

    fn write_own_data(
        &self,
        update: UpdateId,
        object: &ObjectInfo,
        update_sql: &str,
        record: &OwnDataRecord,
    ) -> Result<(), MirrorError> {
        let stored = self
            .object_typename(&record.id)?
            .ok_or_else(|| MirrorError::NonexistentNode(record.id.clone()))?;
        if stored != record.typename {
            return Err(MirrorError::TypeConflict {
                id: record.id.clone(),
                stored,
                requested: record.typename.clone(),
            });
        }
        let mut values = Vec::with_capacity(object.primitives.len());
        for fieldname in &object.primitives {
            let value = record.primitives.get(fieldname).ok_or_else(|| {
                MirrorError::MissingPrimitive(format!("{}.{fieldname}", record.typename))
            })?;
            values.push(serde_json::to_string(value).map_err(|e| MirrorError::store(e.to_string()))?);
        }
        for fieldname in &object.links {
            let target = record.links.get(fieldname).ok_or_else(|| {
                MirrorError::MissingLink(format!("{}.{fieldname}", record.typename))
            })?;
            let child_id = match target {
                Some(node_ref) => {
                    // The target must exist as an object before the link row
                    // can reference it.
                    self.register_object_inner(&node_ref.typename, &node_ref.id)?;
                    Some(node_ref.id.as_str())
                }
                None => None,
            };
            self.conn
                .execute(
                    "INSERT INTO links (parent_id, fieldname, child_id) VALUES (?1, ?2, ?3)
                     ON CONFLICT (parent_id, fieldname) DO UPDATE SET child_id = excluded.child_id",
                    params![record.id, fieldname, child_id],
                )
                .map_err(errors::from_sqlite)?;
        }
        if !object.primitives.is_empty() {
            let mut sql_params: Vec<&dyn ToSql> =
                values.iter().map(|v| v as &dyn ToSql).collect();
            sql_params.push(&record.id);
            self.conn
                .execute(update_sql, &sql_params[..])
                .map_err(errors::from_sqlite)?;
        }
        self.conn
            .execute(
                "UPDATE objects SET last_update = ?1 WHERE id = ?2",
                params![update.0, record.id],
            )
            .map_err(errors::from_sqlite)?;
        Ok(())
    }

    /// Read back the JSON-decoded primitive fields fetched so far for one
    /// object. Fields never written (still SQL NULL from registration) are
    /// omitted, which keeps "fetched null" distinct from "never fetched".
    pub fn own_data(
        &self,
        typename: &str,
        id: &str,
    ) -> Result<BTreeMap<String, serde_json::Value>, MirrorError> {
        let object = self.info.object(typename)?;
        let stored = self
            .object_typename(id)?
            .ok_or_else(|| MirrorError::NonexistentNode(id.to_string()))?;
        if stored != typename {
            return Err(MirrorError::TypeConflict {
                id: id.to_string(),
                stored,
                requested: typename.to_string(),
            });
        }
        if object.primitives.is_empty() {
            return Ok(BTreeMap::new());
        }
        let columns = object
            .primitives
            .iter()
            .map(|f| format!("\"{f}\""))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {columns} FROM \"{}\" WHERE id = ?1",
            own_data_table(typename)
        );
        let raw: Vec<Option<String>> = self
            .conn
            .query_row(&sql, params![id], |row| {
                (0..object.primitives.len())
                    .map(|i| row.get(i))
                    .collect::<Result<Vec<_>, _>>()
            })
            .map_err(errors::from_sqlite)?;
        let mut fields = BTreeMap::new();
        for (fieldname, encoded) in object.primitives.iter().zip(raw) {
            if let Some(encoded) = encoded {
                let value = serde_json::from_str(&encoded)
                    .map_err(|e| MirrorError::store(e.to_string()))?;
                fields.insert(fieldname.clone(), value);
            }
        }
        Ok(fields)
    }
}

fn own_data_table(typename: &str) -> String {
    format!("data_{typename}")
}

/// The one DDL builder for per-type data tables. Identifiers interpolated
/// here have already passed the sanitizer during schema compilation.
fn own_data_table_ddl(typename: &str, primitives: &[String]) -> String {
    let mut columns = vec!["id TEXT NOT NULL PRIMARY KEY".to_string()];
    for fieldname in primitives {
        columns.push(format!("\"{fieldname}\" TEXT"));
    }
    columns.push("FOREIGN KEY (id) REFERENCES objects (id)".to_string());
    format!(
        "CREATE TABLE \"{}\" ({})",
        own_data_table(typename),
        columns.join(", ")
    )
}

fn own_data_update_sql(typename: &str, primitives: &[String]) -> String {
    let sets = primitives
        .iter()
        .enumerate()
        .map(|(i, fieldname)| format!("\"{fieldname}\" = ?{}", i + 1))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "UPDATE \"{}\" SET {sets} WHERE id = ?{}",
        own_data_table(typename),
        primitives.len() + 1
    )
}
