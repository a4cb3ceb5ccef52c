//! Selection-set values handed to an external query executor.
//!
//! The mirror only ever constructs these trees; it never interprets them
//! beyond what it built. Rendering them into wire-format query text is the
//! executor's concern.

use crate::errors::MirrorError;
use crate::mirror::EndCursor;
use crate::schema::SchemaInfo;

/// Argument value attached to a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Null,
    Int(i64),
    Str(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub args: Vec<(String, Value)>,
    pub selections: Vec<Field>,
}

pub type SelectionSet = Vec<Field>;

impl Field {
    pub fn leaf(name: &str) -> Self {
        Field {
            name: name.to_string(),
            args: Vec::new(),
            selections: Vec::new(),
        }
    }

    pub fn with(name: &str, selections: Vec<Field>) -> Self {
        Field {
            name: name.to_string(),
            args: Vec::new(),
            selections,
        }
    }

    pub fn arg(mut self, name: &str, value: Value) -> Self {
        self.args.push((name.to_string(), value));
        self
    }
}

fn node_ref_selections() -> Vec<Field> {
    vec![Field::leaf("__typename"), Field::leaf("id")]
}

/// Build the paginated page request for one connection field.
///
/// `EndCursor::Unfetched` omits the `after` argument entirely; an explicit
/// null cursor is passed through as `after: null`, which restarts the
/// connection from the beginning.
pub fn build_connection_query(
    fieldname: &str,
    cursor: &EndCursor,
    page_size: u32,
) -> SelectionSet {
    let mut field = Field::with(
        fieldname,
        vec![
            Field::leaf("totalCount"),
            Field::with(
                "pageInfo",
                vec![Field::leaf("endCursor"), Field::leaf("hasNextPage")],
            ),
            Field::with("nodes", node_ref_selections()),
        ],
    )
    .arg("first", Value::Int(i64::from(page_size)));
    match cursor {
        EndCursor::Unfetched => {}
        EndCursor::Null => field = field.arg("after", Value::Null),
        EndCursor::Cursor(cursor) => field = field.arg("after", Value::Str(cursor.clone())),
    }
    vec![field]
}

/// Build the selection fetching one object's scalar and link fields.
/// Connection fields are excluded; they are fetched page by page through
/// [`build_connection_query`].
pub fn build_own_data_query(
    info: &SchemaInfo,
    typename: &str,
) -> Result<SelectionSet, MirrorError> {
    let object = info.object(typename)?;
    let mut selections = vec![Field::leaf("__typename"), Field::leaf(&object.id_field)];
    for fieldname in &object.primitives {
        selections.push(Field::leaf(fieldname));
    }
    for fieldname in &object.links {
        selections.push(Field::with(fieldname, node_ref_selections()));
    }
    Ok(selections)
}
