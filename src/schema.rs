//! Declarative schema for the mirrored graph and its compiled lookup form.

use std::collections::{BTreeMap, BTreeSet};

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::errors::MirrorError;

/// Immutable description of the remote graph's type system. The `BTreeMap`
/// keying makes the serialized descriptor canonical regardless of how the
/// schema was assembled.
pub type Schema = BTreeMap<String, NodeType>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum NodeType {
    Object { fields: BTreeMap<String, FieldSpec> },
    Union { clauses: BTreeSet<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum FieldSpec {
    Id,
    Primitive,
    Node { target: String },
    Connection { target: String },
}

pub fn object<'a, I>(fields: I) -> NodeType
where
    I: IntoIterator<Item = (&'a str, FieldSpec)>,
{
    NodeType::Object {
        fields: fields
            .into_iter()
            .map(|(name, spec)| (name.to_string(), spec))
            .collect(),
    }
}

pub fn union_type(clauses: &[&str]) -> NodeType {
    NodeType::Union {
        clauses: clauses.iter().map(|c| c.to_string()).collect(),
    }
}

pub fn id() -> FieldSpec {
    FieldSpec::Id
}

pub fn primitive() -> FieldSpec {
    FieldSpec::Primitive
}

pub fn node(target: &str) -> FieldSpec {
    FieldSpec::Node {
        target: target.to_string(),
    }
}

pub fn connection(target: &str) -> FieldSpec {
    FieldSpec::Connection {
        target: target.to_string(),
    }
}

/// `true` when the token may be spliced into a SQL identifier. Table and
/// column names cannot be bound as statement parameters, so any
/// schema-derived name interpolated into DDL or DML must pass this first.
pub fn is_sql_safe(token: &str) -> bool {
    token.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

fn check_sql_safe(token: &str) -> Result<(), MirrorError> {
    if is_sql_safe(token) {
        Ok(())
    } else {
        Err(MirrorError::InvalidIdentifier(token.to_string()))
    }
}

/// Field buckets for one object type, in sorted field-name order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub id_field: String,
    pub primitives: Vec<String>,
    pub links: Vec<String>,
    pub connections: Vec<String>,
}

/// Metadata derived from a [`Schema`] at construction time; never mutated.
#[derive(Debug, Clone)]
pub struct SchemaInfo {
    objects: AHashMap<String, ObjectInfo>,
    unions: AHashMap<String, BTreeSet<String>>,
}

impl SchemaInfo {
    pub fn compile(schema: &Schema) -> Result<Self, MirrorError> {
        let mut objects = AHashMap::new();
        let mut unions = AHashMap::new();
        for (typename, node_type) in schema {
            check_sql_safe(typename)?;
            match node_type {
                NodeType::Object { fields } => {
                    objects.insert(typename.clone(), compile_object(typename, fields)?);
                }
                NodeType::Union { clauses } => {
                    unions.insert(typename.clone(), clauses.clone());
                }
            }
        }
        let info = SchemaInfo { objects, unions };
        info.check_references(schema)?;
        Ok(info)
    }

    /// Look up an object type, distinguishing "absent" from "union".
    pub fn object(&self, typename: &str) -> Result<&ObjectInfo, MirrorError> {
        if let Some(object) = self.objects.get(typename) {
            return Ok(object);
        }
        if self.unions.contains_key(typename) {
            return Err(MirrorError::NotAnObjectType(typename.to_string()));
        }
        Err(MirrorError::UnknownType(typename.to_string()))
    }

    pub fn union_clauses(&self, typename: &str) -> Option<&BTreeSet<String>> {
        self.unions.get(typename)
    }

    fn has_type(&self, typename: &str) -> bool {
        self.objects.contains_key(typename) || self.unions.contains_key(typename)
    }

    fn check_references(&self, schema: &Schema) -> Result<(), MirrorError> {
        for (typename, node_type) in schema {
            match node_type {
                NodeType::Object { fields } => {
                    for (fieldname, spec) in fields {
                        let target = match spec {
                            FieldSpec::Id | FieldSpec::Primitive => continue,
                            FieldSpec::Node { target } => target,
                            FieldSpec::Connection { target } => target,
                        };
                        if !self.has_type(target) {
                            return Err(MirrorError::schema(format!(
                                "field {typename}.{fieldname} references undeclared type {target}"
                            )));
                        }
                    }
                }
                NodeType::Union { clauses } => {
                    for clause in clauses {
                        if !self.objects.contains_key(clause) {
                            return Err(MirrorError::schema(format!(
                                "union {typename} clause {clause} is not a declared object type"
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

fn compile_object(
    typename: &str,
    fields: &BTreeMap<String, FieldSpec>,
) -> Result<ObjectInfo, MirrorError> {
    let mut id_field = None;
    let mut primitives = Vec::new();
    let mut links = Vec::new();
    let mut connections = Vec::new();
    for (fieldname, spec) in fields {
        check_sql_safe(fieldname)?;
        match spec {
            FieldSpec::Id => {
                if id_field.replace(fieldname.clone()).is_some() {
                    return Err(MirrorError::schema(format!(
                        "object type {typename} declares more than one id field"
                    )));
                }
            }
            FieldSpec::Primitive => primitives.push(fieldname.clone()),
            FieldSpec::Node { .. } => links.push(fieldname.clone()),
            FieldSpec::Connection { .. } => connections.push(fieldname.clone()),
        }
    }
    let id_field = id_field.ok_or_else(|| {
        MirrorError::schema(format!("object type {typename} declares no id field"))
    })?;
    Ok(ObjectInfo {
        id_field,
        primitives,
        links,
        connections,
    })
}
