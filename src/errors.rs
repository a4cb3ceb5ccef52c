use thiserror::Error;

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("store already initialized with an incompatible schema")]
    SchemaMismatch,
    #[error("schema error: {0}")]
    SchemaError(String),
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
    #[error("unknown type: {0}")]
    UnknownType(String),
    #[error("not an object type: {0}")]
    NotAnObjectType(String),
    #[error("type conflict for object {id}: stored as {stored}, requested {requested}")]
    TypeConflict {
        id: String,
        stored: String,
        requested: String,
    },
    #[error("no such connection: {object_id}.{fieldname}")]
    NoSuchConnection {
        object_id: String,
        fieldname: String,
    },
    #[error("nonexistent node: {0}")]
    NonexistentNode(String),
    #[error("missing primitive field: {0}")]
    MissingPrimitive(String),
    #[error("missing link field: {0}")]
    MissingLink(String),
    #[error("inconsistent typenames in batch: {0} vs {1}")]
    InconsistentTypenames(String, String),
    #[error("already in transaction")]
    AlreadyInTransaction,
    #[error("store constraint violation: {0}")]
    ConstraintViolation(String),
    #[error("store error: {0}")]
    StoreError(String),
}

impl MirrorError {
    pub fn schema<T: Into<String>>(msg: T) -> Self {
        MirrorError::SchemaError(msg.into())
    }

    pub fn store<T: Into<String>>(msg: T) -> Self {
        MirrorError::StoreError(msg.into())
    }
}

/// Classify a driver error: uniqueness and foreign-key failures surface as
/// `ConstraintViolation`, everything else as `StoreError`.
pub(crate) fn from_sqlite(err: rusqlite::Error) -> MirrorError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            MirrorError::ConstraintViolation(err.to_string())
        }
        _ => MirrorError::StoreError(err.to_string()),
    }
}
