//! All-or-nothing execution of a unit of work against the store.

use rusqlite::Connection;

use crate::errors::{self, MirrorError};

/// Execute `fn` inside a store-level transaction.
///
/// The connection must not already be in a transaction; nesting fails with
/// [`MirrorError::AlreadyInTransaction`]. The reentrancy flag is the
/// connection handle's own autocommit state, so a callback that commits or
/// rolls back on its own is honored: at exit the runner only acts on
/// whatever transaction is still open. A normal return commits, an error
/// rolls back and propagates.
pub fn run_in_transaction<T>(
    conn: &Connection,
    f: impl FnOnce() -> Result<T, MirrorError>,
) -> Result<T, MirrorError> {
    if !conn.is_autocommit() {
        return Err(MirrorError::AlreadyInTransaction);
    }
    conn.execute_batch("BEGIN").map_err(errors::from_sqlite)?;
    match f() {
        Ok(value) => {
            if !conn.is_autocommit() {
                if let Err(err) = conn.execute_batch("COMMIT") {
                    if !conn.is_autocommit() {
                        let _ = conn.execute_batch("ROLLBACK");
                    }
                    return Err(errors::from_sqlite(err));
                }
            }
            Ok(value)
        }
        Err(err) => {
            if !conn.is_autocommit() {
                let _ = conn.execute_batch("ROLLBACK");
            }
            Err(err)
        }
    }
}
