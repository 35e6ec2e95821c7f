//! Rollback SQL generation.
//!
//! Invoked after a remote execution when the session requested
//! backups. Generating the actual reverse statements (binlog capture
//! for DML, inverse DDL) is not implemented yet; this records the
//! call site and the result columns it would fill.
//!
//! TODO: capture binlog positions around each executed statement and
//! materialize reverse INSERT/UPDATE/DELETE into a backup database,
//! filling `backup_dbname` on the statement records.

use crate::error::GateError;
use crate::session::SessionContext;

pub fn generate_rollback(_ctx: &mut SessionContext) -> Result<(), GateError> {
    Ok(())
}
