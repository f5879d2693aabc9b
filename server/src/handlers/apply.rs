//! Apply handler - commits a client changeset in one transaction.

use crate::db;
use crate::db::Pool;
use crate::error::Result;
use ferry_engine::{schema, Changeset};
use serde::Serialize;

/// Response for an applied changeset.
#[derive(Debug, Serialize)]
pub struct ApplyResponse {
    pub success: bool,
    /// Records processed, no-ops included.
    pub applied: u64,
    /// Fingerprint over the changeset's record ids; the client's bulk
    /// loader compares it against its own to prove convergence.
    pub fingerprint: String,
}

/// Validate and apply a changeset.
///
/// Validation failure is a 400 before anything touches the database;
/// any failure during apply rolls back the whole changeset. Malformed
/// foreign-key references are nulled and logged rather than forwarded
/// into the store's constraints.
pub async fn handle_apply(pool: &Pool, mut changes: Changeset) -> Result<ApplyResponse> {
    schema::validate_changeset(&changes)?;

    for todo in &mut changes.todos {
        for sub in todo.sanitize_references() {
            tracing::warn!(
                table = %sub.table,
                record = %sub.record_id,
                column = sub.column,
                value = %sub.value,
                "nulled malformed reference before apply"
            );
        }
    }

    let outcome = db::apply_changeset(pool, &changes).await?;
    Ok(ApplyResponse {
        success: true,
        applied: outcome.applied,
        fingerprint: outcome.fingerprint,
    })
}
