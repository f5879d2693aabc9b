//! Echo suppression for remote-originated writes.
//!
//! When the change stream replays a row this client already wrote locally,
//! the incoming insert collides with the existing primary key. The rule
//! here converts that insert into a full non-key-column update instead of
//! letting it fail — an echo-suppression mechanism, not a merge: the
//! remote-originated version is accepted wholesale for a colliding id.
//!
//! The write origin is an explicit parameter threaded through the apply
//! path. It is never ambient state, so correctness cannot depend on
//! remembering to clear a flag.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Where a write originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// An ordinary local user write.
    Local,
    /// A write replayed from the remote change stream.
    Remote,
}

/// How an insert attempt should proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertAction {
    /// No collision; the insert proceeds unmodified.
    Insert,
    /// The key exists and the write is remote-originated: update all
    /// non-key columns from the incoming values and suppress the insert.
    ConvertToUpdate,
}

/// Decide what an insert against `id` should do given whether the row
/// already exists. A local insert colliding with an existing key is a real
/// primary-key violation and surfaces as an error.
pub fn resolve_insert(origin: Origin, id: &str, exists: bool) -> Result<InsertAction> {
    match (origin, exists) {
        (_, false) => Ok(InsertAction::Insert),
        (Origin::Remote, true) => Ok(InsertAction::ConvertToUpdate),
        (Origin::Local, true) => Err(Error::RecordAlreadyExists(id.to_string())),
    }
}
