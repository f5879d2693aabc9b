//! Per-record disposition.
//!
//! The wire format overloads `deleted` + `modified_columns`: a delete
//! marker with an empty column list means the row is physically removed,
//! while a delete marker alongside column names is an ordinary soft-delete
//! update. That convention is normalized into an explicit enum here, at the
//! edge, so nothing downstream ever re-derives intent from an empty vec.

use crate::record::Change;

/// What the gateway should do with one change record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Physically remove the row. Idempotent: an already-absent row is
    /// success, not an error.
    HardDelete,
    /// Insert the full record; on a primary-key conflict, update instead.
    /// Covers retried inserts whose ack was lost.
    Upsert,
    /// Update only the named columns (plus the table's implicit `modified`
    /// timestamp), leaving every other column untouched.
    Update(Vec<String>),
    /// Nothing changed; the row must not be touched.
    Noop,
}

/// Classify a change record, table-agnostically.
///
/// Evaluation order matters: the hard-delete convention wins over `new`,
/// so a never-synced row that was deleted again before its first sync is
/// still removed remotely (a no-op delete there).
pub fn disposition<C: Change>(change: &C) -> Disposition {
    if change.is_deleted() && change.modified_columns().is_empty() {
        return Disposition::HardDelete;
    }
    if change.is_new() {
        return Disposition::Upsert;
    }
    if !change.modified_columns().is_empty() {
        return Disposition::Update(change.modified_columns().to_vec());
    }
    Disposition::Noop
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::TodoChange;

    fn todo() -> TodoChange {
        TodoChange {
            id: "t1".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn delete_with_empty_columns_is_hard_delete() {
        let change = TodoChange {
            deleted: true,
            ..todo()
        };
        assert_eq!(disposition(&change), Disposition::HardDelete);
    }

    #[test]
    fn delete_with_columns_is_soft_delete_update() {
        let change = TodoChange {
            deleted: true,
            modified_columns: vec!["deleted".to_string()],
            ..todo()
        };
        assert_eq!(
            disposition(&change),
            Disposition::Update(vec!["deleted".to_string()])
        );
    }

    #[test]
    fn new_record_is_upsert() {
        let change = TodoChange {
            new: true,
            modified_columns: vec!["title".to_string()],
            ..todo()
        };
        assert_eq!(disposition(&change), Disposition::Upsert);
    }

    #[test]
    fn deleted_new_record_is_still_hard_delete() {
        let change = TodoChange {
            new: true,
            deleted: true,
            ..todo()
        };
        assert_eq!(disposition(&change), Disposition::HardDelete);
    }

    #[test]
    fn modified_columns_drive_scoped_update() {
        let change = TodoChange {
            modified_columns: vec!["title".to_string(), "completed".to_string()],
            ..todo()
        };
        assert_eq!(
            disposition(&change),
            Disposition::Update(vec!["title".to_string(), "completed".to_string()])
        );
    }

    #[test]
    fn empty_record_is_noop() {
        assert_eq!(disposition(&todo()), Disposition::Noop);
    }
}
