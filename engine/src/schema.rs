//! Per-table shapes and changeset validation.
//!
//! The gateway and the local write path both validate records against the
//! same closed column sets before anything touches a store. A record whose
//! `modified_columns` names a column the table does not have is rejected
//! outright; it would otherwise drift into a silent no-op update.

use crate::error::{Error, Result};
use crate::record::{Change, Changeset, ColumnType, TableKind};

const LISTS_COLUMNS: &[&str] = &["id", "name", "color", "sort_order", "created", "modified"];
const TODOS_COLUMNS: &[&str] = &[
    "id", "list_id", "goal_id", "title", "completed", "deleted", "created", "modified",
];
const GOALS_COLUMNS: &[&str] = &[
    "id",
    "title",
    "description",
    "target_date",
    "created",
    "modified",
];

/// All column names of a table, primary key first.
pub fn columns(table: TableKind) -> &'static [&'static str] {
    match table {
        TableKind::Lists => LISTS_COLUMNS,
        TableKind::Todos => TODOS_COLUMNS,
        TableKind::Goals => GOALS_COLUMNS,
    }
}

/// Non-key columns of a table.
pub fn non_key_columns(table: TableKind) -> &'static [&'static str] {
    &columns(table)[1..]
}

/// Whether the table carries an implicit `modified` timestamp column that
/// column-scoped updates must touch.
pub fn has_modified_timestamp(table: TableKind) -> bool {
    columns(table).contains(&"modified")
}

pub fn is_known_column(table: TableKind, name: &str) -> bool {
    columns(table).contains(&name)
}

/// Declared type of a column, for typed null binds. Unknown columns read
/// as text; they are rejected by validation before any statement is built.
pub fn column_type(table: TableKind, name: &str) -> ColumnType {
    match (table, name) {
        (TableKind::Lists, "sort_order") => ColumnType::Int,
        (TableKind::Todos, "completed") | (TableKind::Todos, "deleted") => ColumnType::Bool,
        (_, "created") | (_, "modified") | (TableKind::Goals, "target_date") => {
            ColumnType::Timestamp
        }
        _ => ColumnType::Text,
    }
}

/// Validate a single change record: non-empty id, and `modified_columns`
/// restricted to the table's known column names.
pub fn validate_change<C: Change>(change: &C) -> Result<()> {
    if change.id().trim().is_empty() {
        return Err(Error::MissingId);
    }
    for column in change.modified_columns() {
        if !is_known_column(change.table(), column) {
            return Err(Error::UnknownColumn {
                table: change.table().to_string(),
                column: column.clone(),
            });
        }
    }
    Ok(())
}

/// Validate every record of a changeset. The first invalid record fails the
/// whole changeset; the gateway surfaces this as a 400.
pub fn validate_changeset(changeset: &Changeset) -> Result<()> {
    for change in &changeset.lists {
        validate_change(change)?;
    }
    for change in &changeset.todos {
        validate_change(change)?;
    }
    for change in &changeset.goals {
        validate_change(change)?;
    }
    Ok(())
}
