//! SQL construction for change records.
//!
//! Statements are built here as pure values (text plus an ordered bind
//! list) so the column-scoping and idempotence rules can be tested without
//! a database. The gateway executes them against Postgres, the local store
//! against SQLite; only the placeholder syntax differs.

use crate::record::{Change, ColumnValue, TableKind};
use crate::schema;
use chrono::{DateTime, Utc};

/// Placeholder dialect of the executing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    Sqlite,
}

impl Dialect {
    fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${index}"),
            Dialect::Sqlite => format!("?{index}"),
        }
    }
}

/// A statement plus its binds, in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    pub sql: String,
    pub binds: Vec<ColumnValue>,
}

/// INSERT the full record, updating all non-key columns on a primary-key
/// conflict. Applying the same record twice leaves the same row state.
pub fn upsert<C: Change>(change: &C, dialect: Dialect) -> SqlStatement {
    let table = change.table();
    let cols = schema::columns(table);

    let placeholders: Vec<String> = (1..=cols.len()).map(|i| dialect.placeholder(i)).collect();
    let conflict_updates: Vec<String> = schema::non_key_columns(table)
        .iter()
        .map(|c| format!("{c} = excluded.{c}"))
        .collect();

    let sql = format!(
        "INSERT INTO {table} ({}) VALUES ({}) ON CONFLICT (id) DO UPDATE SET {}",
        cols.join(", "),
        placeholders.join(", "),
        conflict_updates.join(", "),
    );

    SqlStatement {
        sql,
        binds: bind_all(change, cols),
    }
}

/// Plain INSERT of the full record. A primary-key collision surfaces as a
/// database error; used for ordinary local writes where a collision is a
/// real bug, not an echo.
pub fn insert<C: Change>(change: &C, dialect: Dialect) -> SqlStatement {
    let table = change.table();
    let cols = schema::columns(table);
    let placeholders: Vec<String> = (1..=cols.len()).map(|i| dialect.placeholder(i)).collect();

    SqlStatement {
        sql: format!(
            "INSERT INTO {table} ({}) VALUES ({})",
            cols.join(", "),
            placeholders.join(", ")
        ),
        binds: bind_all(change, cols),
    }
}

/// Multi-row upsert for bulk loads. All records must target the same table.
pub fn bulk_upsert<C: Change>(changes: &[C], table: TableKind, dialect: Dialect) -> SqlStatement {
    let cols = schema::columns(table);
    let mut binds = Vec::with_capacity(changes.len() * cols.len());
    let mut rows = Vec::with_capacity(changes.len());

    let mut index = 0usize;
    for change in changes {
        debug_assert_eq!(change.table(), table);
        let row: Vec<String> = (0..cols.len())
            .map(|_| {
                index += 1;
                dialect.placeholder(index)
            })
            .collect();
        rows.push(format!("({})", row.join(", ")));
        binds.extend(bind_all(change, cols));
    }

    let conflict_updates: Vec<String> = schema::non_key_columns(table)
        .iter()
        .map(|c| format!("{c} = excluded.{c}"))
        .collect();

    SqlStatement {
        sql: format!(
            "INSERT INTO {table} ({}) VALUES {} ON CONFLICT (id) DO UPDATE SET {}",
            cols.join(", "),
            rows.join(", "),
            conflict_updates.join(", "),
        ),
        binds,
    }
}

/// UPDATE touching only the named columns, plus the table's implicit
/// `modified` timestamp. Columns not named keep their stored values even
/// if the record payload carries stale ones. The primary key is never in
/// the SET list.
pub fn update_columns<C: Change>(
    change: &C,
    columns: &[String],
    now: DateTime<Utc>,
    dialect: Dialect,
) -> SqlStatement {
    let table = change.table();
    let mut sets = Vec::new();
    let mut binds = Vec::new();
    let mut index = 0usize;

    let mut touched_modified = false;
    for column in columns {
        if column == "id" {
            continue;
        }
        if column == "modified" {
            touched_modified = true;
        }
        index += 1;
        sets.push(format!("{column} = {}", dialect.placeholder(index)));
        binds.push(
            change
                .column(column)
                .unwrap_or_else(|| ColumnValue::Null(schema::column_type(table, column))),
        );
    }

    if schema::has_modified_timestamp(table) && !touched_modified {
        index += 1;
        sets.push(format!("modified = {}", dialect.placeholder(index)));
        let modified = match change.column("modified") {
            Some(ColumnValue::Timestamp(t)) => ColumnValue::Timestamp(t),
            _ => ColumnValue::Timestamp(now),
        };
        binds.push(modified);
    }

    index += 1;
    binds.push(ColumnValue::Text(change.id().to_string()));

    SqlStatement {
        sql: format!(
            "UPDATE {table} SET {} WHERE id = {}",
            sets.join(", "),
            dialect.placeholder(index)
        ),
        binds,
    }
}

/// UPDATE all non-key columns from the incoming values. Used when a
/// remote-originated insert collides with an existing key and is converted
/// into an update (echo suppression).
pub fn update_all_non_key<C: Change>(change: &C, dialect: Dialect) -> SqlStatement {
    let table = change.table();
    let cols: Vec<String> = schema::non_key_columns(table)
        .iter()
        .map(|c| (*c).to_string())
        .collect();

    let mut sets = Vec::with_capacity(cols.len());
    let mut binds = Vec::with_capacity(cols.len() + 1);
    for (i, column) in cols.iter().enumerate() {
        sets.push(format!("{column} = {}", dialect.placeholder(i + 1)));
        binds.push(
            change
                .column(column)
                .unwrap_or_else(|| ColumnValue::Null(schema::column_type(table, column))),
        );
    }
    binds.push(ColumnValue::Text(change.id().to_string()));

    SqlStatement {
        sql: format!(
            "UPDATE {table} SET {} WHERE id = {}",
            sets.join(", "),
            dialect.placeholder(cols.len() + 1)
        ),
        binds,
    }
}

/// DELETE by id. Deleting an absent row affects zero rows and is success.
pub fn delete(table: TableKind, id: &str, dialect: Dialect) -> SqlStatement {
    SqlStatement {
        sql: format!("DELETE FROM {table} WHERE id = {}", dialect.placeholder(1)),
        binds: vec![ColumnValue::Text(id.to_string())],
    }
}

fn bind_all<C: Change>(change: &C, cols: &[&str]) -> Vec<ColumnValue> {
    let table = change.table();
    cols.iter()
        .map(|c| {
            change
                .column(c)
                .unwrap_or_else(|| ColumnValue::Null(schema::column_type(table, c)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::TodoChange;
    use chrono::TimeZone;

    fn todo() -> TodoChange {
        TodoChange {
            id: "t1".to_string(),
            title: Some("Buy milk".to_string()),
            completed: Some(false),
            ..Default::default()
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn upsert_covers_all_columns() {
        let stmt = upsert(&todo(), Dialect::Postgres);
        assert_eq!(
            stmt.sql,
            "INSERT INTO todos (id, list_id, goal_id, title, completed, deleted, created, \
             modified) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) ON CONFLICT (id) DO UPDATE SET \
             list_id = excluded.list_id, goal_id = excluded.goal_id, title = excluded.title, \
             completed = excluded.completed, deleted = excluded.deleted, \
             created = excluded.created, modified = excluded.modified"
        );
        assert_eq!(stmt.binds.len(), 8);
        assert_eq!(stmt.binds[0], ColumnValue::Text("t1".to_string()));
        assert_eq!(stmt.binds[3], ColumnValue::Text("Buy milk".to_string()));
    }

    #[test]
    fn scoped_update_touches_only_named_columns_and_modified() {
        let stmt = update_columns(
            &todo(),
            &["title".to_string()],
            now(),
            Dialect::Postgres,
        );
        assert_eq!(
            stmt.sql,
            "UPDATE todos SET title = $1, modified = $2 WHERE id = $3"
        );
        assert_eq!(stmt.binds[0], ColumnValue::Text("Buy milk".to_string()));
        assert_eq!(stmt.binds[1], ColumnValue::Timestamp(now()));
        assert_eq!(stmt.binds[2], ColumnValue::Text("t1".to_string()));
        // stale payload values for other columns never appear in the statement
        assert!(!stmt.sql.contains("completed"));
    }

    #[test]
    fn scoped_update_never_sets_the_primary_key() {
        let stmt = update_columns(
            &todo(),
            &["id".to_string(), "title".to_string()],
            now(),
            Dialect::Postgres,
        );
        assert!(stmt.sql.starts_with("UPDATE todos SET title = $1"));
    }

    #[test]
    fn explicit_modified_column_is_not_doubled() {
        let change = TodoChange {
            modified: Some(now()),
            ..todo()
        };
        let stmt = update_columns(
            &change,
            &["title".to_string(), "modified".to_string()],
            Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
            Dialect::Postgres,
        );
        assert_eq!(
            stmt.sql,
            "UPDATE todos SET title = $1, modified = $2 WHERE id = $3"
        );
        assert_eq!(stmt.binds[1], ColumnValue::Timestamp(now()));
    }

    #[test]
    fn echo_conversion_updates_every_non_key_column() {
        let stmt = update_all_non_key(&todo(), Dialect::Sqlite);
        assert_eq!(
            stmt.sql,
            "UPDATE todos SET list_id = ?1, goal_id = ?2, title = ?3, completed = ?4, \
             deleted = ?5, created = ?6, modified = ?7 WHERE id = ?8"
        );
        assert_eq!(stmt.binds.len(), 8);
    }

    #[test]
    fn delete_is_by_id_only() {
        let stmt = delete(TableKind::Goals, "g1", Dialect::Postgres);
        assert_eq!(stmt.sql, "DELETE FROM goals WHERE id = $1");
        assert_eq!(stmt.binds, vec![ColumnValue::Text("g1".to_string())]);
    }

    #[test]
    fn bulk_upsert_numbers_placeholders_across_rows() {
        let rows = vec![todo(), TodoChange {
            id: "t2".to_string(),
            ..Default::default()
        }];
        let stmt = bulk_upsert(&rows, TableKind::Todos, Dialect::Postgres);
        assert!(stmt.sql.contains("($1, $2, $3, $4, $5, $6, $7, $8)"));
        assert!(stmt.sql.contains("($9, $10, $11, $12, $13, $14, $15, $16)"));
        assert_eq!(stmt.binds.len(), 16);
        assert_eq!(stmt.binds[8], ColumnValue::Text("t2".to_string()));
    }

    #[test]
    fn sqlite_dialect_uses_question_placeholders() {
        let stmt = insert(&todo(), Dialect::Sqlite);
        assert!(stmt.sql.contains("VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"));
    }
}
