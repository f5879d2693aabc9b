//! Local store write paths.
//!
//! Every write names its [`Origin`] explicitly. Local user writes insert
//! the domain row and append the outbox entry in one transaction; writes
//! replayed from the remote stream go through the echo-suppression rule
//! and never touch the outbox.

use crate::db::Pool;
use crate::error::{Result, SyncError};
use crate::outbox::{self, Operation};
use chrono::Utc;
use ferry_engine::{
    reconcile, schema, sql, Change, ColumnType, ColumnValue, Dialect, InsertAction, Origin,
    RecordChange, SqlStatement, TableKind, TodoChange,
};
use sqlx::{Row, SqliteConnection};

/// Handle over the local database for origin-tagged writes.
#[derive(Clone)]
pub struct LocalStore {
    pool: Pool,
}

impl LocalStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Insert a locally created row. The domain insert and its outbox
    /// entry commit as one unit; a primary-key collision is a real error
    /// for local writes, not an echo.
    pub async fn insert_local(&self, change: &RecordChange) -> Result<()> {
        schema::validate_change(change)?;
        let mut tx = self.pool.begin().await?;

        let exists = row_exists(&mut tx, change.table(), change.id()).await?;
        match reconcile::resolve_insert(Origin::Local, change.id(), exists)? {
            InsertAction::Insert => {
                execute(&mut tx, &sql::insert(change, Dialect::Sqlite)).await?;
            }
            InsertAction::ConvertToUpdate => unreachable!("local inserts never convert"),
        }

        outbox::enqueue(
            &mut tx,
            change.table(),
            Operation::Insert,
            change.id(),
            &change.to_json()?,
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Apply a column-scoped local edit and enqueue it for sync.
    pub async fn update_local(&self, change: &RecordChange) -> Result<()> {
        schema::validate_change(change)?;
        if change.modified_columns().is_empty() {
            return Err(SyncError::Validation(ferry_engine::Error::InvalidPayload(
                "local update names no modified columns".to_string(),
            )));
        }

        let mut tx = self.pool.begin().await?;
        let stmt = sql::update_columns(
            change,
            change.modified_columns(),
            Utc::now(),
            Dialect::Sqlite,
        );
        execute(&mut tx, &stmt).await?;
        outbox::enqueue(
            &mut tx,
            change.table(),
            Operation::Update,
            change.id(),
            &change.to_json()?,
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Delete a todo locally. A hard delete removes the row and enqueues
    /// the bare `{deleted: true}` marker; a soft delete is an ordinary
    /// column-scoped update of the `deleted` flag.
    pub async fn delete_todo_local(&self, id: &str, hard: bool) -> Result<()> {
        let marker = TodoChange {
            id: id.to_string(),
            deleted: true,
            modified_columns: if hard {
                Vec::new()
            } else {
                vec!["deleted".to_string()]
            },
            ..Default::default()
        };
        let change = RecordChange::Todos(marker);

        let mut tx = self.pool.begin().await?;
        if hard {
            execute(&mut tx, &sql::delete(TableKind::Todos, id, Dialect::Sqlite)).await?;
            outbox::enqueue(
                &mut tx,
                TableKind::Todos,
                Operation::Delete,
                id,
                &change.to_json()?,
            )
            .await?;
        } else {
            let stmt = sql::update_columns(
                &change,
                change.modified_columns(),
                Utc::now(),
                Dialect::Sqlite,
            );
            execute(&mut tx, &stmt).await?;
            outbox::enqueue(
                &mut tx,
                TableKind::Todos,
                Operation::Update,
                id,
                &change.to_json()?,
            )
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Apply a row-change event replayed from the remote stream. When the
    /// key already exists the insert converts into an update of all
    /// non-key columns, suppressing the echo of our own prior write.
    /// Remote-originated writes never enqueue outbox entries.
    pub async fn apply_remote(&self, change: &RecordChange) -> Result<()> {
        schema::validate_change(change)?;
        let mut tx = self.pool.begin().await?;

        let exists = row_exists(&mut tx, change.table(), change.id()).await?;
        let stmt = match reconcile::resolve_insert(Origin::Remote, change.id(), exists)? {
            InsertAction::Insert => sql::insert(change, Dialect::Sqlite),
            InsertAction::ConvertToUpdate => sql::update_all_non_key(change, Dialect::Sqlite),
        };
        execute(&mut tx, &stmt).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Remove a row deleted remotely. Idempotent.
    pub async fn delete_remote(&self, table: TableKind, id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        execute(&mut tx, &sql::delete(table, id, Dialect::Sqlite)).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Number of rows in a table.
    pub async fn row_count(&self, table: TableKind) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// All row ids of a table, for the convergence fingerprint.
    pub async fn all_ids(&self, table: TableKind) -> Result<Vec<String>> {
        let rows = sqlx::query(&format!("SELECT id FROM {table}"))
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("id").map_err(SyncError::Database))
            .collect()
    }

    /// Read every row of a table back as a `new` change record, the shape
    /// a bulk initial load pushes to the gateway.
    pub async fn all_as_new(&self, table: TableKind) -> Result<Vec<RecordChange>> {
        let columns = schema::columns(table).join(", ");
        let rows = sqlx::query(&format!("SELECT {columns} FROM {table}"))
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                let mut change = match table {
                    TableKind::Lists => RecordChange::Lists(ferry_engine::ListChange {
                        id: row.try_get("id")?,
                        name: row.try_get("name")?,
                        color: row.try_get("color")?,
                        sort_order: row.try_get("sort_order")?,
                        created: row.try_get("created")?,
                        modified: row.try_get("modified")?,
                        ..Default::default()
                    }),
                    TableKind::Todos => RecordChange::Todos(TodoChange {
                        id: row.try_get("id")?,
                        list_id: row.try_get("list_id")?,
                        goal_id: row.try_get("goal_id")?,
                        title: row.try_get("title")?,
                        completed: row.try_get("completed")?,
                        deleted: row.try_get("deleted")?,
                        created: row.try_get("created")?,
                        modified: row.try_get("modified")?,
                        ..Default::default()
                    }),
                    TableKind::Goals => RecordChange::Goals(ferry_engine::GoalChange {
                        id: row.try_get("id")?,
                        title: row.try_get("title")?,
                        description: row.try_get("description")?,
                        target_date: row.try_get("target_date")?,
                        created: row.try_get("created")?,
                        modified: row.try_get("modified")?,
                        ..Default::default()
                    }),
                };
                mark_new(&mut change);
                Ok(change)
            })
            .collect::<std::result::Result<Vec<_>, sqlx::Error>>()
            .map_err(SyncError::Database)
    }

    /// Fetch one todo row, mostly for assertions in tests.
    pub async fn get_todo(&self, id: &str) -> Result<Option<TodoChange>> {
        let row = sqlx::query(
            "SELECT id, list_id, goal_id, title, completed, deleted, created, modified \
             FROM todos WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(TodoChange {
                id: row.try_get("id").map_err(SyncError::Database)?,
                list_id: row.try_get("list_id").map_err(SyncError::Database)?,
                goal_id: row.try_get("goal_id").map_err(SyncError::Database)?,
                title: row.try_get("title").map_err(SyncError::Database)?,
                completed: row.try_get("completed").map_err(SyncError::Database)?,
                deleted: row.try_get("deleted").map_err(SyncError::Database)?,
                created: row.try_get("created").map_err(SyncError::Database)?,
                modified: row.try_get("modified").map_err(SyncError::Database)?,
                ..Default::default()
            })
        })
        .transpose()
    }
}

fn mark_new(change: &mut RecordChange) {
    match change {
        RecordChange::Lists(c) => c.new = true,
        RecordChange::Todos(c) => c.new = true,
        RecordChange::Goals(c) => c.new = true,
    }
}

async fn row_exists(conn: &mut SqliteConnection, table: TableKind, id: &str) -> Result<bool> {
    let row = sqlx::query(&format!("SELECT 1 FROM {table} WHERE id = ?1"))
        .bind(id)
        .fetch_optional(conn)
        .await?;
    Ok(row.is_some())
}

async fn execute(conn: &mut SqliteConnection, stmt: &SqlStatement) -> Result<u64> {
    let mut query = sqlx::query(&stmt.sql);
    for value in &stmt.binds {
        query = match value {
            ColumnValue::Text(v) => query.bind(v.as_str()),
            ColumnValue::Bool(v) => query.bind(*v),
            ColumnValue::Int(v) => query.bind(*v),
            ColumnValue::Timestamp(v) => query.bind(*v),
            ColumnValue::Null(ColumnType::Text) => query.bind(Option::<String>::None),
            ColumnValue::Null(ColumnType::Bool) => query.bind(Option::<bool>::None),
            ColumnValue::Null(ColumnType::Int) => query.bind(Option::<i64>::None),
            ColumnValue::Null(ColumnType::Timestamp) => {
                query.bind(Option::<chrono::DateTime<Utc>>::None)
            }
        };
    }
    let done = query.execute(conn).await?;
    Ok(done.rows_affected())
}
