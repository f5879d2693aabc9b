//! Durable local outbox.
//!
//! Every local write appends an entry here inside the same transaction,
//! recording the mutation until the gateway has durably applied it. The
//! sync optimizer claims batches oldest-first, deletes them on success,
//! and dead-letters them after `max_retries` failures — failed entries
//! stay visible for the operator, they are never silently retried.

use crate::error::{Result, SyncError};
use chrono::Utc;
use ferry_engine::TableKind;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

/// The kind of local write an entry represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }

    fn parse(raw: &str) -> Result<Self> {
        match raw {
            "insert" => Ok(Operation::Insert),
            "update" => Ok(Operation::Update),
            "delete" => Ok(Operation::Delete),
            other => Err(SyncError::Unknown(format!(
                "unknown outbox operation: {other}"
            ))),
        }
    }
}

/// Lifecycle state of an outbox entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Processing => "processing",
            Status::Completed => "completed",
            Status::Failed => "failed",
        }
    }

    fn parse(raw: &str) -> Result<Self> {
        match raw {
            "pending" => Ok(Status::Pending),
            "processing" => Ok(Status::Processing),
            "completed" => Ok(Status::Completed),
            "failed" => Ok(Status::Failed),
            other => Err(SyncError::Unknown(format!(
                "unknown outbox status: {other}"
            ))),
        }
    }
}

/// One durable pending mutation.
#[derive(Debug, Clone)]
pub struct OutboxEntry {
    pub id: String,
    pub table: TableKind,
    pub operation: Operation,
    /// Domain-row identity; not unique here, the same row may be mutated
    /// several times before a sync pass runs.
    pub record_id: String,
    /// Serialized change record.
    pub data: String,
    /// Enqueue time in epoch milliseconds; claim order.
    pub timestamp: i64,
    /// Insertion sequence; breaks claim-order ties within a millisecond.
    pub seq: i64,
    pub retry_count: i64,
    pub max_retries: i64,
    pub status: Status,
    pub error_message: Option<String>,
}

impl OutboxEntry {
    fn from_row(row: &SqliteRow) -> Result<Self> {
        let table: String = row.try_get("table_name").map_err(SyncError::Database)?;
        let operation: String = row.try_get("operation").map_err(SyncError::Database)?;
        let status: String = row.try_get("status").map_err(SyncError::Database)?;
        Ok(OutboxEntry {
            id: row.try_get("id").map_err(SyncError::Database)?,
            table: TableKind::parse(&table)?,
            operation: Operation::parse(&operation)?,
            record_id: row.try_get("record_id").map_err(SyncError::Database)?,
            data: row.try_get("data").map_err(SyncError::Database)?,
            timestamp: row.try_get("timestamp").map_err(SyncError::Database)?,
            seq: row.try_get("seq").map_err(SyncError::Database)?,
            retry_count: row.try_get("retry_count").map_err(SyncError::Database)?,
            max_retries: row.try_get("max_retries").map_err(SyncError::Database)?,
            status: Status::parse(&status)?,
            error_message: row.try_get("error_message").map_err(SyncError::Database)?,
        })
    }
}

/// Default retry budget before an entry is dead-lettered.
pub const DEFAULT_MAX_RETRIES: i64 = 3;

const ENTRY_COLUMNS: &str = "id, table_name, operation, record_id, data, timestamp, \
                             retry_count, max_retries, status, error_message, rowid AS seq";

/// Append an entry inside the caller's transaction, so the domain write
/// and its outbox record commit (or roll back) as one unit.
pub async fn enqueue(
    conn: &mut SqliteConnection,
    table: TableKind,
    operation: Operation,
    record_id: &str,
    data: &str,
) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now().timestamp_millis();
    sqlx::query(
        "INSERT INTO outbox (id, table_name, operation, record_id, data, timestamp, \
         retry_count, max_retries, status, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, 'pending', ?6, ?6)",
    )
    .bind(&id)
    .bind(table.as_str())
    .bind(operation.as_str())
    .bind(record_id)
    .bind(data)
    .bind(now)
    .bind(DEFAULT_MAX_RETRIES)
    .execute(conn)
    .await?;
    Ok(id)
}

/// Outbox handle over the local pool.
#[derive(Clone)]
pub struct Outbox {
    pool: SqlitePool,
}

impl Outbox {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Atomically claim up to `limit` entries, oldest first, marking them
    /// `processing`. Entries left `processing` by an abandoned pass are
    /// reclaimed here too.
    pub async fn claim_batch(&self, limit: i64) -> Result<Vec<OutboxEntry>> {
        let now = Utc::now().timestamp_millis();
        let rows = sqlx::query(&format!(
            "UPDATE outbox SET status = 'processing', updated_at = ?1 \
             WHERE id IN (SELECT id FROM outbox \
                          WHERE status IN ('pending', 'processing') \
                          ORDER BY timestamp ASC, rowid ASC LIMIT ?2) \
             RETURNING {ENTRY_COLUMNS}"
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = rows
            .iter()
            .map(OutboxEntry::from_row)
            .collect::<Result<Vec<_>>>()?;
        // RETURNING order is unspecified; claim order is the contract.
        // rowid breaks same-millisecond ties in insertion order, so two
        // mutations of one record never come back causally inverted.
        entries.sort_by_key(|e| (e.timestamp, e.seq));
        Ok(entries)
    }

    /// Delete successfully applied entries. The remote store is now
    /// authoritative for them; nothing to archive.
    pub async fn complete(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{i}")).collect();
        let sql = format!("DELETE FROM outbox WHERE id IN ({})", placeholders.join(", "));
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        query.execute(&self.pool).await?;
        Ok(())
    }

    /// Record a failed attempt. Exhausting `max_retries` dead-letters the
    /// entry with the error preserved; otherwise it goes back to `pending`
    /// for a later pass.
    pub async fn fail(&self, id: &str, error: &str) -> Result<Status> {
        let now = Utc::now().timestamp_millis();
        let row = sqlx::query(
            "UPDATE outbox SET \
                retry_count = retry_count + 1, \
                status = CASE WHEN retry_count + 1 >= max_retries \
                              THEN 'failed' ELSE 'pending' END, \
                error_message = CASE WHEN retry_count + 1 >= max_retries \
                                     THEN ?2 ELSE error_message END, \
                updated_at = ?3 \
             WHERE id = ?1 \
             RETURNING status",
        )
        .bind(id)
        .bind(error)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let status: String = row.try_get("status").map_err(SyncError::Database)?;
                Status::parse(&status)
            }
            None => Err(SyncError::Unknown(format!("no outbox entry {id}"))),
        }
    }

    /// Dead-letter an entry immediately, skipping the retry budget.
    /// Validation failures land here: retrying a malformed payload can
    /// never succeed.
    pub async fn dead_letter(&self, id: &str, error: &str) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        sqlx::query(
            "UPDATE outbox SET status = 'failed', error_message = ?2, updated_at = ?3 \
             WHERE id = ?1",
        )
        .bind(id)
        .bind(error)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Dead-lettered entries, for operator visibility.
    pub async fn dead_letters(&self) -> Result<Vec<OutboxEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM outbox WHERE status = 'failed' \
             ORDER BY timestamp ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(OutboxEntry::from_row).collect()
    }

    /// Number of entries still waiting to sync.
    pub async fn backlog(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM outbox WHERE status IN ('pending', 'processing')",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}
