//! Write-through apply: one changeset, one transaction.
//!
//! Statement construction is pure and separate from execution so the
//! per-record dispositions and the run-collapsing of consecutive upserts
//! can be tested without a live database. Execution order is parents
//! before children: lists and goals commit before the todos that
//! reference them.

use crate::db::Pool;
use crate::error::Result;
use chrono::{DateTime, Utc};
use ferry_engine::{
    disposition, fingerprint, plan, schema, sql, Change, Changeset, ColumnType, ColumnValue,
    Dialect, Disposition, SqlStatement,
};
use sqlx::PgConnection;
use tracing::debug;

/// What a committed changeset looked like from the database's side.
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    /// Records processed (no-ops included; they are acknowledged work).
    pub applied: u64,
    /// Fingerprint over every record id in the changeset, for the
    /// client's convergence check.
    pub fingerprint: String,
}

/// Apply a whole changeset in a single transaction. Any failure rolls
/// the entire changeset back.
pub async fn apply_changeset(pool: &Pool, changes: &Changeset) -> Result<ApplyOutcome> {
    let now = Utc::now();
    let mut ids: Vec<String> = Vec::with_capacity(changes.len());
    collect_ids(&changes.lists, &mut ids);
    collect_ids(&changes.goals, &mut ids);
    collect_ids(&changes.todos, &mut ids);

    let mut tx = pool.begin().await?;
    for stmt in table_statements(&changes.lists, now)
        .iter()
        .chain(table_statements(&changes.goals, now).iter())
        .chain(table_statements(&changes.todos, now).iter())
    {
        execute(&mut tx, stmt).await?;
    }
    tx.commit().await?;

    debug!(applied = ids.len(), "changeset committed");
    Ok(ApplyOutcome {
        applied: ids.len() as u64,
        fingerprint: fingerprint(&ids),
    })
}

fn collect_ids<C: Change>(records: &[C], ids: &mut Vec<String>) {
    ids.extend(records.iter().map(|c| c.id().to_string()));
}

/// Build the statements for one table's records, in record order. A run
/// of consecutive upserts collapses into multi-row statements chunked
/// under the parameter ceiling; no-ops produce nothing.
pub fn table_statements<C: Change>(records: &[C], now: DateTime<Utc>) -> Vec<SqlStatement> {
    let mut statements = Vec::new();
    let mut i = 0;
    while i < records.len() {
        let change = &records[i];
        match disposition(change) {
            Disposition::Upsert => {
                let mut j = i + 1;
                while j < records.len()
                    && matches!(disposition(&records[j]), Disposition::Upsert)
                {
                    j += 1;
                }
                let run = &records[i..j];
                if run.len() == 1 {
                    statements.push(sql::upsert(change, Dialect::Postgres));
                } else {
                    let table = change.table();
                    let chunk_size = plan::bulk_chunk_size(schema::columns(table).len());
                    for chunk in run.chunks(chunk_size) {
                        statements.push(sql::bulk_upsert(chunk, table, Dialect::Postgres));
                    }
                }
                i = j;
            }
            Disposition::HardDelete => {
                statements.push(sql::delete(change.table(), change.id(), Dialect::Postgres));
                i += 1;
            }
            Disposition::Update(columns) => {
                statements.push(sql::update_columns(change, &columns, now, Dialect::Postgres));
                i += 1;
            }
            Disposition::Noop => {
                // acknowledged but must not touch the row
                i += 1;
            }
        }
    }
    statements
}

async fn execute(conn: &mut PgConnection, stmt: &SqlStatement) -> Result<u64> {
    let mut query = sqlx::query(&stmt.sql);
    for value in &stmt.binds {
        query = match value {
            ColumnValue::Text(v) => query.bind(v.clone()),
            ColumnValue::Bool(v) => query.bind(*v),
            ColumnValue::Int(v) => query.bind(*v),
            ColumnValue::Timestamp(v) => query.bind(*v),
            ColumnValue::Null(ColumnType::Text) => query.bind(Option::<String>::None),
            ColumnValue::Null(ColumnType::Bool) => query.bind(Option::<bool>::None),
            ColumnValue::Null(ColumnType::Int) => query.bind(Option::<i64>::None),
            ColumnValue::Null(ColumnType::Timestamp) => {
                query.bind(Option::<DateTime<Utc>>::None)
            }
        };
    }
    let done = query.execute(conn).await?;
    Ok(done.rows_affected())
}
