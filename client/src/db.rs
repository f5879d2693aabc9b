//! Local SQLite store bootstrap.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

/// Type alias for the local database pool.
pub type Pool = SqlitePool;

/// Local schema: the three domain tables plus the durable outbox.
///
/// Outbox entries are created in the same transaction as the domain write
/// they represent, so a crash never leaves one without the other.
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS lists (
        id TEXT PRIMARY KEY,
        name TEXT,
        color TEXT,
        sort_order INTEGER,
        created TEXT,
        modified TEXT
    )",
    "CREATE TABLE IF NOT EXISTS goals (
        id TEXT PRIMARY KEY,
        title TEXT,
        description TEXT,
        target_date TEXT,
        created TEXT,
        modified TEXT
    )",
    "CREATE TABLE IF NOT EXISTS todos (
        id TEXT PRIMARY KEY,
        list_id TEXT,
        goal_id TEXT,
        title TEXT,
        completed INTEGER,
        deleted INTEGER NOT NULL DEFAULT 0,
        created TEXT,
        modified TEXT
    )",
    "CREATE TABLE IF NOT EXISTS outbox (
        id TEXT PRIMARY KEY,
        table_name TEXT NOT NULL,
        operation TEXT NOT NULL,
        record_id TEXT NOT NULL,
        data TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        retry_count INTEGER NOT NULL DEFAULT 0,
        max_retries INTEGER NOT NULL DEFAULT 3,
        status TEXT NOT NULL DEFAULT 'pending',
        error_message TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_outbox_status ON outbox (status)",
    "CREATE INDEX IF NOT EXISTS idx_outbox_timestamp ON outbox (timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_outbox_record ON outbox (table_name, record_id)",
];

/// Open (creating if missing) the local database and ensure the schema.
pub async fn open(path: &str) -> Result<Pool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(path)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    init_schema(&pool).await?;
    Ok(pool)
}

/// In-memory database for tests.
pub async fn open_in_memory() -> Result<Pool, sqlx::Error> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    init_schema(&pool).await?;
    Ok(pool)
}

async fn init_schema(pool: &Pool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
