//! Batch planning for the sync optimizer.
//!
//! Two regimes: a small incremental batch goes to the gateway in one
//! transaction; a large one is split into fixed-size chunks dispatched
//! through a concurrency-limited queue. Bulk initial loads are chunked
//! only to stay under a statement parameter-count ceiling, since every row
//! is already known to be absent remotely.

/// Batches at or below this size are applied directly in one transaction.
pub const DIRECT_APPLY_MAX: usize = 500;

/// Chunk size for batches above [`DIRECT_APPLY_MAX`].
pub const DEFAULT_CHUNK_SIZE: usize = 100;

/// Maximum chunk requests in flight at once.
pub const MAX_CONCURRENT_CHUNKS: usize = 3;

/// Ceiling on bound parameters per bulk statement.
pub const PARAM_CEILING: usize = 999;

/// How a batch of change records should reach the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPlan {
    /// Apply the whole batch in a single request.
    Direct,
    /// Split into fixed-size chunks and dispatch them concurrently.
    Chunked { chunk_size: usize },
}

/// Choose a plan for an incremental batch of `total` records.
pub fn plan_incremental(total: usize, direct_max: usize, chunk_size: usize) -> SyncPlan {
    if total <= direct_max {
        SyncPlan::Direct
    } else {
        SyncPlan::Chunked {
            chunk_size: chunk_size.max(1),
        }
    }
}

/// Number of chunks a batch splits into.
pub fn chunk_count(total: usize, chunk_size: usize) -> usize {
    total.div_ceil(chunk_size.max(1))
}

/// Rows per multi-row upsert for a bulk load, sized so a statement for a
/// table with `column_count` columns stays under [`PARAM_CEILING`]
/// parameters. Wide tables land around 50 rows; narrow ones fit more.
pub fn bulk_chunk_size(column_count: usize) -> usize {
    (PARAM_CEILING / column_count.max(1)).max(1)
}
