//! Batch sync worker.
//!
//! One pass claims outbox entries, turns them into change records, and
//! moves them to the gateway: small batches in one direct request, large
//! ones split into fixed chunks dispatched through a concurrency-limited
//! queue. Chunk failures are isolated, a failing chunk fails only its own
//! entries and never aborts siblings already in flight.
//!
//! The bulk initial-load path pushes whole tables in parameter-ceiling
//! sized chunks and proves convergence with the row-set fingerprint
//! before trusting the remote copy.

use crate::auth::{TokenFetcher, TokenManager};
use crate::error::{Result, SyncError};
use crate::gateway::{ApplyAck, Gateway};
use crate::local::LocalStore;
use crate::outbox::{Outbox, OutboxEntry};
use crate::retry::{retry_with_backoff, BackoffPolicy};
use ferry_engine::{
    integrity, plan, schema, Change, Changeset, RecordChange, SyncPlan, TableKind,
};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Outcome of one sync pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct SyncReport {
    /// Entries claimed from the outbox.
    pub claimed: usize,
    /// Entries durably applied and removed.
    pub applied: usize,
    /// Entries that failed this pass (returned to pending or dead-lettered).
    pub failed: usize,
    /// Pass stopped early by cancellation; unclaimed work stays queued.
    pub cancelled: bool,
}

/// Outcome of a bulk initial load.
#[derive(Debug, Default, Clone, Copy)]
pub struct InitialLoadReport {
    pub pushed: usize,
    pub chunks: usize,
}

/// Drives outbox entries to the gateway.
pub struct SyncWorker<G, F> {
    store: LocalStore,
    outbox: Outbox,
    gateway: Arc<G>,
    tokens: Arc<TokenManager<F>>,
    policy: BackoffPolicy,
    cancel: CancellationToken,
}

impl<G, F> SyncWorker<G, F>
where
    G: Gateway + 'static,
    F: TokenFetcher + 'static,
{
    pub fn new(store: LocalStore, gateway: Arc<G>, tokens: Arc<TokenManager<F>>) -> Self {
        let outbox = Outbox::new(store.pool().clone());
        Self {
            store,
            outbox,
            gateway,
            tokens,
            policy: BackoffPolicy::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_policy(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Token for stopping a pass between chunks. Entries already claimed
    /// but not yet applied stay `processing` and are reclaimed by the
    /// next pass.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run one sync pass over up to `limit` outbox entries.
    pub async fn sync_pass(&self, limit: i64) -> Result<SyncReport> {
        let entries = self.outbox.claim_batch(limit).await?;
        let mut report = SyncReport {
            claimed: entries.len(),
            ..SyncReport::default()
        };
        if entries.is_empty() {
            return Ok(report);
        }

        let mut batch: Vec<(String, RecordChange)> = Vec::with_capacity(entries.len());
        for entry in entries {
            match self.prepare(&entry) {
                Ok(change) => batch.push((entry.id, change)),
                Err(err) => {
                    // a payload that cannot parse will never parse
                    warn!(entry = %entry.id, record = %entry.record_id, error = %err,
                          "dead-lettering unparseable outbox entry");
                    self.outbox.dead_letter(&entry.id, &err.to_string()).await?;
                    report.failed += 1;
                }
            }
        }
        if batch.is_empty() {
            return Ok(report);
        }

        match plan::plan_incremental(batch.len(), plan::DIRECT_APPLY_MAX, plan::DEFAULT_CHUNK_SIZE)
        {
            SyncPlan::Direct => {
                debug!(records = batch.len(), "direct apply");
                let (applied, failed) = self.apply_chunk(batch).await?;
                report.applied += applied;
                report.failed += failed;
            }
            SyncPlan::Chunked { chunk_size } => {
                let (applied, failed, cancelled) =
                    self.apply_chunked(batch, chunk_size).await?;
                report.applied += applied;
                report.failed += failed;
                report.cancelled = cancelled;
            }
        }

        info!(
            claimed = report.claimed,
            applied = report.applied,
            failed = report.failed,
            "sync pass finished"
        );
        Ok(report)
    }

    /// Push every local row to the gateway, table by table, in chunks
    /// sized to the remote parameter ceiling. Each chunk's ack must carry
    /// a fingerprint matching the ids we sent; a mismatch aborts the load
    /// and is reported, never merged around.
    pub async fn initial_load(&self) -> Result<InitialLoadReport> {
        let mut report = InitialLoadReport::default();
        for table in TableKind::ALL {
            let rows = self.store.all_as_new(table).await?;
            if rows.is_empty() {
                continue;
            }
            let chunk_size = plan::bulk_chunk_size(schema::columns(table).len());
            for chunk in rows.chunks(chunk_size) {
                let ids: Vec<&str> = chunk.iter().map(|c| c.id()).collect();
                let mut changes = Changeset::new();
                for change in chunk {
                    changes.push(change.clone());
                }

                let ack =
                    apply_once(&*self.gateway, &self.tokens, self.policy, &changes).await?;
                verify_ack(table, &ids, &ack)?;

                report.pushed += chunk.len();
                report.chunks += 1;
            }
            info!(%table, rows = rows.len(), "bulk load converged");
        }
        Ok(report)
    }

    /// Parse an entry's payload and null out malformed references before
    /// they can reach the remote store's constraints.
    fn prepare(&self, entry: &OutboxEntry) -> Result<RecordChange> {
        let mut change = RecordChange::from_json(entry.table, &entry.data)?;
        for sub in change.sanitize_references() {
            warn!(
                table = %sub.table,
                record = %sub.record_id,
                column = sub.column,
                value = %sub.value,
                "substituted malformed reference with null"
            );
        }
        Ok(change)
    }

    /// Apply one chunk, completing or failing its entries. Returns
    /// (applied, failed) counts.
    async fn apply_chunk(&self, chunk: Vec<(String, RecordChange)>) -> Result<(usize, usize)> {
        apply_and_settle(
            &*self.gateway,
            &self.tokens,
            &self.outbox,
            self.policy,
            chunk,
        )
        .await
    }

    async fn apply_chunked(
        &self,
        batch: Vec<(String, RecordChange)>,
        chunk_size: usize,
    ) -> Result<(usize, usize, bool)> {
        let total = batch.len();
        let chunks = chunk_by_record(batch, chunk_size);
        debug!(records = total, chunks = chunks.len(), "chunked apply");

        let semaphore = Arc::new(Semaphore::new(plan::MAX_CONCURRENT_CHUNKS));
        let mut tasks: JoinSet<Result<(usize, usize)>> = JoinSet::new();
        let mut cancelled = false;

        for chunk in chunks {
            if self.cancel.is_cancelled() {
                // leave the rest processing; the next pass reclaims it
                cancelled = true;
                break;
            }
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| SyncError::Unknown("chunk queue closed".to_string()))?;
            let gateway = self.gateway.clone();
            let tokens = self.tokens.clone();
            let outbox = self.outbox.clone();
            let policy = self.policy;
            tasks.spawn(async move {
                let _permit = permit;
                apply_and_settle(&*gateway, &tokens, &outbox, policy, chunk).await
            });
        }

        let mut applied = 0;
        let mut failed = 0;
        while let Some(joined) = tasks.join_next().await {
            let (a, f) = joined
                .map_err(|err| SyncError::Unknown(format!("chunk task panicked: {err}")))??;
            applied += a;
            failed += f;
        }
        Ok((applied, failed, cancelled))
    }
}

/// Split a batch into chunks of roughly `chunk_size`, never separating
/// entries that target the same row. Chunks are dispatched concurrently,
/// so two mutations of one record in different chunks could commit in
/// either order; keeping them in one chunk keeps them in claim order. A
/// record mutated more times than `chunk_size` travels as one oversized
/// chunk.
fn chunk_by_record(
    batch: Vec<(String, RecordChange)>,
    chunk_size: usize,
) -> Vec<Vec<(String, RecordChange)>> {
    let mut order: Vec<(TableKind, String)> = Vec::new();
    let mut groups: HashMap<(TableKind, String), Vec<(String, RecordChange)>> = HashMap::new();
    for entry in batch {
        let key = (entry.1.table(), entry.1.id().to_string());
        match groups.entry(key) {
            Entry::Occupied(mut slot) => slot.get_mut().push(entry),
            Entry::Vacant(slot) => {
                order.push(slot.key().clone());
                slot.insert(vec![entry]);
            }
        }
    }

    let mut chunks = Vec::new();
    let mut current: Vec<(String, RecordChange)> = Vec::new();
    for key in &order {
        let Some(group) = groups.remove(key) else {
            continue;
        };
        if !current.is_empty() && current.len() + group.len() > chunk_size {
            chunks.push(std::mem::take(&mut current));
        }
        current.extend(group);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Apply a changeset with one fresh-token retry on auth failure, the
/// whole thing wrapped in the backoff schedule for retryable errors.
async fn apply_once<G: Gateway, F: TokenFetcher>(
    gateway: &G,
    tokens: &TokenManager<F>,
    policy: BackoffPolicy,
    changes: &Changeset,
) -> Result<ApplyAck> {
    retry_with_backoff(policy, || async {
        let token = tokens.token().await?;
        match gateway.apply(changes, token.as_str()).await {
            Err(err) if err.is_auth() => {
                debug!("token rejected, retrying once with a fresh one");
                tokens.invalidate().await;
                let fresh = tokens.token().await?;
                gateway.apply(changes, fresh.as_str()).await
            }
            other => other,
        }
    })
    .await
}

/// Apply one chunk and settle its outbox entries: complete on success,
/// dead-letter on validation rejection, fail (with retry budget)
/// otherwise.
async fn apply_and_settle<G: Gateway, F: TokenFetcher>(
    gateway: &G,
    tokens: &TokenManager<F>,
    outbox: &Outbox,
    policy: BackoffPolicy,
    chunk: Vec<(String, RecordChange)>,
) -> Result<(usize, usize)> {
    let mut changes = Changeset::new();
    for (_, change) in &chunk {
        changes.push(change.clone());
    }

    match apply_once(gateway, tokens, policy, &changes).await {
        Ok(_) => {
            let ids: Vec<String> = chunk.into_iter().map(|(id, _)| id).collect();
            let applied = ids.len();
            outbox.complete(&ids).await?;
            Ok((applied, 0))
        }
        Err(SyncError::Validation(err)) => {
            // the gateway rejected the payload; no retry can fix it
            error!(error = %err, records = chunk.len(), "gateway rejected chunk");
            let failed = chunk.len();
            for (id, _) in chunk {
                outbox.dead_letter(&id, &err.to_string()).await?;
            }
            Ok((0, failed))
        }
        Err(err) => {
            warn!(error = %err, records = chunk.len(), "chunk failed, returning to outbox");
            let failed = chunk.len();
            for (id, _) in chunk {
                outbox.fail(&id, &err.to_string()).await?;
            }
            Ok((0, failed))
        }
    }
}

fn verify_ack(table: TableKind, sent_ids: &[&str], ack: &ApplyAck) -> Result<()> {
    let local = integrity::fingerprint(sent_ids);
    match &ack.fingerprint {
        Some(remote) if *remote == local => Ok(()),
        Some(remote) => {
            error!(%table, local = %local, remote = %remote, "bulk load diverged");
            Err(SyncError::Integrity(
                ferry_engine::Error::IntegrityMismatch {
                    local_fingerprint: local,
                    remote_fingerprint: remote.clone(),
                    local_count: sent_ids.len(),
                    remote_count: ack.applied as usize,
                },
            ))
        }
        None => {
            // gateway predates fingerprinting; fall back to the count
            if ack.applied as usize == sent_ids.len() {
                Ok(())
            } else {
                Err(SyncError::Unknown(format!(
                    "bulk chunk sent {} rows, gateway applied {}",
                    sent_ids.len(),
                    ack.applied
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthToken;
    use crate::db;
    use crate::outbox::Status;
    use ferry_engine::TodoChange;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    struct StaticFetcher {
        calls: AtomicUsize,
    }

    impl TokenFetcher for StaticFetcher {
        async fn fetch(&self) -> Result<AuthToken> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(AuthToken::new(format!("token-{n}"), None))
        }
    }

    /// Records per-call batch sizes and the peak number of concurrent
    /// in-flight applies.
    struct RecordingGateway {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        batches: Mutex<Vec<usize>>,
        reject_token: Option<String>,
    }

    impl RecordingGateway {
        fn new() -> Self {
            Self {
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                batches: Mutex::new(Vec::new()),
                reject_token: None,
            }
        }

        fn rejecting(token: &str) -> Self {
            Self {
                reject_token: Some(token.to_string()),
                ..Self::new()
            }
        }
    }

    impl Gateway for RecordingGateway {
        async fn apply(&self, changes: &Changeset, token: &str) -> Result<ApplyAck> {
            if self.reject_token.as_deref() == Some(token) {
                return Err(SyncError::Auth("token expired".into()));
            }
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            self.batches.lock().unwrap().push(changes.len());
            let ids: Vec<String> = changes
                .todos
                .iter()
                .map(|c| c.id.clone())
                .chain(changes.lists.iter().map(|c| c.id.clone()))
                .chain(changes.goals.iter().map(|c| c.id.clone()))
                .collect();
            Ok(ApplyAck {
                applied: ids.len() as u64,
                fingerprint: Some(integrity::fingerprint(&ids)),
            })
        }
    }

    fn todo(id: &str) -> RecordChange {
        RecordChange::Todos(TodoChange {
            id: id.to_string(),
            title: Some(format!("todo {id}")),
            new: true,
            ..Default::default()
        })
    }

    fn fast_policy() -> BackoffPolicy {
        BackoffPolicy {
            max_retries: 1,
            base_delay: Duration::from_millis(1),
            multiplier: 2,
        }
    }

    async fn worker_with(
        gateway: Arc<RecordingGateway>,
        records: usize,
    ) -> SyncWorker<RecordingGateway, StaticFetcher> {
        let store = LocalStore::new(db::open_in_memory().await.unwrap());
        for i in 0..records {
            store.insert_local(&todo(&format!("t{i:04}"))).await.unwrap();
        }
        let tokens = Arc::new(TokenManager::new(StaticFetcher {
            calls: AtomicUsize::new(0),
        }));
        SyncWorker::new(store, gateway, tokens).with_policy(fast_policy())
    }

    #[tokio::test]
    async fn small_batch_goes_direct_in_one_request() {
        let gateway = Arc::new(RecordingGateway::new());
        let worker = worker_with(gateway.clone(), 3).await;

        let report = worker.sync_pass(100).await.unwrap();
        assert_eq!(report.claimed, 3);
        assert_eq!(report.applied, 3);
        assert_eq!(report.failed, 0);
        assert_eq!(*gateway.batches.lock().unwrap(), vec![3]);
        assert_eq!(worker.outbox.backlog().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn large_batch_chunks_with_bounded_concurrency() {
        let gateway = Arc::new(RecordingGateway::new());
        let worker = worker_with(gateway.clone(), 650).await;

        let report = worker.sync_pass(1000).await.unwrap();
        assert_eq!(report.applied, 650);

        let batches = gateway.batches.lock().unwrap();
        // 6 full chunks of 100 plus one of 50
        assert_eq!(batches.len(), 7);
        assert_eq!(batches.iter().sum::<usize>(), 650);
        assert!(batches.iter().all(|&n| n <= plan::DEFAULT_CHUNK_SIZE));
        assert!(gateway.peak.load(Ordering::SeqCst) <= plan::MAX_CONCURRENT_CHUNKS);
        assert_eq!(worker.outbox.backlog().await.unwrap(), 0);
    }

    fn titled_edit(id: &str, title: &str) -> RecordChange {
        RecordChange::Todos(TodoChange {
            id: id.to_string(),
            title: Some(title.to_string()),
            modified_columns: vec!["title".to_string()],
            ..Default::default()
        })
    }

    #[test]
    fn chunking_keeps_all_entries_for_a_record_together() {
        let mut batch = vec![("e0".to_string(), todo("hot"))];
        for i in 0..210 {
            batch.push((format!("e{}", i + 1), todo(&format!("t{i:03}"))));
        }
        batch.push(("e211".to_string(), titled_edit("hot", "later")));

        let chunks = chunk_by_record(batch, 100);
        let hot_per_chunk: Vec<usize> = chunks
            .iter()
            .map(|c| c.iter().filter(|(_, ch)| ch.id() == "hot").count())
            .filter(|&n| n > 0)
            .collect();
        // both "hot" entries land in one chunk, claim order intact
        assert_eq!(hot_per_chunk, vec![2]);
        assert!(chunks.iter().all(|c| c.len() <= 100));
        assert_eq!(chunks.iter().map(Vec::len).sum::<usize>(), 212);
    }

    /// Applies titles in arrival order and stalls whichever request
    /// carries the contended record, so any cross-chunk reordering of its
    /// edits would surface as a stale final title.
    #[derive(Default)]
    struct LastWriteGateway {
        titles: Mutex<HashMap<String, String>>,
        hot_per_batch: Mutex<Vec<usize>>,
    }

    impl Gateway for LastWriteGateway {
        async fn apply(&self, changes: &Changeset, _token: &str) -> Result<ApplyAck> {
            let hot = changes.todos.iter().filter(|c| c.id == "hot").count();
            if hot > 0 {
                self.hot_per_batch.lock().unwrap().push(hot);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            let mut titles = self.titles.lock().unwrap();
            for change in &changes.todos {
                if let Some(title) = &change.title {
                    titles.insert(change.id.clone(), title.clone());
                }
            }
            Ok(ApplyAck {
                applied: changes.len() as u64,
                fingerprint: None,
            })
        }
    }

    #[tokio::test]
    async fn repeated_edits_of_one_record_apply_in_enqueue_order() {
        let gateway = Arc::new(LastWriteGateway::default());
        let store = LocalStore::new(db::open_in_memory().await.unwrap());

        // two edits of one row straddling enough fillers to force several
        // concurrently dispatched chunks between them
        store.insert_local(&todo("hot")).await.unwrap();
        store.update_local(&titled_edit("hot", "first")).await.unwrap();
        for i in 0..520 {
            store.insert_local(&todo(&format!("f{i:04}"))).await.unwrap();
        }
        store.update_local(&titled_edit("hot", "second")).await.unwrap();

        let tokens = Arc::new(TokenManager::new(StaticFetcher {
            calls: AtomicUsize::new(0),
        }));
        let worker = SyncWorker::new(store, gateway.clone(), tokens).with_policy(fast_policy());

        let report = worker.sync_pass(1000).await.unwrap();
        assert_eq!(report.applied, 523);

        // all three mutations travelled together, and the newest edit won
        assert_eq!(*gateway.hot_per_batch.lock().unwrap(), vec![3]);
        assert_eq!(
            gateway.titles.lock().unwrap().get("hot").map(String::as_str),
            Some("second")
        );
    }

    #[tokio::test]
    async fn rejected_token_is_invalidated_and_retried_once() {
        // the first issued token ("token-0") is rejected; the retry path
        // must invalidate and apply with "token-1"
        let gateway = Arc::new(RecordingGateway::rejecting("token-0"));
        let worker = worker_with(gateway.clone(), 2).await;

        let report = worker.sync_pass(100).await.unwrap();
        assert_eq!(report.applied, 2);
        assert_eq!(worker.outbox.backlog().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unparseable_entry_is_dead_lettered_not_retried() {
        let gateway = Arc::new(RecordingGateway::new());
        let worker = worker_with(gateway.clone(), 1).await;
        {
            let mut conn = worker.store.pool().acquire().await.unwrap();
            crate::outbox::enqueue(
                &mut *conn,
                TableKind::Todos,
                crate::outbox::Operation::Insert,
                "bad",
                "{not json",
            )
            .await
            .unwrap();
        }

        let report = worker.sync_pass(100).await.unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(report.failed, 1);

        let dead = worker.outbox.dead_letters().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].record_id, "bad");
        assert_eq!(dead[0].status, Status::Failed);
    }

    #[tokio::test]
    async fn cancellation_leaves_remaining_entries_claimable() {
        let gateway = Arc::new(RecordingGateway::new());
        let worker = worker_with(gateway.clone(), 550).await;
        worker.cancellation_token().cancel();

        let report = worker.sync_pass(1000).await.unwrap();
        assert!(report.cancelled);
        assert_eq!(report.applied, 0);
        // everything stays queued for the next pass
        assert_eq!(worker.outbox.backlog().await.unwrap(), 550);
        assert_eq!(
            worker.outbox.claim_batch(1000).await.unwrap().len(),
            550
        );
    }

    #[tokio::test]
    async fn initial_load_pushes_whole_tables_and_verifies() {
        let gateway = Arc::new(RecordingGateway::new());
        let store = LocalStore::new(db::open_in_memory().await.unwrap());
        for i in 0..120 {
            store.apply_remote(&todo(&format!("t{i:04}"))).await.unwrap();
        }
        let tokens = Arc::new(TokenManager::new(StaticFetcher {
            calls: AtomicUsize::new(0),
        }));
        let worker =
            SyncWorker::new(store, gateway.clone(), tokens).with_policy(fast_policy());

        let report = worker.initial_load().await.unwrap();
        assert_eq!(report.pushed, 120);
        // todos have 8 columns: 999 / 8 = 124 rows per chunk
        assert_eq!(report.chunks, 1);
    }

    #[tokio::test]
    async fn diverged_bulk_ack_is_an_error() {
        struct LyingGateway;
        impl Gateway for LyingGateway {
            async fn apply(&self, changes: &Changeset, _token: &str) -> Result<ApplyAck> {
                Ok(ApplyAck {
                    applied: changes.len() as u64,
                    fingerprint: Some("not-the-right-fingerprint".into()),
                })
            }
        }

        let store = LocalStore::new(db::open_in_memory().await.unwrap());
        store.apply_remote(&todo("t1")).await.unwrap();
        let tokens = Arc::new(TokenManager::new(StaticFetcher {
            calls: AtomicUsize::new(0),
        }));
        let worker =
            SyncWorker::new(store, Arc::new(LyingGateway), tokens).with_policy(fast_policy());

        let err = worker.initial_load().await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::Integrity(ferry_engine::Error::IntegrityMismatch { .. })
        ));
        assert!(!err.is_retryable());
    }
}
