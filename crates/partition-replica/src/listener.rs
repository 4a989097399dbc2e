use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use engine_primitives::{sorted_unique_row_ids, BinaryRow, IndexId, LockKey, LockMode, PartitionId, RowId, TableId, TablePartitionId, Timestamp};
use lock_manager::{LockManager, ShortTermLock};
use mvcc_storage::{HeadSnapshot, LowWatermark, ReadResultKind, StorageUpdateHandler};
use parking_lot::Mutex;
use replication_api::{
    BuildIndexCommand, BuildIndexReplicaRequest, Command, DirectReadOnlyRequest, PlacementDriverClient, ReadOnlyRequest,
    ReadWriteRequest, ReplicaSafeTimeSyncRequest, ReplicatedLogClient, SafeTimeSyncCommand, TxCleanupCommand, TxCleanupReplicaRequest,
    TxContext, TxFinishReplicaRequest, TxStateCommitPartitionRequest, TxStateCommitPartitionResponse, UpdateCommand,
};
use rustc_hash::FxHashMap;
use schema_compat::{EnlistedTable, SchemaCompatibilityValidator};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, instrument};
use tx_state::{CommitPartitionTxStates, TransactionStateResolver, TxState};
use uuid::Uuid;

use crate::config::ReplicaConfig;
use crate::cursor::CursorRegistry;
use crate::dispatch::PartitionCleanupDispatcher;
use crate::error::ReplicaError;
use crate::index_builder::IndexBuilder;
use crate::primary::{await_primary_replica, ensure_replica_is_primary, is_primary_now};
use crate::response::ReplicaResponse;
use crate::safe_time::SafeTimeTracker;

/// The primary-key index id a replica locks a short-term key on before an
/// insert/upsert/delete durably lands (spec §4.1, "Short-term index locks").
/// Real secondary-index identifiers live in the catalog, out of scope here
/// (spec §1); every row in this core has exactly one implicit PK index.
const PK_INDEX_ID: IndexId = IndexId(0);

/// Everything a partition replica needs to answer the request taxonomy of
/// spec §6, composed from the seven collaborating crates of spec §2. One
/// instance owns exactly one `(table, partition)` group — the thing spec §1
/// calls "the partition replica listener", assembled here rather than
/// spread across a framework of dependency-injected services.
pub struct ReplicaListener {
    group: TablePartitionId,
    config: ReplicaConfig,
    coordinator_id: String,
    clock: Arc<engine_hlc::HybridClock>,
    lock_manager: Arc<LockManager>,
    update_handler: Arc<StorageUpdateHandler>,
    low_watermark: Arc<LowWatermark>,
    tx_states: Arc<CommitPartitionTxStates>,
    tx_resolver: Arc<dyn TransactionStateResolver>,
    schema_validator: Arc<SchemaCompatibilityValidator>,
    catalog_sync: Arc<dyn replication_api::CatalogSyncService>,
    log: Arc<dyn ReplicatedLogClient>,
    placement: Arc<dyn PlacementDriverClient>,
    cleanup_dispatcher: Arc<dyn PartitionCleanupDispatcher>,
    index_builder: Option<Arc<dyn IndexBuilder>>,
    cursors: CursorRegistry,
    safe_time: SafeTimeTracker,
    /// The linearization mutex (spec GLOSSARY, "Linearization mutex" /
    /// "Consistent section"): serializes command application within this
    /// replica so a multi-row write's row and index updates land as one
    /// atomic unit from any reader's perspective. The per-row locks in
    /// [`lock_manager`] already keep concurrent *transactions* from tearing
    /// each other's writes; this mutex additionally keeps this replica's own
    /// apply path from interleaving two commands that touch overlapping
    /// rows within one logical unit of application. Deliberately *not*
    /// threaded through [`mvcc_storage::PartitionStorage`] — that trait's
    /// contract is per-row and already race-free; the "consistent section"
    /// is a property of how the listener drives it, not of the storage
    /// engine itself.
    linearize: AsyncMutex<()>,
    /// This node's current enlistment token, as last observed from a
    /// primary-replica election (set via [`Self::set_enlistment_token`]).
    /// Cluster membership / leader election itself is out of scope (spec
    /// §1); this is the minimal state `handle_tx_state_commit_partition`
    /// needs to tell "am I the one the placement driver currently trusts".
    self_token: AtomicU64,
    tx_begin_ts: Mutex<FxHashMap<Uuid, Timestamp>>,
}

#[allow(clippy::too_many_arguments)]
impl ReplicaListener {
    pub fn new(
        group: TablePartitionId,
        config: ReplicaConfig,
        coordinator_id: impl Into<String>,
        clock: Arc<engine_hlc::HybridClock>,
        lock_manager: Arc<LockManager>,
        update_handler: Arc<StorageUpdateHandler>,
        low_watermark: Arc<LowWatermark>,
        tx_states: Arc<CommitPartitionTxStates>,
        tx_resolver: Arc<dyn TransactionStateResolver>,
        schema_validator: Arc<SchemaCompatibilityValidator>,
        catalog_sync: Arc<dyn replication_api::CatalogSyncService>,
        log: Arc<dyn ReplicatedLogClient>,
        placement: Arc<dyn PlacementDriverClient>,
        cleanup_dispatcher: Arc<dyn PartitionCleanupDispatcher>,
        index_builder: Option<Arc<dyn IndexBuilder>>,
    ) -> Self {
        ReplicaListener {
            group,
            config,
            coordinator_id: coordinator_id.into(),
            clock,
            lock_manager,
            update_handler,
            low_watermark,
            tx_states,
            tx_resolver,
            schema_validator,
            catalog_sync,
            log,
            placement,
            cleanup_dispatcher,
            index_builder,
            cursors: CursorRegistry::new(),
            safe_time: SafeTimeTracker::new(),
            linearize: AsyncMutex::new(()),
            self_token: AtomicU64::new(0),
            tx_begin_ts: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn group(&self) -> TablePartitionId {
        self.group
    }

    pub fn safe_time(&self) -> Timestamp {
        self.safe_time.current()
    }

    pub fn low_watermark(&self) -> &Arc<LowWatermark> {
        &self.low_watermark
    }

    /// Crash recovery (spec §4.2 SUPPLEMENT): called once after construction,
    /// before this replica starts serving requests, to resolve every row
    /// whose version chain head is still a write intent left over from
    /// before a restart. Returns the number of intents resolved.
    pub async fn recover_orphan_intents(&self) -> usize {
        mvcc_storage::recover_orphan_intents(&self.update_handler, self.tx_resolver.as_ref(), self.clock.now()).await
    }

    /// Records the token this node was last granted as the primary replica
    /// of `group`, for [`Self::handle_tx_state_commit_partition`]'s
    /// is-it-still-me check. Called by whatever subscribes this node to
    /// [`replication_api::PlacementDriverClient::subscribe_primary_replica_expired`]
    /// / leader-elected events — outside this crate's scope per spec §1.
    pub fn set_enlistment_token(&self, token: u64) {
        self.self_token.store(token, Ordering::SeqCst);
    }

    fn pk_index_key(&self, row_id: RowId) -> LockKey {
        LockKey::IndexKey(PK_INDEX_ID, Bytes::copy_from_slice(row_id.uuid.as_bytes()))
    }

    async fn acquire_table(&self, tx_id: Uuid, mode: LockMode) {
        self.lock_manager.acquire(tx_id, LockKey::Table(self.group.table_id), mode).await;
    }

    async fn acquire_row(&self, tx_id: Uuid, row_id: RowId, mode: LockMode) {
        self.lock_manager.acquire(tx_id, LockKey::Row(self.group.table_id, row_id), mode).await;
    }

    async fn acquire_short_term_index_lock(&self, tx_id: Uuid, row_id: RowId) -> ShortTermLock {
        let lock = self.lock_manager.acquire(tx_id, self.pk_index_key(row_id), LockMode::X).await;
        ShortTermLock::new(self.lock_manager.clone(), lock)
    }

    fn peek_last_commit_ts(&self, row_id: RowId) -> Option<Timestamp> {
        match self.update_handler.storage().peek_head(row_id) {
            HeadSnapshot::Intent { newest_committed_ts, .. } | HeadSnapshot::NoIntent { newest_committed_ts } => newest_committed_ts,
        }
    }

    fn read_now(&self, row_id: RowId) -> Option<BinaryRow> {
        self.update_handler.storage().read(row_id, self.clock.now()).row
    }

    /// Tracks the timestamp a transaction was first seen by this replica,
    /// and — if this group is the transaction's chosen commit partition —
    /// registers it with [`CommitPartitionTxStates`] (spec §3,
    /// "TransactionMeta: created at first enlisting write").
    fn record_tx_enlist(&self, ctx: &TxContext) {
        self.tx_begin_ts.lock().entry(ctx.tx_id).or_insert_with(|| self.clock.now());
        if ctx.commit_partition == self.group {
            self.tx_states.begin(ctx.tx_id, self.coordinator_id.clone());
        }
    }

    fn tx_begin_ts(&self, tx_id: Uuid) -> Timestamp {
        self.tx_begin_ts.lock().get(&tx_id).copied().unwrap_or_else(|| self.clock.now())
    }

    fn forget_tx_begin_ts(&self, tx_id: Uuid) {
        self.tx_begin_ts.lock().remove(&tx_id);
    }

    // ---------------------------------------------------------------
    // Read-write requests (spec §4.3, §6)
    // ---------------------------------------------------------------

    /// Spec §4.3 / §6 "Single-phase commit (1PC) path": a `full` request is
    /// its own complete transaction, with no later `TX_FINISH`/`TX_CLEANUP`
    /// to release its locks or forget its tracked state — this replica does
    /// both immediately once the request is done, success or not, rather
    /// than enlisting it into the ordinary multi-statement machinery.
    #[instrument(skip(self, request), fields(group = %self.group))]
    pub async fn handle_read_write(&self, request: ReadWriteRequest) -> Result<ReplicaResponse, ReplicaError> {
        let ctx = request_ctx(&request);
        let meta = await_primary_replica(&self.placement, self.group, self.config.primary_replica_await_timeout).await?;
        ensure_replica_is_primary(&meta, ctx.term as u64, self.clock.now())?;
        if !ctx.full {
            self.record_tx_enlist(&ctx);
        }

        let result = match request {
            ReadWriteRequest::Get { ctx, row_id } => self.rw_get(&ctx, row_id).await,
            ReadWriteRequest::GetAll { ctx, row_ids } => self.rw_get_all(&ctx, row_ids).await,
            ReadWriteRequest::Insert { ctx, row_id, row } => self.rw_insert(&ctx, row_id, row).await,
            ReadWriteRequest::Upsert { ctx, row_id, row } => self.rw_upsert(&ctx, row_id, row).await,
            ReadWriteRequest::GetAndUpsert { ctx, row_id, row } => self.rw_get_and_upsert(&ctx, row_id, row).await,
            ReadWriteRequest::ReplaceIfExist { ctx, row_id, row } => self.rw_replace_if_exist(&ctx, row_id, row).await,
            ReadWriteRequest::GetAndReplace { ctx, row_id, row } => self.rw_get_and_replace(&ctx, row_id, row).await,
            ReadWriteRequest::Replace { ctx, row_id, old_row, new_row } => self.rw_replace_cas(&ctx, row_id, old_row, new_row).await,
            ReadWriteRequest::Delete { ctx, row_id } => self.rw_delete(&ctx, row_id).await,
            ReadWriteRequest::GetAndDelete { ctx, row_id } => self.rw_get_and_delete(&ctx, row_id).await,
            ReadWriteRequest::DeleteExact { ctx, row_id, expected_row } => self.rw_delete_exact(&ctx, row_id, expected_row).await,
            ReadWriteRequest::ScanRetrieveBatch { ctx, index_id, batch_size } => {
                self.rw_scan_retrieve_batch(&ctx, index_id, batch_size).await
            }
        };

        if ctx.full {
            self.lock_manager.release_all(ctx.tx_id);
        }
        result
    }

    async fn rw_get(&self, ctx: &TxContext, row_id: RowId) -> Result<ReplicaResponse, ReplicaError> {
        self.acquire_table(ctx.tx_id, LockMode::IS).await;
        self.acquire_row(ctx.tx_id, row_id, LockMode::S).await;
        Ok(ReplicaResponse::Row(self.read_now(row_id)))
    }

    async fn rw_get_all(&self, ctx: &TxContext, row_ids: Vec<RowId>) -> Result<ReplicaResponse, ReplicaError> {
        self.acquire_table(ctx.tx_id, LockMode::IS).await;
        for row_id in sorted_unique_row_ids(row_ids.clone()) {
            self.acquire_row(ctx.tx_id, row_id, LockMode::S).await;
        }
        let rows = row_ids.into_iter().map(|row_id| self.read_now(row_id)).collect();
        Ok(ReplicaResponse::Rows(rows))
    }

    async fn rw_insert(&self, ctx: &TxContext, row_id: RowId, row: BinaryRow) -> Result<ReplicaResponse, ReplicaError> {
        self.acquire_table(ctx.tx_id, LockMode::IX).await;
        self.acquire_row(ctx.tx_id, row_id, LockMode::X).await;
        let index_lock = self.acquire_short_term_index_lock(ctx.tx_id, row_id).await;
        self.perform_single_row_write(ctx, row_id, Some(row)).await?;
        index_lock.release_now();
        Ok(ReplicaResponse::Applied)
    }

    async fn rw_upsert(&self, ctx: &TxContext, row_id: RowId, row: BinaryRow) -> Result<ReplicaResponse, ReplicaError> {
        self.acquire_table(ctx.tx_id, LockMode::IX).await;
        self.acquire_row(ctx.tx_id, row_id, LockMode::X).await;
        let index_lock = self.acquire_short_term_index_lock(ctx.tx_id, row_id).await;
        self.perform_single_row_write(ctx, row_id, Some(row)).await?;
        index_lock.release_now();
        Ok(ReplicaResponse::Applied)
    }

    async fn rw_get_and_upsert(&self, ctx: &TxContext, row_id: RowId, row: BinaryRow) -> Result<ReplicaResponse, ReplicaError> {
        self.acquire_table(ctx.tx_id, LockMode::IX).await;
        self.acquire_row(ctx.tx_id, row_id, LockMode::X).await;
        let previous = self.read_now(row_id);
        let index_lock = self.acquire_short_term_index_lock(ctx.tx_id, row_id).await;
        self.perform_single_row_write(ctx, row_id, Some(row)).await?;
        index_lock.release_now();
        Ok(ReplicaResponse::PreviousRow(previous))
    }

    async fn rw_replace_if_exist(&self, ctx: &TxContext, row_id: RowId, row: BinaryRow) -> Result<ReplicaResponse, ReplicaError> {
        self.acquire_table(ctx.tx_id, LockMode::IX).await;
        self.acquire_row(ctx.tx_id, row_id, LockMode::S).await;
        if self.read_now(row_id).is_none() {
            return Ok(ReplicaResponse::ConditionResult(false));
        }
        self.acquire_row(ctx.tx_id, row_id, LockMode::X).await;
        let index_lock = self.acquire_short_term_index_lock(ctx.tx_id, row_id).await;
        self.perform_single_row_write(ctx, row_id, Some(row)).await?;
        index_lock.release_now();
        Ok(ReplicaResponse::ConditionResult(true))
    }

    async fn rw_get_and_replace(&self, ctx: &TxContext, row_id: RowId, row: BinaryRow) -> Result<ReplicaResponse, ReplicaError> {
        self.acquire_table(ctx.tx_id, LockMode::IX).await;
        self.acquire_row(ctx.tx_id, row_id, LockMode::S).await;
        let previous = self.read_now(row_id);
        if previous.is_none() {
            return Ok(ReplicaResponse::PreviousRow(None));
        }
        self.acquire_row(ctx.tx_id, row_id, LockMode::X).await;
        let index_lock = self.acquire_short_term_index_lock(ctx.tx_id, row_id).await;
        self.perform_single_row_write(ctx, row_id, Some(row)).await?;
        index_lock.release_now();
        Ok(ReplicaResponse::PreviousRow(previous))
    }

    async fn rw_replace_cas(&self, ctx: &TxContext, row_id: RowId, old_row: BinaryRow, new_row: BinaryRow) -> Result<ReplicaResponse, ReplicaError> {
        self.acquire_table(ctx.tx_id, LockMode::IX).await;
        self.acquire_row(ctx.tx_id, row_id, LockMode::S).await;
        let matches = self.read_now(row_id).as_ref() == Some(&old_row);
        if !matches {
            return Ok(ReplicaResponse::ConditionResult(false));
        }
        self.acquire_row(ctx.tx_id, row_id, LockMode::X).await;
        let index_lock = self.acquire_short_term_index_lock(ctx.tx_id, row_id).await;
        self.perform_single_row_write(ctx, row_id, Some(new_row)).await?;
        index_lock.release_now();
        Ok(ReplicaResponse::ConditionResult(true))
    }

    async fn rw_delete(&self, ctx: &TxContext, row_id: RowId) -> Result<ReplicaResponse, ReplicaError> {
        self.acquire_table(ctx.tx_id, LockMode::IX).await;
        self.acquire_row(ctx.tx_id, row_id, LockMode::X).await;
        let index_lock = self.acquire_short_term_index_lock(ctx.tx_id, row_id).await;
        self.perform_single_row_write(ctx, row_id, None).await?;
        index_lock.release_now();
        Ok(ReplicaResponse::Applied)
    }

    async fn rw_get_and_delete(&self, ctx: &TxContext, row_id: RowId) -> Result<ReplicaResponse, ReplicaError> {
        self.acquire_table(ctx.tx_id, LockMode::IX).await;
        self.acquire_row(ctx.tx_id, row_id, LockMode::X).await;
        let previous = self.read_now(row_id);
        let index_lock = self.acquire_short_term_index_lock(ctx.tx_id, row_id).await;
        self.perform_single_row_write(ctx, row_id, None).await?;
        index_lock.release_now();
        Ok(ReplicaResponse::PreviousRow(previous))
    }

    async fn rw_delete_exact(&self, ctx: &TxContext, row_id: RowId, expected_row: BinaryRow) -> Result<ReplicaResponse, ReplicaError> {
        self.acquire_table(ctx.tx_id, LockMode::IX).await;
        self.acquire_row(ctx.tx_id, row_id, LockMode::S).await;
        let matches = self.read_now(row_id).as_ref() == Some(&expected_row);
        if !matches {
            return Ok(ReplicaResponse::ConditionResult(false));
        }
        self.acquire_row(ctx.tx_id, row_id, LockMode::X).await;
        let index_lock = self.acquire_short_term_index_lock(ctx.tx_id, row_id).await;
        self.perform_single_row_write(ctx, row_id, None).await?;
        index_lock.release_now();
        Ok(ReplicaResponse::ConditionResult(true))
    }

    async fn rw_scan_retrieve_batch(&self, ctx: &TxContext, index_id: IndexId, batch_size: u32) -> Result<ReplicaResponse, ReplicaError> {
        self.acquire_table(ctx.tx_id, LockMode::IS).await;
        self.lock_manager.acquire(ctx.tx_id, LockKey::Index(index_id), LockMode::IS).await;

        let (batch, exhausted) = self.retrieve_or_open_cursor(ctx.tx_id, index_id, batch_size as usize);
        let mut rows = Vec::with_capacity(batch.len());
        for row_id in batch {
            self.acquire_row(ctx.tx_id, row_id, LockMode::S).await;
            rows.push((row_id, self.read_now(row_id)));
        }
        Ok(ReplicaResponse::ScanBatch { rows, exhausted })
    }

    /// Opens a cursor over the (sorted) row ids currently in storage on the
    /// first retrieve-batch call for `(owner, index_id)`, otherwise
    /// continues the already-open one. A real secondary-index structure is
    /// out of scope (spec §1); sorted `RowId` order over what storage
    /// currently holds stands in for "index traversal order".
    fn retrieve_or_open_cursor(&self, owner: Uuid, index_id: IndexId, batch_size: usize) -> (Vec<RowId>, bool) {
        if let Some(result) = self.cursors.retrieve_batch(owner, index_id, batch_size) {
            return result;
        }
        let mut row_ids = self.update_handler.storage().row_ids();
        row_ids.sort_unstable();
        self.cursors.open(owner, index_id, row_ids);
        self.cursors.retrieve_batch(owner, index_id, batch_size).unwrap_or((Vec::new(), true))
    }

    /// Appends an `UpdateCommand` and applies it locally (spec §4.2,
    /// `handleUpdate`; spec §5, "delayed acknowledgement"). For a non-1PC
    /// write, the local apply happens *before* awaiting the append's
    /// durability confirmation whenever doing so wouldn't regress this
    /// replica's safe-time tracker — hiding replication latency from the
    /// caller on the common path — and after otherwise.
    async fn perform_single_row_write(&self, ctx: &TxContext, row_id: RowId, row: Option<BinaryRow>) -> Result<(), ReplicaError> {
        let _section = self.linearize.lock().await;

        let required_catalog_version = self.catalog_sync.wait_for_metadata_completeness(self.clock.now()).await;
        let last_commit_timestamp = self.peek_last_commit_ts(row_id);
        let commit_ts = if ctx.full { Some(self.clock.now()) } else { None };
        let cmd = UpdateCommand {
            table_partition_id: self.group,
            row_uuid: row_id.uuid,
            row_message: row.clone(),
            tx_id: ctx.tx_id,
            safe_time: self.clock.now(),
            full: ctx.full,
            last_commit_timestamp,
            required_catalog_version,
            tx_coordinator_id: self.coordinator_id.clone(),
        };

        if ctx.full {
            let safe_time = self.log.append(self.group, Command::Update(cmd)).await?;
            self.safe_time.advance(safe_time);
            self.update_handler
                .handle_update(ctx.tx_id, row_id, ctx.commit_partition, row, false, commit_ts, last_commit_timestamp)?;
            return Ok(());
        }

        let pre_apply = cmd.safe_time > self.safe_time.current();
        let append_fut = self.log.append(self.group, Command::Update(cmd));
        if pre_apply {
            self.update_handler
                .handle_update(ctx.tx_id, row_id, ctx.commit_partition, row.clone(), true, commit_ts, last_commit_timestamp)?;
        }
        let safe_time = append_fut.await?;
        self.safe_time.advance(safe_time);
        if !pre_apply {
            self.update_handler
                .handle_update(ctx.tx_id, row_id, ctx.commit_partition, row, true, commit_ts, last_commit_timestamp)?;
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Read-only requests (spec §4.3, §6)
    // ---------------------------------------------------------------

    #[instrument(skip(self, request), fields(group = %self.group))]
    pub async fn handle_read_only(&self, request: ReadOnlyRequest) -> Result<ReplicaResponse, ReplicaError> {
        match request {
            ReadOnlyRequest::Get { tx_id, row_id, read_timestamp } => {
                Ok(ReplicaResponse::Row(self.resolve_at(tx_id, row_id, read_timestamp).await?))
            }
            ReadOnlyRequest::GetAll { tx_id, row_ids, read_timestamp } => {
                let mut rows = Vec::with_capacity(row_ids.len());
                for row_id in row_ids {
                    rows.push(self.resolve_at(tx_id, row_id, read_timestamp).await?);
                }
                Ok(ReplicaResponse::Rows(rows))
            }
            ReadOnlyRequest::Scan { tx_id, index_id, read_timestamp } => {
                let (batch, exhausted) = self.retrieve_or_open_cursor(tx_id, index_id, self.config.on_update_batch_size);
                let mut rows = Vec::with_capacity(batch.len());
                for row_id in batch {
                    rows.push((row_id, self.resolve_at(tx_id, row_id, read_timestamp).await?));
                }
                Ok(ReplicaResponse::ScanBatch { rows, exhausted })
            }
        }
    }

    #[instrument(skip(self), fields(group = %self.group))]
    pub async fn handle_direct_read_only(&self, request: DirectReadOnlyRequest) -> Result<ReplicaResponse, ReplicaError> {
        match request {
            DirectReadOnlyRequest::Get { row_id, enlistment_consistency_token } => {
                Ok(ReplicaResponse::Row(self.resolve_direct(enlistment_consistency_token, row_id).await?))
            }
            DirectReadOnlyRequest::GetAll { row_ids, enlistment_consistency_token } => {
                let mut rows = Vec::with_capacity(row_ids.len());
                for row_id in row_ids {
                    rows.push(self.resolve_direct(enlistment_consistency_token, row_id).await?);
                }
                Ok(ReplicaResponse::Rows(rows))
            }
        }
    }

    async fn resolve_direct(&self, token: u64, row_id: RowId) -> Result<Option<BinaryRow>, ReplicaError> {
        let now = self.clock.now();
        let meta = await_primary_replica(&self.placement, self.group, self.config.primary_replica_await_timeout).await?;
        let is_primary = is_primary_now(&meta, token, now);
        if !is_primary {
            debug!(group = %self.group, "direct read-only served from a non-primary view; result is advisory");
        }
        // No enlisting transaction: `Uuid::nil()` can never match a real
        // write intent's owner, so this always takes the "someone else's
        // intent" branch of resolution rather than a spurious
        // read-your-writes short-circuit.
        //
        // spec §4.3 `ensureReplicaIsPrimary`: `isPrimary` controls whether the
        // read may proceed immediately or must first wait for safe-time to
        // reach `readTimestamp`. A primary reading at `now()` has already
        // applied everything it could ever wait for, so it never waits; a
        // non-primary (or advisory) view still waits for safe-time to catch up.
        self.resolve_at_with_wait(Uuid::nil(), row_id, now, !is_primary).await
    }

    /// Write-intent resolution at read time (spec §4.3, the 8-step
    /// algorithm): if the chain head is a committed version or this
    /// reader's own in-flight write, return it directly; otherwise ask the
    /// write's commit partition for the transaction's outcome and resolve
    /// accordingly, scheduling async cleanup once that outcome is known.
    async fn resolve_at(&self, tx_id: Uuid, row_id: RowId, read_ts: Timestamp) -> Result<Option<BinaryRow>, ReplicaError> {
        self.resolve_at_with_wait(tx_id, row_id, read_ts, true).await
    }

    async fn resolve_at_with_wait(&self, tx_id: Uuid, row_id: RowId, read_ts: Timestamp, wait_for_safe_time: bool) -> Result<Option<BinaryRow>, ReplicaError> {
        if wait_for_safe_time {
            self.safe_time.wait_until(read_ts).await;
        }
        let result = self.update_handler.storage().read(row_id, read_ts);
        if result.kind != ReadResultKind::WriteIntent {
            return Ok(result.row);
        }

        let intent_tx = result.tx_id.expect("a write-intent result always carries the owning tx_id");
        if intent_tx == tx_id {
            return Ok(result.row);
        }

        let commit_partition = TablePartitionId::new(
            TableId(result.commit_table_id.expect("write intent carries commit_table_id")),
            PartitionId(result.commit_part_id.expect("write intent carries commit_part_id")),
        );
        let meta = self.tx_resolver.resolve(intent_tx, commit_partition, read_ts).await?;
        match meta.state {
            TxState::Pending => Ok(self.update_handler.storage().read_committed(row_id, read_ts).row),
            TxState::Committed => {
                let commit_ts = meta.commit_ts.expect("a committed TransactionMeta always carries a commit_ts");
                let resolved = if commit_ts <= read_ts {
                    result.row
                } else {
                    self.update_handler.storage().read_committed(row_id, read_ts).row
                };
                self.schedule_intent_cleanup(intent_tx, row_id, true, Some(commit_ts));
                Ok(resolved)
            }
            TxState::Aborted => {
                self.schedule_intent_cleanup(intent_tx, row_id, false, None);
                Ok(self.update_handler.storage().read_committed(row_id, read_ts).row)
            }
            TxState::Abandoned => Err(ReplicaError::TxAbandoned(intent_tx)),
        }
    }

    fn schedule_intent_cleanup(&self, tx_id: Uuid, row_id: RowId, commit: bool, commit_ts: Option<Timestamp>) {
        self.update_handler.handle_write_intent_read(tx_id, row_id);
        let update_handler = self.update_handler.clone();
        tokio::spawn(async move {
            update_handler.handle_transaction_cleanup(tx_id, commit, commit_ts);
        });
    }

    // ---------------------------------------------------------------
    // Transaction finish / cleanup / state queries (spec §4.3)
    // ---------------------------------------------------------------

    /// `TX_FINISH` (spec §4.3, `processTxFinishAction`), run by the
    /// transaction's commit partition: validates forward schema
    /// compatibility, finalizes the transaction meta, appends a
    /// `FinishTxCommand`, then drives cleanup on every enlisted partition
    /// (locally for this group, dispatched for the rest).
    #[instrument(skip(self, request), fields(group = %self.group, tx_id = %request.tx_id))]
    pub async fn handle_tx_finish(&self, request: TxFinishReplicaRequest) -> Result<(), ReplicaError> {
        let meta = await_primary_replica(&self.placement, self.group, self.config.primary_replica_await_timeout).await?;
        ensure_replica_is_primary(&meta, request.term as u64, self.clock.now())?;

        let now = self.clock.now();
        let commit_ts = request.commit_timestamp.unwrap_or(now);
        let mut commit = request.commit;
        let mut schema_err = None;

        if commit {
            let begin_ts = self.tx_begin_ts(request.tx_id);
            let enlisted: Vec<EnlistedTable> = request
                .groups
                .iter()
                .map(|g| EnlistedTable { table_id: g.table_id, touched_columns: None })
                .collect();
            if let Err(err) = self.schema_validator.validate_forward(begin_ts, &enlisted, commit_ts).await {
                commit = false;
                schema_err = Some(err);
            }
        }

        if commit {
            self.tx_states.commit(request.tx_id, commit_ts)?;
        } else {
            self.tx_states.abort(request.tx_id)?;
        }

        let required_catalog_version = self.catalog_sync.wait_for_metadata_completeness(now).await;
        let finish_cmd = Command::FinishTx(replication_api::FinishTxCommand {
            tx_id: request.tx_id,
            commit,
            commit_timestamp: commit.then_some(commit_ts),
            table_partition_ids: request.groups.clone(),
            safe_time: now,
            required_catalog_version,
            tx_coordinator_id: self.coordinator_id.clone(),
        });
        let safe_time = self.log.append(self.group, finish_cmd).await?;
        self.safe_time.advance(safe_time);

        for group in &request.groups {
            let cleanup_request = TxCleanupReplicaRequest {
                tx_id: request.tx_id,
                commit,
                commit_timestamp: commit.then_some(commit_ts),
            };
            if *group == self.group {
                self.process_tx_cleanup_action(cleanup_request).await?;
            } else {
                self.dispatch_cleanup_with_retry(*group, cleanup_request).await?;
            }
        }

        self.forget_tx_begin_ts(request.tx_id);
        self.tx_states.forget(request.tx_id);

        if let Some(err) = schema_err {
            return Err(ReplicaError::from(err));
        }
        Ok(())
    }

    async fn dispatch_cleanup_with_retry(&self, group: TablePartitionId, request: TxCleanupReplicaRequest) -> Result<(), ReplicaError> {
        let mut attempt = 0;
        loop {
            match self.cleanup_dispatcher.dispatch_cleanup(group, request.clone()).await {
                Ok(()) => return Ok(()),
                Err(err) if attempt + 1 < self.config.cleanup_retry_attempts => {
                    attempt += 1;
                    debug!(%group, attempt, %err, "tx cleanup dispatch failed, retrying");
                    tokio::time::sleep(self.config.cleanup_retry_backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// `TX_CLEANUP` (spec §4.3, `processTxCleanupAction`): closes this
    /// transaction's open cursors, appends a `TxCleanupCommand`, resolves
    /// every row tracked for it against storage, then releases its locks.
    #[instrument(skip(self, request), fields(group = %self.group, tx_id = %request.tx_id))]
    pub async fn handle_tx_cleanup(&self, request: TxCleanupReplicaRequest) -> Result<(), ReplicaError> {
        self.process_tx_cleanup_action(request).await
    }

    async fn process_tx_cleanup_action(&self, request: TxCleanupReplicaRequest) -> Result<(), ReplicaError> {
        self.cursors.close_all(request.tx_id);

        let now = self.clock.now();
        let required_catalog_version = self.catalog_sync.wait_for_metadata_completeness(now).await;
        let cleanup_cmd = Command::TxCleanup(TxCleanupCommand {
            tx_id: request.tx_id,
            commit: request.commit,
            commit_timestamp: request.commit_timestamp,
            safe_time: now,
            required_catalog_version,
            tx_coordinator_id: self.coordinator_id.clone(),
        });
        let safe_time = self.log.append(self.group, cleanup_cmd).await?;
        self.safe_time.advance(safe_time);

        self.update_handler.handle_transaction_cleanup(request.tx_id, request.commit, request.commit_timestamp);
        self.lock_manager.release_all(request.tx_id);
        Ok(())
    }

    /// Answers a `TxStateCommitPartitionRequest` (spec §4.3 SUPPLEMENT):
    /// redirect the caller if this node is no longer the primary for the
    /// group it's asking about, otherwise hand back the authoritative
    /// transaction meta.
    #[instrument(skip(self), fields(group = %self.group, tx_id = %request.tx_id))]
    pub async fn handle_tx_state_commit_partition(
        &self,
        request: TxStateCommitPartitionRequest,
    ) -> Result<TxStateCommitPartitionResponse, ReplicaError> {
        let meta = await_primary_replica(&self.placement, self.group, self.config.primary_replica_await_timeout).await?;
        let token = self.self_token.load(Ordering::SeqCst);
        if !is_primary_now(&meta, token, self.clock.now()) {
            return Ok(TxStateCommitPartitionResponse::NotPrimary(meta));
        }
        let tx_meta = self.tx_states.get(request.tx_id).ok_or(tx_state::TxStateError::Unknown(request.tx_id))?;
        Ok(TxStateCommitPartitionResponse::Meta(tx_meta))
    }

    /// `SAFE_TIME_SYNC` (spec §6): a primary-only no-op that publishes a
    /// `SafeTimeSyncCommand`, which every replica applies by advancing its
    /// own safe-time tracker.
    #[instrument(skip(self, request), fields(group = %self.group))]
    pub async fn handle_safe_time_sync(&self, request: ReplicaSafeTimeSyncRequest) -> Result<(), ReplicaError> {
        let meta = await_primary_replica(&self.placement, self.group, self.config.primary_replica_await_timeout).await?;
        let token = self.self_token.load(Ordering::SeqCst);
        ensure_replica_is_primary(&meta, token, self.clock.now())?;

        let safe_time = self
            .log
            .append(self.group, Command::SafeTimeSync(SafeTimeSyncCommand { safe_time: request.safe_time }))
            .await?;
        self.safe_time.advance(safe_time);
        Ok(())
    }

    /// `BUILD_INDEX` (spec §6 SUPPLEMENT): forwards the command to the log
    /// unchanged, then calls the narrow [`IndexBuilder`] callback on
    /// application, if one is wired up.
    #[instrument(skip(self, request), fields(group = %self.group))]
    pub async fn handle_build_index(&self, request: BuildIndexReplicaRequest) -> Result<(), ReplicaError> {
        let cmd = BuildIndexCommand {
            index_id: request.index_id,
            row_ids: request.row_ids.clone(),
            finish: request.finish,
        };
        let safe_time = self.log.append(self.group, Command::BuildIndex(cmd)).await?;
        self.safe_time.advance(safe_time);
        if let Some(builder) = &self.index_builder {
            builder.on_build_index(request.index_id, &request.row_ids, request.finish);
        }
        Ok(())
    }
}

fn request_ctx(request: &ReadWriteRequest) -> TxContext {
    match request {
        ReadWriteRequest::Get { ctx, .. }
        | ReadWriteRequest::GetAll { ctx, .. }
        | ReadWriteRequest::Insert { ctx, .. }
        | ReadWriteRequest::Upsert { ctx, .. }
        | ReadWriteRequest::GetAndUpsert { ctx, .. }
        | ReadWriteRequest::ReplaceIfExist { ctx, .. }
        | ReadWriteRequest::GetAndReplace { ctx, .. }
        | ReadWriteRequest::Replace { ctx, .. }
        | ReadWriteRequest::Delete { ctx, .. }
        | ReadWriteRequest::GetAndDelete { ctx, .. }
        | ReadWriteRequest::DeleteExact { ctx, .. }
        | ReadWriteRequest::ScanRetrieveBatch { ctx, .. } => ctx.clone(),
    }
}
