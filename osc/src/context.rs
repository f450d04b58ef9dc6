//! Shared state of one migration.
//!
//! The immutable part (table names, schemas, the chosen unique key and the shared column
//! mapping) is computed once when the context is built. The mutable coordination fields are
//! published through watch channels, and each field has exactly one writer: the writer owns the
//! publishing handle returned from [`MigrationContext::new`], everyone else reads through the
//! context. Readers therefore always observe complete values.

use std::sync::Arc;

use osc_config::shared::MigrationConfig;
use osc_mysql::types::MAX_IDENTIFIER_LENGTH;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tracing::debug;

use crate::bail;
use crate::copier::ChunkBoundary;
use crate::cut_over::CutOverState;
use crate::error::{ErrorKind, MigrationError, MigrationResult};
use crate::migration_error;
use crate::types::{
    BinlogPosition, Cell, MigrationId, SharedColumns, TableName, TableSchema, UniqueKey,
};

/// Chunk boundaries kept for subscribers lagging behind the copy.
pub const CHUNK_CHANNEL_CAPACITY: usize = 1024;

/// Name of the shadow table built for `original`.
pub fn shadow_table_name(original: &TableName) -> TableName {
    original.sibling(format!("_{}_new", original.name))
}

/// Name the original table is renamed to at cut-over.
pub fn old_table_name(original: &TableName) -> TableName {
    original.sibling(format!("_{}_old", original.name))
}

/// Progress of the backfill.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyProgress {
    /// Unique-key values of the last copied row, `None` before the first chunk.
    pub cursor: Option<Vec<Cell>>,
    pub chunks_copied: u64,
    pub rows_copied: u64,
}

/// Whether the backfill finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BackfillState {
    #[default]
    InProgress,
    /// All chunks are copied. `checkpoint` is the binlog position read right after the last
    /// chunk; the replay must reach it before cut-over may lock the tables.
    Complete { checkpoint: BinlogPosition },
}

impl BackfillState {
    pub fn checkpoint(&self) -> Option<BinlogPosition> {
        match self {
            BackfillState::InProgress => None,
            BackfillState::Complete { checkpoint } => Some(*checkpoint),
        }
    }
}

/// Progress of the replication replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayProgress {
    /// Position right after the last binlog event whose rows were all applied.
    pub position: BinlogPosition,
    pub events_applied: u64,
    pub events_skipped: u64,
}

/// Publishes [`ReplayProgress`]. Owned by the replay worker.
#[derive(Debug)]
pub struct ReplayPublisher {
    tx: watch::Sender<ReplayProgress>,
}

impl ReplayPublisher {
    /// Records an applied row change.
    ///
    /// `event_end` is the position right after the binlog event, given only for the last row
    /// of the event. Earlier rows leave the position where it is.
    pub fn record_applied(&mut self, event_end: Option<BinlogPosition>) {
        self.tx.send_modify(|progress| {
            progress.events_applied += 1;
            if let Some(end) = event_end {
                progress.position = progress.position.max(end);
            }
        });
    }

    /// Records a row change that was dropped, the position still advances past its event.
    pub fn record_skipped(&mut self, event_end: Option<BinlogPosition>) {
        self.tx.send_modify(|progress| {
            progress.events_skipped += 1;
            if let Some(end) = event_end {
                progress.position = progress.position.max(end);
            }
        });
    }

    /// Advances the position without an event, for checkpoint messages.
    pub fn advance(&mut self, position: BinlogPosition) {
        self.tx.send_if_modified(|progress| {
            if position > progress.position {
                progress.position = position;
                return true;
            }

            false
        });
    }

    pub fn progress(&self) -> ReplayProgress {
        *self.tx.borrow()
    }
}

/// Publishes [`CopyProgress`] and [`BackfillState`]. Owned by the row copier.
#[derive(Debug)]
pub struct CopyPublisher {
    progress_tx: watch::Sender<CopyProgress>,
    backfill_tx: watch::Sender<BackfillState>,
    chunks_tx: broadcast::Sender<ChunkBoundary>,
}

impl CopyPublisher {
    /// Replaces the progress, used when resuming from persisted state.
    pub fn restore(&mut self, progress: CopyProgress) {
        self.progress_tx.send_replace(progress);
    }

    /// Records a copied chunk and announces its boundary to chunk subscribers.
    pub fn record_chunk(&mut self, boundary: &ChunkBoundary) {
        self.progress_tx.send_modify(|progress| {
            progress.cursor = Some(boundary.high.clone());
            progress.chunks_copied += 1;
            progress.rows_copied += boundary.row_count as u64;
        });

        // Fails only when nobody subscribed.
        let _ = self.chunks_tx.send(boundary.clone());
    }

    /// Marks the backfill complete. Only the first call has an effect.
    pub fn complete(&mut self, checkpoint: BinlogPosition) {
        self.backfill_tx.send_if_modified(|state| {
            if matches!(state, BackfillState::Complete { .. }) {
                return false;
            }

            *state = BackfillState::Complete { checkpoint };
            true
        });
    }

    pub fn progress(&self) -> CopyProgress {
        self.progress_tx.borrow().clone()
    }
}

/// Publishes the [`CutOverState`]. Owned by the cut-over coordinator.
#[derive(Debug)]
pub struct CutOverPublisher {
    tx: watch::Sender<CutOverState>,
}

impl CutOverPublisher {
    /// Moves the cut-over to `next`.
    ///
    /// Fails with [`ErrorKind::InvalidState`] when the transition is not allowed.
    pub fn transition(&mut self, next: CutOverState) -> MigrationResult<()> {
        let current = self.tx.borrow().clone();
        if !current.can_transition_to(&next) {
            bail!(
                ErrorKind::InvalidState,
                "Invalid cut-over state transition",
                format!("cannot move from {current} to {next}")
            );
        }

        debug!(from = %current, to = %next, "cut-over state transition");
        self.tx.send_replace(next);

        Ok(())
    }

    pub fn state(&self) -> CutOverState {
        self.tx.borrow().clone()
    }
}

/// Operator switch that holds the cut-over after the drain.
#[derive(Debug, Clone)]
pub struct PostponeTx(watch::Sender<bool>);

impl PostponeTx {
    pub fn postpone(&self) {
        self.0.send_replace(true);
    }

    pub fn release(&self) {
        self.0.send_replace(false);
    }
}

/// Handles through which the single writers publish the context's mutable fields.
#[derive(Debug)]
pub struct ContextPublishers {
    pub replay: ReplayPublisher,
    pub copy: CopyPublisher,
    pub cut_over: CutOverPublisher,
    pub postpone: PostponeTx,
}

/// Shared state of one migration.
#[derive(Debug)]
pub struct MigrationContext {
    config: MigrationConfig,
    original: TableSchema,
    shadow: TableSchema,
    old_table: TableName,
    unique_key: UniqueKey,
    shared_columns: SharedColumns,
    /// Position of each unique-key column in the original row image.
    key_row_positions: Vec<usize>,
    /// Position of each unique-key column in the shared column list.
    key_shared_positions: Vec<usize>,
    start_position: BinlogPosition,
    replay_rx: watch::Receiver<ReplayProgress>,
    copy_rx: watch::Receiver<CopyProgress>,
    backfill_rx: watch::Receiver<BackfillState>,
    cut_over_rx: watch::Receiver<CutOverState>,
    postpone_rx: watch::Receiver<bool>,
    /// Only used to subscribe, the copy publishes through its own sender.
    chunks_tx: broadcast::Sender<ChunkBoundary>,
}

impl MigrationContext {
    /// Builds the context of a migration from `original` to `shadow`.
    ///
    /// `start_position` is the binlog position the replay starts from, it is also the initial
    /// replay position. Fails when no usable unique key exists, when the tables share no column
    /// or when a derived table name exceeds the identifier limit.
    pub fn new(
        config: MigrationConfig,
        original: TableSchema,
        shadow: TableSchema,
        unique_key: Option<UniqueKey>,
        start_position: BinlogPosition,
    ) -> MigrationResult<(Arc<Self>, ContextPublishers)> {
        let configured = TableName::new(config.database.clone(), config.table.clone());
        if original.name != configured {
            bail!(
                ErrorKind::SchemaMismatch,
                "Original table schema does not match the configured table",
                format!("expected {configured}, got {}", original.name)
            );
        }

        let old_table = old_table_name(&original.name);
        for name in [&shadow.name, &old_table] {
            if name.name.len() > MAX_IDENTIFIER_LENGTH {
                bail!(
                    ErrorKind::TableNameTooLong,
                    "Derived table name exceeds the identifier limit",
                    format!(
                        "`{}` is {} characters, the limit is {MAX_IDENTIFIER_LENGTH}",
                        name.name,
                        name.name.len()
                    )
                );
            }
        }

        let shared_columns = SharedColumns::build(&original, &shadow, &config.column_renames);
        if shared_columns.is_empty() {
            bail!(
                ErrorKind::SchemaMismatch,
                "Original and shadow tables share no column",
                format!("{} and {}", original.name, shadow.name)
            );
        }

        let Some(unique_key) = unique_key else {
            bail!(
                ErrorKind::MissingUniqueKey,
                "The original table has no usable unique key",
                original.name.to_string()
            );
        };
        unique_key.validate(&original, &shared_columns)?;

        let mut key_row_positions = Vec::with_capacity(unique_key.columns.len());
        let mut key_shared_positions = Vec::with_capacity(unique_key.columns.len());
        for name in unique_key.columns.iter() {
            let shared_position = shared_columns
                .iter()
                .position(|column| column.original.eq_ignore_ascii_case(name))
                .ok_or_else(|| {
                    migration_error!(
                        ErrorKind::InvalidUniqueKey,
                        "Unique key column is not shared",
                        name
                    )
                })?;
            let row_position = shared_columns
                .iter()
                .nth(shared_position)
                .map(|column| column.original_index)
                .unwrap_or_default();

            key_shared_positions.push(shared_position);
            key_row_positions.push(row_position);
        }

        let (replay_tx, replay_rx) = watch::channel(ReplayProgress {
            position: start_position,
            ..ReplayProgress::default()
        });
        let (progress_tx, copy_rx) = watch::channel(CopyProgress::default());
        let (backfill_tx, backfill_rx) = watch::channel(BackfillState::InProgress);
        let (cut_over_tx, cut_over_rx) = watch::channel(CutOverState::Copying);
        let (postpone_tx, postpone_rx) = watch::channel(config.cut_over.postpone);
        let (chunks_tx, _) = broadcast::channel(CHUNK_CHANNEL_CAPACITY);

        let context = Arc::new(Self {
            config,
            original,
            shadow,
            old_table,
            unique_key,
            shared_columns,
            key_row_positions,
            key_shared_positions,
            start_position,
            replay_rx,
            copy_rx,
            backfill_rx,
            cut_over_rx,
            postpone_rx,
            chunks_tx: chunks_tx.clone(),
        });

        let publishers = ContextPublishers {
            replay: ReplayPublisher { tx: replay_tx },
            copy: CopyPublisher {
                progress_tx,
                backfill_tx,
                chunks_tx,
            },
            cut_over: CutOverPublisher { tx: cut_over_tx },
            postpone: PostponeTx(postpone_tx),
        };

        Ok((context, publishers))
    }

    pub fn id(&self) -> MigrationId {
        self.config.id
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    pub fn original_table(&self) -> &TableName {
        &self.original.name
    }

    pub fn shadow_table(&self) -> &TableName {
        &self.shadow.name
    }

    pub fn old_table(&self) -> &TableName {
        &self.old_table
    }

    pub fn original_schema(&self) -> &TableSchema {
        &self.original
    }

    pub fn shadow_schema(&self) -> &TableSchema {
        &self.shadow
    }

    pub fn unique_key(&self) -> &UniqueKey {
        &self.unique_key
    }

    pub fn shared_columns(&self) -> &SharedColumns {
        &self.shared_columns
    }

    /// Positions of the unique-key columns in a row image of the original table.
    pub fn key_row_positions(&self) -> &[usize] {
        &self.key_row_positions
    }

    /// Positions of the unique-key columns in a row laid out in shared column order.
    pub fn key_shared_positions(&self) -> &[usize] {
        &self.key_shared_positions
    }

    pub fn start_position(&self) -> BinlogPosition {
        self.start_position
    }

    pub fn replay_progress(&self) -> ReplayProgress {
        *self.replay_rx.borrow()
    }

    /// Returns `false` once the replay stopped publishing, after a failure or the end of its
    /// stream.
    pub fn is_replay_running(&self) -> bool {
        self.replay_rx.has_changed().is_ok()
    }

    pub fn copy_progress(&self) -> CopyProgress {
        self.copy_rx.borrow().clone()
    }

    pub fn backfill_state(&self) -> BackfillState {
        *self.backfill_rx.borrow()
    }

    pub fn cut_over_state(&self) -> CutOverState {
        self.cut_over_rx.borrow().clone()
    }

    /// Returns `true` once the tables were swapped and unlocked.
    pub fn is_cut_over_complete(&self) -> bool {
        matches!(*self.cut_over_rx.borrow(), CutOverState::Done)
    }

    pub fn is_postponed(&self) -> bool {
        *self.postpone_rx.borrow()
    }

    /// Waits until the backfill completes and returns its checkpoint.
    pub async fn wait_for_backfill(&self) -> MigrationResult<BinlogPosition> {
        let mut rx = self.backfill_rx.clone();
        let state = rx
            .wait_for(|state| state.checkpoint().is_some())
            .await
            .map_err(|_| closed_channel_error("backfill state"))?;

        Ok(state.checkpoint().unwrap_or(self.start_position))
    }

    /// Waits until the replay position reaches `target`.
    pub async fn wait_for_replay(&self, target: BinlogPosition) -> MigrationResult<()> {
        let mut rx = self.replay_rx.clone();
        rx.wait_for(|progress| progress.position >= target)
            .await
            .map_err(|_| closed_channel_error("replay progress"))?;

        Ok(())
    }

    /// Waits until no postponement is requested.
    pub async fn wait_until_released(&self) -> MigrationResult<()> {
        let mut rx = self.postpone_rx.clone();
        rx.wait_for(|postponed| !postponed)
            .await
            .map_err(|_| closed_channel_error("postpone flag"))?;

        Ok(())
    }

    /// Subscribes to cut-over state changes.
    pub fn subscribe_cut_over(&self) -> watch::Receiver<CutOverState> {
        self.cut_over_rx.clone()
    }

    /// Subscribes to the boundaries of the chunks copied from now on.
    ///
    /// A subscriber more than [`CHUNK_CHANNEL_CAPACITY`] chunks behind loses the oldest ones.
    pub fn subscribe_chunks(&self) -> broadcast::Receiver<ChunkBoundary> {
        self.chunks_tx.subscribe()
    }
}

fn closed_channel_error(field: &'static str) -> MigrationError {
    migration_error!(
        ErrorKind::InvalidState,
        "Publisher of a migration context field was dropped",
        field
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::schema::{migration_config, shadow_schema, test_schema, test_unique_key};

    #[test]
    fn derives_shadow_and_old_names() {
        let original = TableName::new("test", "users");

        assert_eq!(shadow_table_name(&original), TableName::new("test", "_users_new"));
        assert_eq!(old_table_name(&original), TableName::new("test", "_users_old"));
    }

    #[test]
    fn builds_key_positions() {
        let (context, _publishers) = MigrationContext::new(
            migration_config("test", "users"),
            test_schema("test", "users"),
            shadow_schema("test", "users"),
            Some(test_unique_key()),
            BinlogPosition::new(1, 4),
        )
        .unwrap();

        assert_eq!(context.key_row_positions(), &[0]);
        assert_eq!(context.key_shared_positions(), &[0]);
        assert_eq!(context.replay_progress().position, BinlogPosition::new(1, 4));
        assert_eq!(context.cut_over_state(), CutOverState::Copying);
    }

    #[test]
    fn rejects_missing_unique_key() {
        let err = MigrationContext::new(
            migration_config("test", "users"),
            test_schema("test", "users"),
            shadow_schema("test", "users"),
            None,
            BinlogPosition::default(),
        )
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::MissingUniqueKey);
    }

    #[test]
    fn rejects_too_long_table_names() {
        let table = "t".repeat(60);
        let err = MigrationContext::new(
            migration_config("test", &table),
            test_schema("test", &table),
            shadow_schema("test", &table),
            Some(test_unique_key()),
            BinlogPosition::default(),
        )
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::TableNameTooLong);
    }

    #[test]
    fn replay_position_never_moves_backwards() {
        let (context, mut publishers) = MigrationContext::new(
            migration_config("test", "users"),
            test_schema("test", "users"),
            shadow_schema("test", "users"),
            Some(test_unique_key()),
            BinlogPosition::new(1, 100),
        )
        .unwrap();

        publishers.replay.advance(BinlogPosition::new(1, 50));
        assert_eq!(context.replay_progress().position, BinlogPosition::new(1, 100));

        publishers.replay.record_applied(Some(BinlogPosition::new(1, 200)));
        publishers.replay.record_skipped(Some(BinlogPosition::new(1, 300)));
        let progress = context.replay_progress();
        assert_eq!(progress.position, BinlogPosition::new(1, 300));
        assert_eq!(progress.events_applied, 1);
        assert_eq!(progress.events_skipped, 1);
    }

    #[test]
    fn replay_position_waits_for_the_last_row_of_an_event() {
        let (context, mut publishers) = MigrationContext::new(
            migration_config("test", "users"),
            test_schema("test", "users"),
            shadow_schema("test", "users"),
            Some(test_unique_key()),
            BinlogPosition::new(1, 100),
        )
        .unwrap();

        publishers.replay.record_applied(None);
        publishers.replay.record_skipped(None);
        assert_eq!(context.replay_progress().position, BinlogPosition::new(1, 100));

        publishers.replay.record_applied(Some(BinlogPosition::new(1, 500)));
        let progress = context.replay_progress();
        assert_eq!(progress.position, BinlogPosition::new(1, 500));
        assert_eq!(progress.events_applied, 2);
    }

    #[test]
    fn replay_stops_running_with_its_publisher() {
        let (context, publishers) = MigrationContext::new(
            migration_config("test", "users"),
            test_schema("test", "users"),
            shadow_schema("test", "users"),
            Some(test_unique_key()),
            BinlogPosition::new(1, 4),
        )
        .unwrap();
        assert!(context.is_replay_running());

        drop(publishers.replay);

        assert!(!context.is_replay_running());
        assert_eq!(context.replay_progress().position, BinlogPosition::new(1, 4));
    }

    #[test]
    fn backfill_completes_once() {
        let (context, mut publishers) = MigrationContext::new(
            migration_config("test", "users"),
            test_schema("test", "users"),
            shadow_schema("test", "users"),
            Some(test_unique_key()),
            BinlogPosition::default(),
        )
        .unwrap();

        publishers.copy.complete(BinlogPosition::new(2, 10));
        publishers.copy.complete(BinlogPosition::new(3, 10));

        assert_eq!(
            context.backfill_state(),
            BackfillState::Complete {
                checkpoint: BinlogPosition::new(2, 10)
            }
        );
    }

    #[test]
    fn rejects_invalid_cut_over_transition() {
        let (_context, mut publishers) = MigrationContext::new(
            migration_config("test", "users"),
            test_schema("test", "users"),
            shadow_schema("test", "users"),
            Some(test_unique_key()),
            BinlogPosition::default(),
        )
        .unwrap();

        let err = publishers.cut_over.transition(CutOverState::Swapped).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }
}
