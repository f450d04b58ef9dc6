use std::sync::Arc;
use std::time::Instant;

use osc_config::shared::RetryConfig;
use tracing::{debug, info};

use crate::applier::{Applier, KeyBound, Statement};
use crate::concurrency::shutdown::{ShutdownResult, ShutdownRx, is_shutdown};
use crate::context::{CopyProgress, CopyPublisher, MigrationContext};
use crate::copier::{ChunkBoundary, next_chunk_size};
use crate::error::MigrationResult;
use crate::retry::retry_with_backoff;
use crate::store::database::MigrationStore;
use crate::store::state::StateStore;
use crate::throttle::Throttler;
use crate::types::{BinlogPosition, Cell, TableRow};

/// Result of a backfill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyResult {
    /// Every row existing at start was copied.
    Completed {
        checkpoint: BinlogPosition,
        total_rows: u64,
    },
    /// The copy was interrupted by a shutdown signal.
    Shutdown,
}

/// Copies the rows of the original table into the shadow table, in chunks ordered by the
/// unique key.
///
/// The key range to copy is fixed when the copy starts. Rows inserted above it later reach the
/// shadow table through the replay. Key order belongs to the server's collation, keys are only
/// ever compared for equality here.
#[derive(Debug)]
pub struct RowCopier<M, T> {
    context: Arc<MigrationContext>,
    applier: Applier,
    store: M,
    state_store: T,
    throttler: Throttler,
    publisher: CopyPublisher,
    shutdown_rx: ShutdownRx,
}

impl<M, T> RowCopier<M, T>
where
    M: MigrationStore + Send + Sync,
    T: StateStore + Send + Sync,
{
    pub fn new(
        context: Arc<MigrationContext>,
        store: M,
        state_store: T,
        throttler: Throttler,
        publisher: CopyPublisher,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        Self {
            applier: Applier::new(context.clone()),
            context,
            store,
            state_store,
            throttler,
            publisher,
            shutdown_rx,
        }
    }

    /// Runs the backfill until every chunk is copied or shutdown is requested.
    ///
    /// On completion the backfill checkpoint is published exactly once.
    pub async fn run(mut self) -> MigrationResult<CopyResult> {
        let chunk_config = self.context.config().chunk.clone();

        if let Some(stored) = self.state_store.load_progress(self.context.id()).await? {
            let complete = stored.backfill_complete;
            self.restore(stored.copy);

            if complete {
                info!("backfill already completed by a previous run");
                return self.complete().await;
            }
        }

        let Some((min, max)) = self.key_bounds().await? else {
            info!(table = %self.context.original_table(), "original table is empty, nothing to copy");
            return self.complete().await;
        };

        let mut cursor = self.publisher.progress().cursor;
        let mut ordinal = self.publisher.progress().chunks_copied;
        let mut chunk_size = chunk_config
            .initial_size
            .clamp(chunk_config.min_size, chunk_config.max_size);

        info!(
            table = %self.context.original_table(),
            min = ?min,
            max = ?max,
            chunk_size,
            "starting backfill"
        );

        loop {
            if let ShutdownResult::Shutdown(()) =
                self.throttler.wait_until_permitted(&mut self.shutdown_rx).await?
            {
                info!("backfill interrupted by shutdown");
                return Ok(CopyResult::Shutdown);
            }
            if is_shutdown(&self.shutdown_rx) {
                info!("backfill interrupted by shutdown");
                return Ok(CopyResult::Shutdown);
            }

            let select = match &cursor {
                Some(cursor) => self.applier.build_chunk_select(cursor, false, &max, chunk_size),
                None => self.applier.build_chunk_select(&min, true, &max, chunk_size),
            };

            let started = Instant::now();
            let rows = self.copy_chunk(&select).await?;
            let elapsed = started.elapsed();

            let (Some(first), Some(last)) = (rows.first(), rows.last()) else {
                break;
            };

            ordinal += 1;
            let boundary = ChunkBoundary {
                low: self.key_of(first),
                high: self.key_of(last),
                row_count: rows.len(),
                ordinal,
            };
            debug!(
                ordinal = boundary.ordinal,
                low = ?boundary.low,
                high = ?boundary.high,
                rows = boundary.row_count,
                elapsed_ms = elapsed.as_millis() as u64,
                "chunk copied"
            );

            self.publisher.record_chunk(&boundary);
            self.store_progress(false).await?;

            // Every select is bounded by `max`, a chunk ending on it is the last one.
            if boundary.row_count < chunk_size || boundary.high == max {
                break;
            }

            cursor = Some(boundary.high);
            chunk_size = next_chunk_size(elapsed, chunk_size, &chunk_config);
        }

        self.complete().await
    }

    fn restore(&mut self, progress: CopyProgress) {
        if let Some(cursor) = &progress.cursor {
            info!(
                cursor = ?cursor,
                rows_copied = progress.rows_copied,
                "resuming backfill from stored progress"
            );
        }

        self.publisher.restore(progress);
    }

    async fn complete(&mut self) -> MigrationResult<CopyResult> {
        let retry = self.retry_config();
        let store = &self.store;
        let checkpoint =
            retry_with_backoff(&retry, "current_position", move || store.current_position())
                .await?;

        self.publisher.complete(checkpoint);
        self.store_progress(true).await?;

        let progress = self.publisher.progress();
        info!(
            %checkpoint,
            chunks = progress.chunks_copied,
            rows = progress.rows_copied,
            "backfill complete"
        );

        Ok(CopyResult::Completed {
            checkpoint,
            total_rows: progress.rows_copied,
        })
    }

    async fn key_bounds(&self) -> MigrationResult<Option<(Vec<Cell>, Vec<Cell>)>> {
        let min = self.select_key_bound(KeyBound::Min).await?;
        let max = self.select_key_bound(KeyBound::Max).await?;

        Ok(min.zip(max))
    }

    async fn select_key_bound(&self, bound: KeyBound) -> MigrationResult<Option<Vec<Cell>>> {
        let statement = self.applier.build_key_bound_select(bound);
        let store = &self.store;
        let statement = &statement;

        let rows = retry_with_backoff(&self.retry_config(), "select_key_bound", move || {
            store.query_rows(statement)
        })
        .await?;

        Ok(rows.into_iter().next().map(TableRow::into_values))
    }

    async fn copy_chunk(&self, select: &Statement) -> MigrationResult<Vec<TableRow>> {
        let store = &self.store;
        let applier = &self.applier;

        retry_with_backoff(&self.retry_config(), "copy_chunk", move || {
            store.copy_chunk(select, move |rows| backfill_statements(applier, rows))
        })
        .await
    }

    async fn store_progress(&self, complete: bool) -> MigrationResult<()> {
        let id = self.context.id();
        let progress = self.publisher.progress();
        let state_store = &self.state_store;
        let progress = &progress;

        retry_with_backoff(&self.retry_config(), "store_copy_progress", move || {
            state_store.store_copy_progress(id, progress, complete)
        })
        .await
    }

    fn key_of(&self, row: &TableRow) -> Vec<Cell> {
        self.context
            .key_shared_positions()
            .iter()
            .map(|&position| row.get(position).cloned().unwrap_or(Cell::Null))
            .collect()
    }

    fn retry_config(&self) -> RetryConfig {
        self.context.config().retry.clone()
    }
}

fn backfill_statements(applier: &Applier, rows: &[TableRow]) -> Vec<Statement> {
    match applier.build_backfill_statement(rows) {
        Some(replace) => vec![applier.build_session_statement(), replace],
        None => vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrency::shutdown::create_shutdown_channel;
    use crate::context::BackfillState;
    use crate::store::database::MemoryStore;
    use crate::store::state::{MemoryStateStore, StoredProgress};
    use crate::context::shadow_table_name;
    use crate::store::database::KeyCollation;
    use crate::test_utils::schema::{MigrationConfigBuilder, shadow_schema, test_schema, test_unique_key};
    use crate::test_utils::table::{create_tables, user_row};
    use crate::types::{ColumnList, ColumnSchema, TableName, TableSchema, UniqueKey};

    async fn copier(
        store: &MemoryStore,
        state_store: &MemoryStateStore,
        chunk_size: usize,
    ) -> (Arc<MigrationContext>, RowCopier<MemoryStore, MemoryStateStore>) {
        let config = MigrationConfigBuilder::new("test", "users")
            .chunk_size(chunk_size)
            .build();
        let (context, publishers) = MigrationContext::new(
            config,
            test_schema("test", "users"),
            shadow_schema("test", "users"),
            Some(test_unique_key()),
            store.current_position().await.unwrap(),
        )
        .unwrap();
        let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

        let copier = RowCopier::new(
            context.clone(),
            store.clone(),
            state_store.clone(),
            Throttler::unthrottled(),
            publishers.copy,
            shutdown_rx,
        );

        (context, copier)
    }

    #[tokio::test]
    async fn copies_all_rows_across_key_gaps() {
        let store = MemoryStore::new();
        let (original, shadow) = create_tables(&store, "test", "users").await;
        let rows: Vec<_> = [1, 2, 3, 10, 11, 500, 501, 502, 9000]
            .into_iter()
            .map(|id| user_row(id, &format!("user {id}"), 30))
            .collect();
        store.load_rows(&original, rows.clone()).await.unwrap();

        let state_store = MemoryStateStore::new();
        let (context, copier) = copier(&store, &state_store, 2).await;
        let result = copier.run().await.unwrap();

        let CopyResult::Completed { total_rows, .. } = result else {
            panic!("backfill did not complete");
        };
        assert_eq!(total_rows, 9);
        assert_eq!(store.rows(&shadow).await.unwrap(), rows);
        assert!(matches!(
            context.backfill_state(),
            BackfillState::Complete { .. }
        ));
        assert_eq!(context.copy_progress().cursor, Some(vec![Cell::I64(9000)]));

        let stored = state_store.load_progress(context.id()).await.unwrap().unwrap();
        assert!(stored.backfill_complete);
    }

    #[tokio::test]
    async fn completes_immediately_on_empty_table() {
        let store = MemoryStore::new();
        create_tables(&store, "test", "users").await;

        let state_store = MemoryStateStore::new();
        let (context, copier) = copier(&store, &state_store, 10).await;
        let result = copier.run().await.unwrap();

        assert_eq!(
            result,
            CopyResult::Completed {
                checkpoint: store.current_position().await.unwrap(),
                total_rows: 0,
            }
        );
        assert_eq!(context.copy_progress().chunks_copied, 0);
    }

    #[tokio::test]
    async fn resumes_after_stored_cursor() {
        let store = MemoryStore::new();
        let (original, shadow) = create_tables(&store, "test", "users").await;
        let rows: Vec<_> = (1..=6).map(|id| user_row(id, "name", 20)).collect();
        store.load_rows(&original, rows.clone()).await.unwrap();

        let state_store = MemoryStateStore::new();
        let (context, copier) = copier(&store, &state_store, 100).await;
        state_store
            .store_copy_progress(
                context.id(),
                &CopyProgress {
                    cursor: Some(vec![Cell::I64(4)]),
                    chunks_copied: 2,
                    rows_copied: 4,
                },
                false,
            )
            .await
            .unwrap();

        copier.run().await.unwrap();

        assert_eq!(store.rows(&shadow).await.unwrap(), rows[4..].to_vec());
        let progress = context.copy_progress();
        assert_eq!(progress.rows_copied, 6);
        assert_eq!(progress.chunks_copied, 3);
    }

    #[tokio::test]
    async fn skips_copy_when_stored_as_complete() {
        let store = MemoryStore::new();
        let (original, shadow) = create_tables(&store, "test", "users").await;
        store
            .load_rows(&original, vec![user_row(1, "name", 20)])
            .await
            .unwrap();

        let state_store = MemoryStateStore::new();
        let (context, copier) = copier(&store, &state_store, 100).await;
        state_store
            .store_copy_progress(context.id(), &StoredProgress::default().copy, true)
            .await
            .unwrap();

        copier.run().await.unwrap();

        assert!(store.rows(&shadow).await.unwrap().is_empty());
        assert!(context.backfill_state().checkpoint().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_chunk_failures() {
        let store = MemoryStore::new();
        let (original, shadow) = create_tables(&store, "test", "users").await;
        let rows: Vec<_> = (1..=3).map(|id| user_row(id, "name", 20)).collect();
        store.load_rows(&original, rows.clone()).await.unwrap();
        store
            .inject_failures(crate::error::ErrorKind::Deadlock, 1)
            .await;

        let state_store = MemoryStateStore::new();
        let (_context, copier) = copier(&store, &state_store, 10).await;
        copier.run().await.unwrap();

        assert_eq!(store.rows(&shadow).await.unwrap(), rows);
    }

    #[tokio::test]
    async fn chunk_boundaries_increase_without_overlap_across_key_gaps() {
        let store = MemoryStore::new();
        let (original, _shadow) = create_tables(&store, "test", "users").await;
        let ids = [1, 2, 3, 10, 11, 500, 501, 502, 9000, 9001, 70_000];
        let rows: Vec<_> = ids
            .into_iter()
            .map(|id| user_row(id, "name", 30))
            .collect();
        store.load_rows(&original, rows).await.unwrap();

        let state_store = MemoryStateStore::new();
        let (context, copier) = copier(&store, &state_store, 2).await;
        let mut chunks_rx = context.subscribe_chunks();
        copier.run().await.unwrap();

        let mut boundaries = vec![];
        while let Ok(boundary) = chunks_rx.try_recv() {
            boundaries.push(boundary);
        }

        assert!(boundaries.len() > 1);
        assert_eq!(boundaries[0].low, vec![Cell::I64(1)]);
        assert_eq!(
            boundaries.last().map(|boundary| boundary.high.clone()),
            Some(vec![Cell::I64(70_000)])
        );
        for boundary in &boundaries {
            assert!(boundary.low <= boundary.high, "{boundary:?}");
        }
        for pair in boundaries.windows(2) {
            assert!(pair[0].high < pair[1].low, "{:?} overlaps {:?}", pair[0], pair[1]);
            assert_eq!(pair[0].ordinal + 1, pair[1].ordinal);
        }
        let copied: usize = boundaries.iter().map(|boundary| boundary.row_count).sum();
        assert_eq!(copied, ids.len());
    }

    fn code_schema(table: &str) -> TableSchema {
        TableSchema::new(
            TableName::new("test", table),
            vec![
                ColumnSchema::new("code", "varchar(32)", false),
                ColumnSchema::new("qty", "int", false),
            ],
        )
    }

    fn code_row(code: &str, qty: i64) -> TableRow {
        TableRow::new(vec![Cell::String(code.to_string()), Cell::I64(qty)])
    }

    #[tokio::test]
    async fn follows_the_server_key_order_of_case_insensitive_strings() {
        let store = MemoryStore::new();
        store.set_key_collation(KeyCollation::CaseInsensitive).await;
        let original = code_schema("codes");
        let shadow = TableSchema::new(
            shadow_table_name(&original.name),
            original.column_schemas.clone(),
        );
        let key = UniqueKey::new("PRIMARY", ColumnList::new(["code"]));
        store.create_table(&original, &key.columns).await.unwrap();
        store.create_table(&shadow, &key.columns).await.unwrap();

        // Server order is a, B, c, D while `Cell` order puts B and D first.
        let rows = vec![
            code_row("a", 1),
            code_row("B", 2),
            code_row("c", 3),
            code_row("D", 4),
        ];
        store.load_rows(&original.name, rows).await.unwrap();

        let config = MigrationConfigBuilder::new("test", "codes")
            .chunk_size(1)
            .build();
        let (context, publishers) = MigrationContext::new(
            config,
            original.clone(),
            shadow.clone(),
            Some(key),
            store.current_position().await.unwrap(),
        )
        .unwrap();
        let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();
        let state_store = MemoryStateStore::new();

        let result = RowCopier::new(
            context.clone(),
            store.clone(),
            state_store,
            Throttler::unthrottled(),
            publishers.copy,
            shutdown_rx,
        )
        .run()
        .await
        .unwrap();

        assert!(matches!(result, CopyResult::Completed { total_rows: 4, .. }));
        assert_eq!(
            store.rows(&shadow.name).await.unwrap(),
            store.rows(&original.name).await.unwrap()
        );
        assert_eq!(
            context.copy_progress().cursor,
            Some(vec![Cell::String("D".to_string())])
        );
    }
}
