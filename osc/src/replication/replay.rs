use std::sync::Arc;

use futures::{Stream, StreamExt};
use osc_config::shared::RetryConfig;
use tokio::pin;
use tracing::{debug, info, warn};

use crate::applier::{Applier, DmlEventQuery};
use crate::concurrency::shutdown::{ShutdownResult, ShutdownRx, wait_for_shutdown};
use crate::concurrency::stream::BatchStream;
use crate::context::{MigrationContext, ReplayPublisher};
use crate::cut_over::CutOverState;
use crate::error::MigrationResult;
use crate::retry::retry_with_backoff;
use crate::store::database::MigrationStore;
use crate::store::state::StateStore;
use crate::throttle::Throttler;
use crate::types::{BinlogPosition, PositionedEvent, ReplicationMessage};

/// Result of a replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayResult {
    /// The replication stream ended.
    StreamEnded,
    /// The replay was interrupted by a shutdown signal.
    Shutdown,
    /// The tables were swapped, later changes belong to the new table.
    CutOverComplete,
}

/// Applies the replication stream to the shadow table.
///
/// Messages are applied strictly in stream order, one event group at a time. The stream is
/// consumed in batches: the throttle gate is consulted once per batch and the replay position
/// is persisted after each batch.
#[derive(Debug)]
pub struct ReplayLoop<M, T> {
    context: Arc<MigrationContext>,
    applier: Applier,
    store: M,
    state_store: T,
    throttler: Throttler,
    publisher: ReplayPublisher,
    shutdown_rx: ShutdownRx,
}

impl<M, T> ReplayLoop<M, T>
where
    M: MigrationStore + Send + Sync,
    T: StateStore + Send + Sync,
{
    pub fn new(
        context: Arc<MigrationContext>,
        store: M,
        state_store: T,
        throttler: Throttler,
        publisher: ReplayPublisher,
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

    /// Consumes `stream` until it ends, fails or shutdown is requested.
    ///
    /// An error yielded by the stream stops the replay and is returned.
    pub async fn run<S>(mut self, stream: S) -> MigrationResult<ReplayResult>
    where
        S: Stream<Item = MigrationResult<ReplicationMessage>> + Send,
    {
        let batch_config = self.context.config().batch.clone();
        let stream = BatchStream::wrap(stream, batch_config, self.shutdown_rx.clone());
        pin!(stream);

        let mut stored_position = self.publisher.progress().position;
        info!(position = %stored_position, "starting replay");

        loop {
            let batch = tokio::select! {
                biased;

                _ = wait_for_shutdown(&mut self.shutdown_rx) => {
                    self.store_position(&mut stored_position).await?;
                    info!("replay interrupted by shutdown");

                    return Ok(ReplayResult::Shutdown);
                }
                batch = stream.next() => batch,
            };
            let Some(batch) = batch else {
                break;
            };

            let messages = match batch {
                ShutdownResult::Ok(messages) => messages,
                ShutdownResult::Shutdown(messages) => {
                    self.apply_batch(messages).await?;
                    self.store_position(&mut stored_position).await?;
                    info!("replay interrupted by shutdown");

                    return Ok(ReplayResult::Shutdown);
                }
            };

            if self.cut_over_finished() {
                info!("tables swapped, stopping replay");
                return Ok(ReplayResult::CutOverComplete);
            }

            // Writes to the original table are blocked while it is locked, the replay must drain
            // regardless of the load.
            if self.context.cut_over_state() != CutOverState::Locked {
                if let ShutdownResult::Shutdown(()) =
                    self.throttler.wait_until_permitted(&mut self.shutdown_rx).await?
                {
                    info!("replay interrupted by shutdown while throttled");
                    return Ok(ReplayResult::Shutdown);
                }
            }

            self.apply_batch(messages).await?;
            self.store_position(&mut stored_position).await?;
        }

        let progress = self.publisher.progress();
        info!(
            position = %progress.position,
            events_applied = progress.events_applied,
            events_skipped = progress.events_skipped,
            "replication stream ended"
        );

        Ok(ReplayResult::StreamEnded)
    }

    async fn apply_batch(
        &mut self,
        messages: Vec<MigrationResult<ReplicationMessage>>,
    ) -> MigrationResult<()> {
        for message in messages {
            match message? {
                ReplicationMessage::Change(event) => self.apply_event(event).await?,
                ReplicationMessage::Checkpoint(position) => self.publisher.advance(position),
            }
        }

        Ok(())
    }

    async fn apply_event(&mut self, positioned: PositionedEvent) -> MigrationResult<()> {
        let PositionedEvent {
            position,
            event,
            ends_event,
        } = positioned;
        let event_end = ends_event.then_some(position);

        if self.cut_over_finished() {
            debug!(%position, "event after the swap not replayed");
            self.publisher.record_skipped(event_end);

            return Ok(());
        }

        let statements = match self.applier.build_dml_event_query(&event) {
            DmlEventQuery::Execute(statements) => statements,
            DmlEventQuery::NoOp { reason } => {
                debug!(%position, event_type = %event.event_type(), reason = %reason, "event skipped");
                self.publisher.record_skipped(event_end);

                return Ok(());
            }
        };

        let mut group = Vec::with_capacity(statements.len() + 1);
        group.push(self.applier.build_session_statement());
        group.extend(statements);

        let store = &self.store;
        let group = &group;
        retry_with_backoff(&self.retry_config(), "apply_event", move || {
            store.execute(group)
        })
        .await
        .inspect_err(|err| {
            warn!(%position, event_type = %event.event_type(), error = %err, "failed to apply event");
        })?;

        self.publisher.record_applied(event_end);

        Ok(())
    }

    async fn store_position(&self, stored_position: &mut BinlogPosition) -> MigrationResult<()> {
        let position = self.publisher.progress().position;
        if position <= *stored_position {
            return Ok(());
        }

        let id = self.context.id();
        let state_store = &self.state_store;
        retry_with_backoff(&self.retry_config(), "store_replay_position", move || {
            state_store.store_replay_position(id, position)
        })
        .await?;
        *stored_position = position;

        Ok(())
    }

    fn cut_over_finished(&self) -> bool {
        matches!(
            self.context.cut_over_state(),
            CutOverState::Swapped | CutOverState::Done
        )
    }

    fn retry_config(&self) -> RetryConfig {
        self.context.config().retry.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::channel::mpsc;
    use futures::stream;

    use super::*;
    use crate::concurrency::shutdown::create_shutdown_channel;
    use crate::error::{ErrorKind, MigrationError};
    use crate::store::database::MemoryStore;
    use crate::store::state::MemoryStateStore;
    use crate::test_utils::schema::{migration_config, shadow_schema, test_schema, test_unique_key};
    use crate::test_utils::table::{create_tables, user_row};
    use crate::types::{ChangeEvent, InsertEvent, TableName};

    fn replay_loop(
        store: &MemoryStore,
        state_store: &MemoryStateStore,
        start: BinlogPosition,
    ) -> (Arc<MigrationContext>, ReplayLoop<MemoryStore, MemoryStateStore>) {
        let (context, publishers) = MigrationContext::new(
            migration_config("test", "users"),
            test_schema("test", "users"),
            shadow_schema("test", "users"),
            Some(test_unique_key()),
            start,
        )
        .unwrap();
        let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

        let replay = ReplayLoop::new(
            context.clone(),
            store.clone(),
            state_store.clone(),
            Throttler::unthrottled(),
            publishers.replay,
            shutdown_rx,
        );

        (context, replay)
    }

    fn insert(table: &TableName, offset: u64, id: i64) -> MigrationResult<ReplicationMessage> {
        Ok(ReplicationMessage::Change(row_of_event(table, offset, id, true)))
    }

    fn row_of_event(table: &TableName, offset: u64, id: i64, ends_event: bool) -> PositionedEvent {
        PositionedEvent {
            position: BinlogPosition::new(1, offset),
            event: ChangeEvent::Insert(InsertEvent {
                table: table.clone(),
                new_row: user_row(id, "name", 42),
            }),
            ends_event,
        }
    }

    #[tokio::test]
    async fn applies_stream_and_persists_position() {
        let store = MemoryStore::new();
        let (original, shadow) = create_tables(&store, "test", "users").await;
        let other = TableName::new("test", "other");

        let state_store = MemoryStateStore::new();
        let (context, replay) = replay_loop(&store, &state_store, BinlogPosition::new(1, 4));
        let messages = vec![
            insert(&original, 100, 1),
            insert(&other, 200, 2),
            insert(&original, 300, 3),
            Ok(ReplicationMessage::Checkpoint(BinlogPosition::new(1, 400))),
        ];

        let result = replay.run(stream::iter(messages)).await.unwrap();

        assert_eq!(result, ReplayResult::StreamEnded);
        assert_eq!(
            store.rows(&shadow).await.unwrap(),
            vec![user_row(1, "name", 42), user_row(3, "name", 42)]
        );
        let progress = context.replay_progress();
        assert_eq!(progress.position, BinlogPosition::new(1, 400));
        assert_eq!(progress.events_applied, 2);
        assert_eq!(progress.events_skipped, 1);

        let stored = state_store.load_progress(context.id()).await.unwrap().unwrap();
        assert_eq!(stored.replay_position, Some(BinlogPosition::new(1, 400)));
    }

    #[tokio::test]
    async fn stops_on_stream_error() {
        let store = MemoryStore::new();
        let (original, _shadow) = create_tables(&store, "test", "users").await;

        let state_store = MemoryStateStore::new();
        let (context, replay) = replay_loop(&store, &state_store, BinlogPosition::new(1, 4));
        let messages = vec![
            insert(&original, 100, 1),
            Err(MigrationError::from((
                ErrorKind::MalformedEvent,
                "Rows event without after image",
            ))),
            insert(&original, 300, 3),
        ];

        let err = replay.run(stream::iter(messages)).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::MalformedEvent);
        assert_eq!(context.replay_progress().position, BinlogPosition::new(1, 100));
    }

    async fn stored_position(
        state_store: &MemoryStateStore,
        context: &MigrationContext,
    ) -> Option<BinlogPosition> {
        state_store
            .load_progress(context.id())
            .await
            .unwrap()
            .and_then(|progress| progress.replay_position)
    }

    #[tokio::test]
    async fn position_waits_for_every_row_of_a_split_rows_event() {
        let store = MemoryStore::new();
        let (original, shadow) = create_tables(&store, "test", "users").await;

        let state_store = MemoryStateStore::new();
        let (context, replay) = replay_loop(&store, &state_store, BinlogPosition::new(1, 4));
        let (tx, rx) = mpsc::unbounded();
        let replay = tokio::spawn(replay.run(rx));

        // First row of a three row event at 000001:500, the other rows arrive in a later batch.
        tx.unbounded_send(insert(&original, 100, 1)).unwrap();
        tx.unbounded_send(Ok(ReplicationMessage::Change(row_of_event(&original, 500, 2, false))))
            .unwrap();

        tokio::time::timeout(Duration::from_secs(10), async {
            while context.replay_progress().events_applied < 2
                || stored_position(&state_store, &context).await.is_none()
            {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(store.rows(&shadow).await.unwrap().len(), 2);
        assert_eq!(context.replay_progress().position, BinlogPosition::new(1, 100));
        assert_eq!(
            stored_position(&state_store, &context).await,
            Some(BinlogPosition::new(1, 100))
        );

        tx.unbounded_send(Ok(ReplicationMessage::Change(row_of_event(&original, 500, 3, false))))
            .unwrap();
        tx.unbounded_send(Ok(ReplicationMessage::Change(row_of_event(&original, 500, 4, true))))
            .unwrap();
        drop(tx);

        assert_eq!(replay.await.unwrap().unwrap(), ReplayResult::StreamEnded);
        assert_eq!(store.rows(&shadow).await.unwrap().len(), 4);
        assert_eq!(context.replay_progress().position, BinlogPosition::new(1, 500));
        assert_eq!(
            stored_position(&state_store, &context).await,
            Some(BinlogPosition::new(1, 500))
        );
    }
}
