use std::sync::Arc;

use futures::channel::mpsc;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use tokio::sync::Mutex;

use crate::error::{MigrationError, MigrationResult};
use crate::replication::ReplicationSource;
use crate::store::database::MemoryStore;
use crate::types::{BinlogPosition, Cell, PositionedEvent, ReplicationMessage, TableName, TableRow};

type MessageSender = mpsc::UnboundedSender<MigrationResult<ReplicationMessage>>;

#[derive(Debug, Default)]
struct Inner {
    log: Vec<ReplicationMessage>,
    senders: Vec<MessageSender>,
}

impl Inner {
    fn publish(&mut self, message: ReplicationMessage) {
        self.log.push(message.clone());
        self.senders
            .retain(|sender| sender.unbounded_send(Ok(message.clone())).is_ok());
    }
}

/// Simulates the application writing to a [`MemoryStore`] and the binlog it produces.
///
/// Every write goes through the store, so it waits while the table is locked and advances the
/// store position, and is then published to all started streams. A stream started at a position
/// first yields the logged messages after it.
#[derive(Debug, Clone)]
pub struct SimulatedSource {
    store: MemoryStore,
    inner: Arc<Mutex<Inner>>,
}

impl SimulatedSource {
    pub fn new(store: MemoryStore) -> Self {
        Self {
            store,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    pub async fn insert(&self, table: &TableName, row: TableRow) -> MigrationResult<BinlogPosition> {
        // Held across the write so the log order matches the position order.
        let mut inner = self.inner.lock().await;
        let event = self.store.source_insert(table, row).await?;

        Ok(Self::publish_event(&mut inner, event))
    }

    /// Returns `None` when no row has the key `key`.
    pub async fn update(
        &self,
        table: &TableName,
        key: &[Cell],
        new_row: TableRow,
    ) -> MigrationResult<Option<BinlogPosition>> {
        let mut inner = self.inner.lock().await;
        let event = self.store.source_update(table, key, new_row).await?;

        Ok(event.map(|event| Self::publish_event(&mut inner, event)))
    }

    /// Returns `None` when no row has the key `key`.
    pub async fn delete(
        &self,
        table: &TableName,
        key: &[Cell],
    ) -> MigrationResult<Option<BinlogPosition>> {
        let mut inner = self.inner.lock().await;
        let event = self.store.source_delete(table, key).await?;

        Ok(event.map(|event| Self::publish_event(&mut inner, event)))
    }

    /// Records a transaction on another table and publishes its position.
    pub async fn checkpoint(&self) -> BinlogPosition {
        let mut inner = self.inner.lock().await;
        let position = self.store.advance_position().await;
        inner.publish(ReplicationMessage::Checkpoint(position));

        position
    }

    /// Makes every started stream yield `err`.
    pub async fn fail(&self, err: MigrationError) {
        let mut inner = self.inner.lock().await;
        let mut err = Some(err);

        // Only the first stream receives the error, the others end.
        for sender in inner.senders.drain(..) {
            if let Some(err) = err.take() {
                let _ = sender.unbounded_send(Err(err));
            }
        }
    }

    /// Ends every started stream.
    pub async fn close(&self) {
        self.inner.lock().await.senders.clear();
    }

    fn publish_event(inner: &mut Inner, event: PositionedEvent) -> BinlogPosition {
        let position = event.position;
        inner.publish(ReplicationMessage::Change(event));

        position
    }
}

impl ReplicationSource for SimulatedSource {
    type Stream = BoxStream<'static, MigrationResult<ReplicationMessage>>;

    async fn start_stream(&self, position: BinlogPosition) -> MigrationResult<Self::Stream> {
        let mut inner = self.inner.lock().await;
        let backlog: Vec<_> = inner
            .log
            .iter()
            .filter(|message| message.position() > position)
            .cloned()
            .map(Ok)
            .collect();
        let (tx, rx) = mpsc::unbounded();
        inner.senders.push(tx);

        Ok(stream::iter(backlog).chain(rx).boxed())
    }
}
