use std::fmt;

use crate::types::{BinlogPosition, TableName, TableRow};

/// A row inserted into a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertEvent {
    pub table: TableName,
    pub new_row: TableRow,
}

/// A row changed in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateEvent {
    pub table: TableName,
    pub old_row: TableRow,
    pub new_row: TableRow,
}

/// A row removed from a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteEvent {
    pub table: TableName,
    pub old_row: TableRow,
}

/// A row level change captured from the binlog, or produced by the backfill.
///
/// Row images are positional and follow the column order of the original table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Insert(InsertEvent),
    Update(UpdateEvent),
    Delete(DeleteEvent),
}

impl ChangeEvent {
    pub fn table(&self) -> &TableName {
        match self {
            ChangeEvent::Insert(event) => &event.table,
            ChangeEvent::Update(event) => &event.table,
            ChangeEvent::Delete(event) => &event.table,
        }
    }

    pub fn event_type(&self) -> EventType {
        self.into()
    }
}

/// Kind of a [`ChangeEvent`], for logging and raw event decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Insert,
    Update,
    Delete,
}

impl From<&ChangeEvent> for EventType {
    fn from(event: &ChangeEvent) -> Self {
        match event {
            ChangeEvent::Insert(_) => EventType::Insert,
            ChangeEvent::Update(_) => EventType::Update,
            ChangeEvent::Delete(_) => EventType::Delete,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Insert => f.write_str("insert"),
            EventType::Update => f.write_str("update"),
            EventType::Delete => f.write_str("delete"),
        }
    }
}

/// A change event together with the binlog position right after it.
///
/// A binlog rows event can carry many rows, all of them share the event's end position. Only
/// the last row has `ends_event` set, the position is reached once that row is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionedEvent {
    pub position: BinlogPosition,
    pub event: ChangeEvent,
    pub ends_event: bool,
}

impl PositionedEvent {
    /// A change that is the only row of its binlog event.
    pub fn single(position: BinlogPosition, event: ChangeEvent) -> Self {
        Self {
            position,
            event,
            ends_event: true,
        }
    }
}

/// A message of the replication stream.
///
/// Besides row changes the stream carries bare positions, emitted for events that do not touch
/// rows (transaction commits, heartbeats, changes to other tables filtered upstream). They let
/// the replay position advance while the migrated table is idle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicationMessage {
    Change(PositionedEvent),
    Checkpoint(BinlogPosition),
}

impl ReplicationMessage {
    pub fn position(&self) -> BinlogPosition {
        match self {
            ReplicationMessage::Change(event) => event.position,
            ReplicationMessage::Checkpoint(position) => *position,
        }
    }
}
