use crate::bail;
use crate::error::{ErrorKind, MigrationResult};
use crate::types::{
    BinlogPosition, Cell, ChangeEvent, DeleteEvent, EventType, InsertEvent, PositionedEvent,
    TableName, TableRow, UpdateEvent,
};

/// Before and after images of one row in a rows event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRowChange {
    pub before: Option<Vec<Cell>>,
    pub after: Option<Vec<Cell>>,
}

/// A decoded binlog rows event, as handed over by the binlog reader.
///
/// One rows event can carry many rows of the same table and kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRowsEvent {
    pub table: TableName,
    pub event_type: EventType,
    /// Binlog position right after the event.
    pub position: BinlogPosition,
    pub rows: Vec<RawRowChange>,
}

/// Converts a rows event into positioned change events, one per row.
///
/// All rows carry the event position, only the last one ends the event. Every row must carry
/// exactly the images its kind requires: an after image for inserts, a before image for deletes
/// and both for updates. Anything else is a malformed event.
pub fn convert_rows_event(raw: RawRowsEvent) -> MigrationResult<Vec<PositionedEvent>> {
    let RawRowsEvent {
        table,
        event_type,
        position,
        rows,
    } = raw;

    let last = rows.len().saturating_sub(1);
    rows.into_iter()
        .enumerate()
        .map(|(index, row)| {
            let event = convert_row_change(table.clone(), event_type, row)?;
            Ok(PositionedEvent {
                position,
                event,
                ends_event: index == last,
            })
        })
        .collect()
}

fn convert_row_change(
    table: TableName,
    event_type: EventType,
    row: RawRowChange,
) -> MigrationResult<ChangeEvent> {
    let event = match (event_type, row.before, row.after) {
        (EventType::Insert, None, Some(after)) => ChangeEvent::Insert(InsertEvent {
            table,
            new_row: TableRow::new(after),
        }),
        (EventType::Update, Some(before), Some(after)) => ChangeEvent::Update(UpdateEvent {
            table,
            old_row: TableRow::new(before),
            new_row: TableRow::new(after),
        }),
        (EventType::Delete, Some(before), None) => ChangeEvent::Delete(DeleteEvent {
            table,
            old_row: TableRow::new(before),
        }),
        (event_type, before, after) => {
            bail!(
                ErrorKind::MalformedEvent,
                "Row images do not match the event kind",
                format!(
                    "{event_type} event on {table} with before image: {}, after image: {}",
                    before.is_some(),
                    after.is_some()
                )
            );
        }
    };

    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(event_type: EventType, rows: Vec<RawRowChange>) -> RawRowsEvent {
        RawRowsEvent {
            table: TableName::new("test", "items"),
            event_type,
            position: BinlogPosition::new(1, 400),
            rows,
        }
    }

    #[test]
    fn converts_every_row_with_the_event_position() {
        let events = convert_rows_event(raw(
            EventType::Insert,
            vec![
                RawRowChange {
                    before: None,
                    after: Some(vec![Cell::I64(1)]),
                },
                RawRowChange {
                    before: None,
                    after: Some(vec![Cell::I64(2)]),
                },
            ],
        ))
        .unwrap();

        assert_eq!(events.len(), 2);
        assert!(
            events
                .iter()
                .all(|e| e.position == BinlogPosition::new(1, 400))
        );
        assert_eq!(events[1].event.event_type(), EventType::Insert);
    }

    #[test]
    fn only_the_last_row_ends_the_event() {
        let rows = (1..=3)
            .map(|id| RawRowChange {
                before: None,
                after: Some(vec![Cell::I64(id)]),
            })
            .collect();

        let events = convert_rows_event(raw(EventType::Insert, rows)).unwrap();

        let ends: Vec<_> = events.iter().map(|e| e.ends_event).collect();
        assert_eq!(ends, vec![false, false, true]);
    }

    #[test]
    fn update_requires_both_images() {
        let err = convert_rows_event(raw(
            EventType::Update,
            vec![RawRowChange {
                before: None,
                after: Some(vec![Cell::I64(1)]),
            }],
        ))
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::MalformedEvent);
    }

    #[test]
    fn delete_with_after_image_is_malformed() {
        let err = convert_rows_event(raw(
            EventType::Delete,
            vec![RawRowChange {
                before: Some(vec![Cell::I64(1)]),
                after: Some(vec![Cell::I64(1)]),
            }],
        ))
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::MalformedEvent);
    }
}
