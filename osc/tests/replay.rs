use std::sync::Arc;

use osc::concurrency::shutdown::create_shutdown_channel;
use osc::context::MigrationContext;
use osc::replication::ReplicationSource;
use osc::replication::replay::{ReplayLoop, ReplayResult};
use osc::store::database::{MemoryStore, MigrationStore};
use osc::store::state::{MemoryStateStore, StateStore};
use osc::test_utils::schema::{migration_config, shadow_schema, test_schema, test_unique_key};
use osc::test_utils::source::SimulatedSource;
use osc::test_utils::table::{create_tables, user_row};
use osc::throttle::Throttler;
use osc::types::{BinlogPosition, Cell, TableName};
use osc_telemetry::tracing::init_test_tracing;

/// Replays the source from `start` into the shadow table until the source is closed.
async fn replay_from(
    store: &MemoryStore,
    state_store: &MemoryStateStore,
    source: &SimulatedSource,
    start: BinlogPosition,
) -> Arc<MigrationContext> {
    let (context, publishers) = MigrationContext::new(
        migration_config("test", "users"),
        test_schema("test", "users"),
        shadow_schema("test", "users"),
        Some(test_unique_key()),
        start,
    )
    .unwrap();
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

    let stream = source.start_stream(start).await.unwrap();
    source.close().await;

    let result = ReplayLoop::new(
        context.clone(),
        store.clone(),
        state_store.clone(),
        Throttler::unthrottled(),
        publishers.replay,
        shutdown_rx,
    )
    .run(stream)
    .await
    .unwrap();
    assert_eq!(result, ReplayResult::StreamEnded);

    context
}

async fn write_history(source: &SimulatedSource, table: &TableName) {
    for id in 1..=10 {
        source
            .insert(table, user_row(id, "first", id))
            .await
            .unwrap();
    }
    source.checkpoint().await;

    // Key change, plain update, delete, and a reinsert of a deleted key.
    source
        .update(table, &[Cell::I64(1)], user_row(100, "moved", 1))
        .await
        .unwrap();
    source
        .update(table, &[Cell::I64(2)], user_row(2, "second", 22))
        .await
        .unwrap();
    source.delete(table, &[Cell::I64(3)]).await.unwrap();
    source.delete(table, &[Cell::I64(4)]).await.unwrap();
    source
        .insert(table, user_row(4, "again", 44))
        .await
        .unwrap();
    source.checkpoint().await;
}

#[tokio::test]
async fn replayed_changes_match_the_original_table() {
    init_test_tracing();

    let store = MemoryStore::new();
    let state_store = MemoryStateStore::new();
    let (original, shadow) = create_tables(&store, "test", "users").await;
    let source = SimulatedSource::new(store.clone());
    let start = store.current_position().await.unwrap();

    write_history(&source, &original).await;
    let end = store.current_position().await.unwrap();

    let context = replay_from(&store, &state_store, &source, start).await;

    assert_eq!(
        store.rows(&shadow).await.unwrap(),
        store.rows(&original).await.unwrap()
    );
    let progress = context.replay_progress();
    assert_eq!(progress.position, end);
    assert_eq!(progress.events_applied, 15);
    let stored = state_store.load_progress(context.id()).await.unwrap().unwrap();
    assert_eq!(stored.replay_position, Some(end));
}

#[tokio::test]
async fn replaying_the_same_changes_twice_converges() {
    init_test_tracing();

    let store = MemoryStore::new();
    let state_store = MemoryStateStore::new();
    let (original, shadow) = create_tables(&store, "test", "users").await;
    let source = SimulatedSource::new(store.clone());
    let start = store.current_position().await.unwrap();

    write_history(&source, &original).await;

    replay_from(&store, &state_store, &source, start).await;
    let once = store.rows(&shadow).await.unwrap();
    replay_from(&store, &state_store, &source, start).await;

    assert_eq!(store.rows(&shadow).await.unwrap(), once);
    assert_eq!(once, store.rows(&original).await.unwrap());
}

#[tokio::test]
async fn replay_resumes_after_the_given_position() {
    init_test_tracing();

    let store = MemoryStore::new();
    let state_store = MemoryStateStore::new();
    let (original, shadow) = create_tables(&store, "test", "users").await;
    let source = SimulatedSource::new(store.clone());

    source.insert(&original, user_row(1, "a", 1)).await.unwrap();
    let resume_at = source.insert(&original, user_row(2, "b", 2)).await.unwrap();
    source.insert(&original, user_row(3, "c", 3)).await.unwrap();

    let context = replay_from(&store, &state_store, &source, resume_at).await;

    assert_eq!(context.replay_progress().events_applied, 1);
    assert_eq!(
        store.rows(&shadow).await.unwrap(),
        vec![user_row(3, "c", 3)]
    );
}

#[tokio::test]
async fn changes_to_other_tables_only_advance_the_position() {
    init_test_tracing();

    let store = MemoryStore::new();
    let state_store = MemoryStateStore::new();
    let (_original, shadow) = create_tables(&store, "test", "users").await;
    let (other, _) = create_tables(&store, "test", "accounts").await;
    let source = SimulatedSource::new(store.clone());
    let start = store.current_position().await.unwrap();

    source.insert(&other, user_row(1, "a", 1)).await.unwrap();
    let end = source.checkpoint().await;

    let context = replay_from(&store, &state_store, &source, start).await;

    let progress = context.replay_progress();
    assert_eq!(progress.events_applied, 0);
    assert_eq!(progress.events_skipped, 1);
    assert_eq!(progress.position, end);
    assert!(store.rows(&shadow).await.unwrap().is_empty());
}
