use std::time::Duration;

use osc::cut_over::CutOverState;
use osc::error::ErrorKind;
use osc::migration::{Migration, MigrationOutcome};
use osc::store::database::MemoryStore;
use osc::store::state::MemoryStateStore;
use osc::test_utils::notify::wait_for_cut_over;
use osc::test_utils::schema::{MigrationConfigBuilder, test_schema, test_unique_key};
use osc::test_utils::source::SimulatedSource;
use osc::test_utils::table::{create_tables, load_users, migration_tables, user_row};
use osc::throttle::StaticSignalSource;
use osc::types::{TableName, TableSchema};
use osc_telemetry::tracing::init_test_tracing;
use tokio::sync::watch;

/// Records every cut-over state the context publishes until a terminal one.
fn record_states(
    mut cut_over_rx: watch::Receiver<CutOverState>,
) -> tokio::task::JoinHandle<Vec<CutOverState>> {
    tokio::spawn(async move {
        let mut states = vec![cut_over_rx.borrow_and_update().clone()];
        while cut_over_rx.changed().await.is_ok() {
            let state = cut_over_rx.borrow_and_update().clone();
            states.push(state);
        }

        states
    })
}

#[tokio::test(flavor = "multi_thread")]
async fn cut_over_walks_through_every_state() {
    init_test_tracing();

    let store = MemoryStore::new();
    let (original, _shadow) = create_tables(&store, "test", "users").await;
    load_users(&store, &original, 20).await;

    let config = MigrationConfigBuilder::new("test", "users")
        .chunk_size(5)
        .postpone_cut_over()
        .build();
    let handle = Migration::new(config, store.clone(), MemoryStateStore::new())
        .start(
            migration_tables("test", "users"),
            StaticSignalSource::idle(),
            SimulatedSource::new(store.clone()),
        )
        .await
        .unwrap();
    let states = record_states(handle.context().subscribe_cut_over());

    wait_for_cut_over(handle.context(), |state| *state == CutOverState::Draining).await;
    assert!(handle.context().is_postponed());
    handle.release_cut_over();

    let outcome = handle.wait().await.unwrap();
    assert!(matches!(outcome, MigrationOutcome::Completed { .. }));

    let mut states = states.await.unwrap();
    states.dedup();
    // The recorder may start after the backfill completed.
    states.retain(|state| *state != CutOverState::Copying);
    assert_eq!(
        states,
        vec![
            CutOverState::Draining,
            CutOverState::Locked,
            CutOverState::Swapped,
            CutOverState::Done,
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn unavailable_lock_fails_without_touching_the_original() {
    init_test_tracing();

    let store = MemoryStore::new();
    store.set_lock_unavailable(true).await;
    let (original, shadow) = create_tables(&store, "test", "users").await;
    let rows = load_users(&store, &original, 10).await;

    let config = MigrationConfigBuilder::new("test", "users")
        .lock_timeout_ms(20)
        .cut_over_attempts(2)
        .build();
    let handle = Migration::new(config, store.clone(), MemoryStateStore::new())
        .start(
            migration_tables("test", "users"),
            StaticSignalSource::idle(),
            SimulatedSource::new(store.clone()),
        )
        .await
        .unwrap();
    let context = handle.context().clone();
    let states = record_states(context.subscribe_cut_over());

    let err = handle.wait().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::CutOverLockTimeout);
    assert!(matches!(
        context.cut_over_state(),
        CutOverState::Failed { .. }
    ));
    let states = states.await.unwrap();
    assert!(!states.contains(&CutOverState::Locked));
    assert!(!states.contains(&CutOverState::Swapped));
    assert_eq!(store.rows(&original).await.unwrap(), rows);
    assert!(store.has_table(&shadow).await);
    assert!(!store.is_locked().await);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_rename_unlocks_and_keeps_the_original() {
    init_test_tracing();

    let store = MemoryStore::new();
    let (original, shadow) = create_tables(&store, "test", "users").await;
    let rows = load_users(&store, &original, 10).await;

    // A leftover table of a previous migration blocks the rename.
    let old = TableName::new("test", "_users_old");
    let leftover = TableSchema::new(old.clone(), test_schema("test", "users").column_schemas);
    store
        .create_table(&leftover, &test_unique_key().columns)
        .await
        .unwrap();

    let config = MigrationConfigBuilder::new("test", "users").build();
    let handle = Migration::new(config, store.clone(), MemoryStateStore::new())
        .start(
            migration_tables("test", "users"),
            StaticSignalSource::idle(),
            SimulatedSource::new(store.clone()),
        )
        .await
        .unwrap();
    let context = handle.context().clone();

    let err = handle.wait().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::QueryFailed);
    assert!(matches!(
        context.cut_over_state(),
        CutOverState::Failed { .. }
    ));
    assert!(!store.is_locked().await);
    assert_eq!(store.rows(&original).await.unwrap(), rows);
    assert_eq!(store.rows(&shadow).await.unwrap(), rows);
    assert!(store.rows(&old).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn writes_during_the_lock_land_in_the_new_table() {
    init_test_tracing();

    let store = MemoryStore::new();
    let (original, _shadow) = create_tables(&store, "test", "users").await;
    load_users(&store, &original, 10).await;
    let source = SimulatedSource::new(store.clone());

    let config = MigrationConfigBuilder::new("test", "users")
        .postpone_cut_over()
        .build();
    let handle = Migration::new(config, store.clone(), MemoryStateStore::new())
        .start(
            migration_tables("test", "users"),
            StaticSignalSource::idle(),
            source.clone(),
        )
        .await
        .unwrap();
    let context = handle.context().clone();

    wait_for_cut_over(&context, |state| *state == CutOverState::Draining).await;
    handle.release_cut_over();

    // Either replayed before the swap or blocked by the lock and written to the new table.
    let writer = {
        let source = source.clone();
        let original = original.clone();
        tokio::spawn(async move {
            for id in 100..120 {
                source
                    .insert(&original, user_row(id, "late", 5))
                    .await
                    .unwrap();
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
    };

    let outcome = handle.wait().await.unwrap();
    writer.await.unwrap();

    assert!(matches!(outcome, MigrationOutcome::Completed { .. }));
    let rows = store.rows(&original).await.unwrap();
    assert_eq!(rows.len(), 30);
}
