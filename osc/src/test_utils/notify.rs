use std::time::Duration;

use tokio::time::timeout;

use crate::context::MigrationContext;
use crate::cut_over::CutOverState;

/// Default timeout for waiting on a migration state.
///
/// Migrations in tests run against memory stores, reaching any state should take well under a
/// few seconds.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Waits until the cut-over state satisfies `predicate` and returns it.
///
/// # Panics
///
/// Panics if the state is not reached within [`DEFAULT_WAIT_TIMEOUT`], or if the cut-over
/// coordinator is gone before.
pub async fn wait_for_cut_over<F>(context: &MigrationContext, mut predicate: F) -> CutOverState
where
    F: FnMut(&CutOverState) -> bool,
{
    let mut cut_over_rx = context.subscribe_cut_over();
    let state = timeout(DEFAULT_WAIT_TIMEOUT, async {
        cut_over_rx
            .wait_for(|state| predicate(state))
            .await
            .map(|state| state.clone())
    })
    .await;

    match state {
        Ok(Ok(state)) => state,
        Ok(Err(_)) => panic!("cut-over coordinator stopped before the expected state"),
        Err(_) => panic!(
            "Cut-over state wait timed out after {DEFAULT_WAIT_TIMEOUT:?}, current state is {}. \
             This likely indicates the expected state was never reached.",
            context.cut_over_state()
        ),
    }
}

/// Waits until the backfill copied at least `rows` rows.
///
/// # Panics
///
/// Panics if the rows are not copied within [`DEFAULT_WAIT_TIMEOUT`].
pub async fn wait_for_copied_rows(context: &MigrationContext, rows: u64) {
    let copied = timeout(DEFAULT_WAIT_TIMEOUT, async {
        while context.copy_progress().rows_copied < rows {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    if copied.is_err() {
        panic!(
            "Backfill wait timed out after {DEFAULT_WAIT_TIMEOUT:?} with {} of {rows} rows copied.",
            context.copy_progress().rows_copied
        );
    }
}
