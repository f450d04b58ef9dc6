use tokio::sync::watch;

/// Result of an operation that can be interrupted by shutdown.
///
/// `Shutdown` carries whatever was produced before the shutdown was observed.
#[derive(Debug, PartialEq, Eq)]
pub enum ShutdownResult<T, I> {
    Ok(T),
    Shutdown(I),
}

impl<T, I> ShutdownResult<T, I> {
    pub fn should_shutdown(&self) -> bool {
        matches!(self, ShutdownResult::Shutdown(_))
    }
}

/// Transmitter side of the shutdown channel.
#[derive(Debug, Clone)]
pub struct ShutdownTx(watch::Sender<()>);

impl ShutdownTx {
    /// Signals shutdown to every subscribed receiver.
    ///
    /// Never fails, even when no receiver is left.
    pub fn shutdown(&self) {
        self.0.send_replace(());
    }

    pub fn subscribe(&self) -> ShutdownRx {
        self.0.subscribe()
    }
}

/// Receiver side of the shutdown channel.
///
/// A receiver observes shutdown through `changed()` or `has_changed()`.
pub type ShutdownRx = watch::Receiver<()>;

/// Creates a new shutdown channel.
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(());
    (ShutdownTx(tx), rx)
}

/// Resolves once shutdown is signalled on `shutdown_rx`.
///
/// Never resolves when the transmitter is dropped without signalling.
pub async fn wait_for_shutdown(shutdown_rx: &mut ShutdownRx) {
    if shutdown_rx.changed().await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Returns whether shutdown was signalled on `shutdown_rx`.
///
/// A dropped transmitter is not a shutdown signal.
pub fn is_shutdown(shutdown_rx: &ShutdownRx) -> bool {
    shutdown_rx.has_changed().unwrap_or(false)
}
