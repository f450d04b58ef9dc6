use tokio::sync::watch;

/// Transmitter side of the operator pause channel.
///
/// A pause holds both the copy and the replay worker at their next throttle check.
#[derive(Debug, Clone)]
pub struct PauseTx(watch::Sender<bool>);

impl PauseTx {
    pub fn pause(&self) {
        // `send_replace` works before any receiver subscribed.
        self.0.send_replace(true);
    }

    pub fn resume(&self) {
        self.0.send_replace(false);
    }

    pub fn is_paused(&self) -> bool {
        *self.0.borrow()
    }

    pub fn subscribe(&self) -> PauseRx {
        self.0.subscribe()
    }
}

/// Receiver side of the operator pause channel.
pub type PauseRx = watch::Receiver<bool>;

/// Creates a new pause channel, initially not paused.
pub fn create_pause_channel() -> (PauseTx, PauseRx) {
    let (tx, rx) = watch::channel(false);
    (PauseTx(tx), rx)
}
