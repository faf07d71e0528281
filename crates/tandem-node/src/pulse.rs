//! Periodic pulse: refresh the view and re-announce our writer key.

use std::sync::Arc;
use std::time::Duration;

use tandem_base::{Apply, Base};
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use tracing::{trace, warn};

/// Run pulses every `interval` until `shutdown` flips.
///
/// Each pulse runs `update()` and publishes `record` to every live
/// key-channel connection. Failures are logged and never stop the loop.
pub async fn run_pulse<A: Apply>(
    base: Base<A>,
    record: Arc<str>,
    pulses: broadcast::Sender<Arc<str>>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; the greeting already covered it.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = base.update().await {
                    warn!("Pulse update failed: {}", e);
                }
                let receivers = pulses.send(Arc::clone(&record)).unwrap_or(0);
                trace!("Pulse sent to {} connections", receivers);
            }
            _ = shutdown.changed() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reducer::KvReducer;
    use tandem_base::Storage;
    use tempfile::tempdir;

    #[tokio::test(start_paused = true)]
    async fn pulses_on_interval_until_shutdown() {
        let dir = tempdir().unwrap();
        let storage = Arc::new(Storage::open(dir.path()).unwrap());
        let base = Base::open(storage, None, KvReducer).unwrap();
        let (pulses, mut rx) = broadcast::channel(16);
        let (shutdown_tx, shutdown) = watch::channel(false);

        let task = tokio::spawn(run_pulse(
            base.clone(),
            Arc::from("WRITER_KEY:x\n"),
            pulses,
            Duration::from_millis(1000),
            shutdown,
        ));

        for _ in 0..3 {
            let pulse = rx.recv().await.unwrap();
            assert_eq!(&*pulse, "WRITER_KEY:x\n");
        }
        // The pulse ran update(), so the bootstrap peer became writable.
        assert!(base.writable());

        shutdown_tx.send_replace(true);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn survives_a_closed_base() {
        let dir = tempdir().unwrap();
        let storage = Arc::new(Storage::open(dir.path()).unwrap());
        let base = Base::open(storage, None, KvReducer).unwrap();
        base.close().await.unwrap();
        let (pulses, mut rx) = broadcast::channel(16);
        let (_shutdown_tx, shutdown) = watch::channel(false);

        tokio::spawn(run_pulse(
            base,
            Arc::from("p"),
            pulses,
            Duration::from_millis(500),
            shutdown,
        ));

        assert_eq!(&*rx.recv().await.unwrap(), "p");
        assert_eq!(&*rx.recv().await.unwrap(), "p");
    }
}
