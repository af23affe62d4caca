use std::sync::Arc;
use tokio::{signal, sync::watch};
use tracing::{error, info};

// Sending half of the operator interrupt. Cloning shares the same signal.
#[derive(Clone, Debug)]
pub struct InterruptHandle {
    tx: watch::Sender<bool>,
}

// Receiving half, watched by coordinators only. Probe workers never hold one.
#[derive(Clone, Debug)]
pub struct Interrupt {
    rx: watch::Receiver<bool>,
    // Set only for `never`: nobody can trigger it, but the channel stays open
    _idle: Option<Arc<watch::Sender<bool>>>,
}

impl InterruptHandle {
    pub fn trigger(&self) {
        // send_replace stores the value even when no receiver is alive yet
        self.tx.send_replace(true);
    }
}

impl Interrupt {
    pub fn channel() -> (InterruptHandle, Interrupt) {
        let (tx, rx) = watch::channel(false);
        (InterruptHandle { tx }, Interrupt { rx, _idle: None })
    }

    // An interrupt that never fires, for library callers without signal handling
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        Interrupt {
            rx,
            _idle: Some(Arc::new(tx)),
        }
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    // Resolves once the interrupt has fired (immediately if it already has)
    pub async fn triggered(&self) {
        let mut rx = self.rx.clone();
        // If the sender is dropped without firing, stay pending forever
        let fired = rx.wait_for(|fired| *fired).await.is_ok();
        if !fired {
            std::future::pending::<()>().await;
        }
    }
}

// Spawn a task dedicated to listening for the Ctrl+C signal
pub fn spawn_ctrl_c_listener(handle: InterruptHandle) {
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl+C received, signaling shutdown");
                eprintln!("\nCtrl+C received, cancelling outstanding probes...");
                handle.trigger();
            }
            Err(err) => {
                error!("Unable to listen for shutdown signal: {err}");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn trigger_before_wait_is_not_lost() {
        let (handle, interrupt) = Interrupt::channel();
        handle.trigger();
        assert!(interrupt.is_triggered());
        tokio::time::timeout(Duration::from_secs(1), interrupt.triggered())
            .await
            .expect("already-fired interrupt should resolve immediately");
    }

    #[tokio::test]
    async fn never_stays_pending() {
        let interrupt = Interrupt::never();
        let waited = tokio::time::timeout(Duration::from_millis(50), interrupt.triggered()).await;
        assert!(waited.is_err());
        assert!(!interrupt.is_triggered());
    }

    #[tokio::test]
    async fn never_releases_its_channel_on_drop() {
        let interrupt = Interrupt::never();
        let copy = interrupt.clone();
        let sender = interrupt._idle.clone().unwrap();
        assert_eq!(sender.receiver_count(), 2);

        drop(interrupt);
        drop(copy);
        assert_eq!(sender.receiver_count(), 0);
        assert_eq!(Arc::strong_count(&sender), 1);
    }

    #[tokio::test]
    async fn dropped_handle_does_not_fire() {
        let (handle, interrupt) = Interrupt::channel();
        drop(handle);
        let waited = tokio::time::timeout(Duration::from_millis(50), interrupt.triggered()).await;
        assert!(waited.is_err());
    }
}
