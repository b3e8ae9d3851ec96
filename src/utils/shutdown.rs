use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tokio::{signal, sync::watch};

/// Why the process is stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT (Ctrl+C)
    Interrupt,
    /// SIGTERM
    Terminate,
    /// Triggered from code
    Requested,
}

/// One-shot shutdown latch shared by long-running commands.
#[derive(Clone)]
pub struct Shutdown {
    tx: watch::Sender<Option<ShutdownReason>>,
    initiated: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            tx,
            initiated: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_initiated(&self) -> bool {
        self.initiated.load(Ordering::Relaxed)
    }

    /// Fire the latch. Only the first reason is kept.
    pub fn trigger(&self, reason: ShutdownReason) {
        if self
            .initiated
            .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            tracing::info!(?reason, "shutdown initiated");
            self.tx.send_replace(Some(reason));
        }
    }

    /// Resolve once the latch fires, immediately if it already has.
    pub async fn wait(&self) -> ShutdownReason {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(reason) = *rx.borrow_and_update() {
                return reason;
            }
            if rx.changed().await.is_err() {
                return ShutdownReason::Requested;
            }
        }
    }

    /// Wait for SIGINT or SIGTERM and fire the latch.
    pub async fn listen_for_signals(&self) {
        let reason = tokio::select! {
            result = signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::error!("Failed to listen for Ctrl+C: {}", e);
                }
                ShutdownReason::Interrupt
            }
            _ = wait_for_sigterm() => ShutdownReason::Terminate,
            reason = self.wait() => reason,
        };
        self.trigger(reason);
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_trigger_wakes_waiters() {
        let shutdown = Shutdown::new();
        let waiter = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { shutdown.wait().await })
        };
        assert!(!shutdown.is_initiated());

        shutdown.trigger(ShutdownReason::Requested);
        let reason = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reason, ShutdownReason::Requested);
        assert!(shutdown.is_initiated());
    }

    #[tokio::test]
    async fn test_first_reason_wins() {
        let shutdown = Shutdown::new();
        shutdown.trigger(ShutdownReason::Terminate);
        shutdown.trigger(ShutdownReason::Interrupt);
        assert_eq!(shutdown.wait().await, ShutdownReason::Terminate);
    }

    #[tokio::test]
    async fn test_listen_returns_on_manual_trigger() {
        let shutdown = Shutdown::new();
        let listener = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { shutdown.listen_for_signals().await })
        };
        shutdown.trigger(ShutdownReason::Requested);
        tokio::time::timeout(Duration::from_secs(1), listener)
            .await
            .unwrap()
            .unwrap();
    }
}
