//! Graceful shutdown: signal wait, broadcast, drain with a deadline.

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Broadcasts the shutdown decision to every long-running task.
pub struct ShutdownSignal {
    tx: watch::Sender<bool>,
}

impl ShutdownSignal {
    /// Create an untriggered signal.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// A receiver that flips to `true` on trigger.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Flip the signal. Idempotent.
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for SIGTERM or Ctrl+C.
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => tracing::error!(error = %err, "failed to listen for SIGTERM"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received ctrl-c"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}

/// Wait for tasks to finish within the drain deadline, force-aborting the
/// stragglers. Aborted pipeline runs leave their thought in `processing`,
/// which the recovery sweeper later rescues, never in an ill-defined state.
///
/// Returns `true` when everything drained in time.
pub async fn drain_with_deadline(handles: Vec<JoinHandle<()>>, deadline: Duration) -> bool {
    let drain = async {
        for handle in &handles {
            // JoinHandle is polled via mutable ref; abort handles below
            // keep working because abort() only needs a shared ref.
            while !handle.is_finished() {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    };

    let drained = tokio::time::timeout(deadline, drain).await.is_ok();
    if !drained {
        tracing::warn!(
            deadline_secs = deadline.as_secs(),
            "drain deadline exceeded, force-cancelling remaining tasks"
        );
        for handle in &handles {
            handle.abort();
        }
    }

    for handle in handles {
        match handle.await {
            Ok(()) => {}
            Err(err) if err.is_cancelled() => {}
            Err(err) => tracing::error!(error = %err, "worker task panicked"),
        }
    }
    drained
}
