//! Runs the named background loops (inventory refresh, expiry/idle/hard-max
//! sweeps, reconciliation, cost accrual) as independent `tokio` tasks and
//! gives the owning binary a single handle to shut all of them down
//! together. No loop's failure is allowed to take another down with it —
//! each iteration's error is logged and the loop ticks again on its own
//! interval.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{error, info};

/// One running background loop plus the means to stop it.
pub struct LoopHandle {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl LoopHandle {
    /// Signal the loop to stop after its current tick and wait for it to
    /// exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            error!(loop_name = self.name, %err, "background loop task panicked");
        }
    }
}

/// Owns every named loop started for one process. Dropping this without
/// calling [`Supervisor::shutdown_all`] abandons the tasks; they keep
/// running detached until the process exits.
#[derive(Default)]
pub struct Supervisor {
    loops: Vec<LoopHandle>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `tick` on a fixed `interval`, repeating until [`shutdown_all`]
    /// is called. `tick` errors are logged and swallowed — a single bad
    /// tick must not stop the loop from trying again.
    ///
    /// [`shutdown_all`]: Supervisor::shutdown_all
    pub fn spawn<F, Fut>(&mut self, name: &'static str, period: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), fleet_core::error::FleetError>> + Send,
    {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = tick().await {
                            error!(loop_name = name, %err, "background loop tick failed");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            info!(loop_name = name, "background loop shutting down");
                            break;
                        }
                    }
                }
            }
        });
        self.loops.push(LoopHandle { name, shutdown: shutdown_tx, task });
    }

    /// Signal every loop to stop and wait for all of them to exit.
    pub async fn shutdown_all(self) {
        for loop_handle in self.loops {
            loop_handle.shutdown().await;
        }
    }

    /// Number of loops currently registered, for tests and diagnostics.
    pub fn len(&self) -> usize {
        self.loops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }
}
