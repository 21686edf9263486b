// ============================
// crates/guard-lib/src/tasks.rs
// ============================
//! Periodic maintenance jobs with cooperative shutdown.

use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

/// Owns the background jobs of one engine instance.
///
/// Jobs stop when [`BackgroundTasks::shutdown`] is awaited or when the set is
/// dropped, so tests never leak timers.
#[derive(Debug)]
pub struct BackgroundTasks {
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for BackgroundTasks {
    fn default() -> Self {
        Self::new()
    }
}

impl BackgroundTasks {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Run `job` every `every`, starting one period from now.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn_periodic<F, Fut>(&self, name: &'static str, every: Duration, job: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut shutdown = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            let mut ticker = time::interval_at(time::Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!(task = name, "maintenance task stopping");
                            break;
                        }
                    }
                    _ = ticker.tick() => job().await,
                }
            }
        });
        self.handles.lock().push(handle);
    }

    /// Number of jobs that have been started and not yet reaped
    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.lock().is_empty()
    }

    /// Signal every job to stop and wait for them to finish.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<_> = std::mem::take(&mut *self.handles.lock());
        let count = handles.len();
        for handle in handles {
            let _ = handle.await;
        }
        if count > 0 {
            info!(tasks = count, "background maintenance stopped");
        }
    }
}

impl Drop for BackgroundTasks {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles.get_mut().drain(..) {
            handle.abort();
        }
    }
}
