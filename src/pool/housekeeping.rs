//! Shared single-threaded periodic task runner, one per pool instance
//! (`spec.md` §2, §4.3, §5).
//!
//! Grounded on the teacher's maintenance-task framing in
//! `pool/connection_pool.rs` ("Background maintenance thread for
//! housekeeping") and on `networking/pool/eviction.rs`'s interval-loop style,
//! expressed here as one spawned Tokio task per pool rather than a shared
//! background thread across pools — `spec.md` §9 is explicit that
//! concurrency is achieved through many workers, not a dedicated thread pool,
//! and that housekeeping gets "one worker per pool."

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Runs a closure on a fixed interval until `stop()` is called or the
/// executor is dropped. `stop` takes `&self` (not `&mut self`) so an owner
/// holding the executor behind a shared `Arc<Pool>` can still shut it down
/// from a `&self` method, matching how `ManagedPool::close` is called.
pub struct HousekeepingExecutor {
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl HousekeepingExecutor {
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, mut rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        tracing::trace!(task = name, "housekeeping tick");
                        tick().await;
                    }
                    _ = &mut rx => {
                        tracing::debug!(task = name, "housekeeping stopped");
                        break;
                    }
                }
            }
        });

        Self {
            shutdown: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
        }
    }

    pub async fn stop(&self) {
        if let Some(tx) = self.shutdown.lock().take() {
            let _ = tx.send(());
        }
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl Drop for HousekeepingExecutor {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.lock().take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
    }
}
