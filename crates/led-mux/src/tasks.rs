//! Owned background tasks with a stop signal
//!
//! Every long-running loop the manager starts (dispatch, polling, ramping)
//! is held as a [`TaskHandle`]. Stopping sends the signal and then joins the
//! task, so shutdown is deterministic.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

/// Receiver side of a stop signal
///
/// Loops should `select!` on [`StopSignal::stopped`] alongside their work.
#[derive(Debug, Clone)]
pub struct StopSignal(watch::Receiver<bool>);

impl StopSignal {
    /// Resolves once a stop was requested or the handle was dropped
    pub async fn stopped(&mut self) {
        while !*self.0.borrow_and_update() {
            if self.0.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.0.borrow()
    }
}

/// A spawned task plus the means to stop it
#[derive(Debug)]
pub struct TaskHandle {
    stop: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl TaskHandle {
    /// Spawn `task`, handing it the stop signal
    pub fn spawn<F, Fut>(task: F) -> Self
    where
        F: FnOnce(StopSignal) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (stop, rx) = watch::channel(false);
        let join = tokio::spawn(task(StopSignal(rx)));
        Self { stop, join }
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Signal the task and wait for it to exit
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        join_quietly(self.join).await;
    }

    /// Cancel the task at its next suspension point and wait for it
    pub async fn cancel(self) {
        self.join.abort();
        join_quietly(self.join).await;
    }

    /// Cancel without waiting
    pub fn abort(&self) {
        self.join.abort();
    }
}

/// Lock a std mutex, recovering the data if a holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn join_quietly(join: JoinHandle<()>) {
    if let Err(e) = join.await {
        if !e.is_cancelled() {
            warn!("Background task failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_stop_joins_loop() {
        let exited = Arc::new(AtomicBool::new(false));
        let flag = exited.clone();
        let handle = TaskHandle::spawn(|mut stop| async move {
            loop {
                tokio::select! {
                    _ = stop.stopped() => break,
                    _ = tokio::time::sleep(Duration::from_millis(5)) => {}
                }
            }
            flag.store(true, Ordering::SeqCst);
        });
        handle.stop().await;
        assert!(exited.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancel_tolerates_pending_task() {
        let handle = TaskHandle::spawn(|_| std::future::pending::<()>());
        assert!(!handle.is_finished());
        handle.cancel().await;
    }
}
