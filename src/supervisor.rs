// src/supervisor.rs - Worker task ownership and per-iteration failure boundary
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Run one loop iteration, logging and swallowing a panic instead of killing the worker.
pub async fn guarded<F>(worker: &'static str, iteration: F) -> Option<F::Output>
where
    F: Future,
{
    match AssertUnwindSafe(iteration).catch_unwind().await {
        Ok(output) => Some(output),
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(worker, panic = %message, "Worker iteration panicked, continuing");
            None
        }
    }
}

/// Owns the worker tasks of one monitored job and the token that stops them.
#[derive(Debug)]
pub struct Supervisor {
    cancel: CancellationToken,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn spawn<F>(&mut self, name: &'static str, worker: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::debug!(worker = name, "Spawning worker");
        self.handles.push((name, tokio::spawn(worker)));
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    /// Signal every worker to stop, then wait up to `grace` for each; stragglers are aborted.
    pub async fn shutdown(self, grace: Duration) {
        self.cancel.cancel();
        let deadline = tokio::time::Instant::now() + grace;
        for (name, mut handle) in self.handles {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => tracing::debug!(worker = name, "Worker stopped"),
                Ok(Err(e)) => tracing::warn!(worker = name, error = %e, "Worker ended abnormally"),
                Err(_) => {
                    tracing::warn!(worker = name, "Worker did not stop within grace period, aborting");
                    handle.abort();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn guarded_returns_output() {
        assert_eq!(guarded("test", async { 7 }).await, Some(7));
    }

    #[tokio::test]
    async fn guarded_swallows_panic() {
        let result = guarded("test", async {
            if true {
                panic!("boom");
            }
            1
        })
        .await;
        assert_eq!(result, None);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_cooperative_workers() {
        let mut supervisor = Supervisor::new();
        let stopped = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let token = supervisor.token();
            let stopped = stopped.clone();
            supervisor.spawn("worker", async move {
                token.cancelled().await;
                stopped.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(supervisor.worker_count(), 3);
        supervisor.shutdown(Duration::from_secs(1)).await;
        assert_eq!(stopped.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_aborts_stuck_worker() {
        let mut supervisor = Supervisor::new();
        supervisor.spawn("stuck", async {
            std::future::pending::<()>().await;
        });
        let token = supervisor.token();
        supervisor.shutdown(Duration::from_millis(100)).await;
        assert!(token.is_cancelled());
    }
}
