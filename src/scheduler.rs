//! Execution substrate for the pool's asynchronous work
//!
//! Every lease grant, checkout retry, health-check continuation and disposal
//! runs as its own unit of work on a [`Scheduler`], never inline on the stack
//! that triggered it. A caller that releases a connection and immediately
//! checks out another therefore never grows the call stack.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::AbortHandle;

use crate::errors::{PoolError, PoolResult};

/// A unit of work handed to a [`Scheduler`]
pub type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Runs pool work on worker contexts distinct from the caller's stack
pub trait Scheduler: Send + Sync + 'static {
    /// Run `task` as soon as a worker is free
    fn schedule(&self, task: Task) -> ScheduledTask;

    /// Run `task` once `delay` has elapsed
    fn schedule_after(&self, delay: Duration, task: Task) -> ScheduledTask;

    /// Whether scheduled work may run on the scheduling thread's own stack.
    ///
    /// Pools refuse schedulers that return `true`.
    fn runs_inline(&self) -> bool {
        false
    }
}

/// Handle to scheduled work that can be cancelled before it completes
#[derive(Debug, Default)]
pub struct ScheduledTask {
    abort: Option<AbortHandle>,
}

impl ScheduledTask {
    pub fn new(abort: AbortHandle) -> Self {
        Self { abort: Some(abort) }
    }

    /// A handle for work that cannot be cancelled
    pub fn detached() -> Self {
        Self { abort: None }
    }

    /// Cancel the work if it has not finished yet
    pub fn cancel(&self) {
        if let Some(abort) = &self.abort {
            abort.abort();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.abort.as_ref().is_none_or(AbortHandle::is_finished)
    }
}

/// [`Scheduler`] backed by a tokio runtime
///
/// # Examples
///
/// ```
/// use esox_connpool::{Scheduler, TokioScheduler};
///
/// let scheduler = TokioScheduler::with_worker_threads(2).unwrap();
/// let task = scheduler.schedule(Box::pin(async {}));
/// assert!(!scheduler.runs_inline());
/// # drop(task);
/// ```
pub struct TokioScheduler {
    handle: Handle,
    runtime: Option<OwnedRuntime>,
}

impl TokioScheduler {
    /// Schedule onto an existing runtime
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            runtime: None,
        }
    }

    /// Schedule onto the runtime the caller is currently running in
    pub fn current() -> PoolResult<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| PoolError::SchedulerUnavailable(e.to_string()))
    }

    /// Start a dedicated multi-threaded runtime with a fixed number of workers
    pub fn with_worker_threads(worker_threads: usize) -> PoolResult<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(worker_threads.max(1))
            .thread_name("esox-connpool-worker")
            .enable_all()
            .build()
            .map_err(|e| PoolError::SchedulerUnavailable(e.to_string()))?;

        tracing::debug!(worker_threads, "started dedicated pool runtime");

        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Some(OwnedRuntime(Some(runtime))),
        })
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, task: Task) -> ScheduledTask {
        ScheduledTask::new(self.handle.spawn(task).abort_handle())
    }

    fn schedule_after(&self, delay: Duration, task: Task) -> ScheduledTask {
        let delayed = async move {
            tokio::time::sleep(delay).await;
            task.await;
        };
        ScheduledTask::new(self.handle.spawn(delayed).abort_handle())
    }
}

impl fmt::Debug for TokioScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioScheduler")
            .field("owns_runtime", &self.runtime.is_some())
            .finish()
    }
}

/// Owned runtime that may be dropped from any context, including its own workers
struct OwnedRuntime(Option<Runtime>);

impl Drop for OwnedRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.0.take() {
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_schedule_runs_task() {
        let scheduler = TokioScheduler::current().unwrap();
        let (tx, rx) = oneshot::channel();

        scheduler.schedule(Box::pin(async move {
            let _ = tx.send(42);
        }));

        assert_eq!(rx.await.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_after_waits_for_delay() {
        let scheduler = TokioScheduler::current().unwrap();
        let ran = Arc::new(AtomicBool::new(false));
        let r = Arc::clone(&ran);

        scheduler.schedule_after(
            Duration::from_secs(10),
            Box::pin(async move {
                r.store(true, Ordering::SeqCst);
            }),
        );

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert!(!ran.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_delayed_task() {
        let scheduler = TokioScheduler::current().unwrap();
        let ran = Arc::new(AtomicBool::new(false));
        let r = Arc::clone(&ran);

        let task = scheduler.schedule_after(
            Duration::from_secs(1),
            Box::pin(async move {
                r.store(true, Ordering::SeqCst);
            }),
        );
        task.cancel();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!ran.load(Ordering::SeqCst));
        assert!(task.is_finished());
    }

    #[test]
    fn test_current_outside_runtime_fails() {
        assert!(matches!(
            TokioScheduler::current(),
            Err(PoolError::SchedulerUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_owned_runtime_can_be_dropped_in_async_context() {
        let scheduler = TokioScheduler::with_worker_threads(2).unwrap();
        let (tx, rx) = oneshot::channel();
        scheduler.schedule(Box::pin(async move {
            let _ = tx.send(());
        }));
        rx.await.unwrap();
        drop(scheduler);
    }

    #[test]
    fn test_detached_task_is_finished() {
        let task = ScheduledTask::detached();
        task.cancel();
        assert!(task.is_finished());
    }
}
