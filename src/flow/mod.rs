//! Sequential task queue.
//!
//! Every submission is handed to a single worker task over a channel. The worker runs
//! submissions one at a time in the order they were submitted and keeps the settled state
//! of the most recent one (the *tail*). A failed task poisons the tail: later submissions
//! without a recovery handler fail with the same error and their bodies never run, until a
//! submission with a recovery handler turns the failure back into a value.
//!
//! A task that never settles stalls the queue behind it. There is no timeout.

mod ticket;

pub use ticket::Ticket;

use crate::errors::DbError;
use crate::logger::FLOW_TARGET;
use std::future::{Future, Ready};
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// `None` when the last task succeeded, otherwise the failure it left behind.
type Tail = Option<DbError>;

type Job<S> = Box<dyn FnOnce(Arc<S>, Tail) -> BoxFuture<Tail> + Send>;

type NoRecovery<R> = fn(DbError) -> Ready<Result<R, DbError>>;

/// Handle to a FIFO task queue whose worker owns the shared resource `S`.
///
/// Clones share the same queue. The worker exits once every handle is dropped and the
/// pending submissions have drained.
pub struct Flow<S = ()> {
    tx: mpsc::UnboundedSender<Job<S>>,
}

impl<S> Clone for Flow<S> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<S> std::fmt::Debug for Flow<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flow").field("closed", &self.tx.is_closed()).finish()
    }
}

impl Flow<()> {
    /// A queue that guards no resource, for ordering caller-side work.
    ///
    /// # Errors
    /// Returns [`DbError::NoRuntime`] when called outside a tokio runtime.
    pub fn new() -> Result<Self, DbError> {
        Self::with_store(())
    }
}

impl<S: Send + Sync + 'static> Flow<S> {
    /// Spawn the worker; it takes exclusive ownership of `store`.
    ///
    /// # Errors
    /// Returns [`DbError::NoRuntime`] when called outside a tokio runtime.
    pub fn with_store(store: S) -> Result<Self, DbError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| DbError::NoRuntime)?;
        let (tx, rx) = mpsc::unbounded_channel();
        handle.spawn(run_worker(Arc::new(store), rx));
        Ok(Self { tx })
    }

    /// Enqueue a task that receives the store handle.
    pub fn submit<F, Fut, R>(&self, task: F) -> Ticket<R>
    where
        F: FnOnce(Arc<S>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<R, DbError>> + Send + 'static,
        R: Send + 'static,
    {
        self.enqueue(task, None::<NoRecovery<R>>)
    }

    /// Enqueue a task together with a recovery handler.
    ///
    /// If the queue is poisoned when this submission's turn comes, `recover` runs instead
    /// of `task` with the pending failure; its result becomes this submission's result and
    /// the new tail. If the queue is healthy `task` runs and `recover` is dropped.
    pub fn submit_or_recover<F, Fut, H, HFut, R>(&self, task: F, recover: H) -> Ticket<R>
    where
        F: FnOnce(Arc<S>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<R, DbError>> + Send + 'static,
        H: FnOnce(DbError) -> HFut + Send + 'static,
        HFut: Future<Output = Result<R, DbError>> + Send + 'static,
        R: Send + 'static,
    {
        self.enqueue(task, Some(recover))
    }

    /// Enqueue a zero-argument task.
    pub fn execute<F, Fut, R>(&self, task: F) -> Ticket<R>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<R, DbError>> + Send + 'static,
        R: Send + 'static,
    {
        self.submit(move |_| task())
    }

    /// Zero-argument form of [`Flow::submit_or_recover`].
    pub fn execute_or_recover<F, Fut, H, HFut, R>(&self, task: F, recover: H) -> Ticket<R>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<R, DbError>> + Send + 'static,
        H: FnOnce(DbError) -> HFut + Send + 'static,
        HFut: Future<Output = Result<R, DbError>> + Send + 'static,
        R: Send + 'static,
    {
        self.submit_or_recover(move |_| task(), recover)
    }

    fn enqueue<F, Fut, H, HFut, R>(&self, task: F, recover: Option<H>) -> Ticket<R>
    where
        F: FnOnce(Arc<S>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<R, DbError>> + Send + 'static,
        H: FnOnce(DbError) -> HFut + Send + 'static,
        HFut: Future<Output = Result<R, DbError>> + Send + 'static,
        R: Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel();
        let job: Job<S> = Box::new(move |store: Arc<S>, tail: Tail| -> BoxFuture<Tail> {
            Box::pin(async move {
                let outcome = match (tail, recover) {
                    (None, _) => task(store).await,
                    (Some(err), Some(recover)) => recover(err).await,
                    (Some(err), None) => Err(err),
                };
                let next = outcome.as_ref().err().cloned();
                // the caller may have dropped its ticket
                let _ = result_tx.send(outcome);
                next
            })
        });
        match self.tx.send(job) {
            Ok(()) => Ticket::pending(result_rx),
            Err(_) => Ticket::closed(),
        }
    }
}

async fn run_worker<S: Send + Sync + 'static>(
    store: Arc<S>,
    mut rx: mpsc::UnboundedReceiver<Job<S>>,
) {
    let mut tail: Tail = None;
    let mut seq: u64 = 0;
    while let Some(job) = rx.recv().await {
        seq += 1;
        let poisoned = tail.is_some();
        log::trace!(target: FLOW_TARGET, "task #{seq} start (poisoned={poisoned})");
        // Each job runs in its own task so a panic is contained and reported as a failure.
        tail = match tokio::spawn(job(Arc::clone(&store), tail.take())).await {
            Ok(next) => next,
            Err(e) => Some(DbError::TaskAborted(e.to_string())),
        };
        match &tail {
            Some(err) if poisoned => {
                log::warn!(target: FLOW_TARGET, "task #{seq} settled on poisoned queue: {err}");
            }
            Some(err) => log::warn!(target: FLOW_TARGET, "task #{seq} failed: {err}"),
            None => log::trace!(target: FLOW_TARGET, "task #{seq} done"),
        }
    }
    log::debug!(target: FLOW_TARGET, "queue closed after {seq} tasks");
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[tokio::test]
    async fn first_submission_runs_immediately() {
        let flow = Flow::new().unwrap();
        let v = flow.execute(|| async { Ok::<_, DbError>(7) }).await.unwrap();
        assert_eq!(v, 7);
    }

    #[tokio::test]
    async fn later_fast_task_waits_for_earlier_slow_one() {
        let flow = Flow::new().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let l1 = Arc::clone(&log);
        let slow = flow.execute(move || async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            l1.lock().push("slow");
            Ok::<(), DbError>(())
        });
        let l2 = Arc::clone(&log);
        let fast = flow.execute(move || async move {
            l2.lock().push("fast");
            Ok::<(), DbError>(())
        });
        // await in reverse order; completion order must still be submission order
        fast.await.unwrap();
        slow.await.unwrap();
        assert_eq!(*log.lock(), vec!["slow", "fast"]);
    }

    #[tokio::test]
    async fn store_handle_is_passed_to_tasks() {
        let flow = Flow::with_store(Mutex::new(0u32)).unwrap();
        for _ in 0..5 {
            let _ = flow.submit(|s| async move {
                *s.lock() += 1;
                Ok::<(), DbError>(())
            });
        }
        let n = flow.submit(|s| async move { Ok::<_, DbError>(*s.lock()) }).await.unwrap();
        assert_eq!(n, 5);
    }

    #[tokio::test]
    async fn panicking_task_is_reported_and_poisons() {
        let flow = Flow::new().unwrap();
        let boom = flow.execute(|| async {
            let fail = true;
            if fail {
                panic!("kaboom");
            }
            Ok::<(), DbError>(())
        });
        let err = boom.await.unwrap_err();
        assert!(matches!(err, DbError::TaskAborted(_)));
        let next = flow.execute(|| async { Ok::<_, DbError>(1) }).await.unwrap_err();
        assert!(matches!(next, DbError::TaskAborted(_)));
        let healed = flow
            .execute_or_recover(|| async { Ok::<_, DbError>(0) }, |_| async { Ok(2) })
            .await
            .unwrap();
        assert_eq!(healed, 2);
    }

    #[test]
    fn construction_outside_runtime_fails() {
        assert!(matches!(Flow::new(), Err(DbError::NoRuntime)));
    }
}
