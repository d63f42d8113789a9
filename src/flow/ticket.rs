use crate::errors::DbError;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Awaitable result of one queue submission.
///
/// The submission is already enqueued when the ticket is handed out, so dropping a
/// ticket does not cancel the task; it only discards the result.
#[must_use = "the task runs regardless; await the ticket to observe its result"]
pub struct Ticket<R> {
    state: State<R>,
}

enum State<R> {
    Pending(oneshot::Receiver<Result<R, DbError>>),
    /// Refused before reaching the queue.
    Rejected(Option<DbError>),
    Closed,
}

impl<R> Unpin for Ticket<R> {}

impl<R> Ticket<R> {
    pub(crate) fn pending(rx: oneshot::Receiver<Result<R, DbError>>) -> Self {
        Self { state: State::Pending(rx) }
    }

    /// A ticket that fails without ever being queued, so it neither waits for nor poisons
    /// the queue.
    pub fn rejected(err: DbError) -> Self {
        Self { state: State::Rejected(Some(err)) }
    }

    pub(crate) fn closed() -> Self {
        Self { state: State::Closed }
    }
}

impl<R> Future for Ticket<R> {
    type Output = Result<R, DbError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            State::Pending(rx) => Pin::new(rx).poll(cx).map(|res| {
                res.unwrap_or_else(|_| {
                    Err(DbError::TaskAborted("task dropped before completion".into()))
                })
            }),
            State::Rejected(err) => Poll::Ready(Err(err.take().unwrap_or_else(|| {
                DbError::TaskAborted("ticket polled after completion".into())
            }))),
            State::Closed => Poll::Ready(Err(DbError::QueueClosed)),
        }
    }
}
