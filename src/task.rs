//! # Lazy task abstraction.
//!
//! [`Task`] is the unit of suspendable work in this crate: a lazy,
//! move-only, single-awaiter future with a typed result. Driver operations
//! hand out tasks (directly or as boxed async methods), application code
//! composes them with `.await`, and [`Context::spawn`](crate::Context::spawn)
//! roots a `Task<()>` as a detached entry point.
//!
//! ### Execution model
//! - A task does nothing until awaited or spawned (lazy start).
//! - Awaiting a child task polls it **inline** on the awaiter's thread: the
//!   callee runs synchronously until it suspends on an I/O primitive
//!   (typically a channel `next()`), then control returns to the scheduler.
//! - Because the child runs on the awaiter's thread, the ambient context
//!   installed by [`Context::run`](crate::Context::run) is visible to every
//!   transitively awaited future. A channel awaiter deep in the call chain
//!   therefore registers against the executor of the task that spawned it,
//!   without any per-await bookkeeping.
//!
//! ### Failure model
//! A panic inside a task body unwinds through `poll` and surfaces at the
//! awaiter. Tasks spawned detached must not panic: there is no awaiter, so
//! the panic escapes the context's run loop and is fatal to that context.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context as PollContext, Poll};

/// Boxed future type backing a [`Task`].
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// # A lazy, single-awaiter unit of work with a typed result.
///
/// `Task<T>` owns exactly one future. It is move-only; awaiting it consumes
/// it, so the result is produced at most once.
///
/// # Example
/// ```
/// use tlink::Task;
///
/// let task: Task<i64> = Task::new(async { 40 + 2 });
/// let value = futures::executor::block_on(task);
/// assert_eq!(value, 42);
/// ```
pub struct Task<T> {
    fut: BoxFuture<T>,
}

impl<T> Task<T>
where
    T: Send + 'static,
{
    /// Wraps a future into a task. The future is not polled until the task
    /// is awaited or spawned.
    pub fn new(fut: impl Future<Output = T> + Send + 'static) -> Self {
        Self { fut: Box::pin(fut) }
    }

    /// Creates a task that completes immediately with `value`.
    ///
    /// Useful for driver stubs and early-exit paths.
    ///
    /// # Example
    /// ```
    /// use tlink::Task;
    ///
    /// let t = Task::ready(7u32);
    /// assert_eq!(futures::executor::block_on(t), 7);
    /// ```
    pub fn ready(value: T) -> Self {
        Self::new(std::future::ready(value))
    }
}

impl<T> Future for Task<T> {
    type Output = T;

    fn poll(mut self: Pin<&mut Self>, cx: &mut PollContext<'_>) -> Poll<T> {
        self.fut.as_mut().poll(cx)
    }
}

impl<T> std::fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task").finish_non_exhaustive()
    }
}
