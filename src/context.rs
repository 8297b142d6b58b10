//! # Single-threaded cooperative executor.
//!
//! A [`Context`] runs a set of detached tasks on one thread, in FIFO order,
//! with no preemption. Work can be scheduled from any thread; it is resumed
//! only on the thread inside [`Context::run`].
//!
//! # High-level architecture
//!
//! ```text
//!  spawn(task) ──► ready deque ◄── wake (any thread)
//!                      │
//!                   run() drains, one cell at a time
//!                      ▼
//!              poll on the context thread
//!                      │ suspends on a channel
//!                      ▼
//!        waiter registered with this context's LifeToken
//! ```
//!
//! - [`ContextHandle`] is a weak, clonable handle: scheduling onto or
//!   stopping a dead context is a silent no-op.
//! - [`LifeToken`] is a weak observable of context aliveness. Channels copy
//!   the ambient token when a consumer suspends and consult it before
//!   delivering from a foreign thread; a token that expired means the
//!   consumer's executor is gone and the waiter is treated as cancelled.
//!
//! ### Shutdown
//! [`Context::stop`] makes `run` return once the in-flight task suspends or
//! completes. Remaining queued tasks are not cancelled, they simply cease to
//! be resumed; dropping the `Context` then drops their frames, which
//! unregisters any channel waiters they held.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::task::Context as PollContext;

use futures::task::{waker, ArcWake};

use crate::task::{BoxFuture, Task};

thread_local! {
    /// Ambient context of the thread currently inside [`Context::run`].
    ///
    /// Read by channel awaiters at suspension time, so a waiter deep in an
    /// await chain registers against the executor that resumed it without
    /// threading a handle through every call.
    static AMBIENT: RefCell<Option<LifeToken>> = const { RefCell::new(None) };
}

/// Returns the life token of the context driving the current thread, if any.
///
/// `None` outside of [`Context::run`] (e.g. under `futures::executor::block_on`
/// in a test harness); a waiter registered without a token is always
/// delivered to and resumed inline by the producer's wake.
pub(crate) fn ambient_life_token() -> Option<LifeToken> {
    AMBIENT.with(|cell| cell.borrow().clone())
}

/// Restores the previous ambient token when `run` exits (also on panic).
struct AmbientGuard {
    prev: Option<LifeToken>,
}

impl AmbientGuard {
    fn install(token: LifeToken) -> Self {
        let prev = AMBIENT.with(|cell| cell.borrow_mut().replace(token));
        Self { prev }
    }
}

impl Drop for AmbientGuard {
    fn drop(&mut self) {
        let prev = self.prev.take();
        AMBIENT.with(|cell| *cell.borrow_mut() = prev);
    }
}

/// # Weak observable of context aliveness.
///
/// Expires exactly when the owning [`Context`] is dropped. Cheap to clone;
/// holding a token never extends the context's life.
///
/// # Example
/// ```
/// use tlink::Context;
///
/// let token = {
///     let ctx = Context::new();
///     ctx.life_token()
/// };
/// assert!(token.is_expired());
/// ```
#[derive(Clone)]
pub struct LifeToken {
    inner: Weak<ContextInner>,
}

impl LifeToken {
    /// True once the owning context has been destroyed.
    pub fn is_expired(&self) -> bool {
        self.inner.strong_count() == 0
    }
}

impl std::fmt::Debug for LifeToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifeToken")
            .field("expired", &self.is_expired())
            .finish()
    }
}

/// A detached root cell: fire-and-forget task plus its wake routing.
///
/// The frame (the boxed future) is released as soon as the body completes.
/// Holds only a weak reference to its context, so a waker that outlives the
/// context wakes into the void instead of keeping the queue alive.
struct DetachedTask {
    fut: Mutex<Option<BoxFuture<()>>>,
    ctx: Weak<ContextInner>,
}

impl DetachedTask {
    /// Polls the frame with `self` as the waker. Drops the frame on completion.
    fn poll(self: &Arc<Self>) {
        let wake = waker(self.clone());
        let mut cx = PollContext::from_waker(&wake);

        let mut slot = self.fut.lock().unwrap();
        if let Some(fut) = slot.as_mut() {
            if fut.as_mut().poll(&mut cx).is_ready() {
                *slot = None;
            }
        }
    }
}

impl ArcWake for DetachedTask {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        if let Some(ctx) = arc_self.ctx.upgrade() {
            ctx.schedule(arc_self.clone());
        }
    }
}

/// Shared scheduler state. The sole strong reference lives in [`Context`],
/// which ties [`LifeToken`] expiry to context destruction.
struct ContextInner {
    queue: Mutex<VecDeque<Arc<DetachedTask>>>,
    cv: Condvar,
    running: AtomicBool,
}

impl ContextInner {
    fn schedule(&self, cell: Arc<DetachedTask>) {
        self.queue.lock().unwrap().push_back(cell);
        self.cv.notify_one();
    }
}

/// # Single-threaded FIFO scheduler for cooperative tasks.
///
/// Constructed running. [`run`](Context::run) blocks the calling thread and
/// resumes scheduled tasks one at a time until [`stop`](Context::stop) is
/// called. [`schedule`-like entry points](ContextHandle) are callable from
/// any thread; resumption always happens on the `run` thread.
///
/// ### Ordering
/// For a single producing thread, tasks are resumed in schedule order. No
/// order is guaranteed across producers.
///
/// # Example
/// ```
/// use tlink::{Context, Task};
///
/// let ctx = Context::new();
/// ctx.spawn_with(|handle| {
///     Task::new(async move {
///         // ... do work, await channels ...
///         handle.stop();
///     })
/// });
/// ctx.run();
/// ```
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    /// Creates a context in the running state.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ContextInner {
                queue: Mutex::new(VecDeque::new()),
                cv: Condvar::new(),
                running: AtomicBool::new(true),
            }),
        }
    }

    /// Runs the scheduler loop on the calling thread until stopped.
    ///
    /// Installs this context as the thread's ambient context for the
    /// duration, so channel awaiters reached from any task resumed here
    /// register with this context's [`LifeToken`].
    pub fn run(&self) {
        let _ambient = AmbientGuard::install(self.life_token());

        let mut queue = self.inner.queue.lock().unwrap();
        while self.inner.running.load(Ordering::Acquire) {
            while let Some(cell) = queue.pop_front() {
                // The lock is never held across a poll: a task body may
                // spawn, wake, or stop this same context.
                drop(queue);
                cell.poll();
                queue = self.inner.queue.lock().unwrap();

                if !self.inner.running.load(Ordering::Acquire) {
                    return;
                }
            }

            queue = self
                .inner
                .cv
                .wait_while(queue, |q| {
                    q.is_empty() && self.inner.running.load(Ordering::Acquire)
                })
                .unwrap();
        }
    }

    /// Requests the run loop to return. Callable from any thread.
    ///
    /// In-flight tasks are not cancelled; they cease to be resumed.
    pub fn stop(&self) {
        let guard = self.inner.queue.lock().unwrap();
        self.inner.running.store(false, Ordering::Release);
        drop(guard);
        self.inner.cv.notify_all();
    }

    /// Roots a task on this context as a detached entry point.
    ///
    /// The task's frame self-destroys when the body completes. A panic in a
    /// detached body has no awaiter to surface at and is fatal to this
    /// context: it unwinds out of [`run`](Context::run).
    pub fn spawn(&self, task: Task<()>) {
        let fut: BoxFuture<()> = Box::pin(task);
        let cell = Arc::new(DetachedTask {
            fut: Mutex::new(Some(fut)),
            ctx: Arc::downgrade(&self.inner),
        });
        self.inner.schedule(cell);
    }

    /// Spawns via a factory that receives a [`ContextHandle`].
    ///
    /// This is the usual shape for entry points that need to stop the
    /// context or spawn siblings from inside the task body.
    pub fn spawn_with<F>(&self, factory: F)
    where
        F: FnOnce(ContextHandle) -> Task<()>,
    {
        let task = factory(self.handle());
        self.spawn(task);
    }

    /// Returns a weak, clonable handle to this context.
    pub fn handle(&self) -> ContextHandle {
        ContextHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Returns a token that expires when this context is dropped.
    pub fn life_token(&self) -> LifeToken {
        LifeToken {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("running", &self.inner.running.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// # Weak handle to a [`Context`].
///
/// Safe to hold anywhere, including inside tasks running on the context
/// itself: every operation on a dead context is a silent no-op.
#[derive(Clone)]
pub struct ContextHandle {
    inner: Weak<ContextInner>,
}

impl ContextHandle {
    /// Spawns a detached task, if the context is still alive.
    pub fn spawn(&self, task: Task<()>) {
        if let Some(inner) = self.inner.upgrade() {
            let fut: BoxFuture<()> = Box::pin(task);
            let cell = Arc::new(DetachedTask {
                fut: Mutex::new(Some(fut)),
                ctx: self.inner.clone(),
            });
            inner.schedule(cell);
        }
    }

    /// Requests the context's run loop to return, if still alive.
    pub fn stop(&self) {
        if let Some(inner) = self.inner.upgrade() {
            let guard = inner.queue.lock().unwrap();
            inner.running.store(false, Ordering::Release);
            drop(guard);
            inner.cv.notify_all();
        }
    }

    /// True while the owning context exists.
    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }

    /// Returns this context's life token.
    pub fn life_token(&self) -> LifeToken {
        LifeToken {
            inner: self.inner.clone(),
        }
    }
}

impl std::fmt::Debug for ContextHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextHandle")
            .field("alive", &self.is_alive())
            .finish()
    }
}
