//! # Byte-oriented pull channel between a pushing producer and suspended consumers.
//!
//! [`RawChannel`] mediates between a producer that cannot suspend (a
//! driver's notification callback, arriving on a foreign thread) and one or
//! many consumers suspended inside tasks. It is simultaneously:
//!
//! - a **waiter registry**: consumers suspended in [`RawChannel::next`];
//! - a **buffer**: payloads pushed while no waiter is registered;
//! - a **fan-out** ([`DispatchMode::Broadcast`]: every waiter gets a copy);
//! - a **load balancer** ([`DispatchMode::LoadBalancer`]: the oldest waiter
//!   gets the payload).
//!
//! ```text
//!  driver thread ──push──► [state mutex] ──┬─ no waiter ─► buffer
//!                                          └─ waiters ───► write slot,
//!                                                          wake (skips
//!                                                          expired contexts)
//! ```
//!
//! ### Teardown safety
//! The channel stays race-free under concurrent push, concurrent close,
//! waiter cancellation (the `next()` future dropped while suspended removes
//! its registry entry), and executor destruction (a waiter whose context
//! died is skipped by dispatch without touching its frame). A channel that
//! is abandoned with suspended consumers and never closed keeps those
//! frames alive; [`close`](RawChannel::close) releases them.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context as PollContext, Poll, Waker};

use crate::context::{ambient_life_token, LifeToken};

/// How a push is delivered when several consumers are suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Every registered waiter observes a copy of the payload.
    Broadcast,
    /// Exactly one waiter (FIFO registration order) observes the payload.
    LoadBalancer,
}

/// What a resumed waiter finds in its slot.
enum Delivery {
    Value(Vec<u8>),
    Closed,
}

/// Per-waiter slot fields, guarded by the node's own mutex.
///
/// Lock order is channel state first, node second, never reversed.
struct WaiterSlot {
    /// Where dispatch parks the payload for the consumer to pick up.
    delivery: Option<Delivery>,
    /// Refreshed on every pending poll; taken by dispatch before waking.
    waker: Option<Waker>,
    /// True while the node sits in the channel's waiter list. Severed by
    /// dispatch under the state lock so a late [`Next`] drop does not
    /// double-remove.
    linked: bool,
}

/// Registry entry for one suspended consumer.
struct WaiterNode {
    slot: Mutex<WaiterSlot>,
    /// Life token of the consumer's context at registration time; `None`
    /// when the consumer suspended outside any context (test harness).
    life: Option<LifeToken>,
}

impl WaiterNode {
    /// A waiter whose context died is treated as cancelled: dispatch must
    /// not deliver to it or wake it.
    fn is_expired(&self) -> bool {
        self.life.as_ref().is_some_and(LifeToken::is_expired)
    }

    /// Parks `delivery` in the slot and wakes the consumer.
    ///
    /// Called with no channel lock held; the wake either reschedules the
    /// consumer onto its own context or resumes a contextless consumer
    /// inline on the calling thread.
    fn deliver(&self, delivery: Delivery) {
        let maybe_wake = {
            let mut slot = self.slot.lock().unwrap();
            slot.delivery = Some(delivery);
            slot.waker.take()
        };
        if let Some(wake) = maybe_wake {
            wake.wake();
        }
    }
}

struct ChannelInner {
    /// Populated only while the waiter list is empty.
    buffer: VecDeque<Vec<u8>>,
    /// FIFO of suspended consumers. Non-empty implies the buffer is empty.
    waiters: VecDeque<Arc<WaiterNode>>,
    closed: bool,
    mode: DispatchMode,
}

struct ChannelState {
    inner: Mutex<ChannelInner>,
}

/// # Multi-producer / multi-consumer pull channel over raw bytes.
///
/// `RawChannel` is a thin clonable facade over reference-counted state, so a
/// driver-side handle and any number of [`TypedChannel`](crate::TypedChannel)
/// views publish to the same queue.
///
/// # Example
/// ```
/// use tlink::RawChannel;
///
/// let chan = RawChannel::new();
/// chan.push(vec![1, 2, 3]);
/// let got = futures::executor::block_on(chan.next());
/// assert_eq!(got, Some(vec![1, 2, 3]));
///
/// chan.close();
/// assert_eq!(futures::executor::block_on(chan.next()), None);
/// ```
#[derive(Clone)]
pub struct RawChannel {
    state: Arc<ChannelState>,
}

impl RawChannel {
    /// Creates an open channel in [`DispatchMode::LoadBalancer`].
    pub fn new() -> Self {
        Self::with_mode(DispatchMode::LoadBalancer)
    }

    /// Creates an open channel with an explicit dispatch mode.
    pub fn with_mode(mode: DispatchMode) -> Self {
        Self {
            state: Arc::new(ChannelState {
                inner: Mutex::new(ChannelInner {
                    buffer: VecDeque::new(),
                    waiters: VecDeque::new(),
                    closed: false,
                    mode,
                }),
            }),
        }
    }

    /// Pushes a payload. Callable from any thread; never suspends.
    ///
    /// Closed channel: the payload is dropped. No waiter: the payload is
    /// buffered. Otherwise it is dispatched per the current mode; waiters
    /// whose context has died are skipped and unregistered.
    pub fn push(&self, payload: Vec<u8>) {
        let mut inner = self.state.inner.lock().unwrap();
        if inner.closed {
            return;
        }
        if inner.waiters.is_empty() {
            inner.buffer.push_back(payload);
            return;
        }

        match inner.mode {
            DispatchMode::LoadBalancer => {
                while let Some(node) = inner.waiters.pop_front() {
                    node.slot.lock().unwrap().linked = false;
                    if node.is_expired() {
                        eprintln!("[tlink] channel waiter skipped: its context is gone");
                        continue;
                    }
                    drop(inner);
                    node.deliver(Delivery::Value(payload));
                    return;
                }
                // Every registered waiter was dead; the live-waiter list was
                // effectively empty, so the payload is kept.
                inner.buffer.push_back(payload);
            }
            DispatchMode::Broadcast => {
                let drained: Vec<Arc<WaiterNode>> = inner.waiters.drain(..).collect();
                for node in &drained {
                    node.slot.lock().unwrap().linked = false;
                }
                drop(inner);
                for node in drained {
                    if node.is_expired() {
                        continue;
                    }
                    node.deliver(Delivery::Value(payload.clone()));
                }
            }
        }
    }

    /// Returns a future resolving to the next payload, or `None` once the
    /// channel is closed.
    ///
    /// Consumes a buffered payload without suspending when one is present.
    /// Dropping the returned future while suspended unregisters the waiter;
    /// a subsequent push will not touch it.
    pub fn next(&self) -> Next {
        Next {
            state: self.state.clone(),
            node: None,
        }
    }

    /// Closes the channel. Idempotent.
    ///
    /// Every pending waiter is woken to observe `None` and all future
    /// [`push`](RawChannel::push)es become no-ops. Payloads already buffered
    /// remain consumable: `next()` drains them first and reports `None` only
    /// once the buffer is empty, so a producer may push its tail and close
    /// without losing data.
    pub fn close(&self) {
        let drained = {
            let mut inner = self.state.inner.lock().unwrap();
            if inner.closed {
                return;
            }
            inner.closed = true;
            let drained: Vec<Arc<WaiterNode>> = inner.waiters.drain(..).collect();
            for node in &drained {
                node.slot.lock().unwrap().linked = false;
            }
            drained
        };

        for node in drained {
            if node.is_expired() {
                continue;
            }
            node.deliver(Delivery::Closed);
        }
    }

    /// True once [`close`](RawChannel::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.state.inner.lock().unwrap().closed
    }

    /// Switches the dispatch mode. Takes effect for subsequent pushes.
    pub fn set_mode(&self, mode: DispatchMode) {
        self.state.inner.lock().unwrap().mode = mode;
    }

    /// Current dispatch mode.
    pub fn mode(&self) -> DispatchMode {
        self.state.inner.lock().unwrap().mode
    }

    /// True when both handles share the same underlying state.
    pub fn same_channel(&self, other: &RawChannel) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    #[cfg(test)]
    fn buffered(&self) -> usize {
        self.state.inner.lock().unwrap().buffer.len()
    }

    #[cfg(test)]
    fn waiter_count(&self) -> usize {
        self.state.inner.lock().unwrap().waiters.len()
    }
}

impl Default for RawChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RawChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.state.inner.lock().unwrap();
        f.debug_struct("RawChannel")
            .field("closed", &inner.closed)
            .field("mode", &inner.mode)
            .field("buffered", &inner.buffer.len())
            .field("waiters", &inner.waiters.len())
            .finish()
    }
}

/// # Future returned by [`RawChannel::next`].
///
/// Resolves to `Some(payload)` on delivery or `None` once the channel is
/// closed and drained. Registration happens on first poll: the buffer and
/// the closed flag are rechecked under the state lock before a waiter node
/// is linked in, together with the ambient [`LifeToken`] of the polling
/// context.
pub struct Next {
    state: Arc<ChannelState>,
    node: Option<Arc<WaiterNode>>,
}

impl Future for Next {
    type Output = Option<Vec<u8>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut PollContext<'_>) -> Poll<Self::Output> {
        // Registered: only the node decides; dispatch already unlinked us.
        if let Some(node) = self.node.clone() {
            let mut slot = node.slot.lock().unwrap();
            return match slot.delivery.take() {
                Some(Delivery::Value(payload)) => {
                    drop(slot);
                    self.node = None;
                    Poll::Ready(Some(payload))
                }
                Some(Delivery::Closed) => {
                    drop(slot);
                    self.node = None;
                    Poll::Ready(None)
                }
                None => {
                    slot.waker = Some(cx.waker().clone());
                    Poll::Pending
                }
            };
        }

        let mut inner = self.state.inner.lock().unwrap();
        // Buffer before closed flag: values pushed before the close are
        // still drained; only an empty closed channel reads as `None`.
        if let Some(payload) = inner.buffer.pop_front() {
            return Poll::Ready(Some(payload));
        }
        if inner.closed {
            return Poll::Ready(None);
        }

        let node = Arc::new(WaiterNode {
            slot: Mutex::new(WaiterSlot {
                delivery: None,
                waker: Some(cx.waker().clone()),
                linked: true,
            }),
            life: ambient_life_token(),
        });
        inner.waiters.push_back(node.clone());
        drop(inner);

        self.node = Some(node);
        Poll::Pending
    }
}

impl Drop for Next {
    fn drop(&mut self) {
        let Some(node) = self.node.take() else {
            return;
        };

        let mut inner = self.state.inner.lock().unwrap();
        let linked = node.slot.lock().unwrap().linked;
        if linked {
            inner.waiters.retain(|w| !Arc::ptr_eq(w, &node));
        }
        // Unlinked means dispatch or close already took this entry out; a
        // payload parked in the slot dies with the node (cancelled waiter).
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use futures::future::FusedFuture;
    use futures::FutureExt;

    fn poll_once(fut: &mut (impl Future<Output = Option<Vec<u8>>> + Unpin)) -> Poll<Option<Vec<u8>>> {
        let wake = futures::task::noop_waker();
        let mut cx = PollContext::from_waker(&wake);
        Pin::new(fut).poll(&mut cx)
    }

    #[test]
    fn push_without_waiter_buffers() {
        let chan = RawChannel::new();
        chan.push(vec![1]);
        chan.push(vec![2]);
        assert_eq!(chan.buffered(), 2);

        assert_eq!(block_on(chan.next()), Some(vec![1]));
        assert_eq!(block_on(chan.next()), Some(vec![2]));
        assert_eq!(chan.buffered(), 0);
    }

    #[test]
    fn next_suspends_until_foreign_thread_push() {
        let chan = RawChannel::new();
        let consumer = {
            let chan = chan.clone();
            std::thread::spawn(move || block_on(chan.next()))
        };

        // Wait for the consumer to register before pushing.
        while chan.waiter_count() == 0 {
            std::thread::yield_now();
        }
        chan.push(vec![9]);
        assert_eq!(consumer.join().unwrap(), Some(vec![9]));
    }

    #[test]
    fn load_balancer_delivers_in_registration_order() {
        let chan = RawChannel::new();
        let mut first = chan.next();
        let mut second = chan.next();
        assert!(poll_once(&mut first).is_pending());
        assert!(poll_once(&mut second).is_pending());

        chan.push(vec![10]);
        chan.push(vec![20]);

        assert_eq!(poll_once(&mut first), Poll::Ready(Some(vec![10])));
        assert_eq!(poll_once(&mut second), Poll::Ready(Some(vec![20])));
    }

    #[test]
    fn broadcast_delivers_copy_to_every_waiter() {
        let chan = RawChannel::with_mode(DispatchMode::Broadcast);
        let mut a = chan.next();
        let mut b = chan.next();
        let mut c = chan.next();
        for w in [&mut a, &mut b, &mut c] {
            assert!(poll_once(w).is_pending());
        }

        chan.push(vec![42]);

        assert_eq!(poll_once(&mut a), Poll::Ready(Some(vec![42])));
        assert_eq!(poll_once(&mut b), Poll::Ready(Some(vec![42])));
        assert_eq!(poll_once(&mut c), Poll::Ready(Some(vec![42])));
        assert_eq!(chan.buffered(), 0);
    }

    #[test]
    fn broadcast_buffers_only_without_waiters() {
        let chan = RawChannel::with_mode(DispatchMode::Broadcast);
        chan.push(vec![7]);
        assert_eq!(chan.buffered(), 1);

        // Late subscriber consumes the single buffered value.
        assert_eq!(block_on(chan.next()), Some(vec![7]));
    }

    #[test]
    fn dropping_suspended_next_unregisters_waiter() {
        let chan = RawChannel::new();
        let mut fut = chan.next();
        assert!(poll_once(&mut fut).is_pending());
        assert_eq!(chan.waiter_count(), 1);

        drop(fut);
        assert_eq!(chan.waiter_count(), 0);

        // The push must not touch the destroyed waiter; it buffers instead.
        chan.push(vec![5]);
        assert_eq!(chan.buffered(), 1);
    }

    #[test]
    fn close_wakes_pending_waiters_with_none() {
        let chan = RawChannel::new();
        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let chan = chan.clone();
                std::thread::spawn(move || block_on(chan.next()))
            })
            .collect();

        while chan.waiter_count() < 3 {
            std::thread::yield_now();
        }
        chan.close();

        for consumer in consumers {
            assert_eq!(consumer.join().unwrap(), None);
        }
    }

    #[test]
    fn close_is_idempotent_and_final() {
        let chan = RawChannel::new();
        chan.push(vec![1]);
        chan.close();
        chan.close();

        // The pre-close payload drains; the post-close push is a no-op.
        assert_eq!(block_on(chan.next()), Some(vec![1]));
        chan.push(vec![2]);
        assert_eq!(block_on(chan.next()), None);
        assert!(chan.is_closed());
    }

    #[test]
    fn mode_switch_applies_to_subsequent_pushes() {
        let chan = RawChannel::new();
        assert_eq!(chan.mode(), DispatchMode::LoadBalancer);
        chan.set_mode(DispatchMode::Broadcast);
        assert_eq!(chan.mode(), DispatchMode::Broadcast);

        let mut a = chan.next();
        let mut b = chan.next();
        assert!(poll_once(&mut a).is_pending());
        assert!(poll_once(&mut b).is_pending());
        chan.push(vec![3]);
        assert_eq!(poll_once(&mut a), Poll::Ready(Some(vec![3])));
        assert_eq!(poll_once(&mut b), Poll::Ready(Some(vec![3])));
    }

    #[test]
    fn clone_shares_state() {
        let chan = RawChannel::new();
        let alias = chan.clone();
        assert!(chan.same_channel(&alias));

        alias.push(vec![1]);
        assert_eq!(block_on(chan.next()), Some(vec![1]));
    }

    #[test]
    fn select_style_cancellation_is_safe_under_concurrent_push() {
        // Poll, then drop the future while a producer thread is pushing;
        // regardless of who wins the race nothing crashes and no waiter
        // entry survives.
        for _ in 0..64 {
            let chan = RawChannel::new();
            let mut fut = chan.next();
            assert!(poll_once(&mut fut).is_pending());

            let producer = {
                let chan = chan.clone();
                std::thread::spawn(move || chan.push(vec![1]))
            };
            drop(fut);
            producer.join().unwrap();

            assert_eq!(chan.waiter_count(), 0);
        }
    }

    #[test]
    fn next_future_is_not_fused_but_single_shot() {
        // Once resolved, the future is done; a fresh next() starts clean.
        let chan = RawChannel::new();
        chan.push(vec![4]);
        let mut fut = chan.next().fuse();
        assert!(!fut.is_terminated());
        assert_eq!(block_on(&mut fut), Some(vec![4]));
        assert!(fut.is_terminated());
    }
}
