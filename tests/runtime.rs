//! End-to-end scenarios: tasks, contexts, channels, subscriptions and the
//! loopback driver working together across real thread boundaries.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::task::Poll;
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use futures::executor::block_on;

use tlink::{
    Context, DispatchMode, Driver, DriverError, DriverExt, DriverResult, RawChannel,
    RawSubscription, SampleMode, Task, TypedChannel, NO_TIMEOUT,
};

fn poll_once<F: std::future::Future + Unpin>(fut: &mut F) -> Poll<F::Output> {
    let waker = futures::task::noop_waker();
    let mut cx = std::task::Context::from_waker(&waker);
    Pin::new(fut).poll(&mut cx)
}

/// S1: a producer pushes the fibonacci prefix into a typed channel and
/// closes; a consumer collects values until it observes the close.
#[test]
fn s1_fibonacci_generator_over_channel() {
    let ctx = Context::new();
    let chan: TypedChannel<i64> = TypedChannel::new();
    let collected = Arc::new(Mutex::new(Vec::new()));

    let producer = chan.clone();
    ctx.spawn(Task::new(async move {
        let (mut a, mut b) = (0i64, 1i64);
        for _ in 0..10 {
            producer.push(a);
            let next = a + b;
            a = b;
            b = next;
        }
        producer.close();
    }));

    let consumer = chan.clone();
    let sink = collected.clone();
    ctx.spawn_with(|handle| {
        Task::new(async move {
            while let Some(value) = consumer.next().await {
                sink.lock().unwrap().push(value);
            }
            handle.stop();
        })
    });

    ctx.run();
    assert_eq!(
        *collected.lock().unwrap(),
        vec![0, 1, 1, 2, 3, 5, 8, 13, 21, 34]
    );
}

/// S2: broadcast push reaches every registered waiter exactly once; a later
/// push reaches only whoever is still registered, and nothing is buffered.
#[test]
fn s2_broadcast_to_three_waiters() {
    let ctx = Context::new();
    let chan: TypedChannel<i64> = TypedChannel::with_mode(DispatchMode::Broadcast);
    // Parking spot for the one-shot consumers after their first value.
    let side: TypedChannel<i64> = TypedChannel::new();

    let a_seen = Arc::new(Mutex::new(Vec::new()));
    let b_seen = Arc::new(Mutex::new(Vec::new()));
    let c_seen = Arc::new(Mutex::new(Vec::new()));

    // A and B take one value, then suspend elsewhere.
    for sink in [a_seen.clone(), b_seen.clone()] {
        let chan = chan.clone();
        let side = side.clone();
        ctx.spawn(Task::new(async move {
            if let Some(value) = chan.next().await {
                sink.lock().unwrap().push(value);
            }
            let _ = side.next().await;
        }));
    }

    // C keeps consuming.
    {
        let chan = chan.clone();
        let sink = c_seen.clone();
        ctx.spawn(Task::new(async move {
            while let Some(value) = chan.next().await {
                sink.lock().unwrap().push(value);
            }
        }));
    }

    // The producer chain runs strictly after the consumers suspended (FIFO):
    // push 42 to all three, then a second stage, queued behind the woken
    // consumers, pushes 99 when only C is registered again.
    let stage1 = chan.clone();
    ctx.spawn_with(move |handle| {
        Task::new(async move {
            stage1.push(42);
            let stage2 = stage1.clone();
            let h = handle.clone();
            handle.spawn(Task::new(async move {
                stage2.push(99);
                let h2 = h.clone();
                h.spawn(Task::new(async move { h2.stop() }));
            }));
        })
    });

    ctx.run();

    assert_eq!(*a_seen.lock().unwrap(), vec![42]);
    assert_eq!(*b_seen.lock().unwrap(), vec![42]);
    assert_eq!(*c_seen.lock().unwrap(), vec![42, 99]);

    // Nothing was buffered along the way: a drained broadcast channel
    // reports the close immediately.
    chan.close();
    assert_eq!(block_on(chan.next()), None);
    side.close();
}

/// S3: load-balancer delivery follows waiter registration order, with the
/// producer on a foreign thread.
#[test]
fn s3_load_balancer_fairness() {
    let ctx = Context::new();
    let chan: TypedChannel<i64> = TypedChannel::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let served = Arc::new(AtomicUsize::new(0));

    for tag in ["a", "b", "c"] {
        let chan = chan.clone();
        let seen = seen.clone();
        let served = served.clone();
        ctx.spawn_with(move |handle| {
            Task::new(async move {
                if let Some(value) = chan.next().await {
                    seen.lock().unwrap().push((tag, value));
                }
                if served.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
                    handle.stop();
                }
            })
        });
    }

    // Queued after the consumers, so it fires once all three are registered.
    let (ready_tx, ready_rx) = mpsc::channel();
    ctx.spawn(Task::new(async move {
        let _ = ready_tx.send(());
    }));

    let producer = {
        let chan = chan.clone();
        thread::spawn(move || {
            ready_rx.recv().unwrap();
            for value in [10, 20, 30] {
                chan.push(value);
            }
        })
    };

    ctx.run();
    producer.join().unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![("a", 10), ("b", 20), ("c", 30)]
    );
}

/// S4: destroying a suspended consumer's frame unregisters it; a later push
/// finds no waiter and buffers instead of touching the dead frame.
#[test]
fn s4_waiter_cancellation_safety() {
    let chan = RawChannel::new();

    let mut fut = chan.next();
    assert!(poll_once(&mut fut).is_pending());
    drop(fut);

    chan.push(vec![77]);
    assert_eq!(block_on(chan.next()), Some(vec![77]));
}

/// S5: a waiter whose executor died before the push is skipped without
/// dereferencing its frame; the payload survives for live consumers.
#[test]
fn s5_executor_lifetime_safety() {
    let chan = RawChannel::new();
    let resumed = Arc::new(AtomicBool::new(false));

    {
        let ctx = Context::new();
        let consumer = chan.clone();
        let resumed = resumed.clone();
        ctx.spawn(Task::new(async move {
            let _ = consumer.next().await;
            resumed.store(true, Ordering::SeqCst);
        }));
        // Runs after the consumer suspended, so `run` returns with the
        // waiter registered.
        ctx.spawn_with(|handle| Task::new(async move { handle.stop() }));
        ctx.run();
    } // context destroyed here; the waiter's life token expires

    chan.push(vec![5]);

    assert!(!resumed.load(Ordering::SeqCst));
    assert_eq!(block_on(chan.next()), Some(vec![5]));
}

/// Driver stub for S6: hands out subscription id 7 and records every
/// synchronous unsubscribe.
struct StubDriver {
    unsubscribed: Mutex<Vec<u64>>,
    me: std::sync::Weak<StubDriver>,
}

impl StubDriver {
    fn new() -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            unsubscribed: Mutex::new(Vec::new()),
            me: me.clone(),
        })
    }
}

#[async_trait]
impl Driver for StubDriver {
    async fn connect(&self, _timeout: Duration) -> DriverResult<()> {
        Ok(())
    }

    async fn disconnect(&self, _timeout: Duration) -> DriverResult<()> {
        Ok(())
    }

    async fn read_into(
        &self,
        path: &str,
        _dest: &mut [u8],
        _timeout: Duration,
    ) -> DriverResult<usize> {
        Err(DriverError::symbol_not_found(path))
    }

    async fn write_from(&self, path: &str, _src: &[u8], _timeout: Duration) -> DriverResult<()> {
        Err(DriverError::symbol_not_found(path))
    }

    async fn subscribe_raw(
        &self,
        _path: &str,
        _size: usize,
        _mode: SampleMode,
        _interval: Duration,
    ) -> DriverResult<Arc<RawSubscription>> {
        let driver: Arc<dyn Driver> = self
            .me
            .upgrade()
            .expect("stub driver alive while subscribing");
        Ok(RawSubscription::new(7, RawChannel::new(), driver))
    }

    async fn unsubscribe_raw(&self, sub: Arc<RawSubscription>) -> DriverResult<()> {
        self.unsubscribe_sync(sub.id());
        Ok(())
    }

    fn unsubscribe_sync(&self, id: u64) {
        self.unsubscribed.lock().unwrap().push(id);
    }
}

/// S6: dropping the last subscription reference closes the channel (any
/// pending next() observes the close) and then drives the driver's
/// synchronous unsubscribe exactly once.
#[test]
fn s6_subscription_raii() {
    let driver = StubDriver::new();

    let sub = block_on(driver.subscribe::<i64>("Line.Counter", SampleMode::OnChange, NO_TIMEOUT))
        .expect("stub subscribe succeeds");
    assert_eq!(sub.id(), 7);

    // Push three values through the driver-side handle and consume them.
    let feed = sub.raw().channel().clone();
    for value in [1i64, 2, 3] {
        feed.push(value.to_ne_bytes().to_vec());
    }
    for expected in [1i64, 2, 3] {
        assert_eq!(block_on(sub.next()), Some(expected));
    }

    // Leave a consumer suspended, then drop the last reference.
    let mut pending = sub.next();
    assert!(poll_once(&mut pending).is_pending());

    drop(sub);

    assert_eq!(poll_once(&mut pending), Poll::Ready(None));
    assert_eq!(*driver.unsubscribed.lock().unwrap(), vec![7]);
}

/// A consumer suspended on a context is resumed on the context's thread no
/// matter which thread pushed.
#[test]
fn foreign_push_resumes_on_context_thread() {
    let ctx = Context::new();
    let chan = RawChannel::new();
    let resumed_on = Arc::new(Mutex::new(None));

    {
        let chan = chan.clone();
        let resumed_on = resumed_on.clone();
        ctx.spawn_with(move |handle| {
            Task::new(async move {
                let payload = chan.next().await;
                assert_eq!(payload, Some(vec![1]));
                *resumed_on.lock().unwrap() = Some(thread::current().id());
                handle.stop();
            })
        });
    }

    let (ready_tx, ready_rx) = mpsc::channel();
    ctx.spawn(Task::new(async move {
        let _ = ready_tx.send(());
    }));

    let producer = {
        let chan = chan.clone();
        thread::spawn(move || {
            ready_rx.recv().unwrap();
            chan.push(vec![1]);
        })
    };

    ctx.run();
    producer.join().unwrap();

    assert_eq!(
        *resumed_on.lock().unwrap(),
        Some(thread::current().id()),
        "consumer must resume on the context thread, not the producer's"
    );
}

/// The loopback driver end to end: connect, subscribe on-change, observe a
/// write from a task on the context, tear everything down.
#[test]
fn loopback_driver_notification_round_trip() {
    let driver = tlink::LoopbackDriver::new(tlink::SimConfig::default());
    driver.seed_value("Cell.Robot.Position", 0i64);

    let ctx = Context::new();
    let observed = Arc::new(Mutex::new(Vec::new()));

    let dev = driver.clone();
    let sink = observed.clone();
    ctx.spawn_with(move |handle| {
        Task::new(async move {
            dev.connect(NO_TIMEOUT).await.expect("connect");
            let sub = dev
                .subscribe::<i64>("Cell.Robot.Position", SampleMode::OnChange, NO_TIMEOUT)
                .await
                .expect("subscribe");

            dev.write("Cell.Robot.Position", 1500i64, NO_TIMEOUT)
                .await
                .expect("write");
            if let Some(position) = sub.next().await {
                sink.lock().unwrap().push(position);
            }

            drop(sub);
            dev.disconnect(NO_TIMEOUT).await.expect("disconnect");
            handle.stop();
        })
    });

    ctx.run();
    assert_eq!(*observed.lock().unwrap(), vec![1500]);
    assert_eq!(driver.subscription_count(), 0);
}
