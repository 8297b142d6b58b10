//! # In-memory loopback driver.
//!
//! [`LoopbackDriver`] implements the full [`Driver`] contract against an
//! in-process symbol store, standing in for a PLC during development and
//! tests: reads and writes hit a concurrent map, and subscriptions are fed
//! by a real foreign thread (cyclic mode) or by writes to the subscribed
//! path (on-change mode), so consumer code exercises the same cross-thread
//! delivery paths a vendor driver would drive.
//!
//! ```text
//!  write_from ──► symbol store ──► on-change subscriptions: push
//!                      ▲
//!  sampler thread ─────┘ every interval: read + optional jitter ──► push
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use rand::Rng;

use crate::channel::RawChannel;
use crate::driver::Driver;
use crate::error::{DriverError, DriverResult, ErrorCategory};
use crate::subscription::{RawSubscription, SampleMode};

/// Tuning knobs for the loopback driver.
#[derive(Clone, Debug)]
pub struct SimConfig {
    /// Applied when an operation passes [`NO_TIMEOUT`](crate::NO_TIMEOUT).
    pub default_timeout: Duration,
    /// Artificial per-operation latency. An operation whose effective
    /// timeout is shorter than this completes with a timeout error, which
    /// lets callers exercise their timeout handling without a real device.
    pub latency: Duration,
    /// Adds ±1% noise to 8-byte cyclic samples (interpreted as `f64`), so
    /// demo dashboards show moving values.
    pub jitter: bool,
    /// Lower bound on cyclic sampling intervals.
    pub cyclic_floor: Duration,
}

impl Default for SimConfig {
    /// Defaults: 5 s timeout, no latency, no jitter, 1 ms cyclic floor.
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(5),
            latency: Duration::ZERO,
            jitter: false,
            cyclic_floor: Duration::from_millis(1),
        }
    }
}

/// Registry entry for one live subscription.
struct SubscriptionEntry {
    path: String,
    mode: SampleMode,
    channel: RawChannel,
    /// Kill switch for the cyclic sampler thread.
    stop: Arc<AtomicBool>,
}

/// # Driver implementation against an in-process symbol store.
///
/// Create with [`LoopbackDriver::new`], seed symbols, connect, and use like
/// any other driver.
///
/// # Example
/// ```
/// use tlink::{Driver, DriverExt, LoopbackDriver, SimConfig, NO_TIMEOUT};
///
/// let driver = LoopbackDriver::new(SimConfig::default());
/// driver.seed_value("Plant.Counter", 41u32);
///
/// futures::executor::block_on(async {
///     driver.connect(NO_TIMEOUT).await.unwrap();
///     let n: u32 = driver.read("Plant.Counter", NO_TIMEOUT).await.unwrap();
///     assert_eq!(n, 41);
/// });
/// ```
pub struct LoopbackDriver {
    config: SimConfig,
    connected: AtomicBool,
    symbols: DashMap<String, Vec<u8>>,
    subscriptions: DashMap<u64, SubscriptionEntry>,
    next_id: AtomicU64,
    me: Weak<LoopbackDriver>,
}

impl LoopbackDriver {
    /// Creates a disconnected driver with an empty symbol store.
    pub fn new(config: SimConfig) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            config,
            connected: AtomicBool::new(false),
            symbols: DashMap::new(),
            subscriptions: DashMap::new(),
            next_id: AtomicU64::new(1),
            me: me.clone(),
        })
    }

    /// Inserts or replaces a symbol as raw bytes.
    pub fn seed(&self, path: impl Into<String>, bytes: Vec<u8>) {
        self.symbols.insert(path.into(), bytes);
    }

    /// Inserts or replaces a symbol from a typed value.
    pub fn seed_value<T: crate::Plain>(&self, path: impl Into<String>, value: T) {
        self.seed(path, crate::channel::value_to_bytes(&value));
    }

    /// Number of live subscriptions (registry view).
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    fn effective_timeout(&self, timeout: Duration) -> Duration {
        Some(timeout)
            .filter(|d| *d > Duration::ZERO)
            .unwrap_or(self.config.default_timeout)
    }

    /// Simulated latency check: in-memory operations are instantaneous, so
    /// a "timeout" fires iff the configured latency exceeds the bound.
    fn check_deadline(&self, timeout: Duration) -> DriverResult<()> {
        let bound = self.effective_timeout(timeout);
        if self.config.latency > bound {
            return Err(DriverError::timeout(format!(
                "simulated latency {:?} exceeds timeout {:?}",
                self.config.latency, bound
            )));
        }
        Ok(())
    }

    fn check_connected(&self) -> DriverResult<()> {
        if self.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(DriverError::not_connected())
        }
    }

    /// Stops the sampler and closes the channel of every live subscription,
    /// then clears the registry.
    fn teardown_subscriptions(&self) {
        self.subscriptions.retain(|_, entry| {
            entry.stop.store(true, Ordering::Release);
            entry.channel.close();
            false
        });
    }

    fn spawn_sampler(
        &self,
        id: u64,
        path: String,
        interval: Duration,
        channel: RawChannel,
        stop: Arc<AtomicBool>,
    ) -> DriverResult<()> {
        let interval = interval.max(self.config.cyclic_floor);
        let me = self.me.clone();
        let jitter = self.config.jitter;

        thread::Builder::new()
            .name(format!("tlink-sampler-{id}"))
            .spawn(move || loop {
                thread::sleep(interval);
                if stop.load(Ordering::Acquire) || channel.is_closed() {
                    break;
                }
                let Some(driver) = me.upgrade() else { break };
                let Some(bytes) = driver.symbols.get(&path).map(|e| e.value().clone()) else {
                    continue;
                };
                channel.push(apply_jitter(bytes, jitter));
            })
            .map(drop)
            .map_err(|e| {
                DriverError::new(
                    ErrorCategory::Driver,
                    0x700,
                    format!("failed to start sampler thread: {e}"),
                )
            })
    }
}

/// ±1% noise on 8-byte payloads when enabled; everything else passes through.
fn apply_jitter(bytes: Vec<u8>, enabled: bool) -> Vec<u8> {
    if !enabled || bytes.len() != 8 {
        return bytes;
    }
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes);
    let value = f64::from_ne_bytes(raw);
    let noisy = value * (1.0 + rand::thread_rng().gen_range(-0.01..0.01));
    noisy.to_ne_bytes().to_vec()
}

#[async_trait]
impl Driver for LoopbackDriver {
    async fn connect(&self, timeout: Duration) -> DriverResult<()> {
        self.check_deadline(timeout)?;
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    async fn disconnect(&self, timeout: Duration) -> DriverResult<()> {
        self.check_deadline(timeout)?;
        // Channels close before the "transport" goes away.
        self.teardown_subscriptions();
        self.connected.store(false, Ordering::Release);
        Ok(())
    }

    async fn read_into(
        &self,
        path: &str,
        dest: &mut [u8],
        timeout: Duration,
    ) -> DriverResult<usize> {
        self.check_connected()?;
        self.check_deadline(timeout)?;

        let entry = self
            .symbols
            .get(path)
            .ok_or_else(|| DriverError::symbol_not_found(path))?;
        if entry.len() != dest.len() {
            return Err(DriverError::invalid_size(entry.len(), dest.len()));
        }
        dest.copy_from_slice(&entry);
        Ok(dest.len())
    }

    async fn write_from(&self, path: &str, src: &[u8], timeout: Duration) -> DriverResult<()> {
        self.check_connected()?;
        self.check_deadline(timeout)?;

        {
            let mut entry = self
                .symbols
                .get_mut(path)
                .ok_or_else(|| DriverError::symbol_not_found(path))?;
            if entry.len() != src.len() {
                return Err(DriverError::invalid_size(entry.len(), src.len()));
            }
            entry.copy_from_slice(src);
        }

        // The store is the "device"; a write is what makes on-change
        // notifications fire.
        for entry in self.subscriptions.iter() {
            if entry.mode == SampleMode::OnChange && entry.path == path {
                entry.channel.push(src.to_vec());
            }
        }
        Ok(())
    }

    async fn subscribe_raw(
        &self,
        path: &str,
        size: usize,
        mode: SampleMode,
        interval: Duration,
    ) -> DriverResult<Arc<RawSubscription>> {
        self.check_connected()?;

        let stored = self
            .symbols
            .get(path)
            .ok_or_else(|| DriverError::symbol_not_found(path))?
            .len();
        if stored != size {
            return Err(DriverError::invalid_size(stored, size));
        }

        let driver: Arc<dyn Driver> = self.me.upgrade().ok_or_else(|| {
            DriverError::new(ErrorCategory::Driver, 0x700, "driver is shutting down")
        })?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let channel = RawChannel::new();
        let stop = Arc::new(AtomicBool::new(false));

        if mode == SampleMode::Cyclic {
            self.spawn_sampler(id, path.to_string(), interval, channel.clone(), stop.clone())?;
        }

        self.subscriptions.insert(
            id,
            SubscriptionEntry {
                path: path.to_string(),
                mode,
                channel: channel.clone(),
                stop,
            },
        );

        Ok(RawSubscription::new(id, channel, driver))
    }

    async fn unsubscribe_raw(&self, sub: Arc<RawSubscription>) -> DriverResult<()> {
        self.unsubscribe_sync(sub.id());
        Ok(())
    }

    fn unsubscribe_sync(&self, id: u64) {
        if let Some((_, entry)) = self.subscriptions.remove(&id) {
            entry.stop.store(true, Ordering::Release);
            entry.channel.close();
        }
    }
}

impl std::fmt::Debug for LoopbackDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackDriver")
            .field("connected", &self.connected.load(Ordering::Relaxed))
            .field("symbols", &self.symbols.len())
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}
