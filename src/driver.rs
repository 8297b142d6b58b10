//! # The driver contract.
//!
//! The runtime consumes protocol drivers (Beckhoff ADS, OPC-UA, the bundled
//! loopback driver) purely through the [`Driver`] trait: connection
//! management, request/response reads and writes, and push-notification
//! subscriptions. Everything fallible resolves to a
//! [`DriverResult`](crate::DriverResult); the core never interprets the
//! (category, code) pairs inside.
//!
//! [`DriverExt`] adds the typed convenience layer (`read::<T>`,
//! `write::<T>`, `subscribe::<T>`) as provided methods over any driver.

use std::mem;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::channel::Plain;
use crate::error::{DriverError, DriverResult};
use crate::subscription::{RawSubscription, SampleMode, Subscription};

/// Zero duration: "use the driver's default timeout".
pub const NO_TIMEOUT: Duration = Duration::ZERO;

/// # Shared handle to a driver object.
pub type DriverRef = Arc<dyn Driver>;

/// # Asynchronous device-driver contract.
///
/// All operations are lazy tasks: nothing touches the wire until the
/// returned future is awaited on some context. Timeouts are the driver's
/// responsibility: an operation that exceeds its bound completes with a
/// timeout error value, it does not hang the awaiter.
///
/// `unsubscribe_sync` must be callable from `Drop` (no awaiting): it is the
/// cleanup hook the final subscription drop drives.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    /// Establishes the connection to the remote endpoint.
    async fn connect(&self, timeout: Duration) -> DriverResult<()>;

    /// Tears the connection down. Live subscription channels are closed
    /// before the transport goes away.
    async fn disconnect(&self, timeout: Duration) -> DriverResult<()>;

    /// Reads the symbol at `path` into `dest`; resolves to the number of
    /// bytes read.
    async fn read_into(&self, path: &str, dest: &mut [u8], timeout: Duration)
        -> DriverResult<usize>;

    /// Writes `src` to the symbol at `path`.
    async fn write_from(&self, path: &str, src: &[u8], timeout: Duration) -> DriverResult<()>;

    /// Registers a notification for `path` with the given payload size,
    /// sampling mode, and interval (ignored for
    /// [`SampleMode::OnChange`]).
    async fn subscribe_raw(
        &self,
        path: &str,
        size: usize,
        mode: SampleMode,
        interval: Duration,
    ) -> DriverResult<Arc<RawSubscription>>;

    /// Releases a subscription eagerly. Dropping every handle has the same
    /// effect; this form reports driver errors instead of swallowing them.
    async fn unsubscribe_raw(&self, sub: Arc<RawSubscription>) -> DriverResult<()>;

    /// Synchronous cleanup for the final subscription drop. Must be
    /// idempotent: the id may already be gone (eager unsubscribe, or a
    /// disconnect that cleared the registry).
    fn unsubscribe_sync(&self, id: u64);
}

/// # Typed convenience layer over any [`Driver`].
///
/// Blanket-implemented; not object-safe itself, which is why these generic
/// methods live outside the [`Driver`] trait.
///
/// # Example
/// ```no_run
/// use std::time::Duration;
/// use tlink::{DriverExt, DriverRef, NO_TIMEOUT};
///
/// async fn poll_temperature(driver: DriverRef) -> tlink::DriverResult<f64> {
///     driver.read::<f64>("Plant.Sensors.Temperature", NO_TIMEOUT).await
/// }
/// ```
#[async_trait]
pub trait DriverExt: Driver {
    /// Reads the symbol at `path` as a `T`.
    ///
    /// A driver that reports a byte count other than `size_of::<T>()`
    /// yields an invalid-size protocol error.
    async fn read<T: Plain>(&self, path: &str, timeout: Duration) -> DriverResult<T> {
        let mut buf = vec![0u8; mem::size_of::<T>()];
        let n = self.read_into(path, &mut buf, timeout).await?;
        crate::channel::bytes_to_value(&buf)
            .filter(|_| n == buf.len())
            .ok_or_else(|| DriverError::invalid_size(buf.len(), n))
    }

    /// Writes `value` to the symbol at `path`.
    async fn write<T: Plain>(&self, path: &str, value: T, timeout: Duration) -> DriverResult<()> {
        self.write_from(path, &crate::channel::value_to_bytes(&value), timeout)
            .await
    }

    /// Subscribes to `path` as a typed stream of `T`.
    async fn subscribe<T: Plain>(
        &self,
        path: &str,
        mode: SampleMode,
        interval: Duration,
    ) -> DriverResult<Subscription<T>> {
        let raw = self
            .subscribe_raw(path, mem::size_of::<T>(), mode, interval)
            .await?;
        Ok(Subscription::new(raw))
    }

    /// Releases a typed subscription eagerly.
    async fn unsubscribe<T: Plain>(&self, sub: Subscription<T>) -> DriverResult<()> {
        self.unsubscribe_raw(sub.raw().clone()).await
    }
}

#[async_trait]
impl<D: Driver + ?Sized> DriverExt for D {}
