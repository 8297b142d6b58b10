//! # Shared-ownership subscription handles.
//!
//! A subscription ties a notification channel to a driver-side resource
//! (e.g. a PLC notification handle). Ownership is shared: every clone of a
//! [`Subscription`] (and every held [`Arc<RawSubscription>`]) keeps the
//! server-side registration alive. When the last reference dies, the
//! embedded channel is closed, waking any suspended consumer with `None`,
//! and the driver's synchronous unsubscribe runs exactly once.
//!
//! ```text
//!   subscribe_raw() ──► Arc<RawSubscription> ──clones──► app tasks
//!                              │ last drop
//!                              ▼
//!                    channel.close()  then  driver.unsubscribe_sync(id)
//! ```

use std::sync::Arc;

use crate::channel::{Plain, RawChannel, TypedChannel};
use crate::driver::Driver;
use crate::task::Task;

/// How the remote endpoint samples a subscribed symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleMode {
    /// A notification fires when the value changes.
    OnChange,
    /// A notification fires every interval, changed or not.
    Cyclic,
}

/// # A live driver-side registration plus its notification channel.
///
/// Always handed out as `Arc<RawSubscription>`. The drop of the final
/// reference closes the channel **before** the driver releases the
/// underlying protocol resource, so consumers observe an orderly close
/// rather than a vanished stream.
pub struct RawSubscription {
    id: u64,
    channel: RawChannel,
    driver: Arc<dyn Driver>,
}

impl RawSubscription {
    /// Bundles a driver-allocated id with the channel its notifications
    /// feed. Called by driver implementations from `subscribe_raw`.
    ///
    /// The driver must keep only the [`RawChannel`] (not the returned
    /// `Arc`) in its registry, otherwise the registration can never die.
    pub fn new(id: u64, channel: RawChannel, driver: Arc<dyn Driver>) -> Arc<Self> {
        Arc::new(Self {
            id,
            channel,
            driver,
        })
    }

    /// The driver-allocated opaque identifier.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The notification channel fed by the driver.
    pub fn channel(&self) -> &RawChannel {
        &self.channel
    }
}

impl Drop for RawSubscription {
    fn drop(&mut self) {
        self.channel.close();
        self.driver.unsubscribe_sync(self.id);
    }
}

impl std::fmt::Debug for RawSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawSubscription")
            .field("id", &self.id)
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

/// # Copyable typed subscription.
///
/// Bundles the shared [`RawSubscription`] with a [`TypedChannel`] view over
/// its channel state. Cloning extends the registration's lifetime.
///
/// Values arrive via [`next`](Subscription::next); `None` means the
/// subscription was closed (dropped elsewhere, driver disconnected, or the
/// payload size stopped matching `T`).
pub struct Subscription<T: Plain> {
    raw: Arc<RawSubscription>,
    channel: TypedChannel<T>,
}

impl<T: Plain> Subscription<T> {
    /// Wraps a raw subscription in a typed view.
    pub fn new(raw: Arc<RawSubscription>) -> Self {
        let channel = TypedChannel::from_raw(raw.channel().clone());
        Self { raw, channel }
    }

    /// The driver-allocated opaque identifier.
    pub fn id(&self) -> u64 {
        self.raw.id()
    }

    /// Returns a task resolving to the next notification value.
    pub fn next(&self) -> Task<Option<T>> {
        self.channel.next()
    }

    /// The typed channel view (e.g. to switch the dispatch mode).
    pub fn channel(&self) -> &TypedChannel<T> {
        &self.channel
    }

    /// The shared raw handle.
    pub fn raw(&self) -> &Arc<RawSubscription> {
        &self.raw
    }
}

impl<T: Plain> Clone for Subscription<T> {
    fn clone(&self) -> Self {
        Self {
            raw: self.raw.clone(),
            channel: self.channel.clone(),
        }
    }
}

impl<T: Plain> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id()).finish()
    }
}
