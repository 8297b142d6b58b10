//! Pull-based notification channels.
//!
//! [`RawChannel`] is the byte-oriented core: waiter registry, buffer,
//! broadcast/load-balancer dispatch, close semantics. [`TypedChannel`] is a
//! trivially-copyable view over the same shared state.

mod raw;
mod typed;

pub use raw::{DispatchMode, Next, RawChannel};
pub use typed::{Plain, TypedChannel};

pub(crate) use typed::{bytes_to_value, value_to_bytes};
