//! # tlink
//!
//! **TLink** is an asynchronous I/O framework for industrial device
//! drivers: long-lived clients that connect to a remote endpoint, issue
//! request/response operations, and expose push-sourced device
//! notifications as pull-consumed streams to application tasks.
//!
//! ## Features
//!
//! | Area              | Description                                                          | Key types / traits                       |
//! |-------------------|----------------------------------------------------------------------|------------------------------------------|
//! | **Tasks**         | Lazy, single-awaiter units of work with typed results.               | [`Task`]                                 |
//! | **Scheduling**    | Single-threaded cooperative executor with cross-thread scheduling.   | [`Context`], [`ContextHandle`], [`LifeToken`] |
//! | **Channels**      | Pull-based notification channels: buffer, broadcast, load-balancer.  | [`RawChannel`], [`TypedChannel`], [`DispatchMode`] |
//! | **Subscriptions** | Shared-ownership RAII handles over driver-side registrations.        | [`Subscription`], [`RawSubscription`]    |
//! | **Drivers**       | Protocol-driver contract and typed convenience layer.                | [`Driver`], [`DriverExt`], [`DriverRef`] |
//! | **Errors**        | Stable (category, code) error values for driver operations.          | [`DriverError`], [`ErrorCategory`]       |
//! | **Simulation**    | In-memory loopback driver for development and tests.                 | [`LoopbackDriver`], [`SimConfig`]        |
//!
//! ## Execution model
//!
//! A user coroutine is spawned on a [`Context`] as a detached task. It
//! awaits tasks returned by driver operations; a child task runs inline on
//! the awaiter's thread until it suspends on an I/O primitive, typically a
//! channel `next()`. A driver callback arriving on a foreign thread pushes
//! into the channel, which either hands the payload to registered waiters,
//! rescheduling each onto its original context, or buffers it when nobody
//! is waiting. Waiters whose context has been destroyed are skipped via an
//! expired [`LifeToken`]; waiters whose future was dropped have already
//! unregistered themselves.
//!
//! ```no_run
//! use std::time::Duration;
//! use tlink::{
//!     Context, Driver, DriverExt, LoopbackDriver, SampleMode, SimConfig, Task, NO_TIMEOUT,
//! };
//!
//! let driver = LoopbackDriver::new(SimConfig::default());
//! driver.seed_value("Plant.Conveyor.Speed", 0.0f64);
//!
//! let ctx = Context::new();
//! let dev = driver.clone();
//! ctx.spawn_with(move |handle| {
//!     Task::new(async move {
//!         dev.connect(NO_TIMEOUT).await.unwrap();
//!         let sub = dev
//!             .subscribe::<f64>("Plant.Conveyor.Speed", SampleMode::Cyclic, Duration::from_millis(10))
//!             .await
//!             .unwrap();
//!         while let Some(speed) = sub.next().await {
//!             println!("conveyor speed: {speed:.2}");
//!         }
//!         handle.stop();
//!     })
//! });
//! ctx.run();
//! ```
//!
//! ---

mod channel;
mod context;
mod driver;
mod error;
mod sim;
mod subscription;
mod task;

// ---- Public re-exports ----

pub use channel::{DispatchMode, Next, Plain, RawChannel, TypedChannel};
pub use context::{Context, ContextHandle, LifeToken};
pub use driver::{Driver, DriverExt, DriverRef, NO_TIMEOUT};
pub use error::{DriverError, DriverResult, ErrorCategory};
pub use sim::{LoopbackDriver, SimConfig};
pub use subscription::{RawSubscription, SampleMode, Subscription};
pub use task::{BoxFuture, Task};
