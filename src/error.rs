//! # Error types surfaced by drivers.
//!
//! Every fallible driver operation resolves to a [`DriverResult`], which is
//! either the value or a [`DriverError`] carrying a stable
//! (category, code) pair. Concrete drivers map their native error spaces
//! into these pairs; the runtime core never inspects them, so callers can
//! pattern-match on `(category, code)` across driver implementations.
//!
//! Cancellation is **not** an error: a closed channel surfaces as `None`
//! from `next()`, and a cut-short operation surfaces as a `DriverError`
//! value, never as a panic.

use thiserror::Error;

/// Result alias for every driver operation.
pub type DriverResult<T> = Result<T, DriverError>;

/// Stable error category, reported alongside a numeric code.
///
/// The string form of each category is part of the public contract and will
/// not change between releases.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Connection-level failures: not connected, timeout, peer reset.
    Transport,
    /// Wire/protocol-level failures: unknown symbol, size mismatch, access denied.
    Protocol,
    /// Failures in the driver itself (bad subscription id, internal state).
    Driver,
}

impl ErrorCategory {
    /// Returns the stable category string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transport => "transport",
            ErrorCategory::Protocol => "protocol",
            ErrorCategory::Driver => "driver",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error value produced by a driver operation.
///
/// Carries an [`ErrorCategory`] plus a stable numeric code, and a
/// human-readable detail string. The well-known constructors below cover the
/// codes the bundled loopback driver emits; vendor drivers add their own
/// codes under the same categories.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{category} error {code:#x}: {detail}")]
pub struct DriverError {
    category: ErrorCategory,
    code: u32,
    detail: String,
}

/// Well-known codes, aligned with the ADS client/device error bases so that
/// codes stay recognizable next to a real TwinCAT driver.
mod codes {
    pub const TIMEOUT: u32 = 0x745;
    pub const NOT_CONNECTED: u32 = 0x748;
    pub const CONNECTION_LOST: u32 = 0x746;
    pub const INVALID_SIZE: u32 = 0x705;
    pub const SYMBOL_NOT_FOUND: u32 = 0x710;
    pub const ACCESS_DENIED: u32 = 0x723;
    pub const SUBSCRIPTION_UNKNOWN: u32 = 0x714;
}

impl DriverError {
    /// Creates an error with an explicit category and code.
    pub fn new(category: ErrorCategory, code: u32, detail: impl Into<String>) -> Self {
        Self {
            category,
            code,
            detail: detail.into(),
        }
    }

    /// Operation exceeded its timeout.
    pub fn timeout(detail: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Transport, codes::TIMEOUT, detail)
    }

    /// Operation attempted while the driver is not connected.
    pub fn not_connected() -> Self {
        Self::new(
            ErrorCategory::Transport,
            codes::NOT_CONNECTED,
            "driver is not connected",
        )
    }

    /// Connection to the remote endpoint was lost mid-operation.
    pub fn connection_lost(detail: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Transport, codes::CONNECTION_LOST, detail)
    }

    /// Symbol path does not resolve on the remote endpoint.
    pub fn symbol_not_found(path: &str) -> Self {
        Self::new(
            ErrorCategory::Protocol,
            codes::SYMBOL_NOT_FOUND,
            format!("symbol '{path}' not found"),
        )
    }

    /// Caller-supplied buffer size does not match the symbol size.
    pub fn invalid_size(expected: usize, got: usize) -> Self {
        Self::new(
            ErrorCategory::Protocol,
            codes::INVALID_SIZE,
            format!("size mismatch: symbol is {expected} bytes, caller supplied {got}"),
        )
    }

    /// Symbol exists but may not be read or written.
    pub fn access_denied(path: &str) -> Self {
        Self::new(
            ErrorCategory::Protocol,
            codes::ACCESS_DENIED,
            format!("access to '{path}' denied"),
        )
    }

    /// Subscription id is not (or no longer) registered with the driver.
    pub fn subscription_unknown(id: u64) -> Self {
        Self::new(
            ErrorCategory::Driver,
            codes::SUBSCRIPTION_UNKNOWN,
            format!("subscription {id} is not registered"),
        )
    }

    /// The error's category.
    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    /// The stable numeric code within the category.
    pub fn code(&self) -> u32 {
        self.code
    }

    /// Human-readable detail. Not part of the stable contract.
    pub fn detail(&self) -> &str {
        &self.detail
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match (self.category, self.code) {
            (ErrorCategory::Transport, codes::TIMEOUT) => "driver_timeout",
            (ErrorCategory::Transport, codes::NOT_CONNECTED) => "driver_not_connected",
            (ErrorCategory::Transport, _) => "driver_transport",
            (ErrorCategory::Protocol, codes::SYMBOL_NOT_FOUND) => "driver_symbol_not_found",
            (ErrorCategory::Protocol, codes::INVALID_SIZE) => "driver_invalid_size",
            (ErrorCategory::Protocol, _) => "driver_protocol",
            (ErrorCategory::Driver, _) => "driver_internal",
        }
    }

    /// Indicates whether the error was a timeout.
    pub fn is_timeout(&self) -> bool {
        self.category == ErrorCategory::Transport && self.code == codes::TIMEOUT
    }

    /// Indicates whether the error is connection-level (worth reconnecting).
    pub fn is_transport(&self) -> bool {
        self.category == ErrorCategory::Transport
    }
}
