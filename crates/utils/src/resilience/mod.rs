//! Resilience patterns for transient failures.
//!
//! ## Key Components
//!
//! - [`config`]: retry attempts, backoff shape and which errors are retried.
//! - [`retry`]: the blocking retry loop, driven by a [`Clock`](crate::Clock).
//!
//! ## Example
//!
//! ```rust,no_run
//! use capbridge_utils::{retry, RetryConfig, SystemClock};
//! use std::time::Duration;
//!
//! # fn example() -> capbridge_core::Result<u32> {
//! let config = RetryConfig::exponential(3, Duration::from_millis(500), Duration::from_secs(4));
//! let clock = SystemClock::new();
//! retry(&config, &clock, "lookup", |_attempt| Ok(42))
//! # }
//! ```

pub mod config;
pub mod retry;

pub use config::{Backoff, RetryConfig, RetryOn};
pub use retry::retry;
