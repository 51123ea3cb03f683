//! Shared utilities for capbridge
//!
//! Blocking retry with backoff, an injectable clock, and tracing setup. These
//! are used by the broker, the surface handler and client-side callers alike.

pub mod clock;
pub mod resilience;
pub mod tracing;

pub use clock::{Clock, ManualClock, SystemClock};
pub use resilience::{retry, Backoff, RetryConfig, RetryOn};
