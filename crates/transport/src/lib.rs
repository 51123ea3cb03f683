//! Cross-process call abstractions used by the bridge.
//!
//! The underlying transport is a black box. This crate only fixes the shape
//! the bridge relies on:
//!
//! - [`Parcel`]: an ordered stream of typed words with a read cursor.
//! - [`Binder`] / [`Handle`]: a remotely callable object and a shared
//!   reference to it, with liveness checks and death subscriptions.
//! - [`ServiceRegistry`]: name lookup for well-known surfaces.
//! - [`TransactHandler`] / [`ObjectHost`]: the serving side.
//!
//! The [`local`] module provides an in-process implementation.

pub mod binder;
pub mod local;
pub mod parcel;
pub mod registry;

pub use binder::{
    Binder, CallContext, DeathCallback, DeathSubscription, Handle, ObjectHost, TransactHandler,
};
pub use parcel::Parcel;
pub use registry::ServiceRegistry;
