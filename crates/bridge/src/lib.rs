//! The capability broker and both halves of its rendezvous protocol.
//!
//! ## Key Components
//!
//! - **`protocol`**: the bridge verbs and the client side of the reserved
//!   call code on the well-known surface.
//! - **`surface`**: the host side of the same call code, installed in front
//!   of the host's own handler.
//! - **`publisher`**: keeps the broker handle published on the surface across
//!   host restarts, escalating to a host restart when publication never
//!   succeeds.
//! - **`locator`**: retrieves and caches the broker handle for callers.
//! - **`client`**: typed privileged calls against the located handle.
//! - **`dispatch`**: the broker's own handler for those calls, gated by the
//!   authorization store.
//! - **`runtime`**: wiring for a broker process.

pub mod client;
pub mod dispatch;
pub mod locator;
pub mod protocol;
pub mod publisher;
pub mod runtime;
pub mod surface;

pub use client::BrokerClient;
pub use dispatch::{AppSource, BrokerService, InstalledApp, ShortcutRequester};
pub use locator::{HandleLocator, InvalidationListener};
pub use protocol::{BridgeAction, RendezvousChannel};
pub use publisher::{
    restart_target, BrokerPublisher, CommandRestartSignal, PublisherHandle, PublisherObserver,
    PublisherState, PublisherWatch, RestartSignal,
};
pub use runtime::{BrokerEnvironment, BrokerRuntime};
pub use surface::RendezvousSurface;
