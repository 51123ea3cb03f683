//! Authorization table for the broker.
//!
//! - [`backend`]: the durable identity to flags table and the SQLite
//!   implementation of it.
//! - [`store`]: the in-memory mirror that answers lookups and serializes
//!   masked updates, writing through to the backend after each change.

pub mod backend;
pub mod store;

pub use backend::{PermissionBackend, SqliteBackend};
pub use store::{AuthorizationStore, UpdateOutcome};
