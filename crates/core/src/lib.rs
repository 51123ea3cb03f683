//! Core domain types, errors, constants and configuration for `capbridge`.
//!
//! ## Key Components
//!
//! - **`errors`**: the primary `Error` enum and `Result` alias shared by every
//!   crate in the workspace.
//! - **`types`**: caller identities, permission entries and the application
//!   rows exchanged with administrative callers.
//! - **`constants`**: call codes, flag bits, descriptors and default paths.
//! - **`config`**: the injected runtime configuration.

pub mod config;
pub mod constants;
pub mod errors;
pub mod types;

pub use self::{
    config::{BridgeConfig, LocatorSettings, PublisherSettings, SurfaceSettings},
    constants::*,
    errors::{CallOutcome, Error, Result},
    types::*,
};
