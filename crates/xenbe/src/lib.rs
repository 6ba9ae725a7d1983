//! Connection layer for split device backends.
//!
//! A paravirtualized device is split across two domains: the frontend driver
//! in the guest and a backend in a service domain. They find each other and
//! negotiate through the control store (`xenbe-store`) and then move data
//! through shared-memory rings (`xenbe-ring`). This crate ties the two
//! together:
//!
//! - [`XenbusState`]: the negotiation states both ends publish
//! - [`DeviceHooks`]: the capability interface a device class implements —
//!   `on_bind` is required, the per-state hooks default to no-ops
//! - [`FrontendConnection`]: the per-frontend state machine, driven by one
//!   store watch on the frontend's state key
//! - [`Backend`]: the supervisor that discovers frontends and reaps
//!   terminated connections
//!
//! Faults stay local to their connection: a hook error or a dead ring marks
//! that connection terminated and drives its backend state to Closing, while
//! every other frontend keeps running on the shared infrastructure.

#![forbid(unsafe_code)]

mod backend;
mod error;
mod frontend;
mod hooks;
pub mod paths;
mod state;

pub use backend::{Backend, BackendConfig, FrontendFactory};
pub use error::ConnectionError;
pub use frontend::{Connection, FrontendConnection};
pub use hooks::DeviceHooks;
pub use state::XenbusState;
