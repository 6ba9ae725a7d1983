//! Control-plane store for split device backends.
//!
//! Backends negotiate with their frontends through a hierarchical key/value
//! store that supports path watches. This crate wraps one store session and
//! pairs it with a background watch dispatcher:
//!
//! - [`RawStore`]: the seam to the real store client (point ops, child
//!   listing, watch arm/disarm, bounded event wait)
//! - [`MemStore`]: in-process store tree; sessions from one `MemStore` see a
//!   shared namespace, which is enough to run a whole backend against in tests
//! - [`Store`]: typed point operations plus watch registration; owns the
//!   dispatch thread and joins it on drop
//!
//! Watch callbacks run serially on the dispatch thread. Registration never
//! blocks behind a running callback, and once [`Store::clear_watch`] returns
//! the cleared callback is not running and will not run again.

#![forbid(unsafe_code)]

mod error;
mod mem;
mod raw;
mod store;
mod watch;

pub use error::{Result, StoreError};
pub use mem::{MemSession, MemStore};
pub use raw::RawStore;
pub use store::Store;
pub use watch::WATCH_POLL_INTERVAL;
