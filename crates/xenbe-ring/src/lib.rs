//! Shared-memory ring transport for split device backends.
//!
//! Once a backend and its frontend have negotiated over the control store,
//! data-plane traffic moves through a ring: a region of granted pages both
//! sides map, holding fixed-size request and response slots plus four
//! producer/consumer index words, paired with an event channel used as a
//! doorbell. This crate implements the backend half:
//!
//! - [`SharedRegion`] and [`EventChannel`]: the seams to the real
//!   grant-mapping and event-channel primitives
//! - [`RingLayout`]: the geometry both sides agree on
//! - [`RingChannel`]: the processing loop — wait for the doorbell, drain
//!   published requests into a [`RingHandler`], publish its responses
//! - [`sim`]: in-process grant table, event bus and frontend driver, enough
//!   to run the transport across a simulated two-address-space boundary
//!
//! The ring's central invariant is payload-before-index visibility: a record
//! becomes consumable only through a release-stored producer index, observed
//! through an acquire load. Record layouts inside the slots are the device
//! class's business, not this crate's.

mod channel;
mod error;
mod layout;
mod region;
mod ring;
pub mod sim;

pub use channel::{EventChannel, WaitOutcome};
pub use error::{ChannelError, RegionError, RingError};
pub use layout::{ctrl, RingLayout};
pub use region::SharedRegion;
pub use ring::{
    RecordFault, RingChannel, RingHandler, RingStats, ResponseSink, RING_WAIT_INTERVAL,
};
