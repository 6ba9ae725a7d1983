//! Shared ring layout contract.
//!
//! Both ends of a ring map the same granted pages and agree on this layout:
//!
//! - four little-endian `u32` control words ([`ctrl`]): request
//!   producer/consumer index, response producer/consumer index
//! - `capacity` request slots of `slot_size` bytes each
//! - `capacity` response slots of `slot_size` bytes each
//!
//! Indices are free-running `u32`s; the slot for index `i` is
//! `i % capacity`, and occupancy is `prod.wrapping_sub(cons)`. Capacity must
//! be a power of two so both stay correct across `u32` wraparound.
//!
//! The index protocol: a producer writes the slot payload first and
//! release-stores the advanced producer index after it; a consumer
//! acquire-loads the producer index before reading any slot and
//! release-stores its consumer index only once it is done with the slot.
//! [`crate::SharedRegion::load_index`] and
//! [`crate::SharedRegion::store_index`] carry those orderings.

use crate::error::RingError;

/// Byte offsets of the control words from the start of the region.
pub mod ctrl {
    pub const REQ_PROD: usize = 0;
    pub const REQ_CONS: usize = 4;
    pub const RSP_PROD: usize = 8;
    pub const RSP_CONS: usize = 12;

    pub const WORDS: usize = 4;
    pub const BYTES: usize = WORDS * 4;
}

/// Validated geometry of one ring region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingLayout {
    capacity: u32,
    slot_size: usize,
}

impl RingLayout {
    /// `capacity` slots per direction, `slot_size` bytes per record.
    ///
    /// Capacity must be a non-zero power of two; slot size must be non-zero
    /// and 4-aligned so slots never split an index word's cache line
    /// alignment guarantees.
    pub fn new(capacity: u32, slot_size: usize) -> Result<RingLayout, RingError> {
        if capacity == 0 || !capacity.is_power_of_two() {
            return Err(RingError::Layout("capacity must be a power of two"));
        }
        if slot_size == 0 {
            return Err(RingError::Layout("slot size must be non-zero"));
        }
        if slot_size % 4 != 0 {
            return Err(RingError::Layout("slot size must be 4-aligned"));
        }
        Ok(RingLayout {
            capacity,
            slot_size,
        })
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Byte offset of the request slot for free-running index `index`.
    pub fn req_slot_offset(&self, index: u32) -> usize {
        ctrl::BYTES + (index % self.capacity) as usize * self.slot_size
    }

    /// Byte offset of the response slot for free-running index `index`.
    pub fn rsp_slot_offset(&self, index: u32) -> usize {
        ctrl::BYTES
            + self.capacity as usize * self.slot_size
            + (index % self.capacity) as usize * self.slot_size
    }

    /// Total bytes the region must provide for this layout.
    pub fn region_bytes(&self) -> usize {
        ctrl::BYTES + 2 * self.capacity as usize * self.slot_size
    }
}
