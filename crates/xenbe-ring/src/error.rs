use thiserror::Error;

/// Failure accessing a mapped shared region.
#[derive(Debug, Error)]
pub enum RegionError {
    #[error("region access out of bounds: offset={offset} len={len} region={region}")]
    OutOfBounds {
        offset: usize,
        len: usize,
        region: usize,
    },

    /// A page backing the region was revoked by its granting domain. The
    /// mapping is dead; every later access fails the same way.
    #[error("mapped region revoked")]
    Revoked,

    /// Index words live on 4-byte boundaries; other offsets are not
    /// addressable atomically.
    #[error("index word offset {offset} is not 4-aligned")]
    Misaligned { offset: usize },

    #[error("grant reference {gref} is not mappable")]
    BadGrant { gref: u32 },
}

/// Failure on the event channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The channel (either half) has been closed; no signal can be sent or
    /// received anymore.
    #[error("event channel closed")]
    Closed,

    #[error("event channel error: {reason}")]
    Backend { reason: String },
}

/// Ring transport failures.
#[derive(Debug, Error)]
pub enum RingError {
    #[error("invalid ring layout: {0}")]
    Layout(&'static str),

    /// Producing one more record would overrun the unconsumed slots. The
    /// record was not written; nothing in the ring was overwritten.
    #[error("ring full")]
    Full,

    #[error("record of {len} bytes does not fit a {slot_size}-byte slot")]
    Oversize { len: usize, slot_size: usize },

    #[error(transparent)]
    Region(#[from] RegionError),

    #[error(transparent)]
    Channel(#[from] ChannelError),
}
