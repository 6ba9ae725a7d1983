use crate::error::ConnectionError;
use std::fmt;

/// Xenbus connection state, as published to the control store.
///
/// Both ends publish one: the backend writes its own under the backend path,
/// the frontend under the frontend path. The numeric values are the protocol;
/// they go over the store as decimal strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u32)]
pub enum XenbusState {
    Unknown = 0,
    Initialising = 1,
    /// Finished early init, waiting for the peer.
    InitWait = 2,
    /// Ring configuration is published and readable.
    Initialised = 3,
    Connected = 4,
    Closing = 5,
    Closed = 6,
    Reconfiguring = 7,
    Reconfigured = 8,
}

impl XenbusState {
    /// Maps a state value read from the store. Anything outside the protocol
    /// set is an error, not a silent clamp.
    pub fn from_raw(value: i64) -> Result<XenbusState, ConnectionError> {
        Ok(match value {
            0 => XenbusState::Unknown,
            1 => XenbusState::Initialising,
            2 => XenbusState::InitWait,
            3 => XenbusState::Initialised,
            4 => XenbusState::Connected,
            5 => XenbusState::Closing,
            6 => XenbusState::Closed,
            7 => XenbusState::Reconfiguring,
            8 => XenbusState::Reconfigured,
            _ => return Err(ConnectionError::InvalidState { value }),
        })
    }

    /// The wire value.
    pub fn raw(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for XenbusState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            XenbusState::Unknown => "Unknown",
            XenbusState::Initialising => "Initialising",
            XenbusState::InitWait => "InitWait",
            XenbusState::Initialised => "Initialised",
            XenbusState::Connected => "Connected",
            XenbusState::Closing => "Closing",
            XenbusState::Closed => "Closed",
            XenbusState::Reconfiguring => "Reconfiguring",
            XenbusState::Reconfigured => "Reconfigured",
        })
    }
}
