use thiserror::Error;
use xenbe_ring::RingError;
use xenbe_store::StoreError;

/// Failures at the connection layer.
///
/// Store and ring faults pass through; `InvalidState` covers a frontend
/// publishing a state value outside the xenbus set; `Device` is the device
/// layer's own fault channel out of its hooks.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ring(#[from] RingError),

    #[error("value {value} is not a xenbus state")]
    InvalidState { value: i64 },

    #[error("device error: {reason}")]
    Device { reason: String },
}

impl ConnectionError {
    /// Wraps a device-layer failure reason.
    pub fn device(reason: impl Into<String>) -> ConnectionError {
        ConnectionError::Device {
            reason: reason.into(),
        }
    }
}
