use crate::error::ChannelError;
use std::time::Duration;

/// Outcome of one bounded wait on an event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The peer fired the channel since the last consumed signal.
    Signaled,
    /// The timeout elapsed with no signal.
    TimedOut,
    /// The channel is closed; no further signal can arrive.
    Closed,
}

/// Interdomain doorbell bound to one ring.
///
/// Signals are sticky: a notify delivered while nobody waits is consumed by
/// the next wait, and several notifies between waits coalesce into one
/// signal. [`EventChannel::close`] is the cancellation path — it is
/// idempotent and wakes a concurrently blocked wait on either half, so an
/// owner's destructor never has to sit out a timeout.
pub trait EventChannel: Send + Sync {
    /// Port number the channel is bound to. Diagnostics only.
    fn port(&self) -> u32;

    /// Fires the channel, waking the peer's wait.
    fn notify(&self) -> Result<(), ChannelError>;

    /// Blocks up to `timeout` for a pending signal.
    fn wait_signal(&self, timeout: Duration) -> WaitOutcome;

    /// Closes both halves of the channel. Idempotent.
    fn close(&self);
}

impl<T: EventChannel + ?Sized> EventChannel for std::sync::Arc<T> {
    fn port(&self) -> u32 {
        (**self).port()
    }

    fn notify(&self) -> Result<(), ChannelError> {
        (**self).notify()
    }

    fn wait_signal(&self, timeout: Duration) -> WaitOutcome {
        (**self).wait_signal(timeout)
    }

    fn close(&self) {
        (**self).close()
    }
}
