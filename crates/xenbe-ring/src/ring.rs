//! Backend half of one shared-memory ring.
//!
//! A [`RingChannel`] owns its mapped region, its event channel and a device
//! handler, and runs a processing thread from construction to drop. Each
//! iteration waits for a doorbell signal (bounded by [`RING_WAIT_INTERVAL`]),
//! acquire-loads the request producer index, hands every published request
//! record to the handler in index order, and publishes produced responses as
//! one batch: payload writes first, then a release-store of the response
//! producer index, then one notify. A consumer can therefore never observe a
//! partially written record, on either side of the mapping.
//!
//! Handler-rejected records ([`RecordFault`]) are logged, counted and
//! skipped. Region or channel failures terminate the loop; the owner sees
//! that through [`RingChannel::is_terminated`].

use crate::channel::{EventChannel, WaitOutcome};
use crate::error::RingError;
use crate::layout::{ctrl, RingLayout};
use crate::region::SharedRegion;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

/// Bound on one blocking wait for a doorbell signal. Responsiveness plumbing
/// only; correctness never depends on the interval elapsing.
pub const RING_WAIT_INTERVAL: Duration = Duration::from_millis(100);

/// Recoverable fault in one ring record.
///
/// Returned by [`RingHandler::on_request`] for a malformed record (unknown
/// operation code, bogus embedded length, ...). The record is logged, counted
/// and skipped; the channel keeps running.
#[derive(Debug, Error)]
#[error("{reason}")]
pub struct RecordFault {
    pub reason: String,
}

impl RecordFault {
    pub fn new(reason: impl Into<String>) -> RecordFault {
        RecordFault {
            reason: reason.into(),
        }
    }
}

/// Device-side record processing for one ring channel.
pub trait RingHandler: Send {
    /// Handles one request record, exactly `slot_size` bytes, on the
    /// channel's processing thread. Replies pushed into `sink` become
    /// visible to the peer once the current batch is published.
    ///
    /// A returned [`RecordFault`] skips this record and keeps the loop
    /// running.
    fn on_request(
        &mut self,
        payload: &[u8],
        sink: &mut ResponseSink<'_>,
    ) -> Result<(), RecordFault>;
}

/// Counters for one ring channel.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RingStats {
    /// Request records the handler accepted.
    pub requests_handled: u64,
    /// Response records pushed into the response ring.
    pub responses_sent: u64,
    /// Request records the handler rejected; skipped, not fatal.
    pub record_faults: u64,
}

/// Writes response records for the request currently being handled.
///
/// Pushes land in the response slots immediately but stay invisible to the
/// peer until the batch publish; the full-ring check already accounts for
/// them.
pub struct ResponseSink<'a> {
    region: &'a dyn SharedRegion,
    layout: RingLayout,
    rsp_prod: &'a mut u32,
    pushed: u64,
}

impl ResponseSink<'_> {
    /// Queues one response record. Payloads shorter than the slot are
    /// zero-padded. [`RingError::Full`] means every slot holds an unconsumed
    /// response; nothing was overwritten and the caller may retry after the
    /// peer catches up.
    pub fn push(&mut self, payload: &[u8]) -> Result<(), RingError> {
        if payload.len() > self.layout.slot_size() {
            return Err(RingError::Oversize {
                len: payload.len(),
                slot_size: self.layout.slot_size(),
            });
        }
        let prod = *self.rsp_prod;
        let cons = self.region.load_index(ctrl::RSP_CONS)?;
        if prod.wrapping_sub(cons) == self.layout.capacity() {
            return Err(RingError::Full);
        }
        let mut slot = vec![0u8; self.layout.slot_size()];
        slot[..payload.len()].copy_from_slice(payload);
        self.region
            .write_bytes(self.layout.rsp_slot_offset(prod), &slot)?;
        *self.rsp_prod = prod.wrapping_add(1);
        self.pushed += 1;
        Ok(())
    }

    /// Free response slots at this instant.
    pub fn free_slots(&self) -> Result<u32, RingError> {
        let cons = self.region.load_index(ctrl::RSP_CONS)?;
        Ok(self.layout.capacity() - self.rsp_prod.wrapping_sub(cons))
    }
}

#[derive(Default)]
struct RingShared {
    requests_handled: AtomicU64,
    responses_sent: AtomicU64,
    record_faults: AtomicU64,
    /// Loop exited on a fault or peer close, not by the owner's request.
    terminated: AtomicBool,
    /// The owner asked the loop to exit.
    closing: AtomicBool,
}

/// One backend ring: mapped region + event channel + processing thread.
///
/// The thread starts in [`RingChannel::new`] and is joined on drop. The
/// region and channel are owned exclusively by the channel and released with
/// it.
pub struct RingChannel {
    channel: Arc<dyn EventChannel>,
    shared: Arc<RingShared>,
    worker: Option<JoinHandle<()>>,
    port: u32,
}

impl RingChannel {
    /// Starts the processing loop over `region`. Consumer and producer
    /// indices resume from the control words already in the region, so
    /// attaching to a ring the peer has pre-populated works.
    pub fn new(
        region: impl SharedRegion + 'static,
        channel: impl EventChannel + 'static,
        layout: RingLayout,
        handler: impl RingHandler + 'static,
    ) -> Result<RingChannel, RingError> {
        if region.len() < layout.region_bytes() {
            return Err(RingError::Layout("region smaller than ring layout"));
        }
        let req_cons = region.load_index(ctrl::REQ_CONS)?;
        let rsp_prod = region.load_index(ctrl::RSP_PROD)?;

        let channel: Arc<dyn EventChannel> = Arc::new(channel);
        let shared = Arc::new(RingShared::default());
        let port = channel.port();
        let worker = Worker {
            region: Box::new(region),
            channel: channel.clone(),
            layout,
            handler: Box::new(handler),
            shared: shared.clone(),
            req_cons,
            rsp_prod,
        };
        let worker = thread::spawn(move || worker.run());
        tracing::debug!(port, "ring channel started");
        Ok(RingChannel {
            channel,
            shared,
            worker: Some(worker),
            port,
        })
    }

    /// Port of the channel's doorbell. Diagnostics only.
    pub fn port(&self) -> u32 {
        self.port
    }

    /// Whether the processing thread has exited without the owner asking:
    /// region/channel fault, peer close, or a handler panic.
    pub fn is_terminated(&self) -> bool {
        if self.shared.terminated.load(Ordering::Acquire) {
            return true;
        }
        if self.shared.closing.load(Ordering::Acquire) {
            return false;
        }
        self.worker.as_ref().is_some_and(JoinHandle::is_finished)
    }

    /// Snapshot of the per-ring counters.
    pub fn stats(&self) -> RingStats {
        RingStats {
            requests_handled: self.shared.requests_handled.load(Ordering::Relaxed),
            responses_sent: self.shared.responses_sent.load(Ordering::Relaxed),
            record_faults: self.shared.record_faults.load(Ordering::Relaxed),
        }
    }

    /// Asks the processing loop to exit and wakes its blocked wait.
    /// Idempotent; drop joins the thread.
    pub fn close(&self) {
        self.shared.closing.store(true, Ordering::Release);
        self.channel.close();
    }
}

impl Drop for RingChannel {
    fn drop(&mut self) {
        self.close();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!(port = self.port, "ring worker panicked");
            }
        }
    }
}

struct Worker {
    region: Box<dyn SharedRegion>,
    channel: Arc<dyn EventChannel>,
    layout: RingLayout,
    handler: Box<dyn RingHandler>,
    shared: Arc<RingShared>,
    req_cons: u32,
    rsp_prod: u32,
}

impl Worker {
    fn run(mut self) {
        let port = self.channel.port();
        loop {
            match self.channel.wait_signal(RING_WAIT_INTERVAL) {
                WaitOutcome::Closed => {
                    if !self.shared.closing.load(Ordering::Acquire) {
                        tracing::error!(port, "ring channel closed by peer");
                        self.shared.terminated.store(true, Ordering::Release);
                    }
                    return;
                }
                WaitOutcome::Signaled | WaitOutcome::TimedOut => {}
            }
            if self.shared.closing.load(Ordering::Acquire) {
                return;
            }
            if let Err(err) = self.process_pending() {
                if self.shared.closing.load(Ordering::Acquire) {
                    return;
                }
                tracing::error!(port, "ring processing failed: {err}");
                self.shared.terminated.store(true, Ordering::Release);
                return;
            }
        }
    }

    /// Drains every published request and publishes produced responses as
    /// one batch.
    fn process_pending(&mut self) -> Result<(), RingError> {
        let port = self.channel.port();
        let req_prod = self.region.load_index(ctrl::REQ_PROD)?;
        let mut buf = vec![0u8; self.layout.slot_size()];
        let mut produced = false;

        while self.req_cons != req_prod {
            self.region
                .read_bytes(self.layout.req_slot_offset(self.req_cons), &mut buf)?;

            let mut sink = ResponseSink {
                region: &*self.region,
                layout: self.layout,
                rsp_prod: &mut self.rsp_prod,
                pushed: 0,
            };
            match self.handler.on_request(&buf, &mut sink) {
                Ok(()) => {
                    self.shared.requests_handled.fetch_add(1, Ordering::Relaxed);
                }
                Err(fault) => {
                    tracing::warn!(port, index = self.req_cons, "ring record fault: {fault}");
                    self.shared.record_faults.fetch_add(1, Ordering::Relaxed);
                }
            }
            if sink.pushed > 0 {
                self.shared
                    .responses_sent
                    .fetch_add(sink.pushed, Ordering::Relaxed);
                produced = true;
            }

            // Release the slot back to the producer only once it has been
            // fully read.
            self.req_cons = self.req_cons.wrapping_add(1);
            self.region.store_index(ctrl::REQ_CONS, self.req_cons)?;
        }

        if produced {
            // Payload writes above become visible before the index does.
            self.region.store_index(ctrl::RSP_PROD, self.rsp_prod)?;
            self.channel.notify()?;
        }
        Ok(())
    }
}
