//! In-process stand-ins for the hypervisor collaborators.
//!
//! Real backends map granted pages and bind interdomain event channels. The
//! simulation keeps both ends in one process while preserving the properties
//! the transport depends on: mappings of the same grant references alias the
//! same pages, index words carry genuine acquire/release ordering across the
//! aliased views, revoking a grant kills every mapping of it, and closing an
//! event channel wakes a blocked waiter on either half.
//!
//! [`FrontendRing`] drives the peer side of a ring over its own mapping and
//! channel half, so tests exercise the full cross-mapping index protocol
//! rather than a shortcut through backend-local state.

use crate::channel::{EventChannel, WaitOutcome};
use crate::error::{ChannelError, RegionError, RingError};
use crate::layout::{ctrl, RingLayout};
use crate::region::SharedRegion;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Page granularity of the simulated grant table.
pub const PAGE_SIZE: usize = 4096;

struct Page {
    data_ptr: *mut u8,
    _storage: Box<[u32]>,
    revoked: AtomicBool,
}

// SAFETY: the raw pointer aliases memory owned by `_storage`, which lives as
// long as the `Arc<Page>`. Index words are accessed only through `AtomicU32`;
// payload byte copies are ordered by the ring protocol (written before the
// release-stored index that publishes them, read after the acquire load).
unsafe impl Send for Page {}
unsafe impl Sync for Page {}

impl Page {
    fn new() -> Page {
        // u32 backing: the allocation is word-aligned, which the index-word
        // atomics in `load_index`/`store_index` rely on.
        let mut storage = vec![0u32; PAGE_SIZE / 4].into_boxed_slice();
        let data_ptr = storage.as_mut_ptr().cast::<u8>();
        Page {
            data_ptr,
            _storage: storage,
            revoked: AtomicBool::new(false),
        }
    }
}

#[derive(Default)]
struct GrantTable {
    pages: HashMap<u32, Arc<Page>>,
    next_ref: u32,
}

/// Simulated grant table shared by both "domains" of a test.
///
/// Cloning is cheap and refers to the same table.
#[derive(Clone, Default)]
pub struct GrantSpace {
    table: Arc<Mutex<GrantTable>>,
}

impl GrantSpace {
    pub fn new() -> GrantSpace {
        GrantSpace::default()
    }

    fn lock(&self) -> MutexGuard<'_, GrantTable> {
        match self.table.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Grants `count` fresh pages and returns their references, in order.
    pub fn grant_pages(&self, count: usize) -> Vec<u32> {
        let mut table = self.lock();
        (0..count)
            .map(|_| {
                let gref = table.next_ref;
                table.next_ref += 1;
                table.pages.insert(gref, Arc::new(Page::new()));
                gref
            })
            .collect()
    }

    /// Maps `refs` as one flat region. Mappings of the same references alias
    /// the same pages.
    pub fn map(&self, refs: &[u32]) -> Result<HeapRegion, RegionError> {
        let table = self.lock();
        let mut pages = Vec::with_capacity(refs.len());
        for &gref in refs {
            let page = table
                .pages
                .get(&gref)
                .ok_or(RegionError::BadGrant { gref })?;
            if page.revoked.load(Ordering::Acquire) {
                return Err(RegionError::BadGrant { gref });
            }
            pages.push(page.clone());
        }
        Ok(HeapRegion { pages })
    }

    /// Revokes a granted page: every existing mapping of it starts failing
    /// with [`RegionError::Revoked`], and it can no longer be mapped.
    pub fn revoke(&self, gref: u32) {
        if let Some(page) = self.lock().pages.get(&gref) {
            page.revoked.store(true, Ordering::Release);
        }
    }
}

/// One mapping of a sequence of granted pages, viewed as a flat byte region.
pub struct HeapRegion {
    pages: Vec<Arc<Page>>,
}

impl HeapRegion {
    fn check_span(&self, offset: usize, len: usize) -> Result<(), RegionError> {
        let region = self.pages.len() * PAGE_SIZE;
        match offset.checked_add(len) {
            Some(end) if end <= region => Ok(()),
            _ => Err(RegionError::OutOfBounds {
                offset,
                len,
                region,
            }),
        }
    }

    fn page(&self, index: usize) -> Result<&Page, RegionError> {
        let page = &self.pages[index];
        if page.revoked.load(Ordering::Acquire) {
            return Err(RegionError::Revoked);
        }
        Ok(page)
    }
}

impl SharedRegion for HeapRegion {
    fn len(&self) -> usize {
        self.pages.len() * PAGE_SIZE
    }

    fn read_bytes(&self, offset: usize, dst: &mut [u8]) -> Result<(), RegionError> {
        self.check_span(offset, dst.len())?;
        let mut copied = 0;
        while copied < dst.len() {
            let at = offset + copied;
            let page = self.page(at / PAGE_SIZE)?;
            let in_page = at % PAGE_SIZE;
            let chunk = (dst.len() - copied).min(PAGE_SIZE - in_page);
            // SAFETY: span checked against the region, chunk stays inside the
            // page.
            unsafe {
                std::ptr::copy_nonoverlapping(
                    page.data_ptr.add(in_page),
                    dst[copied..].as_mut_ptr(),
                    chunk,
                );
            }
            copied += chunk;
        }
        Ok(())
    }

    fn write_bytes(&self, offset: usize, src: &[u8]) -> Result<(), RegionError> {
        self.check_span(offset, src.len())?;
        let mut copied = 0;
        while copied < src.len() {
            let at = offset + copied;
            let page = self.page(at / PAGE_SIZE)?;
            let in_page = at % PAGE_SIZE;
            let chunk = (src.len() - copied).min(PAGE_SIZE - in_page);
            // SAFETY: span checked against the region, chunk stays inside the
            // page.
            unsafe {
                std::ptr::copy_nonoverlapping(
                    src[copied..].as_ptr(),
                    page.data_ptr.add(in_page),
                    chunk,
                );
            }
            copied += chunk;
        }
        Ok(())
    }

    fn load_index(&self, offset: usize) -> Result<u32, RegionError> {
        if offset % 4 != 0 {
            return Err(RegionError::Misaligned { offset });
        }
        self.check_span(offset, 4)?;
        let page = self.page(offset / PAGE_SIZE)?;
        // SAFETY: in bounds, 4-aligned (the page's u32 backing makes
        // `data_ptr` word-aligned and a 4-aligned offset never crosses a page
        // edge), and only ever accessed as a u32 word.
        let word = unsafe { &*(page.data_ptr.add(offset % PAGE_SIZE) as *const AtomicU32) };
        Ok(word.load(Ordering::Acquire))
    }

    fn store_index(&self, offset: usize, value: u32) -> Result<(), RegionError> {
        if offset % 4 != 0 {
            return Err(RegionError::Misaligned { offset });
        }
        self.check_span(offset, 4)?;
        let page = self.page(offset / PAGE_SIZE)?;
        // SAFETY: as in `load_index`.
        let word = unsafe { &*(page.data_ptr.add(offset % PAGE_SIZE) as *const AtomicU32) };
        word.store(value, Ordering::Release);
        Ok(())
    }
}

#[derive(Default)]
struct BellState {
    /// Sticky pending signal per half; a notify on one half raises the
    /// other's flag.
    pending: [bool; 2],
    bound: usize,
    closed: bool,
}

#[derive(Default)]
struct Doorbell {
    state: Mutex<BellState>,
    cond: Condvar,
}

impl Doorbell {
    fn lock(&self) -> MutexGuard<'_, BellState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[derive(Default)]
struct BusState {
    bells: HashMap<u32, Arc<Doorbell>>,
    next_port: u32,
}

/// Simulated event-channel fabric: numbered ports, two halves each.
///
/// Cloning is cheap and refers to the same fabric.
#[derive(Clone, Default)]
pub struct EventBus {
    state: Arc<Mutex<BusState>>,
}

impl EventBus {
    pub fn new() -> EventBus {
        EventBus::default()
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Allocates a fresh port with nothing bound to it yet.
    pub fn allocate_port(&self) -> u32 {
        let mut bus = self.lock();
        let port = bus.next_port;
        bus.next_port += 1;
        bus.bells.insert(port, Arc::new(Doorbell::default()));
        port
    }

    /// Binds one half of `port`. A port carries exactly two halves; a third
    /// bind fails.
    pub fn bind(&self, port: u32) -> Result<BusChannel, ChannelError> {
        let bus = self.lock();
        let bell = bus.bells.get(&port).ok_or_else(|| ChannelError::Backend {
            reason: format!("port {port} not allocated"),
        })?;
        let mut st = bell.lock();
        if st.bound == 2 {
            return Err(ChannelError::Backend {
                reason: format!("port {port} already fully bound"),
            });
        }
        let side = st.bound;
        st.bound += 1;
        Ok(BusChannel {
            port,
            side,
            bell: bell.clone(),
        })
    }
}

/// One half of a simulated event channel.
pub struct BusChannel {
    port: u32,
    side: usize,
    bell: Arc<Doorbell>,
}

impl EventChannel for BusChannel {
    fn port(&self) -> u32 {
        self.port
    }

    fn notify(&self) -> Result<(), ChannelError> {
        let mut st = self.bell.lock();
        if st.closed {
            return Err(ChannelError::Closed);
        }
        st.pending[1 - self.side] = true;
        self.bell.cond.notify_all();
        Ok(())
    }

    fn wait_signal(&self, timeout: Duration) -> WaitOutcome {
        let deadline = Instant::now() + timeout;
        let mut st = self.bell.lock();
        loop {
            if st.pending[self.side] {
                st.pending[self.side] = false;
                return WaitOutcome::Signaled;
            }
            if st.closed {
                return WaitOutcome::Closed;
            }
            let now = Instant::now();
            if now >= deadline {
                return WaitOutcome::TimedOut;
            }
            st = match self.bell.cond.wait_timeout(st, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    fn close(&self) {
        let mut st = self.bell.lock();
        st.closed = true;
        self.bell.cond.notify_all();
    }
}

/// Frontend half of a ring, for tests and demos.
///
/// Runs over its own mapping of the shared pages and its own channel half,
/// mirroring the backend's index protocol with the directions reversed:
/// it produces requests and consumes responses.
pub struct FrontendRing {
    region: HeapRegion,
    channel: BusChannel,
    layout: RingLayout,
    req_prod: u32,
    rsp_cons: u32,
}

impl FrontendRing {
    /// Attaches to the ring; indices resume from the control words already in
    /// the region.
    pub fn new(
        region: HeapRegion,
        channel: BusChannel,
        layout: RingLayout,
    ) -> Result<FrontendRing, RingError> {
        if region.len() < layout.region_bytes() {
            return Err(RingError::Layout("region smaller than ring layout"));
        }
        let req_prod = region.load_index(ctrl::REQ_PROD)?;
        let rsp_cons = region.load_index(ctrl::RSP_CONS)?;
        Ok(FrontendRing {
            region,
            channel,
            layout,
            req_prod,
            rsp_cons,
        })
    }

    /// Publishes one request record: payload write first, then the
    /// release-stored producer index. [`RingError::Full`] means every request
    /// slot is still unconsumed; nothing was overwritten.
    pub fn push_request(&mut self, payload: &[u8]) -> Result<(), RingError> {
        if payload.len() > self.layout.slot_size() {
            return Err(RingError::Oversize {
                len: payload.len(),
                slot_size: self.layout.slot_size(),
            });
        }
        let cons = self.region.load_index(ctrl::REQ_CONS)?;
        if self.req_prod.wrapping_sub(cons) == self.layout.capacity() {
            return Err(RingError::Full);
        }
        let mut slot = vec![0u8; self.layout.slot_size()];
        slot[..payload.len()].copy_from_slice(payload);
        self.region
            .write_bytes(self.layout.req_slot_offset(self.req_prod), &slot)?;
        self.req_prod = self.req_prod.wrapping_add(1);
        self.region.store_index(ctrl::REQ_PROD, self.req_prod)?;
        Ok(())
    }

    /// Rings the backend's doorbell.
    pub fn kick(&self) -> Result<(), ChannelError> {
        self.channel.notify()
    }

    /// Consumes the next published response, if any. The returned record is
    /// the full slot, zero padding included.
    pub fn try_pop_response(&mut self) -> Result<Option<Vec<u8>>, RingError> {
        let prod = self.region.load_index(ctrl::RSP_PROD)?;
        if self.rsp_cons == prod {
            return Ok(None);
        }
        let mut slot = vec![0u8; self.layout.slot_size()];
        self.region
            .read_bytes(self.layout.rsp_slot_offset(self.rsp_cons), &mut slot)?;
        self.rsp_cons = self.rsp_cons.wrapping_add(1);
        self.region.store_index(ctrl::RSP_CONS, self.rsp_cons)?;
        Ok(Some(slot))
    }

    /// Blocks up to `timeout` for the next response.
    pub fn wait_response(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, RingError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(slot) = self.try_pop_response()? {
                return Ok(Some(slot));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            match self.channel.wait_signal(deadline - now) {
                WaitOutcome::Signaled | WaitOutcome::TimedOut => {}
                WaitOutcome::Closed => return Err(ChannelError::Closed.into()),
            }
        }
    }

    /// Closes the channel, waking the backend's wait.
    pub fn close(&self) {
        self.channel.close()
    }
}
