use crate::error::RegionError;

/// Backend-local view of memory mapped from a peer's granted pages.
///
/// Implementations wrap the real grant-mapping primitive;
/// [`crate::sim::GrantSpace`] provides an in-process one. The region is a
/// flat byte space; all offsets are relative to its start, and every accessor
/// fails with [`RegionError::Revoked`] once the backing pages are gone.
///
/// Plain byte accessors carry no ordering. The index words of the ring
/// protocol go through [`SharedRegion::load_index`] and
/// [`SharedRegion::store_index`], whose acquire/release semantics are part of
/// this contract: the peer runs in another address space, so publication must
/// happen through real memory ordering on the shared pages, not through
/// anything process-local.
pub trait SharedRegion: Send {
    /// Region length in bytes.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies `dst.len()` bytes starting at `offset` out of the region.
    fn read_bytes(&self, offset: usize, dst: &mut [u8]) -> Result<(), RegionError>;

    /// Copies `src` into the region starting at `offset`.
    fn write_bytes(&self, offset: usize, src: &[u8]) -> Result<(), RegionError>;

    /// Atomically loads the `u32` at `offset` with acquire ordering: payload
    /// bytes the peer wrote before release-storing the returned value are
    /// visible after this load.
    ///
    /// `offset` must be 4-aligned.
    fn load_index(&self, offset: usize) -> Result<u32, RegionError>;

    /// Atomically stores `value` at `offset` with release ordering: payload
    /// bytes written before this store are visible to a peer that
    /// acquire-loads `value`.
    ///
    /// `offset` must be 4-aligned.
    fn store_index(&self, offset: usize, value: u32) -> Result<(), RegionError>;
}

impl<T: SharedRegion + ?Sized> SharedRegion for Box<T> {
    fn len(&self) -> usize {
        (**self).len()
    }

    fn read_bytes(&self, offset: usize, dst: &mut [u8]) -> Result<(), RegionError> {
        (**self).read_bytes(offset, dst)
    }

    fn write_bytes(&self, offset: usize, src: &[u8]) -> Result<(), RegionError> {
        (**self).write_bytes(offset, src)
    }

    fn load_index(&self, offset: usize) -> Result<u32, RegionError> {
        (**self).load_index(offset)
    }

    fn store_index(&self, offset: usize, value: u32) -> Result<(), RegionError> {
        (**self).store_index(offset, value)
    }
}
