// Live header state: the in-memory view of page 0, including the
// page-pool clustering table. Built on `page::header`'s byte-level
// read/write and `pool`'s frame allocation; this module is the piece
// that turns "allocate a node" into "find or create the right page",
// combining the page-pool clustering hint with page-count growth.

use crate::storage::cache::{Demand, PageCache};
use crate::storage::error::HiveError;
use crate::storage::layout::{OffsetWidth, PAGE_POOL_ENTRIES, PAGE_SIZE};
use crate::storage::node::NodeValue;
use crate::storage::page::{self, HeaderFields};
use crate::storage::alloc;

/// Depths beyond this collapse into the last page-pool bucket pair.
const MAX_POOL_DEPTH: u16 = 127;

pub struct LiveHeader {
    pub width: OffsetWidth,
    pub page_count: u32,
    pub children_root: u64,
    pub links_root: u64,
    pub flags: u32,
    pub page_pool: Vec<u32>,
}

impl LiveHeader {
    pub fn new(width: OffsetWidth) -> Self {
        let mut flags = 0u32;
        if width == OffsetWidth::Offset64 {
            flags |= page::FLAG_OFFSET64;
        }
        Self {
            width,
            page_count: 1,
            children_root: 0,
            links_root: 0,
            flags,
            page_pool: vec![0; PAGE_POOL_ENTRIES],
        }
    }

    pub fn from_fields(width: OffsetWidth, fields: &HeaderFields) -> Self {
        Self {
            width,
            page_count: fields.page_count,
            children_root: fields.children_root,
            links_root: fields.links_root,
            flags: fields.flags,
            page_pool: fields.page_pool.clone(),
        }
    }

    pub fn to_fields(&self) -> HeaderFields {
        HeaderFields {
            page_count: self.page_count,
            page_size: PAGE_SIZE as u32,
            children_root: self.children_root,
            links_root: self.links_root,
            flags: self.flags,
            page_pool: self.page_pool.clone(),
        }
    }

    /// Write this header into the cache's header frame (offset 0) and mark
    /// it dirty. Does not compute the checksum — that happens at commit.
    pub fn write_into(&self, cache: &PageCache) -> Result<(), HiveError> {
        let guard = cache.get_guarded(0, Demand::Existing)?;
        let buf = guard.as_mut_slice();
        page::header::write(buf, self.width, 0, &self.to_fields());
        guard.mark_dirty();
        Ok(())
    }

    fn pool_bucket(depth: u16, is_value: bool) -> usize {
        let d = depth.min(MAX_POOL_DEPTH) as usize;
        d * 2 + if is_value { 1 } else { 0 }
    }

    /// Append a brand-new, freshly initialized data page at the end of the
    /// file. Fails with `InvalidOperation` if the 32-bit page-count field
    /// would overflow.
    pub fn new_page(&mut self, cache: &PageCache) -> Result<u64, HiveError> {
        let page_no = self.page_count;
        self.page_count = self
            .page_count
            .checked_add(1)
            .ok_or_else(|| HiveError::InvalidOperation("page count would exceed 32-bit limit".into()))?;

        let offset = page_no as u64 * PAGE_SIZE as u64;
        cache.grow_file(offset + PAGE_SIZE as u64)?;
        let guard = cache.get_guarded(offset, Demand::New)?;
        page::data::init(guard.as_mut_slice(), self.width, offset);
        guard.mark_dirty();
        Ok(offset)
    }

    /// Allocate space for a new node at the given tree depth, preferring
    /// the page-pool's hinted page for `(depth, is_value)` and falling
    /// back to a new page when it has no room or no hint exists yet.
    /// Returns the node's absolute file offset.
    pub fn alloc_node(
        &mut self,
        cache: &PageCache,
        depth: u16,
        is_value: bool,
        name: &str,
        value: &NodeValue,
    ) -> Result<u64, HiveError> {
        let bucket = Self::pool_bucket(depth, is_value);
        let hinted = self.page_pool[bucket];

        if hinted != 0 {
            let page_off = hinted as u64 * PAGE_SIZE as u64;
            let guard = cache.get_guarded(page_off, Demand::Existing)?;
            match alloc::create_node(guard.as_mut_slice(), self.width, name, value) {
                Ok((_, at)) => {
                    guard.mark_dirty();
                    return Ok(page_off + at as u64);
                }
                Err(HiveError::NoMem(_)) => {
                    // Hinted page is full; fall through to a fresh page.
                }
                Err(e) => return Err(e),
            }
        }

        let page_off = self.new_page(cache)?;
        self.page_pool[bucket] = (page_off / PAGE_SIZE as u64) as u32;

        let guard = cache.get_guarded(page_off, Demand::Existing)?;
        let (_, at) = alloc::create_node(guard.as_mut_slice(), self.width, name, value)?;
        guard.mark_dirty();
        Ok(page_off + at as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::io::FilePageFile;
    use crate::storage::pool::{AlignedBufferPool, DEFAULT_BLOCK_SIZE};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn new_cache() -> (PageCache, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.hive");
        let file: Arc<dyn crate::storage::io::PageFile> =
            Arc::new(FilePageFile::open(&path, true, false).unwrap());
        file.set_len(PAGE_SIZE as u64).unwrap();
        let pool = Arc::new(AlignedBufferPool::new(PAGE_SIZE, DEFAULT_BLOCK_SIZE));
        (PageCache::new(file, pool, 128, 8, true), dir)
    }

    #[test]
    fn test_new_page_grows_file_and_page_count() {
        let (cache, _dir) = new_cache();
        let mut header = LiveHeader::new(OffsetWidth::Offset64);
        assert_eq!(header.page_count, 1);
        let off = header.new_page(&cache).unwrap();
        assert_eq!(off, PAGE_SIZE as u64);
        assert_eq!(header.page_count, 2);
        assert_eq!(cache.file_len().unwrap(), PAGE_SIZE as u64 * 2);
    }

    #[test]
    fn test_alloc_node_reuses_pool_hint_until_full() {
        let (cache, _dir) = new_cache();
        let mut header = LiveHeader::new(OffsetWidth::Offset64);
        let r1 = header.alloc_node(&cache, 0, false, "a", &NodeValue::Int32(1)).unwrap();
        let r2 = header.alloc_node(&cache, 0, false, "b", &NodeValue::Int32(2)).unwrap();
        assert_eq!(r1 / PAGE_SIZE as u64, r2 / PAGE_SIZE as u64);
    }

    #[test]
    fn test_page_count_overflow_is_invalid_operation() {
        let (cache, _dir) = new_cache();
        let mut header = LiveHeader::new(OffsetWidth::Offset64);
        header.page_count = u32::MAX;
        let err = header.new_page(&cache).unwrap_err();
        assert!(matches!(err, HiveError::InvalidOperation(_)));
    }
}
