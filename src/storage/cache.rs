// Two-level set-associative page cache: R rows of C items each, with a
// per-row upgradable read/write lock, a pin counter and LRU-approximation
// `load_time` per page frame, and an eviction policy that honors pinning
// and dirtiness. A page offset hashes to one row; that row's lock guards
// a linear scan of its (small) item list, the same hashed-slot-guarding-
// lookup shape as a single flat page table, just split across rows so
// unrelated pages don't contend on one lock. Frames themselves come from
// `pool::AlignedBufferPool`.

use crate::storage::checksum::page_checksum;
use crate::storage::error::HiveError;
use crate::storage::io::PageFile;
use crate::storage::layout::{DEFAULT_CACHE_ROW_ITEMS, PAGE_SIZE};
use crate::storage::pool::AlignedBufferPool;
use parking_lot::RwLock;
use std::slice;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// One cached 4096-byte page frame. `offset == 0` means the frame is not
/// currently mapped to any file page ("available"). Content mutation is
/// only legal while `pin_count > 0` and the database-wide lock is held
/// exclusive; readers only ever observe frames they have pinned
/// themselves, so shared access to the raw bytes is safe under that
/// external discipline.
pub struct Frame {
    ptr: std::ptr::NonNull<u8>,
    offset: AtomicU64,
    pin_count: AtomicUsize,
    dirty: AtomicBool,
    load_time: AtomicU64,
}

// SAFETY: `ptr` points at a pool-owned, page-aligned, `PAGE_SIZE`-byte
// region that outlives the pool (and hence the cache). Mutation is
// serialized by the pin + database-lock discipline documented above, not
// by any lock internal to `Frame`.
unsafe impl Send for Frame {}
unsafe impl Sync for Frame {}

impl Frame {
    fn new(ptr: std::ptr::NonNull<u8>) -> Self {
        Self {
            ptr,
            offset: AtomicU64::new(0),
            pin_count: AtomicUsize::new(0),
            dirty: AtomicBool::new(false),
            load_time: AtomicU64::new(0),
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset.load(Ordering::Acquire)
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: see impl-level safety comment.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), PAGE_SIZE) }
    }

    /// Caller must hold the frame pinned and the database-wide lock exclusive.
    #[allow(clippy::mut_from_ref)]
    pub fn as_mut_slice(&self) -> &mut [u8] {
        // SAFETY: see impl-level safety comment.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), PAGE_SIZE) }
    }

    pub fn pin(&self) {
        self.pin_count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn unpin(&self) {
        let prev = self.pin_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "unpin of an unpinned frame");
    }

    pub fn pin_count(&self) -> usize {
        self.pin_count.load(Ordering::Acquire)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::Release);
    }
}

struct RowItem {
    frame: Arc<Frame>,
    load_time: u64,
}

struct Row {
    items: RwLock<Vec<RowItem>>,
    load_count: AtomicU64,
}

/// Whether the requested page already exists on disk (must be read and
/// checksum-verified) or is being created fresh (zero-filled, no read).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Demand {
    Existing,
    New,
}

/// Scoped guard around a pinned frame: unpins on drop so every exit path,
/// including `?`-propagated errors, releases its pin without an explicit
/// `finally` block.
pub struct PinGuard(Arc<Frame>);

impl PinGuard {
    pub fn new(frame: Arc<Frame>) -> Self {
        Self(frame)
    }

    pub fn frame(&self) -> &Arc<Frame> {
        &self.0
    }
}

impl std::ops::Deref for PinGuard {
    type Target = Frame;
    fn deref(&self) -> &Frame {
        &self.0
    }
}

impl Drop for PinGuard {
    fn drop(&mut self) {
        self.0.unpin();
    }
}

pub struct PageCache {
    rows: Vec<Row>,
    row_mask: usize,
    row_items_default: usize,
    pool: Arc<AlignedBufferPool>,
    file: Arc<dyn PageFile>,
    autosave: bool,
}

/// Chosen to scatter adjacent page offsets (which differ by exactly
/// `PAGE_SIZE`) across rows instead of clustering them in one.
const ROW_HASH_MULTIPLIER: u64 = 1597334677;

fn row_count_for(cache_kb: usize, row_items: usize) -> usize {
    const MIN_CACHE_KB: usize = 64;
    let cache_kb = cache_kb.max(MIN_CACHE_KB);
    let page_kb = (PAGE_SIZE / 1024).max(1);
    let raw = (cache_kb / (page_kb * row_items)).max(1);
    raw.next_power_of_two()
}

impl PageCache {
    pub fn new(
        file: Arc<dyn PageFile>,
        pool: Arc<AlignedBufferPool>,
        cache_kb: usize,
        row_items: usize,
        autosave: bool,
    ) -> Self {
        let row_items = row_items.max(1);
        let rows_n = row_count_for(cache_kb, row_items);
        let rows = (0..rows_n)
            .map(|_| Row {
                items: RwLock::new(Vec::with_capacity(row_items)),
                load_count: AtomicU64::new(0),
            })
            .collect();
        Self {
            rows,
            row_mask: rows_n - 1,
            row_items_default: row_items,
            pool,
            file,
            autosave,
        }
    }

    fn row_index(&self, offset: u64) -> usize {
        let h = offset.wrapping_mul(ROW_HASH_MULTIPLIER) >> 3;
        (h as usize) & self.row_mask
    }

    /// Lookup-or-load protocol: look for `offset` already resident, and
    /// load it (or allocate a fresh frame for it) otherwise. Returns a
    /// frame pinned exactly once on success.
    pub fn get(&self, offset: u64, demand: Demand) -> Result<Arc<Frame>, HiveError> {
        let row = &self.rows[self.row_index(offset)];

        // Fast path: scan under a plain upgradable-read guard so a hit
        // never contends with other readers in the same row.
        let mut guard = row.items.upgradable_read();
        if let Some(item) = guard.iter().find(|it| it.frame.offset() == offset) {
            item.frame.pin();
            return Ok(item.frame.clone());
        }

        // Miss: upgrade to exclusive, retrying if another upgrader or a
        // lingering reader wins the race (spec step 4).
        let mut write_guard = loop {
            match parking_lot::RwLockUpgradableReadGuard::try_upgrade(guard) {
                Ok(w) => break w,
                Err(g) => {
                    std::thread::yield_now();
                    guard = g;
                }
            }
        };

        // Re-scan: another thread may have loaded this page while we waited.
        if let Some(item) = write_guard.iter().find(|it| it.frame.offset() == offset) {
            item.frame.pin();
            return Ok(item.frame.clone());
        }

        let frame = self.claim_or_evict(row, &mut write_guard)?;

        match demand {
            Demand::Existing => {
                let buf = frame.as_mut_slice();
                self.file.read_at(offset, buf)?;
                let stored = crate::storage::page::checksum_field(buf);
                let computed = page_checksum(buf);
                if stored != computed {
                    return Err(HiveError::Corrupt(format!(
                        "checksum mismatch at offset {offset}: stored {stored:#x}, computed {computed:#x}"
                    )));
                }
            }
            Demand::New => {
                frame.as_mut_slice().fill(0);
            }
        }
        frame.offset.store(offset, Ordering::Release);
        frame.clear_dirty();

        let load_time = row.load_count.fetch_add(1, Ordering::AcqRel);
        frame.load_time.store(load_time, Ordering::Release);
        if let Some(item) = write_guard.iter_mut().find(|it| Arc::ptr_eq(&it.frame, &frame)) {
            item.load_time = load_time;
        }

        frame.pin_count.store(1, Ordering::Release);
        Ok(frame)
    }

    /// Find an available slot or evict one; grows the row if nothing can
    /// be evicted. Returns the claimed (still offset=0) frame.
    fn claim_or_evict(
        &self,
        row: &Row,
        items: &mut Vec<RowItem>,
    ) -> Result<Arc<Frame>, HiveError> {
        if let Some(item) = items.iter().find(|it| it.frame.offset() == 0) {
            return Ok(item.frame.clone());
        }

        // Smallest load_time among unpinned, evictable frames.
        let victim_idx = items
            .iter()
            .enumerate()
            .filter(|(_, it)| it.frame.pin_count() == 0)
            .min_by_key(|(_, it)| it.load_time)
            .map(|(idx, _)| idx);

        if let Some(idx) = victim_idx {
            let frame = items[idx].frame.clone();
            if frame.is_dirty() {
                if self.autosave {
                    self.flush_frame(&frame)?;
                } else {
                    return Err(HiveError::Abort(
                        "must flush dirty page but autosave is off".into(),
                    ));
                }
            }
            frame.offset.store(0, Ordering::Release);
            return Ok(frame);
        }

        // Nothing evictable: grow the row by 4 freshly allocated frames.
        for _ in 0..4 {
            let ptr = self.pool.alloc_page()?;
            items.push(RowItem {
                frame: Arc::new(Frame::new(ptr)),
                load_time: 0,
            });
        }
        Ok(items[items.len() - 4].frame.clone())
    }

    fn flush_frame(&self, frame: &Frame) -> Result<(), HiveError> {
        let buf = frame.as_mut_slice();
        crate::storage::page::set_checksum_field(buf, 0);
        let sum = page_checksum(buf);
        crate::storage::page::set_checksum_field(buf, sum);
        self.file.write_at(frame.offset(), buf)?;
        frame.clear_dirty();
        Ok(())
    }

    /// Visit every cached frame currently mapping a real page, regardless
    /// of row. Used by commit (dirty pages) and diagnostics.
    pub fn for_each_frame<F: FnMut(&Arc<Frame>)>(&self, mut f: F) {
        for row in &self.rows {
            let guard = row.items.read();
            for item in guard.iter() {
                if item.frame.offset() != 0 {
                    f(&item.frame);
                }
            }
        }
    }

    /// Commit step: write every dirty frame back, clearing its dirty bit.
    pub fn flush_dirty(&self) -> Result<(), HiveError> {
        self.flush_dirty_except(None)
    }

    /// Write every dirty frame back except the one at `skip_offset` (if
    /// given), clearing each one's dirty bit as it goes. Used by commit to
    /// guarantee every data page lands on disk strictly before the header
    /// page that could make them reachable.
    pub fn flush_dirty_except(&self, skip_offset: Option<u64>) -> Result<(), HiveError> {
        let mut first_err = None;
        for row in &self.rows {
            let guard = row.items.read();
            for item in guard.iter() {
                let offset = item.frame.offset();
                if offset != 0 && Some(offset) != skip_offset && item.frame.is_dirty() {
                    if let Err(e) = self.flush_frame(&item.frame) {
                        first_err.get_or_insert(e);
                    }
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Flush a single frame by its mapped offset, if it exists and is dirty.
    pub fn flush_offset(&self, offset: u64) -> Result<(), HiveError> {
        for row in &self.rows {
            let guard = row.items.read();
            if let Some(item) = guard.iter().find(|it| it.frame.offset() == offset) {
                if item.frame.is_dirty() {
                    return self.flush_frame(&item.frame);
                }
                return Ok(());
            }
        }
        Ok(())
    }

    /// Rollback step: invalidate every dirty frame so the next lookup
    /// reloads it from disk, and release all pins.
    pub fn invalidate_dirty(&self) {
        for row in &self.rows {
            let guard = row.items.read();
            for item in guard.iter() {
                if item.frame.offset() != 0 && item.frame.is_dirty() {
                    item.frame.offset.store(0, Ordering::Release);
                    item.frame.clear_dirty();
                    item.frame.pin_count.store(0, Ordering::Release);
                }
            }
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Like [`get`](Self::get) but wraps the pin in a [`PinGuard`].
    pub fn get_guarded(&self, offset: u64, demand: Demand) -> Result<PinGuard, HiveError> {
        self.get(offset, demand).map(PinGuard::new)
    }

    pub fn file_len(&self) -> Result<u64, HiveError> {
        self.file.len()
    }

    pub fn grow_file(&self, new_len: u64) -> Result<(), HiveError> {
        let current = self.file.len()?;
        if new_len > current {
            self.file.set_len(new_len)?;
        }
        Ok(())
    }

    /// Fsync the backing file so prior writes are durable.
    pub fn sync(&self) -> Result<(), HiveError> {
        self.file.flush()
    }
}
