// Aligned buffer pool: allocates page-aligned memory in large blocks from
// which the cache draws page frames. Blocks are carved with
// `std::alloc::{alloc_zeroed, Layout}` under a `parking_lot::Mutex`, the
// same shape a slab allocator uses for fixed-size objects, specialized
// here to a single size class since every frame is exactly one page.

use crate::storage::error::HiveError;
use crate::storage::layout::PAGE_SIZE;
use parking_lot::Mutex;
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;

/// Default block size: 64 frames per block at the default page size.
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

struct Block {
    ptr: NonNull<u8>,
    layout: Layout,
    frame_count: usize,
}

// SAFETY: a `Block` is only ever touched while `AlignedBufferPool`'s mutex
// is held, or its frames are handed out as raw pointers whose aliasing is
// the cache's responsibility (one frame per cached page, pin-guarded).
unsafe impl Send for Block {}

struct PoolState {
    blocks: Vec<Block>,
    next_frame: usize, // index into the most recently allocated block
}

/// Hands out page-aligned 4096-byte frames in bulk, never reclaiming an
/// individual frame; the page cache recycles frames in place through
/// eviction. Frames are always zeroed on first hand-out.
pub struct AlignedBufferPool {
    page_size: usize,
    block_size: usize,
    state: Mutex<PoolState>,
}

impl AlignedBufferPool {
    pub fn new(page_size: usize, block_size: usize) -> Self {
        Self {
            page_size,
            block_size,
            state: Mutex::new(PoolState {
                blocks: Vec::new(),
                next_frame: 0,
            }),
        }
    }

    /// Allocate a new page frame. Returns a pointer to `page_size` bytes of
    /// zeroed, page-aligned memory that lives until the pool is dropped.
    pub fn alloc_page(&self) -> Result<NonNull<u8>, HiveError> {
        let mut state = self.state.lock();

        let need_new_block = match state.blocks.last() {
            Some(block) => state.next_frame >= block.frame_count,
            None => true,
        };

        if need_new_block {
            let frames_per_block = (self.block_size / self.page_size).max(1);
            let layout = Layout::from_size_align(
                frames_per_block * self.page_size,
                PAGE_SIZE,
            )
            .map_err(|e| HiveError::Internal(format!("bad buffer-pool layout: {e}")))?;

            // SAFETY: layout has nonzero size (frames_per_block >= 1).
            let raw = unsafe { alloc_zeroed(layout) };
            let ptr = NonNull::new(raw)
                .ok_or_else(|| HiveError::NoMem("buffer pool allocation failed".into()))?;

            state.blocks.push(Block {
                ptr,
                layout,
                frame_count: frames_per_block,
            });
            state.next_frame = 0;
        }

        let frame_idx = state.next_frame;
        state.next_frame += 1;
        let block = state.blocks.last().unwrap();
        let offset = frame_idx * self.page_size;

        // SAFETY: offset + page_size <= block's allocation size by construction.
        let frame_ptr = unsafe { NonNull::new_unchecked(block.ptr.as_ptr().add(offset)) };
        Ok(frame_ptr)
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }
}

impl AlignedBufferPool {
    /// Frees all backing blocks. Frames handed out earlier must not be used
    /// after this call.
    pub fn destroy(&self) {
        let mut state = self.state.lock();
        for block in state.blocks.drain(..) {
            // SAFETY: the layout matches the one used in `alloc_page`, and
            // no frame from this block is referenced after `destroy`.
            unsafe { dealloc(block.ptr.as_ptr(), block.layout) };
        }
        state.next_frame = 0;
    }
}

impl Drop for AlignedBufferPool {
    fn drop(&mut self) {
        self.destroy();
    }
}
