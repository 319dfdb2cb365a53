// Commit and rollback: the crash-safety boundary for the whole store. A
// commit writes every dirty data page, then the header last (so a crash
// mid-commit never leaves a header pointing at pages that were never
// written), then fsyncs when asked. A rollback simply throws away every
// dirty frame and restores the header from its last-committed shadow copy;
// the ordinary `?` error path plus this explicit undo step is all the
// unwinding a failed write needs.

use crate::storage::cache::PageCache;
use crate::storage::error::HiveError;
use crate::storage::header::LiveHeader;
use crate::storage::layout::OffsetWidth;
use crate::storage::page::HeaderFields;

/// Write every dirty page back to disk, the header included (its frame is
/// marked dirty by `write_into` just like any other page, and `flush_dirty`
/// stamps every page's checksum right before writing it). `flush`
/// additionally fsyncs the backing file so the commit survives a crash,
/// not just a cache flush.
pub fn commit(cache: &PageCache, header: &LiveHeader, flush: bool) -> Result<(), HiveError> {
    cache.flush_dirty_except(Some(0))?;
    header.write_into(cache)?;
    cache.flush_offset(0)?;
    if flush {
        cache.sync()?;
    }
    Ok(())
}

/// Discard every uncommitted change: drop all dirty frames (forcing a
/// reload from disk on next access) and rebuild the in-memory header from
/// the last value known to be on disk.
pub fn rollback(cache: &PageCache, width: OffsetWidth, shadow: &HeaderFields) -> Result<LiveHeader, HiveError> {
    cache.invalidate_dirty();
    let header = LiveHeader::from_fields(width, shadow);
    header.write_into(cache)?;
    Ok(header)
}
