// Intra-page slotted allocator: `alloc_node`, `resize_node` (and
// `free_node` as the zero-size case of resize), plus the page-pool
// clustering hint. Operates purely on a page's byte buffer (via
// `page::data`); callers (mainly `avl`) are responsible for pinning the
// page they pass in and marking it dirty after a mutating call.

use crate::storage::error::HiveError;
use crate::storage::layout::OffsetWidth;
use crate::storage::node::{decode_header, encode_node, NodeHeader, NodeValue};
use crate::storage::page::data;

/// Attempt to allocate room for a new node of `size` bytes (already
/// 4-byte aligned) in `buf`, taking a fresh slot either from the free
/// list or by extending the slot array. Returns the node's byte offset
/// within the page, or `NoMem`-flavoured `HiveError::Param`-style
/// "no-space" signal (`HiveError::NoMem`) if it does not fit.
pub fn alloc_node(buf: &mut [u8], size: usize) -> Result<usize, HiveError> {
    debug_assert_eq!(size % 4, 0);

    let free_head = data::index_freelist(buf);
    let needs_new_slot = free_head == 0;
    let slot_array_growth = if needs_new_slot { 2 } else { 0 };

    let top = data::top(buf) as usize;
    let slot_array_end = data::slot_array_end(buf);
    let available = top.saturating_sub(slot_array_end);
    if size + slot_array_growth > available {
        return Err(HiveError::NoMem(format!(
            "page has no room for a {size}-byte node ({available} bytes free)"
        )));
    }

    let new_top = top - size;
    let slot_idx = if needs_new_slot {
        let idx = data::index_count(buf);
        data::set_index_count(buf, idx + 1);
        data::set_slot(buf, idx, new_top as u16);
        idx
    } else {
        // `free_head` is 1-based (0 means "empty list"); the freed slot's
        // node region stores the next free slot index (1-based) at its
        // first two bytes, chained the same way a classic free list works.
        let idx = free_head - 1;
        let chained_next = free_list_next(buf, idx);
        data::set_index_freelist(buf, chained_next);
        data::set_slot(buf, idx, new_top as u16);
        idx
    };

    data::set_top(buf, new_top as u16);
    buf[new_top..new_top + size].fill(0);
    buf[new_top..new_top + 2].copy_from_slice(&0u16.to_ne_bytes()); // composite placeholder
    buf[new_top + 2..new_top + 4].copy_from_slice(&slot_idx.to_ne_bytes());

    Ok(new_top)
}

// A freed slot's node region has been zeroed except for its first two
// bytes, which the free list reuses to store "next free slot + 1" (0
// means end of list). These two tiny helpers keep that encoding in one
// place instead of spreading magic offsets across `free_node`/`alloc_node`.
fn free_list_next(buf: &[u8], freed_slot_idx: u16) -> u16 {
    let node_off = data::slot(buf, freed_slot_idx) as usize;
    u16::from_ne_bytes(buf[node_off..node_off + 2].try_into().unwrap())
}

fn set_free_list_next(buf: &mut [u8], freed_slot_idx: u16, next: u16) {
    let node_off = data::slot(buf, freed_slot_idx) as usize;
    buf[node_off..node_off + 2].copy_from_slice(&next.to_ne_bytes());
}

/// Encode a brand-new node (header + name + value) into `buf`, allocating
/// its slot first. Returns the node's slot index (stable across
/// compactions) and its current byte offset.
pub fn create_node(
    buf: &mut [u8],
    width: OffsetWidth,
    name: &str,
    value: &NodeValue,
) -> Result<(u16, usize), HiveError> {
    let size = crate::storage::node::encoded_size(name, value, width);
    let at = alloc_node(buf, size)?;
    let slot_idx = u16::from_ne_bytes(buf[at + 2..at + 4].try_into().unwrap());
    let header = NodeHeader {
        balance_factor: 0,
        node_type: value.type_tag() as u8,
        size,
        slot_idx,
        left: 0,
        right: 0,
    };
    encode_node(buf, at, width, &header, name, value);
    Ok((slot_idx, at))
}

/// Resize the node at slot `slot_idx` to `new_size` bytes (4-byte
/// aligned); `new_size == 0` deletes it. Nodes below the resized one in
/// the bump region are shifted to keep the page packed, and their slot
/// entries updated. Returns the node's new byte offset (0 if deleted).
pub fn resize_node(buf: &mut [u8], width: OffsetWidth, slot_idx: u16, new_size: usize) -> Result<usize, HiveError> {
    debug_assert_eq!(new_size % 4, 0);
    let old_off = data::slot(buf, slot_idx) as usize;
    let old_header = decode_header(buf, old_off, width);
    let old_size = old_header.size;

    if new_size == 0 {
        free_node_at(buf, width, slot_idx, old_off, old_size);
        return Ok(0);
    }

    if new_size == old_size {
        return Ok(old_off);
    }

    let top = data::top(buf) as usize;
    if new_size > old_size {
        let grow = new_size - old_size;
        let free_space = top.saturating_sub(data::slot_array_end(buf));
        if grow > free_space {
            return Err(HiveError::NoMem(format!(
                "cannot grow node by {grow} bytes ({free_space} free)"
            )));
        }
        shift_region(buf, width, top, old_off, grow, true);
        let new_off = old_off - grow;
        data::set_top(buf, (top - grow) as u16);
        data::set_slot(buf, slot_idx, new_off as u16);
        Ok(new_off)
    } else {
        let shrink = old_size - new_size;
        shift_region(buf, width, top, old_off, shrink, false);
        let new_off = old_off + shrink;
        data::set_top(buf, (top + shrink) as u16);
        data::set_slot(buf, slot_idx, new_off as u16);
        Ok(new_off)
    }
}

/// Shift every node whose offset is strictly below `boundary` (i.e. all
/// nodes packed *above* `boundary` don't move; nodes between `top` and
/// `boundary` do) by `delta` bytes, rewriting their slot entries. When
/// `downward` is true we are making room above `boundary` (nodes move
/// toward lower addresses); otherwise we are collapsing freed space
/// (nodes move toward higher addresses).
fn shift_region(buf: &mut [u8], width: OffsetWidth, top: usize, boundary: usize, delta: usize, downward: bool) {
    let count = data::index_count(buf);
    // Collect (slot_idx, offset) pairs that lie strictly below `boundary`
    // (i.e. were allocated after it, since the region grows downward).
    let mut below: Vec<(u16, usize)> = (0..count)
        .map(|idx| (idx, data::slot(buf, idx) as usize))
        .filter(|&(_, off)| off < boundary && off >= top)
        .collect();
    below.sort_by_key(|&(_, off)| off);

    if downward {
        for &(idx, off) in below.iter() {
            let header = decode_header(buf, off, width);
            let new_off = off - delta;
            buf.copy_within(off..off + header.size, new_off);
            data::set_slot(buf, idx, new_off as u16);
            let comp_off = new_off + 2;
            buf[comp_off..comp_off + 2].copy_from_slice(&idx.to_ne_bytes());
        }
    } else {
        for &(idx, off) in below.iter().rev() {
            let header = decode_header(buf, off, width);
            let new_off = off + delta;
            buf.copy_within(off..off + header.size, new_off);
            data::set_slot(buf, idx, new_off as u16);
            let comp_off = new_off + 2;
            buf[comp_off..comp_off + 2].copy_from_slice(&idx.to_ne_bytes());
        }
    }
}

fn free_node_at(buf: &mut [u8], width: OffsetWidth, slot_idx: u16, off: usize, size: usize) {
    let top = data::top(buf) as usize;
    let count = data::index_count(buf);

    // Close the gap: every node packed below `off` (offsets in [top, off),
    // i.e. allocated after this one) shifts toward higher addresses by
    // `size` bytes.
    shift_region(buf, width, top, off, size, false);
    data::set_top(buf, (top + size) as u16);

    if slot_idx + 1 == count {
        // Freed the most recently allocated slot: just shrink the array.
        data::set_index_count(buf, count - 1);
    } else {
        let head = data::index_freelist(buf);
        set_free_list_next(buf, slot_idx, head);
        data::set_index_freelist(buf, slot_idx + 1);
        data::set_slot(buf, slot_idx, 0);
    }
}

/// Delete the node at `slot_idx`; equivalent to `resize_node(.., 0)`.
pub fn free_node(buf: &mut [u8], width: OffsetWidth, slot_idx: u16) -> Result<(), HiveError> {
    resize_node(buf, width, slot_idx, 0).map(|_| ())
}
