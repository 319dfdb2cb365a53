// AVL tree operator: search with back-trace, insert, and delete, threaded
// through the page cache so every node access pins the page it lives on.
// Recursion is replaced by an explicit, fixed-capacity back-trace stack
// (`AVL_MAX_HEIGHT = 64`, a plain array rather than a `Vec` since the bound
// is known up front and the hot path shouldn't allocate).
//
// Every tree operated on here (a key's children tree, a key's values
// tree, the header's top-level children tree, the header's back-link
// tree) is just a root node reference plus this same set of operations;
// callers own the root slot (header field or key node field) and pass
// the current root in, getting a possibly-different root back out.

use crate::storage::cache::{Demand, PageCache};
use crate::storage::error::HiveError;
use crate::storage::header::LiveHeader;
use crate::storage::layout::{OffsetWidth, AVL_MAX_HEIGHT, PAGE_SIZE};
use crate::storage::node::{self, NodeHeader, NodeValue};

pub type NodeRef = u64;

fn page_of(r: NodeRef) -> u64 {
    r & !((PAGE_SIZE as u64) - 1)
}

fn intra(r: NodeRef) -> usize {
    (r & (PAGE_SIZE as u64 - 1)) as usize
}

pub fn read_header(cache: &PageCache, width: OffsetWidth, r: NodeRef) -> Result<NodeHeader, HiveError> {
    let guard = cache.get_guarded(page_of(r), Demand::Existing)?;
    Ok(node::decode_header(guard.as_slice(), intra(r), width))
}

pub fn read_name(cache: &PageCache, width: OffsetWidth, r: NodeRef) -> Result<String, HiveError> {
    let guard = cache.get_guarded(page_of(r), Demand::Existing)?;
    Ok(node::decode_name(guard.as_slice(), intra(r), width))
}

pub fn read_value(cache: &PageCache, width: OffsetWidth, r: NodeRef) -> Result<NodeValue, HiveError> {
    let guard = cache.get_guarded(page_of(r), Demand::Existing)?;
    let header = node::decode_header(guard.as_slice(), intra(r), width);
    node::decode_value(guard.as_slice(), intra(r), width, &header)
}

fn write_balance_and_refs(
    cache: &PageCache,
    width: OffsetWidth,
    r: NodeRef,
    balance_factor: i8,
    left: NodeRef,
    right: NodeRef,
) -> Result<(), HiveError> {
    let guard = cache.get_guarded(page_of(r), Demand::Existing)?;
    let buf = guard.as_mut_slice();
    let at = intra(r);
    node::set_balance_factor(buf, at, balance_factor);
    node::set_refs(buf, at, width, left, right);
    guard.mark_dirty();
    Ok(())
}

fn set_left(cache: &PageCache, width: OffsetWidth, r: NodeRef, left: NodeRef) -> Result<(), HiveError> {
    let h = read_header(cache, width, r)?;
    write_balance_and_refs(cache, width, r, h.balance_factor, left, h.right)
}

fn set_right(cache: &PageCache, width: OffsetWidth, r: NodeRef, right: NodeRef) -> Result<(), HiveError> {
    let h = read_header(cache, width, r)?;
    write_balance_and_refs(cache, width, r, h.balance_factor, h.left, right)
}

fn set_bf(cache: &PageCache, width: OffsetWidth, r: NodeRef, bf: i8) -> Result<(), HiveError> {
    let h = read_header(cache, width, r)?;
    write_balance_and_refs(cache, width, r, bf, h.left, h.right)
}

/// Update a key node's children/values roots in place (used when one of
/// its subtrees' root changes).
pub fn write_key_roots(
    cache: &PageCache,
    width: OffsetWidth,
    r: NodeRef,
    children_root: u64,
    values_root: u64,
) -> Result<(), HiveError> {
    let guard = cache.get_guarded(page_of(r), Demand::Existing)?;
    node::set_key_roots(guard.as_mut_slice(), intra(r), width, children_root, values_root);
    guard.mark_dirty();
    Ok(())
}

#[derive(Debug, Clone, Copy, Default)]
struct TraceEntry {
    node: NodeRef,
    went_right: bool,
}

/// Fixed-capacity back-trace stack, bounded by `AVL_MAX_HEIGHT` (64).
/// Overflow means the tree is taller than any well-formed AVL tree can be
/// and signals `Internal` — it should only be reachable via corruption.
struct BackTrace {
    entries: [TraceEntry; AVL_MAX_HEIGHT],
    len: usize,
}

impl BackTrace {
    fn new() -> Self {
        Self {
            entries: [TraceEntry::default(); AVL_MAX_HEIGHT],
            len: 0,
        }
    }

    fn push(&mut self, node: NodeRef, went_right: bool) -> Result<(), HiveError> {
        if self.len >= AVL_MAX_HEIGHT {
            return Err(HiveError::Internal(format!(
                "AVL back-trace exceeded {AVL_MAX_HEIGHT} levels"
            )));
        }
        self.entries[self.len] = TraceEntry { node, went_right };
        self.len += 1;
        Ok(())
    }

    fn as_slice(&self) -> &[TraceEntry] {
        &self.entries[..self.len]
    }

    fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn last(&self) -> Option<TraceEntry> {
        if self.len == 0 {
            None
        } else {
            Some(self.entries[self.len - 1])
        }
    }
}

fn dir_of(went_right: bool) -> i8 {
    if went_right {
        1
    } else {
        -1
    }
}

/// Descend from `root` comparing names, recording the path taken. Returns
/// the matching node (if any) and the back-trace of ancestors visited
/// (not including the match itself).
fn search(cache: &PageCache, width: OffsetWidth, root: NodeRef, name: &str) -> Result<(Option<NodeRef>, BackTrace), HiveError> {
    let mut trace = BackTrace::new();
    let mut cur = root;
    while cur != 0 {
        let cur_name = read_name(cache, width, cur)?;
        match name.cmp(cur_name.as_str()) {
            std::cmp::Ordering::Equal => return Ok((Some(cur), trace)),
            std::cmp::Ordering::Less => {
                let h = read_header(cache, width, cur)?;
                trace.push(cur, false)?;
                cur = h.left;
            }
            std::cmp::Ordering::Greater => {
                let h = read_header(cache, width, cur)?;
                trace.push(cur, true)?;
                cur = h.right;
            }
        }
    }
    Ok((None, trace))
}

/// Public search entry point: does this tree contain `name`?
pub fn find(cache: &PageCache, width: OffsetWidth, root: NodeRef, name: &str) -> Result<Option<NodeRef>, HiveError> {
    search(cache, width, root, name).map(|(found, _)| found)
}

fn rotate_left_bf(n_bf: i8, r_bf: i8) -> (i8, i8) {
    let new_n = n_bf - 1 - r_bf.max(0);
    let new_r = r_bf - 1 + new_n.min(0);
    (new_n, new_r)
}

fn rotate_right_bf(n_bf: i8, l_bf: i8) -> (i8, i8) {
    let new_n = n_bf + 1 - l_bf.min(0);
    let new_l = l_bf + 1 + new_n.max(0);
    (new_n, new_l)
}

/// Single left rotation: `n`'s right child `r` becomes the new subtree
/// root, `n` becomes `r`'s left child.
fn rotate_left(cache: &PageCache, width: OffsetWidth, n: NodeRef) -> Result<NodeRef, HiveError> {
    let hn = read_header(cache, width, n)?;
    let r = hn.right;
    let hr = read_header(cache, width, r)?;
    let (new_n_bf, new_r_bf) = rotate_left_bf(hn.balance_factor, hr.balance_factor);
    write_balance_and_refs(cache, width, n, new_n_bf, hn.left, hr.left)?;
    write_balance_and_refs(cache, width, r, new_r_bf, n, hr.right)?;
    Ok(r)
}

/// Single right rotation: `n`'s left child `l` becomes the new subtree
/// root, `n` becomes `l`'s right child.
fn rotate_right(cache: &PageCache, width: OffsetWidth, n: NodeRef) -> Result<NodeRef, HiveError> {
    let hn = read_header(cache, width, n)?;
    let l = hn.left;
    let hl = read_header(cache, width, l)?;
    let (new_n_bf, new_l_bf) = rotate_right_bf(hn.balance_factor, hl.balance_factor);
    write_balance_and_refs(cache, width, n, new_n_bf, hl.right, hn.right)?;
    write_balance_and_refs(cache, width, l, new_l_bf, hl.left, n)?;
    Ok(l)
}

/// Rebalance node `n` which has become overweight on side `heavy` (+1 =
/// right-heavy/BF==+2, -1 = left-heavy/BF==-2). Dispatches to the four
/// LL/RR/LR/RL cases and returns the new local subtree root.
fn rotate(cache: &PageCache, width: OffsetWidth, n: NodeRef, heavy: i8) -> Result<NodeRef, HiveError> {
    if heavy > 0 {
        let hn = read_header(cache, width, n)?;
        let r = hn.right;
        let hr = read_header(cache, width, r)?;
        if hr.balance_factor < 0 {
            let new_r = rotate_right(cache, width, r)?;
            set_right(cache, width, n, new_r)?;
        }
        rotate_left(cache, width, n)
    } else {
        let hn = read_header(cache, width, n)?;
        let l = hn.left;
        let hl = read_header(cache, width, l)?;
        if hl.balance_factor > 0 {
            let new_l = rotate_left(cache, width, l)?;
            set_left(cache, width, n, new_l)?;
        }
        rotate_right(cache, width, n)
    }
}

/// Attach `new_ref` and rebalance on the way back up; returns the
/// (possibly changed) root of the whole tree.
fn balance_after_insert(
    cache: &PageCache,
    width: OffsetWidth,
    root: NodeRef,
    trace: &[TraceEntry],
) -> Result<NodeRef, HiveError> {
    for idx in (0..trace.len()).rev() {
        let entry = trace[idx];
        let dir = dir_of(entry.went_right);
        let h = read_header(cache, width, entry.node)?;
        if h.balance_factor == 0 {
            set_bf(cache, width, entry.node, dir)?;
            continue;
        } else if h.balance_factor == -dir {
            set_bf(cache, width, entry.node, 0)?;
            return Ok(root);
        } else {
            let new_local_root = rotate(cache, width, entry.node, dir)?;
            if idx == 0 {
                return Ok(new_local_root);
            }
            let parent = trace[idx - 1];
            if parent.went_right {
                set_right(cache, width, parent.node, new_local_root)?;
            } else {
                set_left(cache, width, parent.node, new_local_root)?;
            }
            return Ok(root);
        }
    }
    Ok(root)
}

/// Insert `name`/`value` into the tree rooted at `root` (may be 0 for an
/// empty tree). `depth`/`is_value` select the page-pool clustering
/// bucket. Returns the tree's new root and the new node's reference.
#[allow(clippy::too_many_arguments)]
pub fn insert(
    cache: &PageCache,
    header: &mut LiveHeader,
    width: OffsetWidth,
    root: NodeRef,
    depth: u16,
    is_value: bool,
    name: &str,
    value: &NodeValue,
) -> Result<(NodeRef, NodeRef), HiveError> {
    node::validate(name, value)?;
    let (found, trace) = search(cache, width, root, name)?;
    if found.is_some() {
        return Err(HiveError::Exists(format!("'{name}' already exists")));
    }

    let new_ref = header.alloc_node(cache, depth, is_value, name, value)?;

    if trace.is_empty() {
        return Ok((new_ref, new_ref));
    }

    let parent = trace.last().unwrap();
    if parent.went_right {
        set_right(cache, width, parent.node, new_ref)?;
    } else {
        set_left(cache, width, parent.node, new_ref)?;
    }

    let new_root = balance_after_insert(cache, width, root, trace.as_slice())?;
    Ok((new_root, new_ref))
}

struct RebalanceOutcome {
    root_override: Option<NodeRef>,
    propagated: bool,
}

/// Rebalance after a deletion shrank the subtree at `trace[trace.len()-1]`
/// on the side its `went_right` flag names, walking back up through
/// `trace`. Mirrors `balance_after_insert` but height may keep
/// decreasing past a node whose own balance factor becomes exactly 0.
fn rebalance_delete(cache: &PageCache, width: OffsetWidth, trace: &[TraceEntry]) -> Result<RebalanceOutcome, HiveError> {
    for idx in (0..trace.len()).rev() {
        let entry = trace[idx];
        let dir = dir_of(entry.went_right);
        let h = read_header(cache, width, entry.node)?;
        if h.balance_factor == 0 {
            set_bf(cache, width, entry.node, -dir)?;
            return Ok(RebalanceOutcome {
                root_override: None,
                propagated: false,
            });
        } else if h.balance_factor == dir {
            set_bf(cache, width, entry.node, 0)?;
            if idx == 0 {
                return Ok(RebalanceOutcome {
                    root_override: None,
                    propagated: true,
                });
            }
            continue;
        } else {
            let heavy = -dir;
            let new_local_root = rotate(cache, width, entry.node, heavy)?;
            if idx == 0 {
                let new_bf = read_header(cache, width, new_local_root)?.balance_factor;
                return Ok(RebalanceOutcome {
                    root_override: Some(new_local_root),
                    propagated: new_bf == 0,
                });
            }
            let parent = trace[idx - 1];
            if parent.went_right {
                set_right(cache, width, parent.node, new_local_root)?;
            } else {
                set_left(cache, width, parent.node, new_local_root)?;
            }
            let new_bf = read_header(cache, width, new_local_root)?.balance_factor;
            if new_bf == 0 {
                continue;
            }
            return Ok(RebalanceOutcome {
                root_override: None,
                propagated: false,
            });
        }
    }
    Ok(RebalanceOutcome {
        root_override: None,
        propagated: true,
    })
}

/// Delete `name` from the tree rooted at `root`. Returns the tree's new
/// root and the (now-freed) node's former reference, which callers that
/// track back-links or other external indices may still need briefly
/// before it is gone.
pub fn delete(cache: &PageCache, width: OffsetWidth, root: NodeRef, name: &str) -> Result<NodeRef, HiveError> {
    let (found, outer_trace) = search(cache, width, root, name)?;
    let target = found.ok_or_else(|| HiveError::NotFound(format!("'{name}' not found")))?;
    let target_header = read_header(cache, width, target)?;
    let outer_slice: Vec<TraceEntry> = outer_trace.as_slice().to_vec();

    let new_root = if target_header.left == 0 || target_header.right == 0 {
        delete_simple(cache, width, root, &outer_slice, target, &target_header)?
    } else {
        delete_with_successor(cache, width, root, &outer_slice, target, &target_header)?
    };

    free_node_slot(cache, width, target)?;
    Ok(new_root)
}

fn attach_replacement(
    cache: &PageCache,
    width: OffsetWidth,
    root: NodeRef,
    outer_trace: &[TraceEntry],
    replacement: NodeRef,
) -> Result<NodeRef, HiveError> {
    match outer_trace.last() {
        None => Ok(replacement),
        Some(parent) => {
            if parent.went_right {
                set_right(cache, width, parent.node, replacement)?;
            } else {
                set_left(cache, width, parent.node, replacement)?;
            }
            Ok(root)
        }
    }
}

/// Leaf or one-child deletion: replace `target` with its (possibly null)
/// single child, then rebalance from `target`'s parent up.
fn delete_simple(
    cache: &PageCache,
    width: OffsetWidth,
    root: NodeRef,
    outer_trace: &[TraceEntry],
    _target: NodeRef,
    target_header: &NodeHeader,
) -> Result<NodeRef, HiveError> {
    let replacement = if target_header.left != 0 {
        target_header.left
    } else {
        target_header.right
    };

    let mut new_root = attach_replacement(cache, width, root, outer_trace, replacement)?;
    if !outer_trace.is_empty() {
        let outcome = rebalance_delete(cache, width, outer_trace)?;
        if let Some(r) = outcome.root_override {
            new_root = r;
        }
    }
    Ok(new_root)
}

/// Two-child deletion: splice the in-order successor (leftmost of the
/// right subtree) into `target`'s position, carrying `target`'s balance
/// factor, then rebalance both where the successor was removed from and
/// where it was spliced in.
fn delete_with_successor(
    cache: &PageCache,
    width: OffsetWidth,
    root: NodeRef,
    outer_trace: &[TraceEntry],
    target: NodeRef,
    target_header: &NodeHeader,
) -> Result<NodeRef, HiveError> {
    let mut sub_trace = BackTrace::new();
    let mut cur = target_header.right;
    loop {
        let h = read_header(cache, width, cur)?;
        if h.left == 0 {
            break;
        }
        sub_trace.push(cur, false)?;
        cur = h.left;
    }
    let successor = cur;
    let successor_header = read_header(cache, width, successor)?;
    let successor_right = successor_header.right;

    if let Some(parent) = sub_trace.last() {
        set_left(cache, width, parent.node, successor_right)?;
    }

    let (final_right, propagate_to_outer) = if !sub_trace.is_empty() {
        let outcome = rebalance_delete(cache, width, sub_trace.as_slice())?;
        let right = outcome.root_override.unwrap_or(target_header.right);
        (right, outcome.propagated)
    } else {
        (successor_right, true)
    };

    write_balance_and_refs(
        cache,
        width,
        successor,
        target_header.balance_factor,
        target_header.left,
        final_right,
    )?;

    let mut new_root = attach_replacement(cache, width, root, outer_trace, successor)?;

    if propagate_to_outer && !outer_trace.is_empty() {
        let outcome = rebalance_delete(cache, width, outer_trace)?;
        if let Some(r) = outcome.root_override {
            new_root = r;
        }
    }

    if outer_trace.is_empty() {
        new_root = successor;
    }

    let _ = target;
    Ok(new_root)
}

fn free_node_slot(cache: &PageCache, width: OffsetWidth, r: NodeRef) -> Result<(), HiveError> {
    let guard = cache.get_guarded(page_of(r), Demand::Existing)?;
    let header = node::decode_header(guard.as_slice(), intra(r), width);
    crate::storage::alloc::free_node(guard.as_mut_slice(), width, header.slot_idx)?;
    guard.mark_dirty();
    Ok(())
}

/// Leftmost node of the tree rooted at `root` (ascending first / KEYS or
/// VALUES direction is irrelevant here — it's purely structural).
pub fn min(cache: &PageCache, width: OffsetWidth, root: NodeRef) -> Result<Option<NodeRef>, HiveError> {
    if root == 0 {
        return Ok(None);
    }
    let mut cur = root;
    loop {
        let h = read_header(cache, width, cur)?;
        if h.left == 0 {
            return Ok(Some(cur));
        }
        cur = h.left;
    }
}

/// Rightmost node of the tree rooted at `root`.
pub fn max(cache: &PageCache, width: OffsetWidth, root: NodeRef) -> Result<Option<NodeRef>, HiveError> {
    if root == 0 {
        return Ok(None);
    }
    let mut cur = root;
    loop {
        let h = read_header(cache, width, cur)?;
        if h.right == 0 {
            return Ok(Some(cur));
        }
        cur = h.right;
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
        (PageCache::new(file, pool, 1024, 8, true), dir)
    }

    fn check_avl_invariant(cache: &PageCache, width: OffsetWidth, root: NodeRef) -> i32 {
        if root == 0 {
            return 0;
        }
        let h = read_header(cache, width, root).unwrap();
        let lh = check_avl_invariant(cache, width, h.left);
        let rh = check_avl_invariant(cache, width, h.right);
        assert!((rh - lh).abs() <= 1, "balance violated at {root}: l={lh} r={rh}");
        assert_eq!(h.balance_factor as i32, rh - lh);
        1 + lh.max(rh)
    }

    fn inorder_names(cache: &PageCache, width: OffsetWidth, root: NodeRef, out: &mut Vec<String>) {
        if root == 0 {
            return;
        }
        let h = read_header(cache, width, root).unwrap();
        inorder_names(cache, width, h.left, out);
        out.push(read_name(cache, width, root).unwrap());
        inorder_names(cache, width, h.right, out);
    }

    #[test]
    fn test_insert_many_keeps_avl_balanced_and_sorted() {
        let (cache, _dir) = new_cache();
        let mut header = LiveHeader::new(OffsetWidth::Offset64);
        let mut root: NodeRef = 0;
        let names: Vec<String> = (0..200).map(|i| format!("{:04}", (i * 37) % 200)).collect();
        for name in &names {
            let (new_root, _) = insert(
                &cache,
                &mut header,
                OffsetWidth::Offset64,
                root,
                0,
                false,
                name,
                &NodeValue::Int32(0),
            )
            .unwrap();
            root = new_root;
            check_avl_invariant(&cache, OffsetWidth::Offset64, root);
        }
        let mut out = vec![];
        inorder_names(&cache, OffsetWidth::Offset64, root, &mut out);
        let mut expected = names.clone();
        expected.sort();
        assert_eq!(out, expected);
    }

    #[test]
    fn test_duplicate_insert_fails_exists() {
        let (cache, _dir) = new_cache();
        let mut header = LiveHeader::new(OffsetWidth::Offset64);
        let (root, _) = insert(&cache, &mut header, OffsetWidth::Offset64, 0, 0, false, "a", &NodeValue::Int32(1)).unwrap();
        let err = insert(&cache, &mut header, OffsetWidth::Offset64, root, 0, false, "a", &NodeValue::Int32(2)).unwrap_err();
        assert!(matches!(err, HiveError::Exists(_)));
    }

    #[test]
    fn test_delete_all_keeps_tree_balanced_and_empty_at_end() {
        let (cache, _dir) = new_cache();
        let mut header = LiveHeader::new(OffsetWidth::Offset64);
        let mut root: NodeRef = 0;
        let names: Vec<String> = (0..60).map(|i| format!("{:03}", (i * 17) % 60)).collect();
        for name in &names {
            let (new_root, _) = insert(&cache, &mut header, OffsetWidth::Offset64, root, 0, false, name, &NodeValue::Int32(0)).unwrap();
            root = new_root;
        }
        check_avl_invariant(&cache, OffsetWidth::Offset64, root);

        let mut delete_order = names.clone();
        delete_order.sort_by_key(|n| (n.as_bytes()[0] as i32 * 31 + n.as_bytes()[1] as i32));
        for name in &delete_order {
            root = delete(&cache, OffsetWidth::Offset64, root, name).unwrap();
            if root != 0 {
                check_avl_invariant(&cache, OffsetWidth::Offset64, root);
            }
        }
        assert_eq!(root, 0);
    }

    #[test]
    fn test_delete_missing_key_not_found() {
        let (cache, _dir) = new_cache();
        let mut header = LiveHeader::new(OffsetWidth::Offset64);
        let (root, _) = insert(&cache, &mut header, OffsetWidth::Offset64, 0, 0, false, "a", &NodeValue::Int32(1)).unwrap();
        let err = delete(&cache, OffsetWidth::Offset64, root, "missing").unwrap_err();
        assert!(matches!(err, HiveError::NotFound(_)));
    }

    #[test]
    fn test_min_and_max() {
        let (cache, _dir) = new_cache();
        let mut header = LiveHeader::new(OffsetWidth::Offset64);
        let mut root: NodeRef = 0;
        for name in ["m", "a", "z", "c", "y"] {
            let (new_root, _) = insert(&cache, &mut header, OffsetWidth::Offset64, root, 0, false, name, &NodeValue::Int32(0)).unwrap();
            root = new_root;
        }
        let min_ref = min(&cache, OffsetWidth::Offset64, root).unwrap().unwrap();
        let max_ref = max(&cache, OffsetWidth::Offset64, root).unwrap().unwrap();
        assert_eq!(read_name(&cache, OffsetWidth::Offset64, min_ref).unwrap(), "a");
        assert_eq!(read_name(&cache, OffsetWidth::Offset64, max_ref).unwrap(), "z");
    }
}
