// In-order cursor: walks a single AVL tree without holding any page
// pinned between calls, using a fixed-capacity stack of ancestor
// references (same bound as the AVL back-trace, `AVL_MAX_HEIGHT`) rather
// than a recursive iterator, so a `Cursor` can be parked indefinitely
// between `first`/`next` calls without tying up a pin or a lock.

use crate::storage::avl::{self, NodeRef};
use crate::storage::cache::PageCache;
use crate::storage::error::HiveError;
use crate::storage::layout::{OffsetWidth, AVL_MAX_HEIGHT};
use crate::storage::node::NodeValue;

/// Direction a cursor walks the tree in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// One entry returned by the cursor: enough to identify the node and read
/// it further without re-searching.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub node_ref: NodeRef,
    pub name: String,
    pub value: NodeValue,
}

/// Walks a tree rooted at a fixed `root` reference in sorted order. Does
/// not observe insertions/deletions made after it is created; a live
/// cursor is not safe across concurrent modification, matching the
/// single-writer model the rest of the store assumes.
pub struct Cursor {
    root: NodeRef,
    direction: Direction,
    stack: [NodeRef; AVL_MAX_HEIGHT],
    stack_len: usize,
    started: bool,
}

impl Cursor {
    pub fn new(root: NodeRef, direction: Direction) -> Self {
        Self {
            root,
            direction,
            stack: [0; AVL_MAX_HEIGHT],
            stack_len: 0,
            started: false,
        }
    }

    fn push(&mut self, node: NodeRef) -> Result<(), HiveError> {
        if self.stack_len >= AVL_MAX_HEIGHT {
            return Err(HiveError::Internal(format!(
                "cursor stack exceeded {AVL_MAX_HEIGHT} levels"
            )));
        }
        self.stack[self.stack_len] = node;
        self.stack_len += 1;
        Ok(())
    }

    fn pop(&mut self) -> Option<NodeRef> {
        if self.stack_len == 0 {
            None
        } else {
            self.stack_len -= 1;
            Some(self.stack[self.stack_len])
        }
    }

    fn far_child(&self, header: &crate::storage::node::NodeHeader) -> NodeRef {
        match self.direction {
            Direction::Ascending => header.left,
            Direction::Descending => header.right,
        }
    }

    fn near_child(&self, header: &crate::storage::node::NodeHeader) -> NodeRef {
        match self.direction {
            Direction::Ascending => header.right,
            Direction::Descending => header.left,
        }
    }

    /// Push the spine of "far" children (left for ascending, right for
    /// descending) starting from `from`, leaving the next node to visit on
    /// top of the stack.
    fn push_spine(&mut self, cache: &PageCache, width: OffsetWidth, from: NodeRef) -> Result<(), HiveError> {
        let mut cur = from;
        while cur != 0 {
            self.push(cur)?;
            let header = avl::read_header(cache, width, cur)?;
            cur = self.far_child(&header);
        }
        Ok(())
    }

    fn load(cache: &PageCache, width: OffsetWidth, node_ref: NodeRef) -> Result<NodeInfo, HiveError> {
        let header = avl::read_header(cache, width, node_ref)?;
        let name = avl::read_name(cache, width, node_ref)?;
        let value = crate::storage::avl::read_value(cache, width, node_ref)?;
        let _ = header;
        Ok(NodeInfo { node_ref, name, value })
    }

    /// Position the cursor at the first entry. With `start_name` given,
    /// positions at that exact name if present, otherwise at the first
    /// entry strictly after it in the cursor's direction (used by
    /// `Hive::cursor` to resume from a known key).
    pub fn first(
        &mut self,
        cache: &PageCache,
        width: OffsetWidth,
        start_name: Option<&str>,
    ) -> Result<Option<NodeInfo>, HiveError> {
        self.stack_len = 0;
        self.started = true;

        match start_name {
            None => {
                self.push_spine(cache, width, self.root)?;
            }
            Some(name) => {
                let mut cur = self.root;
                while cur != 0 {
                    let cur_name = avl::read_name(cache, width, cur)?;
                    let header = avl::read_header(cache, width, cur)?;
                    match name.cmp(cur_name.as_str()) {
                        std::cmp::Ordering::Equal => {
                            self.push(cur)?;
                            cur = 0;
                        }
                        std::cmp::Ordering::Less => {
                            if self.direction == Direction::Ascending {
                                self.push(cur)?;
                            }
                            cur = header.left;
                        }
                        std::cmp::Ordering::Greater => {
                            if self.direction == Direction::Descending {
                                self.push(cur)?;
                            }
                            cur = header.right;
                        }
                    }
                }
            }
        }

        match self.pop() {
            None => Ok(None),
            Some(node_ref) => {
                let header = avl::read_header(cache, width, node_ref)?;
                self.push_spine(cache, width, self.near_child(&header))?;
                Ok(Some(Self::load(cache, width, node_ref)?))
            }
        }
    }

    /// Advance to the next entry in the cursor's direction.
    pub fn next(&mut self, cache: &PageCache, width: OffsetWidth) -> Result<Option<NodeInfo>, HiveError> {
        if !self.started {
            return self.first(cache, width, None);
        }
        match self.pop() {
            None => Ok(None),
            Some(node_ref) => {
                let header = avl::read_header(cache, width, node_ref)?;
                self.push_spine(cache, width, self.near_child(&header))?;
                Ok(Some(Self::load(cache, width, node_ref)?))
            }
        }
    }
}
