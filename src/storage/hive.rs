// The `Hive` façade: one open database file, composing `cache`, `header`,
// `avl`, `cursor`, `concurrency` and `commit` into the public surface of
// the store. Every write path is a single catch site: a mutating method
// builds up its change under the write lock and, on any `Err`, runs
// `commit::rollback` before returning it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::storage::avl::{self, NodeRef};
use crate::storage::cache::PageCache;
use crate::storage::commit;
use crate::storage::concurrency::ConcurrencyManager;
use crate::storage::cursor::{Cursor, Direction, NodeInfo};
use crate::storage::error::{self, HiveError};
use crate::storage::header::LiveHeader;
use crate::storage::io::{FilePageFile, PageFile};
use crate::storage::layout::{OffsetWidth, PAGE_SIZE};
use crate::storage::node::NodeValue;
use crate::storage::page::HeaderFields;
use crate::storage::pool::{AlignedBufferPool, DEFAULT_BLOCK_SIZE};

/// Tuning knobs for an open `Hive`, distinct from the per-open `OpenFlags`.
/// `page_size` is carried for documentation/assertion purposes only — the
/// on-disk format is not generic over page size.
#[derive(Debug, Clone)]
pub struct HiveConfig {
    pub page_size: usize,
    pub cache_kb: usize,
    pub cache_row_items: usize,
    pub block_size: usize,
    pub offset_width: OffsetWidth,
    pub autosave: bool,
}

impl Default for HiveConfig {
    fn default() -> Self {
        Self {
            page_size: PAGE_SIZE,
            cache_kb: 1024,
            cache_row_items: crate::storage::layout::DEFAULT_CACHE_ROW_ITEMS,
            block_size: DEFAULT_BLOCK_SIZE,
            offset_width: OffsetWidth::Offset64,
            autosave: false,
        }
    }
}

/// Flags for `Hive::open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags(u32);

impl OpenFlags {
    pub const READWRITE: OpenFlags = OpenFlags(1 << 0);
    pub const READONLY: OpenFlags = OpenFlags(1 << 1);
    pub const CREATE: OpenFlags = OpenFlags(1 << 2);
    pub const SHARED: OpenFlags = OpenFlags(1 << 3);
    pub const AUTOSAVE: OpenFlags = OpenFlags(1 << 4);

    pub fn contains(self, other: OpenFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for OpenFlags {
    type Output = OpenFlags;
    fn bitor(self, rhs: OpenFlags) -> OpenFlags {
        OpenFlags(self.0 | rhs.0)
    }
}

/// Flags selecting which tree (`find`/`delete`/`cursor` operate on a key's
/// children or its values) and which direction a cursor walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectFlags(u32);

impl SelectFlags {
    pub const KEYS: SelectFlags = SelectFlags(1 << 0);
    pub const VALUES: SelectFlags = SelectFlags(1 << 1);
    pub const ASCENDING: SelectFlags = SelectFlags(1 << 2);
    pub const DESCENDING: SelectFlags = SelectFlags(1 << 3);

    pub fn contains(self, other: SelectFlags) -> bool {
        self.0 & other.0 == other.0
    }

    fn direction(self) -> Direction {
        if self.contains(SelectFlags::DESCENDING) {
            Direction::Descending
        } else {
            Direction::Ascending
        }
    }
}

impl std::ops::BitOr for SelectFlags {
    type Output = SelectFlags;
    fn bitor(self, rhs: SelectFlags) -> SelectFlags {
        SelectFlags(self.0 | rhs.0)
    }
}

/// Name under which a target node's back-link entry lives in the header's
/// back-link tree: one key per distinct target offset, hex-formatted so it
/// sorts and compares as an ordinary tree key.
fn backlink_key_name(target: NodeRef) -> String {
    format!("{target:016x}")
}

/// One open database. Owns the cache, the live header (plus its shadow
/// copy for rollback) and the database-wide lock; every public method
/// acquires that lock before touching anything.
pub struct Hive {
    path: PathBuf,
    cache: PageCache,
    width: OffsetWidth,
    header: parking_lot::Mutex<LiveHeader>,
    shadow: parking_lot::Mutex<HeaderFields>,
    lock: ConcurrencyManager,
    read_only: bool,
}

impl Hive {
    /// Open (optionally creating) a database file at `path`.
    pub fn open(path: impl AsRef<Path>, config: HiveConfig, flags: OpenFlags) -> Result<Self, HiveError> {
        let path = path.as_ref().to_path_buf();
        let read_only = flags.contains(OpenFlags::READONLY) && !flags.contains(OpenFlags::READWRITE);
        let create = flags.contains(OpenFlags::CREATE);
        let autosave = flags.contains(OpenFlags::AUTOSAVE) || config.autosave;

        let _span = tracing::span!(tracing::Level::DEBUG, "hive", db = %path.display()).entered();

        let file: Arc<dyn PageFile> = Arc::new(FilePageFile::open(&path, create, read_only)?);
        let existing_len = file.len()?;
        let is_new = existing_len == 0;
        if is_new {
            if read_only {
                return Err(error::record(HiveError::NotFound(format!(
                    "'{}' does not exist and READONLY was requested",
                    path.display()
                ))));
            }
            file.set_len(PAGE_SIZE as u64)?;
        }

        let pool = Arc::new(AlignedBufferPool::new(config.page_size, config.block_size));
        let cache = PageCache::new(file, pool, config.cache_kb, config.cache_row_items, autosave);

        let header = if is_new {
            let h = LiveHeader::new(config.offset_width);
            h.write_into(&cache)?;
            commit::commit(&cache, &h, true)?;
            h
        } else {
            let guard = cache.get_guarded(0, crate::storage::cache::Demand::Existing)?;
            let flags_word = crate::storage::page::header::read(guard.as_slice(), OffsetWidth::Offset64).flags;
            let width = if flags_word & crate::storage::page::FLAG_OFFSET64 != 0 {
                OffsetWidth::Offset64
            } else {
                OffsetWidth::Offset32
            };
            let fields = crate::storage::page::header::read(guard.as_slice(), width);
            LiveHeader::from_fields(width, &fields)
        };

        let shadow = header.to_fields();
        let width = header.width;
        debug!(new = is_new, "hive opened");

        Ok(Self {
            path,
            cache,
            width,
            header: parking_lot::Mutex::new(header),
            shadow: parking_lot::Mutex::new(shadow),
            lock: ConcurrencyManager::new(),
            read_only,
        })
    }

    /// Commit any pending writes, flush every dirty frame to disk, and fsync.
    /// The page-frame pool behind this hive's cache is released as soon as
    /// `self` drops at the end of this call, via `AlignedBufferPool`'s
    /// `Drop` impl — the same thing happens if a `Hive` is simply dropped
    /// without calling `close`, but `close` additionally makes the final
    /// flush explicit and reports its errors instead of losing them to an
    /// unchecked drop.
    pub fn close(self) -> Result<(), HiveError> {
        let _write = self.lock.write();
        if !self.read_only {
            let header = self.header.lock();
            commit::commit(&self.cache, &header, true).map_err(error::record)?;
        }
        self.cache.flush_dirty().map_err(error::record)?;
        self.cache.sync().map_err(error::record)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn last_error(&self) -> Option<String> {
        error::last_error()
    }

    /// Commit every pending change. `flush` additionally fsyncs so the
    /// commit survives a crash.
    pub fn commit(&self, flush: bool) -> Result<(), HiveError> {
        let _write = self.lock.write();
        let header = self.header.lock();
        commit::commit(&self.cache, &header, flush).map_err(error::record)?;
        *self.shadow.lock() = header.to_fields();
        Ok(())
    }

    fn rollback(&self) {
        let mut header = self.header.lock();
        let shadow = self.shadow.lock();
        match commit::rollback(&self.cache, self.width, &shadow) {
            Ok(restored) => *header = restored,
            Err(e) => error!(error = %e, "rollback itself failed"),
        }
    }

    fn check_writable(&self) -> Result<(), HiveError> {
        if self.read_only {
            return Err(HiveError::InvalidOperation("database opened READONLY".into()));
        }
        Ok(())
    }

    /// Run a mutating closure under the exclusive lock; on any error, roll
    /// back before propagating.
    fn with_write<T>(
        &self,
        f: impl FnOnce(&mut LiveHeader) -> Result<T, HiveError>,
    ) -> Result<T, HiveError> {
        self.check_writable()?;
        let _write = self.lock.write();
        let mut header = self.header.lock();
        match f(&mut header) {
            Ok(v) => Ok(v),
            Err(e) => {
                drop(header);
                warn!(error = %e, "write path failed, rolling back");
                self.rollback();
                Err(error::record(e))
            }
        }
    }

    fn with_read<T>(&self, f: impl FnOnce(&LiveHeader) -> Result<T, HiveError>) -> Result<T, HiveError> {
        let _read = self.lock.read();
        let header = self.header.lock();
        f(&header).map_err(error::record)
    }

    // -- key resolution -----------------------------------------------

    /// The two AVL roots (children, values) owned by `parent`, or the
    /// header's top-level children tree plus an empty values tree when
    /// `parent == 0` (the implicit root of the hierarchy).
    fn roots_of(&self, header: &LiveHeader, parent: NodeRef) -> Result<(u64, u64, u16), HiveError> {
        if parent == 0 {
            return Ok((header.children_root, 0, 0));
        }
        match avl::read_value(&self.cache, self.width, parent)? {
            NodeValue::Key {
                children_root,
                values_root,
                depth,
            } => Ok((children_root, values_root, depth)),
            _ => Err(HiveError::Mismatch(format!("node {parent:#x} is not a key"))),
        }
    }

    fn tree_root(&self, header: &LiveHeader, parent: NodeRef, flags: SelectFlags) -> Result<u64, HiveError> {
        let (children_root, values_root, _) = self.roots_of(header, parent)?;
        Ok(if flags.contains(SelectFlags::VALUES) {
            values_root
        } else {
            children_root
        })
    }

    fn write_back_root(&self, header: &mut LiveHeader, parent: NodeRef, is_value: bool, new_root: u64) -> Result<(), HiveError> {
        if parent == 0 {
            if is_value {
                // The implicit root has no values tree of its own.
                return Err(HiveError::InvalidOperation(
                    "the implicit root holds keys only, not values".into(),
                ));
            }
            header.children_root = new_root;
            header.write_into(&self.cache)?;
            return Ok(());
        }
        let (children_root, values_root, _) = self.roots_of(header, parent)?;
        let (new_children, new_values) = if is_value {
            (children_root, new_root)
        } else {
            (new_root, values_root)
        };
        avl::write_key_roots(&self.cache, self.width, parent, new_children, new_values)
    }

    // -- find / get -----------------------------------------------------

    pub fn find(&self, parent: NodeRef, name: &str, flags: SelectFlags) -> Result<Option<NodeRef>, HiveError> {
        self.with_read(|header| {
            let root = self.tree_root(header, parent, flags)?;
            avl::find(&self.cache, self.width, root, name)
        })
    }

    pub fn get_name(&self, node: NodeRef) -> Result<String, HiveError> {
        self.with_read(|_| avl::read_name(&self.cache, self.width, node))
    }

    pub fn get_type(&self, node: NodeRef) -> Result<crate::storage::layout::NodeType, HiveError> {
        self.with_read(|_| {
            let h = avl::read_header(&self.cache, self.width, node)?;
            crate::storage::layout::NodeType::from_tag(h.node_type)
                .ok_or_else(|| HiveError::Corrupt(format!("unknown node type tag {}", h.node_type)))
        })
    }

    fn get_value(&self, node: NodeRef) -> Result<NodeValue, HiveError> {
        self.with_read(|_| avl::read_value(&self.cache, self.width, node))
    }

    pub fn get_int32(&self, node: NodeRef) -> Result<i32, HiveError> {
        match self.get_value(node)? {
            NodeValue::Int32(v) => Ok(v),
            _ => Err(HiveError::Mismatch(format!("node {node:#x} is not int32"))),
        }
    }

    pub fn get_int64(&self, node: NodeRef) -> Result<i64, HiveError> {
        match self.get_value(node)? {
            NodeValue::Int64(v) => Ok(v),
            _ => Err(HiveError::Mismatch(format!("node {node:#x} is not int64"))),
        }
    }

    pub fn get_double(&self, node: NodeRef) -> Result<f64, HiveError> {
        match self.get_value(node)? {
            NodeValue::Double(v) => Ok(v),
            _ => Err(HiveError::Mismatch(format!("node {node:#x} is not double"))),
        }
    }

    pub fn get_string(&self, node: NodeRef) -> Result<String, HiveError> {
        match self.get_value(node)? {
            NodeValue::String(v) => Ok(v),
            _ => Err(HiveError::Mismatch(format!("node {node:#x} is not a string"))),
        }
    }

    pub fn get_binary(&self, node: NodeRef) -> Result<Vec<u8>, HiveError> {
        match self.get_value(node)? {
            NodeValue::Binary(v) => Ok(v),
            _ => Err(HiveError::Mismatch(format!("node {node:#x} is not binary"))),
        }
    }

    /// Returns the link's target reference, resolved one hop (callers that
    /// want the target's own value call the appropriate `get_*` on it).
    pub fn get_link(&self, node: NodeRef) -> Result<NodeRef, HiveError> {
        match self.get_value(node)? {
            NodeValue::Link(target) => Ok(target),
            _ => Err(HiveError::Mismatch(format!("node {node:#x} is not a link"))),
        }
    }

    // -- create ----------------------------------------------------------

    fn create_value(&self, parent: NodeRef, name: &str, value: NodeValue) -> Result<NodeRef, HiveError> {
        self.with_write(|header| {
            let (_, values_root, depth) = self.roots_of(header, parent)?;
            let (new_root, new_ref) =
                avl::insert(&self.cache, header, self.width, values_root, depth, true, name, &value)?;
            self.write_back_root(header, parent, true, new_root)?;
            Ok(new_ref)
        })
    }

    pub fn create_key(&self, parent: NodeRef, name: &str) -> Result<NodeRef, HiveError> {
        self.with_write(|header| {
            let (children_root, _, depth) = self.roots_of(header, parent)?;
            let value = NodeValue::Key {
                children_root: 0,
                values_root: 0,
                depth: depth + 1,
            };
            let (new_root, new_ref) =
                avl::insert(&self.cache, header, self.width, children_root, depth + 1, false, name, &value)?;
            self.write_back_root(header, parent, false, new_root)?;
            Ok(new_ref)
        })
    }

    pub fn create_string(&self, parent: NodeRef, name: &str, value: &str) -> Result<NodeRef, HiveError> {
        self.create_value(parent, name, NodeValue::String(value.to_string()))
    }

    pub fn create_binary(&self, parent: NodeRef, name: &str, value: &[u8]) -> Result<NodeRef, HiveError> {
        self.create_value(parent, name, NodeValue::Binary(value.to_vec()))
    }

    pub fn create_int32(&self, parent: NodeRef, name: &str, value: i32) -> Result<NodeRef, HiveError> {
        self.create_value(parent, name, NodeValue::Int32(value))
    }

    pub fn create_int64(&self, parent: NodeRef, name: &str, value: i64) -> Result<NodeRef, HiveError> {
        self.create_value(parent, name, NodeValue::Int64(value))
    }

    pub fn create_double(&self, parent: NodeRef, name: &str, value: f64) -> Result<NodeRef, HiveError> {
        self.create_value(parent, name, NodeValue::Double(value))
    }

    /// Create a link named `name` under `parent`, pointing at `target`.
    /// Registers `target` in the header's back-link tree so deleting it
    /// is blocked while this link exists.
    pub fn create_link(&self, parent: NodeRef, name: &str, target: NodeRef) -> Result<NodeRef, HiveError> {
        self.with_write(|header| {
            let (_, values_root, depth) = self.roots_of(header, parent)?;
            let value = NodeValue::Link(target);
            let (new_values_root, link_ref) =
                avl::insert(&self.cache, header, self.width, values_root, depth + 1, true, name, &value)?;
            self.write_back_root(header, parent, true, new_values_root)?;
            self.add_backlink(header, target, link_ref)?;
            Ok(link_ref)
        })
    }

    /// Insert `link_ref` into `target`'s back-link entry, creating the
    /// entry (a key node whose values tree enumerates link offsets) if this
    /// is the first link pointing at `target`.
    fn add_backlink(&self, header: &mut LiveHeader, target: NodeRef, link_ref: NodeRef) -> Result<(), HiveError> {
        let key_name = backlink_key_name(target);
        let entry = avl::find(&self.cache, self.width, header.links_root, &key_name)?;
        let entry = match entry {
            Some(e) => e,
            None => {
                let key_value = NodeValue::Key {
                    children_root: 0,
                    values_root: 0,
                    depth: 0,
                };
                let (new_links_root, new_entry) =
                    avl::insert(&self.cache, header, self.width, header.links_root, 0, false, &key_name, &key_value)?;
                header.links_root = new_links_root;
                header.write_into(&self.cache)?;
                new_entry
            }
        };

        let (_, entry_values_root, entry_depth) = self.roots_of(header, entry)?;
        let link_key = backlink_key_name(link_ref);
        let (new_values_root, _) = avl::insert(
            &self.cache,
            header,
            self.width,
            entry_values_root,
            entry_depth + 1,
            true,
            &link_key,
            &NodeValue::Int32(0),
        )?;
        avl::write_key_roots(&self.cache, self.width, entry, 0, new_values_root)
    }

    /// Remove `link_ref` from `target`'s back-link entry. The entry node
    /// itself is left in place even once empty: this store does no page
    /// reclamation, and that applies equally to this secondary index's
    /// own bookkeeping nodes.
    fn remove_backlink(&self, header: &mut LiveHeader, target: NodeRef, link_ref: NodeRef) -> Result<(), HiveError> {
        let key_name = backlink_key_name(target);
        let entry = match avl::find(&self.cache, self.width, header.links_root, &key_name)? {
            Some(e) => e,
            None => return Ok(()),
        };
        let (_, entry_values_root, _) = self.roots_of(header, entry)?;
        let link_key = backlink_key_name(link_ref);
        let new_values_root = avl::delete(&self.cache, self.width, entry_values_root, &link_key)?;
        avl::write_key_roots(&self.cache, self.width, entry, 0, new_values_root)
    }

    /// Does anything link to `target`? Used to enforce delete-protection.
    fn has_backlinks(&self, header: &LiveHeader, target: NodeRef) -> Result<bool, HiveError> {
        let key_name = backlink_key_name(target);
        match avl::find(&self.cache, self.width, header.links_root, &key_name)? {
            None => Ok(false),
            Some(entry) => {
                let (_, values_root, _) = self.roots_of(header, entry)?;
                Ok(values_root != 0)
            }
        }
    }

    // -- update ------------------------------------------------------------

    fn update_value(&self, node: NodeRef, value: NodeValue) -> Result<(), HiveError> {
        self.with_write(|_header| {
            let old_header = avl::read_header(&self.cache, self.width, node)?;
            if old_header.node_type != value.type_tag() as u8 {
                return Err(HiveError::Mismatch(format!(
                    "node {node:#x} cannot change type via update"
                )));
            }
            let name = avl::read_name(&self.cache, self.width, node)?;
            let new_size = crate::storage::node::encoded_size(&name, &value, self.width);

            let page_off = node & !((PAGE_SIZE as u64) - 1);
            let guard = self.cache.get_guarded(page_off, crate::storage::cache::Demand::Existing)?;
            let new_off = if new_size == old_header.size {
                (node & (PAGE_SIZE as u64 - 1)) as usize
            } else {
                crate::storage::alloc::resize_node(guard.as_mut_slice(), self.width, old_header.slot_idx, new_size)?
            };
            let new_header = crate::storage::node::NodeHeader {
                balance_factor: old_header.balance_factor,
                node_type: old_header.node_type,
                size: new_size,
                slot_idx: old_header.slot_idx,
                left: old_header.left,
                right: old_header.right,
            };
            crate::storage::node::encode_node(guard.as_mut_slice(), new_off, self.width, &new_header, &name, &value);
            guard.mark_dirty();
            Ok(())
        })
    }

    pub fn update_string(&self, node: NodeRef, value: &str) -> Result<(), HiveError> {
        self.update_value(node, NodeValue::String(value.to_string()))
    }

    pub fn update_binary(&self, node: NodeRef, value: &[u8]) -> Result<(), HiveError> {
        self.update_value(node, NodeValue::Binary(value.to_vec()))
    }

    pub fn update_int32(&self, node: NodeRef, value: i32) -> Result<(), HiveError> {
        self.update_value(node, NodeValue::Int32(value))
    }

    pub fn update_int64(&self, node: NodeRef, value: i64) -> Result<(), HiveError> {
        self.update_value(node, NodeValue::Int64(value))
    }

    pub fn update_double(&self, node: NodeRef, value: f64) -> Result<(), HiveError> {
        self.update_value(node, NodeValue::Double(value))
    }

    pub fn update_link(&self, node: NodeRef, new_target: NodeRef) -> Result<(), HiveError> {
        self.with_write(|header| {
            let old_target = match avl::read_value(&self.cache, self.width, node)? {
                NodeValue::Link(t) => t,
                _ => return Err(HiveError::Mismatch(format!("node {node:#x} is not a link"))),
            };
            self.remove_backlink(header, old_target, node)?;
            self.add_backlink(header, new_target, node)?;

            let name = avl::read_name(&self.cache, self.width, node)?;
            let page_off = node & !((PAGE_SIZE as u64) - 1);
            let guard = self.cache.get_guarded(page_off, crate::storage::cache::Demand::Existing)?;
            let intra = (node & (PAGE_SIZE as u64 - 1)) as usize;
            let h = crate::storage::node::decode_header(guard.as_slice(), intra, self.width);
            crate::storage::node::encode_node(guard.as_mut_slice(), intra, self.width, &h, &name, &NodeValue::Link(new_target));
            guard.mark_dirty();
            Ok(())
        })
    }

    // -- delete ------------------------------------------------------------

    /// Delete `name` from `parent`'s tree selected by `flags`. Fails with
    /// `InvalidOperation` if the target is a key with any child keys or
    /// values, or if anything still links to it.
    ///
    /// Starts out holding only the database's upgradable-read access to run
    /// lookup and delete-protection validation, so a delete that turns out
    /// to be disallowed never blocked a concurrent reader; only once the
    /// delete is known to proceed does it upgrade to exclusive access.
    pub fn delete(&self, parent: NodeRef, flags: SelectFlags, name: &str) -> Result<(), HiveError> {
        self.check_writable()?;
        let upgradable = self.lock.upgradable();

        let (root, target, target_value) = {
            let header = self.header.lock();
            let root = if flags.contains(SelectFlags::VALUES) {
                self.roots_of(&header, parent)?.1
            } else {
                self.roots_of(&header, parent)?.0
            };
            let target = avl::find(&self.cache, self.width, root, name)?
                .ok_or_else(|| HiveError::NotFound(format!("'{name}' not found")))?;

            let target_value = avl::read_value(&self.cache, self.width, target)?;
            if let NodeValue::Key {
                children_root,
                values_root,
                ..
            } = target_value
            {
                if children_root != 0 || values_root != 0 {
                    return Err(HiveError::InvalidOperation(format!(
                        "key '{name}' has child keys or values"
                    )));
                }
            }
            if self.has_backlinks(&header, target)? {
                return Err(HiveError::InvalidOperation(format!(
                    "'{name}' is the target of one or more links"
                )));
            }
            (root, target, target_value)
        };

        let _write = upgradable.upgrade();
        let mut header = self.header.lock();
        let outcome = (|| -> Result<(), HiveError> {
            let is_link = matches!(target_value, NodeValue::Link(_));
            let link_target = if let NodeValue::Link(t) = target_value { Some(t) } else { None };

            let new_root = avl::delete(&self.cache, self.width, root, name)?;
            self.write_back_root(&mut header, parent, flags.contains(SelectFlags::VALUES), new_root)?;

            if is_link {
                self.remove_backlink(&mut header, link_target.unwrap(), target)?;
            }
            Ok(())
        })();

        match outcome {
            Ok(()) => Ok(()),
            Err(e) => {
                drop(header);
                warn!(error = %e, "write path failed, rolling back");
                self.rollback();
                Err(error::record(e))
            }
        }
    }

    // -- cursor --------------------------------------------------------

    /// A cursor over `parent`'s children or values tree, per `flags`'
    /// `KEYS`/`VALUES` and `ASCENDING`/`DESCENDING` bits.
    pub fn cursor(&self, parent: NodeRef, flags: SelectFlags) -> Result<Cursor, HiveError> {
        self.with_read(|header| {
            let root = self.tree_root(header, parent, flags)?;
            Ok(Cursor::new(root, flags.direction()))
        })
    }

    pub fn cursor_first(&self, cursor: &mut Cursor, start_name: Option<&str>) -> Result<Option<NodeInfo>, HiveError> {
        let _read = self.lock.read();
        cursor.first(&self.cache, self.width, start_name).map_err(error::record)
    }

    pub fn cursor_next(&self, cursor: &mut Cursor) -> Result<Option<NodeInfo>, HiveError> {
        let _read = self.lock.read();
        cursor.next(&self.cache, self.width).map_err(error::record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_new(dir: &tempfile::TempDir) -> Hive {
        let path = dir.path().join("t.hive");
        Hive::open(&path, HiveConfig::default(), OpenFlags::CREATE | OpenFlags::READWRITE).unwrap()
    }

    #[test]
    fn test_empty_create_commit_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.hive");
        {
            let hive = Hive::open(&path, HiveConfig::default(), OpenFlags::CREATE | OpenFlags::READWRITE).unwrap();
            hive.commit(true).unwrap();
        }
        let hive = Hive::open(&path, HiveConfig::default(), OpenFlags::READONLY).unwrap();
        let mut cursor = hive.cursor(0, SelectFlags::KEYS | SelectFlags::ASCENDING).unwrap();
        assert!(hive.cursor_first(&mut cursor, None).unwrap().is_none());
        assert_eq!(std::fs::metadata(&path).unwrap().len(), PAGE_SIZE as u64);
    }

    #[test]
    fn test_single_key_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.hive");
        {
            let hive = Hive::open(&path, HiveConfig::default(), OpenFlags::CREATE | OpenFlags::READWRITE).unwrap();
            let a = hive.create_key(0, "a").unwrap();
            hive.create_int32(a, "x", 7).unwrap();
            hive.commit(true).unwrap();
        }
        let hive = Hive::open(&path, HiveConfig::default(), OpenFlags::READONLY).unwrap();
        let a = hive.find(0, "a", SelectFlags::KEYS).unwrap().unwrap();
        let x = hive.find(a, "x", SelectFlags::VALUES).unwrap().unwrap();
        assert_eq!(hive.get_int32(x).unwrap(), 7);
    }

    #[test]
    fn test_avl_stress_insertion() {
        let dir = tempdir().unwrap();
        let hive = open_new(&dir);
        let mut perm: Vec<u32> = (0..1000).collect();
        // deterministic pseudo-shuffle, no RNG needed for a stable test
        for i in (1..perm.len()).rev() {
            let j = (i * 2654435761u32.wrapping_add(i as u32) as usize) % (i + 1);
            perm.swap(i, j);
        }
        for (count, &n) in perm.iter().enumerate() {
            hive.create_key(0, &n.to_string()).unwrap();
            if (count + 1) % 100 == 0 {
                let mut cursor = hive.cursor(0, SelectFlags::KEYS | SelectFlags::ASCENDING).unwrap();
                let mut prev: Option<String> = None;
                let mut seen = 0;
                let mut cur = hive.cursor_first(&mut cursor, None).unwrap();
                while let Some(info) = cur {
                    if let Some(p) = &prev {
                        assert!(p.as_str() < info.name.as_str());
                    }
                    prev = Some(info.name.clone());
                    seen += 1;
                    cur = hive.cursor_next(&mut cursor).unwrap();
                }
                assert_eq!(seen, count + 1);
            }
        }
        let mut cursor = hive.cursor(0, SelectFlags::KEYS | SelectFlags::ASCENDING).unwrap();
        let mut names = vec![];
        let mut cur = hive.cursor_first(&mut cursor, None).unwrap();
        while let Some(info) = cur {
            names.push(info.name);
            cur = hive.cursor_next(&mut cursor).unwrap();
        }
        let mut expected: Vec<String> = perm.iter().map(|n| n.to_string()).collect();
        expected.sort();
        assert_eq!(names, expected);
    }

    #[test]
    fn test_delete_protection_for_non_empty_key() {
        let dir = tempdir().unwrap();
        let hive = open_new(&dir);
        let p = hive.create_key(0, "p").unwrap();
        hive.create_key(p, "c").unwrap();
        let err = hive.delete(0, SelectFlags::KEYS, "p").unwrap_err();
        assert!(matches!(err, HiveError::InvalidOperation(_)));
        hive.delete(p, SelectFlags::KEYS, "c").unwrap();
        hive.delete(0, SelectFlags::KEYS, "p").unwrap();
    }

    #[test]
    fn test_link_round_trip_and_protection() {
        let dir = tempdir().unwrap();
        let hive = open_new(&dir);
        let target = hive.create_key(0, "target").unwrap();
        let holder = hive.create_key(0, "holder").unwrap();
        let link_ref = hive.create_link(holder, "ref", target).unwrap();

        assert_eq!(hive.get_link(link_ref).unwrap(), target);

        let err = hive.delete(0, SelectFlags::KEYS, "target").unwrap_err();
        assert!(matches!(err, HiveError::InvalidOperation(_)));

        hive.delete(holder, SelectFlags::VALUES, "ref").unwrap();
        hive.delete(0, SelectFlags::KEYS, "target").unwrap();
    }

    #[test]
    fn test_rollback_after_eviction_failure_leaves_last_commit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.hive");
        let mut config = HiveConfig::default();
        config.cache_kb = 64;
        config.cache_row_items = 64;
        config.autosave = false;
        let hive = Hive::open(&path, config, OpenFlags::CREATE | OpenFlags::READWRITE).unwrap();
        hive.create_key(0, "seed").unwrap();
        hive.commit(true).unwrap();

        let mut failed = false;
        for i in 0..200 {
            if hive.create_key(0, &format!("k{i}")).is_err() {
                failed = true;
                break;
            }
        }
        assert!(failed, "expected eviction to eventually abort with autosave off");

        let found = hive.find(0, "seed", SelectFlags::KEYS).unwrap();
        assert!(found.is_some());
    }

    #[test]
    fn test_create_string_boundary_lengths() {
        let dir = tempdir().unwrap();
        let hive = open_new(&dir);
        let k = hive.create_key(0, "k").unwrap();
        hive.create_string(k, "s1", &"a".repeat(249)).unwrap();
        let err = hive.create_string(k, "s2", &"a".repeat(250)).unwrap_err();
        assert!(matches!(err, HiveError::Param(_)));
    }

    #[test]
    fn test_update_string_changes_size() {
        let dir = tempdir().unwrap();
        let hive = open_new(&dir);
        let k = hive.create_key(0, "k").unwrap();
        let n = hive.create_string(k, "s", "short").unwrap();
        hive.update_string(n, "a rather longer string value").unwrap();
        assert_eq!(hive.get_string(n).unwrap(), "a rather longer string value");
        hive.update_string(n, "tiny").unwrap();
        assert_eq!(hive.get_string(n).unwrap(), "tiny");
    }

    #[test]
    fn test_key_name_too_long_rejected() {
        let dir = tempdir().unwrap();
        let hive = open_new(&dir);
        let err = hive.create_key(0, &"a".repeat(241)).unwrap_err();
        assert!(matches!(err, HiveError::Param(_)));
    }

    #[test]
    fn test_implicit_root_rejects_direct_values() {
        let dir = tempdir().unwrap();
        let hive = open_new(&dir);
        let err = hive.create_int32(0, "v", 1).unwrap_err();
        assert!(matches!(err, HiveError::InvalidOperation(_)));
    }
}
