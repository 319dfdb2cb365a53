// Database-wide concurrency manager: a single upgradable reader/writer
// lock guarding every operation on a `Hive`, giving a single-writer,
// many-reader model at the database level. Built on `parking_lot` rather
// than `std::sync` for the upgradable-read guard it needs; per-page
// serialization is already handled one level down, inside each cache row,
// so this lock only needs to be coarse.

use parking_lot::{RwLock, RwLockReadGuard, RwLockUpgradableReadGuard, RwLockWriteGuard};

/// Guards every read operation (`find`, `get_*`, cursor walks): any number
/// of these may be held concurrently, but none may be held across a
/// `commit` or a mutating call.
pub struct ReadAccess<'a>(RwLockReadGuard<'a, ()>);

/// Guards a mutating operation (`create_*`, `update_*`, `delete`,
/// `commit`). Only one writer is ever live at a time.
pub struct WriteAccess<'a>(RwLockWriteGuard<'a, ()>);

/// Guards `delete`'s fast path: it starts out only needing to read the
/// tree to check delete-protection invariants, then upgrades to exclusive
/// only once it knows the delete will actually proceed, so a delete that
/// turns out to be disallowed never blocks a concurrent reader.
pub struct UpgradableAccess<'a>(Option<RwLockUpgradableReadGuard<'a, ()>>);

impl<'a> UpgradableAccess<'a> {
    pub fn upgrade(mut self) -> WriteAccess<'a> {
        let guard = self.0.take().expect("upgrade() called twice");
        WriteAccess(RwLockUpgradableReadGuard::upgrade(guard))
    }
}

/// The lock itself. One instance per open `Hive`; holds no state of its
/// own beyond the lock — all actual data lives behind the pages it guards.
pub struct ConcurrencyManager {
    lock: RwLock<()>,
}

impl ConcurrencyManager {
    pub fn new() -> Self {
        Self { lock: RwLock::new(()) }
    }

    pub fn read(&self) -> ReadAccess<'_> {
        ReadAccess(self.lock.read())
    }

    pub fn write(&self) -> WriteAccess<'_> {
        WriteAccess(self.lock.write())
    }

    pub fn upgradable(&self) -> UpgradableAccess<'_> {
        UpgradableAccess(Some(self.lock.upgradable_read()))
    }
}

impl Default for ConcurrencyManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_multiple_readers_allowed_concurrently() {
        let mgr = Arc::new(ConcurrencyManager::new());
        let r1 = mgr.read();
        let r2 = mgr.read();
        drop(r1);
        drop(r2);
    }

    #[test]
    fn test_writer_excludes_other_writers() {
        let mgr = Arc::new(ConcurrencyManager::new());
        let mgr2 = mgr.clone();
        let w = mgr.write();
        let handle = thread::spawn(move || {
            let _w2 = mgr2.write();
        });
        thread::sleep(std::time::Duration::from_millis(20));
        drop(w);
        handle.join().unwrap();
    }

    #[test]
    fn test_upgradable_becomes_write_access() {
        let mgr = ConcurrencyManager::new();
        let up = mgr.upgradable();
        let _w = up.upgrade();
    }
}
