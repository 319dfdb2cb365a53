// End-to-end tests against the public Hive surface, exercised as an
// out-of-process consumer would: only through src/lib.rs re-exports,
// one on-disk file per test via tempfile, no access to storage internals.

use regstore::storage::{HiveConfig, HiveError, NodeType, OffsetWidth, SelectFlags};
use regstore::{Hive, OpenFlags};
use tempfile::tempdir;

fn open_new(dir: &tempfile::TempDir, name: &str, config: HiveConfig) -> Hive {
    let path = dir.path().join(name);
    Hive::open(&path, config, OpenFlags::CREATE | OpenFlags::READWRITE).unwrap()
}

#[test]
fn full_value_round_trip_across_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("roundtrip.hive");
    {
        let hive = Hive::open(&path, HiveConfig::default(), OpenFlags::CREATE | OpenFlags::READWRITE).unwrap();
        let users = hive.create_key(0, "users").unwrap();
        let alice = hive.create_key(users, "alice").unwrap();
        hive.create_string(alice, "email", "alice@example.com").unwrap();
        hive.create_int32(alice, "age", 34).unwrap();
        hive.create_int64(alice, "id", 9_000_000_001).unwrap();
        hive.create_double(alice, "balance", 12.5).unwrap();
        hive.create_binary(alice, "avatar", &[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();
        let admins = hive.create_key(0, "admins").unwrap();
        hive.create_link(admins, "alice", alice).unwrap();
        hive.commit(true).unwrap();
    }

    let hive = Hive::open(&path, HiveConfig::default(), OpenFlags::READONLY).unwrap();
    let users = hive.find(0, "users", SelectFlags::KEYS).unwrap().unwrap();
    let alice = hive.find(users, "alice", SelectFlags::KEYS).unwrap().unwrap();
    let email = hive.find(alice, "email", SelectFlags::VALUES).unwrap().unwrap();
    assert_eq!(hive.get_string(email).unwrap(), "alice@example.com");
    let age = hive.find(alice, "age", SelectFlags::VALUES).unwrap().unwrap();
    assert_eq!(hive.get_int32(age).unwrap(), 34);
    let id = hive.find(alice, "id", SelectFlags::VALUES).unwrap().unwrap();
    assert_eq!(hive.get_int64(id).unwrap(), 9_000_000_001);
    let balance = hive.find(alice, "balance", SelectFlags::VALUES).unwrap().unwrap();
    assert_eq!(hive.get_double(balance).unwrap(), 12.5);
    let avatar = hive.find(alice, "avatar", SelectFlags::VALUES).unwrap().unwrap();
    assert_eq!(hive.get_binary(avatar).unwrap(), vec![0xDE, 0xAD, 0xBE, 0xEF]);

    let admins = hive.find(0, "admins", SelectFlags::KEYS).unwrap().unwrap();
    let admin_link = hive.find(admins, "alice", SelectFlags::VALUES).unwrap().unwrap();
    assert_eq!(hive.get_type(admin_link).unwrap(), NodeType::Link);
    assert_eq!(hive.get_link(admin_link).unwrap(), alice);
}

#[test]
fn offset32_width_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("narrow.hive");
    let mut config = HiveConfig::default();
    config.offset_width = OffsetWidth::Offset32;
    {
        let hive = Hive::open(&path, config.clone(), OpenFlags::CREATE | OpenFlags::READWRITE).unwrap();
        let numbers = hive.create_key(0, "numbers").unwrap();
        for i in 0..200 {
            hive.create_int32(numbers, &format!("n{i}"), i).unwrap();
        }
        hive.commit(true).unwrap();
    }
    let hive = Hive::open(&path, config, OpenFlags::READONLY).unwrap();
    let numbers = hive.find(0, "numbers", SelectFlags::KEYS).unwrap().unwrap();
    for i in 0..200 {
        let node = hive.find(numbers, &format!("n{i}"), SelectFlags::VALUES).unwrap().unwrap();
        assert_eq!(hive.get_int32(node).unwrap(), i);
    }
}

#[test]
fn descending_cursor_visits_values_in_reverse() {
    let dir = tempdir().unwrap();
    let hive = open_new(&dir, "desc.hive", HiveConfig::default());
    for name in ["bravo", "alpha", "charlie", "delta"] {
        hive.create_key(0, name).unwrap();
    }

    let mut cursor = hive.cursor(0, SelectFlags::KEYS | SelectFlags::DESCENDING).unwrap();
    let mut names = vec![];
    let mut cur = hive.cursor_first(&mut cursor, None).unwrap();
    while let Some(info) = cur {
        names.push(info.name);
        cur = hive.cursor_next(&mut cursor).unwrap();
    }
    assert_eq!(names, vec!["delta", "charlie", "bravo", "alpha"]);
}

#[test]
fn cursor_seek_starts_at_given_name() {
    let dir = tempdir().unwrap();
    let hive = open_new(&dir, "seek.hive", HiveConfig::default());
    for name in ["a", "b", "c", "d", "e"] {
        hive.create_key(0, name).unwrap();
    }

    let mut cursor = hive.cursor(0, SelectFlags::KEYS | SelectFlags::ASCENDING).unwrap();
    let mut names = vec![];
    let mut cur = hive.cursor_first(&mut cursor, Some("c")).unwrap();
    while let Some(info) = cur {
        names.push(info.name);
        cur = hive.cursor_next(&mut cursor).unwrap();
    }
    assert_eq!(names, vec!["c", "d", "e"]);
}

#[test]
fn repeated_open_commit_close_cycles_preserve_state() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cycles.hive");

    for batch in 0..5 {
        let hive = Hive::open(&path, HiveConfig::default(), OpenFlags::CREATE | OpenFlags::READWRITE).unwrap();
        let data = match hive.find(0, "data", SelectFlags::KEYS).unwrap() {
            Some(k) => k,
            None => hive.create_key(0, "data").unwrap(),
        };
        for i in 0..20 {
            hive.create_int32(data, &format!("b{batch}_{i}"), batch * 100 + i).unwrap();
        }
        hive.commit(true).unwrap();
    }

    let hive = Hive::open(&path, HiveConfig::default(), OpenFlags::READONLY).unwrap();
    let data = hive.find(0, "data", SelectFlags::KEYS).unwrap().unwrap();
    for batch in 0..5 {
        for i in 0..20 {
            let node = hive
                .find(data, &format!("b{batch}_{i}"), SelectFlags::VALUES)
                .unwrap()
                .unwrap();
            assert_eq!(hive.get_int32(node).unwrap(), batch * 100 + i);
        }
    }
}

#[test]
fn update_value_in_place_changes_payload_and_type_stays() {
    let dir = tempdir().unwrap();
    let hive = open_new(&dir, "update.hive", HiveConfig::default());
    let k = hive.create_key(0, "k").unwrap();
    let n = hive.create_binary(k, "blob", &[1, 2, 3]).unwrap();
    hive.update_binary(n, &[9, 9, 9, 9, 9, 9, 9, 9]).unwrap();
    assert_eq!(hive.get_binary(n).unwrap(), vec![9, 9, 9, 9, 9, 9, 9, 9]);
    assert_eq!(hive.get_type(n).unwrap(), NodeType::Binary);
}

#[test]
fn find_missing_name_returns_none_not_error() {
    let dir = tempdir().unwrap();
    let hive = open_new(&dir, "missing.hive", HiveConfig::default());
    assert!(hive.find(0, "nope", SelectFlags::KEYS).unwrap().is_none());
    assert!(hive.find(0, "nope", SelectFlags::VALUES).unwrap().is_none());
}

#[test]
fn deleting_missing_value_is_not_found() {
    let dir = tempdir().unwrap();
    let hive = open_new(&dir, "del_missing.hive", HiveConfig::default());
    let err = hive.delete(0, SelectFlags::VALUES, "absent").unwrap_err();
    assert!(matches!(err, HiveError::NotFound(_)));
}

#[test]
fn reading_wrong_accessor_is_mismatch() {
    let dir = tempdir().unwrap();
    let hive = open_new(&dir, "mismatch.hive", HiveConfig::default());
    let k = hive.create_key(0, "k").unwrap();
    let n = hive.create_int32(k, "n", 1).unwrap();
    let err = hive.get_string(n).unwrap_err();
    assert!(matches!(err, HiveError::Mismatch(_)));
}

#[test]
fn readonly_open_rejects_writes() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ro.hive");
    {
        let hive = Hive::open(&path, HiveConfig::default(), OpenFlags::CREATE | OpenFlags::READWRITE).unwrap();
        hive.create_key(0, "seed").unwrap();
        hive.commit(true).unwrap();
    }
    let hive = Hive::open(&path, HiveConfig::default(), OpenFlags::READONLY).unwrap();
    let err = hive.create_key(0, "new").unwrap_err();
    assert!(matches!(err, HiveError::InvalidOperation(_)));
}

// AUTOSAVE only changes what eviction does with a dirty frame it must
// reclaim: write it through synchronously instead of aborting. It has no
// bearing on a header that was never explicitly committed — unlike
// `test_rollback_after_eviction_failure_leaves_last_commit`, which forces
// the same small-cache eviction pressure with AUTOSAVE off and expects an
// eventual ABORT, this expects every insert to succeed.
#[test]
fn autosave_survives_eviction_pressure_that_would_otherwise_abort() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("autosave.hive");
    let mut config = HiveConfig::default();
    config.cache_kb = 64;
    config.cache_row_items = 64;
    config.autosave = true;
    let hive = Hive::open(&path, config, OpenFlags::CREATE | OpenFlags::READWRITE).unwrap();
    hive.create_key(0, "seed").unwrap();
    hive.commit(true).unwrap();

    for i in 0..200 {
        hive.create_key(0, &format!("k{i}")).unwrap();
    }

    let found = hive.find(0, "seed", SelectFlags::KEYS).unwrap();
    assert!(found.is_some());
}

#[test]
fn close_without_explicit_commit_still_persists_writes() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("close.hive");
    {
        let hive = Hive::open(&path, HiveConfig::default(), OpenFlags::CREATE | OpenFlags::READWRITE).unwrap();
        hive.create_key(0, "settled").unwrap();
        hive.close().unwrap();
    }
    let hive = Hive::open(&path, HiveConfig::default(), OpenFlags::READONLY).unwrap();
    assert!(hive.find(0, "settled", SelectFlags::KEYS).unwrap().is_some());
}

#[test]
fn many_concurrent_readers_see_consistent_snapshot() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("concurrent.hive");
    {
        let hive = Hive::open(&path, HiveConfig::default(), OpenFlags::CREATE | OpenFlags::READWRITE).unwrap();
        let numbers = hive.create_key(0, "numbers").unwrap();
        for i in 0..256 {
            hive.create_int32(numbers, &format!("k{i}"), i).unwrap();
        }
        hive.commit(true).unwrap();
    }

    let hive = std::sync::Arc::new(Hive::open(&path, HiveConfig::default(), OpenFlags::READONLY).unwrap());
    let numbers = hive.find(0, "numbers", SelectFlags::KEYS).unwrap().unwrap();
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let hive = hive.clone();
            std::thread::spawn(move || {
                for i in 0..256 {
                    let node = hive.find(numbers, &format!("k{i}"), SelectFlags::VALUES).unwrap().unwrap();
                    assert_eq!(hive.get_int32(node).unwrap(), i);
                }
                t
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
}
