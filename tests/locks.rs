use gongdb_exec::lock::TableLockGuard;
use gongdb_exec::{Error, LockManager, TableLocks};

#[test]
fn shared_locks_are_reentrant_and_counted() {
    let locks = LockManager::new();
    locks.acquire_shared(1, "city").unwrap();
    locks.acquire_shared(1, "CITY").unwrap();
    locks.acquire_shared(2, "city").unwrap();

    locks.release_shared(1, "city").unwrap();
    assert!(locks.assert_no_locks(1).is_err());
    locks.release_shared(1, "city").unwrap();
    locks.assert_no_locks(1).unwrap();

    assert!(locks.release_shared(1, "city").unwrap_err().is_internal());
    locks.release_shared(2, "city").unwrap();
    locks.assert_no_locks(2).unwrap();
}

#[test]
fn writers_and_readers_exclude_each_other() {
    let locks = LockManager::new();
    locks.acquire_shared(1, "city").unwrap();
    assert_eq!(
        locks.acquire_exclusive(2, "city"),
        Err(Error::Locked("city".to_string()))
    );

    locks.release_shared(1, "city").unwrap();
    locks.acquire_exclusive(2, "city").unwrap();
    assert!(matches!(
        locks.acquire_shared(1, "city"),
        Err(Error::Locked(_))
    ));
    // The writer may still read its own table.
    locks.acquire_shared(2, "city").unwrap();
    locks.release_shared(2, "city").unwrap();
    locks.release_exclusive(2, "city").unwrap();
    locks.assert_no_locks(2).unwrap();
}

#[test]
fn guard_releases_on_drop() {
    let locks = LockManager::new();
    {
        let guard = TableLockGuard::acquire(&locks, 7, ["city", "country"]).unwrap();
        assert_eq!(guard.tables(), ["city", "country"]);
        assert!(locks.assert_no_locks(7).is_err());
    }
    locks.assert_no_locks(7).unwrap();
}

#[test]
fn failed_guard_acquisition_releases_what_it_took() {
    let locks = LockManager::new();
    locks.acquire_exclusive(1, "country").unwrap();

    let err = TableLockGuard::acquire(&locks, 2, ["city", "country"])
        .err()
        .unwrap();
    assert_eq!(err, Error::Locked("country".to_string()));
    locks.assert_no_locks(2).unwrap();
}

#[test]
fn release_all_clears_a_session() {
    let locks = LockManager::new();
    locks.acquire_shared(3, "city").unwrap();
    locks.acquire_exclusive(3, "country").unwrap();
    locks.release_all(3);
    locks.assert_no_locks(3).unwrap();
}
