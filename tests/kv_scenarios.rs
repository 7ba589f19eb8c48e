/// End-to-end behaviour of the key-value functions against the in-process engine.
use std::collections::BTreeSet;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use pgkv::engine::LockMode;
use pgkv::kv::store_relation_oid;
use pgkv::{Backend, Datum, Engine, EngineConfig, Host, IsolationLevel, KvError, extension};
use tempfile::TempDir;

fn installed(config: EngineConfig) -> (Engine, Backend) {
    let engine = Engine::with_config(config);
    let backend = engine.connect();
    extension::install(&backend).unwrap();
    (engine, backend)
}

fn store() -> (Engine, Backend) {
    installed(EngineConfig::default())
}

fn set(b: &Backend, key: &str, value: &str) -> Result<(), KvError> {
    b.execute(|h| pgkv::set(h, Some(&key.into()), Some(&value.into())))
}

fn get(b: &Backend, key: &str) -> Result<String, KvError> {
    b.execute(|h| pgkv::get(h, Some(&key.into())))
        .map(|d| d.to_text().into_owned())
}

fn del(b: &Backend, key: &str) -> Result<(), KvError> {
    b.execute(|h| pgkv::del(h, Some(&key.into())))
}

fn list(b: &Backend, prefix: Option<&str>) -> Result<String, KvError> {
    let prefix = prefix.map(Datum::from);
    b.execute(|h| pgkv::list(h, prefix.as_ref()))
        .map(|d| d.to_text().into_owned())
}

/// Entries of a `list` result, ignoring order.
fn entries(listing: &str) -> BTreeSet<String> {
    assert!(listing.starts_with('[') && listing.ends_with(']'), "{listing}");
    let inner = &listing[1..listing.len() - 1];
    if inner.is_empty() {
        return BTreeSet::new();
    }
    inner.split(", ").map(str::to_string).collect()
}

fn assert_released(b: &Backend) {
    assert!(b.held_locks().is_empty(), "locks held: {:?}", b.held_locks());
    assert_eq!(b.open_scans(), 0);
}

// ── Scenarios ───────────────────────────────────────────────────────

#[test]
fn set_then_get() {
    let (_engine, b) = store();
    set(&b, "a", "1").unwrap();
    assert_eq!(get(&b, "a").unwrap(), "1");
}

#[test]
fn second_set_of_same_key_fails_and_keeps_first_value() {
    let (_engine, b) = store();
    set(&b, "a", "1").unwrap();
    let err = set(&b, "a", "2").unwrap_err();
    assert!(err.is_duplicate_key());
    assert_eq!(err.error_code(), "23505");
    assert_eq!(err.to_string(), "duplicate key value violates unique constraint \"store_pkey\"");
    assert_eq!(get(&b, "a").unwrap(), "1");
}

#[test]
fn get_after_del_is_not_found() {
    let (_engine, b) = store();
    set(&b, "a", "1").unwrap();
    del(&b, "a").unwrap();
    let err = get(&b, "a").unwrap_err();
    assert!(matches!(err, KvError::NotFound(_)));
    assert_eq!(err.to_string(), "key does not exist");
}

#[test]
fn list_by_prefix() {
    let (_engine, b) = store();
    set(&b, "name.1", "Julia").unwrap();
    // Sorts after the prefix, sits between matching rows in the heap.
    set(&b, "zebra", "z").unwrap();
    set(&b, "name.2", "Rex").unwrap();
    set(&b, "age.1", "9").unwrap();

    let out = list(&b, Some("name.")).unwrap();
    assert_eq!(
        entries(&out),
        BTreeSet::from(["name.1 = Julia".to_string(), "name.2 = Rex".to_string()])
    );
    assert!(!out.contains("age.1"));
    assert!(!out.contains("zebra"));
}

#[test]
fn list_of_empty_store() {
    let (_engine, b) = store();
    assert_eq!(list(&b, Some("")).unwrap(), "[]");
}

#[test]
fn del_of_missing_key() {
    let (_engine, b) = store();
    let err = del(&b, "missing").unwrap_err();
    assert!(matches!(err, KvError::NotFound(_)));
    assert_eq!(err.error_code(), "P0002");
}

// ── Invariants ──────────────────────────────────────────────────────

#[test]
fn set_is_visible_to_get_later_in_the_same_transaction() {
    let (_engine, b) = store();
    b.begin();
    set(&b, "a", "1").unwrap();
    assert_eq!(get(&b, "a").unwrap(), "1");
    del(&b, "a").unwrap();
    assert!(matches!(get(&b, "a"), Err(KvError::NotFound(_))));
    b.commit().unwrap();
}

#[test]
fn list_contains_exactly_the_prefixed_keys() {
    let (_engine, b) = store();
    let keys = ["a", "ab", "abc", "abd", "b", "ba", "", "a\u{e9}", "Z"];
    for (i, k) in keys.iter().enumerate() {
        set(&b, k, &i.to_string()).unwrap();
    }
    for prefix in ["", "a", "ab", "abc", "b", "x", "Z", "a\u{e9}"] {
        let listed: BTreeSet<String> = entries(&list(&b, Some(prefix)).unwrap())
            .into_iter()
            .map(|e| e.split(" = ").next().unwrap_or_default().to_string())
            .collect();
        let expected: BTreeSet<String> = keys
            .iter()
            .filter(|k| k.starts_with(prefix))
            .map(|k| k.to_string())
            .collect();
        assert_eq!(listed, expected, "prefix {prefix:?}");
    }
}

#[test]
fn null_prefix_lists_like_empty_prefix() {
    let (_engine, b) = store();
    set(&b, "x", "1").unwrap();
    set(&b, "y", "2").unwrap();
    assert_eq!(list(&b, None).unwrap(), list(&b, Some("")).unwrap());
}

#[test]
fn null_arguments_do_not_mutate() {
    let (_engine, b) = store();
    set(&b, "a", "1").unwrap();
    let before = list(&b, None).unwrap();

    let v = Datum::from("v");
    for err in [
        b.execute(|h| pgkv::set(h, None, Some(&v))).unwrap_err(),
        b.execute(|h| pgkv::set(h, Some(&v), None)).unwrap_err(),
        b.execute(|h| pgkv::get(h, None)).map(|_| ()).unwrap_err(),
        b.execute(|h| pgkv::del(h, None)).unwrap_err(),
    ] {
        assert!(matches!(err, KvError::InvalidArgument(_)), "{err}");
        assert_eq!(err.error_code(), "22004");
    }
    assert_eq!(list(&b, None).unwrap(), before);
}

#[test]
fn failures_release_relation_and_scans() {
    let (_engine, b) = store();
    set(&b, "a", "1").unwrap();
    // Inside a transaction block locks are not swept by commit, so any leak
    // would still be visible after each failure.
    b.begin();
    assert!(get(&b, "nope").is_err());
    assert_released(&b);
    b.rollback();

    b.begin();
    assert!(set(&b, "a", "2").is_err());
    assert_released(&b);
    b.rollback();

    b.begin();
    assert!(del(&b, "nope").is_err());
    assert_released(&b);
    b.rollback();
}

#[test]
fn failed_statement_aborts_the_transaction_block() {
    let (_engine, b) = store();
    b.begin();
    set(&b, "a", "1").unwrap();
    assert!(set(&b, "a", "2").is_err());
    let err = get(&b, "a").unwrap_err();
    assert_eq!(err.error_code(), "25P02");
    // Commit of an aborted block rolls back.
    b.commit().unwrap();
    assert!(matches!(get(&b, "a"), Err(KvError::NotFound(_))));
}

// ── Configuration ───────────────────────────────────────────────────

#[test]
fn operations_fail_when_not_installed() {
    let engine = Engine::in_memory();
    let b = engine.connect();
    for err in [
        set(&b, "a", "1").unwrap_err(),
        get(&b, "a").unwrap_err(),
        del(&b, "a").unwrap_err(),
        list(&b, None).unwrap_err(),
    ] {
        assert!(matches!(err, KvError::Configuration(_)), "{err}");
    }
}

#[test]
fn table_can_be_dropped_and_recreated() {
    let (_engine, b) = store();
    set(&b, "a", "1").unwrap();
    let first = b.execute(|h| store_relation_oid(h)).unwrap();
    extension::uninstall(&b).unwrap();
    assert!(matches!(get(&b, "a"), Err(KvError::Configuration(_))));

    extension::install(&b).unwrap();
    let second = b.execute(|h| store_relation_oid(h)).unwrap();
    assert_ne!(first, second);
    assert!(matches!(get(&b, "a"), Err(KvError::NotFound(_))));
    set(&b, "a", "2").unwrap();
    assert_eq!(get(&b, "a").unwrap(), "2");
}

#[test]
fn call_checks_argument_count() {
    let (_engine, b) = store();
    let err = b
        .execute(|h| extension::call(h, "pgkv.get", &[]))
        .unwrap_err();
    assert!(matches!(err, KvError::UndefinedFunction(_)));
    let out = b
        .execute(|h| extension::call(h, "pgkv.list", &[Some("".into())]))
        .unwrap();
    assert_eq!(out, Some(Datum::from("[]")));
}

// ── Concurrency ─────────────────────────────────────────────────────

#[test]
fn uncommitted_set_is_invisible_to_other_sessions() {
    let (engine, a) = store();
    let b = engine.connect();
    a.begin();
    set(&a, "k", "v").unwrap();
    assert!(matches!(get(&b, "k"), Err(KvError::NotFound(_))));
    assert_eq!(list(&b, None).unwrap(), "[]");
    a.commit().unwrap();
    assert_eq!(get(&b, "k").unwrap(), "v");
}

#[test]
fn concurrent_set_of_same_key_waits_then_fails() {
    let (engine, a) = store();
    a.begin();
    set(&a, "k", "1").unwrap();

    let writer = {
        let engine = engine.clone();
        thread::spawn(move || {
            let b = engine.connect();
            set(&b, "k", "2")
        })
    };
    thread::sleep(Duration::from_millis(50));
    a.commit().unwrap();

    let err = writer.join().unwrap().unwrap_err();
    assert!(err.is_duplicate_key());
    assert_eq!(get(&a, "k").unwrap(), "1");
}

#[test]
fn concurrent_set_succeeds_when_first_writer_rolls_back() {
    let (engine, a) = store();
    a.begin();
    set(&a, "k", "1").unwrap();

    let writer = {
        let engine = engine.clone();
        thread::spawn(move || {
            let b = engine.connect();
            set(&b, "k", "2")
        })
    };
    thread::sleep(Duration::from_millis(50));
    a.rollback();

    writer.join().unwrap().unwrap();
    assert_eq!(get(&a, "k").unwrap(), "2");
}

#[test]
fn concurrent_del_of_same_key() {
    let (engine, a) = store();
    set(&a, "k", "1").unwrap();
    a.begin();
    del(&a, "k").unwrap();

    let deleter = {
        let engine = engine.clone();
        thread::spawn(move || {
            let b = engine.connect();
            del(&b, "k")
        })
    };
    thread::sleep(Duration::from_millis(50));
    a.commit().unwrap();

    let err = deleter.join().unwrap().unwrap_err();
    assert_eq!(err.error_code(), "40001");
}

#[test]
fn writers_on_different_keys_do_not_block() {
    let (engine, _a) = store();
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let engine = engine.clone();
            thread::spawn(move || {
                let b = engine.connect();
                for i in 0..25 {
                    set(&b, &format!("t{t}.{i}"), "x").unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    let b = engine.connect();
    assert_eq!(entries(&list(&b, None).unwrap()).len(), 100);
    assert_eq!(entries(&list(&b, Some("t2.")).unwrap()).len(), 25);
}

#[test]
fn crossed_sets_are_broken_by_deadlock_detection() {
    let (engine, a) = store();
    a.begin();
    set(&a, "x", "a").unwrap();

    let (ready, wait_ready) = mpsc::channel();
    let other = {
        let engine = engine.clone();
        thread::spawn(move || {
            let b = engine.connect();
            b.begin();
            set(&b, "y", "b").unwrap();
            ready.send(()).unwrap();
            // Blocks on a's uncommitted "x".
            let result = set(&b, "x", "b");
            if result.is_ok() {
                b.commit().unwrap();
            } else {
                b.rollback();
            }
            result
        })
    };
    wait_ready.recv().unwrap();
    thread::sleep(Duration::from_millis(30));

    // Blocks on b's uncommitted "y"; one side must give up.
    let mine = set(&a, "y", "a");
    if mine.is_ok() {
        a.commit().unwrap();
    } else {
        a.rollback();
    }
    let theirs = other.join().unwrap();

    let outcomes = [&mine, &theirs];
    let deadlocked: Vec<_> = outcomes
        .iter()
        .filter_map(|r| r.as_ref().err())
        .collect();
    assert_eq!(deadlocked.len(), 1, "{outcomes:?}");
    assert_eq!(deadlocked[0].error_code(), "40P01");
    assert!(deadlocked[0].to_string().starts_with("deadlock detected"));
    assert_released(&a);

    // The survivor's writes are the only ones left.
    let c = engine.connect();
    let winner = if mine.is_ok() { "a" } else { "b" };
    assert_eq!(get(&c, "x").unwrap(), winner);
    assert_eq!(get(&c, "y").unwrap(), winner);
}

#[test]
fn repeatable_read_sees_one_snapshot_per_transaction() {
    let (engine, a) = installed(EngineConfig {
        isolation: IsolationLevel::RepeatableRead,
        ..Default::default()
    });
    let b = engine.connect();
    a.begin();
    assert_eq!(list(&a, None).unwrap(), "[]");
    set(&b, "k", "v").unwrap();
    assert_eq!(list(&a, None).unwrap(), "[]");
    a.commit().unwrap();
    assert_eq!(list(&a, None).unwrap(), "[k = v]");
}

#[test]
fn uninstall_times_out_while_store_is_open() {
    let (engine, a) = installed(EngineConfig {
        lock_timeout: Some(Duration::from_millis(50)),
        ..Default::default()
    });
    let b = engine.connect();
    let result = a
        .execute(|h| {
            let relid = store_relation_oid(h)?;
            let rel = h.open_relation(relid, LockMode::AccessShare)?;
            let result = extension::uninstall(&b);
            h.close_relation(rel, LockMode::AccessShare);
            Ok::<_, KvError>(result)
        })
        .unwrap();
    let err = result.unwrap_err();
    assert_eq!(err.error_code(), "55P03");
    // Nothing was dropped.
    assert_eq!(list(&a, None).unwrap(), "[]");
    assert_released(&b);
}

#[test]
fn cancel_interrupts_a_waiting_set() {
    let (engine, a) = store();
    a.begin();
    set(&a, "k", "1").unwrap();

    let b = engine.connect();
    let cancel = b.cancel_handle();
    let (tx, rx) = mpsc::channel();
    let writer = thread::spawn(move || {
        tx.send(()).unwrap();
        set(&b, "k", "2")
    });
    rx.recv().unwrap();
    thread::sleep(Duration::from_millis(30));
    cancel.cancel();

    let err = writer.join().unwrap().unwrap_err();
    assert_eq!(err.error_code(), "57014");
    a.commit().unwrap();
    assert_eq!(get(&a, "k").unwrap(), "1");
}

// ── Durability ──────────────────────────────────────────────────────

#[test]
fn committed_rows_survive_reopen() {
    let tmp = TempDir::new().unwrap();
    let config = EngineConfig {
        db_path: Some(tmp.path().join("pgkv.redb")),
        ..Default::default()
    };

    {
        let engine = Engine::open(config.clone()).unwrap();
        let b = engine.connect();
        extension::install(&b).unwrap();
        set(&b, "a", "1").unwrap();
        set(&b, "b", "2").unwrap();
        del(&b, "a").unwrap();

        b.begin();
        set(&b, "c", "3").unwrap();
        b.rollback();

        // Left open; dropping the session rolls it back.
        b.begin();
        set(&b, "d", "4").unwrap();
    }

    let engine = Engine::open(config).unwrap();
    let b = engine.connect();
    assert_eq!(list(&b, None).unwrap(), "[b = 2]");
    assert!(matches!(get(&b, "a"), Err(KvError::NotFound(_))));
    // Restored rows still enforce the primary key.
    assert!(set(&b, "b", "x").unwrap_err().is_duplicate_key());
    set(&b, "a", "again").unwrap();
    assert_eq!(get(&b, "a").unwrap(), "again");
}

#[test]
fn uninstall_is_durable() {
    let tmp = TempDir::new().unwrap();
    let config = EngineConfig {
        db_path: Some(tmp.path().join("pgkv.redb")),
        ..Default::default()
    };
    {
        let engine = Engine::open(config.clone()).unwrap();
        let b = engine.connect();
        extension::install(&b).unwrap();
        set(&b, "a", "1").unwrap();
        extension::uninstall(&b).unwrap();
    }
    let engine = Engine::open(config).unwrap();
    let b = engine.connect();
    assert!(matches!(list(&b, None), Err(KvError::Configuration(_))));
}

#[test]
fn commit_after_concurrent_uninstall_leaves_no_rows_behind() {
    let tmp = TempDir::new().unwrap();
    let config = EngineConfig {
        db_path: Some(tmp.path().join("pgkv.redb")),
        ..Default::default()
    };
    {
        let engine = Engine::open(config.clone()).unwrap();
        let a = engine.connect();
        extension::install(&a).unwrap();
        a.begin();
        set(&a, "k", "v").unwrap();
        // The store is closed between statements, so another session may drop it.
        let b = engine.connect();
        extension::uninstall(&b).unwrap();
        a.commit().unwrap();
    }
    let engine = Engine::open(config).unwrap();
    let b = engine.connect();
    extension::install(&b).unwrap();
    assert_eq!(list(&b, None).unwrap(), "[]");
    set(&b, "k", "fresh").unwrap();
    assert_eq!(get(&b, "k").unwrap(), "fresh");
}

// ── Vacuum ──────────────────────────────────────────────────────────

#[test]
fn vacuum_reclaims_deleted_rows_and_settled_transactions() {
    let (engine, a) = store();
    let relid = a.execute(|h| store_relation_oid(h)).unwrap();
    for i in 0..50 {
        set(&a, &format!("k{i}"), "v").unwrap();
    }
    for i in 0..50 {
        del(&a, &format!("k{i}")).unwrap();
    }
    assert_eq!(engine.stored_versions(relid), Some(50));

    let stats = engine.vacuum();
    assert_eq!(stats.removed, 50);
    assert!(stats.xids_pruned >= 100);
    assert_eq!(engine.stored_versions(relid), Some(0));
    assert_eq!(engine.tracked_transactions(), 0);

    set(&a, "k0", "again").unwrap();
    assert_eq!(get(&a, "k0").unwrap(), "again");
    assert_eq!(list(&a, None).unwrap(), "[k0 = again]");
}

#[test]
fn vacuum_keeps_rows_an_open_snapshot_still_sees() {
    let (engine, a) = installed(EngineConfig {
        isolation: IsolationLevel::RepeatableRead,
        ..Default::default()
    });
    let b = engine.connect();
    let relid = b.execute(|h| store_relation_oid(h)).unwrap();
    set(&b, "k", "v").unwrap();

    a.begin();
    assert_eq!(get(&a, "k").unwrap(), "v");
    del(&b, "k").unwrap();
    engine.vacuum();
    assert_eq!(engine.stored_versions(relid), Some(1));
    assert_eq!(get(&a, "k").unwrap(), "v");
    a.commit().unwrap();

    engine.vacuum();
    assert_eq!(engine.stored_versions(relid), Some(0));
    assert!(matches!(get(&a, "k"), Err(KvError::NotFound(_))));
}

#[test]
fn settled_transactions_are_forgotten_without_explicit_vacuum() {
    let (engine, a) = store();
    for i in 0..600 {
        let key = format!("k{i}");
        set(&a, &key, "v").unwrap();
        del(&a, &key).unwrap();
    }
    assert!(engine.tracked_transactions() < 1000);
    assert_eq!(list(&a, None).unwrap(), "[]");
}
