//! Integration tests for the public `stratakv::engine::Engine` API.
//!
//! These exercise the full storage stack (WAL → memtable → SSTable) through
//! the public surface only; no internal modules are referenced.

use stratakv::engine::{Engine, EngineConfig};
use tempfile::TempDir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn small_flush_config() -> EngineConfig {
    init_tracing();
    EngineConfig {
        flush_threshold_bytes: 1024,
        ..EngineConfig::default()
    }
}

fn default_config() -> EngineConfig {
    init_tracing();
    EngineConfig::default()
}

// ----------------------------------------------------------------------
// Seed scenarios (spec §8)
// ----------------------------------------------------------------------

#[test]
fn basic_put_get_across_multiple_keys() {
    let tmp = TempDir::new().unwrap();
    let engine = Engine::open(tmp.path(), default_config()).unwrap();

    engine.put(b"k1", b"v1".to_vec()).unwrap();
    engine.put(b"k2", b"v2".to_vec()).unwrap();
    engine.put(b"k3", b"v3".to_vec()).unwrap();

    assert_eq!(engine.get(b"k1").unwrap(), Some(b"v1".to_vec()));
    assert_eq!(engine.get(b"k2").unwrap(), Some(b"v2".to_vec()));
    assert_eq!(engine.get(b"k3").unwrap(), Some(b"v3".to_vec()));
    assert_eq!(engine.get(b"nope").unwrap(), None);
}

#[test]
fn last_writer_wins_across_repeated_puts() {
    let tmp = TempDir::new().unwrap();
    let engine = Engine::open(tmp.path(), default_config()).unwrap();

    engine.put(b"k", b"a".to_vec()).unwrap();
    engine.put(b"k", b"b".to_vec()).unwrap();
    engine.put(b"k", b"c".to_vec()).unwrap();

    assert_eq!(engine.get(b"k").unwrap(), Some(b"c".to_vec()));
}

#[test]
fn remove_is_authoritative_even_for_missing_keys() {
    let tmp = TempDir::new().unwrap();
    let engine = Engine::open(tmp.path(), default_config()).unwrap();

    engine.put(b"k1", b"v1".to_vec()).unwrap();
    engine.put(b"k2", b"v2".to_vec()).unwrap();
    engine.remove(b"k1").unwrap();
    engine.remove(b"missing").unwrap();

    assert_eq!(engine.get(b"k1").unwrap(), None);
    assert_eq!(engine.get(b"k2").unwrap(), Some(b"v2".to_vec()));
}

#[test]
fn recovery_after_close_and_reopen() {
    let tmp = TempDir::new().unwrap();
    {
        let engine = Engine::open(tmp.path(), default_config()).unwrap();
        engine.put(b"p1", b"v1".to_vec()).unwrap();
        engine.put(b"p2", b"v2".to_vec()).unwrap();
        engine.put(b"p3", b"v3".to_vec()).unwrap();
        engine.remove(b"p2").unwrap();
    }

    let engine = Engine::open(tmp.path(), default_config()).unwrap();
    assert_eq!(engine.get(b"p1").unwrap(), Some(b"v1".to_vec()));
    assert_eq!(engine.get(b"p2").unwrap(), None);
    assert_eq!(engine.get(b"p3").unwrap(), Some(b"v3".to_vec()));
}

#[test]
fn large_key_and_value_round_trip() {
    let tmp = TempDir::new().unwrap();
    let engine = Engine::open(tmp.path(), default_config()).unwrap();

    let key = "k".repeat(1000).into_bytes();
    let value = "v".repeat(10000).into_bytes();
    engine.put(&key, value.clone()).unwrap();

    assert_eq!(engine.get(&key).unwrap(), Some(value));
}

#[test]
fn scale_to_a_thousand_keys_with_reopen() {
    let tmp = TempDir::new().unwrap();
    {
        let engine = Engine::open(tmp.path(), small_flush_config()).unwrap();

        for i in 0..1000 {
            engine
                .put(format!("key{i}").as_bytes(), format!("value{i}").into_bytes())
                .unwrap();
        }
        for i in 0..1000 {
            let expected = format!("value{i}").into_bytes();
            assert_eq!(engine.get(format!("key{i}").as_bytes()).unwrap(), Some(expected));
        }

        for i in 0..500 {
            engine.remove(format!("key{i}").as_bytes()).unwrap();
        }
        for i in 0..500 {
            assert_eq!(engine.get(format!("key{i}").as_bytes()).unwrap(), None);
        }
        for i in 500..1000 {
            let expected = format!("value{i}").into_bytes();
            assert_eq!(engine.get(format!("key{i}").as_bytes()).unwrap(), Some(expected));
        }
    }

    let engine = Engine::open(tmp.path(), small_flush_config()).unwrap();
    for i in 0..500 {
        assert_eq!(engine.get(format!("key{i}").as_bytes()).unwrap(), None);
    }
    for i in 500..1000 {
        let expected = format!("value{i}").into_bytes();
        assert_eq!(engine.get(format!("key{i}").as_bytes()).unwrap(), Some(expected));
    }
}

// ----------------------------------------------------------------------
// Flush / SSTable interaction
// ----------------------------------------------------------------------

#[test]
fn flush_does_not_change_observable_reads() {
    let tmp = TempDir::new().unwrap();
    let engine = Engine::open(tmp.path(), default_config()).unwrap();

    for i in 0..100 {
        engine
            .put(format!("f{i}").as_bytes(), format!("v{i}").into_bytes())
            .unwrap();
    }
    engine.flush().unwrap();

    for i in 0..100 {
        let expected = format!("v{i}").into_bytes();
        assert_eq!(engine.get(format!("f{i}").as_bytes()).unwrap(), Some(expected));
    }

    let stats = engine.stats().unwrap();
    assert_eq!(stats.sstables_count, 1);
    assert_eq!(stats.memtable_size_bytes, 0);
}

#[test]
fn overwrite_after_flush_shadows_older_sstable_value() {
    let tmp = TempDir::new().unwrap();
    let engine = Engine::open(tmp.path(), default_config()).unwrap();

    engine.put(b"k", b"old".to_vec()).unwrap();
    engine.flush().unwrap();
    engine.put(b"k", b"new".to_vec()).unwrap();

    assert_eq!(engine.get(b"k").unwrap(), Some(b"new".to_vec()));
}

#[test]
fn multiple_flushes_produce_independently_readable_sstables() {
    let tmp = TempDir::new().unwrap();
    let engine = Engine::open(tmp.path(), default_config()).unwrap();

    engine.put(b"a", b"1".to_vec()).unwrap();
    engine.flush().unwrap();
    engine.put(b"b", b"2".to_vec()).unwrap();
    engine.flush().unwrap();
    engine.put(b"c", b"3".to_vec()).unwrap();
    engine.flush().unwrap();

    assert_eq!(engine.get(b"a").unwrap(), Some(b"1".to_vec()));
    assert_eq!(engine.get(b"b").unwrap(), Some(b"2".to_vec()));
    assert_eq!(engine.get(b"c").unwrap(), Some(b"3".to_vec()));
    assert_eq!(engine.stats().unwrap().sstables_count, 3);
}

#[test]
fn empty_database_returns_absent_for_everything() {
    let tmp = TempDir::new().unwrap();
    let engine = Engine::open(tmp.path(), default_config()).unwrap();
    assert_eq!(engine.get(b"anything").unwrap(), None);
}
