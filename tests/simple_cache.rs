// SimpleCache lifecycle tests.
//
// Invariants exercised:
// - A miss loads exactly once; later requests are hits on the same entry.
// - Handles give their claim back exactly once; accessors fail afterwards.
// - A failed load is surfaced to its caller and never handed out; the next
//   request loads afresh.
// - Memory usage equals the sum of loaded footprints.
// - Exclusive clears empty the table and zero usage.
mod common;

use common::{init_logging, ImageServer};
use simple_cache::{Config, Error, SimpleCache};

#[test]
fn miss_loads_once_then_hits() {
    init_logging();
    let mut server = ImageServer::new().with_size("a", 10);
    let cache = SimpleCache::new(Config::default());

    {
        let h = cache.get_for_read("a", &mut server).unwrap();
        assert_eq!(h.read().unwrap().pixels.len(), 10);
        assert_eq!(h.key().map(String::as_str), Some("a"));
    }
    let h = cache.get_for_read("a", &mut server).unwrap();
    assert_eq!(h.read().unwrap().generation, 1);
    drop(h);

    assert_eq!(server.loads(), vec!["a".to_string()]);
    let stats = cache.stats();
    assert_eq!(stats.loads, 1);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.entries, 1);
    assert_eq!(cache.memory_usage(), 10);
    assert!(cache.contains_key(&"a".to_string()));
}

#[test]
fn many_readers_share_one_entry() {
    let mut server = ImageServer::new();
    let cache = SimpleCache::default();
    let r1 = cache.get_for_read("a", &mut server).unwrap();
    let r2 = cache.get_for_read("a", &mut server).unwrap();
    assert_eq!(r1.read(), r2.read());
    assert_eq!(cache.len(), 1);
    assert_eq!(server.loads_of("a"), 1);
}

#[test]
fn write_then_read_observes_mutation() {
    let mut server = ImageServer::new().with_size("a", 4);
    let cache = SimpleCache::default();

    let mut w = cache.get_for_write("a", &mut server).unwrap();
    w.write().unwrap().pixels[0] = 7;
    w.release();

    let r = cache.get_for_read("a", &mut server).unwrap();
    assert_eq!(r.read().unwrap().pixels, vec![7, 0, 0, 0]);
    assert_eq!(server.loads_of("a"), 1);
}

#[test]
fn release_is_idempotent_and_invalidates_accessors() {
    let mut server = ImageServer::new();
    let cache = SimpleCache::default();

    let mut r = cache.get_for_read("a", &mut server).unwrap();
    assert!(r.is_valid());
    r.release();
    r.release();
    assert!(!r.is_valid());
    assert!(r.read().is_none());
    assert!(r.key().is_none());

    let mut w = cache.get_for_write("a", &mut server).unwrap();
    w.release();
    w.release();
    assert!(w.write().is_none());
    assert!(w.read().is_none());
    drop(w);

    // Nothing is still claimed: a writer gets straight through.
    let w = cache.get_for_write("a", &mut server).unwrap();
    assert!(w.read().is_some());
}

#[test]
fn handle_released_on_early_return() {
    fn first_pixel(cache: &SimpleCache<ImageServer>, server: &mut ImageServer) -> Result<u8, ()> {
        let h = cache.get_for_write("a", server).map_err(|_| ())?;
        let image = h.read().ok_or(())?;
        if image.pixels.is_empty() {
            return Err(());
        }
        Ok(image.pixels[0])
    }

    let mut server = ImageServer::new().with_size("a", 0);
    let cache = SimpleCache::default();
    assert!(first_pixel(&cache, &mut server).is_err());
    // The write-token was given back by the early return.
    let w = cache.get_for_write("a", &mut server).unwrap();
    assert!(w.is_valid());
}

#[test]
fn failed_load_is_surfaced_and_retried() {
    let mut server = ImageServer::new().with_size("a", 5);
    server.failing_loads.insert("a".to_string());
    let cache = SimpleCache::default();

    match cache.get_for_read("a", &mut server) {
        Err(Error::Load(e)) => assert!(e.to_string().contains("unavailable")),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("load failure must be surfaced"),
    }
    assert!(!cache.contains_key(&"a".to_string()));
    assert_eq!(cache.memory_usage(), 0);
    assert_eq!(cache.stats().pending_deletion, 1);

    server.failing_loads.clear();
    let h = cache.get_for_read("a", &mut server).unwrap();
    assert_eq!(h.read().unwrap().generation, 2);
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.memory_usage(), 5);
}

#[test]
fn refresh_footprint_tracks_in_place_growth() {
    let mut server = ImageServer::new().with_size("a", 8);
    let cache = SimpleCache::default();

    let mut w = cache.get_for_write("a", &mut server).unwrap();
    w.write().unwrap().pixels.extend_from_slice(&[1; 24]);
    assert_eq!(w.refresh_footprint(&server), Some(32));
    drop(w);
    assert_eq!(cache.memory_usage(), 32);

    let mut w = cache.get_for_write("a", &mut server).unwrap();
    w.write().unwrap().pixels.truncate(2);
    assert_eq!(w.refresh_footprint(&server), Some(2));
    drop(w);
    assert_eq!(cache.memory_usage(), 2);
}

#[test]
fn clear_cache_cleans_up_every_entry() {
    let mut server = ImageServer::new().with_size("a", 3).with_size("b", 4);
    let cache = SimpleCache::default();
    drop(cache.get_for_read("a", &mut server).unwrap());
    drop(cache.get_for_write("b", &mut server).unwrap());

    cache.clear_cache(&mut server).unwrap();
    assert!(cache.is_empty());
    assert_eq!(cache.memory_usage(), 0);
    let mut cleaned = server.cleanups();
    cleaned.sort();
    assert_eq!(cleaned, vec!["a".to_string(), "b".to_string()]);

    // The next request is a fresh miss.
    let h = cache.get_for_read("a", &mut server).unwrap();
    assert_eq!(h.read().unwrap().generation, 2);
}

#[test]
fn clear_cache_without_cleanup_skips_cleanup() {
    let mut server = ImageServer::new().with_size("a", 3).with_size("b", 4);
    let cache = SimpleCache::default();
    drop(cache.get_for_read("a", &mut server).unwrap());
    drop(cache.get_for_read("b", &mut server).unwrap());
    assert_eq!(cache.memory_usage(), 7);

    cache.clear_cache_without_cleanup();
    assert!(cache.is_empty());
    assert_eq!(cache.memory_usage(), 0);
    assert!(server.cleanups().is_empty());
}

#[test]
fn clear_cache_stops_at_failing_cleanup() {
    let mut server = ImageServer::new().with_size("a", 3);
    server.failing_cleanups.insert("a".to_string());
    let cache = SimpleCache::default();
    drop(cache.get_for_read("a", &mut server).unwrap());

    assert!(matches!(
        cache.clear_cache(&mut server),
        Err(Error::Cleanup(_))
    ));
    // The entry is left as a stub; everything was unlocked.
    assert_eq!(cache.memory_usage(), 0);
    assert!(!cache.contains_key(&"a".to_string()));
    server.failing_cleanups.clear();
    let h = cache.get_for_read("a", &mut server).unwrap();
    assert!(!h.read().unwrap().cleaned);
    assert_eq!(cache.memory_usage(), 3);
}

#[test]
fn memory_limit_is_adjustable() {
    let cache: SimpleCache<ImageServer> = SimpleCache::with_memory_limit(100);
    assert_eq!(cache.memory_limit(), 100);
    cache.set_memory_limit(25);
    assert_eq!(cache.memory_limit(), 25);
    assert_eq!(cache.stats().memory_limit, 25);
}
