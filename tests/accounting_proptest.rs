// Memory accounting property test.
//
// Model: for each key, `Some(bytes)` while the cache holds it loaded,
// `None` otherwise. Reads and writes load on a miss at the key's base size;
// writes may grow the payload in place and refresh its footprint.
// Evictions and clears unload keys; compaction only drops stubs.
//
// Invariants checked after every step:
// - memory_usage() == sum of model sizes over loaded keys.
// - contains_key(key) agrees with the model.
// - len() >= loaded keys; after compaction or a clear, len() == loaded keys.
// - A size-bound pass with no handles outstanding leaves usage <= limit.
mod common;

use common::ImageServer;
use proptest::prelude::*;
use simple_cache::SimpleCache;
use std::time::Duration;

const KEYS: usize = 5;

#[derive(Clone, Debug)]
enum Op {
    Read(usize),
    Write(usize, u8),
    DownToSize(u64),
    RemoveAll,
    Clear,
    ClearWithoutCleanup,
    Compact,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => (0..KEYS).prop_map(Op::Read),
        4 => (0..KEYS, 0u8..16).prop_map(|(k, grow)| Op::Write(k, grow)),
        2 => (0u64..80).prop_map(Op::DownToSize),
        1 => Just(Op::RemoveAll),
        1 => Just(Op::Clear),
        1 => Just(Op::ClearWithoutCleanup),
        1 => Just(Op::Compact),
    ]
}

fn base_size(k: usize) -> u64 {
    4 + 3 * k as u64
}

fn id(k: usize) -> String {
    format!("img{k}")
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 48, .. ProptestConfig::default() })]
    #[test]
    fn prop_usage_matches_loaded_footprints(ops in proptest::collection::vec(arb_op(), 1..60)) {
        let mut server = ImageServer::new();
        for k in 0..KEYS {
            server = server.with_size(&id(k), base_size(k));
        }
        let cache = SimpleCache::default();
        let mut model: Vec<Option<u64>> = vec![None; KEYS];

        for op in ops {
            match op {
                Op::Read(k) => {
                    let r = cache.get_for_read(id(k).as_str(), &mut server).unwrap();
                    let bytes = r.read().unwrap().pixels.len() as u64;
                    prop_assert_eq!(bytes, model[k].unwrap_or(base_size(k)));
                    model[k] = Some(bytes);
                }
                Op::Write(k, grow) => {
                    let mut w = cache.get_for_write(id(k).as_str(), &mut server).unwrap();
                    w.write().unwrap().pixels.extend(std::iter::repeat(1).take(grow as usize));
                    let bytes = w.refresh_footprint(&server).unwrap();
                    prop_assert_eq!(bytes, model[k].unwrap_or(base_size(k)) + grow as u64);
                    model[k] = Some(bytes);
                }
                Op::DownToSize(limit) => {
                    cache.set_memory_limit(limit);
                    cache.delete_objects_to_get_down_to_size(&mut server).unwrap();
                    prop_assert!(cache.memory_usage() <= limit);
                    for (k, slot) in model.iter_mut().enumerate() {
                        if !cache.contains_key(&id(k)) {
                            *slot = None;
                        }
                    }
                }
                Op::RemoveAll => {
                    let loaded = model.iter().filter(|m| m.is_some()).count();
                    let evicted = cache.remove_old_images(Duration::ZERO, &mut server).unwrap();
                    prop_assert_eq!(evicted, loaded);
                    model.iter_mut().for_each(|m| *m = None);
                }
                Op::Clear => {
                    cache.clear_cache(&mut server).unwrap();
                    model.iter_mut().for_each(|m| *m = None);
                    prop_assert!(cache.is_empty());
                }
                Op::ClearWithoutCleanup => {
                    cache.clear_cache_without_cleanup();
                    model.iter_mut().for_each(|m| *m = None);
                    prop_assert!(cache.is_empty());
                }
                Op::Compact => {
                    cache.pause_everything_to_clean_up_internal_structures();
                    let loaded = model.iter().filter(|m| m.is_some()).count();
                    prop_assert_eq!(cache.len(), loaded);
                    prop_assert_eq!(cache.stats().pending_deletion, 0);
                }
            }

            let expected: u64 = model.iter().flatten().sum();
            prop_assert_eq!(cache.memory_usage(), expected);
            for (k, slot) in model.iter().enumerate() {
                prop_assert_eq!(cache.contains_key(&id(k)), slot.is_some());
            }
            prop_assert!(cache.len() >= model.iter().filter(|m| m.is_some()).count());
        }
    }
}
