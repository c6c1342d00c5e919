#![cfg(test)]

// Property tests for Table kept inside the crate next to the structural
// layer they exercise.

use crate::table::{InsertError, Slot, Table};
use core::hash::{BuildHasher, Hasher};
use proptest::prelude::*;
use std::collections::hash_map::RandomState;
use std::collections::{BTreeSet, HashMap};

#[derive(Clone, Debug)]
enum Op {
    Insert(usize, i32),
    Remove(usize),
    Find(usize),
    Contains(String),
    Iterate,
    Drain,
}

fn arb_scenario() -> impl Strategy<Value = (Vec<String>, Vec<Op>)> {
    proptest::collection::vec("[a-z]{0,4}", 1..=8).prop_flat_map(|pool| {
        let idx = 0..pool.len();
        let op = prop_oneof![
            6 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| Op::Insert(i, v)),
            3 => idx.clone().prop_map(Op::Remove),
            3 => idx.clone().prop_map(Op::Find),
            2 => "[a-z]{0,4}".prop_map(Op::Contains),
            1 => Just(Op::Iterate),
            1 => Just(Op::Drain),
        ];
        proptest::collection::vec(op, 1..60).prop_map(move |ops| (pool.clone(), ops))
    })
}

// State-machine equivalence against std::collections::HashMap:
// - duplicate inserts are rejected without running the constructor,
// - `find` returns the slot handed out at insert time,
// - removed and drained slots never resolve again,
// - `len`/`is_empty` match the model after every step.
fn run_scenario<S: BuildHasher>(
    mut sut: Table<String, i32, S>,
    pool: Vec<String>,
    ops: Vec<Op>,
) -> Result<(), TestCaseError> {
    let mut model: HashMap<String, i32> = HashMap::new();
    let mut live: HashMap<String, Slot> = HashMap::new();
    let mut stale: Vec<Slot> = Vec::new();

    for op in ops {
        match op {
            Op::Insert(i, v) => {
                let k = pool[i].clone();
                let already = model.contains_key(&k);
                let mut ran = false;
                match sut.insert_with(k.clone(), || {
                    ran = true;
                    v
                }) {
                    Ok(slot) => {
                        prop_assert!(!already, "insert must fail on duplicate");
                        prop_assert!(ran);
                        live.insert(k.clone(), slot);
                        model.insert(k, v);
                    }
                    Err(InsertError::DuplicateKey) => {
                        prop_assert!(already, "duplicate error only when key exists");
                        prop_assert!(!ran, "constructor must not run on duplicate");
                    }
                }
            }
            Op::Remove(i) => {
                let k = &pool[i];
                if let Some(slot) = live.remove(k) {
                    let (kk, vv) = sut.remove(slot).expect("live slot must be removable");
                    prop_assert_eq!(&kk, k);
                    prop_assert_eq!(Some(vv), model.remove(k));
                    stale.push(slot);
                } else {
                    prop_assert!(sut.find(k.as_str()).is_none());
                }
            }
            Op::Find(i) => {
                let k = &pool[i];
                prop_assert_eq!(sut.find(k.as_str()), live.get(k).copied());
            }
            Op::Contains(s) => {
                prop_assert_eq!(sut.contains_key(s.as_str()), model.contains_key(&s));
            }
            Op::Iterate => {
                let s_keys: BTreeSet<_> = sut.iter().map(|(_, k, _)| k.clone()).collect();
                let m_keys: BTreeSet<_> = model.keys().cloned().collect();
                prop_assert_eq!(s_keys, m_keys);
            }
            Op::Drain => {
                let drained: HashMap<String, i32> = sut.drain().collect();
                prop_assert_eq!(&drained, &model);
                model.clear();
                stale.extend(live.drain().map(|(_, slot)| slot));
            }
        }

        for &slot in &stale {
            prop_assert!(sut.get(slot).is_none(), "stale slot resolved");
        }
        prop_assert_eq!(sut.len(), model.len());
        prop_assert_eq!(sut.is_empty(), model.is_empty());
    }
    Ok(())
}

#[derive(Clone, Default)]
struct ConstBuildHasher;
struct ConstHasher;
impl BuildHasher for ConstBuildHasher {
    type Hasher = ConstHasher;
    fn build_hasher(&self) -> Self::Hasher {
        ConstHasher
    }
}
impl Hasher for ConstHasher {
    fn write(&mut self, _bytes: &[u8]) {}
    fn finish(&self) -> u64 {
        0
    }
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine((pool, ops) in arb_scenario()) {
        run_scenario(Table::with_hasher(RandomState::new()), pool, ops)?;
    }

    // Same invariants with every key colliding.
    #[test]
    fn prop_state_machine_with_collisions((pool, ops) in arb_scenario()) {
        run_scenario(Table::with_hasher(ConstBuildHasher), pool, ops)?;
    }
}
