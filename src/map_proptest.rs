#![cfg(test)]

// Property tests for EvacMap kept inside the crate so they can inspect
// bucket layout alongside the public behavior.

use crate::bucket::{is_empty, EMPTY_REST, MIN_TOP_HASH};
use crate::hasher::{bucket_index, tag, KeyHasher};
use crate::test_hashers::Colliding;
use crate::{Cursor, EvacMap};
use proptest::prelude::*;
use std::collections::{BTreeSet, HashMap, HashSet};

#[derive(Clone, Debug)]
enum OpI {
    Insert(usize, i32),
    Slot(usize, i32),
    Remove(usize),
    Get(usize),
    Contains(String),
    CursorStart,
    CursorStep(u8),
    Iterate,
    Clear,
}

fn arb_scenario() -> impl Strategy<Value = (Vec<String>, Vec<OpI>)> {
    proptest::collection::vec("[a-z]{0,4}", 1..=48).prop_flat_map(|pool| {
        let idxs: Vec<usize> = (0..pool.len()).collect();
        let idx = proptest::sample::select(idxs);
        let contains_pool = proptest::sample::select(pool.clone());
        let op = prop_oneof![
            6 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| OpI::Insert(i, v)),
            2 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| OpI::Slot(i, v)),
            4 => idx.clone().prop_map(OpI::Remove),
            2 => idx.clone().prop_map(OpI::Get),
            1 => prop_oneof![contains_pool.prop_map(|s: String| s), "[a-z]{0,4}"]
                .prop_map(OpI::Contains),
            1 => Just(OpI::CursorStart),
            3 => (1u8..8).prop_map(OpI::CursorStep),
            1 => Just(OpI::Iterate),
            1 => Just(OpI::Clear),
        ];
        proptest::collection::vec(op, 1..300).prop_map(move |ops| (pool.clone(), ops))
    })
}

/// A cursor under test and what the model says it must and may yield.
struct Tracked {
    cursor: Cursor,
    seen: HashSet<String>,
    /// Present at start and never removed since.
    required: HashSet<String>,
}

/// Structural checks over the bucket arrays.
fn check_layout<K, V, H>(m: &EvacMap<K, V, H>) -> Result<(), TestCaseError> {
    let mut live = 0usize;
    for (j, head) in m.buckets.buckets.iter().enumerate() {
        let mut rest = false;
        for b in head.chain() {
            for (i, &t) in b.tags.iter().enumerate() {
                if rest {
                    prop_assert_eq!(t, EMPTY_REST, "occupied slot after EMPTY_REST");
                }
                if t == EMPTY_REST {
                    rest = true;
                }
                if is_empty(t) {
                    prop_assert!(b.slots[i].is_none());
                    continue;
                }
                prop_assert!(t >= MIN_TOP_HASH);
                let h = b.slots[i].expect("live slot has a handle");
                let e = m.entries.get(h).expect("live slot resolves");
                prop_assert_eq!(t, tag(e.hash));
                prop_assert_eq!(bucket_index(e.hash, m.b), j);
                live += 1;
            }
        }
    }
    if let Some(old) = &m.old_buckets {
        for head in old.buckets.iter().filter(|h| !h.is_evacuated()) {
            for b in head.chain() {
                live += b.tags.iter().filter(|&&t| t >= MIN_TOP_HASH).count();
            }
        }
        prop_assert!(m.evacuated < old.len());
    }
    prop_assert_eq!(live, m.len());
    Ok(())
}

fn run<H>(
    mut sut: EvacMap<String, i32, H>,
    pool: Vec<String>,
    ops: Vec<OpI>,
) -> Result<(), TestCaseError>
where
    H: KeyHasher<String> + KeyHasher<str>,
{
    let mut model: HashMap<String, i32> = HashMap::new();
    let mut cursors: Vec<Tracked> = Vec::new();

    for op in ops {
        match op {
            OpI::Insert(i, v) => {
                let k = pool[i].clone();
                let prev = sut.insert(k.clone(), v);
                prop_assert_eq!(prev, model.insert(k, v));
            }
            OpI::Slot(i, v) => {
                let k = pool[i].clone();
                let slot = sut.get_or_insert_slot(k.clone());
                *slot = slot.wrapping_add(v);
                let m = model.entry(k).or_insert(0);
                *m = m.wrapping_add(v);
            }
            OpI::Remove(i) => {
                let k = &pool[i];
                prop_assert_eq!(sut.remove(k.as_str()), model.remove(k));
                // A later insert of the same key is a new entry and may be
                // yielded again.
                for c in &mut cursors {
                    c.required.remove(k);
                    c.seen.remove(k);
                }
            }
            OpI::Get(i) => {
                let k = &pool[i];
                prop_assert_eq!(sut.get(k.as_str()), model.get(k));
            }
            OpI::Contains(s) => {
                prop_assert_eq!(sut.contains_key(s.as_str()), model.contains_key(&s));
            }
            OpI::CursorStart => {
                cursors.push(Tracked {
                    cursor: sut.iter_start(),
                    seen: HashSet::new(),
                    required: model.keys().cloned().collect(),
                });
            }
            OpI::CursorStep(n) => {
                for c in &mut cursors {
                    for _ in 0..n {
                        match sut.iter_next(&mut c.cursor) {
                            Some((k, v)) => {
                                prop_assert_eq!(Some(v), model.get(k));
                                prop_assert!(c.seen.insert(k.clone()), "duplicate {:?}", k);
                            }
                            None => {
                                for r in &c.required {
                                    prop_assert!(c.seen.contains(r), "missed {:?}", r);
                                }
                                break;
                            }
                        }
                    }
                }
                cursors.retain(|c| !c.cursor.is_done());
            }
            OpI::Iterate => {
                let keys: Vec<String> = sut.keys().cloned().collect();
                let set: BTreeSet<String> = keys.iter().cloned().collect();
                prop_assert_eq!(keys.len(), set.len());
                prop_assert_eq!(set, model.keys().cloned().collect::<BTreeSet<_>>());
            }
            OpI::Clear => {
                // Cursors do not survive a clear.
                cursors.clear();
                sut.clear();
                model.clear();
            }
        }

        prop_assert_eq!(sut.len(), model.len());
        prop_assert_eq!(sut.is_empty(), model.is_empty());
        check_layout(&sut)?;
    }
    Ok(())
}

// Property: state-machine equivalence against std::collections::HashMap.
// - insert/remove/get/contains agree with the model after every op.
// - bucket layout stays consistent (tags match hashes, entries sit in the
//   bucket their hash selects, nothing occupied after EMPTY_REST).
// - cursors interleaved with writes never yield duplicates and, once done,
//   have yielded every key present throughout.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine((pool, ops) in arb_scenario()) {
        run(EvacMap::new(), pool, ops)?;
    }
}

/// Few distinct hashes: keys share buckets and tags, forcing long chains.
#[derive(Clone, Default)]
struct Coarse;
impl KeyHasher<str> for Coarse {
    fn hash(&self, key: &str, seed: u64) -> u64 {
        let n = key.bytes().map(u64::from).sum::<u64>() % 5;
        (n ^ (seed & 1)).wrapping_mul(0x9e37_79b9_7f4a_7c15)
    }
    fn equal(&self, a: &str, b: &str) -> bool {
        a == b
    }
}
impl KeyHasher<String> for Coarse {
    fn hash(&self, key: &String, seed: u64) -> u64 {
        KeyHasher::<str>::hash(self, key, seed)
    }
    fn equal(&self, a: &String, b: &String) -> bool {
        a == b
    }
}

// Property: the same invariants under worst-case and heavy collisions,
// which exercise overflow chains and same-size growth.
proptest! {
    #![proptest_config(ProptestConfig { cases: 48, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine_with_collisions((pool, ops) in arb_scenario()) {
        run(EvacMap::with_hasher(Colliding), pool, ops)?;
    }

    #[test]
    fn prop_state_machine_with_coarse_hash((pool, ops) in arb_scenario()) {
        run(EvacMap::with_hasher(Coarse), pool, ops)?;
    }
}
