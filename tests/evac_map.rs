use evacmap::{EvacMap, FloatKeyHasher, KeyHasher, TableError};
use std::cell::Cell;
use std::collections::{HashMap, HashSet};

/// Every key hashes to zero: one bucket index, one tag.
#[derive(Default)]
struct Constant {
    equal_calls: Cell<usize>,
}

impl KeyHasher<str> for Constant {
    fn hash(&self, _key: &str, _seed: u64) -> u64 {
        0
    }
    fn equal(&self, a: &str, b: &str) -> bool {
        self.equal_calls.set(self.equal_calls.get() + 1);
        a == b
    }
}

impl KeyHasher<String> for Constant {
    fn hash(&self, key: &String, seed: u64) -> u64 {
        KeyHasher::<str>::hash(self, key, seed)
    }
    fn equal(&self, a: &String, b: &String) -> bool {
        KeyHasher::<str>::equal(self, a, b)
    }
}

/// The key is its own hash, so tests choose bucket indexes directly.
#[derive(Clone, Default)]
struct Identity;

impl KeyHasher<u64> for Identity {
    fn hash(&self, key: &u64, _seed: u64) -> u64 {
        *key
    }
    fn equal(&self, a: &u64, b: &u64) -> bool {
        a == b
    }
}

fn key(n: u64) -> String {
    format!("k{:016x}", n)
}

#[test]
fn round_trip_until_deleted() {
    let mut m: EvacMap<String, u64> = EvacMap::new();
    for i in 0..2_000 {
        assert_eq!(m.insert(key(i), i), None);
    }
    for i in (0..2_000).step_by(3) {
        assert_eq!(m.insert(key(i), i * 10), Some(i));
    }
    for i in (0..2_000).step_by(5) {
        m.delete(key(i).as_str());
    }
    for i in 0..2_000 {
        let expect = if i % 5 == 0 {
            None
        } else if i % 3 == 0 {
            Some(i * 10)
        } else {
            Some(i)
        };
        assert_eq!(m.get(key(i).as_str()).copied(), expect, "key {i}");
    }
}

#[test]
fn count_matches_full_iteration() {
    let mut m: EvacMap<u64, u64> = EvacMap::new();
    let mut model = HashMap::new();
    let mut s = 17u64;
    for _ in 0..5_000 {
        s = s.wrapping_mul(6364136223846793005).wrapping_add(1);
        let k = (s >> 33) % 700;
        if s & 4 == 0 {
            m.delete(&k);
            model.remove(&k);
        } else {
            m.insert(k, s);
            model.insert(k, s);
        }
        assert_eq!(m.len(), model.len());
    }
    assert_eq!(m.iter().count(), m.len());
    for (k, v) in &m {
        assert_eq!(model.get(k), Some(v));
    }
}

/// Ten thousand keys force repeated doublings; bucket-by-bucket churn then
/// piles up overflow buckets until a same-size growth compacts them.
#[test]
fn no_duplicate_or_missing_after_both_growth_kinds() {
    let mut m: EvacMap<u64, u64, Identity> = EvacMap::with_hasher(Identity);
    for k in 0..10_000 {
        m.insert(k, k);
    }
    let s = m.stats();
    assert_eq!(s.bucket_count_log2, 11);
    assert!(s.doubling_growths >= 11);
    assert_eq!(s.same_size_growths, 0);

    for j in 0..2_048u64 {
        let extra: Vec<u64> = (10..15).map(|m| j + 2_048 * m).collect();
        for &k in &extra {
            m.insert(k, k);
        }
        for k in &extra {
            m.delete(k);
        }
    }
    m.insert(1 << 40, 0);
    let s = m.stats();
    assert_eq!(s.same_size_growths, 1);
    assert_eq!(s.bucket_count_log2, 11);

    let mut seen = HashSet::new();
    for (k, _) in &m {
        assert!(seen.insert(*k), "duplicate {k}");
    }
    assert_eq!(seen.len(), 10_001);
    assert!((0..10_000).all(|k| seen.contains(&k)));
    assert!(seen.contains(&(1 << 40)));
}

#[test]
fn lookups_stop_at_the_end_of_a_thinned_bucket() {
    let mut m: EvacMap<String, usize, Constant> = EvacMap::with_hasher(Constant::default());
    for i in 0..8 {
        m.insert(key(i), i as usize);
    }
    assert_eq!(m.stats().buckets, 1);
    for i in (1..8).step_by(2) {
        m.delete(key(i).as_str());
    }

    m.hasher().equal_calls.set(0);
    assert_eq!(m.get("never inserted"), None);
    // Only the four survivors are compared.
    assert_eq!(m.hasher().equal_calls.get(), 4);
    for i in (0..8).step_by(2) {
        assert_eq!(m.get(key(i).as_str()), Some(&(i as usize)));
    }
}

#[test]
fn evacuation_drains_within_old_bucket_count_writes() {
    let mut m: EvacMap<String, u64> = EvacMap::new();
    let mut n = 0;
    // Small growths can drain within the write that starts them.
    while m.stats().old_buckets.is_none() {
        m.insert(key(n), n);
        n += 1;
    }
    let old = m.stats().old_buckets.expect("growing");
    let mut writes = 0;
    while m.stats().old_buckets.is_some() {
        // Overwrites do growth work too.
        m.insert(key(0), 0);
        writes += 1;
    }
    assert!(writes <= old, "{writes} writes for {old} old buckets");
    for i in 0..n {
        assert!(m.contains_key(key(i).as_str()));
    }
}

#[test]
fn iteration_tolerates_growth_between_steps() {
    let mut m: EvacMap<String, u64> = EvacMap::new();
    for i in 0..200 {
        m.insert(key(i), i);
    }
    let before = m.stats().doubling_growths;
    let mut it = m.iter_start();
    let mut seen = HashSet::new();
    for _ in 0..50 {
        let (k, _) = m.iter_next(&mut it).expect("more entries");
        assert!(seen.insert(k.clone()));
    }

    // Delete a few originals, then force at least one doubling.
    for i in 0..20 {
        m.delete(key(i).as_str());
        seen.remove(&key(i));
    }
    for i in 10_000..15_000 {
        m.insert(key(i), i);
        if i % 7 == 0 {
            if let Some((k, _)) = m.iter_next(&mut it) {
                assert!(seen.insert(k.clone()), "duplicate {k}");
            }
        }
    }
    assert!(m.stats().doubling_growths > before);

    while let Some((k, _)) = m.iter_next(&mut it) {
        assert!(seen.insert(k.clone()), "duplicate {k}");
    }
    for i in 20..200 {
        assert!(seen.contains(&key(i)), "missing {}", key(i));
    }
    for i in 0..20 {
        assert!(!seen.contains(&key(i)), "yielded deleted {}", key(i));
    }
}

/// Nine keys sharing one hash: the ninth needs an overflow bucket, and a
/// delete at the front of the chain leaves the tail reachable.
#[test]
fn ninth_colliding_key_overflows() {
    let mut m: EvacMap<String, i32, Constant> = EvacMap::with_hasher(Constant::default());
    let names = ["a", "b", "c", "d", "e", "f", "g", "h"];
    for (v, k) in (1..).zip(names) {
        m.insert(k.to_string(), v);
    }
    let s = m.stats();
    assert_eq!(s.len, 8);
    assert_eq!(s.buckets, 1);
    assert_eq!(s.overflow_buckets, 0);

    m.insert("i".to_string(), 9);
    let s = m.stats();
    assert_eq!(s.len, 9);
    assert_eq!(s.overflow_buckets, 1);

    m.delete("a");
    assert_eq!(m.get("a"), None);
    assert_eq!(m.len(), 8);
    assert_eq!(m.get("i"), Some(&9));
}

#[test]
fn float_keys_zero_and_nan() {
    let mut m: EvacMap<f64, u32, FloatKeyHasher> = EvacMap::with_hasher(FloatKeyHasher::default());
    m.insert(0.0, 1);
    assert_eq!(m.insert(-0.0, 2), Some(1));
    assert_eq!(m.len(), 1);
    let (k, v) = m.get_key_value(&0.0).expect("zero present");
    assert!(k.is_sign_negative(), "overwrite stores the new key");
    assert_eq!(*v, 2);

    m.insert(f64::NAN, 10);
    m.insert(f64::NAN, 11);
    assert_eq!(m.len(), 3);
    assert_eq!(m.get(&f64::NAN), None);
    m.delete(&f64::NAN);
    assert_eq!(m.len(), 3);
    assert_eq!(m.keys().filter(|k| k.is_nan()).count(), 2);
}

#[test]
fn nan_keys_survive_growth() {
    let mut m: EvacMap<f64, u32, FloatKeyHasher> = EvacMap::with_hasher(FloatKeyHasher::default());
    for i in 0..300u32 {
        m.insert(f64::NAN, i);
        m.insert(f64::from(i), i);
    }
    assert_eq!(m.len(), 600);
    assert!(m.stats().doubling_growths > 0);
    let mut nan_values: Vec<u32> = m.iter().filter(|(k, _)| k.is_nan()).map(|(_, v)| *v).collect();
    nan_values.sort_unstable();
    assert_eq!(nan_values, (0..300).collect::<Vec<_>>());
    for i in 0..300u32 {
        assert_eq!(m.get(&f64::from(i)), Some(&i));
    }
}

#[test]
fn capacity_errors_are_reported() {
    let r = EvacMap::<u64, u64, Identity>::try_with_capacity_and_hasher(usize::MAX, Identity);
    let err = r.err().expect("hint too large");
    assert_eq!(err, TableError::CapacityOverflow { hint: usize::MAX });
    assert!(err.to_string().contains("capacity hint"));

    let m = EvacMap::<u64, u64, Identity>::try_with_capacity_and_hasher(1_000, Identity)
        .expect("small hint");
    assert_eq!(m.stats().buckets, 256);
}
