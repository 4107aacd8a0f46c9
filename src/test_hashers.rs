#![cfg(test)]

// Key capabilities that pin hashes down, shared by the in-crate tests.

use crate::hasher::KeyHasher;

/// Uses the key itself as the hash, so tests pick buckets directly.
#[derive(Clone, Default)]
pub(crate) struct Identity;

impl KeyHasher<u64> for Identity {
    fn hash(&self, key: &u64, _seed: u64) -> u64 {
        *key
    }
    fn equal(&self, a: &u64, b: &u64) -> bool {
        a == b
    }
}

/// Sends every key to bucket zero with the same tag.
#[derive(Clone, Default)]
pub(crate) struct Colliding;

impl KeyHasher<str> for Colliding {
    fn hash(&self, _key: &str, _seed: u64) -> u64 {
        0
    }
    fn equal(&self, a: &str, b: &str) -> bool {
        a == b
    }
}

impl KeyHasher<String> for Colliding {
    fn hash(&self, _key: &String, _seed: u64) -> u64 {
        0
    }
    fn equal(&self, a: &String, b: &String) -> bool {
        a == b
    }
}

impl KeyHasher<&'static str> for Colliding {
    fn hash(&self, _key: &&'static str, _seed: u64) -> u64 {
        0
    }
    fn equal(&self, a: &&'static str, b: &&'static str) -> bool {
        a == b
    }
}
