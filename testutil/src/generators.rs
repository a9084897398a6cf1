/// Test data generators

use proptest::collection::vec;
use proptest::prelude::*;
use rand::Rng;

/// Generate random bytes
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| rng.gen()).collect()
}

/// Generate a random opaque transaction
pub fn random_transaction() -> Vec<u8> {
    random_bytes(32)
}

/// Generate `count` random transactions
pub fn random_transactions(count: usize) -> Vec<Vec<u8>> {
    (0..count).map(|_| random_transaction()).collect()
}

/// Deterministic, human-readable transaction (`"{tag}_{n}"`)
pub fn labelled_transaction(tag: &str, n: usize) -> Vec<u8> {
    format!("{}_{}", tag, n).into_bytes()
}

/// Proptest strategy for a batch of transactions
pub fn arb_transactions(max_count: usize, max_len: usize) -> impl Strategy<Value = Vec<Vec<u8>>> {
    vec(vec(any::<u8>(), 0..max_len), 0..max_count)
}
