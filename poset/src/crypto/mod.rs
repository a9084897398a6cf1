/// Cryptography module for the poset
///
/// Implements:
/// - SHA-256 hashing of canonical encodings
/// - ECDSA (secp256k1) signatures for events and blocks

pub mod hash;
pub mod ecdsa;

pub use hash::{Hash, hash_data, hash_parts, HASH_SIZE};
pub use ecdsa::{
    ECDSASecretKey, ECDSAPublicKey, ECDSASignature, ECDSAError,
    pub_key_hex, signature_r, SIGNATURE_SIZE,
};
