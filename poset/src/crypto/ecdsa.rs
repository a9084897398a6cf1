/// ECDSA signatures for events and blocks
///
/// Uses the secp256k1 curve. Signatures are deterministic (RFC 6979), which
/// keeps event hashes reproducible across re-signing.

use k256::ecdsa::{
    SigningKey, VerifyingKey,
    signature::{Signer, Verifier},
    Signature as K256Signature,
};
use std::fmt;
use thiserror::Error;

pub const SIGNATURE_SIZE: usize = 64;

#[derive(Error, Debug)]
pub enum ECDSAError {
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Invalid key")]
    InvalidKey,
    #[error("Invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

/// ECDSA secret key (secp256k1)
#[derive(Clone)]
pub struct ECDSASecretKey {
    inner: SigningKey,
}

impl ECDSASecretKey {
    /// Generate a new random secret key
    pub fn generate() -> Self {
        let inner = SigningKey::random(&mut rand::thread_rng());
        Self { inner }
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ECDSAError> {
        let inner = SigningKey::from_slice(bytes)
            .map_err(|_| ECDSAError::InvalidKey)?;
        Ok(Self { inner })
    }

    /// Get the corresponding public key
    pub fn public_key(&self) -> ECDSAPublicKey {
        ECDSAPublicKey {
            inner: self.inner.verifying_key().clone(),
        }
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        self.inner.to_bytes().to_vec()
    }

    /// Sign a message
    pub fn sign(&self, message: &[u8]) -> ECDSASignature {
        let signature: K256Signature = self.inner.sign(message);
        ECDSASignature { inner: signature }
    }
}

impl fmt::Debug for ECDSASecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ECDSASecretKey({})", self.public_key().to_hex())
    }
}

/// ECDSA public key (secp256k1)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ECDSAPublicKey {
    inner: VerifyingKey,
}

impl ECDSAPublicKey {
    /// Create from SEC1 bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ECDSAError> {
        let inner = VerifyingKey::from_sec1_bytes(bytes)
            .map_err(|_| ECDSAError::InvalidKey)?;
        Ok(Self { inner })
    }

    /// Parse the `0x`-prefixed hex form produced by [`ECDSAPublicKey::to_hex`]
    pub fn from_hex(s: &str) -> Result<Self, ECDSAError> {
        let bytes = hex::decode(s.trim_start_matches("0x"))?;
        Self::from_bytes(&bytes)
    }

    /// Serialize to compressed SEC1 bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        self.inner.to_sec1_bytes().to_vec()
    }

    /// Participant identity string
    pub fn to_hex(&self) -> String {
        pub_key_hex(&self.to_bytes())
    }

    /// Verify a signature over `message`
    pub fn verify(&self, message: &[u8], signature: &ECDSASignature) -> bool {
        self.inner.verify(message, &signature.inner).is_ok()
    }
}

/// Hex identity of raw public key bytes
pub fn pub_key_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode_upper(bytes))
}

/// ECDSA signature
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ECDSASignature {
    inner: K256Signature,
}

impl ECDSASignature {
    /// Create from raw `r || s` bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ECDSAError> {
        let inner = K256Signature::from_slice(bytes)
            .map_err(|_| ECDSAError::InvalidSignature)?;
        Ok(Self { inner })
    }

    pub fn from_hex(s: &str) -> Result<Self, ECDSAError> {
        let bytes = hex::decode(s)?;
        Self::from_bytes(&bytes)
    }

    /// Serialize to `r || s`
    pub fn to_bytes(&self) -> Vec<u8> {
        self.inner.to_bytes().to_vec()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }
}

/// Big-endian `r` component of an encoded signature.
///
/// Comparing these arrays lexicographically is the numeric comparison of
/// `r`; malformed signatures decode to zero so they sort first.
pub fn signature_r(bytes: &[u8]) -> [u8; 32] {
    let mut r = [0u8; 32];
    if bytes.len() == SIGNATURE_SIZE {
        r.copy_from_slice(&bytes[..32]);
    }
    r
}
