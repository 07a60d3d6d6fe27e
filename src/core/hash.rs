// Hashing utilities

use sha2::{Sha256, Digest};
use crate::core::{Hash256, PubKeyHash};

/// Single SHA256 hash
pub fn sha256(data: &[u8]) -> Hash256 {
    Hash256::new(Sha256::digest(data).into())
}

/// SHA256 over the concatenation of two digests (Merkle interior node)
pub fn sha256_pair(left: &Hash256, right: &Hash256) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    Hash256::new(hasher.finalize().into())
}

/// RIPEMD160(SHA256(data)) - locks outputs to a public key
pub fn hash160(data: &[u8]) -> PubKeyHash {
    use ripemd::{Ripemd160, Digest as RipemdDigest};
    let sha = Sha256::digest(data);
    Ripemd160::digest(sha).into()
}
