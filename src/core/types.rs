// Basic types shared by blocks, transactions and the stores

use std::fmt;

/// Block subsidy credited by every coinbase transaction
pub const SUBSIDY: u64 = 100;

/// RIPEMD160(SHA256(public key)) - the lock placed on an output
pub type PubKeyHash = [u8; 20];

/// 256-bit hash type (32 bytes)
/// Used for block hashes, transaction IDs, and Merkle roots
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// Create a new Hash256 from a byte array
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Create a Hash256 from a slice
    pub fn from_slice(slice: &[u8]) -> Result<Self, String> {
        let bytes: [u8; 32] = slice
            .try_into()
            .map_err(|_| format!("Invalid hash length: expected 32, got {}", slice.len()))?;
        Ok(Self(bytes))
    }

    /// Get the hash as a byte slice
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// All-zero hash, the cleared id of a transaction being hashed
    pub fn zero() -> Self {
        Self([0u8; 32])
    }

    /// Convert to hex string (digest byte order)
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash256_zero() {
        let zero = Hash256::zero();
        assert_eq!(zero.as_bytes(), &[0u8; 32]);
        assert_ne!(zero, Hash256::new([1u8; 32]));
    }

    #[test]
    fn test_hash256_hex() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0x12;
        bytes[31] = 0xab;
        let hash = Hash256::new(bytes);

        let hex = hash.to_hex();
        assert!(hex.starts_with("12"));
        assert!(hex.ends_with("ab"));
        assert_eq!(hash.to_string(), hex);
    }

    #[test]
    fn test_from_slice_rejects_wrong_length() {
        assert!(Hash256::from_slice(&[0u8; 20]).is_err());
    }

    #[test]
    fn test_ordering_is_big_endian() {
        let mut low = [0u8; 32];
        low[31] = 0xff;
        let mut high = [0u8; 32];
        high[0] = 0x01;
        assert!(Hash256::new(low) < Hash256::new(high));
    }
}
