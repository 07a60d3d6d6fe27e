// Key management

use crate::core::{encode_public_key, hash160, PubKeyHash};
use crate::error::{LedgerError, Result};
use p256::ecdsa::SigningKey;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Hex-encoded public key hash
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(pub String);

impl Address {
    /// Create address from public key hash
    pub fn from_pubkey_hash(hash: &PubKeyHash) -> Self {
        Self(hex::encode(hash))
    }

    /// Get address string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decode the public key hash this address names
    pub fn to_pubkey_hash(&self) -> Result<PubKeyHash> {
        let bytes = hex::decode(&self.0)
            .map_err(|e| LedgerError::InvalidAddress(format!("{}: {}", self.0, e)))?;

        bytes
            .try_into()
            .map_err(|bytes: Vec<u8>| {
                LedgerError::InvalidAddress(format!("{}: expected 20 bytes, got {}", self.0, bytes.len()))
            })
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Serializable key pair (for storage)
#[derive(Serialize, Deserialize)]
struct StoredKey {
    secret_key: String,
}

/// P-256 key pair
#[derive(Clone)]
pub struct KeyPair {
    pub signing_key: SigningKey,
    /// Raw 64-byte X || Y
    pub public_key: Vec<u8>,
    pub address: Address,
}

impl KeyPair {
    /// Generate a new key pair
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::random(&mut OsRng))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let public_key = encode_public_key(signing_key.verifying_key());
        let address = Address::from_pubkey_hash(&hash160(&public_key));
        Self {
            signing_key,
            public_key,
            address,
        }
    }

    /// Create from secret key bytes
    fn from_secret_bytes(bytes: &[u8]) -> Result<Self> {
        let signing_key = SigningKey::from_slice(bytes)
            .map_err(|e| LedgerError::Keystore(format!("Invalid secret key: {}", e)))?;
        Ok(Self::from_signing_key(signing_key))
    }

    fn to_stored(&self) -> StoredKey {
        StoredKey {
            secret_key: hex::encode(self.signing_key.to_bytes()),
        }
    }

    pub fn pubkey_hash(&self) -> PubKeyHash {
        hash160(&self.public_key)
    }
}

#[derive(Serialize, Deserialize, Default)]
struct StoredKeystore {
    keys: BTreeMap<Address, StoredKey>,
}

/// Keystore - the node's key pairs indexed by address
#[derive(Default)]
pub struct Keystore {
    keys: BTreeMap<Address, KeyPair>,
}

impl Keystore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a new address
    pub fn new_address(&mut self) -> Address {
        let keypair = KeyPair::generate();
        let address = keypair.address.clone();
        self.keys.insert(address.clone(), keypair);
        address
    }

    /// Get key pair for address
    pub fn get_keypair(&self, address: &Address) -> Option<&KeyPair> {
        self.keys.get(address)
    }

    /// All addresses, sorted
    pub fn list_addresses(&self) -> Vec<Address> {
        self.keys.keys().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.keys.len()
    }

    /// Save keystore to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let data = StoredKeystore {
            keys: self
                .keys
                .iter()
                .map(|(addr, kp)| (addr.clone(), kp.to_stored()))
                .collect(),
        };

        let json = serde_json::to_string_pretty(&data)
            .map_err(|e| LedgerError::Keystore(format!("Failed to serialize keystore: {}", e)))?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)
                .map_err(|e| LedgerError::Keystore(format!("Failed to create keystore directory: {}", e)))?;
        }
        fs::write(path, json)
            .map_err(|e| LedgerError::Keystore(format!("Failed to write keystore file: {}", e)))?;

        Ok(())
    }

    /// Load keystore from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(path)
            .map_err(|e| LedgerError::Keystore(format!("Failed to read keystore file: {}", e)))?;

        let data: StoredKeystore = serde_json::from_str(&json)
            .map_err(|e| LedgerError::Keystore(format!("Failed to deserialize keystore: {}", e)))?;

        let mut keys = BTreeMap::new();
        for (addr, stored) in data.keys {
            let secret = hex::decode(&stored.secret_key)
                .map_err(|e| LedgerError::Keystore(format!("Invalid secret key for {}: {}", addr, e)))?;
            let kp = KeyPair::from_secret_bytes(&secret)?;
            if kp.address != addr {
                return Err(LedgerError::Keystore(format!("Key does not match address {}", addr)));
            }
            keys.insert(addr, kp);
        }

        Ok(Self { keys })
    }

    /// Load the keystore at `path`, or start an empty one if none exists yet
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_generation() {
        let kp = KeyPair::generate();

        assert_eq!(kp.public_key.len(), 64);
        assert_eq!(kp.address.as_str().len(), 40);
        assert_eq!(kp.address.to_pubkey_hash().unwrap(), kp.pubkey_hash());
    }

    #[test]
    fn test_address_conversion() {
        let hash = [0x12; 20];
        let addr = Address::from_pubkey_hash(&hash);

        let decoded = addr.to_pubkey_hash().unwrap();
        assert_eq!(hash, decoded);
    }

    #[test]
    fn test_invalid_addresses() {
        assert!(Address::from("not-hex").to_pubkey_hash().is_err());
        assert!(matches!(
            Address::from("abcd").to_pubkey_hash(),
            Err(LedgerError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_keystore() {
        let mut ks = Keystore::new();
        assert_eq!(ks.count(), 0);

        let addr1 = ks.new_address();
        let addr2 = ks.new_address();
        assert_eq!(ks.count(), 2);

        assert!(ks.get_keypair(&addr1).is_some());
        assert!(ks.get_keypair(&addr2).is_some());
        assert_eq!(ks.list_addresses().len(), 2);
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir()
            .join(format!("ledger-node-keystore-{}", std::process::id()))
            .join("wallets.json");

        let mut ks = Keystore::new();
        let addr = ks.new_address();
        ks.save(&path).unwrap();

        let loaded = Keystore::load(&path).unwrap();
        let original = ks.get_keypair(&addr).unwrap();
        let restored = loaded.get_keypair(&addr).unwrap();
        assert_eq!(original.public_key, restored.public_key);
        assert_eq!(original.signing_key.to_bytes(), restored.signing_key.to_bytes());

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let path = std::env::temp_dir().join("ledger-node-no-such-keystore.json");
        let ks = Keystore::load_or_default(&path).unwrap();
        assert_eq!(ks.count(), 0);
    }
}
