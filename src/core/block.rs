// Block data structures

use crate::core::{Hash256, Transaction, Serializable, merkle_root};
use crate::core::serialize::{
    expect_consumed, read_hash, read_i64, read_len, read_u64, read_var_bytes, write_var_bytes,
    write_varint, CodecError,
};
use std::io::Cursor;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix time in seconds
pub fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Block - a batch of transactions linked to its parent and sealed by PoW
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Creation time (Unix epoch seconds)
    pub timestamp: i64,
    /// Proof-of-work digest
    pub hash: Hash256,
    pub transactions: Vec<Transaction>,
    /// Parent hash; `None` only for the genesis block
    pub prev_hash: Option<Hash256>,
    pub nonce: i64,
    /// Distance from genesis (genesis = 0)
    pub height: u64,
}

impl Block {
    /// Merkle commitment over the serialized transactions
    pub fn hash_transactions(transactions: &[Transaction]) -> Hash256 {
        let serialized: Vec<Vec<u8>> = transactions.iter().map(|tx| tx.serialize()).collect();
        merkle_root(&serialized)
    }

    pub fn merkle_root(&self) -> Hash256 {
        Self::hash_transactions(&self.transactions)
    }

    /// Check if this is the genesis block
    pub fn is_genesis(&self) -> bool {
        self.prev_hash.is_none()
    }
}

impl Serializable for Block {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();

        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(self.hash.as_bytes());
        let prev: &[u8] = match &self.prev_hash {
            Some(hash) => hash.as_bytes(),
            None => &[],
        };
        let _ = write_var_bytes(&mut buf, prev);
        buf.extend_from_slice(&self.nonce.to_le_bytes());
        buf.extend_from_slice(&self.height.to_le_bytes());

        let _ = write_varint(&mut buf, self.transactions.len() as u64);
        for tx in &self.transactions {
            tx.write_to(&mut buf);
        }

        buf
    }

    fn deserialize(data: &[u8]) -> Result<Self, CodecError> {
        let mut cursor = Cursor::new(data);

        let timestamp = read_i64(&mut cursor)?;
        let hash = read_hash(&mut cursor)?;
        let prev_bytes = read_var_bytes(&mut cursor)?;
        let prev_hash = match prev_bytes.len() {
            0 => None,
            _ => Some(Hash256::from_slice(&prev_bytes).map_err(CodecError::Invalid)?),
        };
        let nonce = read_i64(&mut cursor)?;
        let height = read_u64(&mut cursor)?;

        let tx_count = read_len(&mut cursor)?;
        let mut transactions = Vec::with_capacity(tx_count.min(1024));
        for _ in 0..tx_count {
            transactions.push(Transaction::from_reader(&mut cursor)?);
        }
        expect_consumed(&cursor)?;

        Ok(Self {
            timestamp,
            hash,
            transactions,
            prev_hash,
            nonce,
            height,
        })
    }
}
