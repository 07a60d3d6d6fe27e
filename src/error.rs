//! Error taxonomy for ledger operations

use crate::core::{CodecError, Hash256};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    // Consensus-fatal
    #[error("Block {0} does not satisfy the proof-of-work target")]
    InvalidProofOfWork(Hash256),
    #[error("Digest of {0} does not match its content")]
    IdentityMismatch(Hash256),
    #[error("Malformed block {hash}: {reason}")]
    MalformedBlock { hash: Hash256, reason: &'static str },

    // Authorization
    #[error("Transaction {0} failed signature verification")]
    InvalidTransaction(Hash256),

    // Missing dependency
    #[error("Previous transaction {0} not found")]
    DanglingReference(Hash256),
    #[error("Output {index} of transaction {txid} does not exist")]
    InvalidOutputIndex { txid: Hash256, index: i32 },

    // Resource
    #[error("Insufficient funds: have {available}, need {requested}")]
    InsufficientFunds { available: u64, requested: u64 },
    #[error("Invalid amount: {0}")]
    InvalidAmount(u64),

    // Chain state
    #[error("Block {0} not found")]
    NotFound(Hash256),
    #[error("No existing blockchain found, create one first")]
    Uninitialized,
    #[error("Blockchain already exists")]
    AlreadyInitialized,
    #[error("Output {index} of transaction {txid} is not unspent")]
    MissingUtxo { txid: Hash256, index: i32 },

    // Mining
    #[error("Nonce space exhausted without meeting the target")]
    MiningExhausted,
    #[error("Mining cancelled")]
    MiningCancelled,
    #[error("Mined block {0} lost the tip to another block")]
    StaleBlock(Hash256),

    // Storage and encoding
    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    // Keys and wallets
    #[error("Crypto error: {0}")]
    Crypto(String),
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Keystore error: {0}")]
    Keystore(String),
}

impl LedgerError {
    /// Errors that reject a single transaction or block but leave the node healthy
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            LedgerError::InvalidProofOfWork(_)
                | LedgerError::IdentityMismatch(_)
                | LedgerError::MalformedBlock { .. }
                | LedgerError::InvalidTransaction(_)
                | LedgerError::DanglingReference(_)
                | LedgerError::InvalidOutputIndex { .. }
                | LedgerError::InsufficientFunds { .. }
                | LedgerError::InvalidAmount(_)
                | LedgerError::MissingUtxo { .. }
        )
    }
}

impl From<sled::transaction::TransactionError<LedgerError>> for LedgerError {
    fn from(err: sled::transaction::TransactionError<LedgerError>) -> Self {
        match err {
            sled::transaction::TransactionError::Abort(e) => e,
            sled::transaction::TransactionError::Storage(e) => LedgerError::Storage(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_classification() {
        assert!(LedgerError::DanglingReference(Hash256::zero()).is_rejection());
        assert!(LedgerError::InsufficientFunds { available: 1, requested: 2 }.is_rejection());
        assert!(!LedgerError::Uninitialized.is_rejection());
        assert!(!LedgerError::MiningCancelled.is_rejection());
    }

    #[test]
    fn test_transaction_abort_is_flattened() {
        let err: LedgerError = sled::transaction::TransactionError::Abort(LedgerError::AlreadyInitialized).into();
        assert!(matches!(err, LedgerError::AlreadyInitialized));
    }

    #[test]
    fn test_insufficient_funds_message() {
        let err = LedgerError::InsufficientFunds { available: 40, requested: 100 };
        assert_eq!(err.to_string(), "Insufficient funds: have 40, need 100");
    }
}
