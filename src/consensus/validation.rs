// Structural validation of blocks received from peers

use crate::consensus::pow::ProofOfWork;
use crate::core::Block;
use crate::error::LedgerError;

/// Block validator
///
/// Checks what can be checked without the block's ancestors: the PoW seal,
/// each transaction's identity, coinbase shape and that every other
/// transaction spends something. Signatures are not
/// re-verified here because peers deliver blocks tip-first.
pub struct BlockValidator {
    pow: ProofOfWork,
}

impl BlockValidator {
    /// Create a new block validator with fixed difficulty
    pub fn new(difficulty: u32) -> Self {
        Self {
            pow: ProofOfWork::new(difficulty),
        }
    }

    /// Validate a complete block
    pub fn validate_block(&self, block: &Block) -> Result<(), LedgerError> {
        if block.transactions.is_empty() {
            return Err(LedgerError::MalformedBlock {
                hash: block.hash,
                reason: "block has no transactions",
            });
        }

        // Only one coinbase per block
        let coinbase_count = block.transactions.iter().filter(|tx| tx.is_coinbase()).count();
        if coinbase_count > 1 {
            return Err(LedgerError::MalformedBlock {
                hash: block.hash,
                reason: "more than one coinbase transaction",
            });
        }

        if block
            .transactions
            .iter()
            .any(|tx| !tx.is_coinbase() && tx.inputs.is_empty())
        {
            return Err(LedgerError::MalformedBlock {
                hash: block.hash,
                reason: "spend transaction without inputs",
            });
        }

        if block.is_genesis() && block.height != 0 {
            return Err(LedgerError::MalformedBlock {
                hash: block.hash,
                reason: "block without parent must have height 0",
            });
        }

        if let Some(tx) = block.transactions.iter().find(|tx| !tx.has_valid_id()) {
            return Err(LedgerError::IdentityMismatch(tx.id));
        }

        if !self.pow.validate(block) {
            return Err(LedgerError::InvalidProofOfWork(block.hash));
        }

        Ok(())
    }
}
