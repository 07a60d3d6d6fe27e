// Block store and chain tip using sled

use crate::consensus::{BlockValidator, CancelToken, ProofOfWork};
use crate::core::{Block, CodecError, Hash256, PubKeyHash, Serializable, Transaction, TxOutput};
use crate::error::{LedgerError, Result};
use p256::ecdsa::SigningKey;
use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult};
use sled::Db;
use std::collections::{HashMap, HashSet};

/// Key holding the hash of the best block
pub const TIP_KEY: &[u8] = b"lh";

/// Coinbase memo of the genesis block
pub const GENESIS_MEMO: &str = "First Transaction from Genesis";

/// What happened when a block was committed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    /// Already stored; nothing changed
    Known,
    /// Stored, but not higher than the current tip
    Stored,
    /// Stored and now the tip
    NewTip,
}

/// Append-only block store with a height-only fork choice
pub struct Ledger {
    db: Db,
    pow: ProofOfWork,
    validator: BlockValidator,
}

fn decode_hash(raw: &[u8]) -> Result<Hash256> {
    Hash256::from_slice(raw).map_err(|e| LedgerError::Codec(CodecError::Invalid(e)))
}

fn abort<T>(err: impl Into<LedgerError>) -> ConflictableTransactionResult<T, LedgerError> {
    Err(ConflictableTransactionError::Abort(err.into()))
}

impl Ledger {
    pub(crate) fn new(db: Db, difficulty: u32) -> Self {
        Self {
            db,
            pow: ProofOfWork::new(difficulty),
            validator: BlockValidator::new(difficulty),
        }
    }

    pub fn difficulty(&self) -> u32 {
        self.pow.difficulty()
    }

    /// Whether a tip has been recorded
    pub fn is_initialized(&self) -> Result<bool> {
        Ok(self.db.contains_key(TIP_KEY)?)
    }

    /// Mine and store the genesis block paying the subsidy to `address`
    pub fn create(&self, address: &PubKeyHash) -> Result<Block> {
        if self.is_initialized()? {
            return Err(LedgerError::AlreadyInitialized);
        }

        let coinbase = Transaction::coinbase(address, Some(GENESIS_MEMO));
        let genesis = self.pow.mine_block(vec![coinbase], None, 0, &CancelToken::new())?;
        let serialized = genesis.serialize();
        let key = genesis.hash.as_bytes().as_slice();

        // Another process may have initialized the store while we mined
        self.db.transaction(|tx_db| -> ConflictableTransactionResult<(), LedgerError> {
            if tx_db.get(TIP_KEY)?.is_some() {
                return abort(LedgerError::AlreadyInitialized);
            }
            tx_db.insert(key, serialized.as_slice())?;
            tx_db.insert(TIP_KEY, key)?;
            Ok(())
        })?;

        log::info!("Created genesis block {}", genesis.hash);
        Ok(genesis)
    }

    /// Hash of the best block
    pub fn tip_hash(&self) -> Result<Hash256> {
        match self.db.get(TIP_KEY)? {
            Some(raw) => decode_hash(&raw),
            None => Err(LedgerError::Uninitialized),
        }
    }

    /// The best block
    pub fn tip(&self) -> Result<Block> {
        self.get_block(&self.tip_hash()?)
    }

    /// Height of the best block
    pub fn best_height(&self) -> Result<u64> {
        Ok(self.tip()?.height)
    }

    /// Get a block by hash
    pub fn get_block(&self, hash: &Hash256) -> Result<Block> {
        match self.db.get(hash.as_bytes())? {
            Some(data) => Ok(Block::deserialize(&data)?),
            None => Err(LedgerError::NotFound(*hash)),
        }
    }

    pub fn has_block(&self, hash: &Hash256) -> Result<bool> {
        Ok(self.db.contains_key(hash.as_bytes())?)
    }

    /// Hashes of the best chain, tip first
    pub fn block_hashes(&self) -> Result<Vec<Hash256>> {
        self.iter()?.map(|block| block.map(|b| b.hash)).collect()
    }

    /// Walk the best chain from the tip back to genesis
    pub fn iter(&self) -> Result<ChainIterator<'_>> {
        Ok(self.iter_from(self.tip_hash()?))
    }

    /// Walk back from an arbitrary stored block
    pub fn iter_from(&self, hash: Hash256) -> ChainIterator<'_> {
        ChainIterator {
            ledger: self,
            next: Some(hash),
        }
    }

    /// Linear search of the best chain for a transaction
    pub fn find_transaction(&self, id: &Hash256) -> Result<Transaction> {
        for block in self.iter()? {
            if let Some(tx) = block?.transactions.into_iter().find(|tx| tx.id == *id) {
                return Ok(tx);
            }
        }
        Err(LedgerError::DanglingReference(*id))
    }

    /// Resolve every transaction referenced by `tx`'s inputs
    fn previous_transactions(&self, tx: &Transaction) -> Result<HashMap<Hash256, Transaction>> {
        let mut prev_txs = HashMap::new();
        for input in &tx.inputs {
            let Some(txid) = input.txid else { continue };
            if !prev_txs.contains_key(&txid) {
                prev_txs.insert(txid, self.find_transaction(&txid)?);
            }
        }
        Ok(prev_txs)
    }

    pub fn sign_transaction(&self, tx: &mut Transaction, key: &SigningKey) -> Result<()> {
        if tx.is_coinbase() {
            return Ok(());
        }
        let prev_txs = self.previous_transactions(tx)?;
        tx.sign(key, &prev_txs)
    }

    pub fn verify_transaction(&self, tx: &Transaction) -> Result<bool> {
        if tx.is_coinbase() {
            return Ok(true);
        }
        let prev_txs = self.previous_transactions(tx)?;
        tx.verify(&prev_txs)
    }

    /// Verify, seal and store a block on top of the current tip
    pub fn mine_block(&self, transactions: Vec<Transaction>, cancel: &CancelToken) -> Result<Block> {
        let block = self.seal_block(transactions, cancel)?;
        self.commit_mined(&block)?;
        Ok(block)
    }

    /// Verify the transactions and run proof-of-work on top of the current
    /// tip without storing the result
    pub fn seal_block(&self, transactions: Vec<Transaction>, cancel: &CancelToken) -> Result<Block> {
        for tx in &transactions {
            if !self.verify_transaction(tx)? {
                return Err(LedgerError::InvalidTransaction(tx.id));
            }
        }

        let tip = self.tip()?;
        self.pow
            .mine_block(transactions, Some(tip.hash), tip.height + 1, cancel)
    }

    /// Store a sealed block, which must become the new tip. If another
    /// block took the tip while it was being mined, it is kept off the best
    /// chain and `StaleBlock` is returned.
    pub fn commit_mined(&self, block: &Block) -> Result<()> {
        match self.commit_block(block)? {
            BlockStatus::NewTip => Ok(()),
            status => {
                log::warn!("Mined block {} did not become the tip ({:?})", block.hash, status);
                Err(LedgerError::StaleBlock(block.hash))
            }
        }
    }

    /// Store a block received from elsewhere after structural checks.
    /// The tip moves only if the block is strictly higher.
    pub fn add_block(&self, block: &Block) -> Result<BlockStatus> {
        if self.has_block(&block.hash)? {
            return Ok(BlockStatus::Known);
        }
        self.validator.validate_block(block)?;
        self.commit_block(block)
    }

    /// Insert the block and conditionally move the tip in one transaction
    fn commit_block(&self, block: &Block) -> Result<BlockStatus> {
        let serialized = block.serialize();
        let key = block.hash.as_bytes().as_slice();

        let status = self.db.transaction(|tx_db| -> ConflictableTransactionResult<BlockStatus, LedgerError> {
            if tx_db.get(key)?.is_some() {
                return Ok(BlockStatus::Known);
            }
            tx_db.insert(key, serialized.as_slice())?;

            let advance = match tx_db.get(TIP_KEY)? {
                None => true,
                Some(tip_key) => {
                    let Some(raw) = tx_db.get(&tip_key)? else {
                        return match decode_hash(&tip_key) {
                            Ok(hash) => abort(LedgerError::NotFound(hash)),
                            Err(e) => abort(e),
                        };
                    };
                    match Block::deserialize(&raw) {
                        Ok(tip) => block.height > tip.height,
                        Err(e) => return abort(e),
                    }
                }
            };

            if advance {
                tx_db.insert(TIP_KEY, key)?;
                Ok(BlockStatus::NewTip)
            } else {
                Ok(BlockStatus::Stored)
            }
        })?;

        log::debug!("Committed block {} at height {}: {:?}", block.hash, block.height, status);
        Ok(status)
    }

    /// Walk the chain and report every transaction's unspent outputs,
    /// paired with their original index. Spends are collected per block
    /// before its outputs are reported.
    pub fn for_each_unspent<F>(&self, mut visit: F) -> Result<()>
    where
        F: FnMut(Hash256, Vec<(u32, TxOutput)>) -> Result<()>,
    {
        let mut spent: HashMap<Hash256, HashSet<i32>> = HashMap::new();

        for block in self.iter()? {
            let block = block?;

            for tx in block.transactions.iter().filter(|tx| !tx.is_coinbase()) {
                for input in &tx.inputs {
                    if let Some(txid) = input.txid {
                        spent.entry(txid).or_default().insert(input.out);
                    }
                }
            }

            for tx in block.transactions {
                let spent_here = spent.remove(&tx.id).unwrap_or_default();
                let unspent: Vec<(u32, TxOutput)> = tx
                    .outputs
                    .into_iter()
                    .enumerate()
                    .filter(|(index, _)| !spent_here.contains(&(*index as i32)))
                    .map(|(index, output)| (index as u32, output))
                    .collect();

                if !unspent.is_empty() {
                    visit(tx.id, unspent)?;
                }
            }
        }

        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

/// Restartable walk from a block back to genesis; stops after the first error
pub struct ChainIterator<'a> {
    ledger: &'a Ledger,
    next: Option<Hash256>,
}

impl Iterator for ChainIterator<'_> {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        let hash = self.next.take()?;
        match self.ledger.get_block(&hash) {
            Ok(block) => {
                self.next = block.prev_hash;
                Some(Ok(block))
            }
            Err(e) => Some(Err(e)),
        }
    }
}
