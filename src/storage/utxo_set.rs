// UTXO (Unspent Transaction Output) index keyed by transaction id

use crate::core::serialize::{expect_consumed, read_len, read_u32, write_varint};
use crate::core::{Block, CodecError, Hash256, PubKeyHash, Serializable, Transaction, TxOutput};
use crate::error::{LedgerError, Result};
use crate::storage::Ledger;
use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult};
use sled::{Batch, Db};
use std::collections::BTreeMap;
use std::io::Cursor;

/// Key prefix of every UTXO record
pub const UTXO_PREFIX: &[u8] = b"utxo-";

/// Writes per sled batch during reindex
const BATCH_SIZE: usize = 1000;

/// Unspent outputs of one transaction, each paired with its index in the
/// original output list so input references stay valid after removals
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnspentOutputs {
    pub outputs: Vec<(u32, TxOutput)>,
}

impl UnspentOutputs {
    /// Every output of a freshly confirmed transaction
    pub fn from_transaction(tx: &Transaction) -> Self {
        Self {
            outputs: tx
                .outputs
                .iter()
                .cloned()
                .enumerate()
                .map(|(index, output)| (index as u32, output))
                .collect(),
        }
    }

    /// Drop the output at original index `index`; false if it is not present
    pub fn remove(&mut self, index: u32) -> bool {
        let before = self.outputs.len();
        self.outputs.retain(|(i, _)| *i != index);
        self.outputs.len() != before
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}

impl Serializable for UnspentOutputs {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        let _ = write_varint(&mut buf, self.outputs.len() as u64);
        for (index, output) in &self.outputs {
            buf.extend_from_slice(&index.to_le_bytes());
            let _ = output.write_to(&mut buf);
        }
        buf
    }

    fn deserialize(data: &[u8]) -> std::result::Result<Self, CodecError> {
        let mut cursor = Cursor::new(data);
        let count = read_len(&mut cursor)?;
        let mut outputs = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let index = read_u32(&mut cursor)?;
            outputs.push((index, TxOutput::read_from(&mut cursor)?));
        }
        expect_consumed(&cursor)?;
        Ok(Self { outputs })
    }
}

/// Derived index over the ledger's unspent outputs, sharing its sled store
pub struct UtxoSet {
    db: Db,
}

impl UtxoSet {
    pub(crate) fn new(db: Db) -> Self {
        Self { db }
    }

    fn key(txid: &Hash256) -> Vec<u8> {
        let mut key = Vec::with_capacity(UTXO_PREFIX.len() + 32);
        key.extend_from_slice(UTXO_PREFIX);
        key.extend_from_slice(txid.as_bytes());
        key
    }

    fn txid_from_key(key: &[u8]) -> Result<Hash256> {
        Hash256::from_slice(&key[UTXO_PREFIX.len()..])
            .map_err(|e| LedgerError::Codec(CodecError::Invalid(e)))
    }

    /// Iterate over `(txid, record)` pairs in key order
    fn records(&self) -> impl Iterator<Item = Result<(Hash256, UnspentOutputs)>> + '_ {
        self.db.scan_prefix(UTXO_PREFIX).map(|item| -> Result<(Hash256, UnspentOutputs)> {
            let (key, value) = item?;
            Ok((Self::txid_from_key(&key)?, UnspentOutputs::deserialize(&value)?))
        })
    }

    /// Get the unspent outputs of one transaction
    pub fn get(&self, txid: &Hash256) -> Result<Option<UnspentOutputs>> {
        match self.db.get(Self::key(txid))? {
            Some(data) => Ok(Some(UnspentOutputs::deserialize(&data)?)),
            None => Ok(None),
        }
    }

    /// Snapshot of the whole index, for comparisons between nodes
    pub fn snapshot(&self) -> Result<BTreeMap<Hash256, UnspentOutputs>> {
        self.records().collect()
    }

    /// Greedily collect outputs locked to `pub_key_hash`, in key order,
    /// until at least `amount` is gathered
    pub fn find_spendable_outputs(
        &self,
        pub_key_hash: &PubKeyHash,
        amount: u64,
    ) -> Result<(u64, BTreeMap<Hash256, Vec<u32>>)> {
        let mut accumulated = 0u64;
        let mut selected: BTreeMap<Hash256, Vec<u32>> = BTreeMap::new();

        'records: for record in self.records() {
            let (txid, unspent) = record?;
            for (index, output) in unspent.outputs {
                if accumulated >= amount {
                    break 'records;
                }
                if output.is_locked_with_key(pub_key_hash) {
                    accumulated = accumulated.saturating_add(output.value);
                    selected.entry(txid).or_default().push(index);
                }
            }
        }

        Ok((accumulated, selected))
    }

    /// Every unspent output locked to `pub_key_hash`
    pub fn find_utxo(&self, pub_key_hash: &PubKeyHash) -> Result<Vec<TxOutput>> {
        let mut found = Vec::new();
        for record in self.records() {
            let (_, unspent) = record?;
            found.extend(
                unspent
                    .outputs
                    .into_iter()
                    .map(|(_, output)| output)
                    .filter(|output| output.is_locked_with_key(pub_key_hash)),
            );
        }
        Ok(found)
    }

    pub fn balance(&self, pub_key_hash: &PubKeyHash) -> Result<u64> {
        Ok(self
            .find_utxo(pub_key_hash)?
            .iter()
            .fold(0u64, |sum, out| sum.saturating_add(out.value)))
    }

    /// Number of transactions with at least one unspent output
    pub fn count_transactions(&self) -> Result<usize> {
        let mut count = 0;
        for item in self.db.scan_prefix(UTXO_PREFIX) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    /// Whether every input of `tx` claims an output still in the index
    pub fn is_spendable(&self, tx: &Transaction) -> Result<bool> {
        if tx.is_coinbase() {
            return Ok(true);
        }
        if tx.inputs.is_empty() {
            return Ok(false);
        }
        for input in &tx.inputs {
            let (Some(txid), Ok(index)) = (input.txid, u32::try_from(input.out)) else {
                return Ok(false);
            };
            match self.get(&txid)? {
                Some(unspent) if unspent.outputs.iter().any(|(i, _)| *i == index) => {}
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    /// Remove every UTXO record in bounded batches
    fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        loop {
            let mut batch = Batch::default();
            let mut pending = 0;
            for item in self.db.scan_prefix(UTXO_PREFIX).keys().take(BATCH_SIZE) {
                batch.remove(item?);
                pending += 1;
            }
            if pending == 0 {
                return Ok(removed);
            }
            self.db.apply_batch(batch)?;
            removed += pending;
        }
    }

    /// Rebuild the index from the best chain, returning the number of records
    pub fn reindex(&self, ledger: &Ledger) -> Result<usize> {
        let removed = self.clear()?;

        let mut batch = Batch::default();
        let mut pending = 0;
        let mut written = 0;

        ledger.for_each_unspent(|txid, outputs| {
            batch.insert(Self::key(&txid), UnspentOutputs { outputs }.serialize());
            pending += 1;
            written += 1;
            if pending == BATCH_SIZE {
                self.db.apply_batch(std::mem::take(&mut batch))?;
                pending = 0;
            }
            Ok(())
        })?;

        if pending > 0 {
            self.db.apply_batch(batch)?;
        }

        log::info!("Reindexed UTXO set: removed {} records, wrote {}", removed, written);
        Ok(written)
    }

    /// Apply a newly accepted block: consume the outputs its inputs spend and
    /// add every transaction's outputs. All or nothing.
    pub fn update(&self, block: &Block) -> Result<()> {
        self.db.transaction(|tx_db| -> ConflictableTransactionResult<(), LedgerError> {
            for tx in &block.transactions {
                if !tx.is_coinbase() {
                    for input in &tx.inputs {
                        let missing = || {
                            ConflictableTransactionError::Abort(LedgerError::MissingUtxo {
                                txid: input.txid.unwrap_or_default(),
                                index: input.out,
                            })
                        };
                        let txid = input.txid.ok_or_else(missing)?;
                        let index = u32::try_from(input.out).map_err(|_| missing())?;
                        let key = Self::key(&txid);

                        let raw = tx_db.get(&key)?.ok_or_else(missing)?;
                        let mut unspent = UnspentOutputs::deserialize(&raw)
                            .map_err(|e| ConflictableTransactionError::Abort(e.into()))?;
                        if !unspent.remove(index) {
                            return Err(missing());
                        }

                        if unspent.is_empty() {
                            tx_db.remove(key)?;
                        } else {
                            tx_db.insert(key, unspent.serialize())?;
                        }
                    }
                }

                tx_db.insert(Self::key(&tx.id), UnspentOutputs::from_transaction(tx).serialize())?;
            }
            Ok(())
        })?;

        log::debug!("Applied block {} to UTXO set", block.hash);
        Ok(())
    }
}
