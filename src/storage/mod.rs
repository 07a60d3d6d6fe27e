// Storage layer: block store, chain tip and UTXO index in one sled database

mod ledger;
mod utxo_set;

pub use ledger::{BlockStatus, ChainIterator, Ledger, GENESIS_MEMO, TIP_KEY};
pub use utxo_set::{UnspentOutputs, UtxoSet, UTXO_PREFIX};

use crate::consensus::CancelToken;
use crate::core::{Block, Transaction};
use crate::error::{LedgerError, Result};
use std::io;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

/// Delay before the single retry when another process holds the store
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Storage manager - ledger and UTXO set over a shared sled database.
///
/// Tip changes and UTXO index writes that must agree with each other go
/// through the methods here, which serialize them on one lock.
pub struct Storage {
    pub ledger: Ledger,
    pub utxo_set: UtxoSet,
    index_lock: Mutex<()>,
}

fn is_lock_error(err: &sled::Error) -> bool {
    match err {
        sled::Error::Io(e) => e.kind() == io::ErrorKind::WouldBlock || e.to_string().contains("lock"),
        _ => false,
    }
}

/// Open a sled database, retrying once if it is locked by another process
pub fn open_db<P: AsRef<Path>>(path: P) -> Result<sled::Db> {
    match sled::open(path.as_ref()) {
        Ok(db) => Ok(db),
        Err(e) if is_lock_error(&e) => {
            log::warn!("Database {} is locked, retrying: {}", path.as_ref().display(), e);
            thread::sleep(LOCK_RETRY_DELAY);
            Ok(sled::open(path.as_ref())?)
        }
        Err(e) => Err(e.into()),
    }
}

impl Storage {
    /// Open (or create) the store at `path`. The chain itself may still be
    /// uninitialized.
    pub fn open<P: AsRef<Path>>(path: P, difficulty: u32) -> Result<Self> {
        Ok(Self::from_db(open_db(path)?, difficulty))
    }

    /// Open a store whose chain must already exist
    pub fn open_existing<P: AsRef<Path>>(path: P, difficulty: u32) -> Result<Self> {
        let storage = Self::open(path, difficulty)?;
        if !storage.ledger.is_initialized()? {
            return Err(LedgerError::Uninitialized);
        }
        Ok(storage)
    }

    /// Create a temporary storage (for testing)
    pub fn memory(difficulty: u32) -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self::from_db(db, difficulty))
    }

    fn from_db(db: sled::Db, difficulty: u32) -> Self {
        Self {
            ledger: Ledger::new(db.clone(), difficulty),
            utxo_set: UtxoSet::new(db),
            index_lock: Mutex::new(()),
        }
    }

    fn lock_index(&self) -> MutexGuard<'_, ()> {
        self.index_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mine `transactions` on the current tip, then commit and index the
    /// block. Fails with `StaleBlock`, leaving the index untouched, if
    /// another block took the tip during mining.
    pub fn mine_block(&self, transactions: Vec<Transaction>, cancel: &CancelToken) -> Result<Block> {
        let block = self.ledger.seal_block(transactions, cancel)?;
        self.commit_mined(&block)?;
        Ok(block)
    }

    fn commit_mined(&self, block: &Block) -> Result<()> {
        let _guard = self.lock_index();
        self.ledger.commit_mined(block)?;

        if let Err(e) = self.utxo_set.update(block) {
            if !e.is_rejection() {
                return Err(e);
            }
            log::warn!("Index update for block {} failed ({}), rebuilding", block.hash, e);
            self.utxo_set.reindex(&self.ledger)?;
        }
        Ok(())
    }

    /// Store a block from a peer; the index is rebuilt separately once
    /// syncing settles
    pub fn add_block(&self, block: &Block) -> Result<BlockStatus> {
        let _guard = self.lock_index();
        self.ledger.add_block(block)
    }

    /// Rebuild the UTXO index from the best chain
    pub fn reindex(&self) -> Result<usize> {
        let _guard = self.lock_index();
        self.utxo_set.reindex(&self.ledger)
    }

    /// Persist everything written so far
    pub fn flush(&self) -> Result<()> {
        self.ledger.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::{Address, Keystore, TransactionBuilder};

    #[test]
    fn test_reopen_keeps_chain() {
        let dir = std::env::temp_dir().join(format!("ledger-node-storage-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);

        let genesis = {
            let storage = Storage::open(&dir, 8).unwrap();
            let genesis = storage.ledger.create(&[1u8; 20]).unwrap();
            storage.flush().unwrap();
            genesis
        };

        let storage = Storage::open(&dir, 8).unwrap();
        assert_eq!(storage.ledger.tip_hash().unwrap(), genesis.hash);
        drop(storage);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_open_existing_requires_chain() {
        let dir = std::env::temp_dir().join(format!("ledger-node-empty-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);

        assert!(matches!(Storage::open_existing(&dir, 8), Err(LedgerError::Uninitialized)));
        let _ = std::fs::remove_dir_all(&dir);
    }

    fn funded_wallet(storage: &Storage) -> (Keystore, Address) {
        let mut keystore = Keystore::new();
        let alice = keystore.new_address();
        storage.ledger.create(&alice.to_pubkey_hash().unwrap()).unwrap();
        storage.reindex().unwrap();
        (keystore, alice)
    }

    #[test]
    fn test_mine_block_indexes_new_tip() {
        let storage = Storage::memory(8).unwrap();
        let (keystore, alice) = funded_wallet(&storage);
        let bob = Address::from_pubkey_hash(&[8u8; 20]);

        let tx = TransactionBuilder::new(&keystore, &storage).build(&alice, &bob, 30).unwrap();
        let coinbase = Transaction::coinbase(&alice.to_pubkey_hash().unwrap(), None);
        let block = storage.mine_block(vec![coinbase, tx], &CancelToken::new()).unwrap();

        assert_eq!(storage.ledger.tip_hash().unwrap(), block.hash);
        assert_eq!(storage.utxo_set.balance(&[8u8; 20]).unwrap(), 30);
    }

    #[test]
    fn test_stale_mined_block_leaves_index_on_best_chain() {
        let storage = Storage::memory(8).unwrap();
        let (keystore, alice) = funded_wallet(&storage);
        let alice_pkh = alice.to_pubkey_hash().unwrap();
        let bob = Address::from_pubkey_hash(&[8u8; 20]);
        let cancel = CancelToken::new();

        let tx = TransactionBuilder::new(&keystore, &storage).build(&alice, &bob, 30).unwrap();
        let local = storage
            .ledger
            .seal_block(vec![Transaction::coinbase(&alice_pkh, None), tx], &cancel)
            .unwrap();

        // A peer block at the same height arrives before the local commit
        let rival = storage
            .ledger
            .seal_block(vec![Transaction::coinbase(&[9u8; 20], None)], &cancel)
            .unwrap();
        assert_eq!(storage.add_block(&rival).unwrap(), BlockStatus::NewTip);
        storage.reindex().unwrap();

        assert!(matches!(
            storage.commit_mined(&local),
            Err(LedgerError::StaleBlock(hash)) if hash == local.hash
        ));
        assert_eq!(storage.ledger.tip_hash().unwrap(), rival.hash);

        let indexed = storage.utxo_set.snapshot().unwrap();
        assert_eq!(storage.utxo_set.balance(&[8u8; 20]).unwrap(), 0);
        assert_eq!(storage.utxo_set.balance(&alice_pkh).unwrap(), crate::core::SUBSIDY);
        storage.reindex().unwrap();
        assert_eq!(storage.utxo_set.snapshot().unwrap(), indexed);
    }

    #[test]
    fn test_ledger_and_utxo_share_store() {
        let storage = Storage::memory(8).unwrap();
        storage.ledger.create(&[1u8; 20]).unwrap();
        assert_eq!(storage.reindex().unwrap(), 1);
        // UTXO keys never collide with block keys or the tip key
        assert_eq!(storage.ledger.block_hashes().unwrap().len(), 1);
    }
}
