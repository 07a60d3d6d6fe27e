// Transaction builder

use crate::core::{Transaction, TxInput, TxOutput};
use crate::error::{LedgerError, Result};
use crate::storage::Storage;
use crate::wallet::{Address, Keystore};

/// Builds signed transfers from keystore keys against the UTXO index
pub struct TransactionBuilder<'a> {
    keystore: &'a Keystore,
    storage: &'a Storage,
}

impl<'a> TransactionBuilder<'a> {
    pub fn new(keystore: &'a Keystore, storage: &'a Storage) -> Self {
        Self { keystore, storage }
    }

    /// Build a signed transaction paying `amount` to `to`, with any change
    /// returned to `from`. Nothing is written.
    pub fn build(&self, from: &Address, to: &Address, amount: u64) -> Result<Transaction> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let keypair = self
            .keystore
            .get_keypair(from)
            .ok_or_else(|| LedgerError::Keystore(format!("Address {} not found in keystore", from)))?;
        let recipient = to.to_pubkey_hash()?;
        let sender = keypair.pubkey_hash();

        let (available, selected) = self
            .storage
            .utxo_set
            .find_spendable_outputs(&sender, amount)?;

        if available < amount {
            return Err(LedgerError::InsufficientFunds {
                available,
                requested: amount,
            });
        }

        let mut inputs = Vec::new();
        for (txid, indices) in selected {
            for index in indices {
                let out = i32::try_from(index).map_err(|_| LedgerError::InvalidOutputIndex {
                    txid,
                    index: i32::MAX,
                })?;
                inputs.push(TxInput::new(txid, out, keypair.public_key.clone()));
            }
        }

        let mut outputs = vec![TxOutput::new(amount, recipient)];
        if available > amount {
            outputs.push(TxOutput::new(available - amount, sender));
        }

        let mut tx = Transaction::new(inputs, outputs);
        self.storage
            .ledger
            .sign_transaction(&mut tx, &keypair.signing_key)?;

        log::debug!("Built transaction {} sending {} from {} to {}", tx.id, amount, from, to);
        Ok(tx)
    }

    /// Get balance for any well-formed address
    pub fn get_balance(&self, address: &Address) -> Result<u64> {
        self.storage.utxo_set.balance(&address.to_pubkey_hash()?)
    }
}
