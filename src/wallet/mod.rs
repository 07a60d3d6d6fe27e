// Wallet and transaction building

mod keystore;
mod tx_builder;

pub use keystore::{Address, KeyPair, Keystore};
pub use tx_builder::TransactionBuilder;
