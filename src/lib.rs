// Minimal UTXO ledger node: proof-of-work chain, sled storage and peer sync

pub mod cli;
pub mod config;
pub mod consensus;
pub mod core;
pub mod error;
pub mod network;
pub mod storage;
pub mod wallet;

// Re-exports for convenience
pub use cli::{Cli, CliError, CliHandler, Commands};
pub use config::{ConfigError, NodeConfig};
pub use consensus::{BlockValidator, CancelToken, ProofOfWork, Target};
pub use core::{Block, Hash256, Transaction, TxInput, TxOutput};
pub use error::{LedgerError, Result};
pub use network::{Message, NetworkError, Node, Peer};
pub use storage::{BlockStatus, Ledger, Storage, UtxoSet};
pub use wallet::{Address, Keystore, TransactionBuilder};
