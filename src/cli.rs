// CLI commands

use crate::config::{ConfigError, NodeConfig, DEFAULT_BOOTSTRAP, DEFAULT_DATA_DIR, DEFAULT_NODE_ID};
use crate::consensus::{CancelToken, ProofOfWork, DEFAULT_DIFFICULTY};
use crate::core::{Block, Transaction};
use crate::error::LedgerError;
use crate::network::{self, NetworkError, Node};
use crate::storage::Storage;
use crate::wallet::{Address, Keystore, TransactionBuilder};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Parser)]
#[command(name = "ledger-node")]
#[command(about = "Minimal UTXO ledger with proof-of-work and peer sync", long_about = None)]
pub struct Cli {
    /// Node id; doubles as the listening port
    #[arg(long, env = "NODE_ID", default_value = DEFAULT_NODE_ID, global = true)]
    pub node_id: String,

    /// Directory holding block stores and keystores
    #[arg(long, env = "LEDGER_DATA_DIR", default_value = DEFAULT_DATA_DIR, global = true)]
    pub data_dir: PathBuf,

    /// Primary node address
    #[arg(long, env = "LEDGER_BOOTSTRAP", default_value = DEFAULT_BOOTSTRAP, global = true)]
    pub bootstrap: String,

    /// Leading zero bits required of block hashes
    #[arg(long, default_value_t = DEFAULT_DIFFICULTY, global = true)]
    pub difficulty: u32,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a new key pair and print its address
    #[command(name = "createwallet")]
    CreateWallet,

    /// List the addresses in this node's keystore
    #[command(name = "listaddresses")]
    ListAddresses,

    /// Create a blockchain whose genesis reward goes to ADDRESS
    #[command(name = "createblockchain")]
    CreateBlockchain {
        #[arg(long)]
        address: String,
    },

    /// Get balance for an address
    #[command(name = "getbalance")]
    GetBalance {
        #[arg(long)]
        address: String,
    },

    /// Print every block from the tip back to genesis
    #[command(name = "printchain")]
    PrintChain,

    /// Rebuild the UTXO set from the chain
    #[command(name = "reindexutxo")]
    ReindexUtxo,

    /// Send coins
    #[command(name = "send")]
    Send {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: u64,
        /// Mine the transaction locally instead of relaying it
        #[arg(long)]
        mine: bool,
    },

    /// Run a network node
    #[command(name = "startnode")]
    StartNode {
        /// Enable mining with rewards paid to this address
        #[arg(long)]
        miner: Option<String>,
    },
}

#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// CLI handler
pub struct CliHandler {
    config: NodeConfig,
}

impl CliHandler {
    pub fn new(cli: &Cli) -> Result<Self, CliError> {
        let config = NodeConfig {
            node_id: cli.node_id.clone(),
            data_dir: cli.data_dir.clone(),
            bootstrap: cli.bootstrap.clone(),
            difficulty: cli.difficulty,
            ..Default::default()
        };
        config.validate()?;
        Ok(Self { config })
    }

    fn open_storage(&self) -> Result<Storage, LedgerError> {
        Storage::open_existing(self.config.db_path(), self.config.difficulty)
    }

    fn load_keystore(&self) -> Result<Keystore, LedgerError> {
        let path = self.config.wallet_path();
        log::debug!("Loading keystore from {}", path.display());
        Keystore::load_or_default(path)
    }

    fn parse_address(address: &str) -> Result<Address, LedgerError> {
        let address = Address::from(address);
        address.to_pubkey_hash()?;
        Ok(address)
    }

    /// Handle CLI command
    pub async fn handle(self, command: Commands) -> Result<(), CliError> {
        match command {
            Commands::CreateWallet => self.create_wallet()?,
            Commands::ListAddresses => self.list_addresses()?,
            Commands::CreateBlockchain { address } => self.create_blockchain(&address)?,
            Commands::GetBalance { address } => self.get_balance(&address)?,
            Commands::PrintChain => self.print_chain()?,
            Commands::ReindexUtxo => self.reindex_utxo()?,
            Commands::Send {
                from,
                to,
                amount,
                mine,
            } => self.send(&from, &to, amount, mine).await?,
            Commands::StartNode { miner } => self.start_node(miner).await?,
        }
        Ok(())
    }

    fn create_wallet(&self) -> Result<(), LedgerError> {
        let mut keystore = self.load_keystore()?;
        let address = keystore.new_address();
        keystore.save(self.config.wallet_path())?;
        println!("New address is: {}", address);
        Ok(())
    }

    fn list_addresses(&self) -> Result<(), LedgerError> {
        for address in self.load_keystore()?.list_addresses() {
            println!("{}", address);
        }
        Ok(())
    }

    fn create_blockchain(&self, address: &str) -> Result<(), LedgerError> {
        let address = Self::parse_address(address)?;
        let storage = Storage::open(self.config.db_path(), self.config.difficulty)?;

        let genesis = storage.ledger.create(&address.to_pubkey_hash()?)?;
        storage.reindex()?;
        storage.flush()?;

        println!("Genesis block {} created", genesis.hash);
        Ok(())
    }

    fn get_balance(&self, address: &str) -> Result<(), LedgerError> {
        let address = Self::parse_address(address)?;
        let storage = self.open_storage()?;
        let balance = storage.utxo_set.balance(&address.to_pubkey_hash()?)?;
        println!("Balance of {}: {}", address, balance);
        Ok(())
    }

    fn print_chain(&self) -> Result<(), LedgerError> {
        let storage = self.open_storage()?;
        let pow = ProofOfWork::new(self.config.difficulty);

        for block in storage.ledger.iter()? {
            let block = block?;
            Self::print_block(&block, pow.validate(&block));
        }
        Ok(())
    }

    fn reindex_utxo(&self) -> Result<(), LedgerError> {
        let storage = self.open_storage()?;
        storage.reindex()?;
        storage.flush()?;
        let count = storage.utxo_set.count_transactions()?;
        println!("Done! There are {} transactions in the UTXO set.", count);
        Ok(())
    }

    async fn send(&self, from: &str, to: &str, amount: u64, mine: bool) -> Result<(), CliError> {
        let from = Self::parse_address(from)?;
        let to = Self::parse_address(to)?;
        let storage = self.open_storage()?;
        let keystore = self.load_keystore()?;

        let tx = TransactionBuilder::new(&keystore, &storage).build(&from, &to, amount)?;

        if mine {
            let coinbase = Transaction::coinbase(&from.to_pubkey_hash()?, None);
            let block = storage.mine_block(vec![coinbase, tx], &CancelToken::new())?;
            storage.flush()?;
            println!("Mined block {} at height {}", block.hash, block.height);
        } else {
            network::send_transaction(
                &self.config.bootstrap,
                &self.config.node_address(),
                &tx,
                self.config.connect_timeout,
            )
            .await?;
            println!("Sent transaction {} to {}", tx.id, self.config.bootstrap);
        }

        println!("Success!");
        Ok(())
    }

    async fn start_node(&self, miner: Option<String>) -> Result<(), CliError> {
        if let Some(miner) = &miner {
            Self::parse_address(miner)?;
            println!("Mining is on. Address to receive rewards: {}", miner);
        }

        let config = NodeConfig {
            miner_address: miner,
            ..self.config.clone()
        };
        println!("Starting node {}", config.node_address());

        let storage = Arc::new(self.open_storage()?);
        let node = Arc::new(Node::new(config, storage)?);
        node.run().await?;
        Ok(())
    }

    fn print_block(block: &Block, pow_valid: bool) {
        println!("============ Block {} ============", block.hash);
        println!("Height: {}", block.height);
        match &block.prev_hash {
            Some(prev) => println!("Prev. hash: {}", prev),
            None => println!("Prev. hash: (genesis)"),
        }
        println!("Timestamp: {}", block.timestamp);
        println!("Nonce: {}", block.nonce);
        println!("PoW: {}", pow_valid);

        for tx in &block.transactions {
            println!("--- Transaction {}", tx.id);
            for (i, input) in tx.inputs.iter().enumerate() {
                match input.txid {
                    Some(txid) => println!("    Input {}: {}:{}", i, txid, input.out),
                    None => println!("    Input {}: coinbase", i),
                }
            }
            for (i, output) in tx.outputs.iter().enumerate() {
                println!("    Output {}: {} to {}", i, output.value, hex::encode(output.pub_key_hash));
            }
        }
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        let cli = Cli::try_parse_from([
            "ledger-node",
            "--node-id",
            "3001",
            "send",
            "--from",
            "aa",
            "--to",
            "bb",
            "--amount",
            "10",
            "--mine",
        ])
        .unwrap();

        assert_eq!(cli.node_id, "3001");
        assert!(matches!(
            cli.command,
            Commands::Send { amount: 10, mine: true, .. }
        ));
    }

    #[test]
    fn test_invalid_node_id_rejected() {
        let cli = Cli::try_parse_from(["ledger-node", "--node-id", "port", "printchain"]).unwrap();
        assert!(matches!(
            CliHandler::new(&cli),
            Err(CliError::Config(ConfigError::InvalidNodeId(_)))
        ));
    }

    #[tokio::test]
    async fn test_create_chain_and_send_locally() {
        let dir = std::env::temp_dir().join(format!("ledger-node-cli-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let dir_arg = dir.to_string_lossy().into_owned();
        let handler = |args: &[&str]| {
            let mut argv = vec!["ledger-node", "--data-dir", &dir_arg, "--difficulty", "8"];
            argv.extend_from_slice(args);
            let cli = Cli::try_parse_from(argv).unwrap();
            (CliHandler::new(&cli).unwrap(), cli.command)
        };

        let (h, cmd) = handler(&["createwallet"]);
        h.handle(cmd).await.unwrap();
        let (h, cmd) = handler(&["createwallet"]);
        h.handle(cmd).await.unwrap();

        let config = NodeConfig {
            data_dir: dir.clone(),
            ..Default::default()
        };
        let addresses = Keystore::load(config.wallet_path()).unwrap().list_addresses();
        let (alice, bob) = (addresses[0].to_string(), addresses[1].to_string());

        let (h, cmd) = handler(&["createblockchain", "--address", &alice]);
        h.handle(cmd).await.unwrap();
        let (h, cmd) = handler(&["send", "--from", &alice, "--to", &bob, "--amount", "40", "--mine"]);
        h.handle(cmd).await.unwrap();

        let storage = Storage::open_existing(config.db_path(), 8).unwrap();
        let bob_pkh = Address::from(bob.as_str()).to_pubkey_hash().unwrap();
        assert_eq!(storage.ledger.best_height().unwrap(), 1);
        assert_eq!(storage.utxo_set.balance(&bob_pkh).unwrap(), 40);
        drop(storage);

        let (h, cmd) = handler(&["send", "--from", &alice, "--to", &bob, "--amount", "1000", "--mine"]);
        assert!(matches!(
            h.handle(cmd).await,
            Err(CliError::Ledger(LedgerError::InsufficientFunds { .. }))
        ));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
