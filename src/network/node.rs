// Network node - protocol handlers, mempool and transaction mining

use crate::config::NodeConfig;
use crate::consensus::CancelToken;
use crate::core::{Block, Hash256, PubKeyHash, Transaction};
use crate::error::LedgerError;
use crate::network::peer::{self, Peer};
use crate::network::{InvType, Message, NetworkError, PROTOCOL_VERSION};
use crate::storage::{BlockStatus, Storage};
use crate::wallet::Address;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, RwLock};

/// Mutable protocol state shared by every connection handler
#[derive(Debug, Default)]
pub struct NodeState {
    /// Peers we gossip with, seeded with the bootstrap address
    pub known_nodes: Vec<String>,
    /// Block hashes announced by a peer and not yet requested
    pub blocks_in_transit: Vec<Hash256>,
    pub mempool: HashMap<Hash256, Transaction>,
    /// Cancels the in-flight mining job, if any
    mining: Option<CancelToken>,
}

/// Network node
pub struct Node {
    config: NodeConfig,
    address: String,
    miner: Option<PubKeyHash>,
    storage: Arc<Storage>,
    state: RwLock<NodeState>,
    /// Held for the duration of a mining loop
    mining_lock: Mutex<()>,
}

/// What a mining round produced
enum MiningRound {
    Mined { block: Block, evicted: Vec<Hash256> },
    NothingValid { evicted: Vec<Hash256> },
}

impl Node {
    /// Create a new node over an initialized ledger
    pub fn new(config: NodeConfig, storage: Arc<Storage>) -> Result<Self, NetworkError> {
        let miner = config
            .miner_address
            .as_deref()
            .map(|addr| Address::from(addr).to_pubkey_hash())
            .transpose()?;

        Ok(Self {
            address: config.node_address(),
            state: RwLock::new(NodeState {
                known_nodes: vec![config.bootstrap.clone()],
                ..Default::default()
            }),
            config,
            miner,
            storage,
            mining_lock: Mutex::new(()),
        })
    }

    /// Address peers use to reach this node
    pub fn address(&self) -> &str {
        &self.address
    }

    pub async fn known_nodes(&self) -> Vec<String> {
        self.state.read().await.known_nodes.clone()
    }

    pub async fn mempool_size(&self) -> usize {
        self.state.read().await.mempool.len()
    }

    fn is_primary(&self) -> bool {
        self.config.is_primary()
    }

    /// Bind the configured address and serve until Ctrl-C
    pub async fn run(self: Arc<Self>) -> Result<(), NetworkError> {
        let listener = TcpListener::bind(&self.address).await?;

        tokio::select! {
            result = self.clone().serve(listener) => result,
            _ = tokio::signal::ctrl_c() => {
                log::info!("Shutting down, flushing store");
                if let Some(cancel) = self.state.read().await.mining.clone() {
                    cancel.cancel();
                }
                self.storage.flush()?;
                Ok(())
            }
        }
    }

    /// Announce ourselves to the primary node, then accept connections,
    /// one task per connection
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<(), NetworkError> {
        log::info!("Node listening on {}", self.address);

        if !self.is_primary() {
            let bootstrap = self.config.bootstrap.clone();
            self.send_version(&bootstrap).await?;
        }

        loop {
            let (stream, remote) = listener.accept().await?;
            let node = self.clone();

            tokio::spawn(async move {
                if let Err(e) = node.handle_connection(stream, remote.to_string()).await {
                    log::warn!("Connection from {} failed: {}", remote, e);
                }
            });
        }
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream, remote: String) -> Result<(), NetworkError> {
        let mut peer = Peer::new(stream, remote);
        let message = peer.receive_message(self.config.read_timeout).await?;
        log::debug!("Received {} command from {}", message.message_type().as_str(), peer.addr);
        self.handle_message(message).await
    }

    /// Dispatch one decoded message
    pub async fn handle_message(self: Arc<Self>, message: Message) -> Result<(), NetworkError> {
        match message {
            Message::Version {
                best_height,
                addr_from,
                ..
            } => self.handle_version(best_height, addr_from).await,
            Message::GetBlocks { addr_from } => self.handle_get_blocks(&addr_from).await,
            Message::Inv {
                addr_from,
                kind,
                items,
            } => self.handle_inv(&addr_from, kind, items).await,
            Message::GetData {
                addr_from,
                kind,
                id,
            } => self.handle_get_data(&addr_from, kind, id).await,
            Message::Block { addr_from, block } => self.handle_block(&addr_from, block).await,
            Message::Tx { addr_from, tx } => self.handle_tx(&addr_from, tx).await,
            Message::Addr { addr_list } => self.handle_addr(addr_list).await,
        }
    }

    /// Deliver a message; an unreachable peer is forgotten
    async fn send(&self, addr: &str, message: Message) {
        if let Err(e) = peer::send_to(addr, &message, self.config.connect_timeout).await {
            log::warn!("{} is not available: {}", addr, e);
            self.state.write().await.known_nodes.retain(|node| node != addr);
        }
    }

    async fn send_version(&self, addr: &str) -> Result<(), NetworkError> {
        let best_height = self.storage.ledger.best_height()?;
        self.send(
            addr,
            Message::Version {
                version: PROTOCOL_VERSION,
                best_height,
                addr_from: self.address.clone(),
            },
        )
        .await;
        Ok(())
    }

    async fn send_get_blocks(&self, addr: &str) {
        self.send(
            addr,
            Message::GetBlocks {
                addr_from: self.address.clone(),
            },
        )
        .await;
    }

    async fn send_get_data(&self, addr: &str, kind: InvType, id: Hash256) {
        self.send(
            addr,
            Message::GetData {
                addr_from: self.address.clone(),
                kind,
                id,
            },
        )
        .await;
    }

    async fn send_inv(&self, addr: &str, kind: InvType, items: Vec<Hash256>) {
        self.send(
            addr,
            Message::Inv {
                addr_from: self.address.clone(),
                kind,
                items,
            },
        )
        .await;
    }

    /// Ask every known peer for its block inventory
    pub async fn request_blocks(&self) {
        for node in self.known_nodes().await {
            if node != self.address {
                self.send_get_blocks(&node).await;
            }
        }
    }

    async fn remember(&self, addr: &str) {
        let mut state = self.state.write().await;
        if addr != self.address && !state.known_nodes.iter().any(|node| node == addr) {
            state.known_nodes.push(addr.to_string());
        }
    }

    /// The lower peer asks for blocks; the higher one announces its height back
    async fn handle_version(&self, their_height: u64, addr_from: String) -> Result<(), NetworkError> {
        let our_height = self.storage.ledger.best_height()?;
        log::debug!("Version from {}: height {} (ours {})", addr_from, their_height, our_height);

        if our_height < their_height {
            self.send_get_blocks(&addr_from).await;
        } else if our_height > their_height {
            self.send_version(&addr_from).await?;
        }

        self.remember(&addr_from).await;
        Ok(())
    }

    async fn handle_addr(&self, addr_list: Vec<String>) -> Result<(), NetworkError> {
        for addr in &addr_list {
            self.remember(addr).await;
        }
        log::info!("There are {} known nodes", self.state.read().await.known_nodes.len());
        self.request_blocks().await;
        Ok(())
    }

    async fn handle_get_blocks(&self, addr_from: &str) -> Result<(), NetworkError> {
        let hashes = self.storage.ledger.block_hashes()?;
        self.send_inv(addr_from, InvType::Block, hashes).await;
        Ok(())
    }

    async fn handle_inv(&self, addr_from: &str, kind: InvType, items: Vec<Hash256>) -> Result<(), NetworkError> {
        log::info!("Received inventory with {} {:?}", items.len(), kind);
        let Some(&first) = items.first() else {
            return Ok(());
        };

        match kind {
            InvType::Block => {
                self.state.write().await.blocks_in_transit =
                    items.into_iter().filter(|hash| *hash != first).collect();
                self.send_get_data(addr_from, InvType::Block, first).await;
            }
            InvType::Tx => {
                let known = self.state.read().await.mempool.contains_key(&first);
                if !known {
                    self.send_get_data(addr_from, InvType::Tx, first).await;
                }
            }
        }
        Ok(())
    }

    async fn handle_get_data(&self, addr_from: &str, kind: InvType, id: Hash256) -> Result<(), NetworkError> {
        match kind {
            InvType::Block => match self.storage.ledger.get_block(&id) {
                Ok(block) => {
                    let message = Message::Block {
                        addr_from: self.address.clone(),
                        block,
                    };
                    self.send(addr_from, message).await;
                }
                Err(LedgerError::NotFound(_)) => log::debug!("Requested block {} not found", id),
                Err(e) => return Err(e.into()),
            },
            InvType::Tx => {
                let tx = self.state.read().await.mempool.get(&id).cloned();
                match tx {
                    Some(tx) => {
                        let message = Message::Tx {
                            addr_from: self.address.clone(),
                            tx,
                        };
                        self.send(addr_from, message).await;
                    }
                    None => log::debug!("Requested transaction {} not in mempool", id),
                }
            }
        }
        Ok(())
    }

    async fn handle_block(&self, addr_from: &str, block: Block) -> Result<(), NetworkError> {
        log::info!("Received block {} at height {}", block.hash, block.height);

        let storage = self.storage.clone();
        let incoming = block.clone();
        let added = tokio::task::spawn_blocking(move || storage.add_block(&incoming)).await?;

        match added {
            Ok(status) => {
                log::info!("Added block {} ({:?})", block.hash, status);
                if status == BlockStatus::NewTip {
                    // A taller chain makes the local job stale
                    if let Some(cancel) = self.state.read().await.mining.as_ref() {
                        cancel.cancel();
                    }
                }
            }
            Err(e) if e.is_rejection() => log::warn!("Rejected block {}: {}", block.hash, e),
            Err(e) => return Err(e.into()),
        }

        let next = {
            let mut state = self.state.write().await;
            for tx in &block.transactions {
                state.mempool.remove(&tx.id);
            }
            if state.blocks_in_transit.is_empty() {
                None
            } else {
                Some(state.blocks_in_transit.remove(0))
            }
        };

        match next {
            Some(hash) => self.send_get_data(addr_from, InvType::Block, hash).await,
            None => {
                let storage = self.storage.clone();
                let written = tokio::task::spawn_blocking(move || storage.reindex()).await??;
                log::info!("Sync finished, {} UTXO records", written);
            }
        }
        Ok(())
    }

    async fn handle_tx(self: Arc<Self>, addr_from: &str, tx: Transaction) -> Result<(), NetworkError> {
        let txid = tx.id;
        if !tx.has_valid_id() {
            log::warn!("Dropping transaction with mismatched id {}", txid);
            return Ok(());
        }

        let pending = {
            let mut state = self.state.write().await;
            state.mempool.insert(txid, tx);
            state.mempool.len()
        };
        log::info!("Transaction {} added to mempool ({} pending)", txid, pending);

        if self.is_primary() {
            for node in self.known_nodes().await {
                if node != self.address && node != addr_from {
                    self.send_inv(&node, InvType::Tx, vec![txid]).await;
                }
            }
        } else if self.miner.is_some() {
            tokio::spawn(async move {
                if let Err(e) = self.mine_tx().await {
                    log::error!("Mining failed: {}", e);
                }
            });
        }
        Ok(())
    }

    /// Mine the mempool until it is empty. Only one loop runs per node.
    pub async fn mine_tx(self: Arc<Self>) -> Result<(), NetworkError> {
        let Some(miner) = self.miner else {
            return Ok(());
        };
        let Ok(_guard) = self.mining_lock.try_lock() else {
            log::debug!("Mining already in progress");
            return Ok(());
        };

        loop {
            let candidates: Vec<Transaction> = self.state.read().await.mempool.values().cloned().collect();
            if candidates.is_empty() {
                return Ok(());
            }

            let cancel = CancelToken::new();
            self.state.write().await.mining = Some(cancel.clone());

            let storage = self.storage.clone();
            let job_cancel = cancel.clone();
            let mut job = tokio::task::spawn_blocking(move || mine_round(&storage, candidates, &miner, &job_cancel));

            let outcome = match tokio::time::timeout(self.config.mining_timeout, &mut job).await {
                Ok(joined) => joined,
                Err(_) => {
                    log::warn!("Mining timed out after {:?}", self.config.mining_timeout);
                    cancel.cancel();
                    job.await
                }
            };
            self.state.write().await.mining = None;

            let (block, evicted) = match outcome? {
                Ok(MiningRound::Mined { block, evicted }) => (block, evicted),
                Ok(MiningRound::NothingValid { evicted }) => {
                    log::info!("All transactions are invalid");
                    self.evict(&evicted).await;
                    return Ok(());
                }
                Err(LedgerError::MiningCancelled) => {
                    log::info!("Mining cancelled");
                    return Ok(());
                }
                Err(LedgerError::StaleBlock(hash)) => {
                    log::info!("Block {} was overtaken by a peer block", hash);
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };

            log::info!("New block {} mined at height {}", block.hash, block.height);
            let mined: Vec<Hash256> = block.transactions.iter().map(|tx| tx.id).collect();
            self.evict(&mined).await;
            self.evict(&evicted).await;

            for node in self.known_nodes().await {
                if node != self.address {
                    self.send_inv(&node, InvType::Block, vec![block.hash]).await;
                }
            }
        }
    }

    async fn evict(&self, ids: &[Hash256]) {
        let mut state = self.state.write().await;
        for id in ids {
            state.mempool.remove(id);
        }
    }
}

/// Select verifiable, unspent, non-conflicting transactions, add a reward
/// and mine them. Blocking; runs off the async executor.
fn mine_round(
    storage: &Storage,
    candidates: Vec<Transaction>,
    miner: &PubKeyHash,
    cancel: &CancelToken,
) -> Result<MiningRound, LedgerError> {
    let mut selected = Vec::new();
    let mut evicted = Vec::new();
    let mut claimed = HashSet::new();

    for tx in candidates {
        let valid = match storage.ledger.verify_transaction(&tx) {
            Ok(valid) => valid && storage.utxo_set.is_spendable(&tx)?,
            Err(e) if e.is_rejection() => {
                log::debug!("Transaction {} rejected: {}", tx.id, e);
                false
            }
            Err(e) => return Err(e),
        };

        let outpoints: Vec<(Option<Hash256>, i32)> =
            tx.inputs.iter().map(|input| (input.txid, input.out)).collect();
        if !valid || outpoints.iter().any(|outpoint| claimed.contains(outpoint)) {
            evicted.push(tx.id);
            continue;
        }
        claimed.extend(outpoints);
        selected.push(tx);
    }

    if selected.is_empty() {
        return Ok(MiningRound::NothingValid { evicted });
    }

    selected.push(Transaction::coinbase(miner, None));
    let block = storage.mine_block(selected, cancel)?;

    Ok(MiningRound::Mined { block, evicted })
}

/// Hand a transaction to a node, as a wallet does
pub async fn send_transaction(
    to: &str,
    addr_from: &str,
    tx: &Transaction,
    connect_timeout: std::time::Duration,
) -> Result<(), NetworkError> {
    let message = Message::Tx {
        addr_from: addr_from.to_string(),
        tx: tx.clone(),
    };
    peer::send_to(to, &message, connect_timeout).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::{Keystore, TransactionBuilder};
    use std::time::Duration;

    const TEST_DIFFICULTY: u32 = 8;

    async fn listener() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port.to_string())
    }

    fn config(node_id: &str, bootstrap: &str, miner: Option<&Address>) -> NodeConfig {
        NodeConfig {
            node_id: node_id.to_string(),
            host: "127.0.0.1".to_string(),
            bootstrap: bootstrap.to_string(),
            difficulty: TEST_DIFFICULTY,
            miner_address: miner.map(|addr| addr.to_string()),
            ..Default::default()
        }
    }

    /// Poll `check` until it holds or the deadline passes
    async fn eventually<F, Fut>(mut check: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
        while tokio::time::Instant::now() < deadline {
            if check().await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_miner_address_must_be_valid() {
        let storage = Arc::new(Storage::memory(TEST_DIFFICULTY).unwrap());
        let mut cfg = config("3000", "127.0.0.1:3000", None);
        cfg.miner_address = Some("zz".to_string());
        assert!(matches!(
            Node::new(cfg, storage),
            Err(NetworkError::Ledger(LedgerError::InvalidAddress(_)))
        ));
    }

    #[tokio::test]
    async fn test_get_data_for_unknown_items_is_silent() {
        let storage = Arc::new(Storage::memory(TEST_DIFFICULTY).unwrap());
        storage.ledger.create(&[1u8; 20]).unwrap();
        let node = Arc::new(Node::new(config("3000", "127.0.0.1:3000", None), storage).unwrap());

        for kind in [InvType::Block, InvType::Tx] {
            let message = Message::GetData {
                addr_from: "127.0.0.1:1".to_string(),
                kind,
                id: Hash256::new([3u8; 32]),
            };
            node.clone().handle_message(message).await.unwrap();
        }
        // Nothing was sent, so the unreachable requester was never dropped
        assert_eq!(node.known_nodes().await, vec!["127.0.0.1:3000".to_string()]);
    }

    #[tokio::test]
    async fn test_taller_peer_block_cancels_local_mining() {
        let storage = Arc::new(Storage::memory(TEST_DIFFICULTY).unwrap());
        storage.ledger.create(&[1u8; 20]).unwrap();
        storage.reindex().unwrap();
        let node = Arc::new(Node::new(config("3000", "127.0.0.1:3000", None), storage.clone()).unwrap());

        let job = CancelToken::new();
        node.state.write().await.mining = Some(job.clone());

        let peer_block = storage
            .ledger
            .seal_block(vec![Transaction::coinbase(&[2u8; 20], None)], &CancelToken::new())
            .unwrap();
        let message = Message::Block {
            addr_from: "127.0.0.1:1".to_string(),
            block: peer_block.clone(),
        };
        node.clone().handle_message(message).await.unwrap();

        assert!(job.is_cancelled());
        assert_eq!(storage.ledger.tip_hash().unwrap(), peer_block.hash);
        assert_eq!(storage.utxo_set.balance(&[2u8; 20]).unwrap(), crate::core::SUBSIDY);
    }

    #[tokio::test]
    async fn test_known_peer_block_leaves_mining_running() {
        let storage = Arc::new(Storage::memory(TEST_DIFFICULTY).unwrap());
        let genesis = storage.ledger.create(&[1u8; 20]).unwrap();
        let node = Arc::new(Node::new(config("3000", "127.0.0.1:3000", None), storage).unwrap());

        let job = CancelToken::new();
        node.state.write().await.mining = Some(job.clone());

        let message = Message::Block {
            addr_from: "127.0.0.1:1".to_string(),
            block: genesis,
        };
        node.clone().handle_message(message).await.unwrap();
        assert!(!job.is_cancelled());
    }

    #[tokio::test]
    async fn test_mempool_spend_without_inputs_is_never_mined() {
        let storage = Arc::new(Storage::memory(TEST_DIFFICULTY).unwrap());
        storage.ledger.create(&[1u8; 20]).unwrap();
        storage.reindex().unwrap();

        let minted = Transaction::new(vec![], vec![crate::core::TxOutput::new(1_000_000, [6u8; 20])]);
        let round = mine_round(&storage, vec![minted.clone()], &[7u8; 20], &CancelToken::new()).unwrap();

        assert!(matches!(round, MiningRound::NothingValid { ref evicted } if evicted == &vec![minted.id]));
        assert_eq!(storage.ledger.best_height().unwrap(), 0);
        assert_eq!(storage.utxo_set.balance(&[6u8; 20]).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_send_forgets_peer() {
        let storage = Arc::new(Storage::memory(TEST_DIFFICULTY).unwrap());
        storage.ledger.create(&[1u8; 20]).unwrap();

        // The bootstrap port is closed
        let (closed, closed_port) = listener().await;
        drop(closed);
        let bootstrap = format!("127.0.0.1:{}", closed_port);
        let node = Arc::new(Node::new(config("3001", &bootstrap, None), storage).unwrap());

        node.request_blocks().await;
        assert!(node.known_nodes().await.is_empty());
    }

    #[tokio::test]
    async fn test_addr_merges_peers_and_requests_blocks() {
        let storage = Arc::new(Storage::memory(TEST_DIFFICULTY).unwrap());
        storage.ledger.create(&[1u8; 20]).unwrap();
        let (peer_listener, peer_port) = listener().await;
        let live = format!("127.0.0.1:{}", peer_port);
        let (closed, closed_port) = listener().await;
        drop(closed);
        let dead = format!("127.0.0.1:{}", closed_port);

        let node = Arc::new(Node::new(config("3000", &live, None), storage).unwrap());
        let message = Message::Addr {
            addr_list: vec![live.clone(), dead, "127.0.0.1:3000".to_string()],
        };
        node.clone().handle_message(message).await.unwrap();

        // Ourselves and duplicates are skipped; the unreachable peer is dropped
        assert_eq!(node.known_nodes().await, vec![live]);

        let (stream, remote) = peer_listener.accept().await.unwrap();
        let received = Peer::new(stream, remote.to_string())
            .receive_message(Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(
            received,
            Message::GetBlocks {
                addr_from: "127.0.0.1:3000".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_two_nodes_converge() {
        let (listener_a, port_a) = listener().await;
        let (listener_b, port_b) = listener().await;
        let bootstrap = format!("127.0.0.1:{}", port_a);

        let storage_a = Arc::new(Storage::memory(TEST_DIFFICULTY).unwrap());
        storage_a.ledger.create(&[1u8; 20]).unwrap();
        for _ in 0..2 {
            let coinbase = Transaction::coinbase(&[1u8; 20], None);
            storage_a.ledger.mine_block(vec![coinbase], &CancelToken::new()).unwrap();
        }
        storage_a.utxo_set.reindex(&storage_a.ledger).unwrap();

        let storage_b = Arc::new(Storage::memory(TEST_DIFFICULTY).unwrap());
        storage_b.ledger.create(&[2u8; 20]).unwrap();
        storage_b.utxo_set.reindex(&storage_b.ledger).unwrap();

        let node_a = Arc::new(Node::new(config(&port_a, &bootstrap, None), storage_a.clone()).unwrap());
        let node_b = Arc::new(Node::new(config(&port_b, &bootstrap, None), storage_b.clone()).unwrap());
        tokio::spawn(node_a.serve(listener_a));
        tokio::spawn(node_b.serve(listener_b));

        let expected = storage_a.utxo_set.snapshot().unwrap();
        let converged = eventually(|| {
            let storage_b = storage_b.clone();
            let expected = expected.clone();
            async move {
                storage_b.ledger.best_height().ok() == Some(2)
                    && storage_b.utxo_set.snapshot().ok() == Some(expected)
            }
        })
        .await;

        assert!(converged);
        assert_eq!(
            storage_b.ledger.block_hashes().unwrap(),
            storage_a.ledger.block_hashes().unwrap()
        );
    }

    #[tokio::test]
    async fn test_transaction_relayed_and_mined() {
        let (listener_a, port_a) = listener().await;
        let (listener_m, port_m) = listener().await;
        let bootstrap = format!("127.0.0.1:{}", port_a);

        let mut keystore = Keystore::new();
        let alice = keystore.new_address();
        let bob = keystore.new_address();
        let miner = keystore.new_address();

        // Both nodes start from the same genesis
        let storage_a = Arc::new(Storage::memory(TEST_DIFFICULTY).unwrap());
        let genesis = storage_a.ledger.create(&alice.to_pubkey_hash().unwrap()).unwrap();
        storage_a.utxo_set.reindex(&storage_a.ledger).unwrap();
        let storage_m = Arc::new(Storage::memory(TEST_DIFFICULTY).unwrap());
        storage_m.ledger.add_block(&genesis).unwrap();
        storage_m.utxo_set.reindex(&storage_m.ledger).unwrap();

        let node_a = Arc::new(Node::new(config(&port_a, &bootstrap, None), storage_a.clone()).unwrap());
        let node_m = Arc::new(Node::new(config(&port_m, &bootstrap, Some(&miner)), storage_m.clone()).unwrap());
        tokio::spawn(node_a.clone().serve(listener_a));
        tokio::spawn(node_m.serve(listener_m));

        let miner_addr = format!("127.0.0.1:{}", port_m);
        assert!(eventually(|| {
            let node_a = node_a.clone();
            let miner_addr = miner_addr.clone();
            async move { node_a.known_nodes().await.contains(&miner_addr) }
        })
        .await);

        let tx = TransactionBuilder::new(&keystore, &storage_a).build(&alice, &bob, 30).unwrap();
        send_transaction(&bootstrap, "127.0.0.1:1", &tx, Duration::from_secs(5))
            .await
            .unwrap();

        let bob_pkh = bob.to_pubkey_hash().unwrap();
        let miner_pkh = miner.to_pubkey_hash().unwrap();
        let mined = eventually(|| {
            let storage_a = storage_a.clone();
            async move {
                storage_a.ledger.best_height().ok() == Some(1)
                    && storage_a.utxo_set.balance(&bob_pkh).ok() == Some(30)
            }
        })
        .await;

        assert!(mined);
        assert_eq!(storage_a.utxo_set.balance(&miner_pkh).unwrap(), crate::core::SUBSIDY);
        assert_eq!(storage_m.utxo_set.balance(&bob_pkh).unwrap(), 30);
        assert!(eventually(|| {
            let node_a = node_a.clone();
            async move { node_a.mempool_size().await == 0 }
        })
        .await);
    }
}
