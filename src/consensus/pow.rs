// Proof of Work implementation

use crate::core::{Block, Hash256, Transaction, sha256, unix_timestamp};
use crate::error::LedgerError;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Leading zero bits required of a block digest
pub const DEFAULT_DIFFICULTY: u32 = 12;

/// Cooperative cancellation flag shared between a miner and its owner
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Difficulty target `2^(256 - difficulty)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub difficulty: u32,
}

impl Target {
    /// Difficulty is clamped to 1..=255 so the target fits in 256 bits
    pub fn from_difficulty(difficulty: u32) -> Self {
        Self {
            difficulty: difficulty.clamp(1, 255),
        }
    }

    /// Full 256-bit big-endian target
    pub fn to_hash256(&self) -> Hash256 {
        let bit = 256 - self.difficulty as usize;
        let mut target = [0u8; 32];
        target[31 - bit / 8] = 1 << (bit % 8);
        Hash256::new(target)
    }

    /// Check if a hash meets this target (hash < target, big-endian)
    pub fn is_valid_hash(&self, hash: &Hash256) -> bool {
        hash < &self.to_hash256()
    }
}

/// Mining statistics for a found nonce
#[derive(Debug, Clone)]
pub struct MiningResult {
    pub nonce: i64,
    pub hash: Hash256,
    pub attempts: u64,
    pub duration: Duration,
}

impl MiningResult {
    /// Calculate hash rate (hashes per second)
    pub fn hash_rate(&self) -> f64 {
        self.attempts as f64 / self.duration.as_secs_f64()
    }
}

/// How a nonce search ended
#[derive(Debug, Clone)]
pub enum MiningOutcome {
    Found(MiningResult),
    Exhausted { attempts: u64 },
    Cancelled { attempts: u64 },
}

/// Proof of Work engine with a fixed difficulty
#[derive(Debug, Clone)]
pub struct ProofOfWork {
    pub target: Target,
    /// Cached target hash for fast comparison
    target_hash: Hash256,
}

impl ProofOfWork {
    pub fn new(difficulty: u32) -> Self {
        let target = Target::from_difficulty(difficulty);
        let target_hash = target.to_hash256();
        Self {
            target,
            target_hash,
        }
    }

    pub fn difficulty(&self) -> u32 {
        self.target.difficulty
    }

    /// `prev_hash || merkle_root || nonce (8 bytes BE) || difficulty (8 bytes BE)`;
    /// the genesis block contributes no prev-hash bytes
    pub fn prepare_data(&self, prev_hash: Option<&Hash256>, merkle_root: &Hash256, nonce: i64) -> Vec<u8> {
        let mut data = Vec::with_capacity(32 + 32 + 8 + 8);
        if let Some(prev) = prev_hash {
            data.extend_from_slice(prev.as_bytes());
        }
        data.extend_from_slice(merkle_root.as_bytes());
        data.extend_from_slice(&nonce.to_be_bytes());
        data.extend_from_slice(&(self.target.difficulty as i64).to_be_bytes());
        data
    }

    /// Search the full non-negative nonce space
    pub fn run(&self, prev_hash: Option<&Hash256>, merkle_root: &Hash256, cancel: &CancelToken) -> MiningOutcome {
        self.run_range(prev_hash, merkle_root, 0..=i64::MAX, cancel)
    }

    /// Try nonces in order, stopping at the first digest below the target
    pub fn run_range(
        &self,
        prev_hash: Option<&Hash256>,
        merkle_root: &Hash256,
        nonces: RangeInclusive<i64>,
        cancel: &CancelToken,
    ) -> MiningOutcome {
        let start_time = Instant::now();
        let mut attempts = 0u64;

        for nonce in nonces {
            if cancel.is_cancelled() {
                log::debug!("Mining cancelled after {} attempts", attempts);
                return MiningOutcome::Cancelled { attempts };
            }

            let hash = sha256(&self.prepare_data(prev_hash, merkle_root, nonce));
            attempts += 1;

            if hash < self.target_hash {
                return MiningOutcome::Found(MiningResult {
                    nonce,
                    hash,
                    attempts,
                    duration: start_time.elapsed(),
                });
            }

            // Progress indicator every 100k attempts
            if attempts % 100_000 == 0 {
                let elapsed = start_time.elapsed();
                log::debug!("Mining attempts: {} ({:.1} KH/s)",
                    attempts,
                    attempts as f64 / elapsed.as_secs_f64() / 1000.0
                );
            }
        }

        MiningOutcome::Exhausted { attempts }
    }

    /// Recompute the digest for the block's stored nonce and check the target.
    /// Does not look at transaction content beyond the Merkle commitment.
    pub fn validate(&self, block: &Block) -> bool {
        let data = self.prepare_data(block.prev_hash.as_ref(), &block.merkle_root(), block.nonce);
        let hash = sha256(&data);
        hash == block.hash && self.target.is_valid_hash(&hash)
    }

    /// Seal a new block over `transactions`
    pub fn mine_block(
        &self,
        transactions: Vec<Transaction>,
        prev_hash: Option<Hash256>,
        height: u64,
        cancel: &CancelToken,
    ) -> Result<Block, LedgerError> {
        let merkle_root = Block::hash_transactions(&transactions);

        match self.run(prev_hash.as_ref(), &merkle_root, cancel) {
            MiningOutcome::Found(result) => {
                log::info!("Mined block {} at height {} ({} attempts, {:.0} H/s)",
                    result.hash, height, result.attempts, result.hash_rate());
                Ok(Block {
                    timestamp: unix_timestamp(),
                    hash: result.hash,
                    transactions,
                    prev_hash,
                    nonce: result.nonce,
                    height,
                })
            }
            MiningOutcome::Exhausted { .. } => Err(LedgerError::MiningExhausted),
            MiningOutcome::Cancelled { .. } => Err(LedgerError::MiningCancelled),
        }
    }
}

impl Default for ProofOfWork {
    fn default() -> Self {
        Self::new(DEFAULT_DIFFICULTY)
    }
}
