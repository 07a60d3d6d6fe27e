// Consensus rules: proof of work and block admission

pub mod pow;
pub mod validation;

pub use pow::{CancelToken, MiningOutcome, MiningResult, ProofOfWork, Target, DEFAULT_DIFFICULTY};
pub use validation::BlockValidator;
