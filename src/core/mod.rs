// Core ledger data structures

mod types;
mod transaction;
mod block;
mod merkle;
mod hash;
pub mod serialize;

pub use types::*;
pub use transaction::*;
pub use block::*;
pub use merkle::merkle_root;
pub use serialize::{CodecError, Serializable};
pub use hash::*;
