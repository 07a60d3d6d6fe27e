// Network error taxonomy

use crate::core::CodecError;
use crate::error::LedgerError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Timed out {0}")]
    Timeout(&'static str),
    #[error("Malformed payload: {0}")]
    Codec(#[from] CodecError),
    #[error("Unknown command {0:?}")]
    UnknownCommand(String),
    #[error("Payload of {0} bytes exceeds the limit")]
    PayloadTooLarge(usize),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
