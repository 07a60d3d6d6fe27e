// P2P networking

mod error;
mod message;
mod node;
mod peer;

pub use error::NetworkError;
pub use message::{InvType, Message, MessageType, PROTOCOL_VERSION};
pub use node::{send_transaction, Node, NodeState};
pub use peer::{send_to, Peer};
