// Network protocol messages

use crate::core::serialize::{
    expect_consumed, read_hash, read_len, read_u32, read_u64, read_var_bytes, read_var_str,
    write_var_bytes, write_var_str, write_varint,
};
use crate::core::{Block, CodecError, Hash256, Serializable, Transaction};
use crate::network::NetworkError;
use std::io::{Cursor, Read};

/// Width of the null-padded command tag
pub const COMMAND_LENGTH: usize = 12;

/// Command tag plus 4-byte payload length
pub const HEADER_LENGTH: usize = COMMAND_LENGTH + 4;

/// Largest payload accepted from a peer
pub const MAX_PAYLOAD_SIZE: usize = 32 * 1024 * 1024;

pub const PROTOCOL_VERSION: u32 = 1;

/// Network message types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Version,
    GetBlocks,
    Inv,
    GetData,
    Block,
    Tx,
    Addr,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Version => "version",
            MessageType::GetBlocks => "getblocks",
            MessageType::Inv => "inv",
            MessageType::GetData => "getdata",
            MessageType::Block => "block",
            MessageType::Tx => "tx",
            MessageType::Addr => "addr",
        }
    }

    pub fn from_command(s: &str) -> Option<Self> {
        match s {
            "version" => Some(MessageType::Version),
            "getblocks" => Some(MessageType::GetBlocks),
            "inv" => Some(MessageType::Inv),
            "getdata" => Some(MessageType::GetData),
            "block" => Some(MessageType::Block),
            "tx" => Some(MessageType::Tx),
            "addr" => Some(MessageType::Addr),
            _ => None,
        }
    }

    /// Null-padded command tag
    pub fn to_command(&self) -> [u8; COMMAND_LENGTH] {
        let mut command = [0u8; COMMAND_LENGTH];
        let name = self.as_str().as_bytes();
        command[..name.len()].copy_from_slice(name);
        command
    }

    /// Parse a tag, ignoring the null padding
    pub fn parse_command(raw: &[u8; COMMAND_LENGTH]) -> Result<Self, NetworkError> {
        let name: Vec<u8> = raw.iter().copied().filter(|b| *b != 0).collect();
        let name = String::from_utf8_lossy(&name);
        Self::from_command(&name).ok_or_else(|| NetworkError::UnknownCommand(name.into_owned()))
    }
}

/// Inventory type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvType {
    Block,
    Tx,
}

impl InvType {
    fn to_byte(self) -> u8 {
        match self {
            InvType::Block => 1,
            InvType::Tx => 2,
        }
    }

    fn from_byte(byte: u8) -> Result<Self, CodecError> {
        match byte {
            1 => Ok(InvType::Block),
            2 => Ok(InvType::Tx),
            other => Err(CodecError::Invalid(format!("unknown inventory type {}", other))),
        }
    }
}

/// Network message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Version {
        version: u32,
        best_height: u64,
        addr_from: String,
    },
    GetBlocks {
        addr_from: String,
    },
    Inv {
        addr_from: String,
        kind: InvType,
        items: Vec<Hash256>,
    },
    GetData {
        addr_from: String,
        kind: InvType,
        id: Hash256,
    },
    Block {
        addr_from: String,
        block: Block,
    },
    Tx {
        addr_from: String,
        tx: Transaction,
    },
    Addr {
        addr_list: Vec<String>,
    },
}

fn read_inv_type<R: Read>(reader: &mut R) -> Result<InvType, CodecError> {
    let mut byte = [0u8; 1];
    reader.read_exact(&mut byte)?;
    InvType::from_byte(byte[0])
}

impl Message {
    /// Get message type
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Version { .. } => MessageType::Version,
            Message::GetBlocks { .. } => MessageType::GetBlocks,
            Message::Inv { .. } => MessageType::Inv,
            Message::GetData { .. } => MessageType::GetData,
            Message::Block { .. } => MessageType::Block,
            Message::Tx { .. } => MessageType::Tx,
            Message::Addr { .. } => MessageType::Addr,
        }
    }

    /// Frame the message: command tag, payload length (LE), payload
    pub fn serialize(&self) -> Vec<u8> {
        let payload = self.serialize_payload();

        let mut bytes = Vec::with_capacity(HEADER_LENGTH + payload.len());
        bytes.extend_from_slice(&self.message_type().to_command());
        bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&payload);
        bytes
    }

    fn serialize_payload(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        match self {
            Message::Version {
                version,
                best_height,
                addr_from,
            } => {
                bytes.extend_from_slice(&version.to_le_bytes());
                bytes.extend_from_slice(&best_height.to_le_bytes());
                let _ = write_var_str(&mut bytes, addr_from);
            }
            Message::GetBlocks { addr_from } => {
                let _ = write_var_str(&mut bytes, addr_from);
            }
            Message::Inv {
                addr_from,
                kind,
                items,
            } => {
                let _ = write_var_str(&mut bytes, addr_from);
                bytes.push(kind.to_byte());
                let _ = write_varint(&mut bytes, items.len() as u64);
                for hash in items {
                    bytes.extend_from_slice(hash.as_bytes());
                }
            }
            Message::GetData {
                addr_from,
                kind,
                id,
            } => {
                let _ = write_var_str(&mut bytes, addr_from);
                bytes.push(kind.to_byte());
                bytes.extend_from_slice(id.as_bytes());
            }
            Message::Block { addr_from, block } => {
                let _ = write_var_str(&mut bytes, addr_from);
                let _ = write_var_bytes(&mut bytes, &block.serialize());
            }
            Message::Tx { addr_from, tx } => {
                let _ = write_var_str(&mut bytes, addr_from);
                let _ = write_var_bytes(&mut bytes, &tx.serialize());
            }
            Message::Addr { addr_list } => {
                let _ = write_varint(&mut bytes, addr_list.len() as u64);
                for addr in addr_list {
                    let _ = write_var_str(&mut bytes, addr);
                }
            }
        }
        bytes
    }

    /// Decode a payload whose command tag has already been read
    pub fn deserialize_payload(kind: MessageType, payload: &[u8]) -> Result<Self, NetworkError> {
        let mut cursor = Cursor::new(payload);
        let reader = &mut cursor;

        let message = match kind {
            MessageType::Version => Message::Version {
                version: read_u32(reader)?,
                best_height: read_u64(reader)?,
                addr_from: read_var_str(reader)?,
            },
            MessageType::GetBlocks => Message::GetBlocks {
                addr_from: read_var_str(reader)?,
            },
            MessageType::Inv => {
                let addr_from = read_var_str(reader)?;
                let kind = read_inv_type(reader)?;
                let count = read_len(reader)?;
                let mut items = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    items.push(read_hash(reader)?);
                }
                Message::Inv {
                    addr_from,
                    kind,
                    items,
                }
            }
            MessageType::GetData => Message::GetData {
                addr_from: read_var_str(reader)?,
                kind: read_inv_type(reader)?,
                id: read_hash(reader)?,
            },
            MessageType::Block => Message::Block {
                addr_from: read_var_str(reader)?,
                block: Block::deserialize(&read_var_bytes(reader)?)?,
            },
            MessageType::Tx => Message::Tx {
                addr_from: read_var_str(reader)?,
                tx: Transaction::deserialize(&read_var_bytes(reader)?)?,
            },
            MessageType::Addr => {
                let count = read_len(reader)?;
                let mut addr_list = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    addr_list.push(read_var_str(reader)?);
                }
                Message::Addr { addr_list }
            }
        };

        expect_consumed(&cursor)?;
        Ok(message)
    }

    /// Decode a complete frame
    pub fn deserialize(data: &[u8]) -> Result<Self, NetworkError> {
        if data.len() < HEADER_LENGTH {
            return Err(CodecError::Invalid("message too short".to_string()).into());
        }

        let mut command = [0u8; COMMAND_LENGTH];
        command.copy_from_slice(&data[..COMMAND_LENGTH]);
        let kind = MessageType::parse_command(&command)?;

        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&data[COMMAND_LENGTH..HEADER_LENGTH]);
        let payload_len = u32::from_le_bytes(len_bytes) as usize;

        if data.len() != HEADER_LENGTH + payload_len {
            return Err(CodecError::Invalid("payload length does not match header".to_string()).into());
        }

        Self::deserialize_payload(kind, &data[HEADER_LENGTH..])
    }
}
