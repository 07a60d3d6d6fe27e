// Peer connection management

use crate::network::message::{HEADER_LENGTH, MAX_PAYLOAD_SIZE, COMMAND_LENGTH};
use crate::network::{Message, MessageType, NetworkError};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// A single connection carrying one message
pub struct Peer {
    pub addr: String,
    stream: TcpStream,
}

impl Peer {
    /// Wrap an accepted TCP stream
    pub fn new(stream: TcpStream, addr: String) -> Self {
        Self { addr, stream }
    }

    /// Connect to a peer
    pub async fn connect(addr: &str, connect_timeout: Duration) -> Result<Self, NetworkError> {
        let stream = timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| NetworkError::Timeout("connecting"))??;

        Ok(Self::new(stream, addr.to_string()))
    }

    /// Send a message to the peer and close our side
    pub async fn send_message(&mut self, message: &Message) -> Result<(), NetworkError> {
        let data = message.serialize();
        self.stream.write_all(&data).await?;
        self.stream.flush().await?;
        self.stream.shutdown().await?;
        Ok(())
    }

    /// Receive the connection's message
    pub async fn receive_message(&mut self, read_timeout: Duration) -> Result<Message, NetworkError> {
        timeout(read_timeout, self.read_message())
            .await
            .map_err(|_| NetworkError::Timeout("reading message"))?
    }

    async fn read_message(&mut self) -> Result<Message, NetworkError> {
        // Read message header (16 bytes: 12 for type + 4 for length)
        let mut header = [0u8; HEADER_LENGTH];
        self.stream.read_exact(&mut header).await?;

        let mut command = [0u8; COMMAND_LENGTH];
        command.copy_from_slice(&header[..COMMAND_LENGTH]);
        let kind = MessageType::parse_command(&command)?;

        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&header[COMMAND_LENGTH..]);
        let payload_len = u32::from_le_bytes(len_bytes) as usize;
        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(NetworkError::PayloadTooLarge(payload_len));
        }

        let mut payload = vec![0u8; payload_len];
        self.stream.read_exact(&mut payload).await?;

        Message::deserialize_payload(kind, &payload)
    }
}

/// Open a connection to `addr`, deliver `message`, and close it
pub async fn send_to(addr: &str, message: &Message, connect_timeout: Duration) -> Result<(), NetworkError> {
    let mut peer = Peer::connect(addr, connect_timeout).await?;
    peer.send_message(message).await?;
    log::debug!("Sent {} to {}", message.message_type().as_str(), addr);
    Ok(())
}
