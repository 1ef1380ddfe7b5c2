//! TCP connection to the orchestrator
//!
//! Thin wrapper over the shared codec. Besides the well-formed messages of
//! the protocol, [`Client`] can write arbitrary payloads and bare frame
//! headers, which the test suites use to check how the orchestrator copes
//! with misbehaving peers.

use log::debug;
use serde::Serialize;
use serde_json::Value;
use shared::codec::{self, CodecError, FrameLimit};
use shared::{ClientMessage, Role, ServerMessage, METAPROTOCOL_VERSION};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, ToSocketAddrs};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Cannot connect: {0}")]
    Connect(#[source] std::io::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("Cannot write: {0}")]
    Write(#[source] std::io::Error),
    #[error("Unexpected message: {0}")]
    UnexpectedMessage(#[source] serde_json::Error),
    #[error("No message received within {0:?}")]
    Timeout(Duration),
}

pub struct Client {
    stream: TcpStream,
}

impl Client {
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await.map_err(ClientError::Connect)?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY: {}", e);
        }
        Ok(Client { stream })
    }

    /// Sends a LOGIN with the current metaprotocol version
    pub async fn send_login(&mut self, role: Role, nickname: &str) -> Result<(), ClientError> {
        self.send_message(&ClientMessage::Login {
            nickname: nickname.to_string(),
            role,
            metaprotocol_version: METAPROTOCOL_VERSION.to_string(),
        })
        .await
    }

    pub async fn send_message(&mut self, message: &ClientMessage) -> Result<(), ClientError> {
        self.send_json(message).await
    }

    /// Sends anything serializable, well-formed or not
    pub async fn send_json<T: Serialize + ?Sized>(
        &mut self,
        message: &T,
    ) -> Result<(), ClientError> {
        codec::write_message(&mut self.stream, message).await?;
        Ok(())
    }

    /// Sends `content` as a frame payload, without checking it is JSON
    pub async fn send_string(&mut self, content: &str) -> Result<(), ClientError> {
        codec::write_frame(&mut self.stream, content.as_bytes()).await?;
        Ok(())
    }

    /// Writes only a length prefix announcing `length` bytes
    pub async fn send_raw_frame_header(&mut self, length: u32) -> Result<(), ClientError> {
        self.stream
            .write_all(&length.to_le_bytes())
            .await
            .map_err(ClientError::Write)?;
        self.stream.flush().await.map_err(ClientError::Write)
    }

    pub async fn read_message(&mut self) -> Result<Value, ClientError> {
        Ok(codec::read_message(&mut self.stream, FrameLimit::Regular).await?)
    }

    pub async fn read_server_message(&mut self) -> Result<ServerMessage, ClientError> {
        let message = self.read_message().await?;
        serde_json::from_value(message).map_err(ClientError::UnexpectedMessage)
    }

    pub async fn read_server_message_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<ServerMessage, ClientError> {
        tokio::time::timeout(timeout, self.read_server_message())
            .await
            .map_err(|_| ClientError::Timeout(timeout))?
    }

    /// Closes the connection
    pub async fn disconnect(mut self) {
        if let Err(e) = self.stream.shutdown().await {
            debug!("Could not shut down connection: {}", e);
        }
    }
}
