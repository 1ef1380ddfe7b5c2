//! Connection actor owning one client socket
//!
//! A background task reads frames from the socket and pushes them, decoded,
//! onto the `incoming` channel. The first decoding or I/O error is pushed as
//! well, then the reader stops for good. Writes go straight through the
//! owned write half.
//!
//! Every connection also owns a cancellation channel. Whoever holds a
//! [`KickHandle`] can ask the owning handler to kick the client, then wait
//! until the handler has let go of the connection.

use log::{debug, warn};
use serde_json::Value;
use shared::codec::{self, CodecError, FrameLimit};
use shared::ServerMessage;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Decoded frames buffered between the reader task and the handler
const INCOMING_QUEUE_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a client connection
///
/// `Unlogged -> Logged -> Ready <-> Thinking -> Finished | Kicked`.
/// `Kicked` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Unlogged,
    Logged,
    Ready,
    Thinking,
    Finished,
    Kicked,
}

/// Either a decoded JSON message or the error that ended the read loop
pub type IncomingMessage = Result<Value, CodecError>;

/// Requests the teardown of a connection from outside its handler
#[derive(Debug, Clone)]
pub struct KickHandle {
    tx: mpsc::Sender<String>,
}

impl KickHandle {
    /// Asks the owning handler to kick its client with `reason`
    ///
    /// Returns false if a request is already pending or the handler is gone.
    pub fn request(&self, reason: &str) -> bool {
        self.tx.try_send(reason.to_string()).is_ok()
    }

    /// Resolves once the handler has dropped the connection
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    /// A handle backed by a bare channel instead of a live connection
    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(1);
        (KickHandle { tx }, rx)
    }
}

pub struct Connection {
    id: ConnectionId,
    remote_addr: SocketAddr,
    nickname: Option<String>,
    state: ClientState,
    writer: OwnedWriteHalf,
    kick_grace: Duration,
    reader_task: JoinHandle<()>,
    cancel_tx: mpsc::Sender<String>,
    /// Frames decoded by the reader task
    pub(crate) incoming: mpsc::Receiver<IncomingMessage>,
    /// Kick reasons sent through a [`KickHandle`]
    pub(crate) cancel: mpsc::Receiver<String>,
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        stream: TcpStream,
        remote_addr: SocketAddr,
        kick_grace: Duration,
    ) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY for {}: {}", remote_addr, e);
        }

        let (reader, writer) = stream.into_split();
        let (incoming_tx, incoming) = mpsc::channel(INCOMING_QUEUE_SIZE);
        let (cancel_tx, cancel) = mpsc::channel(1);
        let reader_task = tokio::spawn(read_loop(reader, incoming_tx));

        Connection {
            id,
            remote_addr,
            nickname: None,
            state: ClientState::Unlogged,
            writer,
            kick_grace,
            reader_task,
            cancel_tx,
            incoming,
            cancel,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn nickname(&self) -> Option<&str> {
        self.nickname.as_deref()
    }

    pub fn set_nickname(&mut self, nickname: &str) {
        self.nickname = Some(nickname.to_string());
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn set_state(&mut self, state: ClientState) {
        if self.state != ClientState::Kicked {
            self.state = state;
        }
    }

    pub fn kick_handle(&self) -> KickHandle {
        KickHandle {
            tx: self.cancel_tx.clone(),
        }
    }

    /// Waits for the next incoming message
    ///
    /// Once the reader has stopped, every call reports a closed stream.
    pub async fn recv(&mut self) -> IncomingMessage {
        or_closed(self.incoming.recv().await)
    }

    pub async fn send(&mut self, message: &ServerMessage) -> Result<(), CodecError> {
        debug!(
            "Sending {} to {} ({})",
            message.message_type(),
            self.display_name(),
            self.remote_addr
        );
        codec::write_message(&mut self.writer, message).await
    }

    /// Sends a KICK, waits the grace delay, then closes the write half
    ///
    /// Kicking an already kicked connection does nothing.
    pub async fn kick(&mut self, reason: &str) {
        if self.state == ClientState::Kicked {
            return;
        }
        self.state = ClientState::Kicked;

        warn!(
            "Kicking {} (remote address={}, nickname={}): {}",
            self.id,
            self.remote_addr,
            self.display_name(),
            reason
        );

        let message = ServerMessage::Kick {
            kick_reason: reason.to_string(),
        };
        match codec::write_message(&mut self.writer, &message).await {
            // Leave the peer some time to read the KICK before closing
            Ok(()) => tokio::time::sleep(self.kick_grace).await,
            Err(e) => debug!("Could not send KICK to {}: {}", self.remote_addr, e),
        }

        if let Err(e) = self.writer.shutdown().await {
            debug!("Could not shut down socket of {}: {}", self.remote_addr, e);
        }
    }

    fn display_name(&self) -> &str {
        self.nickname.as_deref().unwrap_or("<unlogged>")
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

/// Maps the end of the incoming channel to a closed-stream error
pub(crate) fn or_closed(message: Option<IncomingMessage>) -> IncomingMessage {
    message.unwrap_or_else(|| {
        Err(CodecError::ReadSize(io::Error::from(
            io::ErrorKind::UnexpectedEof,
        )))
    })
}

async fn read_loop(reader: OwnedReadHalf, incoming: mpsc::Sender<IncomingMessage>) {
    let mut reader = BufReader::new(reader);
    let mut limit = FrameLimit::FirstMessage;

    loop {
        let message = codec::read_message(&mut reader, limit).await;
        let failed = message.is_err();
        if incoming.send(message).await.is_err() || failed {
            return;
        }
        limit = FrameLimit::Regular;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared::codec::{encode_frame, read_message, FIRST_FRAME_MAX_SIZE};
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    /// Returns a connection and the peer socket it talks to
    async fn connected_pair() -> (Connection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let peer = TcpStream::connect(addr).await.unwrap();
        let (stream, remote_addr) = listener.accept().await.unwrap();
        let conn = Connection::new(
            ConnectionId(1),
            stream,
            remote_addr,
            Duration::from_millis(10),
        );
        (conn, peer)
    }

    #[tokio::test]
    async fn test_receives_frames_in_order() {
        let (mut conn, mut peer) = connected_pair().await;

        peer.write_all(&encode_frame(br#"{"n":1}"#).unwrap())
            .await
            .unwrap();
        // Larger than the first-frame cap, fine once logged in
        let big = json!({ "blob": "x".repeat(5000) });
        peer.write_all(&encode_frame(big.to_string().as_bytes()).unwrap())
            .await
            .unwrap();

        assert_eq!(conn.recv().await.unwrap(), json!({"n": 1}));
        assert_eq!(conn.recv().await.unwrap(), big);
    }

    #[tokio::test]
    async fn test_first_frame_limit() {
        let (mut conn, mut peer) = connected_pair().await;

        peer.write_all(&(FIRST_FRAME_MAX_SIZE as u32 + 1).to_le_bytes())
            .await
            .unwrap();

        let err = conn.recv().await.unwrap_err();
        assert!(matches!(err, CodecError::FirstFrameTooBig { .. }));

        // The reader is gone for good
        assert!(conn.recv().await.is_err());
    }

    #[tokio::test]
    async fn test_peer_disconnection_is_reported() {
        let (mut conn, peer) = connected_pair().await;
        drop(peer);
        assert!(matches!(
            conn.recv().await.unwrap_err(),
            CodecError::ReadSize(_)
        ));
    }

    #[tokio::test]
    async fn test_kick_is_idempotent() {
        let (mut conn, mut peer) = connected_pair().await;
        conn.set_nickname("bob");

        conn.kick("first").await;
        conn.kick("second").await;
        assert_eq!(conn.state(), ClientState::Kicked);

        let kick = read_message(&mut peer, FrameLimit::Regular).await.unwrap();
        assert_eq!(kick, json!({"message_type": "KICK", "kick_reason": "first"}));

        // Nothing but the end of the stream follows
        assert!(read_message(&mut peer, FrameLimit::Regular).await.is_err());
    }

    #[tokio::test]
    async fn test_state_is_frozen_once_kicked() {
        let (mut conn, _peer) = connected_pair().await;
        conn.set_state(ClientState::Logged);
        assert_eq!(conn.state(), ClientState::Logged);

        conn.kick("bye").await;
        conn.set_state(ClientState::Ready);
        assert_eq!(conn.state(), ClientState::Kicked);
    }

    #[tokio::test]
    async fn test_kick_handle() {
        let (mut conn, _peer) = connected_pair().await;
        let handle = conn.kick_handle();

        assert!(handle.request("netorcai abort"));
        // Only one pending request fits
        assert!(!handle.request("again"));
        assert_eq!(conn.cancel.recv().await.unwrap(), "netorcai abort");

        let waiter = tokio::spawn({
            let handle = handle.clone();
            async move { handle.closed().await }
        });
        drop(conn);
        waiter.await.unwrap();
        assert!(!handle.request("late"));
    }
}
