//! Server network layer: TCP listener, connection dispatch and shutdown
//!
//! The accept loop gives every socket its own [`Connection`] and spawns the
//! login dispatcher on it. Handlers report the end of the session through an
//! [`ExitSender`]; the owner of the [`Server`] waits on it, then calls
//! [`Server::shutdown`].

use crate::config::Config;
use crate::connection::{Connection, ConnectionId};
use crate::login;
use crate::state::{GlobalState, SharedState};
use log::{debug, error, info};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

pub const ABORT_REASON: &str = "netorcai abort";

/// Upper bound on how long shutdown waits for handlers to let go
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a session is over
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionExit {
    GameFinished,
    GameLogicFailed(String),
}

impl SessionExit {
    pub fn exit_code(&self) -> i32 {
        match self {
            SessionExit::GameFinished => 0,
            SessionExit::GameLogicFailed(_) => 1,
        }
    }
}

pub type ExitSender = mpsc::UnboundedSender<SessionExit>;

pub struct Server {
    state: SharedState,
    local_addr: SocketAddr,
    exit_rx: mpsc::UnboundedReceiver<SessionExit>,
}

impl Server {
    /// Binds the listener and starts accepting connections
    pub async fn bind(config: Config) -> io::Result<Self> {
        let listener = TcpListener::bind(config.socket_addr_string()).await?;
        let local_addr = listener.local_addr()?;
        info!("Listening incoming connections on {}", local_addr);

        let kick_grace = config.kick_grace();
        let state = GlobalState::shared(config);
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();

        let listener_task = tokio::spawn(accept_loop(listener, state.clone(), exit_tx, kick_grace));
        state.lock().await.listener_task = Some(listener_task);

        Ok(Server {
            state,
            local_addr,
            exit_rx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> SharedState {
        self.state.clone()
    }

    /// Resolves with the first reported end of session
    ///
    /// Returns `None` only if every handler able to report is gone, which
    /// cannot happen while the accept loop runs.
    pub async fn wait_exit(&mut self) -> Option<SessionExit> {
        self.exit_rx.recv().await
    }

    pub async fn shutdown(&self) {
        shutdown(&self.state).await;
    }
}

async fn accept_loop(
    listener: TcpListener,
    state: SharedState,
    exit: ExitSender,
    kick_grace: Duration,
) {
    let mut next_id = 0u64;

    loop {
        match listener.accept().await {
            Ok((stream, remote_addr)) => {
                next_id += 1;
                let id = ConnectionId(next_id);
                debug!("New connection {} from {}", id, remote_addr);

                let conn = Connection::new(id, stream, remote_addr, kick_grace);
                tokio::spawn(login::handle_connection(conn, state.clone(), exit.clone()));
            }
            Err(e) => {
                error!("Error accepting connection: {}", e);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }
}

/// Stops accepting connections, kicks everybody and waits for the handlers
pub async fn shutdown(state: &SharedState) {
    let kick_handles = {
        let mut guard = state.lock().await;
        if let Some(listener_task) = guard.listener_task.take() {
            listener_task.abort();
        }
        // Connections still logging in are refused from now on
        guard.shutting_down = true;
        guard.kick_handles()
    };

    debug!("Closing {} connection(s)", kick_handles.len());
    for handle in &kick_handles {
        handle.request(ABORT_REASON);
    }

    let all_closed = async {
        for handle in &kick_handles {
            handle.closed().await;
        }
    };
    if timeout(SHUTDOWN_TIMEOUT, all_closed).await.is_err() {
        error!("Some connections did not close in time");
    }
    info!("Server shut down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use shared::codec::{read_message, write_message, FrameLimit};
    use tokio::net::TcpStream;

    fn test_config() -> Config {
        Config {
            bind_addr: "127.0.0.1".to_string(),
            port: 0,
            kick_grace_ms: 10,
            ..Config::default()
        }
    }

    async fn login(addr: SocketAddr, nickname: &str, role: &str) -> (TcpStream, Value) {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let login = json!({
            "message_type": "LOGIN",
            "nickname": nickname,
            "role": role,
            "metaprotocol_version": "2.0.0",
        });
        write_message(&mut stream, &login).await.unwrap();
        let answer = read_message(&mut stream, FrameLimit::Regular).await.unwrap();
        (stream, answer)
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(SessionExit::GameFinished.exit_code(), 0);
        assert_eq!(
            SessionExit::GameLogicFailed("boom".to_string()).exit_code(),
            1
        );
    }

    #[tokio::test]
    async fn test_bind_on_ephemeral_port() {
        let server = Server::bind(test_config()).await.unwrap();
        assert_ne!(server.local_addr().port(), 0);
        assert!(server.state().lock().await.listener_task.is_some());
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_login_is_acknowledged() {
        let server = Server::bind(test_config()).await.unwrap();
        let (_stream, answer) = login(server.local_addr(), "alice", "player").await;
        assert_eq!(answer["message_type"], "LOGIN_ACK");
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_kicks_everybody() {
        let server = Server::bind(test_config()).await.unwrap();
        let (mut player, _) = login(server.local_addr(), "alice", "player").await;
        let (mut visu, _) = login(server.local_addr(), "bob", "visualization").await;

        server.shutdown().await;

        for stream in [&mut player, &mut visu] {
            let kick = read_message(stream, FrameLimit::Regular).await.unwrap();
            assert_eq!(kick["message_type"], "KICK");
            assert_eq!(kick["kick_reason"], ABORT_REASON);
        }

        // No more connections once shut down
        let refused = TcpStream::connect(server.local_addr()).await;
        if let Ok(mut stream) = refused {
            assert!(read_message(&mut stream, FrameLimit::Regular).await.is_err());
        }
    }

    #[tokio::test]
    async fn test_login_during_shutdown_is_refused() {
        let server = Server::bind(test_config()).await.unwrap();
        let addr = server.local_addr();

        // Accepted, but not logged in when shutdown starts
        let mut stream = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let state = server.state();
        server.shutdown().await;
        assert!(state.lock().await.shutting_down);

        let login = json!({
            "message_type": "LOGIN",
            "nickname": "late",
            "role": "visualization",
            "metaprotocol_version": "2.0.0",
        });
        write_message(&mut stream, &login).await.unwrap();
        let kick = read_message(&mut stream, FrameLimit::Regular).await.unwrap();
        assert_eq!(kick["message_type"], "KICK");
        assert_eq!(kick["kick_reason"], "LOGIN denied: Orchestrator is shutting down");
        assert!(state.lock().await.clients.is_empty());
    }
}
