//! First-message handling for new connections
//!
//! A new connection must open with a valid LOGIN. The dispatcher validates
//! it, applies the admission rules of the requested role under the registry
//! lock, answers LOGIN_ACK, then turns into the role's long-lived handler.

use crate::client::{ClientInbox, PlayerOrVisuClient};
use crate::client_manager::{ClientHandle, ClientKind, PlayerRecord};
use crate::connection::{ClientState, Connection};
use crate::game::GameLogicClient;
use crate::network::ExitSender;
use crate::state::{AdmissionError, GameLogicHandle, GamePhase, SharedState};
use log::{debug, info, warn};
use shared::protocol::{LoginMessage, MetaprotocolVersion};
use shared::{Role, ServerMessage};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

pub async fn handle_connection(mut conn: Connection, state: SharedState, exit: ExitSender) {
    let login = match read_login(&mut conn).await {
        Ok(login) => login,
        Err(reason) => {
            conn.kick(&reason).await;
            return;
        }
    };
    conn.set_nickname(&login.nickname);

    match ClientKind::from_role(login.role) {
        Some(kind) => {
            if let Some(client) = admit_player_or_visu(conn, kind, &state).await {
                client.run(state).await;
            }
        }
        None => {
            if let Some(game_logic) = admit_game_logic(conn, &state).await {
                game_logic.run(state, exit).await;
            }
        }
    }
}

/// Reads and validates the first message, returning a kick reason on failure
async fn read_login(conn: &mut Connection) -> Result<LoginMessage, String> {
    let message = conn
        .recv()
        .await
        .map_err(|e| format!("Invalid first message: {}", e))?;
    let login =
        LoginMessage::parse(&message).map_err(|e| format!("Invalid first message: {}", e))?;

    let ours = MetaprotocolVersion::CURRENT;
    let theirs = login.metaprotocol_version;
    if !ours.is_compatible_with(&theirs) {
        return Err(format!(
            "Metaprotocol version mismatch. Major version must be identical (orchestrator={}, client={})",
            ours, theirs
        ));
    }
    if ours.minor != theirs.minor {
        warn!(
            "Metaprotocol minor version differs (orchestrator={}, client={}, nickname={})",
            ours, theirs, login.nickname
        );
    }

    debug!(
        "Received LOGIN from {} (nickname={}, role={})",
        conn.remote_addr(),
        login.nickname,
        login.role
    );
    Ok(login)
}

async fn admit_player_or_visu(
    mut conn: Connection,
    kind: ClientKind,
    state: &SharedState,
) -> Option<PlayerOrVisuClient> {
    let role = kind.role();
    let mut guard = state.lock().await;
    if let Err(denied) = guard.check_admission(role) {
        drop(guard);
        conn.kick(&denied.to_string()).await;
        return None;
    }
    if conn.send(&ServerMessage::LoginAck).await.is_err() {
        drop(guard);
        conn.kick(&AdmissionError::LoginAckFailed.to_string()).await;
        return None;
    }

    let nickname = conn.nickname().unwrap_or_default().to_string();
    let record = Arc::new(PlayerRecord::new(&nickname, conn.remote_addr()));
    let (inbox, inbox_rx) = ClientInbox::channel();

    // A visualization joining a running game catches up with GAME_STARTS
    if guard.phase == GamePhase::Running {
        if let Some(game_starts) = &guard.late_visu_start {
            inbox.push(game_starts.clone());
        }
    }

    let handle = ClientHandle {
        id: conn.id(),
        kind,
        record: record.clone(),
        inbox,
        kick: conn.kick_handle(),
    };
    let capacity = guard.capacity(kind);
    let count = match guard.clients.add(handle, capacity) {
        Ok(count) => count,
        Err(_) => {
            drop(guard);
            conn.kick(&AdmissionError::roster_full(kind).to_string()).await;
            return None;
        }
    };
    conn.set_state(ClientState::Logged);
    info!(
        "New {} accepted (nickname={}, remote address={}, count={}/{})",
        role,
        nickname,
        conn.remote_addr(),
        count,
        capacity
    );

    guard.autostart_if_ready();
    drop(guard);

    Some(PlayerOrVisuClient::new(conn, kind, record, inbox_rx))
}

async fn admit_game_logic(mut conn: Connection, state: &SharedState) -> Option<GameLogicClient> {
    let mut guard = state.lock().await;
    if let Err(denied) = guard.check_admission(Role::GameLogic) {
        drop(guard);
        conn.kick(&denied.to_string()).await;
        return None;
    }
    if conn.send(&ServerMessage::LoginAck).await.is_err() {
        drop(guard);
        conn.kick(&AdmissionError::LoginAckFailed.to_string()).await;
        return None;
    }

    let (start_tx, start_rx) = oneshot::channel();
    let (disconnected_tx, disconnected_rx) = mpsc::unbounded_channel();
    guard.game_logic = Some(GameLogicHandle::new(
        conn.id(),
        conn.kick_handle(),
        start_tx,
        disconnected_tx,
    ));
    conn.set_state(ClientState::Logged);
    info!(
        "Game logic accepted (nickname={}, remote address={})",
        conn.nickname().unwrap_or_default(),
        conn.remote_addr()
    );

    guard.autostart_if_ready();
    drop(guard);

    Some(GameLogicClient::new(conn, start_rx, disconnected_rx))
}
