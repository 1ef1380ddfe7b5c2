//! Handler for players, special players and visualizations
//!
//! One task per logged-in client. The game logic handler writes into the
//! client's [`ClientInbox`], the client answers every TURN with a TURN_ACK. A
//! client that is still thinking when a new turn arrives only ever gets the
//! newest one: TURNs land in a single slot that every new turn overwrites.

use crate::client_manager::{ClientKind, PlayerRecord};
use crate::connection::{or_closed, ClientState, Connection, IncomingMessage};
use crate::game::GameLogicLink;
use crate::state::{GamePhase, SharedState};
use log::{debug, info};
use shared::protocol::TurnAckMessage;
use shared::{GameEnds, GameStarts, PlayerActions, ServerMessage, Turn};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

pub const GAME_FINISHED_REASON: &str = "Game is finished";

/// A client gets at most GAME_STARTS then GAME_ENDS
const EVENT_QUEUE_CAPACITY: usize = 2;

/// Game lifecycle events delivered to a client handler
#[derive(Debug, Clone)]
pub enum ClientEvent {
    GameStarts {
        message: GameStarts,
        game_logic: GameLogicLink,
    },
    GameEnds(GameEnds),
}

/// Sending half of a client's inbox
///
/// Lifecycle events go through a short bounded queue. TURNs go through a
/// single slot, so at most one TURN is held per client however slowly it
/// reads.
#[derive(Debug, Clone)]
pub struct ClientInbox {
    events: mpsc::Sender<ClientEvent>,
    turns: Arc<watch::Sender<Option<Turn>>>,
}

/// Receiving half of a client's inbox, owned by the handler
#[derive(Debug)]
pub struct InboxReceiver {
    events: mpsc::Receiver<ClientEvent>,
    turns: watch::Receiver<Option<Turn>>,
}

impl ClientInbox {
    pub fn channel() -> (ClientInbox, InboxReceiver) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let (turns_tx, turns_rx) = watch::channel(None);
        (
            ClientInbox {
                events: events_tx,
                turns: Arc::new(turns_tx),
            },
            InboxReceiver {
                events: events_rx,
                turns: turns_rx,
            },
        )
    }

    /// Queues a lifecycle event without waiting
    pub fn push(&self, event: ClientEvent) {
        if let Err(e) = self.events.try_send(event) {
            debug!("Dropping client event: {}", e);
        }
    }

    /// Replaces the turn waiting for the client, if any
    pub fn new_turn(&self, turn: Turn) {
        self.turns.send_replace(Some(turn));
    }
}

pub struct PlayerOrVisuClient {
    conn: Connection,
    kind: ClientKind,
    record: Arc<PlayerRecord>,
    inbox: InboxReceiver,
    game_logic: Option<GameLogicLink>,
    last_turn_sent: i64,
}

impl PlayerOrVisuClient {
    pub fn new(
        conn: Connection,
        kind: ClientKind,
        record: Arc<PlayerRecord>,
        inbox: InboxReceiver,
    ) -> Self {
        PlayerOrVisuClient {
            conn,
            kind,
            record,
            inbox,
            game_logic: None,
            last_turn_sent: -1,
        }
    }

    /// Runs until the client is kicked, or until shutdown once the game ended
    pub async fn run(mut self, state: SharedState) {
        match self.event_loop().await {
            Ok(()) => {
                self.conn.kick(GAME_FINISHED_REASON).await;
                self.wait_for_termination().await;
            }
            Err(reason) => self.leave(&state, &reason).await,
        }
    }

    /// Returns once GAME_ENDS has been sent, or with a kick reason
    async fn event_loop(&mut self) -> Result<(), String> {
        loop {
            let awaits_turn =
                self.game_logic.is_some() && self.conn.state() == ClientState::Ready;

            // Turns before lifecycle events: the last TURN precedes GAME_ENDS
            tokio::select! {
                biased;
                Some(reason) = self.conn.cancel.recv() => return Err(reason),
                Ok(()) = self.inbox.turns.changed(), if awaits_turn => {
                    let turn = self.inbox.turns.borrow_and_update().clone();
                    if let Some(turn) = turn {
                        self.send_turn(turn).await?;
                    }
                }
                Some(event) = self.inbox.events.recv() => {
                    if self.on_event(event).await? {
                        return Ok(());
                    }
                }
                message = self.conn.incoming.recv() => self.on_message(or_closed(message)).await?,
            }
        }
    }

    /// Returns true when the game is over
    async fn on_event(&mut self, event: ClientEvent) -> Result<bool, String> {
        match event {
            ClientEvent::GameStarts {
                message,
                game_logic,
            } => {
                self.game_logic = Some(game_logic);
                self.conn
                    .send(&ServerMessage::GameStarts(message))
                    .await
                    .map_err(|e| format!("Cannot send GAME_STARTS. {}", e))?;
                self.conn.set_state(ClientState::Ready);
                Ok(false)
            }
            ClientEvent::GameEnds(game_ends) => {
                self.conn
                    .send(&ServerMessage::GameEnds(game_ends))
                    .await
                    .map_err(|e| format!("Cannot send GAME_ENDS. {}", e))?;
                self.conn.set_state(ClientState::Finished);
                Ok(true)
            }
        }
    }

    async fn send_turn(&mut self, turn: Turn) -> Result<(), String> {
        let turn_number = turn.turn_number;
        if self.last_turn_sent >= 0 && turn_number > self.last_turn_sent + 1 {
            debug!(
                "{} is too slow, skipping to turn {}",
                self.record.nickname(),
                turn_number
            );
        }
        self.conn
            .send(&ServerMessage::Turn(turn))
            .await
            .map_err(|e| format!("Cannot send TURN. {}", e))?;
        self.last_turn_sent = turn_number;
        self.conn.set_state(ClientState::Thinking);
        Ok(())
    }

    async fn on_message(&mut self, message: IncomingMessage) -> Result<(), String> {
        let content = message.map_err(|e| format!("Cannot read TURN_ACK. {}", e))?;
        let ack = TurnAckMessage::parse(&content)
            .map_err(|e| format!("Invalid TURN_ACK received. {}", e))?;

        ack.check_turn_number(self.last_turn_sent)
            .map_err(|e| format!("Invalid TURN_ACK received. {}", e))?;
        if self.conn.state() != ClientState::Thinking {
            return Err("Received a TURN_ACK but the client state is not THINKING".to_string());
        }

        if self.kind.is_player() {
            if let Some(game_logic) = &self.game_logic {
                let actions = PlayerActions {
                    player_id: self.record.player_id(),
                    turn_number: ack.turn_number,
                    actions: ack.actions,
                };
                if !game_logic.forward(actions).await {
                    debug!("Game logic is gone, dropping actions of {}", self.record.nickname());
                }
            }
        }

        self.conn.set_state(ClientState::Ready);
        Ok(())
    }

    /// Unregisters the client, then kicks it
    async fn leave(mut self, state: &SharedState, reason: &str) {
        {
            let mut guard = state.lock().await;
            self.record.mark_disconnected();
            guard.clients.remove(self.kind, self.conn.id());

            if self.kind.is_player() && guard.phase == GamePhase::Running && guard.config.fast {
                if let Some(game_logic) = &guard.game_logic {
                    game_logic.notify_player_disconnected(self.record.player_id());
                }
            }

            info!(
                "{:?} {} left ({} remaining in roster)",
                self.kind,
                self.record.nickname(),
                guard.clients.count(self.kind)
            );
        }

        self.conn.kick(reason).await;
    }

    /// Keeps the connection alive and drained until shutdown
    async fn wait_for_termination(mut self) {
        loop {
            tokio::select! {
                Some(reason) = self.conn.cancel.recv() => {
                    self.conn.kick(&reason).await;
                    return;
                }
                Some(_) = self.conn.incoming.recv() => {}
                Some(_) = self.inbox.events.recv() => {}
                else => return,
            }
        }
    }
}
