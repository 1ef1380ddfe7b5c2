//! Game logic handler
//!
//! The game logic is the one privileged client: it computes every game state
//! while the orchestrator relays. Its handler drives the whole game:
//!
//! 1. wait for the start signal (prompt `start` or autostart),
//! 2. assign player IDs and exchange DO_INIT / DO_INIT_ACK,
//! 3. loop DO_TURN / DO_TURN_ACK, broadcasting a TURN after each
//!    acknowledgement, until `nb_turns_max` turns have been played or the
//!    game logic flags its acknowledgement as final,
//! 4. keep draining its channels until shutdown.
//!
//! Turns are either timed (fixed delay between a TURN and the next DO_TURN)
//! or fast (next DO_TURN as soon as every connected player answered).
//! Any failure of the game logic ends the session.

use crate::client::{ClientEvent, GAME_FINISHED_REASON};
use crate::client_manager::{ClientHandle, PlayerRecord};
use crate::config::Config;
use crate::connection::{or_closed, Connection};
use crate::network::{ExitSender, SessionExit};
use crate::state::{GamePhase, GlobalState, SharedState};
use log::{debug, info, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use shared::protocol::{DoInitAckMessage, DoTurnAckMessage};
use shared::{GameEnds, GameStarts, PlayerActions, PlayerInformation, ServerMessage, Turn};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, sleep_until, Instant};

pub const DO_INIT_ACK_TIMEOUT: Duration = Duration::from_secs(3);

/// Lets client handlers forward player actions to the game logic handler
#[derive(Debug, Clone)]
pub struct GameLogicLink {
    actions: mpsc::Sender<PlayerActions>,
}

impl GameLogicLink {
    pub(crate) fn new(actions: mpsc::Sender<PlayerActions>) -> Self {
        GameLogicLink { actions }
    }

    /// Returns false if the game logic handler is gone
    pub async fn forward(&self, actions: PlayerActions) -> bool {
        self.actions.send(actions).await.is_ok()
    }
}

/// Actions received since the last DO_TURN, at most one entry per player
#[derive(Debug, Default)]
pub struct ActionBatch {
    actions: Vec<PlayerActions>,
}

impl ActionBatch {
    /// Adds actions, replacing any previous entry of the same player
    ///
    /// The replaced entry is swapped to the end before being overwritten.
    pub fn push(&mut self, actions: PlayerActions) {
        match self
            .actions
            .iter()
            .position(|pending| pending.player_id == actions.player_id)
        {
            Some(index) => {
                let last = self.actions.len() - 1;
                self.actions.swap(index, last);
                self.actions[last] = actions;
            }
            None => self.actions.push(actions),
        }
    }

    pub fn take(&mut self) -> Vec<PlayerActions> {
        std::mem::take(&mut self.actions)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Tracks, in fast mode, which players still have to answer the current turn
#[derive(Debug, Default)]
pub struct TurnGate {
    connected: HashSet<i64>,
    waiting: Option<(i64, HashSet<i64>)>,
}

impl TurnGate {
    pub fn new(players: impl IntoIterator<Item = i64>) -> Self {
        TurnGate {
            connected: players.into_iter().collect(),
            waiting: None,
        }
    }

    /// Starts waiting for every connected player to answer `turn_number`
    pub fn open(&mut self, turn_number: i64) {
        self.waiting = Some((turn_number, self.connected.clone()));
    }

    pub fn close(&mut self) {
        self.waiting = None;
    }

    pub fn record_action(&mut self, player_id: i64, turn_number: i64) {
        if let Some((turn, waiting)) = &mut self.waiting {
            if *turn == turn_number {
                waiting.remove(&player_id);
            }
        }
    }

    pub fn record_disconnection(&mut self, player_id: i64) {
        self.connected.remove(&player_id);
        if let Some((_, waiting)) = &mut self.waiting {
            waiting.remove(&player_id);
        }
    }

    /// True once every expected player answered or left
    pub fn is_ready(&self) -> bool {
        matches!(&self.waiting, Some((_, waiting)) if waiting.is_empty())
    }

    pub fn nb_connected(&self) -> usize {
        self.connected.len()
    }
}

/// Special players get `0..nb_special`, other players a random permutation
/// of `nb_special..nb_special + nb_players`
pub fn assign_player_ids<R: Rng + ?Sized>(
    nb_special: usize,
    nb_players: usize,
    rng: &mut R,
) -> (Vec<i64>, Vec<i64>) {
    let special: Vec<i64> = (0..nb_special as i64).collect();
    let mut players: Vec<i64> = (nb_special as i64..(nb_special + nb_players) as i64).collect();
    players.shuffle(rng);
    (special, players)
}

/// Everything fixed when the game starts
struct GameSetup {
    config: Config,
    nb_players: usize,
    nb_special_players: usize,
    /// Sorted by player ID
    records: Vec<Arc<PlayerRecord>>,
}

impl GameSetup {
    fn from_state(state: &GlobalState) -> Self {
        let special = state.clients.special_players();
        let players = state.clients.players();
        let (special_ids, player_ids) =
            assign_player_ids(special.len(), players.len(), &mut rand::thread_rng());

        let mut records = Vec::with_capacity(special.len() + players.len());
        for (handle, id) in special.iter().zip(special_ids).chain(players.iter().zip(player_ids)) {
            handle.record.set_player_id(id);
            records.push(handle.record.clone());
        }
        records.sort_by_key(|record| record.player_id());

        GameSetup {
            config: state.config.clone(),
            nb_players: players.len(),
            nb_special_players: special.len(),
            records,
        }
    }

    fn nb_total_players(&self) -> usize {
        self.nb_players + self.nb_special_players
    }

    fn players_info(&self) -> Vec<PlayerInformation> {
        self.records.iter().map(|record| record.snapshot()).collect()
    }
}

/// Why the game stopped before its end
enum Interrupt {
    /// Shutdown asked for it
    Cancelled(String),
    /// The game logic failed; the session cannot go on
    Fatal(String),
}

pub struct GameLogicClient {
    conn: Connection,
    start: oneshot::Receiver<()>,
    actions: mpsc::Receiver<PlayerActions>,
    link: GameLogicLink,
    player_disconnected: mpsc::UnboundedReceiver<i64>,
}

impl GameLogicClient {
    pub fn new(
        conn: Connection,
        start: oneshot::Receiver<()>,
        player_disconnected: mpsc::UnboundedReceiver<i64>,
    ) -> Self {
        let (actions_tx, actions) = mpsc::channel(1);
        GameLogicClient {
            conn,
            start,
            actions,
            link: GameLogicLink::new(actions_tx),
            player_disconnected,
        }
    }

    pub async fn run(mut self, state: SharedState, exit: ExitSender) {
        if let Err(interrupt) = self.wait_for_start().await {
            self.unregister(&state).await;
            match interrupt {
                Interrupt::Cancelled(reason) => self.conn.kick(&reason).await,
                Interrupt::Fatal(reason) => {
                    self.conn.kick(&reason).await;
                    let _ = exit.send(SessionExit::GameLogicFailed(reason));
                }
            }
            return;
        }

        match self.play(&state).await {
            Ok(()) => {
                let _ = exit.send(SessionExit::GameFinished);
            }
            Err(Interrupt::Cancelled(reason)) => {
                self.conn.kick(&reason).await;
                return;
            }
            Err(Interrupt::Fatal(reason)) => {
                self.conn.kick(&reason).await;
                let _ = exit.send(SessionExit::GameLogicFailed(reason));
            }
        }

        self.drain().await;
    }

    async fn wait_for_start(&mut self) -> Result<(), Interrupt> {
        tokio::select! {
            started = &mut self.start => started.map_err(|_| {
                Interrupt::Fatal("Game start signal lost".to_string())
            }),
            Some(reason) = self.conn.cancel.recv() => Err(Interrupt::Cancelled(reason)),
            message = self.conn.incoming.recv() => match or_closed(message) {
                Ok(_) => Err(Interrupt::Fatal(
                    "Received a game logic message but the game has not started".to_string(),
                )),
                Err(e) => Err(Interrupt::Fatal(format!("Game logic error. {}", e))),
            },
        }
    }

    async fn unregister(&self, state: &SharedState) {
        let mut guard = state.lock().await;
        if guard.game_logic.as_ref().map(|gl| gl.id) == Some(self.conn.id()) {
            guard.game_logic = None;
        }
    }

    async fn play(&mut self, state: &SharedState) -> Result<(), Interrupt> {
        let setup = {
            let guard = state.lock().await;
            GameSetup::from_state(&guard)
        };
        info!(
            "Initializing game (players={}, special players={}, turns={})",
            setup.nb_players, setup.nb_special_players, setup.config.nb_turns_max
        );

        let initial_game_state = self.initialize(&setup).await?;
        self.broadcast_game_starts(state, &setup, initial_game_state)
            .await;
        self.turn_loop(state, &setup).await
    }

    /// Sends DO_INIT and returns the initial game state from DO_INIT_ACK
    async fn initialize(&mut self, setup: &GameSetup) -> Result<serde_json::Value, Interrupt> {
        let do_init = ServerMessage::DoInit {
            nb_players: setup.nb_players,
            nb_special_players: setup.nb_special_players,
            nb_turns_max: setup.config.nb_turns_max,
        };
        self.conn
            .send(&do_init)
            .await
            .map_err(|e| Interrupt::Fatal(format!("Cannot send DO_INIT. {}", e)))?;

        let message = tokio::select! {
            Some(reason) = self.conn.cancel.recv() => return Err(Interrupt::Cancelled(reason)),
            message = self.conn.incoming.recv() => or_closed(message)
                .map_err(|e| Interrupt::Fatal(format!("Cannot read DO_INIT_ACK. {}", e)))?,
            _ = sleep(DO_INIT_ACK_TIMEOUT) => {
                return Err(Interrupt::Fatal(
                    "Did not receive DO_INIT_ACK after 3 seconds.".to_string(),
                ));
            }
        };

        let ack = DoInitAckMessage::parse(&message)
            .map_err(|e| Interrupt::Fatal(format!("Invalid DO_INIT_ACK message. {}", e)))?;
        Ok(ack.initial_game_state)
    }

    async fn broadcast_game_starts(
        &self,
        state: &SharedState,
        setup: &GameSetup,
        initial_game_state: serde_json::Value,
    ) {
        let visu_message = GameStarts {
            player_id: -1,
            players_info: setup.players_info(),
            nb_players: setup.nb_players,
            nb_special_players: setup.nb_special_players,
            nb_turns_max: setup.config.nb_turns_max,
            milliseconds_before_first_turn: setup.config.delay_first_turn_ms,
            milliseconds_between_turns: setup.config.delay_turns_ms,
            initial_game_state,
        };

        // Visualizations logging in from now on get the cached message
        let recipients = {
            let mut guard = state.lock().await;
            guard.late_visu_start = Some(ClientEvent::GameStarts {
                message: visu_message.clone(),
                game_logic: self.link.clone(),
            });
            recipients(&guard)
        };

        for handle in recipients {
            let message = if handle.kind.is_player() {
                GameStarts {
                    player_id: handle.record.player_id(),
                    players_info: Vec::new(),
                    ..visu_message.clone()
                }
            } else {
                visu_message.clone()
            };
            handle.inbox.push(ClientEvent::GameStarts {
                message,
                game_logic: self.link.clone(),
            });
        }
    }

    async fn turn_loop(&mut self, state: &SharedState, setup: &GameSetup) -> Result<(), Interrupt> {
        let fast = setup.config.fast;
        let nb_turns_max = i64::from(setup.config.nb_turns_max);
        let mut batch = ActionBatch::default();
        let mut gate = TurnGate::new(setup.records.iter().map(|record| record.player_id()));
        let mut next_do_turn = Some(Instant::now() + setup.config.delay_first_turn());
        let mut awaiting_ack = false;
        let mut turns_sent: i64 = 0;

        loop {
            let deadline = next_do_turn.unwrap_or_else(Instant::now);

            tokio::select! {
                Some(reason) = self.conn.cancel.recv() => return Err(Interrupt::Cancelled(reason)),
                _ = sleep_until(deadline), if next_do_turn.is_some() => {
                    next_do_turn = None;
                    self.send_do_turn(&mut batch).await?;
                    awaiting_ack = true;
                }
                Some(actions) = self.actions.recv() => {
                    debug!(
                        "Received actions of player {} for turn {}",
                        actions.player_id, actions.turn_number
                    );
                    gate.record_action(actions.player_id, actions.turn_number);
                    batch.push(actions);
                }
                Some(player_id) = self.player_disconnected.recv() => {
                    gate.record_disconnection(player_id);
                    debug!(
                        "Player {} disconnected, {} players remaining",
                        player_id,
                        gate.nb_connected()
                    );
                }
                message = self.conn.incoming.recv() => {
                    let message = or_closed(message)
                        .map_err(|e| Interrupt::Fatal(format!("Cannot read DO_TURN_ACK. {}", e)))?;
                    if !awaiting_ack {
                        return Err(Interrupt::Fatal(
                            "Received a game logic message while no DO_TURN_ACK was expected"
                                .to_string(),
                        ));
                    }
                    let ack = DoTurnAckMessage::parse(&message, setup.nb_total_players())
                        .map_err(|e| {
                            Interrupt::Fatal(format!("Invalid DO_TURN_ACK message. {}", e))
                        })?;
                    awaiting_ack = false;

                    let turn_number = turns_sent;
                    turns_sent += 1;
                    self.broadcast_turn(state, setup, turn_number, &ack.game_state).await;

                    if turns_sent >= nb_turns_max || ack.game_finished {
                        self.finish(state, setup, ack.winner_player_id, ack.game_state).await;
                        return Ok(());
                    }

                    if fast {
                        gate.open(turn_number);
                    } else {
                        next_do_turn = Some(Instant::now() + setup.config.delay_turns());
                    }
                }
            }

            if fast && gate.is_ready() {
                gate.close();
                self.send_do_turn(&mut batch).await?;
                awaiting_ack = true;
            }
        }
    }

    async fn send_do_turn(&mut self, batch: &mut ActionBatch) -> Result<(), Interrupt> {
        let player_actions = batch.take();
        debug!("Sending DO_TURN with {} player actions", player_actions.len());
        self.conn
            .send(&ServerMessage::DoTurn { player_actions })
            .await
            .map_err(|e| Interrupt::Fatal(format!("Cannot send DO_TURN. {}", e)))
    }

    async fn broadcast_turn(
        &self,
        state: &SharedState,
        setup: &GameSetup,
        turn_number: i64,
        game_state: &serde_json::Value,
    ) {
        let players_info = setup.players_info();
        let recipients = recipients(&*state.lock().await);

        for handle in recipients {
            let turn = Turn {
                turn_number,
                game_state: game_state.clone(),
                players_info: if handle.kind.is_player() {
                    Vec::new()
                } else {
                    players_info.clone()
                },
            };
            handle.inbox.new_turn(turn);
        }
    }

    async fn finish(
        &mut self,
        state: &SharedState,
        setup: &GameSetup,
        winner_player_id: i64,
        game_state: serde_json::Value,
    ) {
        match setup
            .records
            .iter()
            .find(|record| record.player_id() == winner_player_id)
        {
            Some(winner) => info!(
                "Game is finished (winner player ID={}, nickname={})",
                winner_player_id,
                winner.nickname()
            ),
            None => info!("Game is finished (no winner!)"),
        }

        let recipients = {
            let mut guard = state.lock().await;
            guard.phase = GamePhase::Finished;
            guard.late_visu_start = None;
            recipients(&guard)
        };

        let game_ends = GameEnds {
            winner_player_id,
            game_state,
        };
        for handle in recipients {
            handle.inbox.push(ClientEvent::GameEnds(game_ends.clone()));
        }

        self.conn.kick(GAME_FINISHED_REASON).await;
    }

    /// Consumes everything sent to this handler until shutdown
    async fn drain(mut self) {
        loop {
            tokio::select! {
                Some(reason) = self.conn.cancel.recv() => {
                    self.conn.kick(&reason).await;
                    return;
                }
                Some(_) = self.actions.recv() => {}
                Some(_) = self.player_disconnected.recv() => {}
                Some(_) = self.conn.incoming.recv() => {}
                else => {
                    warn!("Game logic handler has nothing left to drain");
                    return;
                }
            }
        }
    }
}

fn recipients(state: &GlobalState) -> Vec<ClientHandle> {
    state.clients.iter().cloned().collect()
}
