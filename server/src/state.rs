//! Session registry shared by every handler
//!
//! One [`GlobalState`] exists per server, behind a single async mutex. Critical
//! sections stay short: handlers take what they need (a snapshot of the
//! rosters, a channel) and release the lock before doing any I/O, with one
//! exception: LOGIN_ACK is written while the lock is held, so that admission
//! and registration are atomic from the other handlers' point of view.

use crate::client::ClientEvent;
use crate::client_manager::{ClientKind, ClientManager};
use crate::config::Config;
use crate::connection::{ConnectionId, KickHandle};
use log::{debug, info};
use shared::Role;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

pub type SharedState = Arc<Mutex<GlobalState>>;

/// Where the session is in its single game
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GamePhase {
    NotRunning,
    Running,
    Finished,
}

/// Why a LOGIN was refused, as sent in the KICK
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error("LOGIN denied: Game has been started")]
    GameStarted,
    #[error("LOGIN denied: Game is finished")]
    GameFinished,
    #[error("LOGIN denied: Orchestrator is shutting down")]
    ShuttingDown,
    #[error("LOGIN denied: Maximum number of players reached")]
    TooManyPlayers,
    #[error("LOGIN denied: Maximum number of special players reached")]
    TooManySpecialPlayers,
    #[error("LOGIN denied: Maximum number of visus reached")]
    TooManyVisus,
    #[error("LOGIN denied: A game logic is already logged in")]
    GameLogicAlreadyLoggedIn,
    #[error("LOGIN denied: Could not send LOGIN_ACK")]
    LoginAckFailed,
}

impl AdmissionError {
    /// The denial for a full roster of `kind`
    pub fn roster_full(kind: ClientKind) -> Self {
        match kind {
            ClientKind::Player => AdmissionError::TooManyPlayers,
            ClientKind::SpecialPlayer => AdmissionError::TooManySpecialPlayers,
            ClientKind::Visualization => AdmissionError::TooManyVisus,
        }
    }
}

/// Why the game could not be started from the prompt
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StartError {
    #[error("Game has already been started")]
    AlreadyStarted,
    #[error("Cannot start: No game logic")]
    NoGameLogic,
}

/// Registry entry of the game logic connection
#[derive(Debug)]
pub struct GameLogicHandle {
    pub id: ConnectionId,
    pub kick: KickHandle,
    start: Option<oneshot::Sender<()>>,
    player_disconnected: mpsc::UnboundedSender<i64>,
}

impl GameLogicHandle {
    pub fn new(
        id: ConnectionId,
        kick: KickHandle,
        start: oneshot::Sender<()>,
        player_disconnected: mpsc::UnboundedSender<i64>,
    ) -> Self {
        GameLogicHandle {
            id,
            kick,
            start: Some(start),
            player_disconnected,
        }
    }

    /// Tells the turn loop that a player left, so fast mode stops waiting
    /// for its actions
    pub fn notify_player_disconnected(&self, player_id: i64) {
        if self.player_disconnected.send(player_id).is_err() {
            debug!("Game logic handler is gone, dropping disconnection of player {}", player_id);
        }
    }
}

/// Everything handlers share about the session
pub struct GlobalState {
    pub phase: GamePhase,
    pub config: Config,
    pub clients: ClientManager,
    pub game_logic: Option<GameLogicHandle>,
    /// GAME_STARTS for visualizations that log in while the game runs
    pub late_visu_start: Option<ClientEvent>,
    /// Set once shutdown has collected the connections to close
    pub shutting_down: bool,
    pub(crate) listener_task: Option<JoinHandle<()>>,
}

impl GlobalState {
    pub fn new(config: Config) -> Self {
        GlobalState {
            phase: GamePhase::NotRunning,
            config,
            clients: ClientManager::new(),
            game_logic: None,
            late_visu_start: None,
            shutting_down: false,
            listener_task: None,
        }
    }

    /// A fresh registry behind its mutex
    pub fn shared(config: Config) -> SharedState {
        Arc::new(Mutex::new(Self::new(config)))
    }

    /// Configured maximum for the roster of `kind`
    pub fn capacity(&self, kind: ClientKind) -> usize {
        match kind {
            ClientKind::Player => self.config.nb_players_max,
            ClientKind::SpecialPlayer => self.config.nb_special_players_max,
            ClientKind::Visualization => self.config.nb_visus_max,
        }
    }

    /// Decides whether a client asking for `role` may log in right now
    pub fn check_admission(&self, role: Role) -> Result<(), AdmissionError> {
        if self.shutting_down {
            return Err(AdmissionError::ShuttingDown);
        }
        let started = self.phase != GamePhase::NotRunning;
        match ClientKind::from_role(role) {
            None if started => Err(AdmissionError::GameStarted),
            None if self.game_logic.is_some() => Err(AdmissionError::GameLogicAlreadyLoggedIn),
            None => Ok(()),
            // Visualizations may join a running game
            Some(kind) if started && kind.is_player() => Err(AdmissionError::GameStarted),
            Some(_) if self.phase == GamePhase::Finished => Err(AdmissionError::GameFinished),
            Some(kind) if self.is_roster_full(kind) => Err(AdmissionError::roster_full(kind)),
            Some(_) => Ok(()),
        }
    }

    fn is_roster_full(&self, kind: ClientKind) -> bool {
        self.clients.count(kind) >= self.capacity(kind)
    }

    /// True when every roster is exactly at capacity and a game logic is there
    pub fn is_full(&self) -> bool {
        self.game_logic.is_some()
            && [
                ClientKind::Player,
                ClientKind::SpecialPlayer,
                ClientKind::Visualization,
            ]
            .into_iter()
            .all(|kind| self.clients.count(kind) == self.capacity(kind))
    }

    /// Moves the game to RUNNING and wakes the game logic handler up
    pub fn start_game(&mut self) -> Result<(), StartError> {
        if self.phase != GamePhase::NotRunning {
            return Err(StartError::AlreadyStarted);
        }
        let game_logic = self.game_logic.as_mut().ok_or(StartError::NoGameLogic)?;

        self.phase = GamePhase::Running;
        if let Some(start) = game_logic.start.take() {
            if start.send(()).is_err() {
                debug!("Game logic handler is gone before the game could start");
            }
        }
        info!("Game started");
        Ok(())
    }

    /// Starts the game if autostart is on and everybody is there
    pub fn autostart_if_ready(&mut self) {
        if self.config.autostart && self.phase == GamePhase::NotRunning && self.is_full() {
            info!("All expected clients are connected, starting the game");
            if let Err(e) = self.start_game() {
                debug!("Autostart failed: {}", e);
            }
        }
    }

    /// Kick handles of every registered connection, game logic included
    pub fn kick_handles(&self) -> Vec<KickHandle> {
        self.clients
            .iter()
            .map(|handle| handle.kick.clone())
            .chain(self.game_logic.iter().map(|gl| gl.kick.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientInbox;
    use crate::client_manager::{ClientHandle, PlayerRecord};

    fn test_config() -> Config {
        Config {
            nb_players_max: 2,
            nb_special_players_max: 1,
            nb_visus_max: 1,
            autostart: true,
            ..Config::default()
        }
    }

    fn add_client(state: &mut GlobalState, id: u64, kind: ClientKind) {
        let (kick, _) = KickHandle::detached();
        let (inbox, _) = ClientInbox::channel();
        let handle = ClientHandle {
            id: ConnectionId(id),
            kind,
            record: Arc::new(PlayerRecord::new("bot", "127.0.0.1:1".parse().unwrap())),
            inbox,
            kick,
        };
        let capacity = state.capacity(kind);
        state.clients.add(handle, capacity).unwrap();
    }

    fn add_game_logic(state: &mut GlobalState) -> oneshot::Receiver<()> {
        let (kick, _) = KickHandle::detached();
        let (start_tx, start_rx) = oneshot::channel();
        let (disconnected_tx, _) = mpsc::unbounded_channel();
        state.game_logic = Some(GameLogicHandle::new(
            ConnectionId(100),
            kick,
            start_tx,
            disconnected_tx,
        ));
        start_rx
    }

    #[test]
    fn test_admission_on_capacity() {
        let mut state = GlobalState::new(test_config());

        add_client(&mut state, 1, ClientKind::Player);
        assert!(state.check_admission(Role::Player).is_ok());
        add_client(&mut state, 2, ClientKind::Player);
        assert_eq!(
            state.check_admission(Role::Player),
            Err(AdmissionError::TooManyPlayers)
        );

        add_client(&mut state, 3, ClientKind::SpecialPlayer);
        assert_eq!(
            state.check_admission(Role::SpecialPlayer),
            Err(AdmissionError::TooManySpecialPlayers)
        );

        add_client(&mut state, 4, ClientKind::Visualization);
        assert_eq!(
            state.check_admission(Role::Visualization),
            Err(AdmissionError::TooManyVisus)
        );

        assert!(state.check_admission(Role::GameLogic).is_ok());
        add_game_logic(&mut state);
        assert_eq!(
            state.check_admission(Role::GameLogic),
            Err(AdmissionError::GameLogicAlreadyLoggedIn)
        );
    }

    #[test]
    fn test_admission_once_started() {
        let mut state = GlobalState::new(test_config());
        add_game_logic(&mut state);
        state.start_game().unwrap();

        assert_eq!(
            state.check_admission(Role::Player),
            Err(AdmissionError::GameStarted)
        );
        assert_eq!(
            state.check_admission(Role::SpecialPlayer),
            Err(AdmissionError::GameStarted)
        );
        assert_eq!(
            state.check_admission(Role::GameLogic),
            Err(AdmissionError::GameStarted)
        );
        // Visualizations may join late
        assert!(state.check_admission(Role::Visualization).is_ok());
    }

    #[test]
    fn test_admission_once_finished_or_shutting_down() {
        let mut state = GlobalState::new(test_config());
        add_game_logic(&mut state);
        state.start_game().unwrap();
        state.phase = GamePhase::Finished;

        assert_eq!(
            state.check_admission(Role::Visualization),
            Err(AdmissionError::GameFinished)
        );
        assert_eq!(
            state.check_admission(Role::Player),
            Err(AdmissionError::GameStarted)
        );

        let mut state = GlobalState::new(test_config());
        state.shutting_down = true;
        for role in [Role::Player, Role::Visualization, Role::GameLogic] {
            assert_eq!(state.check_admission(role), Err(AdmissionError::ShuttingDown));
        }
    }

    #[test]
    fn test_admission_error_texts() {
        assert_eq!(
            AdmissionError::TooManyVisus.to_string(),
            "LOGIN denied: Maximum number of visus reached"
        );
        assert_eq!(
            AdmissionError::GameLogicAlreadyLoggedIn.to_string(),
            "LOGIN denied: A game logic is already logged in"
        );
    }

    #[test]
    fn test_start_game() {
        let mut state = GlobalState::new(test_config());
        assert_eq!(state.start_game(), Err(StartError::NoGameLogic));

        let mut start_rx = add_game_logic(&mut state);
        assert!(start_rx.try_recv().is_err());

        state.start_game().unwrap();
        assert_eq!(state.phase, GamePhase::Running);
        assert!(start_rx.try_recv().is_ok());

        assert_eq!(state.start_game(), Err(StartError::AlreadyStarted));
    }

    #[test]
    fn test_autostart_waits_for_full_rosters() {
        let mut state = GlobalState::new(test_config());
        let mut start_rx = add_game_logic(&mut state);

        add_client(&mut state, 1, ClientKind::Player);
        add_client(&mut state, 2, ClientKind::Player);
        add_client(&mut state, 3, ClientKind::SpecialPlayer);
        state.autostart_if_ready();
        assert_eq!(state.phase, GamePhase::NotRunning);

        add_client(&mut state, 4, ClientKind::Visualization);
        state.autostart_if_ready();
        assert_eq!(state.phase, GamePhase::Running);
        assert!(start_rx.try_recv().is_ok());
    }

    #[test]
    fn test_autostart_disabled() {
        let mut state = GlobalState::new(Config {
            nb_players_max: 1,
            nb_visus_max: 0,
            ..Config::default()
        });
        add_game_logic(&mut state);
        add_client(&mut state, 1, ClientKind::Player);

        assert!(state.is_full());
        state.autostart_if_ready();
        assert_eq!(state.phase, GamePhase::NotRunning);
    }

    #[test]
    fn test_kick_handles() {
        let mut state = GlobalState::new(test_config());
        assert!(state.kick_handles().is_empty());

        add_client(&mut state, 1, ClientKind::Player);
        add_client(&mut state, 2, ClientKind::Visualization);
        add_game_logic(&mut state);
        assert_eq!(state.kick_handles().len(), 3);
    }
}
