//! Rosters of logged-in players and visualizations
//!
//! The client manager only stores handles: the connections themselves stay
//! owned by their handler tasks. A handle carries what other actors need to
//! reach a client (its event channel and kick handle) and the shared
//! [`PlayerRecord`] that visualizations see in `players_info`.
//!
//! Capacity is enforced on insertion. Removal is keyed by connection ID and
//! swaps the last entry into the freed slot, so roster order is not stable.

use crate::client::ClientInbox;
use crate::connection::{ConnectionId, KickHandle};
use shared::{PlayerInformation, Role};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

/// Which roster a non game-logic client belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientKind {
    Player,
    SpecialPlayer,
    Visualization,
}

impl ClientKind {
    /// None for the game logic, which has no roster
    pub fn from_role(role: Role) -> Option<Self> {
        match role {
            Role::Player => Some(ClientKind::Player),
            Role::SpecialPlayer => Some(ClientKind::SpecialPlayer),
            Role::Visualization => Some(ClientKind::Visualization),
            Role::GameLogic => None,
        }
    }

    /// Role a client of this kind logged in with
    pub fn role(self) -> Role {
        match self {
            ClientKind::Player => Role::Player,
            ClientKind::SpecialPlayer => Role::SpecialPlayer,
            ClientKind::Visualization => Role::Visualization,
        }
    }

    /// Players and special players submit actions, visualizations do not
    pub fn is_player(self) -> bool {
        !matches!(self, ClientKind::Visualization)
    }
}

/// Information about one client, shared between its handler and the game
/// logic handler
///
/// Records outlive roster membership: a disconnected player keeps its record,
/// only flagged as disconnected.
#[derive(Debug)]
pub struct PlayerRecord {
    nickname: String,
    remote_address: String,
    player_id: AtomicI64,
    is_connected: AtomicBool,
}

impl PlayerRecord {
    pub fn new(nickname: &str, remote_address: SocketAddr) -> Self {
        PlayerRecord {
            nickname: nickname.to_string(),
            remote_address: remote_address.to_string(),
            player_id: AtomicI64::new(-1),
            is_connected: AtomicBool::new(true),
        }
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    /// -1 until the game starts
    pub fn player_id(&self) -> i64 {
        self.player_id.load(Ordering::SeqCst)
    }

    /// Set once, when the game starts
    pub fn set_player_id(&self, player_id: i64) {
        self.player_id.store(player_id, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.is_connected.load(Ordering::SeqCst)
    }

    pub fn mark_disconnected(&self) {
        self.is_connected.store(false, Ordering::SeqCst);
    }

    /// Current view of the record, as sent in `players_info`
    pub fn snapshot(&self) -> PlayerInformation {
        PlayerInformation {
            player_id: self.player_id(),
            nickname: self.nickname.clone(),
            remote_address: self.remote_address.clone(),
            is_connected: self.is_connected(),
        }
    }
}

/// Everything other actors need to reach a logged-in client
#[derive(Debug, Clone)]
pub struct ClientHandle {
    pub id: ConnectionId,
    pub kind: ClientKind,
    pub record: Arc<PlayerRecord>,
    pub inbox: ClientInbox,
    pub kick: KickHandle,
}

/// Players, special players and visualizations, one roster each
#[derive(Debug, Default)]
pub struct ClientManager {
    players: Vec<ClientHandle>,
    special_players: Vec<ClientHandle>,
    visus: Vec<ClientHandle>,
}

impl ClientManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn roster(&self, kind: ClientKind) -> &Vec<ClientHandle> {
        match kind {
            ClientKind::Player => &self.players,
            ClientKind::SpecialPlayer => &self.special_players,
            ClientKind::Visualization => &self.visus,
        }
    }

    fn roster_mut(&mut self, kind: ClientKind) -> &mut Vec<ClientHandle> {
        match kind {
            ClientKind::Player => &mut self.players,
            ClientKind::SpecialPlayer => &mut self.special_players,
            ClientKind::Visualization => &mut self.visus,
        }
    }

    /// Number of clients in the roster of `kind`
    pub fn count(&self, kind: ClientKind) -> usize {
        self.roster(kind).len()
    }

    /// Appends a client to its roster unless the roster already holds
    /// `capacity` clients, in which case the handle is given back
    pub fn add(&mut self, handle: ClientHandle, capacity: usize) -> Result<usize, ClientHandle> {
        let roster = self.roster_mut(handle.kind);
        if roster.len() >= capacity {
            return Err(handle);
        }
        roster.push(handle);
        Ok(roster.len())
    }

    /// Removes a client from its roster, returning false if it was not there
    pub fn remove(&mut self, kind: ClientKind, id: ConnectionId) -> bool {
        let roster = self.roster_mut(kind);
        match roster.iter().position(|handle| handle.id == id) {
            Some(index) => {
                roster.swap_remove(index);
                true
            }
            None => false,
        }
    }

    pub fn players(&self) -> &[ClientHandle] {
        &self.players
    }

    pub fn special_players(&self) -> &[ClientHandle] {
        &self.special_players
    }

    pub fn visus(&self) -> &[ClientHandle] {
        &self.visus
    }

    /// Every registered client, players first
    pub fn iter(&self) -> impl Iterator<Item = &ClientHandle> {
        self.special_players
            .iter()
            .chain(self.players.iter())
            .chain(self.visus.iter())
    }

    /// Number of registered clients across all rosters
    pub fn len(&self) -> usize {
        self.players.len() + self.special_players.len() + self.visus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn test_handle(id: u64, kind: ClientKind) -> ClientHandle {
        let (kick, _) = KickHandle::detached();
        let (inbox, _) = ClientInbox::channel();
        ClientHandle {
            id: ConnectionId(id),
            kind,
            record: Arc::new(PlayerRecord::new(&format!("bot{}", id), test_addr())),
            inbox,
            kick,
        }
    }

    #[test]
    fn test_client_kind_from_role() {
        assert_eq!(ClientKind::from_role(Role::Player), Some(ClientKind::Player));
        assert_eq!(
            ClientKind::from_role(Role::Visualization),
            Some(ClientKind::Visualization)
        );
        assert_eq!(ClientKind::from_role(Role::GameLogic), None);
        assert_eq!(ClientKind::SpecialPlayer.role(), Role::SpecialPlayer);
        assert!(ClientKind::SpecialPlayer.is_player());
        assert!(!ClientKind::Visualization.is_player());
    }

    #[test]
    fn test_player_record() {
        let record = PlayerRecord::new("alice", test_addr());
        assert_eq!(record.player_id(), -1);
        assert!(record.is_connected());

        record.set_player_id(3);
        record.mark_disconnected();

        let info = record.snapshot();
        assert_eq!(info.player_id, 3);
        assert_eq!(info.nickname, "alice");
        assert_eq!(info.remote_address, "127.0.0.1:8080");
        assert!(!info.is_connected);
    }

    #[test]
    fn test_capacity_is_enforced() {
        let mut manager = ClientManager::new();

        assert_eq!(manager.add(test_handle(1, ClientKind::Player), 2).unwrap(), 1);
        assert_eq!(manager.add(test_handle(2, ClientKind::Player), 2).unwrap(), 2);

        let rejected = manager
            .add(test_handle(3, ClientKind::Player), 2)
            .unwrap_err();
        assert_eq!(rejected.id, ConnectionId(3));
        assert_eq!(manager.count(ClientKind::Player), 2);

        // Rosters are independent
        assert!(manager.add(test_handle(4, ClientKind::Visualization), 1).is_ok());
        assert!(manager
            .add(test_handle(5, ClientKind::SpecialPlayer), 0)
            .is_err());
        assert_eq!(manager.len(), 3);
    }

    #[test]
    fn test_remove_client() {
        let mut manager = ClientManager::new();
        for id in 1..=3 {
            manager.add(test_handle(id, ClientKind::Player), 4).unwrap();
        }

        assert!(manager.remove(ClientKind::Player, ConnectionId(1)));
        assert!(!manager.remove(ClientKind::Player, ConnectionId(1)));
        // Wrong roster
        assert!(!manager.remove(ClientKind::Visualization, ConnectionId(2)));

        let mut remaining: Vec<u64> = manager.players().iter().map(|h| h.id.0).collect();
        remaining.sort();
        assert_eq!(remaining, vec![2, 3]);

        // A freed slot can be reused
        assert!(manager.add(test_handle(4, ClientKind::Player), 3).is_ok());
    }

    #[test]
    fn test_iter_covers_all_rosters() {
        let mut manager = ClientManager::new();
        assert!(manager.is_empty());

        manager.add(test_handle(1, ClientKind::Visualization), 1).unwrap();
        manager.add(test_handle(2, ClientKind::Player), 1).unwrap();
        manager.add(test_handle(3, ClientKind::SpecialPlayer), 1).unwrap();

        let ids: Vec<u64> = manager.iter().map(|h| h.id.0).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }
}
