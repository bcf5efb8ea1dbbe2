use std::collections::{HashMap, HashSet};

use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::configs::{Config, ZoneConfig};
use crate::moderation::VoteTally;
use crate::playback::Playback;
use crate::protocol::{ServerMessage, UserId, UserSnapshot};

pub type ConnectionId = u64;

/// Close code sent after a rejected join.
pub const CLOSE_UNAUTHORIZED: u16 = 4001;

/// Frame queued for a connection's writer task.
#[derive(Debug, Clone)]
pub enum Outbound {
    Text(String),
    Close { code: u16 },
}

/// One live duplex channel. Unassociated until its join completes.
pub struct Connection {
    tx: flume::Sender<Outbound>,
    pub user: Option<UserId>,
    pub address: String,
}

/// A participant identity, surviving reconnects via its resume token.
pub struct User {
    pub user_id: UserId,
    pub token: String,
    pub name: Option<String>,
    pub avatar: Option<String>,
    pub position: Option<[i32; 2]>,
    pub emotes: Vec<String>,
    pub connections: HashSet<ConnectionId>,
    /// Bumped on every reconnect and disconnect; a grace timer carrying a
    /// stale epoch must not evict.
    grace_epoch: u64,
}

impl User {
    pub fn snapshot(&self) -> UserSnapshot {
        UserSnapshot {
            user_id: self.user_id,
            name: self.name.clone(),
            avatar: self.avatar.clone(),
            position: self.position,
            emotes: self.emotes.clone(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JoinError {
    #[error("wrong password")]
    BadPassword,
}

/// What a successful join established.
#[derive(Debug, PartialEq, Eq)]
pub struct JoinReply {
    pub user_id: UserId,
    pub token: String,
}

/// What the caller must do after a connection went away.
#[derive(Debug, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Connection was never joined, or the identity still has live
    /// connections.
    None,
    /// Identity evicted immediately (clean close). `leave` already sent.
    Evicted(UserId),
    /// Abrupt close: start a grace timer; call
    /// [`ZoneState::evict_if_absent`] with this epoch when it fires.
    Grace { user_id: UserId, epoch: u64 },
}

/// The zone's entire mutable state: roster, sessions, live connections,
/// timeline, and votes. One `tokio::sync::Mutex` around this struct is the
/// single cooperative execution context; nothing here awaits.
pub struct ZoneState {
    pub config: ZoneConfig,
    next_user_id: UserId,
    next_connection_id: ConnectionId,
    users: HashMap<UserId, User>,
    /// Resume token -> identity. A token maps to the same identity for the
    /// identity's whole lifetime.
    sessions: HashMap<String, UserId>,
    connections: HashMap<ConnectionId, Connection>,
    pub playback: Playback,
    pub votes: VoteTally,
}

impl ZoneState {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.zone.clone(),
            next_user_id: 1,
            next_connection_id: 1,
            users: HashMap::new(),
            sessions: HashMap::new(),
            connections: HashMap::new(),
            playback: Playback::new(config.zone.playback_padding_ms),
            votes: VoteTally::new(),
        }
    }

    pub fn register_connection(&mut self, tx: flume::Sender<Outbound>, address: String) -> ConnectionId {
        let connection_id = self.next_connection_id;
        self.next_connection_id += 1;
        self.connections.insert(
            connection_id,
            Connection {
                tx,
                user: None,
                address,
            },
        );
        connection_id
    }

    pub fn connection_user(&self, connection_id: ConnectionId) -> Option<UserId> {
        self.connections.get(&connection_id).and_then(|c| c.user)
    }

    pub fn connection_address(&self, connection_id: ConnectionId) -> Option<String> {
        self.connections.get(&connection_id).map(|c| c.address.clone())
    }

    pub fn user(&self, user_id: UserId) -> Option<&User> {
        self.users.get(&user_id)
    }

    pub fn user_mut(&mut self, user_id: UserId) -> Option<&mut User> {
        self.users.get_mut(&user_id)
    }

    /// Identity count used for vote thresholds. Identities waiting out a
    /// disconnect grace period can't vote, so they don't raise the bar.
    pub fn active_count(&self) -> usize {
        self.users
            .values()
            .filter(|user| !user.connections.is_empty())
            .count()
    }

    pub fn roster(&self) -> Vec<UserSnapshot> {
        let mut users: Vec<UserSnapshot> = self.users.values().map(User::snapshot).collect();
        users.sort_by_key(|u| u.user_id);
        users
    }

    /// Authenticate a connection. A valid resume token reclaims its
    /// identity without re-checking the password; otherwise the configured
    /// join password (if any) must match. Rejected joins never create an
    /// identity.
    pub fn join(
        &mut self,
        connection_id: ConnectionId,
        password: Option<&str>,
        token: Option<&str>,
    ) -> Result<JoinReply, JoinError> {
        if let Some(user_id) = token.and_then(|t| self.sessions.get(t).copied()) {
            if let Some(user) = self.users.get_mut(&user_id) {
                user.grace_epoch += 1;
                user.connections.insert(connection_id);
                if let Some(connection) = self.connections.get_mut(&connection_id) {
                    connection.user = Some(user_id);
                }
                info!("user {} resumed on connection {}", user_id, connection_id);
                return Ok(JoinReply {
                    user_id,
                    token: user.token.clone(),
                });
            }
        }

        if let Some(required) = &self.config.join_password {
            if password != Some(required.as_str()) {
                return Err(JoinError::BadPassword);
            }
        }

        let user_id = self.next_user_id;
        self.next_user_id += 1;
        let token = Uuid::new_v4().to_string();
        self.sessions.insert(token.clone(), user_id);
        self.users.insert(
            user_id,
            User {
                user_id,
                token: token.clone(),
                name: None,
                avatar: None,
                position: None,
                emotes: Vec::new(),
                connections: HashSet::from([connection_id]),
                grace_epoch: 0,
            },
        );
        if let Some(connection) = self.connections.get_mut(&connection_id) {
            connection.user = Some(user_id);
        }
        info!("user {} joined on connection {}", user_id, connection_id);
        Ok(JoinReply { user_id, token })
    }

    /// Set (or change) a display name, truncated to the configured length.
    /// The first name a brand-new identity gets also seeds the default
    /// avatar position, broadcast before the name itself.
    pub fn set_name(&mut self, user_id: UserId, name: &str) {
        let limit = self.config.name_length;
        let Some(user) = self.users.get_mut(&user_id) else {
            return;
        };
        let name: String = name.chars().take(limit).collect();
        let first = user.name.is_none();
        user.name = Some(name.clone());
        if first {
            user.position = Some([8, 15]);
            self.send_all(&ServerMessage::Move {
                user_id,
                position: [8, 15],
            });
        }
        self.send_all(&ServerMessage::Name { name, user_id });
    }

    /// Account for a finished connection. `clean` closes evict the identity
    /// as soon as its connection set drains; abrupt ones hand back a grace
    /// directive instead.
    pub fn close(&mut self, connection_id: ConnectionId, clean: bool) -> CloseOutcome {
        let Some(connection) = self.connections.remove(&connection_id) else {
            return CloseOutcome::None;
        };
        let Some(user_id) = connection.user else {
            return CloseOutcome::None;
        };
        let Some(user) = self.users.get_mut(&user_id) else {
            return CloseOutcome::None;
        };
        user.connections.remove(&connection_id);
        if !user.connections.is_empty() {
            return CloseOutcome::None;
        }
        if clean {
            self.evict(user_id);
            return CloseOutcome::Evicted(user_id);
        }
        user.grace_epoch += 1;
        let epoch = user.grace_epoch;
        info!("user {} disconnected abruptly, grace period started", user_id);
        CloseOutcome::Grace { user_id, epoch }
    }

    /// Grace timer half of [`ZoneState::close`]. Evicts only if nothing
    /// reconnected in the meantime (epoch still current, connection set
    /// still empty).
    pub fn evict_if_absent(&mut self, user_id: UserId, epoch: u64) -> bool {
        let Some(user) = self.users.get(&user_id) else {
            return false;
        };
        if user.grace_epoch != epoch || !user.connections.is_empty() {
            return false;
        }
        self.evict(user_id);
        true
    }

    /// Remove an identity and tell everyone. Broadcasts `leave` at most
    /// once per identity: it only fires when the user record is actually
    /// removed here.
    fn evict(&mut self, user_id: UserId) {
        let Some(user) = self.users.remove(&user_id) else {
            return;
        };
        self.sessions.remove(&user.token);
        info!("user {} evicted", user_id);
        self.send_all(&ServerMessage::Leave { user_id });
        if let Some(name) = user.name {
            self.send_all(&ServerMessage::Status {
                text: format!("{} left", name),
            });
        }
    }

    // --- broadcaster ---

    /// Broadcasts go to joined connections only; a pre-join connection
    /// never sees zone state, only its own `reject`/`assign`.
    pub fn send_all(&self, message: &ServerMessage) {
        let Some(json) = encode(message) else { return };
        for (connection_id, connection) in &self.connections {
            if connection.user.is_none() {
                continue;
            }
            deliver(*connection_id, connection, &json);
        }
    }

    /// Every live connection of one identity, multi-tab included.
    pub fn send_only(&self, message: &ServerMessage, user_id: UserId) {
        let Some(json) = encode(message) else { return };
        for (connection_id, connection) in &self.connections {
            if connection.user == Some(user_id) {
                deliver(*connection_id, connection, &json);
            }
        }
    }

    pub fn send_except(&self, message: &ServerMessage, user_id: UserId) {
        let Some(json) = encode(message) else { return };
        for (connection_id, connection) in &self.connections {
            match connection.user {
                Some(user) if user != user_id => deliver(*connection_id, connection, &json),
                _ => {}
            }
        }
    }

    pub fn send_to_connection(&self, connection_id: ConnectionId, message: &ServerMessage) {
        let Some(json) = encode(message) else { return };
        if let Some(connection) = self.connections.get(&connection_id) {
            deliver(connection_id, connection, &json);
        }
    }

    pub fn close_connection(&self, connection_id: ConnectionId, code: u16) {
        if let Some(connection) = self.connections.get(&connection_id) {
            if connection.tx.send(Outbound::Close { code }).is_err() {
                warn!("couldn't close connection {}: writer gone", connection_id);
            }
        }
    }
}

fn encode(message: &ServerMessage) -> Option<String> {
    match serde_json::to_string(message) {
        Ok(json) => Some(json),
        Err(e) => {
            warn!("couldn't encode message: {}", e);
            None
        }
    }
}

/// Best-effort delivery: a dead recipient is logged and skipped, never
/// allowed to abort the rest of a broadcast.
fn deliver(connection_id: ConnectionId, connection: &Connection, json: &str) {
    if connection.tx.send(Outbound::Text(json.to_string())).is_err() {
        warn!("couldn't send to connection {}: writer gone", connection_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configs::Config;

    fn zone_with(join_password: Option<&str>) -> ZoneState {
        let mut config = Config::default();
        config.zone.join_password = join_password.map(String::from);
        ZoneState::new(&config)
    }

    fn connect(zone: &mut ZoneState) -> (ConnectionId, flume::Receiver<Outbound>) {
        let (tx, rx) = flume::unbounded();
        let id = zone.register_connection(tx, "10.0.0.1".to_string());
        (id, rx)
    }

    fn received_types(rx: &flume::Receiver<Outbound>) -> Vec<String> {
        rx.drain()
            .filter_map(|frame| match frame {
                Outbound::Text(json) => {
                    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
                    Some(value["type"].as_str().unwrap().to_string())
                }
                Outbound::Close { .. } => Some("close".to_string()),
            })
            .collect()
    }

    #[test]
    fn join_without_required_password_is_rejected() {
        let mut zone = zone_with(Some("riverdale"));
        let (conn, _rx) = connect(&mut zone);
        assert_eq!(zone.join(conn, None, None), Err(JoinError::BadPassword));
        assert_eq!(zone.join(conn, Some("wrong"), None), Err(JoinError::BadPassword));
        assert_eq!(zone.active_count(), 0);

        let reply = zone.join(conn, Some("riverdale"), None).unwrap();
        assert_eq!(reply.user_id, 1);
        assert!(!reply.token.is_empty());
    }

    #[test]
    fn resume_returns_the_original_identity() {
        let mut zone = zone_with(None);
        let (conn_a, _rx_a) = connect(&mut zone);
        let original = zone.join(conn_a, None, None).unwrap();
        let _ = zone.close(conn_a, false);

        let (conn_b, _rx_b) = connect(&mut zone);
        let resumed = zone.join(conn_b, None, Some(&original.token)).unwrap();
        assert_eq!(resumed.user_id, original.user_id);
        assert_eq!(resumed.token, original.token);
        assert_eq!(zone.active_count(), 1);
    }

    #[test]
    fn resume_skips_the_password_gate() {
        let mut zone = zone_with(Some("riverdale"));
        let (conn_a, _rx_a) = connect(&mut zone);
        let original = zone.join(conn_a, Some("riverdale"), None).unwrap();
        let _ = zone.close(conn_a, false);

        let (conn_b, _rx_b) = connect(&mut zone);
        let resumed = zone.join(conn_b, None, Some(&original.token)).unwrap();
        assert_eq!(resumed.user_id, original.user_id);
    }

    #[test]
    fn unknown_token_behaves_as_a_fresh_join() {
        let mut zone = zone_with(None);
        let (conn, _rx) = connect(&mut zone);
        let reply = zone.join(conn, None, Some("no-such-token")).unwrap();
        assert_eq!(reply.user_id, 1);
        assert_ne!(reply.token, "no-such-token");
    }

    #[test]
    fn clean_close_evicts_immediately() {
        let mut zone = zone_with(None);
        let (conn_a, _rx_a) = connect(&mut zone);
        let reply = zone.join(conn_a, None, None).unwrap();
        zone.set_name(reply.user_id, "test");

        let (conn_b, rx_b) = connect(&mut zone);
        let _ = zone.join(conn_b, None, None).unwrap();
        let _ = received_types(&rx_b);

        assert_eq!(zone.close(conn_a, true), CloseOutcome::Evicted(reply.user_id));
        assert_eq!(received_types(&rx_b), vec!["leave", "status"]);
        assert_eq!(zone.active_count(), 1);
    }

    #[test]
    fn abrupt_close_defers_to_the_grace_timer() {
        let mut zone = zone_with(None);
        let (conn_a, _rx_a) = connect(&mut zone);
        let reply = zone.join(conn_a, None, None).unwrap();

        let outcome = zone.close(conn_a, false);
        let CloseOutcome::Grace { user_id, epoch } = outcome else {
            panic!("expected grace, got {:?}", outcome);
        };
        assert_eq!(user_id, reply.user_id);
        assert!(zone.user(user_id).is_some());

        assert!(zone.evict_if_absent(user_id, epoch));
        assert!(zone.user(user_id).is_none());
    }

    #[test]
    fn reconnect_within_grace_cancels_eviction() {
        let mut zone = zone_with(None);
        let (conn_a, _rx_a) = connect(&mut zone);
        let reply = zone.join(conn_a, None, None).unwrap();

        let CloseOutcome::Grace { user_id, epoch } = zone.close(conn_a, false) else {
            panic!("expected grace");
        };

        let (conn_b, rx_b) = connect(&mut zone);
        let _ = zone.join(conn_b, None, Some(&reply.token)).unwrap();

        // stale timer fires: nobody leaves, no leave broadcast
        assert!(!zone.evict_if_absent(user_id, epoch));
        assert_eq!(zone.active_count(), 1);
        assert!(received_types(&rx_b).is_empty());
    }

    #[test]
    fn multi_tab_identity_only_leaves_once() {
        let mut zone = zone_with(None);
        let (conn_a, _rx_a) = connect(&mut zone);
        let reply = zone.join(conn_a, None, None).unwrap();
        let (conn_b, _rx_b) = connect(&mut zone);
        let _ = zone.join(conn_b, None, Some(&reply.token)).unwrap();

        let (observer, rx_o) = connect(&mut zone);
        let _ = zone.join(observer, None, None).unwrap();
        let _ = received_types(&rx_o);

        assert_eq!(zone.close(conn_a, true), CloseOutcome::None);
        assert!(received_types(&rx_o).is_empty());
        assert_eq!(zone.close(conn_b, true), CloseOutcome::Evicted(reply.user_id));
        assert_eq!(received_types(&rx_o), vec!["leave"]);
    }

    #[test]
    fn send_only_reaches_every_tab_of_the_identity() {
        let mut zone = zone_with(None);
        let (conn_a, rx_a) = connect(&mut zone);
        let reply = zone.join(conn_a, None, None).unwrap();
        let (conn_b, rx_b) = connect(&mut zone);
        let _ = zone.join(conn_b, None, Some(&reply.token)).unwrap();
        let (other, rx_other) = connect(&mut zone);
        let _ = zone.join(other, None, None).unwrap();

        zone.send_only(&ServerMessage::Heartbeat, reply.user_id);
        assert_eq!(received_types(&rx_a), vec!["heartbeat"]);
        assert_eq!(received_types(&rx_b), vec!["heartbeat"]);
        assert!(received_types(&rx_other).is_empty());
    }

    #[test]
    fn first_name_seeds_the_default_position() {
        let mut zone = zone_with(None);
        let (conn, rx) = connect(&mut zone);
        let reply = zone.join(conn, None, None).unwrap();

        zone.set_name(reply.user_id, "a name that runs far past the limit");
        assert_eq!(received_types(&rx), vec!["move", "name"]);
        let user = zone.user(reply.user_id).unwrap();
        assert_eq!(user.position, Some([8, 15]));
        assert_eq!(user.name.as_deref(), Some("a name that runs"));

        // renames don't reseed the position
        zone.set_name(reply.user_id, "test");
        assert_eq!(received_types(&rx), vec!["name"]);
    }

    #[test]
    fn unjoined_connections_see_no_broadcasts() {
        let mut zone = zone_with(Some("riverdale"));
        let (_lurker, rx_lurker) = connect(&mut zone);

        let (member, _rx_m) = connect(&mut zone);
        let reply = zone.join(member, Some("riverdale"), None).unwrap();
        zone.set_name(reply.user_id, "member");
        zone.send_all(&ServerMessage::Chat {
            text: "between members".to_string(),
            user_id: reply.user_id,
        });
        zone.send_except(&ServerMessage::Heartbeat, reply.user_id);

        // no join, no zone state: not the move/name seed, not the chat
        assert!(received_types(&rx_lurker).is_empty());
    }

    #[test]
    fn grace_period_identities_leave_the_vote_denominator() {
        let mut zone = zone_with(None);
        let (conn_a, _rx_a) = connect(&mut zone);
        let _ = zone.join(conn_a, None, None).unwrap();
        let (conn_b, _rx_b) = connect(&mut zone);
        let _ = zone.join(conn_b, None, None).unwrap();
        assert_eq!(zone.active_count(), 2);

        assert!(matches!(zone.close(conn_b, false), CloseOutcome::Grace { .. }));
        assert_eq!(zone.active_count(), 1);
        assert_eq!(zone.users.len(), 2);
    }

    #[test]
    fn broadcast_survives_a_dead_recipient() {
        let mut zone = zone_with(None);
        let (conn_a, rx_a) = connect(&mut zone);
        let _ = zone.join(conn_a, None, None).unwrap();
        let (conn_b, rx_b) = connect(&mut zone);
        let _ = zone.join(conn_b, None, None).unwrap();
        drop(rx_a);

        zone.send_all(&ServerMessage::Heartbeat);
        assert_eq!(received_types(&rx_b), vec!["heartbeat"]);
    }
}
