//! Connection registry
//!
//! Thread-safe registry of live connections including:
//! - Admission checks and per-IP connection limits
//! - Commander lookup and duplicate login kicks
//! - Chat rooms and cross-connection message delivery
//! - Server-initiated disconnects
//!
//! Sessions themselves stay owned by their connection task. Everything sent
//! to another connection travels as a [`ControlMessage`] over that
//! connection's channel and is written by its own task.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{DisconnectReason, NetworkError, Result};
use crate::net::session::{Identity, Session, SessionId};

/// Pending control messages a connection may queue before deliveries are dropped
const CONTROL_CAPACITY: usize = 64;

/// Request handed to a connection task by the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// Send the disconnect notice and close
    Disconnect(DisconnectReason),
    /// Frame `payload` under `opcode` and flush it
    Deliver { opcode: u16, payload: Bytes },
}

/// Whether `ip` is in a private or loopback range
pub fn is_private_address(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback(),
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return v4.is_private() || v4.is_loopback();
            }
            v6.is_loopback() || (v6.segments()[0] & 0xfe00) == 0xfc00
        }
    }
}

/// Registry entry for a live connection
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: SessionId,
    pub address: SocketAddr,
    pub connected_at: Instant,
    pub commander_id: Option<u32>,
    pub room_id: Option<u32>,
    control: mpsc::Sender<ControlMessage>,
}

impl ConnectionInfo {
    /// Time since the connection was accepted
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

/// Handle returned when a connection is registered
pub struct Registration {
    pub id: SessionId,
    /// Receives requests from the registry for this connection
    pub control: mpsc::Receiver<ControlMessage>,
}

/// Thread-safe registry of live connections
pub struct SessionManager {
    /// Map of session ID to connection info
    sessions: DashMap<SessionId, ConnectionInfo>,
    /// Map of commander ID to session ID (for logged-in commanders)
    commander_to_session: DashMap<u32, SessionId>,
    /// Map of IP address to list of session IDs (for connection limiting)
    ip_to_sessions: DashMap<String, Vec<SessionId>>,
    /// Map of room ID to member session IDs
    rooms: DashMap<u32, Vec<SessionId>>,
    /// Next session ID to assign
    next_id: AtomicU64,
    /// Maximum sessions per IP
    max_per_ip: usize,
    accepting: AtomicBool,
    maintenance: AtomicBool,
}

impl SessionManager {
    /// Create a new session manager
    pub fn new() -> Self {
        Self::with_limits(10)
    }

    /// Create a session manager with a custom per-IP limit
    pub fn with_limits(max_per_ip: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            commander_to_session: DashMap::new(),
            ip_to_sessions: DashMap::new(),
            rooms: DashMap::new(),
            next_id: AtomicU64::new(1),
            max_per_ip,
            accepting: AtomicBool::new(true),
            maintenance: AtomicBool::new(false),
        }
    }

    /// Check whether a client at `address` may connect right now
    pub fn admit(&self, address: SocketAddr, require_private: bool) -> Result<()> {
        if self.is_maintenance() {
            return Err(NetworkError::Maintenance.into());
        }
        if !self.is_accepting() {
            return Err(NetworkError::NotAccepting.into());
        }
        if require_private && !is_private_address(address.ip()) {
            return Err(NetworkError::NotPrivate(address.to_string()).into());
        }
        Ok(())
    }

    /// Register a new connection
    pub fn create_session(&self, address: SocketAddr) -> Result<Registration> {
        let ip = address.ip().to_string();

        // Check and reserve under one entry lock so concurrent accepts
        // from the same IP cannot both squeeze under the limit
        let id = {
            let mut ids = self.ip_to_sessions.entry(ip.clone()).or_default();
            if ids.len() >= self.max_per_ip {
                let count = ids.len();
                drop(ids);
                self.ip_to_sessions.remove_if(&ip, |_, v| v.is_empty());
                warn!(
                    ip = %ip,
                    count = count,
                    max = self.max_per_ip,
                    "Connection limit exceeded for IP"
                );
                return Err(NetworkError::TooManyConnections(ip).into());
            }
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            ids.push(id);
            id
        };

        let (tx, rx) = mpsc::channel(CONTROL_CAPACITY);
        self.sessions.insert(
            id,
            ConnectionInfo {
                id,
                address,
                connected_at: Instant::now(),
                commander_id: None,
                room_id: None,
                control: tx,
            },
        );

        info!(session_id = id, address = %address, "Session created");

        Ok(Registration { id, control: rx })
    }

    /// Get a connection by ID
    pub fn get(&self, id: SessionId) -> Option<ConnectionInfo> {
        self.sessions.get(&id).map(|r| r.clone())
    }

    /// Record the commander logged in on a connection
    pub fn bind_commander(&self, id: SessionId, commander_id: u32) {
        if let Some(mut entry) = self.sessions.get_mut(&id) {
            entry.commander_id = Some(commander_id);
            self.commander_to_session.insert(commander_id, id);
            debug!(session_id = id, commander_id = commander_id, "Commander bound");
        }
    }

    /// Find the connection a commander is logged in on
    pub fn find_by_commander(&self, commander_id: u32) -> Option<ConnectionInfo> {
        self.commander_to_session
            .get(&commander_id)
            .and_then(|id| self.get(*id))
    }

    /// Bind a logged-in identity to `session`, kicking any other connection
    /// the same commander is still logged in on.
    ///
    /// Returns whether another connection was kicked.
    pub fn claim_commander(&self, session: &mut Session, identity: Identity) -> bool {
        let kicked = self.disconnect_commander(
            identity.commander_id,
            DisconnectReason::LoggedInElsewhere,
            Some(session.id),
        );
        session.set_identity(identity);
        self.bind_commander(session.id, identity.commander_id);
        kicked
    }

    /// Remove a connection
    pub fn remove(&self, id: SessionId) {
        if let Some((_, info)) = self.sessions.remove(&id) {
            if let Some(commander_id) = info.commander_id {
                self.commander_to_session
                    .remove_if(&commander_id, |_, sid| *sid == id);
            }
            if let Some(room_id) = info.room_id {
                self.remove_from_room(room_id, id);
            }

            let ip = info.address.ip().to_string();
            if let Some(mut sessions) = self.ip_to_sessions.get_mut(&ip) {
                sessions.retain(|&sid| sid != id);
            }
            self.ip_to_sessions.remove_if(&ip, |_, v| v.is_empty());

            info!(
                session_id = id,
                address = %info.address,
                connected_secs = info.age().as_secs(),
                "Session removed"
            );
        }
    }

    fn send_control(&self, id: SessionId, message: ControlMessage) -> bool {
        let Some(info) = self.sessions.get(&id) else {
            return false;
        };
        match info.control.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(session_id = id, "Control queue full, message dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Ask a connection to send a disconnect notice and close.
    ///
    /// Returns false if the connection is unknown or its queue is full.
    pub fn disconnect(&self, id: SessionId, reason: DisconnectReason) -> bool {
        debug!(session_id = id, reason = reason.describe(), "Requesting disconnect");
        self.send_control(id, ControlMessage::Disconnect(reason))
    }

    /// Kick the connection a commander is logged in on, unless it is `exclude`
    pub fn disconnect_commander(
        &self,
        commander_id: u32,
        reason: DisconnectReason,
        exclude: Option<SessionId>,
    ) -> bool {
        let Some(id) = self.commander_to_session.get(&commander_id).map(|r| *r) else {
            return false;
        };
        if exclude == Some(id) {
            return false;
        }
        info!(commander_id = commander_id, session_id = id, "Kicking commander");
        self.disconnect(id, reason)
    }

    /// Ask every connection to disconnect
    pub fn disconnect_all(&self, reason: DisconnectReason) {
        for id in self.session_ids() {
            self.disconnect(id, reason);
        }
    }

    /// Queue an encoded payload for another connection to frame and flush
    pub fn deliver(&self, id: SessionId, opcode: u16, payload: Bytes) -> bool {
        self.send_control(id, ControlMessage::Deliver { opcode, payload })
    }

    /// Put a connection in `room_id`, leaving whatever room it was in.
    ///
    /// Returns false if the connection is unknown.
    pub fn join_room(&self, id: SessionId, room_id: u32) -> bool {
        self.enter_room(id, room_id).is_some()
    }

    /// Move a connection to `room_id` and return the room it left
    pub fn change_room(&self, id: SessionId, room_id: u32) -> Option<u32> {
        let previous = self.enter_room(id, room_id).flatten();
        debug!(session_id = id, from = ?previous, to = room_id, "Room changed");
        previous
    }

    /// Take a connection out of its room and return that room
    pub fn leave_room(&self, id: SessionId) -> Option<u32> {
        let room_id = self.sessions.get_mut(&id)?.room_id.take()?;
        self.remove_from_room(room_id, id);
        debug!(session_id = id, room_id = room_id, "Left room");
        Some(room_id)
    }

    /// Room a connection is in
    pub fn room_of(&self, id: SessionId) -> Option<u32> {
        self.sessions.get(&id).and_then(|info| info.room_id)
    }

    /// Members of a room in join order
    pub fn room_members(&self, room_id: u32) -> Vec<SessionId> {
        self.rooms
            .get(&room_id)
            .map(|members| members.clone())
            .unwrap_or_default()
    }

    /// Send `message` to every member of a room, sender included.
    ///
    /// Returns the number of connections it was queued for.
    pub fn send_to_room<M: prost::Message>(
        &self,
        room_id: u32,
        opcode: u16,
        message: &M,
    ) -> usize {
        let payload = Bytes::from(message.encode_to_vec());
        let delivered = self
            .room_members(room_id)
            .into_iter()
            .filter(|&id| self.deliver(id, opcode, payload.clone()))
            .count();
        debug!(
            room_id = room_id,
            opcode = opcode,
            delivered = delivered,
            "SC_{} sent to room",
            opcode
        );
        delivered
    }

    /// Send `message` to every live connection
    pub fn broadcast<M: prost::Message>(&self, opcode: u16, message: &M) -> usize {
        let payload = Bytes::from(message.encode_to_vec());
        let delivered = self
            .session_ids()
            .into_iter()
            .filter(|&id| self.deliver(id, opcode, payload.clone()))
            .count();
        debug!(opcode = opcode, delivered = delivered, "SC_{} broadcast", opcode);
        delivered
    }

    /// Returns `None` for an unknown connection, else the room it left
    fn enter_room(&self, id: SessionId, room_id: u32) -> Option<Option<u32>> {
        let previous = self.sessions.get_mut(&id)?.room_id.replace(room_id);
        if let Some(old) = previous {
            self.remove_from_room(old, id);
        }
        self.rooms.entry(room_id).or_default().push(id);
        debug!(session_id = id, room_id = room_id, "Joined room");
        Some(previous)
    }

    fn remove_from_room(&self, room_id: u32, id: SessionId) {
        if let Some(mut members) = self.rooms.get_mut(&room_id) {
            members.retain(|&member| member != id);
        }
        self.rooms.remove_if(&room_id, |_, members| members.is_empty());
    }

    /// Get the count of live connections
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Get list of all session IDs
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|r| *r.key()).collect()
    }

    /// Snapshot of all live connections
    pub fn list(&self) -> Vec<ConnectionInfo> {
        self.sessions.iter().map(|r| r.value().clone()).collect()
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Stop or resume accepting connections. Stopping drops everyone.
    pub fn set_accepting(&self, enabled: bool) {
        self.accepting.store(enabled, Ordering::SeqCst);
        if !enabled {
            self.disconnect_all(DisconnectReason::ConnectionLost);
        }
    }

    pub fn is_maintenance(&self) -> bool {
        self.maintenance.load(Ordering::SeqCst)
    }

    /// Toggle maintenance. Enabling it drops everyone.
    pub fn set_maintenance(&self, enabled: bool) {
        self.maintenance.store(enabled, Ordering::SeqCst);
        if enabled {
            self.disconnect_all(DisconnectReason::Maintenance);
        }
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::DisconnectNotice;

    fn test_address() -> SocketAddr {
        "127.0.0.1:12345".parse().unwrap()
    }

    fn register(manager: &SessionManager, port: u16) -> Registration {
        manager
            .create_session(SocketAddr::from(([127, 0, 0, 1], port)))
            .unwrap()
    }

    fn disconnect_of(registration: &mut Registration) -> DisconnectReason {
        match registration.control.try_recv().unwrap() {
            ControlMessage::Disconnect(reason) => reason,
            other => panic!("expected a disconnect, got {:?}", other),
        }
    }

    #[test]
    fn test_private_addresses() {
        assert!(is_private_address("10.0.0.1".parse().unwrap()));
        assert!(is_private_address("192.168.1.20".parse().unwrap()));
        assert!(is_private_address("127.0.0.1".parse().unwrap()));
        assert!(is_private_address("fd00::1".parse().unwrap()));
        assert!(!is_private_address("8.8.8.8".parse().unwrap()));
        assert!(!is_private_address("2001:4860::8888".parse().unwrap()));
    }

    #[test]
    fn test_session_manager_create_and_remove() {
        let manager = SessionManager::new();
        let registration = manager.create_session(test_address()).unwrap();

        assert_eq!(registration.id, 1);
        assert_eq!(manager.count(), 1);
        assert!(manager.get(registration.id).is_some());

        manager.remove(registration.id);
        assert!(manager.get(registration.id).is_none());
        assert_eq!(manager.count(), 0);
    }

    #[test]
    fn test_session_manager_ip_limit() {
        let manager = SessionManager::with_limits(2);
        let addr1: SocketAddr = "192.168.1.1:12345".parse().unwrap();
        let addr2: SocketAddr = "192.168.1.1:12346".parse().unwrap();
        let addr3: SocketAddr = "192.168.1.1:12347".parse().unwrap();

        let first = manager.create_session(addr1).unwrap();
        assert!(manager.create_session(addr2).is_ok());
        assert!(manager.create_session(addr3).is_err());

        manager.remove(first.id);
        assert!(manager.create_session(addr3).is_ok());
    }

    #[test]
    fn test_ip_limit_holds_under_concurrent_accepts() {
        let manager = SessionManager::with_limits(3);
        let addr: SocketAddr = "192.168.7.7:1000".parse().unwrap();

        let shared = &manager;
        let accepted = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|_| scope.spawn(move || shared.create_session(addr).is_ok()))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|ok| *ok)
                .count()
        });

        assert_eq!(accepted, 3);
        assert_eq!(manager.count(), 3);
    }

    #[test]
    fn test_session_manager_commander_lookup_and_kick() {
        let manager = SessionManager::new();
        let mut registration = manager.create_session(test_address()).unwrap();
        manager.bind_commander(registration.id, 42);

        let found = manager.find_by_commander(42).unwrap();
        assert_eq!(found.id, registration.id);

        assert!(!manager.disconnect_commander(
            42,
            DisconnectReason::LoggedInElsewhere,
            Some(registration.id)
        ));
        assert!(manager.disconnect_commander(42, DisconnectReason::LoggedInElsewhere, None));
        assert_eq!(
            disconnect_of(&mut registration),
            DisconnectReason::LoggedInElsewhere
        );

        manager.remove(registration.id);
        assert!(manager.find_by_commander(42).is_none());
    }

    #[test]
    fn test_claim_commander_kicks_previous_login() {
        let manager = SessionManager::new();
        let mut first = register(&manager, 1);
        let second = register(&manager, 2);
        let identity = Identity {
            account_id: 7,
            commander_id: 42,
        };

        let mut session = Session::new(first.id, test_address(), Box::new(tokio::io::sink()));
        assert!(!manager.claim_commander(&mut session, identity));
        assert_eq!(session.identity(), Some(identity));

        let mut session = Session::new(second.id, test_address(), Box::new(tokio::io::sink()));
        assert!(manager.claim_commander(&mut session, identity));
        assert_eq!(
            disconnect_of(&mut first),
            DisconnectReason::LoggedInElsewhere
        );
        assert_eq!(manager.find_by_commander(42).unwrap().id, second.id);
    }

    #[test]
    fn test_admission() {
        let manager = SessionManager::new();
        let public: SocketAddr = "8.8.8.8:1000".parse().unwrap();

        assert!(manager.admit(test_address(), true).is_ok());
        assert!(manager.admit(public, true).is_err());
        assert!(manager.admit(public, false).is_ok());

        manager.set_maintenance(true);
        assert!(manager.admit(test_address(), false).is_err());
        manager.set_maintenance(false);

        manager.set_accepting(false);
        assert!(manager.admit(test_address(), false).is_err());
    }

    #[test]
    fn test_maintenance_disconnects_everyone() {
        let manager = SessionManager::new();
        let mut a = register(&manager, 1);
        let mut b = register(&manager, 2);

        manager.set_maintenance(true);

        assert_eq!(disconnect_of(&mut a), DisconnectReason::Maintenance);
        assert_eq!(disconnect_of(&mut b), DisconnectReason::Maintenance);
    }

    #[test]
    fn test_join_and_leave_room() {
        let manager = SessionManager::new();
        let a = register(&manager, 1);
        let b = register(&manager, 2);

        assert!(manager.join_room(a.id, 5));
        assert!(manager.join_room(b.id, 5));
        assert!(!manager.join_room(999, 5));
        assert_eq!(manager.room_members(5), vec![a.id, b.id]);
        assert_eq!(manager.room_of(a.id), Some(5));

        assert_eq!(manager.leave_room(a.id), Some(5));
        assert_eq!(manager.leave_room(a.id), None);
        assert_eq!(manager.room_members(5), vec![b.id]);

        manager.remove(b.id);
        assert!(manager.room_members(5).is_empty());
    }

    #[test]
    fn test_change_room_moves_membership() {
        let manager = SessionManager::new();
        let a = register(&manager, 1);

        assert_eq!(manager.change_room(a.id, 1), None);
        assert_eq!(manager.change_room(a.id, 2), Some(1));
        assert!(manager.room_members(1).is_empty());
        assert_eq!(manager.room_members(2), vec![a.id]);

        // Joining again moves rather than duplicates
        manager.join_room(a.id, 2);
        assert_eq!(manager.room_members(2), vec![a.id]);
    }

    #[test]
    fn test_send_to_room_reaches_members_only() {
        let manager = SessionManager::new();
        let mut a = register(&manager, 1);
        let mut b = register(&manager, 2);
        let mut outsider = register(&manager, 3);
        manager.join_room(a.id, 9);
        manager.join_room(b.id, 9);
        manager.join_room(outsider.id, 10);

        let message = DisconnectNotice { reason: 77 };
        assert_eq!(manager.send_to_room(9, 50101, &message), 2);

        let expected = ControlMessage::Deliver {
            opcode: 50101,
            payload: Bytes::from(prost::Message::encode_to_vec(&message)),
        };
        assert_eq!(a.control.try_recv().unwrap(), expected);
        assert_eq!(b.control.try_recv().unwrap(), expected);
        assert!(outsider.control.try_recv().is_err());
    }

    #[test]
    fn test_broadcast_reaches_everyone() {
        let manager = SessionManager::new();
        let mut registrations: Vec<_> = (1..=3).map(|port| register(&manager, port)).collect();

        assert_eq!(manager.broadcast(60008, &DisconnectNotice { reason: 1 }), 3);
        for registration in &mut registrations {
            assert!(matches!(
                registration.control.try_recv().unwrap(),
                ControlMessage::Deliver { opcode: 60008, .. }
            ));
        }
    }
}
