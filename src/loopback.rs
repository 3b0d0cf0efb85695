//! In-process replication backend: a sequencing hub for tests and the demo.
//!
//! DESIGN
//! ======
//! Every connection hands storage ops to its own outbox. The hub drains
//! outboxes one op at a time (`deliver_next`), which fixes a single global
//! delivery order per room: the op is applied to the room's durable copy and
//! then broadcast to every member, origin included. Because every replica sees
//! the same sequence, last-write-wins converges on whichever op the hub
//! delivered last. Tests pick interleavings by choosing which outbox to drain.
//!
//! Presence bypasses sequencing: it is fanned out immediately to peers and
//! only the latest value per connection is remembered.
//!
//! A partitioned connection keeps buffering outbound ops and holds back its
//! inbound events until healed; presence sent while partitioned is dropped.

#[cfg(test)]
#[path = "loopback_test.rs"]
mod loopback_test;

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::model::{Presence, Storage, StorageOp};
use crate::replication::{Connection, ConnectionId, RemoteEvent, ReplicationError, ReplicationService, RoomId};

// =============================================================================
// HUB STATE
// =============================================================================

struct Member {
    room: Option<RoomId>,
    inbox: mpsc::UnboundedSender<RemoteEvent>,
    /// Ops handed over by this connection, not yet sequenced.
    outbox: VecDeque<StorageOp>,
    /// Inbound events held back while partitioned.
    held: VecDeque<RemoteEvent>,
    presence: Presence,
    partitioned: bool,
}

impl Member {
    fn send(&mut self, connection: ConnectionId, event: RemoteEvent) {
        if self.partitioned {
            self.held.push_back(event);
            return;
        }
        if self.inbox.send(event).is_err() {
            debug!(%connection, "inbox closed; event dropped");
        }
    }
}

#[derive(Default)]
struct HubState {
    rooms: HashMap<RoomId, Storage>,
    members: BTreeMap<ConnectionId, Member>,
}

impl HubState {
    fn peers_in(&self, room: &RoomId, except: Option<ConnectionId>) -> Vec<ConnectionId> {
        self.members
            .iter()
            .filter(|(id, m)| Some(**id) != except && m.room.as_ref() == Some(room))
            .map(|(id, _)| *id)
            .collect()
    }

    fn broadcast(&mut self, room: &RoomId, except: Option<ConnectionId>, event: &RemoteEvent) {
        for id in self.peers_in(room, except) {
            if let Some(member) = self.members.get_mut(&id) {
                member.send(id, event.clone());
            }
        }
    }

    fn check_room(&self, connection: ConnectionId, room: &RoomId) -> Result<&Member, ReplicationError> {
        let member = self.members.get(&connection).ok_or(ReplicationError::Closed)?;
        if member.room.as_ref() != Some(room) {
            return Err(ReplicationError::NotInRoom(room.clone()));
        }
        Ok(member)
    }

    fn deliver_next(&mut self, connection: ConnectionId) -> Option<StorageOp> {
        let member = self.members.get_mut(&connection)?;
        if member.partitioned {
            return None;
        }
        let room = member.room.clone()?;
        let op = member.outbox.pop_front()?;

        if let Some(storage) = self.rooms.get_mut(&room) {
            storage.apply(&op);
        }
        debug!(%room, origin = %connection, ?op, "sequenced storage op");
        self.broadcast(&room, None, &RemoteEvent::Storage { origin: connection, op: op.clone() });
        Some(op)
    }
}

// =============================================================================
// HUB
// =============================================================================

/// Shared sequencing hub. Clone to share between connections.
#[derive(Clone, Default)]
pub struct LoopbackHub {
    state: Arc<Mutex<HubState>>,
}

impl LoopbackHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new connection with fresh presence.
    #[must_use]
    pub fn connect(&self) -> Connection {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().members.insert(
            id,
            Member {
                room: None,
                inbox: tx,
                outbox: VecDeque::new(),
                held: VecDeque::new(),
                presence: Presence::default(),
                partitioned: false,
            },
        );
        let service = LoopbackService { id, state: Arc::clone(&self.state) };
        Connection { service: Arc::new(service), inbox: rx }
    }

    /// Sequence and broadcast the oldest pending op of `connection`.
    /// Returns the delivered op, or `None` if nothing was deliverable.
    pub fn deliver_next(&self, connection: ConnectionId) -> Option<StorageOp> {
        self.state.lock().deliver_next(connection)
    }

    /// Drain every outbox, round-robin by connection id. Returns ops delivered.
    pub fn deliver_all(&self) -> usize {
        let mut state = self.state.lock();
        let ids: Vec<ConnectionId> = state.members.keys().copied().collect();
        let mut delivered = 0;
        loop {
            let mut progressed = false;
            for id in &ids {
                if state.deliver_next(*id).is_some() {
                    delivered += 1;
                    progressed = true;
                }
            }
            if !progressed {
                return delivered;
            }
        }
    }

    /// Cut a connection off (or heal it). Healing releases held inbound events.
    pub fn set_partitioned(&self, connection: ConnectionId, partitioned: bool) {
        let mut state = self.state.lock();
        let Some(member) = state.members.get_mut(&connection) else {
            return;
        };
        member.partitioned = partitioned;
        if partitioned {
            warn!(%connection, "connection partitioned");
            return;
        }
        info!(%connection, held = member.held.len(), "connection healed");
        while let Some(event) = member.held.pop_front() {
            member.send(connection, event);
        }
    }

    /// Ops handed over by `connection` that the hub has not sequenced yet.
    #[must_use]
    pub fn pending(&self, connection: ConnectionId) -> usize {
        self.state
            .lock()
            .members
            .get(&connection)
            .map_or(0, |m| m.outbox.len())
    }

    /// The hub's durable copy of a room.
    #[must_use]
    pub fn room_storage(&self, room: &RoomId) -> Option<Storage> {
        self.state.lock().rooms.get(room).cloned()
    }
}

// =============================================================================
// SERVICE
// =============================================================================

/// One connection's view of the hub.
pub struct LoopbackService {
    id: ConnectionId,
    state: Arc<Mutex<HubState>>,
}

#[async_trait]
impl ReplicationService for LoopbackService {
    fn connection_id(&self) -> ConnectionId {
        self.id
    }

    async fn enter_room(&self, room: &RoomId, initial: &Storage) -> Result<Option<serde_json::Value>, ReplicationError> {
        let mut state = self.state.lock();

        let snapshot = match state.rooms.get(room) {
            Some(existing) => {
                Some(serde_json::to_value(existing).map_err(|e| ReplicationError::CorruptSnapshot(e.to_string()))?)
            }
            None => {
                state.rooms.insert(room.clone(), initial.clone());
                None
            }
        };

        let peers = state.peers_in(room, Some(self.id));
        let peer_presence: Vec<(ConnectionId, Presence)> = peers
            .iter()
            .filter_map(|id| state.members.get(id).map(|m| (*id, m.presence)))
            .collect();

        let member = state.members.get_mut(&self.id).ok_or(ReplicationError::Closed)?;
        member.room = Some(room.clone());
        member.presence = Presence::default();
        for (connection, presence) in peer_presence {
            member.send(self.id, RemoteEvent::Presence { connection, presence });
        }

        let joined = RemoteEvent::Presence { connection: self.id, presence: Presence::default() };
        state.broadcast(room, Some(self.id), &joined);

        info!(%room, connection = %self.id, seeded = snapshot.is_none(), "entered room");
        Ok(snapshot)
    }

    async fn leave_room(&self, room: &RoomId) -> Result<(), ReplicationError> {
        let mut state = self.state.lock();
        state.check_room(self.id, room)?;

        if let Some(member) = state.members.get_mut(&self.id) {
            if !member.outbox.is_empty() {
                warn!(%room, dropped = member.outbox.len(), "leaving with undelivered ops");
                member.outbox.clear();
            }
            member.room = None;
        }
        state.broadcast(room, Some(self.id), &RemoteEvent::PeerLeft { connection: self.id });
        info!(%room, connection = %self.id, "left room");
        Ok(())
    }

    fn update_presence(&self, room: &RoomId, presence: &Presence) -> Result<(), ReplicationError> {
        let mut state = self.state.lock();
        if state.check_room(self.id, room)?.partitioned {
            return Err(ReplicationError::NetworkPartition);
        }
        if let Some(member) = state.members.get_mut(&self.id) {
            member.presence = *presence;
        }
        let event = RemoteEvent::Presence { connection: self.id, presence: *presence };
        state.broadcast(room, Some(self.id), &event);
        Ok(())
    }

    fn mutate_storage(&self, room: &RoomId, op: &StorageOp) -> Result<(), ReplicationError> {
        let mut state = self.state.lock();
        state.check_room(self.id, room)?;
        if let Some(member) = state.members.get_mut(&self.id) {
            member.outbox.push_back(op.clone());
        }
        Ok(())
    }

    async fn flush(&self, room: &RoomId) -> Result<(), ReplicationError> {
        let mut state = self.state.lock();
        let member = state.check_room(self.id, room)?;
        if member.partitioned && !member.outbox.is_empty() {
            return Err(ReplicationError::NetworkPartition);
        }
        while state.deliver_next(self.id).is_some() {}
        Ok(())
    }
}
