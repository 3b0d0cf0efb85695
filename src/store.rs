//! Scene state store: the room-scoped replica of shared state.
//!
//! DESIGN
//! ======
//! A `SceneStore` exists for exactly one room session. It is created by
//! `enter` (seeded from any existing durable snapshot), owned by the
//! application root, passed by reference to consumers, and consumed by
//! `leave`, which flushes pending writes before the room is torn down.
//!
//! Local writes are optimistic: applied immediately, then handed to the
//! replication service. Remote events are applied with the same
//! last-write-wins rule, so the replica converges on the backend's delivery
//! order. Subscribers register for one `Slice` and are only called when that
//! slice actually changed.
//!
//! ERROR HANDLING
//! ==============
//! Replication errors never undo a local write and never block another one.
//! They are logged with their error code and otherwise ignored; redelivery is
//! the service's job.

#[cfg(test)]
#[path = "store_test.rs"]
mod store_test;

use std::collections::BTreeMap;
use std::sync::Arc;

use glam::Vec3;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::ErrorCode;
use crate::model::{
    Annotation, AnnotationId, Change, ObjectTransform, PartParameters, PartialPart, Presence, Slice, Storage, StorageOp,
};
use crate::replication::{Connection, ConnectionId, RemoteEvent, ReplicationError, ReplicationService, RoomId};

// =============================================================================
// TYPES
// =============================================================================

/// Handle returned by `subscribe`, used to unsubscribe.
pub type SubscriptionId = u64;

/// Read-only view handed to subscribers.
pub struct Snapshot<'a> {
    pub storage: &'a Storage,
    pub presence: &'a Presence,
    pub others: &'a BTreeMap<ConnectionId, Presence>,
}

type Callback = Box<dyn FnMut(&Snapshot<'_>) + Send>;

struct Subscriber {
    id: SubscriptionId,
    slice: Slice,
    callback: Callback,
}

/// What a remote event did to the replica.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    Storage { change: Change, origin: ConnectionId },
    Peer(ConnectionId),
    PeerLeft(ConnectionId),
}

// =============================================================================
// STORE
// =============================================================================

pub struct SceneStore {
    room: RoomId,
    service: Arc<dyn ReplicationService>,
    inbox: mpsc::UnboundedReceiver<RemoteEvent>,
    storage: Storage,
    presence: Presence,
    others: BTreeMap<ConnectionId, Presence>,
    subscribers: Vec<Subscriber>,
    next_subscription: SubscriptionId,
}

impl SceneStore {
    /// Enter `room` over `connection`, seeding storage from the room's durable
    /// snapshot where one exists and from `initial` otherwise.
    ///
    /// # Errors
    ///
    /// Returns the service's error if the room cannot be entered, or
    /// `CorruptSnapshot` if the existing snapshot does not parse.
    pub async fn enter(connection: Connection, room: RoomId, initial: Storage) -> Result<Self, ReplicationError> {
        let Connection { service, inbox } = connection;
        let snapshot = service.enter_room(&room, &initial).await?;
        let storage = match snapshot {
            Some(snapshot) => initial
                .merged_with_snapshot(&snapshot)
                .map_err(|e| ReplicationError::CorruptSnapshot(e.to_string()))?,
            None => initial,
        };

        info!(%room, connection = %service.connection_id(), objects = storage.objects.len(), "store ready");
        Ok(Self {
            room,
            service,
            inbox,
            storage,
            presence: Presence::default(),
            others: BTreeMap::new(),
            subscribers: Vec::new(),
            next_subscription: 0,
        })
    }

    /// Flush pending writes, then leave the room. The room is left even when
    /// the flush fails, so peers never keep a ghost participant; the unsent ops
    /// are the service's to drop.
    ///
    /// # Errors
    ///
    /// Returns the flush error if there was one, else the leave error.
    pub async fn leave(self) -> Result<(), ReplicationError> {
        let flushed = self.service.flush(&self.room).await;
        if let Err(e) = &flushed {
            warn!(room = %self.room, error = %e, code = e.error_code(), "flush failed; leaving anyway");
        }
        let left = self.service.leave_room(&self.room).await;
        flushed.and(left)
    }

    // --- Queries ---

    #[must_use]
    pub fn room(&self) -> &RoomId {
        &self.room
    }

    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.service.connection_id()
    }

    #[must_use]
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    #[must_use]
    pub fn presence(&self) -> &Presence {
        &self.presence
    }

    /// Latest presence of every other participant in the room.
    #[must_use]
    pub fn others(&self) -> &BTreeMap<ConnectionId, Presence> {
        &self.others
    }

    #[must_use]
    pub fn matrix(&self, name: &str) -> Option<ObjectTransform> {
        self.storage.objects.get(name).copied()
    }

    #[must_use]
    pub fn annotations(&self) -> &[Annotation] {
        &self.storage.annotations
    }

    #[must_use]
    pub fn part(&self) -> PartParameters {
        self.storage.part
    }

    // --- Presence ---

    /// Ephemeral cursor update. Fire-and-forget; the next call overwrites it.
    pub fn set_cursor(&mut self, cursor: Vec3) {
        self.presence.cursor = cursor;
        if let Err(e) = self.service.update_presence(&self.room, &self.presence) {
            debug!(room = %self.room, error = %e, "presence update dropped");
        }
    }

    // --- Storage ---

    pub fn set_matrix(&mut self, name: &str, matrix: ObjectTransform) {
        self.commit(StorageOp::SetMatrix { name: name.to_owned(), matrix });
    }

    pub fn add_annotation(&mut self, id: AnnotationId, position: Vec3, text: &str, parent: Option<&str>) {
        let annotation = Annotation { id, position, text: text.to_owned(), parent: parent.map(str::to_owned) };
        self.commit(StorageOp::AddAnnotation { annotation });
    }

    /// Remove by id. Unknown ids are a no-op and are not broadcast.
    pub fn remove_annotation(&mut self, id: AnnotationId) {
        self.commit(StorageOp::RemoveAnnotation { id });
    }

    /// Field-wise merge into the part parameters, broadcast as a whole record.
    pub fn set_part(&mut self, partial: &PartialPart) {
        let mut part = self.storage.part;
        part.merge(partial);
        self.commit(StorageOp::SetPart { part });
    }

    fn commit(&mut self, op: StorageOp) {
        let change = self.storage.apply(&op);
        let redundant = change.is_none()
            && matches!(op, StorageOp::AddAnnotation { .. } | StorageOp::RemoveAnnotation { .. });
        if redundant {
            debug!(room = %self.room, ?op, "redundant op not broadcast");
            return;
        }

        if let Err(e) = self.service.mutate_storage(&self.room, &op) {
            warn!(room = %self.room, error = %e, code = e.error_code(), "storage write kept local");
        }
        if let Some(change) = change {
            self.notify(change.slice());
        }
    }

    // --- Remote ---

    /// Apply one inbound event. Returns what changed, if anything.
    pub fn apply_remote(&mut self, event: RemoteEvent) -> Option<Applied> {
        match event {
            RemoteEvent::Presence { connection, presence } => {
                if connection == self.connection_id() {
                    return None;
                }
                self.others.insert(connection, presence);
                self.notify(Slice::Others);
                Some(Applied::Peer(connection))
            }
            RemoteEvent::PeerLeft { connection } => {
                self.others.remove(&connection)?;
                self.notify(Slice::Others);
                Some(Applied::PeerLeft(connection))
            }
            RemoteEvent::Storage { origin, op } => {
                let change = self.storage.apply(&op)?;
                debug!(room = %self.room, %origin, ?change, "remote storage applied");
                self.notify(change.slice());
                Some(Applied::Storage { change, origin })
            }
        }
    }

    /// Apply every event already waiting in the inbox, without suspending.
    pub fn pump(&mut self) -> Vec<Applied> {
        let mut applied = Vec::new();
        while let Ok(event) = self.inbox.try_recv() {
            applied.extend(self.apply_remote(event));
        }
        applied
    }

    /// Wait for the next inbound event. `None` once the backend hangs up.
    pub async fn recv(&mut self) -> Option<RemoteEvent> {
        self.inbox.recv().await
    }

    // --- Subscriptions ---

    /// Call `callback` whenever `slice` changes, locally or remotely.
    pub fn subscribe<F>(&mut self, slice: Slice, callback: F) -> SubscriptionId
    where
        F: FnMut(&Snapshot<'_>) + Send + 'static,
    {
        let id = self.next_subscription;
        self.next_subscription += 1;
        self.subscribers.push(Subscriber { id, slice, callback: Box::new(callback) });
        id
    }

    /// Returns false if `id` was not subscribed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.id != id);
        self.subscribers.len() != before
    }

    fn notify(&mut self, slice: Slice) {
        let snapshot = Snapshot { storage: &self.storage, presence: &self.presence, others: &self.others };
        for subscriber in self.subscribers.iter_mut().filter(|s| s.slice == slice) {
            (subscriber.callback)(&snapshot);
        }
    }
}
