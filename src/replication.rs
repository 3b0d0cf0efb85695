//! Replication Service boundary: the collaboration backend the store talks to.
//!
//! DESIGN
//! ======
//! The service is consumed, not implemented, by the core. Outbound traffic is
//! fire-and-forget: presence updates are best-effort, storage ops are handed to
//! the service which buffers them for delivery. Inbound traffic arrives on the
//! connection's inbox as `RemoteEvent`s in whatever order the backend
//! delivers them; the store applies them as they come.
//!
//! ERROR HANDLING
//! ==============
//! `NetworkPartition` never rolls back a local write. The store logs it and
//! keeps going; the service owns any redelivery.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::ErrorCode;
use crate::model::{Presence, Storage, StorageOp};

// =============================================================================
// IDS
// =============================================================================

/// Named collaboration room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoomId(pub String);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// One participant connection. A reconnect gets a fresh id and fresh presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// =============================================================================
// EVENTS
// =============================================================================

/// Inbound notification from the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteEvent {
    /// A peer's latest presence. Supersedes any earlier value for that peer.
    Presence { connection: ConnectionId, presence: Presence },
    /// A peer disconnected or left the room.
    PeerLeft { connection: ConnectionId },
    /// A sequenced storage op. `origin` may be this connection (echo).
    Storage { origin: ConnectionId, op: StorageOp },
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReplicationError {
    #[error("replication service unreachable")]
    NetworkPartition,
    #[error("not in room: {0}")]
    NotInRoom(RoomId),
    #[error("replication connection closed")]
    Closed,
    #[error("corrupt room snapshot: {0}")]
    CorruptSnapshot(String),
}

impl ErrorCode for ReplicationError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NetworkPartition => "E_NETWORK_PARTITION",
            Self::NotInRoom(_) => "E_NOT_IN_ROOM",
            Self::Closed => "E_REPLICATION_CLOSED",
            Self::CorruptSnapshot(_) => "E_CORRUPT_SNAPSHOT",
        }
    }
}

// =============================================================================
// SERVICE
// =============================================================================

/// The consumed collaboration backend, as seen from one connection.
#[async_trait]
pub trait ReplicationService: Send + Sync {
    /// This connection's id.
    fn connection_id(&self) -> ConnectionId;

    /// Join `room`. Returns the existing durable snapshot, if the room has one;
    /// otherwise the backend adopts `initial` as the room's storage.
    async fn enter_room(&self, room: &RoomId, initial: &Storage) -> Result<Option<serde_json::Value>, ReplicationError>;

    /// Leave `room`. Peers see a `PeerLeft`.
    async fn leave_room(&self, room: &RoomId) -> Result<(), ReplicationError>;

    /// Broadcast ephemeral fields. Best-effort, never acknowledged.
    fn update_presence(&self, room: &RoomId, presence: &Presence) -> Result<(), ReplicationError>;

    /// Hand a durable op to the backend for sequencing and broadcast.
    fn mutate_storage(&self, room: &RoomId, op: &StorageOp) -> Result<(), ReplicationError>;

    /// Wait until every op handed over so far has been delivered.
    async fn flush(&self, room: &RoomId) -> Result<(), ReplicationError>;
}

/// A service handle plus the inbox its remote events arrive on.
pub struct Connection {
    pub service: Arc<dyn ReplicationService>,
    pub inbox: mpsc::UnboundedReceiver<RemoteEvent>,
}
