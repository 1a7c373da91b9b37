// Presence (awareness) types exchanged between peers editing one document.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Transient identifier of one client connection to a document.
///
/// Distinct from the user id: a user who reconnects gets a new one, and a
/// single user may briefly own several after an abrupt disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
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

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceUser {
    pub user_id: String,
    pub name: String,
    /// Hex color assigned to this user for the session (e.g. "#e06c75").
    pub color: String,
}

/// Selection in document offsets. `from == to` is a caret.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CursorRange {
    pub from: u32,
    pub to: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceState {
    pub user: PresenceUser,
    #[serde(default)]
    pub cursor: Option<CursorRange>,
}

/// One connection's presence as carried on the wire.
///
/// `state: None` means the connection left and its entry should be dropped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AwarenessEntry {
    pub connection_id: ConnectionId,
    pub clock: u64,
    #[serde(default)]
    pub state: Option<PresenceState>,
}

/// Payload of `BroadcastAwareness` / `ReceiveAwareness` before base64 framing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AwarenessUpdate {
    pub entries: Vec<AwarenessEntry>,
}
