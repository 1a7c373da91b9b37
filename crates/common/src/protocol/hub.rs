// Frame types for the collaboration hub protocol.
//
// Every frame is one JSON text message tagged by `type`. Binary payloads are
// base64 strings (see `crate::codec`).

use serde::{Deserialize, Serialize};

/// Client -> hub invocations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubCall {
    /// Join a document's real-time group. The hub answers with
    /// `HubEvent::ReceiveDocState`.
    JoinDocument { team_id: String, room: String },

    /// Leave the group cleanly.
    LeaveDocument { team_id: String, room: String },

    /// Propagate one CRDT update to the other members of the room.
    BroadcastUpdate { team_id: String, room: String, payload_b64: String },

    /// Propagate one awareness delta.
    BroadcastAwareness { team_id: String, room: String, payload_b64: String },

    /// Ask the hub to replace its stored history with one snapshot.
    SendMergedSnapshot { team_id: String, room: String, payload_b64: String },
}

impl HubCall {
    pub fn method(&self) -> &'static str {
        match self {
            Self::JoinDocument { .. } => "JoinDocument",
            Self::LeaveDocument { .. } => "LeaveDocument",
            Self::BroadcastUpdate { .. } => "BroadcastUpdate",
            Self::BroadcastAwareness { .. } => "BroadcastAwareness",
            Self::SendMergedSnapshot { .. } => "SendMergedSnapshot",
        }
    }

    pub fn team_id(&self) -> &str {
        match self {
            Self::JoinDocument { team_id, .. }
            | Self::LeaveDocument { team_id, .. }
            | Self::BroadcastUpdate { team_id, .. }
            | Self::BroadcastAwareness { team_id, .. }
            | Self::SendMergedSnapshot { team_id, .. } => team_id,
        }
    }

    pub fn room(&self) -> &str {
        match self {
            Self::JoinDocument { room, .. }
            | Self::LeaveDocument { room, .. }
            | Self::BroadcastUpdate { room, .. }
            | Self::BroadcastAwareness { room, .. }
            | Self::SendMergedSnapshot { room, .. } => room,
        }
    }
}

/// Hub -> client pushes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubEvent {
    /// One CRDT update from a peer.
    ReceiveUpdate { payload_b64: String },

    /// One awareness delta from a peer.
    ReceiveAwareness { payload_b64: String },

    /// Ordered replay of the room's stored history, sent after a join.
    ReceiveDocState { payloads_b64: Vec<String> },

    /// A user's connection to the room went away.
    UserDisconnected { user_id: String },
}

impl HubEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReceiveUpdate { .. } => "ReceiveUpdate",
            Self::ReceiveAwareness { .. } => "ReceiveAwareness",
            Self::ReceiveDocState { .. } => "ReceiveDocState",
            Self::UserDisconnected { .. } => "UserDisconnected",
        }
    }
}
