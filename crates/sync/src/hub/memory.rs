// In-process loopback hub.
//
// Implements the relay behaviour of the collaboration hub for local
// development and tests: room membership, history replay on join, fan-out of
// updates and awareness to the other members, snapshot compaction, and a
// `UserDisconnected` notice to the remaining members when a connection ends.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{anyhow, bail, Result};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use coedit_common::protocol::hub::{HubCall, HubEvent};

use super::{HubFuture, HubTransport};

type RoomKey = (String, String);

/// One call as observed by the hub, tagged with the connection that sent it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubLogEntry {
    pub connection: u64,
    pub user_id: String,
    pub call: HubCall,
}

#[derive(Default)]
struct RoomState {
    history: Vec<String>,
    members: HashSet<u64>,
}

struct Member {
    user_id: String,
    events: UnboundedSender<HubEvent>,
    rooms: HashSet<RoomKey>,
}

#[derive(Default)]
struct HubState {
    next_connection: u64,
    members: HashMap<u64, Member>,
    rooms: HashMap<RoomKey, RoomState>,
    log: Vec<HubLogEntry>,
    refuse_connections: bool,
}

impl HubState {
    fn remove_member(&mut self, connection: u64) {
        let Some(member) = self.members.remove(&connection) else {
            return;
        };
        for key in &member.rooms {
            let Some(room) = self.rooms.get_mut(key) else {
                continue;
            };
            room.members.remove(&connection);
            let notice = HubEvent::UserDisconnected { user_id: member.user_id.clone() };
            for peer in &room.members {
                if let Some(peer) = self.members.get(peer) {
                    let _ = peer.events.send(notice.clone());
                }
            }
        }
    }

    fn send_to_others(&self, key: &RoomKey, sender: u64, event: HubEvent) {
        let Some(room) = self.rooms.get(key) else {
            return;
        };
        for peer in room.members.iter().filter(|peer| **peer != sender) {
            if let Some(peer) = self.members.get(peer) {
                let _ = peer.events.send(event.clone());
            }
        }
    }

    fn handle_call(&mut self, connection: u64, call: HubCall) -> Result<()> {
        let user_id = match self.members.get(&connection) {
            Some(member) => member.user_id.clone(),
            None => bail!("connection {connection} is not open"),
        };
        self.log.push(HubLogEntry { connection, user_id, call: call.clone() });
        let key = (call.team_id().to_string(), call.room().to_string());

        match call {
            HubCall::JoinDocument { .. } => {
                let room = self.rooms.entry(key.clone()).or_default();
                room.members.insert(connection);
                let replay = HubEvent::ReceiveDocState { payloads_b64: room.history.clone() };
                if let Some(member) = self.members.get_mut(&connection) {
                    member.rooms.insert(key);
                    let _ = member.events.send(replay);
                }
            }
            HubCall::LeaveDocument { .. } => {
                if let Some(room) = self.rooms.get_mut(&key) {
                    room.members.remove(&connection);
                }
                if let Some(member) = self.members.get_mut(&connection) {
                    member.rooms.remove(&key);
                }
            }
            HubCall::BroadcastUpdate { payload_b64, .. } => {
                self.rooms.entry(key.clone()).or_default().history.push(payload_b64.clone());
                self.send_to_others(&key, connection, HubEvent::ReceiveUpdate { payload_b64 });
            }
            HubCall::BroadcastAwareness { payload_b64, .. } => {
                self.send_to_others(&key, connection, HubEvent::ReceiveAwareness { payload_b64 });
            }
            HubCall::SendMergedSnapshot { payload_b64, .. } => {
                self.rooms.entry(key).or_default().history = vec![payload_b64];
            }
        }
        Ok(())
    }
}

/// Shared loopback hub. Clones refer to the same hub.
#[derive(Clone, Default)]
pub struct MemoryHub {
    state: Arc<Mutex<HubState>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport that connects to this hub as `user_id`.
    pub fn transport(&self, user_id: impl Into<String>) -> MemoryTransport {
        MemoryTransport { hub: self.clone(), user_id: user_id.into(), connection: None }
    }

    /// Make every subsequent `start` fail until re-enabled.
    pub fn set_refuse_connections(&self, refuse: bool) {
        self.state().refuse_connections = refuse;
    }

    /// Drop every open connection of `user_id`, as a network failure would.
    /// Returns how many connections were dropped.
    pub fn drop_user_connections(&self, user_id: &str) -> usize {
        let mut state = self.state();
        let doomed: Vec<u64> = state
            .members
            .iter()
            .filter(|(_, member)| member.user_id == user_id)
            .map(|(connection, _)| *connection)
            .collect();
        for connection in &doomed {
            state.remove_member(*connection);
        }
        doomed.len()
    }

    /// Seed a room's stored history.
    pub fn seed_history(&self, team_id: &str, room: &str, payloads_b64: Vec<String>) {
        let key = (team_id.to_string(), room.to_string());
        self.state().rooms.entry(key).or_default().history = payloads_b64;
    }

    pub fn history(&self, team_id: &str, room: &str) -> Vec<String> {
        let key = (team_id.to_string(), room.to_string());
        self.state().rooms.get(&key).map(|room| room.history.clone()).unwrap_or_default()
    }

    /// Every call received so far, in arrival order.
    pub fn calls(&self) -> Vec<HubLogEntry> {
        self.state().log.clone()
    }

    pub fn calls_from(&self, user_id: &str) -> Vec<HubLogEntry> {
        self.state().log.iter().filter(|entry| entry.user_id == user_id).cloned().collect()
    }

    pub fn open_connections(&self) -> usize {
        self.state().members.len()
    }

    fn state(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open(&self, user_id: &str, access_token: &str) -> Result<(u64, UnboundedReceiver<HubEvent>)> {
        let mut state = self.state();
        if state.refuse_connections {
            bail!("hub refused connection");
        }
        if access_token.is_empty() {
            bail!("missing bearer token");
        }
        state.next_connection += 1;
        let connection = state.next_connection;
        let (events, receiver) = mpsc::unbounded_channel();
        state.members.insert(
            connection,
            Member { user_id: user_id.to_string(), events, rooms: HashSet::new() },
        );
        Ok((connection, receiver))
    }
}

/// Connection from one session to a [`MemoryHub`].
pub struct MemoryTransport {
    hub: MemoryHub,
    user_id: String,
    connection: Option<(u64, UnboundedReceiver<HubEvent>)>,
}

impl MemoryTransport {
    /// Hub-assigned id of the current connection, if open.
    pub fn connection_id(&self) -> Option<u64> {
        self.connection.as_ref().map(|(connection, _)| *connection)
    }
}

impl HubTransport for MemoryTransport {
    fn start<'a>(&'a mut self, access_token: &'a str) -> HubFuture<'a, ()> {
        Box::pin(async move {
            if let Some((stale, _)) = self.connection.take() {
                self.hub.state().remove_member(stale);
            }
            self.connection = Some(self.hub.open(&self.user_id, access_token)?);
            Ok(())
        })
    }

    fn invoke<'a>(&'a mut self, call: HubCall) -> HubFuture<'a, ()> {
        Box::pin(async move {
            let (connection, _) =
                self.connection.as_ref().ok_or_else(|| anyhow!("hub connection is not open"))?;
            self.hub.state().handle_call(*connection, call)
        })
    }

    fn next_event<'a>(&'a mut self) -> HubFuture<'a, Option<HubEvent>> {
        Box::pin(async move {
            let Some((_, events)) = self.connection.as_mut() else {
                return Ok(None);
            };
            let event = events.recv().await;
            if event.is_none() {
                self.connection = None;
            }
            Ok(event)
        })
    }

    fn stop<'a>(&'a mut self) -> HubFuture<'a, ()> {
        Box::pin(async move {
            if let Some((connection, _)) = self.connection.take() {
                self.hub.state().remove_member(connection);
            }
            Ok(())
        })
    }
}
