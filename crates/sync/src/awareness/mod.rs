// Presence store for one session: the local user's cursor plus every remote
// peer's last known state, keyed by connection id.
//
// Local changes go out through a trailing debounce; remote states are merged
// by per-connection clock. All timing takes an explicit `now` so the driver
// and the tests own the clock.

pub mod debounce;

use std::collections::{BTreeMap, HashMap, VecDeque};

use tokio::time::Instant;
use tracing::debug;

use coedit_common::crdt::ChangeOrigin;
use coedit_common::presence::{
    AwarenessEntry, AwarenessUpdate, ConnectionId, CursorRange, PresenceState, PresenceUser,
};

use crate::events::EventEmitter;

pub use debounce::{DebounceConfig, Debouncer};

/// Removed connections whose last clock is still remembered.
pub const MAX_TOMBSTONES: usize = 256;

/// Keys touched by one awareness mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwarenessChange {
    pub added: Vec<ConnectionId>,
    pub updated: Vec<ConnectionId>,
    pub removed: Vec<ConnectionId>,
    pub origin: ChangeOrigin,
}

impl AwarenessChange {
    fn new(origin: ChangeOrigin) -> Self {
        Self { added: Vec::new(), updated: Vec::new(), removed: Vec::new(), origin }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// One row of the participant list shown next to the editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub connection_id: ConnectionId,
    pub user_id: String,
    pub display_name: String,
    pub color: String,
    pub cursor: Option<CursorRange>,
    pub is_local: bool,
}

#[derive(Debug, Clone)]
struct TrackedPresence {
    clock: u64,
    state: PresenceState,
    /// Store-wide sequence of the last write, for "most recent wins".
    updated_seq: u64,
}

pub struct AwarenessManager {
    local_id: ConnectionId,
    identity: PresenceUser,
    entries: BTreeMap<ConnectionId, TrackedPresence>,
    /// Highest clock seen per connection. Survives removal so a late,
    /// older state cannot resurrect a departed peer.
    clocks: HashMap<ConnectionId, u64>,
    /// Removed connections, oldest first. Their clocks are forgotten once
    /// more than `MAX_TOMBSTONES` are queued.
    tombstones: VecDeque<ConnectionId>,
    seq: u64,
    debouncer: Debouncer,
    changes: EventEmitter<AwarenessChange>,
}

impl AwarenessManager {
    pub fn new(local_id: ConnectionId, identity: PresenceUser, config: DebounceConfig) -> Self {
        Self {
            local_id,
            identity,
            entries: BTreeMap::new(),
            clocks: HashMap::new(),
            tombstones: VecDeque::new(),
            seq: 0,
            debouncer: Debouncer::new(config),
            changes: EventEmitter::new(),
        }
    }

    pub fn local_id(&self) -> ConnectionId {
        self.local_id
    }

    pub fn changes(&self) -> &EventEmitter<AwarenessChange> {
        &self.changes
    }

    pub fn local_state(&self) -> Option<&PresenceState> {
        self.entries.get(&self.local_id).map(|tracked| &tracked.state)
    }

    pub fn state_of(&self, connection_id: ConnectionId) -> Option<&PresenceState> {
        self.entries.get(&connection_id).map(|tracked| &tracked.state)
    }

    /// Number of tracked connections, local included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn set_cursor(&mut self, cursor: CursorRange, now: Instant) {
        self.update_local(Some(cursor), now);
    }

    pub fn clear_cursor(&mut self, now: Instant) {
        self.update_local(None, now);
    }

    fn update_local(&mut self, cursor: Option<CursorRange>, now: Instant) {
        let user = self
            .local_state()
            .map(|state| state.user.clone())
            .unwrap_or_else(|| self.identity.clone());
        let clock = self.bump_local_clock();
        let state = PresenceState { user, cursor };

        let mut change = AwarenessChange::new(ChangeOrigin::Local);
        if self.store(self.local_id, clock, state) {
            change.added.push(self.local_id);
        } else {
            change.updated.push(self.local_id);
        }
        self.publish(change, now);
    }

    /// Remove the local entry and return the `null` state that tells peers
    /// this connection left. `None` if there was nothing to retract.
    pub fn clear_local(&mut self) -> Option<AwarenessUpdate> {
        self.debouncer.cancel();
        self.entries.remove(&self.local_id)?;
        let clock = self.bump_local_clock();

        let mut change = AwarenessChange::new(ChangeOrigin::Local);
        change.removed.push(self.local_id);
        self.changes.emit(&change);

        Some(AwarenessUpdate {
            entries: vec![AwarenessEntry { connection_id: self.local_id, clock, state: None }],
        })
    }

    /// Current local state as a wire update, if one is set.
    pub fn encode_local_update(&self) -> Option<AwarenessUpdate> {
        let tracked = self.entries.get(&self.local_id)?;
        Some(AwarenessUpdate {
            entries: vec![AwarenessEntry {
                connection_id: self.local_id,
                clock: tracked.clock,
                state: Some(tracked.state.clone()),
            }],
        })
    }

    /// Merge a peer's update. Entries for our own connection and entries not
    /// newer than what we already hold are ignored.
    pub fn apply_remote(&mut self, update: AwarenessUpdate) -> AwarenessChange {
        let mut change = AwarenessChange::new(ChangeOrigin::RemoteApplied);
        for entry in update.entries {
            if entry.connection_id == self.local_id {
                continue;
            }
            if self.clocks.get(&entry.connection_id).is_some_and(|known| entry.clock <= *known) {
                debug!(
                    connection = %entry.connection_id,
                    clock = entry.clock,
                    "ignoring stale awareness entry"
                );
                continue;
            }
            self.clocks.insert(entry.connection_id, entry.clock);
            match entry.state {
                Some(state) => {
                    if self.store(entry.connection_id, entry.clock, state) {
                        change.added.push(entry.connection_id);
                    } else {
                        change.updated.push(entry.connection_id);
                    }
                }
                None => {
                    if self.entries.remove(&entry.connection_id).is_some() {
                        change.removed.push(entry.connection_id);
                    }
                    self.bury(entry.connection_id);
                }
            }
        }
        if !change.is_empty() {
            self.changes.emit(&change);
        }
        change
    }

    /// Drop every remote entry owned by `user_id`. Emits one removal per key.
    pub fn remove_user(&mut self, user_id: &str) -> Vec<ConnectionId> {
        let doomed: Vec<ConnectionId> = self
            .entries
            .iter()
            .filter(|(id, tracked)| **id != self.local_id && tracked.state.user.user_id == user_id)
            .map(|(id, _)| *id)
            .collect();

        for id in &doomed {
            self.entries.remove(id);
            self.bury(*id);
            let mut change = AwarenessChange::new(ChangeOrigin::RemoteApplied);
            change.removed.push(*id);
            self.changes.emit(&change);
        }
        doomed
    }

    /// Participant list: one row per user (most recently updated entry wins),
    /// the local user first, then peers ordered by user id. The local
    /// connection always stands for its own user, even when another
    /// connection of the same user updated later.
    pub fn participants(&self) -> Vec<Participant> {
        let mut latest: HashMap<&str, (ConnectionId, &TrackedPresence)> = HashMap::new();
        for (id, tracked) in &self.entries {
            let user_id = tracked.state.user.user_id.as_str();
            let wins = match latest.get(user_id) {
                None => true,
                Some((current_id, _)) if *current_id == self.local_id => false,
                Some(_) if *id == self.local_id => true,
                Some((_, current)) => tracked.updated_seq > current.updated_seq,
            };
            if wins {
                latest.insert(user_id, (*id, tracked));
            }
        }

        let mut participants: Vec<Participant> = latest
            .into_values()
            .map(|(id, tracked)| Participant {
                connection_id: id,
                user_id: tracked.state.user.user_id.clone(),
                display_name: tracked.state.user.name.clone(),
                color: tracked.state.user.color.clone(),
                cursor: tracked.state.cursor,
                is_local: id == self.local_id,
            })
            .collect();
        participants.sort_by(|a, b| {
            b.is_local.cmp(&a.is_local).then_with(|| a.user_id.cmp(&b.user_id))
        });
        participants
    }

    /// Queue the current local state for broadcast, e.g. after a (re)join.
    /// The clock is bumped so peers that dropped our entry accept it again.
    pub fn schedule_rebroadcast(&mut self, now: Instant) {
        let Some(tracked) = self.entries.get(&self.local_id) else {
            return;
        };
        let state = tracked.state.clone();
        let clock = self.bump_local_clock();
        self.store(self.local_id, clock, state);
        self.debouncer.push_at(now);
    }

    /// When the pending local broadcast becomes due.
    pub fn deadline(&self) -> Option<Instant> {
        self.debouncer.next_deadline()
    }

    /// The local update to broadcast, once its debounce window has elapsed.
    pub fn take_due(&mut self, now: Instant) -> Option<AwarenessUpdate> {
        if !self.debouncer.take_due_at(now) {
            return None;
        }
        self.encode_local_update()
    }

    /// Forget a pending broadcast, e.g. when the connection is not usable.
    pub fn discard_pending(&mut self) {
        self.debouncer.cancel();
    }

    fn publish(&mut self, change: AwarenessChange, now: Instant) {
        if change.origin.should_broadcast() {
            self.debouncer.push_at(now);
        }
        self.changes.emit(&change);
    }

    /// Remember a removed connection's clock, forgetting the oldest ones
    /// beyond `MAX_TOMBSTONES`.
    fn bury(&mut self, id: ConnectionId) {
        self.tombstones.push_back(id);
        while self.tombstones.len() > MAX_TOMBSTONES {
            let Some(oldest) = self.tombstones.pop_front() else {
                break;
            };
            if !self.entries.contains_key(&oldest) && !self.tombstones.contains(&oldest) {
                self.clocks.remove(&oldest);
            }
        }
    }

    /// Insert or replace an entry. Returns `true` if the key was new.
    fn store(&mut self, id: ConnectionId, clock: u64, state: PresenceState) -> bool {
        self.seq += 1;
        let tracked = TrackedPresence { clock, state, updated_seq: self.seq };
        self.entries.insert(id, tracked).is_none()
    }

    fn bump_local_clock(&mut self) -> u64 {
        let clock = self.clocks.entry(self.local_id).or_insert(0);
        *clock += 1;
        *clock
    }
}

impl std::fmt::Debug for AwarenessManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwarenessManager")
            .field("local_id", &self.local_id)
            .field("entries", &self.entries.len())
            .field("pending", &self.debouncer.is_pending())
            .finish()
    }
}
