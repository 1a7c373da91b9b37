// Collaboration session for one (team, room) pair.
//
// Owns the hub connection state machine and wires the document engine and
// the awareness store to the hub:
//
//   Disconnected -> Connecting -> Connected <-> Reconnecting
//        ^              |            |              |
//        +--------------+------------+--------------+
//
// A session is driven by exactly one task (see `driver`). Methods that take
// `now` never read the clock themselves.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use coedit_common::codec::{decode_json_base64, encode_json_base64};
use coedit_common::presence::{AwarenessUpdate, ConnectionId, CursorRange, PresenceUser};
use coedit_common::protocol::hub::{HubCall, HubEvent};

use crate::awareness::{AwarenessManager, DebounceConfig, Participant};
use crate::channel::UpdateChannel;
use crate::color::ColorPool;
use crate::compaction::CompactionPolicy;
use crate::engine::{DocChange, DocumentEngine};
use crate::error::SyncError;
use crate::events::SubscriptionId;
use crate::hub::{ConnectionState, HubTransport, ReconnectPolicy};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub team_id: String,
    pub room_id: String,
    pub user_id: String,
    pub user_name: String,
}

#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub reconnect: ReconnectPolicy,
    pub debounce: DebounceConfig,
    pub compaction: CompactionPolicy,
}

/// Next thing the driver has to react to.
#[derive(Debug)]
pub enum SessionInput {
    Hub(HubEvent),
    LocalChange(DocChange),
    /// The transport closed or failed.
    ConnectionLost,
}

pub struct Session<T, D: DocumentEngine> {
    identity: SessionIdentity,
    connection_id: ConnectionId,
    color: String,
    color_pool: ColorPool,
    color_released: bool,
    state: ConnectionState,
    transport: T,
    engine: Arc<D>,
    channel: UpdateChannel,
    awareness: AwarenessManager,
    compaction: CompactionPolicy,
    reconnect: ReconnectPolicy,
    reconnect_attempts: u32,
    access_token: String,
    local_changes: Option<UnboundedReceiver<DocChange>>,
    engine_subscription: Option<SubscriptionId>,
}

impl<T: HubTransport, D: DocumentEngine> Session<T, D> {
    pub fn new(
        identity: SessionIdentity,
        transport: T,
        engine: Arc<D>,
        colors: &ColorPool,
        options: SessionOptions,
    ) -> Self {
        let connection_id = ConnectionId::new();
        let color = colors.allocate();
        let user = PresenceUser {
            user_id: identity.user_id.clone(),
            name: identity.user_name.clone(),
            color: color.clone(),
        };
        let channel = UpdateChannel::new(identity.team_id.clone(), identity.room_id.clone());
        debug!(
            team_id = %identity.team_id,
            room = %identity.room_id,
            connection = %connection_id,
            %color,
            "session created"
        );

        Self {
            connection_id,
            awareness: AwarenessManager::new(connection_id, user, options.debounce),
            identity,
            color,
            color_pool: colors.clone(),
            color_released: false,
            state: ConnectionState::Disconnected,
            transport,
            engine,
            channel,
            compaction: options.compaction,
            reconnect: options.reconnect,
            reconnect_attempts: 0,
            access_token: String::new(),
            local_changes: None,
            engine_subscription: None,
        }
    }

    // ── Accessors ──────────────────────────────────────────────────

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn color(&self) -> &str {
        &self.color
    }

    pub fn engine(&self) -> &Arc<D> {
        &self.engine
    }

    pub fn awareness(&self) -> &AwarenessManager {
        &self.awareness
    }

    pub fn participants(&self) -> Vec<Participant> {
        self.awareness.participants()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Failed attempts since the connection was lost.
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    /// Delay before the next reconnect attempt.
    pub fn next_reconnect_delay(&self) -> Duration {
        self.reconnect.delay_for(self.reconnect_attempts)
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Open the hub connection and join the room.
    ///
    /// On failure the session is back in `Disconnected` and nothing retries.
    pub async fn connect(&mut self, access_token: &str) -> Result<(), SyncError> {
        self.transition(ConnectionState::Connecting)?;
        self.access_token = access_token.to_string();
        self.attach_engine();

        match self.open_and_join().await {
            Ok(()) => {
                self.transition(ConnectionState::Connected)?;
                self.on_joined();
                Ok(())
            }
            Err(error) => {
                warn!(
                    team_id = %self.identity.team_id,
                    room = %self.identity.room_id,
                    error = %error,
                    "connect failed"
                );
                self.stop_transport().await;
                self.detach_engine();
                self.transition(ConnectionState::Disconnected)?;
                Err(error)
            }
        }
    }

    /// Mark an established connection as lost. Reconnection is driven by
    /// `try_reconnect`.
    pub fn connection_lost(&mut self) -> Result<(), SyncError> {
        self.transition(ConnectionState::Reconnecting)?;
        self.reconnect_attempts = 0;
        self.awareness.discard_pending();
        Ok(())
    }

    /// One reconnect attempt. Re-joins the room before any other traffic.
    /// Once the attempt budget is exhausted the session is `Disconnected`.
    pub async fn try_reconnect(&mut self) -> Result<(), SyncError> {
        if self.state != ConnectionState::Reconnecting {
            return Err(SyncError::NotConnected(self.state));
        }
        let attempt = self.reconnect_attempts + 1;
        info!(
            team_id = %self.identity.team_id,
            room = %self.identity.room_id,
            attempt,
            "reconnecting to hub"
        );
        self.stop_transport().await;

        match self.open_and_join().await {
            Ok(()) => {
                self.transition(ConnectionState::Connected)?;
                self.on_joined();
                Ok(())
            }
            Err(error) => {
                self.reconnect_attempts = attempt;
                warn!(
                    team_id = %self.identity.team_id,
                    room = %self.identity.room_id,
                    attempt,
                    error = %error,
                    "reconnect attempt failed"
                );
                if !self.reconnect.should_retry(self.reconnect_attempts) {
                    warn!(attempts = self.reconnect_attempts, "giving up on hub connection");
                    self.stop_transport().await;
                    self.detach_engine();
                    self.transition(ConnectionState::Disconnected)?;
                }
                Err(error)
            }
        }
    }

    /// Graceful leave: retract local presence, leave the room, close the
    /// transport, detach from the engine and give the color back.
    pub async fn disconnect(&mut self) {
        let retraction = self.awareness.clear_local();
        if self.state.is_connected() {
            if let Some(update) = retraction {
                if let Err(error) = self.send_awareness(&update).await {
                    warn!(error = %error, "failed to retract presence");
                }
            }
            let leave = self.channel.leave_call();
            if let Err(error) = self.send(leave).await {
                warn!(error = %error, "failed to leave room");
            }
        }
        self.stop_transport().await;
        self.detach_engine();
        self.release_color();
        if self.state != ConnectionState::Disconnected {
            if let Err(error) = self.transition(ConnectionState::Disconnected) {
                warn!(error = %error, "unexpected state during disconnect");
            }
        }
    }

    // ── Inbound ────────────────────────────────────────────────────

    /// Wait for the next hub event or local document change.
    pub async fn next_input(&mut self) -> SessionInput {
        let Self { transport, local_changes, .. } = self;
        let Some(changes) = local_changes.as_mut() else {
            return Self::hub_input(transport.next_event().await);
        };
        tokio::select! {
            Some(change) = changes.recv() => SessionInput::LocalChange(change),
            event = transport.next_event() => Self::hub_input(event),
        }
    }

    fn hub_input(event: anyhow::Result<Option<HubEvent>>) -> SessionInput {
        match event {
            Ok(Some(event)) => SessionInput::Hub(event),
            Ok(None) => SessionInput::ConnectionLost,
            Err(error) => {
                warn!(error = %format!("{error:#}"), "hub transport failed");
                SessionInput::ConnectionLost
            }
        }
    }

    pub async fn handle_input(&mut self, input: SessionInput) {
        match input {
            SessionInput::Hub(event) => self.handle_event(event).await,
            SessionInput::LocalChange(change) => {
                if let Err(error) = self.handle_local_change(change).await {
                    warn!(error = %error, "failed to send local update");
                    self.lose_connection();
                }
            }
            SessionInput::ConnectionLost => self.lose_connection(),
        }
    }

    fn lose_connection(&mut self) {
        if !self.state.is_connected() {
            return;
        }
        warn!(
            team_id = %self.identity.team_id,
            room = %self.identity.room_id,
            "hub connection lost"
        );
        if let Err(error) = self.connection_lost() {
            warn!(error = %error, "could not enter reconnecting state");
        }
    }

    /// Apply one hub event. Failures are contained and logged.
    pub async fn handle_event(&mut self, event: HubEvent) {
        debug!(event = event.name(), "hub event");
        match event {
            HubEvent::ReceiveUpdate { payload_b64 } => {
                if let Err(error) = self.channel.apply_remote(self.engine.as_ref(), &payload_b64) {
                    warn!(error = %error, "dropping remote update");
                }
            }
            HubEvent::ReceiveAwareness { payload_b64 } => {
                match decode_json_base64::<AwarenessUpdate>(&payload_b64) {
                    Ok(update) => {
                        let change = self.awareness.apply_remote(update);
                        // A newcomer has not seen our presence yet.
                        if !change.added.is_empty() {
                            self.awareness.schedule_rebroadcast(Instant::now());
                        }
                    }
                    Err(error) => warn!(error = %error, "dropping remote awareness"),
                }
            }
            HubEvent::ReceiveDocState { payloads_b64 } => self.handle_replay(&payloads_b64).await,
            HubEvent::UserDisconnected { user_id } => {
                let removed = self.awareness.remove_user(&user_id);
                debug!(%user_id, entries = removed.len(), "peer disconnected");
            }
        }
    }

    async fn handle_replay(&mut self, payloads_b64: &[String]) {
        let count = match self.channel.apply_replay(self.engine.as_ref(), payloads_b64) {
            Ok(count) => count,
            Err(error) => {
                warn!(
                    team_id = %self.identity.team_id,
                    room = %self.identity.room_id,
                    batch = payloads_b64.len(),
                    error = %error,
                    "history replay aborted, skipping compaction"
                );
                return;
            }
        };
        debug!(count, "history replayed");
        if self.compaction.should_compact(count) {
            self.compact(count).await;
        }
    }

    async fn compact(&mut self, replayed: usize) {
        let snapshot = self.engine.encode_snapshot();
        let call = self.channel.snapshot_call(&snapshot);
        match self.send(call).await {
            Ok(()) => info!(
                team_id = %self.identity.team_id,
                room = %self.identity.room_id,
                replayed,
                bytes = snapshot.len(),
                "submitted merged snapshot"
            ),
            Err(error) => warn!(replayed, error = %error, "snapshot submission failed"),
        }
    }

    // ── Outbound ───────────────────────────────────────────────────

    /// Forward a document change. Dropped unless connected; echoes of
    /// remote-applied updates are never sent.
    pub async fn handle_local_change(&mut self, change: DocChange) -> Result<(), SyncError> {
        if !self.state.is_connected() {
            debug!(state = ?self.state, "dropping local update while not connected");
            return Ok(());
        }
        match self.channel.outbound(&change) {
            Some(call) => self.send(call).await,
            None => Ok(()),
        }
    }

    pub fn set_cursor(&mut self, cursor: CursorRange, now: Instant) {
        self.awareness.set_cursor(cursor, now);
    }

    pub fn clear_cursor(&mut self, now: Instant) {
        self.awareness.clear_cursor(now);
    }

    /// When the pending presence broadcast is due.
    pub fn awareness_deadline(&self) -> Option<Instant> {
        self.awareness.deadline()
    }

    /// Send the debounced local presence if its window has elapsed.
    pub async fn flush_awareness(&mut self, now: Instant) -> Result<(), SyncError> {
        let Some(update) = self.awareness.take_due(now) else {
            return Ok(());
        };
        if !self.state.is_connected() {
            debug!(state = ?self.state, "dropping presence broadcast while not connected");
            return Ok(());
        }
        self.send_awareness(&update).await
    }

    async fn send_awareness(&mut self, update: &AwarenessUpdate) -> Result<(), SyncError> {
        let payload = encode_json_base64(update)?;
        let call = self.channel.awareness_call(payload);
        self.send(call).await
    }

    async fn send(&mut self, call: HubCall) -> Result<(), SyncError> {
        let method = call.method();
        debug!(method, "hub call");
        self.transport.invoke(call).await.map_err(|error| SyncError::send(method, &error))
    }

    // ── Internals ──────────────────────────────────────────────────

    async fn open_and_join(&mut self) -> Result<(), SyncError> {
        self.transport
            .start(&self.access_token)
            .await
            .map_err(|error| SyncError::Connect(format!("{error:#}")))?;
        let join = self.channel.join_call();
        self.send(join).await
    }

    fn on_joined(&mut self) {
        self.reconnect_attempts = 0;
        self.awareness.schedule_rebroadcast(Instant::now());
        info!(
            team_id = %self.identity.team_id,
            room = %self.identity.room_id,
            connection = %self.connection_id,
            "joined room"
        );
    }

    async fn stop_transport(&mut self) {
        if let Err(error) = self.transport.stop().await {
            debug!(error = %format!("{error:#}"), "transport stop failed");
        }
    }

    fn transition(&mut self, next: ConnectionState) -> Result<(), SyncError> {
        if !self.state.can_transition_to(next) {
            return Err(SyncError::InvalidTransition { from: self.state, to: next });
        }
        info!(
            team_id = %self.identity.team_id,
            room = %self.identity.room_id,
            from = ?self.state,
            to = ?next,
            "connection state changed"
        );
        self.state = next;
        Ok(())
    }

    fn attach_engine(&mut self) {
        if self.engine_subscription.is_some() {
            return;
        }
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.engine.changes().subscribe(move |change: &DocChange| {
            let _ = sender.send(change.clone());
        });
        self.engine_subscription = Some(id);
        self.local_changes = Some(receiver);
    }

    fn detach_engine(&mut self) {
        if let Some(id) = self.engine_subscription.take() {
            self.engine.changes().unsubscribe(id);
        }
        self.local_changes = None;
    }

    fn release_color(&mut self) {
        if !self.color_released {
            self.color_pool.release(&self.color);
            self.color_released = true;
        }
    }
}

impl<T, D: DocumentEngine> Drop for Session<T, D> {
    fn drop(&mut self) {
        if let Some(id) = self.engine_subscription.take() {
            self.engine.changes().unsubscribe(id);
        }
        if !self.color_released {
            self.color_pool.release(&self.color);
        }
    }
}

impl<T, D: DocumentEngine> std::fmt::Debug for Session<T, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity)
            .field("connection_id", &self.connection_id)
            .field("state", &self.state)
            .field("color", &self.color)
            .finish()
    }
}
