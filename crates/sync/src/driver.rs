// Session driver: the single task that owns a `Session`.
//
// Multiplexes hub events, local document changes, the presence debounce
// deadline, the reconnect timer and commands from any number of
// `SessionHandle`s. Handles never wait on network I/O except for the
// explicit query/shutdown round trips.

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

use coedit_common::presence::CursorRange;

use crate::awareness::Participant;
use crate::engine::DocumentEngine;
use crate::error::SyncError;
use crate::hub::{ConnectionState, HubTransport};
use crate::session::{Session, SessionInput};

pub enum SessionCommand<D> {
    SetCursor(CursorRange),
    ClearCursor,
    /// Run a local edit against the document engine on the session task.
    Edit(Box<dyn FnOnce(&D) + Send>),
    Participants(oneshot::Sender<Vec<Participant>>),
    State(oneshot::Sender<ConnectionState>),
    Shutdown(oneshot::Sender<()>),
}

impl<D> std::fmt::Debug for SessionCommand<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SetCursor(cursor) => f.debug_tuple("SetCursor").field(cursor).finish(),
            Self::ClearCursor => f.write_str("ClearCursor"),
            Self::Edit(_) => f.write_str("Edit"),
            Self::Participants(_) => f.write_str("Participants"),
            Self::State(_) => f.write_str("State"),
            Self::Shutdown(_) => f.write_str("Shutdown"),
        }
    }
}

/// Cheap, cloneable control surface for a running session. Dropping every
/// handle shuts the session down gracefully.
pub struct SessionHandle<D> {
    commands: UnboundedSender<SessionCommand<D>>,
}

impl<D> Clone for SessionHandle<D> {
    fn clone(&self) -> Self {
        Self { commands: self.commands.clone() }
    }
}

impl<D> std::fmt::Debug for SessionHandle<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle").field("closed", &self.commands.is_closed()).finish()
    }
}

impl<D> SessionHandle<D> {
    pub fn set_cursor(&self, from: u32, to: u32) -> Result<(), SyncError> {
        self.send(SessionCommand::SetCursor(CursorRange { from, to }))
    }

    pub fn clear_cursor(&self) -> Result<(), SyncError> {
        self.send(SessionCommand::ClearCursor)
    }

    pub fn edit<F>(&self, edit: F) -> Result<(), SyncError>
    where
        F: FnOnce(&D) + Send + 'static,
    {
        self.send(SessionCommand::Edit(Box::new(edit)))
    }

    /// Read from the document engine on the session task.
    pub async fn with_engine<F, R>(&self, read: F) -> Result<R, SyncError>
    where
        F: FnOnce(&D) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply, response) = oneshot::channel();
        self.edit(move |engine| {
            let _ = reply.send(read(engine));
        })?;
        response.await.map_err(|_| SyncError::SessionClosed)
    }

    pub async fn participants(&self) -> Result<Vec<Participant>, SyncError> {
        let (reply, response) = oneshot::channel();
        self.send(SessionCommand::Participants(reply))?;
        response.await.map_err(|_| SyncError::SessionClosed)
    }

    pub async fn state(&self) -> Result<ConnectionState, SyncError> {
        let (reply, response) = oneshot::channel();
        self.send(SessionCommand::State(reply))?;
        response.await.map_err(|_| SyncError::SessionClosed)
    }

    /// Run the graceful disconnect and wait for it to finish.
    pub async fn shutdown(&self) -> Result<(), SyncError> {
        let (reply, response) = oneshot::channel();
        self.send(SessionCommand::Shutdown(reply))?;
        response.await.map_err(|_| SyncError::SessionClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    fn send(&self, command: SessionCommand<D>) -> Result<(), SyncError> {
        self.commands.send(command).map_err(|_| SyncError::SessionClosed)
    }
}

/// Spawn the driver task. The session connects with `access_token` first;
/// commands sent meanwhile are processed once that attempt resolves.
pub fn spawn_session<T, D>(
    session: Session<T, D>,
    access_token: String,
) -> (SessionHandle<D>, JoinHandle<()>)
where
    T: HubTransport + 'static,
    D: DocumentEngine + 'static,
{
    let (commands, receiver) = mpsc::unbounded_channel();
    let task = tokio::spawn(run_session(session, access_token, receiver));
    (SessionHandle { commands }, task)
}

async fn run_session<T, D>(
    mut session: Session<T, D>,
    access_token: String,
    mut commands: UnboundedReceiver<SessionCommand<D>>,
) where
    T: HubTransport,
    D: DocumentEngine,
{
    if let Err(error) = session.connect(&access_token).await {
        debug!(error = %error, "initial connect failed, waiting for commands");
    }

    let mut reconnect_at: Option<Instant> = None;
    loop {
        let keep_running = match session.state() {
            ConnectionState::Connected => {
                reconnect_at = None;
                let deadline = session.awareness_deadline();
                tokio::select! {
                    command = commands.recv() => apply_command(&mut session, command).await,
                    input = session.next_input() => {
                        session.handle_input(input).await;
                        true
                    }
                    _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                        if let Err(error) = session.flush_awareness(Instant::now()).await {
                            warn!(error = %error, "presence broadcast failed");
                            session.handle_input(SessionInput::ConnectionLost).await;
                        }
                        true
                    }
                }
            }
            ConnectionState::Reconnecting => {
                let at = *reconnect_at
                    .get_or_insert_with(|| Instant::now() + session.next_reconnect_delay());
                tokio::select! {
                    command = commands.recv() => apply_command(&mut session, command).await,
                    _ = sleep_until(at) => {
                        reconnect_at = None;
                        // Failures are logged by the session.
                        let _ = session.try_reconnect().await;
                        true
                    }
                }
            }
            ConnectionState::Disconnected | ConnectionState::Connecting => {
                let command = commands.recv().await;
                apply_command(&mut session, command).await
            }
        };
        if !keep_running {
            break;
        }
    }
    debug!(
        team_id = %session.identity().team_id,
        room = %session.identity().room_id,
        "session task finished"
    );
}

/// Returns `false` once the session has been torn down.
async fn apply_command<T, D>(session: &mut Session<T, D>, command: Option<SessionCommand<D>>) -> bool
where
    T: HubTransport,
    D: DocumentEngine,
{
    let Some(command) = command else {
        debug!("all session handles dropped, disconnecting");
        session.disconnect().await;
        return false;
    };
    match command {
        SessionCommand::SetCursor(cursor) => session.set_cursor(cursor, Instant::now()),
        SessionCommand::ClearCursor => session.clear_cursor(Instant::now()),
        SessionCommand::Edit(edit) => edit(session.engine().as_ref()),
        SessionCommand::Participants(reply) => {
            let _ = reply.send(session.participants());
        }
        SessionCommand::State(reply) => {
            let _ = reply.send(session.state());
        }
        SessionCommand::Shutdown(reply) => {
            session.disconnect().await;
            let _ = reply.send(());
            return false;
        }
    }
    true
}
