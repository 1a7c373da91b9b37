// `coedit join` — join a room and follow its document and participants
// until Ctrl-C, then leave gracefully.

use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use coedit_sync::config::SyncConfig;
use coedit_sync::hub::{validate_hub_url, WsHubTransport};
use coedit_sync::{
    spawn_session, ConnectionState, DocChange, DocumentEngine, Participant, Session,
    SessionIdentity, SyncError, YDoc,
};

use crate::exit_code::MissingToken;
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct JoinArgs {
    /// Team that owns the room.
    #[arg(long)]
    team: String,
    /// Room (document) to join.
    #[arg(long)]
    room: String,
    /// Bearer token. Defaults to COEDIT_ACCESS_TOKEN.
    #[arg(long)]
    token: Option<String>,
    /// Hub endpoint, overriding the config file and COEDIT_HUB_URL.
    #[arg(long)]
    hub_url: Option<String>,
    /// Display name shown to other participants.
    #[arg(long)]
    name: Option<String>,
    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

/// Everything `join` needs after merging flags over config.
#[derive(Debug, Clone, PartialEq, Eq)]
struct JoinPlan {
    identity: SessionIdentity,
    hub_url: String,
    token: String,
}

impl JoinPlan {
    fn resolve(args: &JoinArgs, config: &SyncConfig) -> anyhow::Result<Self> {
        let hub_url = args.hub_url.clone().unwrap_or_else(|| config.hub_url.clone());
        validate_hub_url(&hub_url)?;

        let token = args
            .token
            .clone()
            .or_else(|| config.access_token.clone())
            .filter(|token| !token.is_empty())
            .ok_or(MissingToken)?;

        let user_id =
            config.user_id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let user_name = args
            .name
            .clone()
            .or_else(|| config.display_name.clone())
            .unwrap_or_else(|| user_id.clone());

        Ok(Self {
            identity: SessionIdentity {
                team_id: args.team.clone(),
                room_id: args.room.clone(),
                user_id,
                user_name,
            },
            hub_url,
            token,
        })
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
struct ParticipantView {
    user_id: String,
    display_name: String,
    color: String,
    cursor: Option<[u32; 2]>,
    local: bool,
}

impl From<&Participant> for ParticipantView {
    fn from(participant: &Participant) -> Self {
        Self {
            user_id: participant.user_id.clone(),
            display_name: participant.display_name.clone(),
            color: participant.color.clone(),
            cursor: participant.cursor.map(|cursor| [cursor.from, cursor.to]),
            local: participant.is_local,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum JoinOutput {
    Participants { participants: Vec<ParticipantView> },
    Text { text: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Refresh {
    Participants,
    Text,
}

pub fn run(args: JoinArgs) -> anyhow::Result<()> {
    let config = SyncConfig::load();
    let plan = JoinPlan::resolve(&args, &config)?;
    let format = OutputFormat::detect(args.json);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(follow(plan, &config, format))
}

async fn follow(plan: JoinPlan, config: &SyncConfig, format: OutputFormat) -> anyhow::Result<()> {
    let doc = Arc::new(YDoc::new());
    let colors = config.color_pool();
    let team_id = plan.identity.team_id.clone();
    let room = plan.identity.room_id.clone();
    let session = Session::new(
        plan.identity,
        WsHubTransport::new(plan.hub_url.clone()),
        Arc::clone(&doc),
        &colors,
        config.session_options(),
    );

    let (notify, mut refreshes) = mpsc::unbounded_channel();
    let presence = notify.clone();
    session.awareness().changes().subscribe(move |_| {
        let _ = presence.send(Refresh::Participants);
    });
    doc.changes().subscribe(move |change: &DocChange| {
        if change.origin.is_remote() {
            let _ = notify.send(Refresh::Text);
        }
    });

    let (handle, task) = spawn_session(session, plan.token);
    let state = handle.state().await?;
    if state != ConnectionState::Connected {
        handle.shutdown().await?;
        return Err(SyncError::NotConnected(state))
            .with_context(|| format!("could not join {team_id}/{room} at {}", plan.hub_url));
    }
    info!(%team_id, %room, "joined room, press Ctrl-C to leave");

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl-C")?;
                break;
            }
            Some(first) = refreshes.recv() => {
                let mut pending = vec![first];
                while let Ok(next) = refreshes.try_recv() {
                    pending.push(next);
                }
                if pending.contains(&Refresh::Text) {
                    let text = handle.with_engine(|doc: &YDoc| doc.text()).await?;
                    emit(format, &JoinOutput::Text { text })?;
                }
                if pending.contains(&Refresh::Participants) {
                    let participants = handle.participants().await?;
                    let participants = participants.iter().map(ParticipantView::from).collect();
                    emit(format, &JoinOutput::Participants { participants })?;
                }
            }
        }
    }

    info!(%team_id, %room, "leaving room");
    if let Err(error) = handle.shutdown().await {
        warn!(error = %error, "session already stopped");
    }
    task.await.context("session task failed")?;
    Ok(())
}

fn emit(format: OutputFormat, event: &JoinOutput) -> std::io::Result<()> {
    output::print_output(format, event, format_human)
}

fn format_human(event: &JoinOutput) -> String {
    match event {
        JoinOutput::Text { text } => format!("── document ──\n{text}"),
        JoinOutput::Participants { participants } => {
            let mut lines = vec![format!("── participants ({}) ──", participants.len())];
            for participant in participants {
                let cursor = match participant.cursor {
                    Some([from, to]) if from == to => format!(" @{from}"),
                    Some([from, to]) => format!(" @{from}..{to}"),
                    None => String::new(),
                };
                let marker = if participant.local { " (you)" } else { "" };
                lines.push(format!(
                    "  {} [{}] {}{}{}",
                    participant.display_name,
                    participant.user_id,
                    participant.color,
                    cursor,
                    marker
                ));
            }
            lines.join("\n")
        }
    }
}
