use coedit_common::codec::CodecError;
use thiserror::Error;

use crate::hub::ConnectionState;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid connection state transition: {from:?} -> {to:?}")]
    InvalidTransition { from: ConnectionState, to: ConnectionState },

    #[error("hub connection failed: {0}")]
    Connect(String),

    #[error("hub call {method} failed: {message}")]
    Send { method: &'static str, message: String },

    #[error("not connected (state {0:?})")]
    NotConnected(ConnectionState),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("document engine rejected update: {0}")]
    Apply(String),

    #[error("invalid hub url: {0}")]
    InvalidUrl(String),

    #[error("session task has stopped")]
    SessionClosed,
}

impl SyncError {
    pub(crate) fn send(method: &'static str, error: &anyhow::Error) -> Self {
        Self::Send { method, message: format!("{error:#}") }
    }
}
