// Consistent exit codes for the coedit CLI.
//
//   0  = success
//   1  = general error
//   2  = usage/argument error
//   11 = authentication error
//   13 = network error

use std::process;

use coedit_sync::config::ConfigError;
use coedit_sync::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    Error = 1,
    Usage = 2,
    Auth = 11,
    Network = 13,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Map an anyhow error to an exit code by inspecting the error chain.
    pub fn from_error(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if let Some(sync_err) = cause.downcast_ref::<SyncError>() {
                return Self::from_sync_error(sync_err);
            }
            if cause.downcast_ref::<ConfigError>().is_some() {
                return Self::Usage;
            }
            if cause.downcast_ref::<MissingToken>().is_some() {
                return Self::Auth;
            }
        }
        Self::Error
    }

    fn from_sync_error(err: &SyncError) -> Self {
        match err {
            SyncError::InvalidUrl(_) => Self::Usage,
            SyncError::Connect(message) if message.contains("401") || message.contains("403") => {
                Self::Auth
            }
            SyncError::Connect(_) | SyncError::Send { .. } | SyncError::NotConnected(_) => {
                Self::Network
            }
            _ => Self::Error,
        }
    }
}

impl From<ExitCode> for process::ExitCode {
    fn from(code: ExitCode) -> Self {
        process::ExitCode::from(code.code() as u8)
    }
}

/// No bearer token was supplied on the command line or in the environment.
#[derive(Debug)]
pub struct MissingToken;

impl std::fmt::Display for MissingToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("missing access token (pass --token or set COEDIT_ACCESS_TOKEN)")
    }
}

impl std::error::Error for MissingToken {}
