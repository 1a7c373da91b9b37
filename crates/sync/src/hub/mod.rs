// Hub transport: the duplex connection between one session and the
// collaboration hub.
//
// Transport is abstracted via `HubTransport` so the session logic can run
// against the WebSocket client (`ws`), the in-process loopback hub (`memory`),
// or a recording mock in tests.

pub mod memory;
pub mod ws;

use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;
use std::time::Duration;

use anyhow::Result;
use url::Url;

use coedit_common::protocol::hub::{HubCall, HubEvent};

use crate::error::SyncError;

pub use memory::{MemoryHub, MemoryTransport};
pub use ws::WsHubTransport;

// ── Transport trait ─────────────────────────────────────────────────

pub type HubFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Abstraction over the network transport for testability.
pub trait HubTransport: Send {
    /// Open the connection, authenticating with a bearer token.
    fn start<'a>(&'a mut self, access_token: &'a str) -> HubFuture<'a, ()>;

    /// Invoke a hub method. Resolves once the transport has sent it.
    fn invoke<'a>(&'a mut self, call: HubCall) -> HubFuture<'a, ()>;

    /// Next pushed event. `Ok(None)` means the connection is gone.
    fn next_event<'a>(&'a mut self) -> HubFuture<'a, Option<HubEvent>>;

    /// Close the connection. Safe to call when already closed.
    fn stop<'a>(&'a mut self) -> HubFuture<'a, ()>;
}

// ── Connection state ────────────────────────────────────────────────

/// Current state of a session's hub connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    /// Whether the state machine permits `self -> next`.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Reconnecting)
                | (Reconnecting, Connected)
                | (Connected, Disconnected)
                | (Reconnecting, Disconnected)
        )
    }

    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }
}

// ── Reconnection ────────────────────────────────────────────────────

pub const DEFAULT_RECONNECT_DELAYS_MS: [u64; 4] = [0, 2_000, 5_000, 10_000];

/// Delay schedule for automatic reconnection after a lost connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before attempt N (0-based); the last entry repeats.
    pub delays: Vec<Duration>,
    /// Give up after this many failed attempts. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delays: DEFAULT_RECONNECT_DELAYS_MS.iter().copied().map(Duration::from_millis).collect(),
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    pub fn from_millis(delays_ms: &[u64], max_attempts: Option<u32>) -> Self {
        if delays_ms.is_empty() {
            return Self { max_attempts, ..Self::default() };
        }
        Self { delays: delays_ms.iter().copied().map(Duration::from_millis).collect(), max_attempts }
    }

    /// Delay to wait before the given 0-based attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let index = (attempt as usize).min(self.delays.len().saturating_sub(1));
        self.delays.get(index).copied().unwrap_or(Duration::ZERO)
    }

    /// Whether another attempt is allowed after `failed_attempts` failures.
    pub fn should_retry(&self, failed_attempts: u32) -> bool {
        self.max_attempts.map_or(true, |max| failed_attempts < max)
    }
}

// ── URL policy ──────────────────────────────────────────────────────

/// Hub URLs must use `wss`; `ws` is accepted only for loopback hosts.
pub fn validate_hub_url(value: &str) -> Result<Url, SyncError> {
    let parsed = Url::parse(value)
        .map_err(|error| SyncError::InvalidUrl(format!("`{value}`: {error}")))?;
    match parsed.scheme() {
        "wss" => Ok(parsed),
        "ws" if is_loopback_host(parsed.host_str()) => Ok(parsed),
        _ => Err(SyncError::InvalidUrl(
            "hub_url must use wss (ws is allowed only for localhost testing)".to_string(),
        )),
    }
}

fn is_loopback_host(host: Option<&str>) -> bool {
    let Some(host) = host else {
        return false;
    };
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    let host = host.trim_start_matches('[').trim_end_matches(']');
    host.parse::<IpAddr>().is_ok_and(|addr| addr.is_loopback())
}
