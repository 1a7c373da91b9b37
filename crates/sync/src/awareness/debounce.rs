// Trailing debounce for outbound presence.
//
// Coalesces rapid local presence changes within a configurable window
// (default 120ms, range 20–2000ms). Every change restarts the window; only
// the state current at the deadline is sent.

use std::time::Duration;

use tokio::time::Instant;

/// Default debounce window.
pub const DEFAULT_DEBOUNCE_MS: u64 = 120;
/// Minimum allowed debounce window.
const MIN_DEBOUNCE_MS: u64 = 20;
/// Maximum allowed debounce window.
const MAX_DEBOUNCE_MS: u64 = 2_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceConfig {
    pub window: Duration,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self { window: Duration::from_millis(DEFAULT_DEBOUNCE_MS) }
    }
}

impl DebounceConfig {
    /// Window in milliseconds, clamped to [20, 2000].
    pub fn with_millis(ms: u64) -> Self {
        let clamped = ms.clamp(MIN_DEBOUNCE_MS, MAX_DEBOUNCE_MS);
        Self { window: Duration::from_millis(clamped) }
    }
}

#[derive(Debug)]
pub struct Debouncer {
    config: DebounceConfig,
    last_change: Option<Instant>,
}

impl Debouncer {
    pub fn new(config: DebounceConfig) -> Self {
        Self { config, last_change: None }
    }

    pub fn window(&self) -> Duration {
        self.config.window
    }

    /// Record a change at `now`, restarting the window.
    pub fn push_at(&mut self, now: Instant) {
        self.last_change = Some(now);
    }

    /// `true` once if the window has elapsed since the last change.
    pub fn take_due_at(&mut self, now: Instant) -> bool {
        match self.next_deadline() {
            Some(deadline) if now >= deadline => {
                self.last_change = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.last_change.is_some()
    }

    /// Drop the pending change without firing.
    pub fn cancel(&mut self) {
        self.last_change = None;
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.last_change.map(|at| at + self.config.window)
    }
}
