use std::fmt;

/// Where a document or awareness change came from.
///
/// Attached to every change notification and checked structurally by the
/// outbound paths: anything `RemoteApplied` was just received from the hub and
/// must not be sent back out. Never serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeOrigin {
    /// Produced by this client (editor input, local presence mutation).
    Local,
    /// Produced by applying a payload received from the hub.
    RemoteApplied,
}

impl ChangeOrigin {
    pub fn is_remote(self) -> bool {
        matches!(self, Self::RemoteApplied)
    }

    /// Whether a change with this origin may be broadcast to peers.
    pub fn should_broadcast(self) -> bool {
        !self.is_remote()
    }
}

impl fmt::Display for ChangeOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::RemoteApplied => f.write_str("remote_applied"),
        }
    }
}
