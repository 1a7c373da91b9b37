// Seam to the CRDT document engine.
//
// The sync layer treats merging as an opaque, already-correct primitive: it
// applies update blobs, asks for full snapshots, and listens to change
// notifications. Applying a blob twice or out of order must be harmless;
// that guarantee belongs to the engine.

pub mod ydoc;

use anyhow::Result;

use coedit_common::crdt::ChangeOrigin;

use crate::events::EventEmitter;

pub use ydoc::YDoc;

/// One change notification from the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocChange {
    /// Encoded update describing the change.
    pub payload: Vec<u8>,
    pub origin: ChangeOrigin,
}

pub trait DocumentEngine: Send + Sync {
    /// Merge an encoded update. Emits a [`DocChange`] tagged with `origin`
    /// when the merge changed the document.
    fn apply_update(&self, update: &[u8], origin: ChangeOrigin) -> Result<()>;

    /// Encode the whole current state as one update.
    fn encode_snapshot(&self) -> Vec<u8>;

    /// Change notifications for every committed change, local or merged.
    fn changes(&self) -> &EventEmitter<DocChange>;
}
