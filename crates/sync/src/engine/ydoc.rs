// Y.Doc wrapper using yrs (y-crdt Rust bindings).
// Implements `DocumentEngine` for the editor's shared text.
//
// Change notifications come from one `observe_update_v1` observer, so every
// committed transaction is reported, whichever API made it. Merges of peer
// updates run in transactions tagged with `REMOTE_ORIGIN`.

use anyhow::{Context, Result};
use tracing::warn;
use yrs::updates::decoder::Decode;
use yrs::{Doc, GetString, ReadTxn, StateVector, Subscription, Text, Transact, Update};

use coedit_common::crdt::ChangeOrigin;

use super::{DocChange, DocumentEngine};
use crate::events::EventEmitter;

/// Name of the shared text holding the document body.
pub const CONTENT_TEXT: &str = "content";

/// Transaction origin for updates merged from the hub.
pub const REMOTE_ORIGIN: &str = "coedit-remote";

/// Yjs document plus the change signal the sync layer listens to.
pub struct YDoc {
    doc: Doc,
    changes: EventEmitter<DocChange>,
    _updates: Option<Subscription>,
}

impl YDoc {
    /// Create a new empty document.
    pub fn new() -> Self {
        Self::wrap(Doc::new())
    }

    /// Create a document with a specific client ID (for deterministic testing).
    pub fn with_client_id(client_id: u64) -> Self {
        let options = yrs::Options { client_id, ..Default::default() };
        Self::wrap(Doc::with_options(options))
    }

    /// Load a document from a binary state (full snapshot).
    pub fn from_state(data: &[u8]) -> Result<Self> {
        let doc = Self::new();
        doc.merge(data, ChangeOrigin::RemoteApplied)?;
        Ok(doc)
    }

    fn wrap(doc: Doc) -> Self {
        let changes = EventEmitter::new();
        let sink = changes.clone();
        let updates = doc.observe_update_v1(move |txn, event| {
            let origin = match txn.origin() {
                Some(origin) if origin.as_ref() == REMOTE_ORIGIN.as_bytes() => {
                    ChangeOrigin::RemoteApplied
                }
                _ => ChangeOrigin::Local,
            };
            sink.emit(&DocChange { payload: event.update.clone(), origin });
        });
        let updates = match updates {
            Ok(subscription) => Some(subscription),
            Err(error) => {
                warn!(error = %error, "failed to observe document updates");
                None
            }
        };
        Self { doc, changes, _updates: updates }
    }

    /// Current body text.
    pub fn text(&self) -> String {
        self.text_of(CONTENT_TEXT)
    }

    /// Read the string content of a named text type.
    pub fn text_of(&self, name: &str) -> String {
        let text = self.doc.get_or_insert_text(name);
        text.get_string(&self.doc.transact())
    }

    /// Local edit: insert into the body. Returns the encoded update.
    pub fn insert_text(&self, index: u32, content: &str) -> Vec<u8> {
        let text = self.doc.get_or_insert_text(CONTENT_TEXT);
        let mut txn = self.doc.transact_mut();
        text.insert(&mut txn, index, content);
        txn.encode_update_v1()
    }

    /// Local edit: remove `len` characters of the body starting at `index`.
    pub fn remove_text(&self, index: u32, len: u32) -> Vec<u8> {
        let text = self.doc.get_or_insert_text(CONTENT_TEXT);
        let mut txn = self.doc.transact_mut();
        text.remove_range(&mut txn, index, len);
        txn.encode_update_v1()
    }

    /// Get the underlying Doc reference (for advanced operations). Edits made
    /// through it are reported on `changes()` like any other.
    pub fn inner(&self) -> &Doc {
        &self.doc
    }

    fn merge(&self, data: &[u8], origin: ChangeOrigin) -> Result<()> {
        let update = Update::decode_v1(data).context("failed to decode Yjs update")?;
        let mut txn = match origin {
            ChangeOrigin::RemoteApplied => self.doc.transact_mut_with(REMOTE_ORIGIN),
            ChangeOrigin::Local => self.doc.transact_mut(),
        };
        txn.apply_update(update).context("failed to apply Yjs update")?;
        Ok(())
    }
}

impl Default for YDoc {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentEngine for YDoc {
    fn apply_update(&self, update: &[u8], origin: ChangeOrigin) -> Result<()> {
        self.merge(update, origin)
    }

    fn encode_snapshot(&self) -> Vec<u8> {
        self.doc.transact().encode_state_as_update_v1(&StateVector::default())
    }

    fn changes(&self) -> &EventEmitter<DocChange> {
        &self.changes
    }
}
