// Update channel: moves CRDT update blobs between the document engine and
// the hub for one (team, room) pair.

use tracing::debug;

use coedit_common::codec::{decode_base64, encode_base64};
use coedit_common::crdt::ChangeOrigin;
use coedit_common::protocol::hub::HubCall;

use crate::engine::{DocChange, DocumentEngine};
use crate::error::SyncError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateChannel {
    team_id: String,
    room: String,
}

impl UpdateChannel {
    pub fn new(team_id: impl Into<String>, room: impl Into<String>) -> Self {
        Self { team_id: team_id.into(), room: room.into() }
    }

    pub fn team_id(&self) -> &str {
        &self.team_id
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    /// Call to send for a local change, or `None` when the change came from
    /// an update this client just applied.
    pub fn outbound(&self, change: &DocChange) -> Option<HubCall> {
        if !change.origin.should_broadcast() {
            debug!(bytes = change.payload.len(), "suppressing echo of remote-applied update");
            return None;
        }
        Some(HubCall::BroadcastUpdate {
            team_id: self.team_id.clone(),
            room: self.room.clone(),
            payload_b64: encode_base64(&change.payload),
        })
    }

    /// Decode and apply one pushed update.
    pub fn apply_remote<D>(&self, engine: &D, payload_b64: &str) -> Result<(), SyncError>
    where
        D: DocumentEngine + ?Sized,
    {
        let update = decode_base64(payload_b64)?;
        engine
            .apply_update(&update, ChangeOrigin::RemoteApplied)
            .map_err(|error| SyncError::Apply(format!("{error:#}")))
    }

    /// Apply a history replay in order. Stops at the first blob that fails
    /// to decode or apply; earlier blobs stay applied.
    pub fn apply_replay<D>(&self, engine: &D, payloads_b64: &[String]) -> Result<usize, SyncError>
    where
        D: DocumentEngine + ?Sized,
    {
        for payload in payloads_b64 {
            self.apply_remote(engine, payload)?;
        }
        Ok(payloads_b64.len())
    }

    pub fn join_call(&self) -> HubCall {
        HubCall::JoinDocument { team_id: self.team_id.clone(), room: self.room.clone() }
    }

    pub fn leave_call(&self) -> HubCall {
        HubCall::LeaveDocument { team_id: self.team_id.clone(), room: self.room.clone() }
    }

    pub fn awareness_call(&self, payload_b64: String) -> HubCall {
        HubCall::BroadcastAwareness {
            team_id: self.team_id.clone(),
            room: self.room.clone(),
            payload_b64,
        }
    }

    pub fn snapshot_call(&self, snapshot: &[u8]) -> HubCall {
        HubCall::SendMergedSnapshot {
            team_id: self.team_id.clone(),
            room: self.room.clone(),
            payload_b64: encode_base64(snapshot),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::YDoc;

    fn channel() -> UpdateChannel {
        UpdateChannel::new("t1", "r1")
    }

    #[test]
    fn local_change_becomes_broadcast_update() {
        let change = DocChange { payload: vec![1, 2, 3], origin: ChangeOrigin::Local };
        assert_eq!(
            channel().outbound(&change),
            Some(HubCall::BroadcastUpdate {
                team_id: "t1".into(),
                room: "r1".into(),
                payload_b64: "AQID".into(),
            })
        );
    }

    #[test]
    fn remote_applied_change_is_never_sent() {
        let change = DocChange { payload: vec![1, 2, 3], origin: ChangeOrigin::RemoteApplied };
        assert_eq!(channel().outbound(&change), None);
    }

    #[test]
    fn apply_remote_decodes_and_merges() {
        let source = YDoc::with_client_id(1);
        let update = source.insert_text(0, "hi");
        let target = YDoc::with_client_id(2);

        channel().apply_remote(&target, &encode_base64(&update)).expect("apply");
        assert_eq!(target.text(), "hi");
    }

    #[test]
    fn apply_remote_rejects_bad_base64() {
        let target = YDoc::new();
        let error = channel().apply_remote(&target, "%%%").expect_err("bad base64");
        assert!(matches!(error, SyncError::Codec(_)));
    }

    #[test]
    fn replay_applies_in_order_and_counts() {
        let source = YDoc::with_client_id(1);
        let payloads = vec![
            encode_base64(&source.insert_text(0, "a")),
            encode_base64(&source.insert_text(1, "b")),
            encode_base64(&source.insert_text(2, "c")),
        ];
        let target = YDoc::with_client_id(2);

        assert_eq!(channel().apply_replay(&target, &payloads).expect("replay"), 3);
        assert_eq!(target.text(), "abc");
    }

    #[test]
    fn replay_stops_at_first_bad_blob() {
        let source = YDoc::with_client_id(1);
        let payloads = vec![
            encode_base64(&source.insert_text(0, "a")),
            "!!".to_string(),
            encode_base64(&source.insert_text(1, "b")),
        ];
        let target = YDoc::with_client_id(2);

        assert!(channel().apply_replay(&target, &payloads).is_err());
        assert_eq!(target.text(), "a");
    }
}
