use coedit_common::codec::{decode_base64, decode_json_base64, encode_base64, encode_json_base64};
use coedit_common::presence::{
    AwarenessEntry, AwarenessUpdate, ConnectionId, CursorRange, PresenceState, PresenceUser,
};
use coedit_common::protocol::hub::{HubCall, HubEvent};
use proptest::prelude::*;
use serde_json::json;

proptest! {
    #[test]
    fn base64_round_trips_arbitrary_bytes(bytes in proptest::collection::vec(any::<u8>(), 0..2048)) {
        let encoded = encode_base64(&bytes);
        prop_assert_eq!(decode_base64(&encoded).expect("encoded output must decode"), bytes);
    }
}

#[test]
fn every_call_serializes_with_snake_case_tag() {
    let calls = [
        (HubCall::JoinDocument { team_id: "t".into(), room: "r".into() }, "join_document"),
        (HubCall::LeaveDocument { team_id: "t".into(), room: "r".into() }, "leave_document"),
        (
            HubCall::BroadcastUpdate { team_id: "t".into(), room: "r".into(), payload_b64: "AA==".into() },
            "broadcast_update",
        ),
        (
            HubCall::BroadcastAwareness {
                team_id: "t".into(),
                room: "r".into(),
                payload_b64: "AA==".into(),
            },
            "broadcast_awareness",
        ),
        (
            HubCall::SendMergedSnapshot {
                team_id: "t".into(),
                room: "r".into(),
                payload_b64: "AA==".into(),
            },
            "send_merged_snapshot",
        ),
    ];

    for (call, tag) in calls {
        let value = serde_json::to_value(&call).expect("call should serialize");
        assert_eq!(value["type"], tag);
        assert_eq!(value["team_id"], "t");
        assert_eq!(value["room"], "r");
        let back: HubCall = serde_json::from_value(value).expect("call should deserialize");
        assert_eq!(back, call);
    }
}

#[test]
fn hub_events_parse_from_wire_frames() {
    let frames = [
        (json!({ "type": "receive_update", "payload_b64": "AQI=" }), "ReceiveUpdate"),
        (json!({ "type": "receive_awareness", "payload_b64": "e30=" }), "ReceiveAwareness"),
        (json!({ "type": "receive_doc_state", "payloads_b64": [] }), "ReceiveDocState"),
        (json!({ "type": "user_disconnected", "user_id": "7" }), "UserDisconnected"),
    ];

    for (frame, name) in frames {
        let event: HubEvent = serde_json::from_value(frame).expect("frame should parse");
        assert_eq!(event.name(), name);
    }
}

#[test]
fn awareness_update_survives_base64_framing() {
    let update = AwarenessUpdate {
        entries: vec![
            AwarenessEntry {
                connection_id: ConnectionId::new(),
                clock: 2,
                state: Some(PresenceState {
                    user: PresenceUser {
                        user_id: "7".into(),
                        name: "Grace".into(),
                        color: "#98c379".into(),
                    },
                    cursor: Some(CursorRange { from: 10, to: 10 }),
                }),
            },
            AwarenessEntry { connection_id: ConnectionId::new(), clock: 9, state: None },
        ],
    };

    let payload = encode_json_base64(&update).expect("encode awareness");
    let decoded: AwarenessUpdate = decode_json_base64(&payload).expect("decode awareness");
    assert_eq!(decoded, update);
}
