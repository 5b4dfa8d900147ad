// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use serde::Deserialize;
use serde_json::Value;

/// One inbound frame from the rippled WebSocket, dispatched by its `type`
/// field. Stream events the collector does not consume deserialize to
/// `Unknown` and are counted/dropped by the listen loop.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum NodeMessage {
    LedgerClosed(LedgerClosedEvent),
    ServerStatus(ServerStatusEvent),
    ValidationReceived(ValidationEvent),
    Response(RpcResponseFrame),
    #[serde(other)]
    Unknown,
}

/// `ledgerClosed` event from the `ledger` stream.
#[derive(Clone, Debug, Deserialize)]
pub struct LedgerClosedEvent {
    pub ledger_index: u64,
    pub ledger_hash: Option<String>,
    /// Seconds since the Ripple epoch.
    pub ledger_time: Option<u64>,
    /// Drops.
    #[serde(default = "default_fee_base")]
    pub fee_base: u64,
    /// Drops.
    #[serde(default = "default_reserve_base")]
    pub reserve_base: u64,
    /// Drops.
    #[serde(default = "default_reserve_inc")]
    pub reserve_inc: u64,
    #[serde(default)]
    pub txn_count: u64,
    #[serde(default)]
    pub validated_ledgers: Option<String>,
}

fn default_fee_base() -> u64 {
    10
}

fn default_reserve_base() -> u64 {
    10_000_000
}

fn default_reserve_inc() -> u64 {
    2_000_000
}

/// `serverStatus` event from the `server` stream.
#[derive(Clone, Debug, Deserialize)]
pub struct ServerStatusEvent {
    pub server_status: Option<String>,
    #[serde(default)]
    pub load_base: Option<u64>,
    #[serde(default)]
    pub load_factor: Option<u64>,
    #[serde(default)]
    pub base_fee: Option<u64>,
}

/// `validationReceived` event from the `validations` stream. This is the high
/// volume stream (150-300 messages per ledger).
#[derive(Clone, Debug, Deserialize)]
pub struct ValidationEvent {
    /// Ephemeral signing key.
    pub validation_public_key: Option<String>,
    /// Permanent master key.
    pub master_key: Option<String>,
    pub ledger_index: Option<u64>,
    pub ledger_hash: Option<String>,
    #[serde(default)]
    pub flags: Option<u64>,
}

impl ValidationEvent {
    /// True when either key on the message matches `our_key`.
    pub fn is_from(&self, our_key: &str) -> bool {
        self.validation_public_key.as_deref() == Some(our_key)
            || self.master_key.as_deref() == Some(our_key)
    }
}

/// `type: "response"` frame correlating to an earlier request by `id`.
#[derive(Clone, Debug, Deserialize)]
pub struct RpcResponseFrame {
    pub id: Option<u64>,
    pub status: Option<String>,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl RpcResponseFrame {
    pub fn is_success(&self) -> bool {
        self.status.as_deref() == Some("success")
    }

    pub fn error_reason(&self) -> String {
        self.error_message
            .clone()
            .or_else(|| self.error.clone())
            .unwrap_or_else(|| "unknown error".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_closed_parses_with_defaults() {
        let raw = r#"{
            "type": "ledgerClosed",
            "ledger_index": 93847123,
            "ledger_hash": "ABC123",
            "ledger_time": 778825230,
            "txn_count": 25,
            "validated_ledgers": "32570-93847123"
        }"#;
        let msg: NodeMessage = serde_json::from_str(raw).unwrap();
        match msg {
            NodeMessage::LedgerClosed(event) => {
                assert_eq!(event.ledger_index, 93847123);
                assert_eq!(event.ledger_hash.as_deref(), Some("ABC123"));
                assert_eq!(event.fee_base, 10);
                assert_eq!(event.reserve_base, 10_000_000);
                assert_eq!(event.reserve_inc, 2_000_000);
                assert_eq!(event.txn_count, 25);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn validation_matches_either_key() {
        let raw = r#"{
            "type": "validationReceived",
            "validation_public_key": "n9Kb3qF",
            "master_key": "nHUkp7W",
            "ledger_index": 7,
            "ledger_hash": "AA",
            "flags": 1
        }"#;
        let msg: NodeMessage = serde_json::from_str(raw).unwrap();
        let NodeMessage::ValidationReceived(event) = msg else {
            panic!("expected validation");
        };
        assert!(event.is_from("n9Kb3qF"));
        assert!(event.is_from("nHUkp7W"));
        assert!(!event.is_from("nHOther"));
    }

    #[test]
    fn unconsumed_stream_types_map_to_unknown() {
        let raw = r#"{"type": "transaction", "engine_result": "tesSUCCESS"}"#;
        let msg: NodeMessage = serde_json::from_str(raw).unwrap();
        assert!(matches!(msg, NodeMessage::Unknown));
    }

    #[test]
    fn response_frame_carries_id_and_result() {
        let raw = r#"{
            "type": "response",
            "id": 3,
            "status": "success",
            "result": {"info": {"server_state": "proposing"}}
        }"#;
        let msg: NodeMessage = serde_json::from_str(raw).unwrap();
        let NodeMessage::Response(frame) = msg else {
            panic!("expected response");
        };
        assert_eq!(frame.id, Some(3));
        assert!(frame.is_success());
        assert_eq!(frame.result["info"]["server_state"], "proposing");
    }
}
