// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Exporter-side pollers: server state every couple of seconds, peers a bit
//! slower. These are independent from the collector's TSDB pollers so the
//! dashboard surface stays live even when the TSDB path is backed up.

use crate::snapshot::{PeerStats, SharedSnapshot};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use xrpl_monitor_types::metric::unix_seconds_now;
use xrpl_monitor_types::rpc::{JsonRpcEnvelope, JsonRpcRequest};
use xrpl_monitor_types::{NodeMode, ValidatorState};

const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything the state poller extracts from one `server_info` response.
/// Defaults describe an unresponsive node.
#[derive(Clone, Debug)]
pub struct ServerInfoFetch {
    pub state_name: String,
    pub state: ValidatorState,
    pub build_version: String,
    pub pubkey_validator: String,
    pub ledger_sequence: u64,
    pub ledger_age: f64,
    pub base_fee_xrp: f64,
    pub reserve_base_xrp: f64,
    pub reserve_inc_xrp: f64,
    pub load_factor: f64,
    pub validation_quorum: f64,
    pub unl_expiry_days: i64,
    pub amendment_blocked: bool,
}

impl Default for ServerInfoFetch {
    fn default() -> Self {
        Self {
            state_name: "down".to_string(),
            state: ValidatorState::Down,
            build_version: String::new(),
            pubkey_validator: String::new(),
            ledger_sequence: 0,
            ledger_age: 0.0,
            base_fee_xrp: 0.0,
            reserve_base_xrp: 0.0,
            reserve_inc_xrp: 0.0,
            load_factor: 0.0,
            validation_quorum: 0.0,
            unl_expiry_days: 0,
            amendment_blocked: false,
        }
    }
}

/// Parses a `server_info` payload. A null or missing `server_state` means
/// rippled is still starting and reports as down.
pub fn parse_server_info(info: &Value, now: DateTime<Utc>) -> ServerInfoFetch {
    let Some(state_name) = info["server_state"].as_str().filter(|s| *s != "null") else {
        return ServerInfoFetch::default();
    };
    let state_name = state_name.to_ascii_lowercase();
    let validated = &info["validated_ledger"];

    ServerInfoFetch {
        state: ValidatorState::from_status(&state_name),
        state_name,
        build_version: info["build_version"].as_str().unwrap_or("").to_string(),
        pubkey_validator: info["pubkey_validator"].as_str().unwrap_or("").to_string(),
        ledger_sequence: validated["seq"].as_u64().unwrap_or(0),
        ledger_age: validated["age"].as_f64().unwrap_or(0.0),
        base_fee_xrp: validated["base_fee_xrp"].as_f64().unwrap_or(0.0),
        reserve_base_xrp: validated["reserve_base_xrp"].as_f64().unwrap_or(0.0),
        reserve_inc_xrp: validated["reserve_inc_xrp"].as_f64().unwrap_or(0.0),
        load_factor: info["load_factor"].as_f64().unwrap_or(0.0),
        validation_quorum: info["validation_quorum"].as_f64().unwrap_or(0.0),
        unl_expiry_days: info["validator_list"]["expiration"]
            .as_str()
            .and_then(|raw| parse_unl_expiry(raw, now))
            .unwrap_or(0),
        amendment_blocked: info["amendment_blocked"].as_bool().unwrap_or(false),
    }
}

/// Parses the validator-list expiration, `2026-Mar-11 15:55:38.000000000
/// UTC`, into whole days from `now`, clamped at zero.
pub fn parse_unl_expiry(raw: &str, now: DateTime<Utc>) -> Option<i64> {
    let clean = raw.split('.').next()?.trim();
    let parsed = NaiveDateTime::parse_from_str(clean, "%Y-%b-%d %H:%M:%S").ok()?;
    let expiry = Utc.from_utc_datetime(&parsed);
    Some((expiry - now).num_days().max(0))
}

/// Peer aggregation for the exporter: outbound peers simply lack the
/// `inbound` flag, and any non-`sane` sanity value counts as insane.
pub fn parse_peers(peers: &[Value]) -> PeerStats {
    let peer_count = peers.len() as u64;
    let inbound = peers
        .iter()
        .filter(|p| p["inbound"].as_bool() == Some(true))
        .count() as u64;
    let insane = peers
        .iter()
        .filter(|p| p["sanity"].as_str().is_some_and(|s| s != "sane"))
        .count() as u64;
    let mut latencies: Vec<f64> = peers.iter().filter_map(|p| p["latency"].as_f64()).collect();
    latencies.sort_by(|a, b| a.partial_cmp(b).expect("latencies are finite"));
    let latency_p90_ms = if latencies.is_empty() {
        0.0
    } else {
        let index = (latencies.len() as f64 * 0.9) as usize;
        latencies[index.min(latencies.len() - 1)]
    };

    PeerStats {
        peer_count,
        inbound,
        outbound: peer_count - inbound,
        insane,
        latency_p90_ms,
        timestamp: unix_seconds_now(),
    }
}

pub struct ExporterPollers {
    http_url: String,
    client: reqwest::Client,
    poll_interval: Duration,
    peers_poll_interval: Duration,
    shared: Arc<SharedSnapshot>,
}

impl ExporterPollers {
    pub fn new(
        http_url: &str,
        poll_interval: Duration,
        peers_poll_interval: Duration,
        shared: Arc<SharedSnapshot>,
    ) -> Self {
        Self {
            http_url: http_url.to_string(),
            client: reqwest::Client::builder()
                .timeout(FETCH_TIMEOUT)
                .build()
                .expect("building the exporter http client cannot fail"),
            poll_interval,
            peers_poll_interval,
            shared,
        }
    }

    pub fn spawn(self, shutdown: CancellationToken) -> Vec<tokio::task::JoinHandle<()>> {
        let state = StateLoop {
            http_url: self.http_url.clone(),
            client: self.client.clone(),
            interval: self.poll_interval,
            shared: self.shared.clone(),
        };
        let peers = PeersLoop {
            http_url: self.http_url,
            client: self.client,
            interval: self.peers_poll_interval,
            shared: self.shared,
        };
        vec![
            tokio::spawn(state.run(shutdown.clone())),
            tokio::spawn(peers.run(shutdown)),
        ]
    }
}

struct StateLoop {
    http_url: String,
    client: reqwest::Client,
    interval: Duration,
    shared: Arc<SharedSnapshot>,
}

impl StateLoop {
    async fn run(self, shutdown: CancellationToken) {
        info!(url = %self.http_url, interval = ?self.interval, "exporter state polling started");
        let mut last_state: Option<String> = None;
        loop {
            let (info, proposers) = tokio::join!(
                rpc_call(&self.client, &self.http_url, "server_info"),
                rpc_call(&self.client, &self.http_url, "consensus_info"),
            );
            let fetch = info
                .map(|body| parse_server_info(&body["info"], Utc::now()))
                .unwrap_or_default();
            let proposers = proposers
                .and_then(|body| body["info"]["proposers"].as_u64())
                .unwrap_or(0);

            if last_state.as_deref() != Some(fetch.state_name.as_str()) {
                match &last_state {
                    Some(previous) => info!(
                        from = %previous,
                        to = %fetch.state_name,
                        value = fetch.state.value(),
                        "exporter observed state change"
                    ),
                    None => info!(state = %fetch.state_name, value = fetch.state.value(), "initial state"),
                }
                last_state = Some(fetch.state_name.clone());
            }

            let node_mode = NodeMode::from_pubkey_validator(&fetch.pubkey_validator);
            self.shared.update(|snap| {
                snap.state = fetch.state;
                snap.state_name = fetch.state_name.clone();
                snap.build_version = fetch.build_version.clone();
                snap.pubkey_validator = fetch.pubkey_validator.clone();
                snap.node_mode = node_mode;
                snap.ledger_sequence = fetch.ledger_sequence;
                snap.ledger_age = fetch.ledger_age;
                snap.base_fee_xrp = fetch.base_fee_xrp;
                snap.reserve_base_xrp = fetch.reserve_base_xrp;
                snap.reserve_inc_xrp = fetch.reserve_inc_xrp;
                snap.load_factor = fetch.load_factor;
                snap.validation_quorum = fetch.validation_quorum;
                snap.unl_expiry_days = fetch.unl_expiry_days;
                snap.amendment_blocked = fetch.amendment_blocked;
                snap.proposers = proposers;
                snap.timestamp = unix_seconds_now();
            });

            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("exporter state polling stopped");
                    return;
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}

struct PeersLoop {
    http_url: String,
    client: reqwest::Client,
    interval: Duration,
    shared: Arc<SharedSnapshot>,
}

impl PeersLoop {
    async fn run(self, shutdown: CancellationToken) {
        info!(url = %self.http_url, interval = ?self.interval, "exporter peers polling started");
        let mut last_count: Option<u64> = None;
        loop {
            // A failed fetch keeps the previous peer numbers; peers data
            // going briefly stale beats zeroing the dashboard.
            if let Some(body) = rpc_call(&self.client, &self.http_url, "peers").await {
                if let Some(peers) = body["peers"].as_array() {
                    let stats = parse_peers(peers);
                    if last_count != Some(stats.peer_count) {
                        info!(
                            count = stats.peer_count,
                            inbound = stats.inbound,
                            outbound = stats.outbound,
                            "peer count changed"
                        );
                        last_count = Some(stats.peer_count);
                    }
                    self.shared.update(|snap| snap.peers = stats);
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("exporter peers polling stopped");
                    return;
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}

/// One JSON-RPC call returning the `result` object on success, `None` on any
/// transport or envelope failure.
async fn rpc_call(client: &reqwest::Client, url: &str, method: &str) -> Option<Value> {
    let response = match client.post(url).json(&JsonRpcRequest::new(method)).send().await {
        Ok(response) => response,
        Err(err) => {
            debug!(method, "rippled not reachable: {err}");
            return None;
        }
    };
    if !response.status().is_success() {
        warn!(method, status = %response.status(), "rpc http error");
        return None;
    }
    match response.json::<JsonRpcEnvelope>().await {
        Ok(envelope) => Some(envelope.result),
        Err(err) => {
            warn!(method, "rpc decode failed: {err}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn server_info_parse_extracts_everything() {
        let info = json!({
            "server_state": "Proposing",
            "build_version": "2.2.0",
            "pubkey_validator": "nHUkp7W",
            "load_factor": 256,
            "validation_quorum": 28,
            "amendment_blocked": true,
            "validated_ledger": {
                "seq": 93_847_123,
                "age": 2,
                "base_fee_xrp": 0.00001,
                "reserve_base_xrp": 10,
                "reserve_inc_xrp": 2
            },
            "validator_list": {
                "expiration": "2026-Mar-11 15:55:38.000000000 UTC"
            }
        });
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 15, 55, 38).unwrap();
        let fetch = parse_server_info(&info, now);
        assert_eq!(fetch.state, ValidatorState::Proposing);
        assert_eq!(fetch.state_name, "proposing");
        assert_eq!(fetch.ledger_sequence, 93_847_123);
        assert_eq!(fetch.base_fee_xrp, 0.00001);
        assert_eq!(fetch.unl_expiry_days, 10);
        assert!(fetch.amendment_blocked);
    }

    #[test]
    fn null_server_state_reports_down() {
        let now = Utc::now();
        let fetch = parse_server_info(&json!({"server_state": "null"}), now);
        assert_eq!(fetch.state, ValidatorState::Down);
        assert_eq!(fetch.state_name, "down");
        let fetch = parse_server_info(&json!({}), now);
        assert_eq!(fetch.state, ValidatorState::Down);
    }

    #[test]
    fn unl_expiry_clamps_at_zero() {
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
        assert_eq!(parse_unl_expiry("2026-Mar-11 15:55:38.000000000 UTC", now), Some(0));
        assert_eq!(parse_unl_expiry("garbage", now), None);
    }

    #[test]
    fn peers_parse_counts_missing_inbound_as_outbound() {
        let peers = vec![
            json!({"inbound": true, "sanity": "sane", "latency": 30}),
            json!({"latency": 50}),
            json!({"sanity": "insane", "latency": 700}),
            json!({"sanity": "unknown"}),
        ];
        let stats = parse_peers(&peers);
        assert_eq!(stats.peer_count, 4);
        assert_eq!(stats.inbound, 1);
        assert_eq!(stats.outbound, 3);
        // Both non-"sane" sanity values count.
        assert_eq!(stats.insane, 2);
        // floor(3 * 0.9) = 2 -> 700ms among the three latencies present.
        assert_eq!(stats.latency_p90_ms, 700.0);
    }

    #[test]
    fn empty_peer_list_is_all_zeroes() {
        let stats = parse_peers(&[]);
        assert_eq!(stats.peer_count, 0);
        assert_eq!(stats.latency_p90_ms, 0.0);
    }
}
