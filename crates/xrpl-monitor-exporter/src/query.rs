// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Minimal vector-query surface for the dashboard.
//!
//! This is substring matching on metric names, not a PromQL parser: the
//! dashboard only ever asks for bare series, optionally with one label
//! filter on `state` or `mode`. Anything unrecognized gets the empty vector
//! envelope, which the dashboard renders as "no data".

use crate::crawl::upgrade_status;
use crate::snapshot::ExporterSnapshot;
use xrpl_monitor_types::rpc::{QueryResponse, QueryResult};
use xrpl_monitor_types::{NodeMode, ValidatorState};

/// Answers one query against a snapshot. Match order is longest-name-first
/// where one name is a prefix of another.
pub fn answer_query(query: &str, snap: &ExporterSnapshot, instance: &str) -> QueryResponse {
    let ts = snap.timestamp;
    let peers_ts = snap.peers.timestamp;

    let single = |name: &str, timestamp: f64, value: String| {
        QueryResponse::vector(vec![QueryResult::instant(
            name,
            &[("instance", instance)],
            timestamp,
            value,
        )])
    };

    if query.contains("xrpl_state_realtime_value") {
        return single(
            "xrpl_state_realtime_value",
            ts,
            snap.state.value().to_string(),
        );
    }
    if query.contains("xrpl_state_realtime") {
        let filter = label_filter(query, "state");
        let result = ValidatorState::ALL
            .iter()
            .filter(|state| filter.as_deref().map_or(true, |f| state.as_str() == f))
            .map(|state| {
                QueryResult::instant(
                    "xrpl_state_realtime",
                    &[("instance", instance), ("state", state.as_str())],
                    ts,
                    i32::from(state.as_str() == snap.state_name),
                )
            })
            .collect();
        return QueryResponse::vector(result);
    }
    if query.contains("xrpl_peer_count_realtime") {
        return single("xrpl_peer_count_realtime", peers_ts, snap.peers.peer_count.to_string());
    }
    if query.contains("xrpl_peers_inbound_realtime") {
        return single("xrpl_peers_inbound_realtime", peers_ts, snap.peers.inbound.to_string());
    }
    if query.contains("xrpl_peers_outbound_realtime") {
        return single(
            "xrpl_peers_outbound_realtime",
            peers_ts,
            snap.peers.outbound.to_string(),
        );
    }
    if query.contains("xrpl_peers_insane_realtime") {
        return single("xrpl_peers_insane_realtime", peers_ts, snap.peers.insane.to_string());
    }
    if query.contains("xrpl_peer_latency_p90_realtime") {
        return single(
            "xrpl_peer_latency_p90_realtime",
            peers_ts,
            snap.peers.latency_p90_ms.to_string(),
        );
    }
    if query.contains("xrpl_build_version_realtime") {
        if snap.build_version.is_empty() {
            return QueryResponse::empty_vector();
        }
        return QueryResponse::vector(vec![QueryResult::instant(
            "xrpl_build_version_realtime",
            &[("instance", instance), ("version", &snap.build_version)],
            ts,
            1,
        )]);
    }
    if query.contains("xrpl_pubkey_realtime") {
        if snap.pubkey_validator.is_empty() {
            return QueryResponse::empty_vector();
        }
        return QueryResponse::vector(vec![QueryResult::instant(
            "xrpl_pubkey_realtime",
            &[("instance", instance), ("pubkey", &snap.pubkey_validator)],
            ts,
            1,
        )]);
    }
    if query.contains("xrpl_node_mode_realtime") {
        let filter = label_filter(query, "mode");
        let result = NodeMode::ALL
            .iter()
            .filter(|mode| filter.as_deref().map_or(true, |f| mode.as_str() == f))
            .map(|mode| {
                QueryResult::instant(
                    "xrpl_node_mode_realtime",
                    &[("instance", instance), ("mode", mode.as_str())],
                    ts,
                    i32::from(*mode == snap.node_mode),
                )
            })
            .collect();
        return QueryResponse::vector(result);
    }
    if query.contains("xrpl_ledger_sequence_realtime") {
        return single("xrpl_ledger_sequence_realtime", ts, snap.ledger_sequence.to_string());
    }
    if query.contains("xrpl_ledger_age_realtime") {
        return single("xrpl_ledger_age_realtime", ts, snap.ledger_age.to_string());
    }
    if query.contains("xrpl_base_fee_xrp_realtime") {
        return single("xrpl_base_fee_xrp_realtime", ts, snap.base_fee_xrp.to_string());
    }
    if query.contains("xrpl_reserve_base_xrp_realtime") {
        return single(
            "xrpl_reserve_base_xrp_realtime",
            ts,
            snap.reserve_base_xrp.to_string(),
        );
    }
    if query.contains("xrpl_reserve_inc_xrp_realtime") {
        return single("xrpl_reserve_inc_xrp_realtime", ts, snap.reserve_inc_xrp.to_string());
    }
    if query.contains("xrpl_load_factor_realtime") {
        return single("xrpl_load_factor_realtime", ts, snap.load_factor.to_string());
    }
    if query.contains("xrpl_validation_quorum_realtime") {
        return single(
            "xrpl_validation_quorum_realtime",
            ts,
            snap.validation_quorum.to_string(),
        );
    }
    if query.contains("xrpl_proposers_realtime") {
        return single("xrpl_proposers_realtime", ts, snap.proposers.to_string());
    }
    if query.contains("xrpl_unl_expiry_days_realtime") {
        return single("xrpl_unl_expiry_days_realtime", ts, snap.unl_expiry_days.to_string());
    }
    if query.contains("xrpl_amendment_blocked_realtime") {
        return single(
            "xrpl_amendment_blocked_realtime",
            ts,
            i32::from(snap.amendment_blocked).to_string(),
        );
    }
    if query.contains("xrpl_crawl_peer_count") {
        return single("xrpl_crawl_peer_count", ts, snap.crawl.peer_count.to_string());
    }
    if query.contains("xrpl_peers_higher_version_pct") {
        return single(
            "xrpl_peers_higher_version_pct",
            ts,
            snap.crawl.higher_version_pct.to_string(),
        );
    }
    if query.contains("xrpl_peers_higher_version") {
        return single(
            "xrpl_peers_higher_version",
            ts,
            snap.crawl.higher_version.to_string(),
        );
    }
    if query.contains("xrpl_upgrade_recommended") {
        return single(
            "xrpl_upgrade_recommended",
            ts,
            i32::from(snap.crawl.upgrade_recommended).to_string(),
        );
    }
    if query.contains("xrpl_upgrade_status") {
        return single(
            "xrpl_upgrade_status",
            ts,
            upgrade_status(&snap.crawl, snap.amendment_blocked).to_string(),
        );
    }

    QueryResponse::empty_vector()
}

/// Extracts `key="value"` (quotes optional) from a query string. Only the
/// `state` and `mode` filters are recognized by callers.
fn label_filter(query: &str, key: &str) -> Option<String> {
    let start = query.find(&format!("{key}=")).or_else(|| {
        // Tolerate whitespace around the equals sign.
        query.find(&format!("{key} ="))
    })?;
    let rest = &query[start..];
    let eq = rest.find('=')?;
    let value = rest[eq + 1..]
        .trim_start()
        .trim_start_matches(['"', '\''])
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect::<String>();
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}
