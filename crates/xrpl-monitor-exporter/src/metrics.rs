// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Prometheus registry behind `GET /metrics`. The `_realtime` family mirrors
//! the snapshot refreshed by the exporter pollers, bypassing TSDB ingestion
//! lag for the latency-sensitive dashboard panels.

use crate::crawl::upgrade_status;
use crate::snapshot::ExporterSnapshot;
use prometheus::{
    register_gauge_with_registry, register_int_gauge_vec_with_registry,
    register_int_gauge_with_registry, Encoder, Gauge, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use xrpl_monitor_types::{NodeMode, ValidatorState};

pub struct ExporterMetrics {
    registry: Registry,

    state_value: IntGauge,
    state: IntGaugeVec,
    build_version: IntGaugeVec,
    pubkey: IntGaugeVec,
    node_mode: IntGaugeVec,

    ledger_sequence: IntGauge,
    ledger_age: Gauge,
    base_fee_xrp: Gauge,
    reserve_base_xrp: Gauge,
    reserve_inc_xrp: Gauge,
    load_factor: Gauge,
    validation_quorum: Gauge,
    proposers: IntGauge,
    unl_expiry_days: IntGauge,
    amendment_blocked: IntGauge,

    peer_count: IntGauge,
    peers_inbound: IntGauge,
    peers_outbound: IntGauge,
    peers_insane: IntGauge,
    peer_latency_p90: Gauge,

    crawl_peer_count: IntGauge,
    peers_higher_version: IntGauge,
    peers_higher_version_pct: Gauge,
    upgrade_recommended: IntGauge,
    upgrade_status_gauge: IntGauge,
}

impl ExporterMetrics {
    pub fn new(instance: &str) -> Self {
        let registry = Registry::new();
        let opts = |name: &str, help: &str| {
            Opts::new(name, help).const_label("instance", instance)
        };
        Self {
            state_value: register_int_gauge_with_registry!(
                opts(
                    "xrpl_state_realtime_value",
                    "Real-time validator state as numeric value (0-7)"
                ),
                registry
            )
            .unwrap(),
            state: register_int_gauge_vec_with_registry!(
                opts(
                    "xrpl_state_realtime",
                    "Real-time validator state (1=current state, 0=other states)"
                ),
                &["state"],
                registry
            )
            .unwrap(),
            build_version: register_int_gauge_vec_with_registry!(
                opts(
                    "xrpl_build_version_realtime",
                    "Real-time rippled build version (1=current)"
                ),
                &["version"],
                registry
            )
            .unwrap(),
            pubkey: register_int_gauge_vec_with_registry!(
                opts(
                    "xrpl_pubkey_realtime",
                    "Real-time validator public key (1=current)"
                ),
                &["pubkey"],
                registry
            )
            .unwrap(),
            node_mode: register_int_gauge_vec_with_registry!(
                opts(
                    "xrpl_node_mode_realtime",
                    "Node mode indicator (1=current mode)"
                ),
                &["mode"],
                registry
            )
            .unwrap(),
            ledger_sequence: register_int_gauge_with_registry!(
                opts(
                    "xrpl_ledger_sequence_realtime",
                    "Real-time validated ledger sequence"
                ),
                registry
            )
            .unwrap(),
            ledger_age: register_gauge_with_registry!(
                opts(
                    "xrpl_ledger_age_realtime",
                    "Real-time validated ledger age in seconds"
                ),
                registry
            )
            .unwrap(),
            base_fee_xrp: register_gauge_with_registry!(
                opts(
                    "xrpl_base_fee_xrp_realtime",
                    "Real-time base transaction fee in XRP"
                ),
                registry
            )
            .unwrap(),
            reserve_base_xrp: register_gauge_with_registry!(
                opts("xrpl_reserve_base_xrp_realtime", "Real-time base reserve in XRP"),
                registry
            )
            .unwrap(),
            reserve_inc_xrp: register_gauge_with_registry!(
                opts(
                    "xrpl_reserve_inc_xrp_realtime",
                    "Real-time reserve increment in XRP"
                ),
                registry
            )
            .unwrap(),
            load_factor: register_gauge_with_registry!(
                opts("xrpl_load_factor_realtime", "Real-time server load factor"),
                registry
            )
            .unwrap(),
            validation_quorum: register_gauge_with_registry!(
                opts(
                    "xrpl_validation_quorum_realtime",
                    "Real-time validation quorum"
                ),
                registry
            )
            .unwrap(),
            proposers: register_int_gauge_with_registry!(
                opts(
                    "xrpl_proposers_realtime",
                    "Real-time number of proposers in consensus"
                ),
                registry
            )
            .unwrap(),
            unl_expiry_days: register_int_gauge_with_registry!(
                opts(
                    "xrpl_unl_expiry_days_realtime",
                    "Days until the validator list (UNL) expires"
                ),
                registry
            )
            .unwrap(),
            amendment_blocked: register_int_gauge_with_registry!(
                opts(
                    "xrpl_amendment_blocked_realtime",
                    "Whether the node is amendment blocked (1=blocked)"
                ),
                registry
            )
            .unwrap(),
            peer_count: register_int_gauge_with_registry!(
                opts("xrpl_peer_count_realtime", "Real-time total peer count"),
                registry
            )
            .unwrap(),
            peers_inbound: register_int_gauge_with_registry!(
                opts("xrpl_peers_inbound_realtime", "Real-time inbound peer count"),
                registry
            )
            .unwrap(),
            peers_outbound: register_int_gauge_with_registry!(
                opts(
                    "xrpl_peers_outbound_realtime",
                    "Real-time outbound peer count"
                ),
                registry
            )
            .unwrap(),
            peers_insane: register_int_gauge_with_registry!(
                opts("xrpl_peers_insane_realtime", "Real-time insane peer count"),
                registry
            )
            .unwrap(),
            peer_latency_p90: register_gauge_with_registry!(
                opts(
                    "xrpl_peer_latency_p90_realtime",
                    "Real-time P90 peer latency in milliseconds"
                ),
                registry
            )
            .unwrap(),
            crawl_peer_count: register_int_gauge_with_registry!(
                opts("xrpl_crawl_peer_count", "Peers seen by the version crawl"),
                registry
            )
            .unwrap(),
            peers_higher_version: register_int_gauge_with_registry!(
                opts(
                    "xrpl_peers_higher_version",
                    "Crawled peers running a higher rippled version"
                ),
                registry
            )
            .unwrap(),
            peers_higher_version_pct: register_gauge_with_registry!(
                opts(
                    "xrpl_peers_higher_version_pct",
                    "Share of crawled peers running a higher rippled version"
                ),
                registry
            )
            .unwrap(),
            upgrade_recommended: register_int_gauge_with_registry!(
                opts(
                    "xrpl_upgrade_recommended",
                    "Whether an upgrade is recommended (>60% of peers are newer)"
                ),
                registry
            )
            .unwrap(),
            upgrade_status_gauge: register_int_gauge_with_registry!(
                opts(
                    "xrpl_upgrade_status",
                    "Composite upgrade status: recommended + 2*amendment_blocked"
                ),
                registry
            )
            .unwrap(),
            registry,
        }
    }

    /// Copies a snapshot into the registry. One-hot vectors are fully
    /// rewritten; version/pubkey series are reset so stale label values
    /// disappear when the node changes identity.
    pub fn update(&self, snap: &ExporterSnapshot) {
        self.state_value.set(snap.state.value() as i64);
        for state in ValidatorState::ALL {
            self.state
                .with_label_values(&[state.as_str()])
                .set(i64::from(state.as_str() == snap.state_name));
        }

        self.build_version.reset();
        if !snap.build_version.is_empty() {
            self.build_version
                .with_label_values(&[&snap.build_version])
                .set(1);
        }
        self.pubkey.reset();
        if !snap.pubkey_validator.is_empty() {
            self.pubkey
                .with_label_values(&[&snap.pubkey_validator])
                .set(1);
        }
        for mode in NodeMode::ALL {
            self.node_mode
                .with_label_values(&[mode.as_str()])
                .set(i64::from(mode == snap.node_mode));
        }

        self.ledger_sequence.set(snap.ledger_sequence as i64);
        self.ledger_age.set(snap.ledger_age);
        self.base_fee_xrp.set(snap.base_fee_xrp);
        self.reserve_base_xrp.set(snap.reserve_base_xrp);
        self.reserve_inc_xrp.set(snap.reserve_inc_xrp);
        self.load_factor.set(snap.load_factor);
        self.validation_quorum.set(snap.validation_quorum);
        self.proposers.set(snap.proposers as i64);
        self.unl_expiry_days.set(snap.unl_expiry_days);
        self.amendment_blocked.set(i64::from(snap.amendment_blocked));

        self.peer_count.set(snap.peers.peer_count as i64);
        self.peers_inbound.set(snap.peers.inbound as i64);
        self.peers_outbound.set(snap.peers.outbound as i64);
        self.peers_insane.set(snap.peers.insane as i64);
        self.peer_latency_p90.set(snap.peers.latency_p90_ms);

        self.crawl_peer_count.set(snap.crawl.peer_count as i64);
        self.peers_higher_version.set(snap.crawl.higher_version as i64);
        self.peers_higher_version_pct.set(snap.crawl.higher_version_pct);
        self.upgrade_recommended
            .set(i64::from(snap.crawl.upgrade_recommended));
        self.upgrade_status_gauge
            .set(upgrade_status(&snap.crawl, snap.amendment_blocked));
    }

    /// Exposition document for the current registry contents.
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(err) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!("metrics encoding failed: {err}");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
