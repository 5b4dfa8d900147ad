// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The in-memory state served by the real-time exporter. Pollers update it
//! through [`SharedSnapshot::update`]; the HTTP handlers read a cheap atomic
//! copy and never contend with the pollers.

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::Arc;
use xrpl_monitor_types::metric::unix_seconds_now;
use xrpl_monitor_types::{NodeMode, ValidatorState};

#[derive(Clone, Debug)]
pub struct PeerStats {
    pub peer_count: u64,
    pub inbound: u64,
    pub outbound: u64,
    pub insane: u64,
    pub latency_p90_ms: f64,
    pub timestamp: f64,
}

impl Default for PeerStats {
    fn default() -> Self {
        Self {
            peer_count: 0,
            inbound: 0,
            outbound: 0,
            insane: 0,
            latency_p90_ms: 0.0,
            timestamp: unix_seconds_now(),
        }
    }
}

/// Output of the optional peer-version crawl.
#[derive(Clone, Debug, Default)]
pub struct CrawlStats {
    pub peer_count: u64,
    pub higher_version: u64,
    pub higher_version_pct: f64,
    pub upgrade_recommended: bool,
}

#[derive(Clone, Debug)]
pub struct ExporterSnapshot {
    pub state: ValidatorState,
    pub state_name: String,
    pub build_version: String,
    pub pubkey_validator: String,
    pub node_mode: NodeMode,
    pub ledger_sequence: u64,
    pub ledger_age: f64,
    pub base_fee_xrp: f64,
    pub reserve_base_xrp: f64,
    pub reserve_inc_xrp: f64,
    pub load_factor: f64,
    pub validation_quorum: f64,
    pub unl_expiry_days: i64,
    pub proposers: u64,
    pub amendment_blocked: bool,
    pub timestamp: f64,
    pub peers: PeerStats,
    pub crawl: CrawlStats,
}

impl Default for ExporterSnapshot {
    fn default() -> Self {
        Self {
            state: ValidatorState::Down,
            state_name: "down".to_string(),
            build_version: String::new(),
            pubkey_validator: String::new(),
            node_mode: NodeMode::Unknown,
            ledger_sequence: 0,
            ledger_age: 0.0,
            base_fee_xrp: 0.0,
            reserve_base_xrp: 0.0,
            reserve_inc_xrp: 0.0,
            load_factor: 0.0,
            validation_quorum: 0.0,
            unl_expiry_days: 0,
            proposers: 0,
            amendment_blocked: false,
            timestamp: unix_seconds_now(),
            peers: PeerStats::default(),
            crawl: CrawlStats::default(),
        }
    }
}

/// One writer-serialized, many-reader snapshot cell. Updates clone the
/// current value, apply the mutation and publish atomically, so readers
/// always observe a consistent snapshot.
pub struct SharedSnapshot {
    published: ArcSwap<ExporterSnapshot>,
    writer: Mutex<()>,
}

impl SharedSnapshot {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            published: ArcSwap::from_pointee(ExporterSnapshot::default()),
            writer: Mutex::new(()),
        })
    }

    pub fn load(&self) -> Arc<ExporterSnapshot> {
        self.published.load_full()
    }

    pub fn update(&self, apply: impl FnOnce(&mut ExporterSnapshot)) {
        let _guard = self.writer.lock();
        let mut next = (*self.published.load_full()).clone();
        apply(&mut next);
        self.published.store(Arc::new(next));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn updates_are_isolated_per_section() {
        let shared = SharedSnapshot::new();
        shared.update(|snap| {
            snap.state = ValidatorState::Proposing;
            snap.state_name = "proposing".to_string();
        });
        shared.update(|snap| {
            snap.peers.peer_count = 21;
        });

        let snap = shared.load();
        // The peer update did not clobber the state update.
        assert_eq!(snap.state, ValidatorState::Proposing);
        assert_eq!(snap.peers.peer_count, 21);
    }

    #[test]
    fn readers_keep_their_copy() {
        let shared = SharedSnapshot::new();
        let before = shared.load();
        shared.update(|snap| snap.ledger_sequence = 42);
        assert_eq!(before.ledger_sequence, 0);
        assert_eq!(shared.load().ledger_sequence, 42);
    }
}
