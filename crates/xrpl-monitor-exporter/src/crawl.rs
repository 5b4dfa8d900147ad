// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Peer-version crawl: periodically reads the node's public `/crawl`
//! endpoint and derives upgrade advice from how much of the connected
//! overlay already runs a newer rippled.

use crate::snapshot::{CrawlStats, SharedSnapshot};
use crate::version::RippledVersion;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// More than this share of peers on a higher version triggers the upgrade
/// recommendation.
const UPGRADE_THRESHOLD_PCT: f64 = 60.0;

pub struct CrawlAdvisor {
    url: String,
    client: reqwest::Client,
    interval: Duration,
    shared: Arc<SharedSnapshot>,
}

impl CrawlAdvisor {
    pub fn new(host: &str, port: u16, interval: Duration, shared: Arc<SharedSnapshot>) -> Self {
        Self {
            url: format!("https://{host}:{port}/crawl"),
            // The crawl port serves a self-signed certificate.
            client: reqwest::Client::builder()
                .danger_accept_invalid_certs(true)
                .timeout(Duration::from_secs(10))
                .build()
                .expect("building the crawl http client cannot fail"),
            interval,
            shared,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        info!(url = %self.url, interval_secs = self.interval.as_secs(), "peer-version crawl started");
        loop {
            self.crawl_once().await;
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("peer-version crawl stopped");
                    return;
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }

    async fn crawl_once(&self) {
        let versions = match self.fetch_peer_versions().await {
            Ok(versions) => versions,
            Err(err) => {
                warn!("peer crawl failed: {err}");
                return;
            }
        };
        let snapshot = self.shared.load();
        let stats = upgrade_advice(&snapshot.build_version, &versions);
        debug!(
            peers = stats.peer_count,
            higher = stats.higher_version,
            pct = stats.higher_version_pct,
            "peer crawl complete"
        );
        self.shared.update(|snap| snap.crawl = stats);
    }

    async fn fetch_peer_versions(&self) -> anyhow::Result<Vec<String>> {
        let body: Value = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(extract_versions(&body))
    }
}

/// `overlay.active[*].version` from a `/crawl` response.
pub fn extract_versions(body: &Value) -> Vec<String> {
    body["overlay"]["active"]
        .as_array()
        .map(|peers| {
            peers
                .iter()
                .filter_map(|peer| peer["version"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Compares crawled peer versions against our build. Peers with unparsable
/// versions are ignored entirely; the percentages are over parsed peers.
pub fn upgrade_advice(local_version: &str, peer_versions: &[String]) -> CrawlStats {
    let Some(local) = RippledVersion::parse(local_version) else {
        debug!(local_version, "local build version unparsable, skipping upgrade advice");
        return CrawlStats::default();
    };

    let parsed: Vec<RippledVersion> = peer_versions
        .iter()
        .filter_map(|raw| RippledVersion::parse(raw))
        .collect();
    let peer_count = parsed.len() as u64;
    let higher_version = parsed.iter().filter(|peer| **peer > local).count() as u64;
    let higher_version_pct = if peer_count > 0 {
        higher_version as f64 / peer_count as f64 * 100.0
    } else {
        0.0
    };

    CrawlStats {
        peer_count,
        higher_version,
        higher_version_pct,
        upgrade_recommended: higher_version_pct > UPGRADE_THRESHOLD_PCT,
    }
}

/// Composite status for the dashboard: bit 0 upgrade recommended, bit 1
/// amendment blocked.
pub fn upgrade_status(stats: &CrawlStats, amendment_blocked: bool) -> i64 {
    i64::from(stats.upgrade_recommended) + 2 * i64::from(amendment_blocked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn versions_come_from_overlay_active() {
        let body = json!({
            "overlay": {
                "active": [
                    {"version": "rippled-2.2.0", "public_key": "a"},
                    {"version": "rippled-2.3.0"},
                    {"public_key": "no-version"},
                ]
            }
        });
        assert_eq!(
            extract_versions(&body),
            vec!["rippled-2.2.0".to_string(), "rippled-2.3.0".to_string()]
        );
        assert_eq!(extract_versions(&json!({})), Vec::<String>::new());
    }

    #[test]
    fn advice_counts_strictly_higher_versions() {
        let peers: Vec<String> = [
            "rippled-2.3.0",
            "rippled-2.3.0",
            "rippled-2.2.0",
            "rippled-2.1.1",
            "not-a-version",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let stats = upgrade_advice("rippled-2.2.0", &peers);
        assert_eq!(stats.peer_count, 4);
        assert_eq!(stats.higher_version, 2);
        assert_eq!(stats.higher_version_pct, 50.0);
        assert!(!stats.upgrade_recommended);
    }

    #[test]
    fn recommendation_requires_more_than_sixty_percent() {
        let mostly_newer: Vec<String> = std::iter::repeat("rippled-2.3.0".to_string())
            .take(7)
            .chain(std::iter::repeat("rippled-2.2.0".to_string()).take(3))
            .collect();
        let stats = upgrade_advice("rippled-2.2.0", &mostly_newer);
        assert_eq!(stats.higher_version_pct, 70.0);
        assert!(stats.upgrade_recommended);

        // Exactly 60% is not enough.
        let at_threshold: Vec<String> = std::iter::repeat("rippled-2.3.0".to_string())
            .take(6)
            .chain(std::iter::repeat("rippled-2.2.0".to_string()).take(4))
            .collect();
        assert!(!upgrade_advice("rippled-2.2.0", &at_threshold).upgrade_recommended);
    }

    #[test]
    fn composite_status_encoding() {
        let mut stats = CrawlStats::default();
        assert_eq!(upgrade_status(&stats, false), 0);
        assert_eq!(upgrade_status(&stats, true), 2);
        stats.upgrade_recommended = true;
        assert_eq!(upgrade_status(&stats, false), 1);
        assert_eq!(upgrade_status(&stats, true), 3);
    }

    #[test]
    fn unparsable_local_version_disables_advice() {
        let stats = upgrade_advice("", &["rippled-9.9.9".to_string()]);
        assert_eq!(stats.peer_count, 0);
        assert!(!stats.upgrade_recommended);
    }
}
