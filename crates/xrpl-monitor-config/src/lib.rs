// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use anyhow::{bail, Context, Result};
use std::fmt;
use std::path::PathBuf;
use url::Url;

pub const DEFAULT_RIPPLED_WS_URL: &str = "ws://localhost:6006";
pub const DEFAULT_RIPPLED_HTTP_URL: &str = "http://localhost:5005";
pub const DEFAULT_TSDB_URL: &str = "http://localhost:8428";
pub const DEFAULT_RIPPLED_DATA_PATH: &str = "/var/lib/rippled";
pub const DEFAULT_STATE_DIR: &str = "/app/state";
pub const DEFAULT_EXPORTER_PORT: u16 = 9103;
pub const DEFAULT_INSTANCE_LABEL: &str = "validator";

/// Collector configuration, loaded from the environment. Invalid URLs are a
/// startup failure: a misconfigured collector must not come up half-working.
#[derive(Clone)]
pub struct MonitorConfig {
    /// rippled WebSocket endpoint (streams + admin requests).
    pub rippled_ws_url: String,
    /// rippled HTTP JSON-RPC endpoint.
    pub rippled_http_url: String,
    /// TSDB base URL (import + query APIs).
    pub tsdb_url: String,
    /// Our validator's public key. Auto-detected from `server_info` when
    /// unset.
    pub validator_public_key: Option<String>,
    /// Container name enabling the exec-CLI fallback for admin commands.
    pub docker_container: Option<String>,
    /// Root of the rippled data directory, for DB size walks.
    pub rippled_data_path: PathBuf,
    /// Explicit NuDB directory, overriding auto-discovery.
    pub nudb_path: Option<PathBuf>,
    /// Peer crawl port; 0 disables the upgrade advisor.
    pub peer_crawl_port: u16,
    /// Seconds between peer-version crawls.
    pub peer_crawl_interval: u64,
    /// Exporter state poll interval, seconds.
    pub poll_interval: f64,
    /// Exporter peers poll interval, seconds.
    pub peers_poll_interval: f64,
    pub exporter_port: u16,
    pub instance_label: String,
    pub log_level: String,
    /// Directory for JSON state backups.
    pub state_dir: PathBuf,
}

impl MonitorConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup, so tests do not have to
    /// mutate process-global environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let get_opt = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let config = Self {
            rippled_ws_url: get("RIPPLED_WS_URL", DEFAULT_RIPPLED_WS_URL),
            rippled_http_url: get("RIPPLED_HTTP_URL", DEFAULT_RIPPLED_HTTP_URL),
            tsdb_url: get("VICTORIA_METRICS_URL", DEFAULT_TSDB_URL)
                .trim_end_matches('/')
                .to_string(),
            validator_public_key: get_opt("VALIDATOR_PUBLIC_KEY"),
            docker_container: get_opt("RIPPLED_DOCKER_CONTAINER"),
            rippled_data_path: PathBuf::from(get("RIPPLED_DATA_PATH", DEFAULT_RIPPLED_DATA_PATH)),
            nudb_path: get_opt("RIPPLED_NUDB_PATH").map(PathBuf::from),
            peer_crawl_port: parse(&lookup, "PEER_CRAWL_PORT", 0)?,
            peer_crawl_interval: parse(&lookup, "PEER_CRAWL_INTERVAL", 300)?,
            poll_interval: parse(&lookup, "POLL_INTERVAL", 2.0)?,
            peers_poll_interval: parse(&lookup, "PEERS_POLL_INTERVAL", 5.0)?,
            exporter_port: parse(&lookup, "EXPORTER_PORT", DEFAULT_EXPORTER_PORT)?,
            instance_label: get("INSTANCE_LABEL", DEFAULT_INSTANCE_LABEL),
            log_level: get("LOG_LEVEL", "INFO"),
            state_dir: PathBuf::from(get("STATE_DIR", DEFAULT_STATE_DIR)),
        };
        config.validate()?;
        Ok(config)
    }

    /// Whether the peer-version crawl / upgrade advisor is enabled.
    pub fn peer_crawl_enabled(&self) -> bool {
        self.peer_crawl_port != 0
    }

    fn validate(&self) -> Result<()> {
        let ws = Url::parse(&self.rippled_ws_url)
            .with_context(|| format!("invalid RIPPLED_WS_URL: {}", self.rippled_ws_url))?;
        if !matches!(ws.scheme(), "ws" | "wss") {
            bail!("RIPPLED_WS_URL must use ws:// or wss://, got {}", self.rippled_ws_url);
        }
        for (key, value) in [
            ("RIPPLED_HTTP_URL", &self.rippled_http_url),
            ("VICTORIA_METRICS_URL", &self.tsdb_url),
        ] {
            let url = Url::parse(value).with_context(|| format!("invalid {key}: {value}"))?;
            if !matches!(url.scheme(), "http" | "https") {
                bail!("{key} must use http:// or https://, got {value}");
            }
        }
        Ok(())
    }
}

fn parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) if !raw.is_empty() => raw
            .parse::<T>()
            .with_context(|| format!("invalid {key}: {raw}")),
        _ => Ok(default),
    }
}

impl fmt::Debug for MonitorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorConfig")
            .field("rippled_ws_url", &self.rippled_ws_url)
            .field("rippled_http_url", &self.rippled_http_url)
            .field("tsdb_url", &self.tsdb_url)
            .field(
                "validator_public_key",
                &self.validator_public_key.as_ref().map(|_| "***"),
            )
            .field("docker_container", &self.docker_container)
            .field("rippled_data_path", &self.rippled_data_path)
            .field("nudb_path", &self.nudb_path)
            .field("peer_crawl_port", &self.peer_crawl_port)
            .field("exporter_port", &self.exporter_port)
            .field("instance_label", &self.instance_label)
            .field("log_level", &self.log_level)
            .field("state_dir", &self.state_dir)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        let map: HashMap<&str, &str> = vars.iter().copied().collect();
        move |key| map.get(key).map(|v| v.to_string())
    }

    #[test]
    fn defaults_match_contract() {
        let config = MonitorConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.rippled_ws_url, "ws://localhost:6006");
        assert_eq!(config.rippled_http_url, "http://localhost:5005");
        assert_eq!(config.tsdb_url, "http://localhost:8428");
        assert_eq!(config.validator_public_key, None);
        assert_eq!(config.peer_crawl_port, 0);
        assert!(!config.peer_crawl_enabled());
        assert_eq!(config.peer_crawl_interval, 300);
        assert_eq!(config.exporter_port, 9103);
        assert_eq!(config.instance_label, "validator");
        assert_eq!(config.rippled_data_path, PathBuf::from("/var/lib/rippled"));
    }

    #[test]
    fn overrides_are_applied() {
        let config = MonitorConfig::from_lookup(lookup(&[
            ("RIPPLED_WS_URL", "wss://validator.example.net:6006"),
            ("VICTORIA_METRICS_URL", "http://tsdb:8428/"),
            ("VALIDATOR_PUBLIC_KEY", "nHUkp7W"),
            ("PEER_CRAWL_PORT", "51235"),
            ("RIPPLED_DOCKER_CONTAINER", "rippled"),
        ]))
        .unwrap();
        assert_eq!(config.rippled_ws_url, "wss://validator.example.net:6006");
        // Trailing slash is stripped so endpoint joins stay clean.
        assert_eq!(config.tsdb_url, "http://tsdb:8428");
        assert_eq!(config.validator_public_key.as_deref(), Some("nHUkp7W"));
        assert!(config.peer_crawl_enabled());
        assert_eq!(config.docker_container.as_deref(), Some("rippled"));
    }

    #[test]
    fn invalid_urls_fail_fast() {
        assert!(MonitorConfig::from_lookup(lookup(&[("RIPPLED_WS_URL", "http://nope")])).is_err());
        assert!(
            MonitorConfig::from_lookup(lookup(&[("VICTORIA_METRICS_URL", "not a url")])).is_err()
        );
        assert!(MonitorConfig::from_lookup(lookup(&[("PEER_CRAWL_PORT", "banana")])).is_err());
    }

    #[test]
    fn empty_values_fall_back_to_defaults() {
        let config =
            MonitorConfig::from_lookup(lookup(&[("VALIDATOR_PUBLIC_KEY", ""), ("POLL_INTERVAL", "")]))
                .unwrap();
        assert_eq!(config.validator_public_key, None);
        assert_eq!(config.poll_interval, 2.0);
    }

    #[test]
    fn debug_redacts_validator_key() {
        let config =
            MonitorConfig::from_lookup(lookup(&[("VALIDATOR_PUBLIC_KEY", "nHUkp7W")])).unwrap();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("nHUkp7W"));
        assert!(rendered.contains("***"));
    }
}
