// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Periodic admin polling over the JSON-RPC surface.
//!
//! Each poll family runs as its own cancellable loop. `server_info` goes
//! over direct HTTP rather than the WebSocket so state updates keep flowing
//! while the stream connection is reconnecting.

pub mod cpu;

use crate::node_client::NodeClient;
use crate::tsdb::MetricSink;
use cpu::CpuMonitor;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tap::TapFallible;
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use xrpl_monitor_types::metric::unix_millis_now;
use xrpl_monitor_types::rpc::{JsonRpcEnvelope, JsonRpcRequest};
use xrpl_monitor_types::{MetricSample, ValidatorState};

pub const SERVER_INFO_INTERVAL: Duration = Duration::from_secs(5);
pub const PEERS_INTERVAL: Duration = Duration::from_secs(60);
pub const SERVER_STATE_INTERVAL: Duration = Duration::from_secs(300);
pub const CPU_INTERVAL: Duration = Duration::from_secs(5);

/// Fast retry budget for the direct `server_info` poll; rippled on localhost
/// answers instantly or is restarting.
const SERVER_INFO_ATTEMPTS: u32 = 2;
const SERVER_INFO_RETRY_DELAY: Duration = Duration::from_millis(200);
const SERVER_INFO_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct PollerConfig {
    pub http_url: String,
    pub docker_container: Option<String>,
    pub data_path: PathBuf,
    pub nudb_path: Option<PathBuf>,
}

pub struct HttpPoller {
    config: PollerConfig,
    sink: Arc<dyn MetricSink>,
    node: Arc<NodeClient>,
    http: reqwest::Client,
    last_jq_trans_overflow: AtomicU64,
    cpu: Mutex<CpuMonitor>,
}

impl HttpPoller {
    pub fn new(
        config: PollerConfig,
        sink: Arc<dyn MetricSink>,
        node: Arc<NodeClient>,
    ) -> Arc<Self> {
        let cpu = CpuMonitor::new(config.docker_container.clone());
        Arc::new(Self {
            config,
            sink,
            node,
            http: reqwest::Client::new(),
            last_jq_trans_overflow: AtomicU64::new(0),
            cpu: Mutex::new(cpu),
        })
    }

    /// Writes the one-time `xrpl_server_info` info sample, then starts the
    /// four polling loops.
    pub async fn spawn(self: &Arc<Self>, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        self.write_startup_info().await;
        info!(
            server_info_secs = SERVER_INFO_INTERVAL.as_secs(),
            peers_secs = PEERS_INTERVAL.as_secs(),
            server_state_secs = SERVER_STATE_INTERVAL.as_secs(),
            cpu_secs = CPU_INTERVAL.as_secs(),
            "http polling tasks started"
        );
        vec![
            tokio::spawn(Self::poll_loop(
                self.clone(),
                shutdown.clone(),
                SERVER_INFO_INTERVAL,
                PollKind::ServerInfo,
            )),
            tokio::spawn(Self::poll_loop(
                self.clone(),
                shutdown.clone(),
                PEERS_INTERVAL,
                PollKind::Peers,
            )),
            tokio::spawn(Self::poll_loop(
                self.clone(),
                shutdown.clone(),
                SERVER_STATE_INTERVAL,
                PollKind::ServerState,
            )),
            tokio::spawn(Self::poll_loop(self.clone(), shutdown, CPU_INTERVAL, PollKind::Cpu)),
        ]
    }

    async fn poll_loop(
        poller: Arc<Self>,
        shutdown: CancellationToken,
        interval: Duration,
        kind: PollKind,
    ) {
        loop {
            match kind {
                PollKind::ServerInfo => poller.poll_server_info().await,
                PollKind::Peers => poller.poll_peers().await,
                PollKind::ServerState => poller.poll_server_state().await,
                PollKind::Cpu => poller.poll_cpu().await,
            }
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!(?kind, "poller stopped");
                    return;
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    /// Direct HTTP `server_info`, bypassing the WebSocket on purpose.
    async fn server_info_direct(&self) -> Option<Value> {
        for attempt in 1..=SERVER_INFO_ATTEMPTS {
            let result = self
                .http
                .post(&self.config.http_url)
                .timeout(SERVER_INFO_TIMEOUT)
                .json(&JsonRpcRequest::new("server_info"))
                .send()
                .await;
            match result {
                Ok(response) if response.status().is_success() => {
                    match response.json::<JsonRpcEnvelope>().await {
                        Ok(envelope) if envelope.is_success() => {
                            return envelope.result().get("info").cloned();
                        }
                        Ok(_) => {
                            warn!("server_info rpc returned non-success status");
                            return None;
                        }
                        Err(err) => {
                            warn!("server_info response decode failed: {err}");
                            return None;
                        }
                    }
                }
                Ok(response) => {
                    warn!(status = %response.status(), "server_info http error");
                    return None;
                }
                Err(_) if attempt < SERVER_INFO_ATTEMPTS => {
                    tokio::time::sleep(SERVER_INFO_RETRY_DELAY).await;
                }
                Err(err) => {
                    // Routine during rippled restarts; not worth a warning.
                    debug!("server_info unavailable after {SERVER_INFO_ATTEMPTS} attempts: {err}");
                }
            }
        }
        None
    }

    async fn poll_server_info(&self) {
        let Some(info) = self.server_info_direct().await else {
            warn!("server_info poll returned no data");
            return;
        };
        let last_jq = self.last_jq_trans_overflow.load(Ordering::SeqCst);
        let (samples, new_jq) = server_info_samples(&info, last_jq, unix_millis_now());
        self.last_jq_trans_overflow.store(new_jq, Ordering::SeqCst);
        self.sink.write_batch(samples, false).await;
    }

    async fn poll_peers(&self) {
        let peers = match self.node.get_peers().await {
            Ok(peers) => Some(peers),
            Err(err) => {
                debug!("peers via api failed ({err}), trying container exec fallback");
                self.peers_via_container().await
            }
        };
        match peers {
            Some(peers) => {
                let samples = peers_samples(&peers, unix_millis_now());
                self.sink.write_batch(samples, false).await;
            }
            None => {
                warn!(
                    "peers command unavailable (requires admin access); \
                     set RIPPLED_DOCKER_CONTAINER for the exec fallback"
                );
            }
        }
    }

    /// `docker exec <container> rippled peers` for nodes whose admin API is
    /// network-restricted.
    async fn peers_via_container(&self) -> Option<Vec<Value>> {
        let container = self.config.docker_container.as_deref()?;
        let output = tokio::time::timeout(
            Duration::from_secs(10),
            Command::new("docker")
                .args(["exec", container, "rippled", "peers"])
                .output(),
        )
        .await
        .tap_err(|_| warn!("container exec peers timed out"))
        .ok()?
        .tap_err(|err| warn!("container exec peers failed: {err}"))
        .ok()?;
        if !output.status.success() {
            debug!(status = ?output.status, "container exec peers returned failure");
            return None;
        }
        let body: Value = serde_json::from_slice(&output.stdout)
            .tap_err(|err| warn!("container exec peers output is not json: {err}"))
            .ok()?;
        if body["result"]["status"] != "success" {
            return None;
        }
        let peers = body["result"]["peers"].as_array().cloned().unwrap_or_default();
        debug!(count = peers.len(), "peers collected via container exec");
        Some(peers)
    }

    async fn poll_server_state(&self) {
        let state = match self.node.get_server_state().await {
            Ok(state) => state,
            Err(err) => {
                warn!("server_state poll failed: {err}");
                return;
            }
        };
        let ledger_db_bytes = directory_size(&self.config.data_path.join("db"));
        let nudb_bytes = discover_nudb_path(&self.config.data_path, self.config.nudb_path.as_deref())
            .map(|path| directory_size(&path))
            .unwrap_or(0);
        let samples = server_state_samples(&state, ledger_db_bytes, nudb_bytes, unix_millis_now());
        self.sink.write_batch(samples, false).await;
    }

    async fn poll_cpu(&self) {
        let timestamp = unix_millis_now();
        let mut cpu = self.cpu.lock().await;
        let mut samples = Vec::new();
        match cpu.cpu_percent().await {
            Some(percent) => {
                samples.push(MetricSample::gauge("xrpl_rippled_cpu_percent", percent).at(timestamp));
            }
            None => debug!("cpu metric unavailable (rippled process not found)"),
        }
        // Cores are written even when the percent is unavailable; dashboard
        // ratio panels need the denominator.
        let cores = cpu.cpu_cores().await;
        samples.push(MetricSample::gauge("xrpl_rippled_cpu_cores", cores as f64).at(timestamp));
        drop(cpu);
        self.sink.write_batch(samples, false).await;
    }

    async fn write_startup_info(&self) {
        match self.node.get_server_state().await {
            Ok(state) => {
                let node_size = state["node_size"].as_str().unwrap_or("unknown");
                let complete_ledgers = state["complete_ledgers"].as_str().unwrap_or("");
                let sample = MetricSample::info("xrpl_server_info")
                    .with_label("node_size", node_size)
                    .with_label("complete_ledgers", complete_ledgers)
                    .at(unix_millis_now());
                info!(node_size, complete_ledgers, "server info");
                self.sink.write(sample, false).await;
            }
            Err(err) => warn!("startup server_state poll failed: {err}"),
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum PollKind {
    ServerInfo,
    Peers,
    ServerState,
    Cpu,
}

/// rippled reports large counters inconsistently as numbers or strings.
fn value_as_u64(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

fn value_as_f64(value: &Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

/// Gauges and counters derived from one `server_info` response. Returns the
/// updated jq_trans_overflow watermark.
///
/// Counter behaviors are deliberate and differ: the peer-disconnect counters
/// are written on every poll, zeros included, so their series exist from the
/// first scrape; `jq_trans_overflow_total` is only written while it has not
/// gone backwards against the last written value.
pub fn server_info_samples(
    info: &Value,
    last_jq_trans_overflow: u64,
    timestamp: i64,
) -> (Vec<MetricSample>, u64) {
    let peer_count = value_as_u64(&info["peers"]).unwrap_or(0);
    let load_factor = value_as_f64(&info["load_factor"]).unwrap_or(1.0);
    let io_latency_ms = value_as_f64(&info["io_latency_ms"]).unwrap_or(0.0);
    let converge_time_s = value_as_f64(&info["last_close"]["converge_time_s"]).unwrap_or(0.0);
    let proposers = value_as_u64(&info["last_close"]["proposers"]).unwrap_or(0);
    let peer_disconnects = value_as_u64(&info["peer_disconnects"]).unwrap_or(0);
    let peer_disconnects_resources =
        value_as_u64(&info["peer_disconnects_resources"]).unwrap_or(0);
    let jq_trans_overflow = value_as_u64(&info["jq_trans_overflow"]).unwrap_or(0);
    let validation_quorum = value_as_f64(&info["validation_quorum"]).unwrap_or(0.0);

    // Rounded to the nearest minute so the dashboard display is stable.
    let uptime_raw = value_as_u64(&info["uptime"]).unwrap_or(0);
    let uptime = (uptime_raw as f64 / 60.0).round() as u64 * 60;

    let server_state_duration_s = value_as_u64(&info["server_state_duration_us"])
        .map(|us| us as f64 / 1_000_000.0)
        .unwrap_or(0.0);

    let server_state = info["server_state"].as_str().unwrap_or("unknown");
    let state_value = ValidatorState::from_status(server_state).value();
    let pubkey_node = info["pubkey_node"].as_str().unwrap_or("");

    let mut samples = vec![
        MetricSample::gauge("xrpl_peer_count", peer_count as f64).at(timestamp),
        MetricSample::gauge("xrpl_load_factor", load_factor).at(timestamp),
        MetricSample::gauge("xrpl_io_latency_ms", io_latency_ms).at(timestamp),
        MetricSample::gauge("xrpl_consensus_converge_time_seconds", converge_time_s)
            .at(timestamp),
        MetricSample::gauge("xrpl_validator_uptime_seconds", uptime as f64).at(timestamp),
        MetricSample::info("xrpl_validator_uptime_info")
            .with_label("pretty", format_uptime(uptime))
            .at(timestamp),
        MetricSample::gauge("xrpl_server_state_duration_seconds", server_state_duration_s)
            .at(timestamp),
        MetricSample::gauge("xrpl_validation_quorum", validation_quorum).at(timestamp),
        MetricSample::gauge("xrpl_proposers", proposers as f64).at(timestamp),
        MetricSample::gauge("xrpl_validator_state_value", state_value as f64).at(timestamp),
        // Canonical owner of this label set; the server stream handler
        // intentionally does not write it.
        MetricSample::info("xrpl_validator_state_info")
            .with_label("pubkey_node", pubkey_node)
            .at(timestamp),
        MetricSample::gauge("xrpl_time_in_current_state_seconds", server_state_duration_s)
            .at(timestamp),
    ];

    let mut new_jq = last_jq_trans_overflow;
    if jq_trans_overflow >= last_jq_trans_overflow {
        samples.push(
            MetricSample::counter("xrpl_jq_trans_overflow_total", jq_trans_overflow as f64)
                .at(timestamp),
        );
        new_jq = jq_trans_overflow;
    }
    samples.push(
        MetricSample::counter("xrpl_peer_disconnects_total", peer_disconnects as f64)
            .at(timestamp),
    );
    samples.push(
        MetricSample::counter(
            "xrpl_peer_disconnects_resources_total",
            peer_disconnects_resources as f64,
        )
        .at(timestamp),
    );

    (samples, new_jq)
}

/// Peer counts and the P90 latency from one `peers` response.
pub fn peers_samples(peers: &[Value], timestamp: i64) -> Vec<MetricSample> {
    let mut inbound = 0u64;
    let mut outbound = 0u64;
    let mut insane = 0u64;
    let mut latencies: Vec<f64> = Vec::new();
    for peer in peers {
        if peer["inbound"].as_bool().unwrap_or(false) {
            inbound += 1;
        } else {
            outbound += 1;
        }
        if peer["sanity"].as_str() == Some("insane") {
            insane += 1;
        }
        if let Some(latency) = value_as_f64(&peer["latency"]) {
            latencies.push(latency);
        }
    }
    let p90 = percentile_90(&mut latencies);

    vec![
        MetricSample::gauge("xrpl_peers_inbound", inbound as f64).at(timestamp),
        MetricSample::gauge("xrpl_peers_outbound", outbound as f64).at(timestamp),
        MetricSample::gauge("xrpl_peers_insane", insane as f64).at(timestamp),
        MetricSample::gauge("xrpl_peer_latency_p90_ms", p90).at(timestamp),
    ]
}

/// P90 by `floor(0.9 * n)`, clamped to the last index.
fn percentile_90(latencies: &mut [f64]) -> f64 {
    if latencies.is_empty() {
        return 0.0;
    }
    latencies.sort_by(|a, b| a.partial_cmp(b).expect("latencies are finite"));
    let index = ((latencies.len() as f64) * 0.9) as usize;
    latencies[index.min(latencies.len() - 1)]
}

/// State accounting, DB sizes and initial sync duration from one
/// `server_state` response. Microsecond fields are scaled to seconds.
pub fn server_state_samples(
    state: &Value,
    ledger_db_bytes: u64,
    nudb_bytes: u64,
    timestamp: i64,
) -> Vec<MetricSample> {
    let mut samples = Vec::new();
    if let Some(accounting) = state["state_accounting"].as_object() {
        for (state_name, entry) in accounting {
            let duration_s = value_as_u64(&entry["duration_us"])
                .map(|us| us as f64 / 1_000_000.0)
                .unwrap_or(0.0);
            let transitions = value_as_u64(&entry["transitions"]).unwrap_or(0);
            samples.push(
                MetricSample::gauge("xrpl_state_accounting_duration_seconds", duration_s)
                    .with_label("state", state_name.clone())
                    .at(timestamp),
            );
            samples.push(
                MetricSample::gauge("xrpl_state_accounting_transitions", transitions as f64)
                    .with_label("state", state_name.clone())
                    .at(timestamp),
            );
        }
    }
    samples.push(MetricSample::gauge("xrpl_ledger_db_bytes", ledger_db_bytes as f64).at(timestamp));
    samples.push(MetricSample::gauge("xrpl_ledger_nudb_bytes", nudb_bytes as f64).at(timestamp));
    let initial_sync_s = value_as_u64(&state["initial_sync_duration_us"])
        .map(|us| us as f64 / 1_000_000.0)
        .unwrap_or(0.0);
    samples.push(
        MetricSample::gauge("xrpl_initial_sync_duration_seconds", initial_sync_s).at(timestamp),
    );
    samples
}

/// `Xd:Yh:Zm`; days omitted when zero, hours shown whenever days are, the
/// minutes component always present.
pub fn format_uptime(seconds: u64) -> String {
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3_600;
    let minutes = (seconds % 3_600) / 60;

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{days}d"));
    }
    if hours > 0 || days > 0 {
        parts.push(format!("{hours}h"));
    }
    parts.push(format!("{minutes}m"));
    parts.join(":")
}

/// NuDB discovery order: explicit override, `<data>/db/nudb`, `<data>/nudb`,
/// then the stock install locations. A directory only qualifies when it
/// holds at least one `rippledb.*` subdirectory.
pub fn discover_nudb_path(data_path: &Path, explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(explicit) = explicit {
        if explicit.is_dir() {
            return Some(explicit.to_path_buf());
        }
        warn!(path = %explicit.display(), "RIPPLED_NUDB_PATH set but path does not exist");
    }

    let mut candidates = vec![data_path.join("db/nudb"), data_path.join("nudb")];
    candidates.push(PathBuf::from("/var/lib/rippled/db/nudb"));
    candidates.push(PathBuf::from("/var/lib/rippled/nudb"));

    for candidate in candidates {
        if !candidate.is_dir() {
            continue;
        }
        let qualifies = std::fs::read_dir(&candidate)
            .map(|entries| {
                entries.flatten().any(|entry| {
                    entry.path().is_dir()
                        && entry
                            .file_name()
                            .to_str()
                            .is_some_and(|name| name.starts_with("rippledb."))
                })
            })
            .unwrap_or(false);
        if qualifies {
            debug!(path = %candidate.display(), "found nudb path");
            return Some(candidate);
        }
    }
    warn!("could not auto-discover nudb path; set RIPPLED_DATA_PATH or RIPPLED_NUDB_PATH");
    None
}

/// Recursive size of every regular file under `path`; unreadable entries are
/// skipped.
pub fn directory_size(path: &Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(path) else {
        return 0;
    };
    let mut total = 0u64;
    for entry in entries.flatten() {
        let entry_path = entry.path();
        if entry_path.is_dir() {
            total += directory_size(&entry_path);
        } else if let Ok(metadata) = entry.metadata() {
            total += metadata.len();
        }
    }
    total
}
