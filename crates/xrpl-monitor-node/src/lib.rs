// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Process wiring and lifecycle for the validator telemetry collector.
//!
//! `MonitorNode::start` performs the fatal startup gates (reachable TSDB,
//! writable state directory, initial WebSocket connect), wires the stream
//! handlers to the reconciliation engine, recovers persisted counters, and
//! spawns every background task. `run` then supervises the listen task until
//! shutdown or reconnect exhaustion.

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use xrpl_monitor_config::MonitorConfig;
use xrpl_monitor_core::handlers::ledger::LedgerHandler;
use xrpl_monitor_core::handlers::server::ServerHandler;
use xrpl_monitor_core::handlers::StreamHandlers;
use xrpl_monitor_core::node_client::{NodeClient, StreamDispatcher};
use xrpl_monitor_core::poller::{HttpPoller, PollerConfig};
use xrpl_monitor_core::state::StateManager;
use xrpl_monitor_core::tsdb::{MetricSink, TsdbClient};
use xrpl_monitor_core::validations::ValidationsHandler;
use xrpl_monitor_exporter::{spawn_exporter, ExporterConfig};
use xrpl_monitor_types::metric::unix_millis_now;
use xrpl_monitor_types::{MetricSample, MonitorError};

pub const SUBSCRIBED_STREAMS: [&str; 3] = ["ledger", "server", "validations"];

/// Supervisor reconnect budget, above the client's own backoff sequence.
const SUPERVISOR_MAX_ATTEMPTS: u32 = 10;
/// Health samples every 30s; every tenth cycle also backs up state.
const HEALTH_INTERVAL: Duration = Duration::from_secs(30);
const BACKUP_EVERY_CYCLES: u64 = 10;

/// `min(2^attempt, 60)` seconds.
fn supervisor_delay(attempt: u32) -> Duration {
    let secs = 1u64
        .checked_shl(attempt)
        .unwrap_or(u64::MAX)
        .min(60);
    Duration::from_secs(secs)
}

pub struct MonitorNode {
    config: MonitorConfig,
    tsdb: Arc<TsdbClient>,
    node_client: Arc<NodeClient>,
    validations: Arc<ValidationsHandler>,
    ledger: Arc<LedgerHandler>,
    server: Arc<ServerHandler>,
    state_manager: Arc<StateManager>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl MonitorNode {
    pub async fn start(config: MonitorConfig) -> Result<MonitorNode> {
        let shutdown = CancellationToken::new();

        info!("initializing tsdb client");
        let tsdb = Arc::new(TsdbClient::new(&config.tsdb_url));
        if !tsdb.health_check().await {
            bail!("tsdb at {} is not healthy, refusing to start", config.tsdb_url);
        }
        info!("tsdb connection established");

        let state_manager = StateManager::new(tsdb.clone(), config.state_dir.clone());
        state_manager
            .validate_state_directory()
            .context("state persistence is required for reliable operation")?;

        info!("initializing rippled websocket client");
        let node_client = NodeClient::new(&config.rippled_ws_url, &config.rippled_http_url);
        node_client
            .connect()
            .await
            .context("failed to connect to rippled")?;

        let sink: Arc<dyn MetricSink> = tsdb.clone();
        let validations =
            ValidationsHandler::new(sink.clone(), config.validator_public_key.clone());
        let ledger = LedgerHandler::new(sink.clone(), validations.clone());
        let server = ServerHandler::new(sink.clone());

        validations.recover_from_tsdb(&tsdb).await;

        if let Ok(info) = node_client.get_server_info().await {
            info!(
                state = info["server_state"].as_str().unwrap_or("unknown"),
                version = info["build_version"].as_str().unwrap_or("unknown"),
                "rippled info"
            );
        }
        if config.validator_public_key.is_none() {
            Self::detect_validator_key(&node_client, &validations).await;
        }

        let (exporter_addr, exporter_tasks) = spawn_exporter(
            ExporterConfig {
                http_url: config.rippled_http_url.clone(),
                port: config.exporter_port,
                instance_label: config.instance_label.clone(),
                poll_interval: Duration::from_secs_f64(config.poll_interval),
                peers_poll_interval: Duration::from_secs_f64(config.peers_poll_interval),
                peer_crawl_port: config.peer_crawl_port,
                peer_crawl_interval: Duration::from_secs(config.peer_crawl_interval),
            },
            shutdown.clone(),
        )?;
        info!(%exporter_addr, "real-time exporter started");

        node_client.subscribe(&SUBSCRIBED_STREAMS).await?;

        let poller = HttpPoller::new(
            PollerConfig {
                http_url: config.rippled_http_url.clone(),
                docker_container: config.docker_container.clone(),
                data_path: config.rippled_data_path.clone(),
                nudb_path: config.nudb_path.clone(),
            },
            sink.clone(),
            node_client.clone(),
        );

        let mut tasks = exporter_tasks;
        tasks.extend(poller.spawn(shutdown.clone()).await);
        tasks.push(tokio::spawn(
            validations.clone().run(shutdown.clone()),
        ));
        tasks.push(tokio::spawn(uptime_task(sink.clone(), shutdown.clone())));
        tasks.push(tokio::spawn(health_task(
            node_client.clone(),
            state_manager.clone(),
            sink,
            shutdown.clone(),
        )));

        info!("xrpl monitor started");
        Ok(MonitorNode {
            config,
            tsdb,
            node_client,
            validations,
            ledger,
            server,
            state_manager,
            shutdown,
            tasks,
        })
    }

    /// When no key is configured, adopt `pubkey_validator` from the HTTP
    /// `server_info`; without a key, validation metrics stay network-only.
    async fn detect_validator_key(node_client: &Arc<NodeClient>, validations: &ValidationsHandler) {
        match node_client.json_rpc("server_info").await {
            Ok(envelope) => match envelope.result()["info"]["pubkey_validator"].as_str() {
                Some(key) if !key.is_empty() && !key.eq_ignore_ascii_case("none") => {
                    info!("detected validator key from server_info");
                    validations.set_our_key(key.to_string());
                }
                _ => warn!(
                    "pubkey_validator not found in server_info; \
                     validation metrics will not be collected"
                ),
            },
            Err(err) => warn!("could not fetch validator key over http: {err}"),
        }
    }

    /// Supervises the listen task until shutdown. A listen exit while the
    /// token is unset means the connection (and the client's own reconnect
    /// budget) died; the supervisor then retries with capped exponential
    /// backoff before giving up for the orchestrator to restart us.
    pub async fn run(mut self) -> Result<()> {
        self.install_signal_handlers();

        let dispatcher: Arc<dyn StreamDispatcher> = Arc::new(StreamHandlers {
            ledger: self.ledger.clone(),
            server: self.server.clone(),
            validations: self.validations.clone(),
        });

        let mut attempt = 0u32;
        let result = loop {
            let listen = self
                .node_client
                .run_listen(dispatcher.clone(), self.shutdown.clone());
            match listen.await {
                Ok(()) => break Ok(()),
                Err(err) if self.shutdown.is_cancelled() => {
                    warn!("listen exited during shutdown: {err}");
                    break Ok(());
                }
                Err(err) => {
                    attempt += 1;
                    if attempt > SUPERVISOR_MAX_ATTEMPTS {
                        error!(
                            "giving up after {SUPERVISOR_MAX_ATTEMPTS} supervisor reconnect \
                             attempts; expecting the orchestrator to restart us"
                        );
                        break Err(anyhow::Error::from(MonitorError::ReconnectExhausted(
                            SUPERVISOR_MAX_ATTEMPTS,
                        )));
                    }
                    let delay = supervisor_delay(attempt);
                    warn!(
                        attempt,
                        max = SUPERVISOR_MAX_ATTEMPTS,
                        ?delay,
                        "websocket supervisor reconnecting ({err})"
                    );
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break Ok(()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    match self.node_client.connect().await {
                        Ok(()) => match self.node_client.subscribe(&SUBSCRIBED_STREAMS).await {
                            Ok(()) => {
                                info!("supervisor reconnected and resubscribed");
                                attempt = 0;
                            }
                            Err(err) => error!("supervisor resubscription failed: {err}"),
                        },
                        Err(err) => error!("supervisor reconnection failed: {err}"),
                    }
                }
            }
        };

        self.shutdown_gracefully().await;
        result
    }

    fn install_signal_handlers(&self) {
        let token = self.shutdown.clone();
        tokio::spawn(async move {
            let interrupted = async {
                tokio::signal::ctrl_c()
                    .await
                    .expect("installing the interrupt handler cannot fail");
            };
            #[cfg(unix)]
            {
                let mut terminate = tokio::signal::unix::signal(
                    tokio::signal::unix::SignalKind::terminate(),
                )
                .expect("installing the terminate handler cannot fail");
                tokio::select! {
                    _ = interrupted => info!("received interrupt, shutting down"),
                    _ = terminate.recv() => info!("received terminate, shutting down"),
                }
            }
            #[cfg(not(unix))]
            {
                interrupted.await;
                info!("received interrupt, shutting down");
            }
            token.cancel();
        });
    }

    async fn shutdown_gracefully(&mut self) {
        info!("shutting down gracefully");
        self.shutdown.cancel();

        // Push the final window view out, then drain whatever is batched.
        self.validations.flush_metrics().await;
        self.tsdb.flush().await;
        self.node_client.disconnect().await;

        for task in self.tasks.drain(..) {
            if tokio::time::timeout(Duration::from_secs(5), task).await.is_err() {
                warn!("background task did not stop within 5s");
            }
        }
        info!(config = ?self.config, "shutdown complete");
    }
}

/// Writes the collector's own uptime every health interval.
async fn uptime_task(sink: Arc<dyn MetricSink>, shutdown: CancellationToken) {
    let started = tokio::time::Instant::now();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(HEALTH_INTERVAL) => {}
        }
        let sample = MetricSample::gauge(
            "xrpl_monitor_uptime_seconds",
            started.elapsed().as_secs_f64(),
        )
        .at(unix_millis_now());
        sink.write(sample, false).await;
    }
}

/// Connection and persistence health every 30 seconds; every tenth cycle
/// also snapshots the critical metrics to the backup layers.
async fn health_task(
    node_client: Arc<NodeClient>,
    state_manager: Arc<StateManager>,
    sink: Arc<dyn MetricSink>,
    shutdown: CancellationToken,
) {
    let mut cycle = 0u64;
    loop {
        node_client.emit_health_metrics(sink.as_ref()).await;
        state_manager.emit_health_metrics(sink.as_ref()).await;

        cycle += 1;
        if cycle % BACKUP_EVERY_CYCLES == 0 {
            state_manager.backup_critical_metrics().await;
            state_manager.check_stale_state();
        }

        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(HEALTH_INTERVAL) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn supervisor_backoff_is_capped_at_sixty_seconds() {
        assert_eq!(supervisor_delay(1), Duration::from_secs(2));
        assert_eq!(supervisor_delay(2), Duration::from_secs(4));
        assert_eq!(supervisor_delay(5), Duration::from_secs(32));
        assert_eq!(supervisor_delay(6), Duration::from_secs(60));
        assert_eq!(supervisor_delay(10), Duration::from_secs(60));
        assert_eq!(supervisor_delay(63), Duration::from_secs(60));
        assert_eq!(supervisor_delay(64), Duration::from_secs(60));
    }
}
