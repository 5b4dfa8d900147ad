// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Real-time exporter: an in-process HTTP service that serves the most
//! latency-sensitive validator values straight from memory, bypassing TSDB
//! ingestion lag.

pub mod crawl;
pub mod metrics;
pub mod poll;
pub mod query;
pub mod server;
pub mod snapshot;
pub mod version;

use crawl::CrawlAdvisor;
use metrics::ExporterMetrics;
use poll::ExporterPollers;
use server::{start_server, AppState};
use snapshot::SharedSnapshot;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Clone, Debug)]
pub struct ExporterConfig {
    pub http_url: String,
    pub port: u16,
    pub instance_label: String,
    pub poll_interval: Duration,
    pub peers_poll_interval: Duration,
    /// 0 disables the upgrade advisor.
    pub peer_crawl_port: u16,
    pub peer_crawl_interval: Duration,
}

/// Starts the exporter: HTTP server, the two snapshot pollers, and the
/// optional peer-version crawl. Returns the bound address and the task
/// handles.
pub fn spawn_exporter(
    config: ExporterConfig,
    shutdown: CancellationToken,
) -> anyhow::Result<(SocketAddr, Vec<JoinHandle<()>>)> {
    let shared = SharedSnapshot::new();
    let state = Arc::new(AppState {
        shared: shared.clone(),
        metrics: ExporterMetrics::new(&config.instance_label),
        instance: config.instance_label.clone(),
    });

    let (addr, server_handle) = start_server(state, config.port, shutdown.clone())?;
    let mut handles = vec![server_handle];

    handles.extend(
        ExporterPollers::new(
            &config.http_url,
            config.poll_interval,
            config.peers_poll_interval,
            shared.clone(),
        )
        .spawn(shutdown.clone()),
    );

    if config.peer_crawl_port != 0 {
        let host = url::Url::parse(&config.http_url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .unwrap_or_else(|| "localhost".to_string());
        let advisor = CrawlAdvisor::new(
            &host,
            config.peer_crawl_port,
            config.peer_crawl_interval,
            shared,
        );
        handles.push(tokio::spawn(advisor.run(shutdown)));
    } else {
        info!("peer-version crawl disabled (PEER_CRAWL_PORT=0)");
    }

    Ok((addr, handles))
}
