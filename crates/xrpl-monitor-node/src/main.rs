// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use xrpl_monitor_config::MonitorConfig;
use xrpl_monitor_node::MonitorNode;

fn init_logging(level: &str) {
    let filter = EnvFilter::try_new(level.to_ascii_lowercase())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

#[tokio::main]
async fn main() {
    let config = match MonitorConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err:#}");
            std::process::exit(1);
        }
    };
    init_logging(&config.log_level);
    info!(?config, "xrpl validator monitor starting");

    let node = match MonitorNode::start(config).await {
        Ok(node) => node,
        Err(err) => {
            error!("fatal startup error: {err:#}");
            std::process::exit(1);
        }
    };

    match node.run().await {
        Ok(()) => info!("shutdown complete"),
        Err(err) => {
            error!("monitor exited with error: {err:#}");
            std::process::exit(1);
        }
    }
}
