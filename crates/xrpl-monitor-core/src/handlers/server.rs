// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! `serverStatus` stream handler: numeric state, time-in-state, transition
//! counter. The labeled `xrpl_validator_state_info` series is owned by the
//! HTTP poller, which has the full label set; it is deliberately not written
//! here.

use crate::tsdb::MetricSink;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{info, warn};
use xrpl_monitor_types::events::ServerStatusEvent;
use xrpl_monitor_types::metric::{unix_millis_now, unix_seconds_now};
use xrpl_monitor_types::{MetricSample, ValidatorState};

struct ServerStateCell {
    current: Option<String>,
    state_since: Option<f64>,
    state_changes: u64,
    last_changes_written: u64,
}

pub struct ServerHandler {
    sink: Arc<dyn MetricSink>,
    state: Mutex<ServerStateCell>,
}

impl ServerHandler {
    pub fn new(sink: Arc<dyn MetricSink>) -> Arc<Self> {
        Arc::new(Self {
            sink,
            state: Mutex::new(ServerStateCell {
                current: None,
                state_since: None,
                state_changes: 0,
                last_changes_written: 0,
            }),
        })
    }

    pub async fn handle(&self, event: &ServerStatusEvent) {
        let Some(status) = event.server_status.as_deref() else {
            warn!("server message missing server_status");
            return;
        };
        let new_state = status.to_ascii_lowercase();

        let samples = {
            let mut state = self.state.lock();
            if state.current.as_deref() != Some(new_state.as_str()) {
                state.state_changes += 1;
                info!(
                    from = state.current.as_deref().unwrap_or("none"),
                    to = %new_state,
                    total_changes = state.state_changes,
                    "validator state transition"
                );
                state.current = Some(new_state.clone());
                state.state_since = Some(unix_seconds_now());
            }

            let time_in_state = state
                .state_since
                .map(|since| (unix_seconds_now() - since).max(0.0))
                .unwrap_or(0.0);
            let state_value = ValidatorState::from_status(&new_state).value();
            let timestamp = unix_millis_now();

            let mut samples = vec![
                MetricSample::gauge("xrpl_validator_state_value", state_value as f64)
                    .at(timestamp),
                MetricSample::gauge("xrpl_time_in_current_state_seconds", time_in_state)
                    .at(timestamp),
            ];
            // Written whenever the counter has not gone backwards, which for
            // a monotonic counter is every time. The gate mirrors the
            // analogous jq_trans_overflow handling in the poller.
            if state.state_changes >= state.last_changes_written {
                samples.push(
                    MetricSample::counter(
                        "xrpl_state_changes_total",
                        state.state_changes as f64,
                    )
                    .at(timestamp),
                );
                state.last_changes_written = state.state_changes;
            }
            samples
        };

        self.sink.write_batch(samples, false).await;
    }

    pub fn current_state(&self) -> Option<String> {
        self.state.lock().current.clone()
    }

    pub fn state_changes(&self) -> u64 {
        self.state.lock().state_changes
    }
}
