// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Dual-layer persistence for critical metric values: a labeled backup
//! series in the TSDB plus JSON files in the state directory. Recovery
//! prefers the TSDB and falls back to the file.

use crate::tsdb::{MetricSink, TsdbClient};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use xrpl_monitor_types::metric::{unix_millis_now, unix_seconds_now};
use xrpl_monitor_types::{MetricSample, MonitorError, MonitorResult};

/// Seconds without a successful save before the state is considered stale.
const STALE_AFTER_SECS: f64 = 600.0;
/// Consecutive save failures before health drops to failed.
const FAILURES_UNTIL_FAILED: u64 = 3;

/// Metrics backed up every cycle; these are the values whose loss on restart
/// hurts the most.
pub const CRITICAL_METRICS: [&str; 5] = [
    "xrpl_validations_total",
    "xrpl_validation_agreements_1h",
    "xrpl_validation_missed_1h",
    "xrpl_validation_agreements_24h",
    "xrpl_validation_missed_24h",
];

#[derive(Serialize, Deserialize)]
struct StateFile {
    value: f64,
    timestamp: f64,
    metadata: Value,
}

struct HealthCell {
    status: f64,
    last_save_time: f64,
    save_failures: u64,
}

pub struct StateManager {
    tsdb: Arc<TsdbClient>,
    state_dir: PathBuf,
    health: Mutex<HealthCell>,
}

impl StateManager {
    pub fn new(tsdb: Arc<TsdbClient>, state_dir: PathBuf) -> Arc<Self> {
        info!(state_dir = %state_dir.display(), "state manager initialized");
        Arc::new(Self {
            tsdb,
            state_dir,
            health: Mutex::new(HealthCell {
                status: 1.0,
                last_save_time: 0.0,
                save_failures: 0,
            }),
        })
    }

    /// Startup gate: the directory must exist and take a write, otherwise
    /// every restart silently loses counters. Failing here is fatal.
    pub fn validate_state_directory(&self) -> MonitorResult<()> {
        std::fs::create_dir_all(&self.state_dir)
            .map_err(|err| MonitorError::StateDirUnwritable(format!("{err}")))?;
        let probe = self.state_dir.join(".write_test");
        std::fs::write(&probe, "test")
            .and_then(|_| std::fs::remove_file(&probe))
            .map_err(|err| {
                MonitorError::StateDirUnwritable(format!(
                    "{}: {err}",
                    self.state_dir.display()
                ))
            })?;
        info!(state_dir = %self.state_dir.display(), "state directory validated");
        Ok(())
    }

    /// Writes one value to both layers. Failures degrade health but never
    /// propagate; the backup loop keeps running.
    pub async fn save_state(&self, metric_name: &str, value: f64, metadata: Value) {
        let backup = MetricSample::gauge("xrpl_state_backup", value)
            .with_label("metric", metric_name)
            .with_label("type", "server_state_backup")
            .at(unix_millis_now());
        self.tsdb.write(backup, false).await;

        let file = StateFile {
            value,
            timestamp: unix_seconds_now(),
            metadata,
        };
        let path = self.state_dir.join(format!("{metric_name}.json"));
        let result = serde_json::to_string_pretty(&file)
            .map_err(|err| err.to_string())
            .and_then(|body| std::fs::write(&path, body).map_err(|err| err.to_string()));

        let mut health = self.health.lock();
        match result {
            Ok(()) => {
                health.last_save_time = unix_seconds_now();
                health.save_failures = 0;
                health.status = 1.0;
                debug!(metric_name, value, "state saved");
            }
            Err(err) => {
                health.save_failures += 1;
                health.status = if health.save_failures >= FAILURES_UNTIL_FAILED {
                    0.0
                } else {
                    0.5
                };
                error!(metric_name, "state save failed: {err}");
            }
        }
    }

    /// TSDB backup first, JSON file second, `None` on a genuinely fresh
    /// start.
    pub async fn recover_state(&self, metric_name: &str) -> Option<f64> {
        if let Some(value) = self.recover_from_tsdb(metric_name).await {
            info!(metric_name, value, "recovered state from tsdb backup");
            return Some(value);
        }
        if let Some(value) = self.recover_from_file(metric_name) {
            info!(metric_name, value, "recovered state from file backup");
            return Some(value);
        }
        info!(metric_name, "no backup found (starting fresh)");
        None
    }

    async fn recover_from_tsdb(&self, metric_name: &str) -> Option<f64> {
        let query =
            format!("xrpl_state_backup{{metric=\"{metric_name}\", type=\"server_state_backup\"}}");
        match self.tsdb.query(&query).await {
            Ok(response) => response.first_value(),
            Err(err) => {
                debug!(metric_name, "tsdb recovery failed: {err}");
                None
            }
        }
    }

    fn recover_from_file(&self, metric_name: &str) -> Option<f64> {
        let path = self.state_dir.join(format!("{metric_name}.json"));
        let body = std::fs::read_to_string(path).ok()?;
        let file: StateFile = serde_json::from_str(&body)
            .map_err(|err| debug!(metric_name, "state file decode failed: {err}"))
            .ok()?;
        Some(file.value)
    }

    /// One backup cycle: query the live value of each critical metric and
    /// persist it under its unprefixed name.
    pub async fn backup_critical_metrics(&self) {
        for metric_name in CRITICAL_METRICS {
            let value = match self.tsdb.query(metric_name).await {
                Ok(response) => response.first_value(),
                Err(err) => {
                    debug!(metric_name, "backup query failed: {err}");
                    continue;
                }
            };
            if let Some(value) = value {
                let backup_name = metric_name.trim_start_matches("xrpl_");
                self.save_state(backup_name, value, Value::Object(Default::default()))
                    .await;
            }
        }
    }

    pub async fn emit_health_metrics(&self, sink: &dyn MetricSink) {
        let (status, label, last_save, failures) = {
            let health = self.health.lock();
            (
                health.status,
                health_label(health.status),
                health.last_save_time,
                health.save_failures,
            )
        };
        let timestamp = unix_millis_now();
        sink.write_batch(
            vec![
                MetricSample::gauge("xrpl_state_health", status)
                    .with_label("status", label)
                    .at(timestamp),
                MetricSample::gauge("xrpl_state_last_save_timestamp", last_save).at(timestamp),
                MetricSample::gauge("xrpl_state_save_failures_total", failures as f64)
                    .at(timestamp),
            ],
            false,
        )
        .await;
    }

    /// Warns when too long has passed since the last successful save; a
    /// saved-nothing-yet manager is not stale.
    pub fn check_stale_state(&self) -> bool {
        let last_save = self.health.lock().last_save_time;
        if last_save == 0.0 {
            return false;
        }
        let since = unix_seconds_now() - last_save;
        if since > STALE_AFTER_SECS {
            warn!(seconds_since_save = since as u64, "state may be stale, possible write issue");
            return true;
        }
        false
    }
}

fn health_label(status: f64) -> &'static str {
    if status >= 1.0 {
        "ok"
    } else if status >= 0.5 {
        "degraded"
    } else {
        "failed"
    }
}
