// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Batching writer and query client for the VictoriaMetrics-compatible TSDB.
//!
//! Writes never fail upward: after retry exhaustion the batch is discarded
//! with an error log. Liveness of the event pipeline wins over durability of
//! individual samples.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;
use tracing::{debug, error, warn};
use xrpl_monitor_types::rpc::QueryResponse;
use xrpl_monitor_types::{MetricSample, MonitorError, MonitorResult};

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Write seam between metric producers and the TSDB. Implemented by
/// [`TsdbClient`] in production and by an in-memory collector in tests.
#[async_trait]
pub trait MetricSink: Send + Sync {
    async fn write(&self, sample: MetricSample, flush_immediately: bool);
    async fn write_batch(&self, samples: Vec<MetricSample>, flush_immediately: bool);
    async fn flush(&self);
}

pub struct TsdbClient {
    base_url: String,
    import_url: String,
    client: reqwest::Client,
    batch_size: usize,
    max_retries: u32,
    batch: Mutex<Vec<MetricSample>>,
}

impl TsdbClient {
    pub fn new(base_url: &str) -> Self {
        Self::with_limits(base_url, DEFAULT_BATCH_SIZE, DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT)
    }

    pub fn with_limits(
        base_url: &str,
        batch_size: usize,
        max_retries: u32,
        timeout: Duration,
    ) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        let import_url = format!("{base_url}/api/v1/import/prometheus");
        Self {
            base_url,
            import_url,
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .expect("building the TSDB http client cannot fail"),
            batch_size,
            max_retries,
            batch: Mutex::new(Vec::new()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// True when the TSDB answers its health probe.
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self.client.get(&url).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(status = %response.status(), "tsdb health check failed");
                false
            }
            Err(err) => {
                warn!("tsdb health check error: {err}");
                false
            }
        }
    }

    /// Instant-vector query.
    pub async fn query(&self, expr: &str) -> MonitorResult<QueryResponse> {
        let url = format!("{}/api/v1/query", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("query", expr)])
            .send()
            .await
            .map_err(|e| MonitorError::TsdbQuery(e.to_string()))?;
        if !response.status().is_success() {
            return Err(MonitorError::TsdbQuery(format!(
                "query `{expr}` returned {}",
                response.status()
            )));
        }
        response
            .json::<QueryResponse>()
            .await
            .map_err(|e| MonitorError::TsdbQuery(e.to_string()))
    }

    /// Range (matrix) query with Unix-second bounds.
    pub async fn query_range(
        &self,
        expr: &str,
        start: i64,
        end: i64,
        step: &str,
    ) -> MonitorResult<QueryResponse> {
        let url = format!("{}/api/v1/query_range", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("query", expr.to_string()),
                ("start", start.to_string()),
                ("end", end.to_string()),
                ("step", step.to_string()),
            ])
            .send()
            .await
            .map_err(|e| MonitorError::TsdbQuery(e.to_string()))?;
        if !response.status().is_success() {
            return Err(MonitorError::TsdbQuery(format!(
                "range query `{expr}` returned {}",
                response.status()
            )));
        }
        response
            .json::<QueryResponse>()
            .await
            .map_err(|e| MonitorError::TsdbQuery(e.to_string()))
    }

    /// Drains the batch under the lock and sends the rendered lines after
    /// releasing it, so a slow TSDB never blocks producers.
    async fn flush_now(&self) {
        let drained: Vec<MetricSample> = {
            let mut batch = self.batch.lock();
            std::mem::take(&mut *batch)
        };
        if drained.is_empty() {
            return;
        }
        let count = drained.len();
        let body = drained
            .iter()
            .map(MetricSample::to_exposition_line)
            .collect::<Vec<_>>()
            .join("\n");
        if let Err(err) = self.send_with_retries(&body, count).await {
            error!("{err}");
        }
    }

    async fn send_with_retries(&self, body: &str, count: usize) -> MonitorResult<()> {
        for attempt in 1..=self.max_retries {
            match self
                .client
                .post(&self.import_url)
                .header("Content-Type", "text/plain")
                .body(body.to_string())
                .send()
                .await
            {
                Ok(response) if matches!(response.status().as_u16(), 200 | 204) => {
                    debug!(count, "wrote metrics batch to tsdb");
                    return Ok(());
                }
                Ok(response) => {
                    warn!(
                        attempt,
                        max = self.max_retries,
                        status = %response.status(),
                        "tsdb write failed"
                    );
                }
                Err(err) if err.is_timeout() => {
                    warn!(attempt, max = self.max_retries, "tsdb write timeout");
                }
                Err(err) => {
                    warn!(attempt, max = self.max_retries, "tsdb write error: {err}");
                }
            }
            if attempt < self.max_retries {
                tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
            }
        }
        Err(MonitorError::TsdbWriteExhausted {
            attempts: self.max_retries,
        })
    }
}

#[async_trait]
impl MetricSink for TsdbClient {
    async fn write(&self, sample: MetricSample, flush_immediately: bool) {
        let should_flush = {
            let mut batch = self.batch.lock();
            batch.push(sample);
            flush_immediately || batch.len() >= self.batch_size
        };
        if should_flush {
            self.flush_now().await;
        }
    }

    async fn write_batch(&self, samples: Vec<MetricSample>, flush_immediately: bool) {
        let should_flush = {
            let mut batch = self.batch.lock();
            batch.extend(samples);
            flush_immediately || batch.len() >= self.batch_size
        };
        if should_flush {
            self.flush_now().await;
        }
    }

    async fn flush(&self) {
        self.flush_now().await;
    }
}
