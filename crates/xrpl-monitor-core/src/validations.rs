// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Validation reconciliation engine.
//!
//! Correlates two independent streams per ledger: the consensus hash from
//! `ledgerClosed` and our validator's hash from `validationReceived`. Either
//! event may arrive first. A pending record is finalized once the grace
//! period after close expires, contributing exactly one net increment to the
//! agreement/missed counters; a "missed" verdict can still be repaired by a
//! late validation inside the repair window.
//!
//! Windowed gauges (1h/24h) are computed from in-memory deques plus a
//! linearly decaying baseline recovered from the TSDB at startup, which keeps
//! the sliding-window view continuous across collector restarts without
//! double counting.

use crate::tsdb::{MetricSink, TsdbClient};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use xrpl_monitor_types::events::ValidationEvent;
use xrpl_monitor_types::metric::{unix_millis_now, unix_seconds_now};
use xrpl_monitor_types::MetricSample;

/// Seconds to wait after a ledger close before a missing validation counts
/// as missed.
pub const GRACE_PERIOD: Duration = Duration::from_secs(8);
/// Window in which a late validation can overturn a missed verdict.
pub const LATE_REPAIR_WINDOW: Duration = Duration::from_secs(300);
/// Finalized records are dropped this long after close.
pub const CLEANUP_AGE: Duration = Duration::from_secs(600);
pub const RECONCILIATION_INTERVAL: Duration = Duration::from_secs(1);

pub const WINDOW_1H_SECS: f64 = 3600.0;
pub const WINDOW_24H_SECS: f64 = 86400.0;

const SEEN_LEDGERS_MAX: usize = 2000;
const SEEN_LEDGERS_EVICT: usize = 500;

/// Tolerance for clock skew and minute rounding when comparing uptimes for
/// restart detection.
const UPTIME_TOLERANCE_SECS: f64 = 120.0;
const UPTIME_LOOKBACK_SECS: i64 = 300;

#[derive(Clone, Copy, Debug)]
struct ValidationRecord {
    timestamp: f64,
    agreed: bool,
}

/// A ledger awaiting reconciliation. Created by whichever of the two events
/// arrives first.
#[derive(Debug)]
struct PendingLedger {
    consensus_hash: Option<String>,
    our_hash: Option<String>,
    closed_at: Option<Instant>,
    validated_at: Option<Instant>,
    finalized: bool,
    finalized_as_missed_at: Option<Instant>,
}

impl PendingLedger {
    fn empty() -> Self {
        Self {
            consensus_hash: None,
            our_hash: None,
            closed_at: None,
            validated_at: None,
            finalized: false,
            finalized_as_missed_at: None,
        }
    }
}

#[derive(Clone, Copy, Default)]
struct RecoveryBaseline {
    agreements_1h: Option<u64>,
    missed_1h: Option<u64>,
    agreements_24h: Option<u64>,
    missed_24h: Option<u64>,
    recovery_time: Option<f64>,
}

struct EngineState {
    window_1h: VecDeque<ValidationRecord>,
    window_24h: VecDeque<ValidationRecord>,
    seen_ledgers: BTreeSet<u64>,
    pending: BTreeMap<u64, PendingLedger>,
    validations_checked_total: u64,
    validations_total: u64,
    agreements_total: u64,
    missed_total: u64,
    baseline: RecoveryBaseline,
}

impl EngineState {
    fn new() -> Self {
        Self {
            window_1h: VecDeque::new(),
            window_24h: VecDeque::new(),
            seen_ledgers: BTreeSet::new(),
            pending: BTreeMap::new(),
            validations_checked_total: 0,
            validations_total: 0,
            agreements_total: 0,
            missed_total: 0,
            baseline: RecoveryBaseline::default(),
        }
    }

    fn push_record(&mut self, record: ValidationRecord) {
        self.window_1h.push_back(record);
        self.window_24h.push_back(record);
    }

    fn prune_windows(&mut self, now: f64) {
        while self
            .window_1h
            .front()
            .is_some_and(|r| now - r.timestamp > WINDOW_1H_SECS)
        {
            self.window_1h.pop_front();
        }
        while self
            .window_24h
            .front()
            .is_some_and(|r| now - r.timestamp > WINDOW_24H_SECS)
        {
            self.window_24h.pop_front();
        }
    }
}

/// Counts from one window deque combined with the decayed recovery baseline.
fn window_counts(
    deque: &VecDeque<ValidationRecord>,
    baseline_agreed: Option<u64>,
    baseline_missed: Option<u64>,
    recovery_time: Option<f64>,
    window_secs: f64,
    now: f64,
) -> (u64, u64, f64) {
    let mut agreed = deque.iter().filter(|r| r.agreed).count() as u64;
    let mut missed = deque.len() as u64 - agreed;

    if let (Some(recovered_at), Some(base_agreed)) = (recovery_time, baseline_agreed) {
        let age = now - recovered_at;
        if age >= 0.0 && age < window_secs {
            // The baseline decays at exactly the rate its events would be
            // aging out of the window.
            let decay = 1.0 - age / window_secs;
            agreed += (base_agreed as f64 * decay).round() as u64;
            missed += (baseline_missed.unwrap_or(0) as f64 * decay).round() as u64;
        }
    }

    let total = agreed + missed;
    let pct = if total > 0 {
        agreed as f64 / total as f64 * 100.0
    } else {
        0.0
    };
    (agreed, missed, pct)
}

/// True when the uptime comparison says rippled itself restarted inside the
/// lookback, in which case `validations_total` starts over from zero.
fn rippled_restarted(past_uptime: f64, current_uptime: f64) -> bool {
    current_uptime < past_uptime - UPTIME_TOLERANCE_SECS
}

pub struct ValidationsHandler {
    sink: Arc<dyn MetricSink>,
    our_key: RwLock<Option<String>>,
    state: Mutex<EngineState>,
}

impl ValidationsHandler {
    pub fn new(sink: Arc<dyn MetricSink>, our_key: Option<String>) -> Arc<Self> {
        info!(
            validator_key = if our_key.is_some() { "configured" } else { "not set" },
            "validations handler initialized"
        );
        Arc::new(Self {
            sink,
            our_key: RwLock::new(our_key),
            state: Mutex::new(EngineState::new()),
        })
    }

    pub fn set_our_key(&self, key: String) {
        info!("validator key set");
        *self.our_key.write() = Some(key);
    }

    pub fn agreements_total(&self) -> u64 {
        self.state.lock().agreements_total
    }

    pub fn missed_total(&self) -> u64 {
        self.state.lock().missed_total
    }

    pub fn validations_total(&self) -> u64 {
        self.state.lock().validations_total
    }

    pub fn validations_checked_total(&self) -> u64 {
        self.state.lock().validations_checked_total
    }

    /// Callback from the ledger handler: records the consensus hash and
    /// starts the grace clock if this is the first sighting of the ledger.
    pub async fn on_ledger_closed(&self, ledger_index: u64, consensus_hash: &str) {
        let mut state = self.state.lock();
        let record = state
            .pending
            .entry(ledger_index)
            .or_insert_with(PendingLedger::empty);
        record.consensus_hash = Some(consensus_hash.to_string());
        if record.closed_at.is_none() {
            record.closed_at = Some(Instant::now());
        }
        debug!(
            ledger_index,
            our_hash_known = record.our_hash.is_some(),
            "consensus hash recorded"
        );
    }

    /// Validation stream hot path.
    pub async fn handle(&self, event: &ValidationEvent) {
        let Some(ledger_index) = event.ledger_index else {
            warn!("validation message missing ledger_index");
            return;
        };

        let (event_sample, gauge_samples) = {
            let mut state = self.state.lock();
            state.validations_checked_total += 1;

            let our_key = self.our_key.read().clone();
            let Some(our_key) = our_key else {
                return;
            };
            if !event.is_from(&our_key) {
                return;
            }

            if state.seen_ledgers.contains(&ledger_index) {
                debug!(ledger_index, "skipping duplicate validation");
                return;
            }
            state.seen_ledgers.insert(ledger_index);
            if state.seen_ledgers.len() > SEEN_LEDGERS_MAX {
                let evict: Vec<u64> = state
                    .seen_ledgers
                    .iter()
                    .take(SEEN_LEDGERS_EVICT)
                    .copied()
                    .collect();
                for index in evict {
                    state.seen_ledgers.remove(&index);
                }
            }

            // Register our hash for reconciliation; the verdict itself waits
            // for the grace period.
            if let Some(our_hash) = event.ledger_hash.as_deref() {
                let record = state
                    .pending
                    .entry(ledger_index)
                    .or_insert_with(PendingLedger::empty);
                record.our_hash = Some(our_hash.to_string());
                if record.validated_at.is_none() {
                    record.validated_at = Some(Instant::now());
                }
                debug!(
                    ledger_index,
                    consensus_known = record.consensus_hash.is_some(),
                    "our validation recorded"
                );
            }

            // Tentative verdict for the gauge deques only: agreement unless a
            // known consensus hash says otherwise. Authoritative counting
            // happens in the reconciliation cycle.
            let agreed = match (
                event.ledger_hash.as_deref(),
                state
                    .pending
                    .get(&ledger_index)
                    .and_then(|r| r.consensus_hash.as_deref()),
            ) {
                (Some(ours), Some(consensus)) => ours == consensus,
                _ => true,
            };

            let now = unix_seconds_now();
            let record = ValidationRecord {
                timestamp: now,
                agreed,
            };
            state.validations_total += 1;
            state.push_record(record);
            state.prune_windows(now);

            (validation_event_sample(&record), gauge_samples(&state, now))
        };

        // Persisted per event so the deques can be rebuilt after a restart.
        self.sink.write(event_sample, false).await;
        self.sink.write_batch(gauge_samples, true).await;
    }

    /// One reconciliation cycle over all pending ledgers, in key order.
    pub async fn reconcile_once(&self) {
        let now = Instant::now();
        let event_samples = {
            let mut state = self.state.lock();
            let mut to_remove: Vec<u64> = Vec::new();
            let mut missed_events: Vec<MetricSample> = Vec::new();
            let mut agreements = state.agreements_total;
            let mut missed = state.missed_total;
            let mut window_records: Vec<ValidationRecord> = Vec::new();

            for (&ledger_index, record) in state.pending.iter_mut() {
                let Some(consensus_hash) = record.consensus_hash.clone() else {
                    continue;
                };
                let Some(closed_at) = record.closed_at else {
                    continue;
                };
                let age = now.saturating_duration_since(closed_at);

                // Late repair: a validation that arrived after the missed
                // verdict undoes it, inside the repair window.
                if record.finalized {
                    if let (Some(finalized_at), Some(our_hash)) =
                        (record.finalized_as_missed_at, record.our_hash.as_deref())
                    {
                        let repair_age = now.saturating_duration_since(finalized_at);
                        if repair_age <= LATE_REPAIR_WINDOW {
                            info!(
                                ledger_index,
                                repair_age_secs = repair_age.as_secs_f64(),
                                "late repair: validation arrived after missed verdict"
                            );
                            missed = missed.saturating_sub(1);
                            if our_hash == consensus_hash {
                                agreements += 1;
                                info!(ledger_index, "repaired as agreement");
                            } else {
                                missed += 1;
                                info!(ledger_index, "repaired as disagreement");
                            }
                            record.finalized_as_missed_at = None;
                        }
                    }
                }

                if record.finalized && age > CLEANUP_AGE {
                    to_remove.push(ledger_index);
                    continue;
                }

                if !record.finalized && age > GRACE_PERIOD {
                    match record.our_hash.as_deref() {
                        Some(ours) if ours == consensus_hash => {
                            agreements += 1;
                            debug!(ledger_index, "reconciled: agreed");
                        }
                        Some(_) => {
                            missed += 1;
                            debug!(ledger_index, "reconciled: disagreed");
                        }
                        None => {
                            missed += 1;
                            record.finalized_as_missed_at = Some(now);
                            let missed_record = ValidationRecord {
                                timestamp: unix_seconds_now(),
                                agreed: false,
                            };
                            window_records.push(missed_record);
                            missed_events.push(validation_event_sample(&missed_record));
                            debug!(ledger_index, "reconciled: missed (no validation sent)");
                        }
                    }
                    record.finalized = true;
                }
            }

            state.agreements_total = agreements;
            state.missed_total = missed;
            for record in window_records {
                state.push_record(record);
            }
            let removed = to_remove.len();
            for index in to_remove {
                state.pending.remove(&index);
            }
            if removed > 0 {
                debug!(removed, "cleaned up finalized pending ledgers");
            }
            missed_events
        };

        for sample in event_samples {
            self.sink.write(sample, false).await;
        }
    }

    /// Periodic reconciliation task.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(
            grace_secs = GRACE_PERIOD.as_secs(),
            late_repair_secs = LATE_REPAIR_WINDOW.as_secs(),
            cleanup_secs = CLEANUP_AGE.as_secs(),
            "reconciliation task started"
        );
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("reconciliation task stopped");
                    return;
                }
                _ = tokio::time::sleep(RECONCILIATION_INTERVAL) => {}
            }
            self.reconcile_once().await;
        }
    }

    /// Emits the gauge set once more; used at shutdown so the last window
    /// view reaches the TSDB.
    pub async fn flush_metrics(&self) {
        let samples = {
            let state = self.state.lock();
            gauge_samples(&state, unix_seconds_now())
        };
        self.sink.write_batch(samples, false).await;
    }

    /// Startup recovery from the TSDB: monotonic counters continue from their
    /// highest recent value, windowed gauges become decaying baselines. Every
    /// failure here is absorbed; a cold start is always acceptable.
    pub async fn recover_from_tsdb(&self, tsdb: &TsdbClient) {
        info!("recovering validation history from tsdb");
        self.recover_checked_counter(tsdb).await;
        self.recover_validations_total(tsdb).await;
        self.recover_verdict_counters(tsdb).await;
        self.recover_window_gauges(tsdb).await;
        info!("validation recovery complete");
    }

    async fn recover_checked_counter(&self, tsdb: &TsdbClient) {
        match tsdb
            .query("max_over_time(xrpl_validations_checked_total[24h])")
            .await
        {
            Ok(response) => match response.first_value() {
                Some(value) => {
                    self.state.lock().validations_checked_total = value as u64;
                    info!(recovered = value as u64, "recovered validations checked counter");
                }
                None => info!("no previous validations checked counter (starting from 0)"),
            },
            Err(err) => warn!("validations checked recovery failed: {err}"),
        }
    }

    /// `validations_total` counts since the *validator's* last restart, so it
    /// is only carried over when the uptime series says rippled kept running.
    async fn recover_validations_total(&self, tsdb: &TsdbClient) {
        let now = unix_seconds_now() as i64;
        let past_uptime = tsdb
            .query_range(
                "xrpl_validator_uptime_seconds",
                now - UPTIME_LOOKBACK_SECS,
                now,
                "60s",
            )
            .await
            .ok()
            .and_then(|r| r.first_range_value());

        let Some(past_uptime) = past_uptime else {
            info!("no historical rippled uptime data, recovering counter without restart check");
            self.recover_total_counter(tsdb).await;
            return;
        };

        let current_uptime = tsdb
            .query("xrpl_validator_uptime_seconds")
            .await
            .ok()
            .and_then(|r| r.first_value());
        let Some(current_uptime) = current_uptime else {
            warn!("cannot determine current rippled uptime, recovering counter anyway");
            self.recover_total_counter(tsdb).await;
            return;
        };

        if rippled_restarted(past_uptime, current_uptime) {
            info!(
                past_uptime,
                current_uptime, "rippled restart detected, resetting validations counter to 0"
            );
            self.state.lock().validations_total = 0;
        } else {
            info!(past_uptime, current_uptime, "rippled still running, recovering counter");
            self.recover_total_counter(tsdb).await;
        }
    }

    async fn recover_total_counter(&self, tsdb: &TsdbClient) {
        match tsdb.query("max_over_time(xrpl_validations_total[24h])").await {
            Ok(response) => match response.first_value() {
                Some(value) => {
                    self.state.lock().validations_total = value as u64;
                    info!(recovered = value as u64, "recovered validations_total counter");
                }
                None => info!("no previous validations_total counter (starting from 0)"),
            },
            Err(err) => warn!("validations_total recovery failed: {err}"),
        }
    }

    async fn recover_verdict_counters(&self, tsdb: &TsdbClient) {
        for (query, which) in [
            ("max_over_time(xrpl_validation_agreements_total[24h])", true),
            ("max_over_time(xrpl_validation_missed_total[24h])", false),
        ] {
            match tsdb.query(query).await {
                Ok(response) => match response.first_value() {
                    Some(value) => {
                        let mut state = self.state.lock();
                        if which {
                            state.agreements_total = value as u64;
                        } else {
                            state.missed_total = value as u64;
                        }
                        info!(
                            recovered = value as u64,
                            counter = if which { "agreements" } else { "missed" },
                            "recovered verdict counter"
                        );
                    }
                    None => info!("no previous verdict counter (starting from 0)"),
                },
                Err(err) => warn!("verdict counter recovery failed: {err}"),
            }
        }
    }

    /// Windowed gauges can fall as events age out, so recovery reads the
    /// *last* value over a short lookback, not the maximum.
    async fn recover_window_gauges(&self, tsdb: &TsdbClient) {
        let mut recovered: Vec<(&'static str, u64)> = Vec::new();
        for name in [
            "xrpl_validation_agreements_1h",
            "xrpl_validation_missed_1h",
            "xrpl_validation_agreements_24h",
            "xrpl_validation_missed_24h",
        ] {
            let value = match tsdb.query(&format!("last_over_time({name}[5m])")).await {
                Ok(response) => response.first_value(),
                Err(err) => {
                    warn!("gauge recovery query failed for {name}: {err}");
                    None
                }
            };
            match value {
                Some(value) => {
                    info!(gauge = name, recovered = value as u64, "recovered window gauge");
                    recovered.push((name, value as u64));
                }
                None => info!(gauge = name, "no previous gauge value (will start fresh)"),
            }
        }
        if recovered.is_empty() {
            info!("no previous agreement gauges found (fresh start)");
            return;
        }

        let now = unix_seconds_now();
        let timestamp = unix_millis_now();
        let mut samples: Vec<MetricSample> = Vec::new();
        {
            let mut state = self.state.lock();
            for (name, value) in &recovered {
                match *name {
                    "xrpl_validation_agreements_1h" => state.baseline.agreements_1h = Some(*value),
                    "xrpl_validation_missed_1h" => state.baseline.missed_1h = Some(*value),
                    "xrpl_validation_agreements_24h" => {
                        state.baseline.agreements_24h = Some(*value)
                    }
                    "xrpl_validation_missed_24h" => state.baseline.missed_24h = Some(*value),
                    _ => {}
                }
                samples.push(MetricSample::gauge(*name, *value as f64).at(timestamp));
            }
            state.baseline.recovery_time = Some(now);

            let agreed_1h = state.baseline.agreements_1h.unwrap_or(0);
            let missed_1h = state.baseline.missed_1h.unwrap_or(0);
            if agreed_1h + missed_1h > 0 {
                let pct = agreed_1h as f64 / (agreed_1h + missed_1h) as f64 * 100.0;
                samples.push(MetricSample::gauge("xrpl_validation_agreement_pct_1h", pct).at(timestamp));
            }
            let agreed_24h = state.baseline.agreements_24h.unwrap_or(0);
            let missed_24h = state.baseline.missed_24h.unwrap_or(0);
            if agreed_24h + missed_24h > 0 {
                let pct = agreed_24h as f64 / (agreed_24h + missed_24h) as f64 * 100.0;
                samples
                    .push(MetricSample::gauge("xrpl_validation_agreement_pct_24h", pct).at(timestamp));
            }
        }

        // Flushed immediately so the dashboard shows continuity right away.
        let count = samples.len();
        self.sink.write_batch(samples, true).await;
        info!(count, "flushed recovered gauges to tsdb");
    }
}

fn validation_event_sample(record: &ValidationRecord) -> MetricSample {
    // No ledger_index label: one series per verdict, not per ledger, keeps
    // cardinality bounded on a stream that never stops.
    MetricSample::gauge("xrpl_validation_event", if record.agreed { 1.0 } else { 0.0 })
        .with_label("agreed", if record.agreed { "true" } else { "false" })
        .at((record.timestamp * 1000.0) as i64)
}

fn gauge_samples(state: &EngineState, now: f64) -> Vec<MetricSample> {
    let (agreed_1h, missed_1h, pct_1h) = window_counts(
        &state.window_1h,
        state.baseline.agreements_1h,
        state.baseline.missed_1h,
        state.baseline.recovery_time,
        WINDOW_1H_SECS,
        now,
    );
    let (agreed_24h, missed_24h, pct_24h) = window_counts(
        &state.window_24h,
        state.baseline.agreements_24h,
        state.baseline.missed_24h,
        state.baseline.recovery_time,
        WINDOW_24H_SECS,
        now,
    );

    let timestamp = (now * 1000.0) as i64;
    vec![
        MetricSample::counter(
            "xrpl_validations_checked_total",
            state.validations_checked_total as f64,
        )
        .at(timestamp),
        MetricSample::counter("xrpl_validations_total", state.validations_total as f64)
            .at(timestamp),
        MetricSample::counter(
            "xrpl_validation_agreements_total",
            state.agreements_total as f64,
        )
        .at(timestamp),
        MetricSample::counter("xrpl_validation_missed_total", state.missed_total as f64)
            .at(timestamp),
        MetricSample::gauge("xrpl_validation_agreement_pct_1h", pct_1h).at(timestamp),
        MetricSample::gauge("xrpl_validation_agreements_1h", agreed_1h as f64).at(timestamp),
        MetricSample::gauge("xrpl_validation_missed_1h", missed_1h as f64).at(timestamp),
        MetricSample::gauge("xrpl_validation_agreement_pct_24h", pct_24h).at(timestamp),
        MetricSample::gauge("xrpl_validation_agreements_24h", agreed_24h as f64).at(timestamp),
        MetricSample::gauge("xrpl_validation_missed_24h", missed_24h as f64).at(timestamp),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tsdb::testing::RecordingSink;
    use pretty_assertions::assert_eq;

    const OUR_KEY: &str = "nHUkp7WhouVMobBUKGrV5FNqjsdD9zKP5jpGnnLLnYxUQSGAwrZ6";

    fn engine() -> (Arc<ValidationsHandler>, Arc<RecordingSink>) {
        let sink = RecordingSink::new();
        let handler = ValidationsHandler::new(sink.clone(), Some(OUR_KEY.to_string()));
        (handler, sink)
    }

    fn our_validation(ledger_index: u64, hash: &str) -> ValidationEvent {
        ValidationEvent {
            validation_public_key: None,
            master_key: Some(OUR_KEY.to_string()),
            ledger_index: Some(ledger_index),
            ledger_hash: Some(hash.to_string()),
            flags: Some(1),
        }
    }

    fn foreign_validation(ledger_index: u64) -> ValidationEvent {
        ValidationEvent {
            validation_public_key: Some("n9SomeOtherValidator".to_string()),
            master_key: Some("nHSomeOtherMaster".to_string()),
            ledger_index: Some(ledger_index),
            ledger_hash: Some("FF".to_string()),
            flags: Some(1),
        }
    }

    async fn advance(duration: Duration) {
        tokio::time::advance(duration).await;
    }

    #[tokio::test(start_paused = true)]
    async fn agreement_is_counted_after_grace_period() {
        let (engine, _sink) = engine();
        engine.on_ledger_closed(100, "A").await;
        advance(Duration::from_secs(1)).await;
        engine.handle(&our_validation(100, "A")).await;

        // Still inside the grace period: no verdict yet.
        advance(Duration::from_secs(3)).await;
        engine.reconcile_once().await;
        assert_eq!(engine.agreements_total(), 0);

        advance(Duration::from_secs(5)).await;
        engine.reconcile_once().await;
        assert_eq!(engine.agreements_total(), 1);
        assert_eq!(engine.missed_total(), 0);

        // Finalization is exactly-once: further cycles change nothing.
        engine.reconcile_once().await;
        engine.reconcile_once().await;
        assert_eq!(engine.agreements_total(), 1);
        assert_eq!(engine.missed_total(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn disagreement_counts_as_missed_without_late_repair() {
        let (engine, _sink) = engine();
        engine.on_ledger_closed(101, "B").await;
        advance(Duration::from_secs(2)).await;
        engine.handle(&our_validation(101, "C")).await;

        advance(Duration::from_secs(7)).await;
        engine.reconcile_once().await;
        assert_eq!(engine.agreements_total(), 0);
        assert_eq!(engine.missed_total(), 1);

        // A disagreement is final; the repair path never triggers for it.
        advance(Duration::from_secs(60)).await;
        engine.reconcile_once().await;
        assert_eq!(engine.agreements_total(), 0);
        assert_eq!(engine.missed_total(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn events_in_either_order_produce_one_verdict() {
        let (engine, _sink) = engine();
        // Validation first, close second.
        engine.handle(&our_validation(102, "D")).await;
        advance(Duration::from_secs(1)).await;
        engine.on_ledger_closed(102, "D").await;

        advance(Duration::from_secs(9)).await;
        engine.reconcile_once().await;
        assert_eq!(engine.agreements_total(), 1);
        assert_eq!(engine.missed_total(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn missed_then_late_repair_restores_agreement() {
        let (engine, sink) = engine();
        engine.on_ledger_closed(102, "D").await;

        advance(Duration::from_secs(9)).await;
        engine.reconcile_once().await;
        assert_eq!(engine.missed_total(), 1);
        // The unsent verdict lands in the window deques as a miss.
        assert_eq!(
            sink.values_for("xrpl_validation_event"),
            vec![0.0]
        );

        advance(Duration::from_secs(51)).await;
        engine.handle(&our_validation(102, "D")).await;
        advance(Duration::from_secs(1)).await;
        engine.reconcile_once().await;

        assert_eq!(engine.missed_total(), 0);
        assert_eq!(engine.agreements_total(), 1);

        // The repair is applied exactly once.
        engine.reconcile_once().await;
        assert_eq!(engine.missed_total(), 0);
        assert_eq!(engine.agreements_total(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn late_repair_deadline_is_enforced() {
        let (engine, _sink) = engine();
        engine.on_ledger_closed(103, "E").await;

        advance(Duration::from_secs(9)).await;
        engine.reconcile_once().await;
        assert_eq!(engine.missed_total(), 1);

        // Validation arrives at t=400, past the 300s repair window.
        advance(Duration::from_secs(391)).await;
        engine.handle(&our_validation(103, "E")).await;
        advance(Duration::from_secs(1)).await;
        engine.reconcile_once().await;

        assert_eq!(engine.missed_total(), 1);
        assert_eq!(engine.agreements_total(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn finalized_records_are_cleaned_up() {
        let (engine, _sink) = engine();
        engine.on_ledger_closed(104, "F").await;
        engine.handle(&our_validation(104, "F")).await;

        advance(Duration::from_secs(9)).await;
        engine.reconcile_once().await;
        assert_eq!(engine.state.lock().pending.len(), 1);

        advance(Duration::from_secs(601)).await;
        engine.reconcile_once().await;
        assert_eq!(engine.state.lock().pending.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn foreign_validations_only_bump_the_network_counter() {
        let (engine, sink) = engine();
        engine.handle(&foreign_validation(200)).await;
        engine.handle(&foreign_validation(201)).await;

        assert_eq!(engine.validations_checked_total(), 2);
        assert_eq!(engine.validations_total(), 0);
        assert!(sink.samples().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_validations_are_deduplicated() {
        let (engine, _sink) = engine();
        engine.on_ledger_closed(300, "A").await;
        engine.handle(&our_validation(300, "A")).await;
        engine.handle(&our_validation(300, "A")).await;
        engine.handle(&our_validation(300, "A")).await;

        assert_eq!(engine.validations_total(), 1);
        assert_eq!(engine.validations_checked_total(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn dedup_set_evicts_oldest_block_on_overflow() {
        let (engine, _sink) = engine();
        for index in 0..(SEEN_LEDGERS_MAX as u64 + 1) {
            engine.handle(&our_validation(index, "A")).await;
        }
        let state = engine.state.lock();
        assert_eq!(
            state.seen_ledgers.len(),
            SEEN_LEDGERS_MAX + 1 - SEEN_LEDGERS_EVICT
        );
        // The oldest 500 indices are gone; the newest survive.
        assert!(!state.seen_ledgers.contains(&0));
        assert!(!state.seen_ledgers.contains(&499));
        assert!(state.seen_ledgers.contains(&500));
        assert!(state.seen_ledgers.contains(&(SEEN_LEDGERS_MAX as u64)));
    }

    #[test]
    fn window_pruning_respects_the_window_bound() {
        let mut state = EngineState::new();
        for age in [7200.0, 3601.0, 3599.0, 10.0] {
            state.push_record(ValidationRecord {
                timestamp: 100_000.0 - age,
                agreed: true,
            });
        }
        state.prune_windows(100_000.0);
        assert_eq!(state.window_1h.len(), 2);
        assert_eq!(state.window_24h.len(), 4);
        for record in &state.window_1h {
            assert!(100_000.0 - record.timestamp <= WINDOW_1H_SECS);
        }
    }

    #[test]
    fn decay_baseline_tapers_linearly() {
        // Baseline {agreements_1h: 1000, missed_1h: 10} recovered at time 0.
        let mut state = EngineState::new();
        state.baseline.agreements_1h = Some(1000);
        state.baseline.missed_1h = Some(10);
        state.baseline.recovery_time = Some(0.0);

        let samples = gauge_samples(&state, 0.0);
        let value = |name: &str| {
            samples
                .iter()
                .find(|s| s.name == name)
                .map(|s| s.value)
                .unwrap()
        };
        assert_eq!(value("xrpl_validation_agreements_1h"), 1000.0);
        assert_eq!(value("xrpl_validation_missed_1h"), 10.0);
        assert!((value("xrpl_validation_agreement_pct_1h") - 99.0099).abs() < 0.01);

        // Halfway through the window with 5 fresh agreed records.
        for _ in 0..5 {
            state.push_record(ValidationRecord {
                timestamp: 1800.0,
                agreed: true,
            });
        }
        let samples = gauge_samples(&state, 1800.0);
        let value = |name: &str| {
            samples
                .iter()
                .find(|s| s.name == name)
                .map(|s| s.value)
                .unwrap()
        };
        assert_eq!(value("xrpl_validation_agreements_1h"), 505.0);
        assert_eq!(value("xrpl_validation_missed_1h"), 5.0);

        // At exactly one window the baseline contribution is gone.
        let samples = gauge_samples(&state, 3600.0);
        let value = |name: &str| {
            samples
                .iter()
                .find(|s| s.name == name)
                .map(|s| s.value)
                .unwrap()
        };
        assert_eq!(value("xrpl_validation_agreements_1h"), 5.0);
        assert_eq!(value("xrpl_validation_missed_1h"), 0.0);
        assert_eq!(value("xrpl_validation_agreement_pct_1h"), 100.0);
    }

    #[test]
    fn baseline_contribution_is_strictly_decreasing() {
        let mut state = EngineState::new();
        state.baseline.agreements_1h = Some(600);
        state.baseline.missed_1h = Some(0);
        state.baseline.recovery_time = Some(0.0);

        let mut last = f64::INFINITY;
        for now in [0.0, 600.0, 1200.0, 1800.0, 2400.0, 3000.0, 3600.0] {
            let (agreed, _, pct) =
                window_counts(&state.window_1h, Some(600), Some(0), Some(0.0), 3600.0, now);
            assert!((agreed as f64) < last || now == 0.0);
            assert!((0.0..=100.0).contains(&pct));
            last = agreed as f64;
        }
        // Fully decayed at the window edge.
        let (agreed, _, pct) =
            window_counts(&state.window_1h, Some(600), Some(0), Some(0.0), 3600.0, 3600.0);
        assert_eq!(agreed, 0);
        assert_eq!(pct, 0.0);
    }

    #[test]
    fn empty_windows_report_zero_pct() {
        let state = EngineState::new();
        let samples = gauge_samples(&state, 1000.0);
        let pct = samples
            .iter()
            .find(|s| s.name == "xrpl_validation_agreement_pct_1h")
            .unwrap();
        assert_eq!(pct.value, 0.0);
    }

    #[test]
    fn restart_detection_tolerates_minute_rounding() {
        // Within tolerance: not a restart.
        assert!(!rippled_restarted(1000.0, 900.0));
        assert!(!rippled_restarted(1000.0, 1300.0));
        // Genuine restart: uptime collapsed.
        assert!(rippled_restarted(100_000.0, 60.0));
    }

    #[tokio::test(start_paused = true)]
    async fn our_validation_emits_event_and_gauges() {
        let (engine, sink) = engine();
        engine.on_ledger_closed(400, "AA").await;
        engine.handle(&our_validation(400, "AA")).await;

        let samples = sink.samples();
        let event = samples
            .iter()
            .find(|s| s.name == "xrpl_validation_event")
            .expect("validation event written");
        assert_eq!(event.value, 1.0);
        assert_eq!(
            event.labels,
            vec![("agreed".to_string(), "true".to_string())]
        );
        assert_eq!(sink.last_value("xrpl_validations_total"), Some(1.0));
        assert_eq!(sink.last_value("xrpl_validation_agreements_1h"), Some(1.0));
        assert_eq!(sink.last_value("xrpl_validation_agreement_pct_1h"), Some(100.0));
    }
}
