// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! `ledgerClosed` stream handler: ledger gauges plus the bounded buffer of
//! recent consensus hashes that feeds validation reconciliation.

use crate::tsdb::MetricSink;
use crate::validations::ValidationsHandler;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};
use xrpl_monitor_types::events::LedgerClosedEvent;
use xrpl_monitor_types::metric::{unix_millis_now, unix_seconds_now};
use xrpl_monitor_types::{MetricSample, DROPS_PER_XRP, RIPPLE_EPOCH_OFFSET};

/// Closed ledgers kept for validation comparison.
pub const LEDGER_HASH_BUFFER_SIZE: usize = 1000;

/// Bounded `ledger_index -> ledger_hash` map over the most recent closed
/// ledgers, FIFO eviction by insertion order. No duplicate keys: a repeated
/// index updates the stored hash in place.
#[derive(Default)]
pub struct ConsensusHashBuffer {
    order: VecDeque<u64>,
    lookup: HashMap<u64, String>,
}

impl ConsensusHashBuffer {
    pub fn insert(&mut self, ledger_index: u64, ledger_hash: String) {
        if self.lookup.insert(ledger_index, ledger_hash).is_some() {
            return;
        }
        self.order.push_back(ledger_index);
        while self.order.len() > LEDGER_HASH_BUFFER_SIZE {
            if let Some(evicted) = self.order.pop_front() {
                self.lookup.remove(&evicted);
            }
        }
    }

    pub fn get(&self, ledger_index: u64) -> Option<&str> {
        self.lookup.get(&ledger_index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

struct LedgerState {
    last_ledger_time: Option<f64>,
    last_ledger_index: Option<u64>,
    ledger_count: u64,
    ledgers_closed_total: u64,
    hashes: ConsensusHashBuffer,
}

pub struct LedgerHandler {
    sink: Arc<dyn MetricSink>,
    validations: Arc<ValidationsHandler>,
    state: Mutex<LedgerState>,
}

impl LedgerHandler {
    pub fn new(sink: Arc<dyn MetricSink>, validations: Arc<ValidationsHandler>) -> Arc<Self> {
        Arc::new(Self {
            sink,
            validations,
            state: Mutex::new(LedgerState {
                last_ledger_time: None,
                last_ledger_index: None,
                ledger_count: 0,
                ledgers_closed_total: 0,
                hashes: ConsensusHashBuffer::default(),
            }),
        })
    }

    pub async fn handle(&self, event: &LedgerClosedEvent) {
        let Some(ledger_time_ripple) = event.ledger_time else {
            warn!(ledger_index = event.ledger_index, "ledger message missing ledger_time");
            return;
        };

        let now_unix = unix_seconds_now();
        let ledger_time_unix = (ledger_time_ripple + RIPPLE_EPOCH_OFFSET) as f64;
        // Clamped: clock drift can put a fresh close a hair in the future.
        let ledger_age = (now_unix - ledger_time_unix).max(0.0);

        let (samples, consensus_callback) = {
            let mut state = self.state.lock();
            state.ledger_count += 1;
            state.ledgers_closed_total += 1;

            let consensus_callback = event.ledger_hash.as_ref().map(|hash| {
                state.hashes.insert(event.ledger_index, hash.clone());
                (event.ledger_index, hash.clone())
            });

            let mut transaction_rate = 0.0;
            if let (Some(last_time), Some(_)) = (state.last_ledger_time, state.last_ledger_index) {
                let elapsed = ledger_time_unix - last_time;
                if elapsed > 0.0 {
                    transaction_rate = event.txn_count as f64 / elapsed;
                }
            }
            state.last_ledger_time = Some(ledger_time_unix);
            state.last_ledger_index = Some(event.ledger_index);

            if state.ledger_count % 10 == 0 {
                debug!(
                    ledger_index = event.ledger_index,
                    age = ledger_age,
                    txns = event.txn_count,
                    rate = transaction_rate,
                    "ledger closed"
                );
            }

            let timestamp = unix_millis_now();
            let samples = vec![
                MetricSample::counter(
                    "xrpl_ledgers_closed_total",
                    state.ledgers_closed_total as f64,
                )
                .at(timestamp),
                MetricSample::gauge("xrpl_ledger_sequence", event.ledger_index as f64)
                    .at(timestamp),
                MetricSample::gauge("xrpl_ledger_age_seconds", ledger_age).at(timestamp),
                MetricSample::gauge("xrpl_base_fee_xrp", event.fee_base as f64 / DROPS_PER_XRP)
                    .at(timestamp),
                MetricSample::gauge(
                    "xrpl_reserve_base_xrp",
                    event.reserve_base as f64 / DROPS_PER_XRP,
                )
                .at(timestamp),
                MetricSample::gauge(
                    "xrpl_reserve_inc_xrp",
                    event.reserve_inc as f64 / DROPS_PER_XRP,
                )
                .at(timestamp),
                MetricSample::gauge("xrpl_transaction_rate", transaction_rate).at(timestamp),
            ];
            (samples, consensus_callback)
        };

        if let Some((ledger_index, hash)) = consensus_callback {
            self.validations.on_ledger_closed(ledger_index, &hash).await;
        }

        // Flushed immediately so the dashboard tracks closes in real time.
        self.sink.write_batch(samples, true).await;
    }

    pub fn get_consensus_hash(&self, ledger_index: u64) -> Option<String> {
        self.state
            .lock()
            .hashes
            .get(ledger_index)
            .map(str::to_string)
    }

    pub fn ledgers_closed_total(&self) -> u64 {
        self.state.lock().ledgers_closed_total
    }

    pub fn last_ledger_index(&self) -> Option<u64> {
        self.state.lock().last_ledger_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tsdb::testing::RecordingSink;
    use pretty_assertions::assert_eq;

    fn event(index: u64, hash: &str, time: u64, txn_count: u64) -> LedgerClosedEvent {
        LedgerClosedEvent {
            ledger_index: index,
            ledger_hash: Some(hash.to_string()),
            ledger_time: Some(time),
            fee_base: 10,
            reserve_base: 10_000_000,
            reserve_inc: 2_000_000,
            txn_count,
            validated_ledgers: None,
        }
    }

    fn handler(sink: Arc<RecordingSink>) -> Arc<LedgerHandler> {
        LedgerHandler::new(sink, ValidationsHandler::new(RecordingSink::new(), None))
    }

    #[test]
    fn hash_buffer_evicts_oldest_and_rejects_duplicates() {
        let mut buffer = ConsensusHashBuffer::default();
        for i in 0..(LEDGER_HASH_BUFFER_SIZE as u64 + 5) {
            buffer.insert(i, format!("H{i}"));
        }
        assert_eq!(buffer.len(), LEDGER_HASH_BUFFER_SIZE);
        assert_eq!(buffer.get(0), None);
        assert_eq!(buffer.get(4), None);
        assert_eq!(buffer.get(5), Some("H5"));

        // Re-inserting an existing key updates the value without growing.
        buffer.insert(5, "H5b".to_string());
        assert_eq!(buffer.len(), LEDGER_HASH_BUFFER_SIZE);
        assert_eq!(buffer.get(5), Some("H5b"));
    }

    #[tokio::test]
    async fn ledger_close_emits_gauges_and_counter() {
        let sink = RecordingSink::new();
        let handler = handler(sink.clone());

        let now_ripple = unix_seconds_now() as u64 - RIPPLE_EPOCH_OFFSET;
        handler.handle(&event(100, "A", now_ripple - 4, 25)).await;

        assert_eq!(sink.last_value("xrpl_ledgers_closed_total"), Some(1.0));
        assert_eq!(sink.last_value("xrpl_ledger_sequence"), Some(100.0));
        assert_eq!(sink.last_value("xrpl_base_fee_xrp"), Some(0.00001));
        assert_eq!(sink.last_value("xrpl_reserve_base_xrp"), Some(10.0));
        assert_eq!(sink.last_value("xrpl_reserve_inc_xrp"), Some(2.0));
        // First close has no predecessor, so the rate is zero.
        assert_eq!(sink.last_value("xrpl_transaction_rate"), Some(0.0));
        let age = sink.last_value("xrpl_ledger_age_seconds").unwrap();
        assert!((3.0..6.0).contains(&age), "age was {age}");
        assert_eq!(handler.get_consensus_hash(100).as_deref(), Some("A"));
    }

    #[tokio::test]
    async fn transaction_rate_uses_ledger_time_delta() {
        let sink = RecordingSink::new();
        let handler = handler(sink.clone());

        let base = unix_seconds_now() as u64 - RIPPLE_EPOCH_OFFSET;
        handler.handle(&event(100, "A", base - 8, 10)).await;
        handler.handle(&event(101, "B", base - 4, 20)).await;

        // 20 transactions over a 4 second close interval.
        assert_eq!(sink.last_value("xrpl_transaction_rate"), Some(5.0));
        assert_eq!(sink.last_value("xrpl_ledgers_closed_total"), Some(2.0));
    }

    #[tokio::test]
    async fn missing_ledger_time_is_skipped() {
        let sink = RecordingSink::new();
        let handler = handler(sink.clone());
        let mut bad = event(100, "A", 0, 0);
        bad.ledger_time = None;
        handler.handle(&bad).await;
        assert!(sink.samples().is_empty());
        assert_eq!(handler.ledgers_closed_total(), 0);
    }
}
