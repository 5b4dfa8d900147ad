// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::time::{SystemTime, UNIX_EPOCH};

/// The kind distinction is metadata for the real-time exporter; counters and
/// gauges serialize identically on the import wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Gauge,
    Counter,
    Info,
}

/// A single sample destined for the TSDB import endpoint.
///
/// Labels keep their insertion order so the rendered exposition line is
/// stable for a given sample.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub name: String,
    pub value: f64,
    pub labels: Vec<(String, String)>,
    pub timestamp_ms: i64,
    pub kind: MetricKind,
}

impl MetricSample {
    pub fn gauge(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, value, MetricKind::Gauge)
    }

    pub fn counter(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, value, MetricKind::Counter)
    }

    /// Info metrics carry their payload in labels; the value is always 1.
    pub fn info(name: impl Into<String>) -> Self {
        Self::new(name, 1.0, MetricKind::Info)
    }

    fn new(name: impl Into<String>, value: f64, kind: MetricKind) -> Self {
        Self {
            name: name.into(),
            value,
            labels: Vec::new(),
            timestamp_ms: unix_millis_now(),
            kind,
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push((key.into(), value.into()));
        self
    }

    pub fn at(mut self, timestamp_ms: i64) -> Self {
        self.timestamp_ms = timestamp_ms;
        self
    }

    /// Renders `name{k1="v1",k2="v2"} value timestamp_ms`, the line format
    /// accepted by the TSDB's Prometheus import endpoint.
    pub fn to_exposition_line(&self) -> String {
        let value = format_value(self.value);
        if self.labels.is_empty() {
            format!("{} {} {}", self.name, value, self.timestamp_ms)
        } else {
            let labels = self
                .labels
                .iter()
                .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
                .collect::<Vec<_>>()
                .join(",");
            format!("{}{{{}}} {} {}", self.name, labels, value, self.timestamp_ms)
        }
    }
}

/// Integral values render without a trailing `.0` so counters look like
/// counters on the wire.
fn format_value(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 9e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// Prometheus label escaping: backslash, double-quote and newline.
fn escape_label_value(value: &str) -> Cow<'_, str> {
    if !value.contains(['\\', '"', '\n']) {
        return Cow::Borrowed(value);
    }
    let mut escaped = String::with_capacity(value.len() + 2);
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            other => escaped.push(other),
        }
    }
    Cow::Owned(escaped)
}

pub fn unix_millis_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

pub fn unix_seconds_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn exposition_line_without_labels() {
        let sample = MetricSample::gauge("xrpl_ledger_sequence", 93847123.0).at(1699564823000);
        assert_eq!(
            sample.to_exposition_line(),
            "xrpl_ledger_sequence 93847123 1699564823000"
        );
    }

    #[test]
    fn exposition_line_with_labels_keeps_insertion_order() {
        let sample = MetricSample::gauge("xrpl_validation_event", 1.0)
            .with_label("agreed", "true")
            .with_label("instance", "validator")
            .at(42);
        assert_eq!(
            sample.to_exposition_line(),
            "xrpl_validation_event{agreed=\"true\",instance=\"validator\"} 1 42"
        );
    }

    #[test]
    fn fractional_values_keep_their_fraction() {
        let sample = MetricSample::gauge("xrpl_base_fee_xrp", 0.00001).at(7);
        assert_eq!(sample.to_exposition_line(), "xrpl_base_fee_xrp 0.00001 7");
    }

    #[test]
    fn label_values_are_escaped() {
        let sample = MetricSample::info("xrpl_server_info")
            .with_label("complete_ledgers", "32570-93847123")
            .with_label("weird", "a\"b\\c\nd")
            .at(1);
        assert_eq!(
            sample.to_exposition_line(),
            "xrpl_server_info{complete_ledgers=\"32570-93847123\",weird=\"a\\\"b\\\\c\\nd\"} 1 1"
        );
    }

    #[test]
    fn counters_and_gauges_serialize_identically() {
        let gauge = MetricSample::gauge("xrpl_x", 5.0).at(1);
        let counter = MetricSample::counter("xrpl_x", 5.0).at(1);
        assert_eq!(gauge.to_exposition_line(), counter.to_exposition_line());
    }
}
