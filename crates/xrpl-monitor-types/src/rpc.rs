// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Body shape of the rippled HTTP JSON-RPC API: `{method, params: [{..}]}`.
#[derive(Clone, Debug, Serialize)]
pub struct JsonRpcRequest {
    pub method: String,
    pub params: Vec<Value>,
}

impl JsonRpcRequest {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            params: vec![Value::Object(Default::default())],
        }
    }
}

/// Response envelope of the rippled HTTP JSON-RPC API.
#[derive(Clone, Debug, Deserialize)]
pub struct JsonRpcEnvelope {
    #[serde(default)]
    pub result: Value,
}

impl JsonRpcEnvelope {
    pub fn is_success(&self) -> bool {
        self.result.get("status").and_then(Value::as_str) == Some("success")
    }

    /// The `result` object with the envelope noise stripped.
    pub fn result(&self) -> &Value {
        &self.result
    }
}

/// `{status, data: {resultType, result}}` envelope shared by the TSDB query
/// API and the exporter's own query surface.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueryResponse {
    pub status: String,
    pub data: QueryData,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueryData {
    #[serde(rename = "resultType")]
    pub result_type: String,
    pub result: Vec<QueryResult>,
}

/// One series in a query response. Instant vectors carry `value`; matrix
/// (range) results carry `values`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueryResult {
    pub metric: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<(f64, String)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<(f64, String)>>,
}

impl QueryResponse {
    pub fn empty_vector() -> Self {
        Self::vector(Vec::new())
    }

    pub fn vector(result: Vec<QueryResult>) -> Self {
        Self {
            status: "success".to_string(),
            data: QueryData {
                result_type: "vector".to_string(),
                result,
            },
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == "success"
    }

    /// Value of the first series of an instant-vector response.
    pub fn first_value(&self) -> Option<f64> {
        self.data
            .result
            .first()
            .and_then(|r| r.value.as_ref())
            .and_then(|(_, v)| v.parse::<f64>().ok())
    }

    /// Earliest `[ts, value]` pair of the first series of a matrix response.
    pub fn first_range_value(&self) -> Option<f64> {
        self.data
            .result
            .first()
            .and_then(|r| r.values.as_ref())
            .and_then(|values| values.first())
            .and_then(|(_, v)| v.parse::<f64>().ok())
    }
}

impl QueryResult {
    pub fn instant(name: &str, labels: &[(&str, &str)], timestamp: f64, value: impl ToString) -> Self {
        let mut metric = BTreeMap::new();
        metric.insert("__name__".to_string(), name.to_string());
        for (k, v) in labels {
            metric.insert((*k).to_string(), (*v).to_string());
        }
        Self {
            metric,
            value: Some((timestamp, value.to_string())),
            values: None,
        }
    }
}
