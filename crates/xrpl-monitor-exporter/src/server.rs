// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The exporter HTTP surface: exposition text, the minimal query API, and
//! liveness probes. Unknown paths get the default 404.

use crate::metrics::ExporterMetrics;
use crate::query::answer_query;
use crate::snapshot::SharedSnapshot;
use axum::extract::{Extension, Form, Query};
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use xrpl_monitor_types::rpc::QueryResponse;

pub struct AppState {
    pub shared: Arc<SharedSnapshot>,
    pub metrics: ExporterMetrics,
    pub instance: String,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/metrics", get(serve_metrics))
        .route("/api/v1/query", get(query_get).post(query_post))
        .route("/health", get(health))
        .route("/", get(health))
        .layer(Extension(state))
}

/// Binds the exporter server and runs it until the token fires. Returns the
/// bound address so callers (and tests) can use an ephemeral port.
pub fn start_server(
    state: Arc<AppState>,
    port: u16,
    shutdown: CancellationToken,
) -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let server = axum::Server::try_bind(&addr)?.serve(router(state).into_make_service());
    let local_addr = server.local_addr();
    info!(%local_addr, "exporter http server started");
    let graceful = server.with_graceful_shutdown(async move { shutdown.cancelled().await });
    let handle = tokio::spawn(async move {
        if let Err(err) = graceful.await {
            error!("exporter http server failed: {err}");
        }
    });
    Ok((local_addr, handle))
}

async fn serve_metrics(Extension(state): Extension<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.shared.load();
    state.metrics.update(&snapshot);
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        state.metrics.render(),
    )
}

async fn query_get(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<QueryResponse> {
    let query = params.get("query").map(String::as_str).unwrap_or("");
    answer(&state, query)
}

#[derive(Deserialize)]
struct QueryForm {
    #[serde(default)]
    query: String,
}

/// The dashboard switches to POSTed form bodies for longer queries.
async fn query_post(
    Extension(state): Extension<Arc<AppState>>,
    Form(form): Form<QueryForm>,
) -> Json<QueryResponse> {
    answer(&state, &form.query)
}

fn answer(state: &AppState, query: &str) -> Json<QueryResponse> {
    let snapshot = state.shared.load();
    Json(answer_query(query, &snapshot, &state.instance))
}

async fn health() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use xrpl_monitor_types::ValidatorState;

    fn app_state() -> Arc<AppState> {
        let shared = SharedSnapshot::new();
        shared.update(|snap| {
            snap.state = ValidatorState::Full;
            snap.state_name = "full".to_string();
            snap.ledger_sequence = 777;
        });
        Arc::new(AppState {
            shared,
            metrics: ExporterMetrics::new("validator"),
            instance: "validator".to_string(),
        })
    }

    #[tokio::test]
    async fn http_surface_end_to_end() {
        let state = app_state();
        let shutdown = CancellationToken::new();
        let (addr, handle) = start_server(state, 0, shutdown.clone()).unwrap();
        let base = format!("http://{addr}");
        let client = reqwest::Client::new();

        let health = client.get(format!("{base}/health")).send().await.unwrap();
        assert_eq!(health.status().as_u16(), 200);
        assert_eq!(health.text().await.unwrap(), "OK");

        let root = client.get(format!("{base}/")).send().await.unwrap();
        assert_eq!(root.status().as_u16(), 200);

        let metrics = client.get(format!("{base}/metrics")).send().await.unwrap();
        assert!(metrics
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/plain"));
        let body = metrics.text().await.unwrap();
        assert!(body.contains("xrpl_state_realtime_value"));
        assert!(body.contains(r#"state="full"} 1"#));

        let query = client
            .get(format!(
                "{base}/api/v1/query?query=xrpl_ledger_sequence_realtime"
            ))
            .send()
            .await
            .unwrap();
        let parsed: QueryResponse = query.json().await.unwrap();
        assert_eq!(parsed.data.result[0].value.as_ref().unwrap().1, "777");

        let posted = client
            .post(format!("{base}/api/v1/query"))
            .form(&[("query", "xrpl_state_realtime_value")])
            .send()
            .await
            .unwrap();
        let parsed: QueryResponse = posted.json().await.unwrap();
        assert_eq!(parsed.data.result[0].value.as_ref().unwrap().1, "5");

        let missing = client.get(format!("{base}/nope")).send().await.unwrap();
        assert_eq!(missing.status().as_u16(), 404);

        shutdown.cancel();
        let _ = handle.await;
    }
}
