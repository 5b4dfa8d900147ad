// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! WebSocket session to the rippled node.
//!
//! Owns exactly one socket. Request/response frames are correlated by `id`
//! and multiplexed with stream events on the same connection; stream events
//! are dispatched in wire order. A heartbeat task probes liveness and trips
//! the per-connection cancellation token after three consecutive failures,
//! which routes the listen loop into the reconnect path.

use crate::tsdb::MetricSink;
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use xrpl_monitor_types::events::{NodeMessage, RpcResponseFrame};
use xrpl_monitor_types::metric::{unix_millis_now, unix_seconds_now};
use xrpl_monitor_types::rpc::{JsonRpcEnvelope, JsonRpcRequest};
use xrpl_monitor_types::{MetricSample, MonitorError, MonitorResult};

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(10);
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const MAX_HEARTBEAT_FAILURES: u32 = 3;
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;
/// Delay sequence indexed by `min(attempt - 1, len - 1)`.
pub const RECONNECT_BACKOFF_SECS: [u64; 5] = [1, 2, 5, 10, 30];

type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Consumer side of the event stream. The node wires the concrete handler
/// set; tests plug in a recording dispatcher.
#[async_trait]
pub trait StreamDispatcher: Send + Sync {
    async fn dispatch(&self, message: NodeMessage);
}

pub struct NodeClient {
    ws_url: String,
    http_url: String,
    http: reqwest::Client,
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
    request_timeout: Duration,

    writer: tokio::sync::Mutex<Option<WsWriter>>,
    reader: Mutex<Option<WsReader>>,
    pending: Mutex<HashMap<u64, oneshot::Sender<RpcResponseFrame>>>,
    next_request_id: AtomicU64,
    subscribed_streams: Mutex<Vec<String>>,

    connected: AtomicBool,
    healthy: AtomicBool,
    message_count: AtomicU64,
    last_message_time: Mutex<Option<f64>>,
    last_heartbeat_time: Mutex<Option<f64>>,
    heartbeat_failures: AtomicU32,
    reconnect_attempts: AtomicU32,

    conn_token: Mutex<CancellationToken>,
    heartbeat_handle: Mutex<Option<JoinHandle<()>>>,
}

impl NodeClient {
    pub fn new(ws_url: &str, http_url: &str) -> Arc<Self> {
        Self::with_timings(ws_url, http_url, HEARTBEAT_INTERVAL, HEARTBEAT_TIMEOUT, REQUEST_TIMEOUT)
    }

    pub fn with_timings(
        ws_url: &str,
        http_url: &str,
        heartbeat_interval: Duration,
        heartbeat_timeout: Duration,
        request_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            ws_url: ws_url.to_string(),
            http_url: http_url.to_string(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("building the rippled http client cannot fail"),
            heartbeat_interval,
            heartbeat_timeout,
            request_timeout,
            writer: tokio::sync::Mutex::new(None),
            reader: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            next_request_id: AtomicU64::new(1),
            subscribed_streams: Mutex::new(Vec::new()),
            connected: AtomicBool::new(false),
            healthy: AtomicBool::new(false),
            message_count: AtomicU64::new(0),
            last_message_time: Mutex::new(None),
            last_heartbeat_time: Mutex::new(None),
            heartbeat_failures: AtomicU32::new(0),
            reconnect_attempts: AtomicU32::new(0),
            conn_token: Mutex::new(CancellationToken::new()),
            heartbeat_handle: Mutex::new(None),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn is_healthy(&self) -> bool {
        self.is_connected() && self.healthy.load(Ordering::SeqCst)
    }

    pub fn message_count(&self) -> u64 {
        self.message_count.load(Ordering::SeqCst)
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::SeqCst)
    }

    pub fn http_url(&self) -> &str {
        &self.http_url
    }

    /// Opens the WebSocket, resets failure counters and spawns the heartbeat
    /// task for this connection.
    pub async fn connect(self: &Arc<Self>) -> MonitorResult<()> {
        let (stream, _) = connect_async(&self.ws_url)
            .await
            .map_err(MonitorError::transport)?;
        let (writer, reader) = stream.split();
        *self.writer.lock().await = Some(writer);
        *self.reader.lock() = Some(reader);

        self.connected.store(true, Ordering::SeqCst);
        self.healthy.store(true, Ordering::SeqCst);
        self.heartbeat_failures.store(0, Ordering::SeqCst);
        self.reconnect_attempts.store(0, Ordering::SeqCst);

        let token = CancellationToken::new();
        *self.conn_token.lock() = token.clone();

        let old = self
            .heartbeat_handle
            .lock()
            .replace(tokio::spawn(Self::heartbeat_loop(self.clone(), token)));
        if let Some(old) = old {
            old.abort();
        }

        info!("connected to rippled websocket: {}", self.ws_url);
        Ok(())
    }

    /// Graceful teardown: stops the heartbeat, closes the socket, drops any
    /// in-flight request waiters.
    pub async fn disconnect(&self) {
        self.conn_token.lock().cancel();
        if let Some(handle) = self.heartbeat_handle.lock().take() {
            handle.abort();
        }
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.send(Message::Close(None)).await;
        }
        self.connected.store(false, Ordering::SeqCst);
        self.healthy.store(false, Ordering::SeqCst);
        self.pending.lock().clear();
        info!("disconnected from rippled websocket");
    }

    /// Sends a subscribe request and records the stream list for replay after
    /// reconnects.
    pub async fn subscribe(&self, streams: &[&str]) -> MonitorResult<()> {
        let frame = self
            .request("subscribe", json!({ "streams": streams }))
            .await?;
        if !frame.is_success() {
            return Err(MonitorError::RpcFailed {
                method: "subscribe".to_string(),
                reason: frame.error_reason(),
            });
        }
        *self.subscribed_streams.lock() = streams.iter().map(|s| s.to_string()).collect();
        info!(?streams, "subscribed to rippled streams");
        Ok(())
    }

    async fn resubscribe(&self) -> MonitorResult<()> {
        let streams: Vec<String> = self.subscribed_streams.lock().clone();
        if streams.is_empty() {
            return Ok(());
        }
        let refs: Vec<&str> = streams.iter().map(String::as_str).collect();
        self.subscribe(&refs).await
    }

    /// Ordinary request/response over the WebSocket with the default timeout.
    pub async fn request(&self, command: &str, extra: Value) -> MonitorResult<RpcResponseFrame> {
        self.request_with_timeout(command, extra, self.request_timeout)
            .await
    }

    async fn request_with_timeout(
        &self,
        command: &str,
        extra: Value,
        timeout: Duration,
    ) -> MonitorResult<RpcResponseFrame> {
        if !self.is_connected() {
            return Err(MonitorError::NotConnected);
        }
        let id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        let mut body = json!({ "id": id, "command": command });
        if let (Some(obj), Some(extra)) = (body.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                obj.insert(k.clone(), v.clone());
            }
        }

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        if let Err(err) = self.send_text(body.to_string()).await {
            self.pending.lock().remove(&id);
            return Err(err);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(_)) => {
                // Sender dropped: the connection died under us.
                Err(MonitorError::NotConnected)
            }
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(MonitorError::Timeout(timeout))
            }
        }
    }

    async fn send_text(&self, text: String) -> MonitorResult<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(MonitorError::NotConnected)?;
        writer
            .send(Message::Text(text))
            .await
            .map_err(MonitorError::transport)
    }

    /// A `ping` round trip within the heartbeat timeout.
    pub async fn health_check(&self) -> bool {
        match self
            .request_with_timeout("ping", json!({}), self.heartbeat_timeout)
            .await
        {
            Ok(frame) => frame.is_success(),
            Err(_) => false,
        }
    }

    async fn heartbeat_loop(client: Arc<Self>, token: CancellationToken) {
        info!("heartbeat monitor started");
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("heartbeat monitor stopped");
                    return;
                }
                _ = tokio::time::sleep(client.heartbeat_interval) => {}
            }
            if !client.is_connected() {
                return;
            }
            if client.health_check().await {
                *client.last_heartbeat_time.lock() = Some(unix_seconds_now());
                client.heartbeat_failures.store(0, Ordering::SeqCst);
                client.healthy.store(true, Ordering::SeqCst);
                debug!("heartbeat ok");
                continue;
            }
            let failures = client.heartbeat_failures.fetch_add(1, Ordering::SeqCst) + 1;
            warn!(failures, "heartbeat failed");
            if failures >= MAX_HEARTBEAT_FAILURES {
                error!("connection appears stuck ({failures} heartbeat failures), forcing reconnection");
                client.healthy.store(false, Ordering::SeqCst);
                client.connected.store(false, Ordering::SeqCst);
                // Cancelling the connection token aborts the listen loop's
                // current await and routes it to the reconnect path.
                token.cancel();
                if let Some(mut writer) = client.writer.lock().await.take() {
                    let _ = writer.send(Message::Close(None)).await;
                }
                return;
            }
        }
    }

    /// Consumes frames from the current connection until it dies, the
    /// heartbeat trips it, or the connection token is cancelled. Events are
    /// dispatched in the order received from the wire.
    pub async fn listen(&self, dispatcher: &Arc<dyn StreamDispatcher>) -> MonitorResult<()> {
        let mut reader = self
            .reader
            .lock()
            .take()
            .ok_or(MonitorError::NotConnected)?;
        let token = self.conn_token.lock().clone();
        info!("listening for websocket messages");

        loop {
            let message = tokio::select! {
                _ = token.cancelled() => {
                    warn!("listen loop cancelled (forced reconnection)");
                    break;
                }
                message = reader.next() => message,
            };
            match message {
                Some(Ok(Message::Text(text))) => {
                    let count = self.message_count.fetch_add(1, Ordering::SeqCst) + 1;
                    *self.last_message_time.lock() = Some(unix_seconds_now());
                    if count % 100 == 0 {
                        debug!(count, "websocket messages received");
                    }
                    match serde_json::from_str::<NodeMessage>(&text) {
                        Ok(NodeMessage::Response(frame)) => self.route_response(frame),
                        Ok(NodeMessage::Unknown) => {
                            debug!(
                                snippet = text.get(..120).unwrap_or(&text),
                                "no handler for message type"
                            );
                        }
                        Ok(event) => dispatcher.dispatch(event).await,
                        Err(err) => warn!("undecodable websocket message: {err}"),
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    warn!("websocket closed by server");
                    break;
                }
                Some(Ok(_)) => {} // ping/pong/binary frames carry no events
                Some(Err(err)) => {
                    warn!("websocket receive error: {err}");
                    break;
                }
                None => {
                    warn!("websocket message stream ended (connection closed by server)");
                    break;
                }
            }
        }

        self.connected.store(false, Ordering::SeqCst);
        self.healthy.store(false, Ordering::SeqCst);
        self.pending.lock().clear();
        Ok(())
    }

    fn route_response(&self, frame: RpcResponseFrame) {
        let Some(id) = frame.id else {
            debug!("response frame without id");
            return;
        };
        match self.pending.lock().remove(&id) {
            Some(tx) => {
                let _ = tx.send(frame);
            }
            None => debug!(id, "response frame with no waiter"),
        }
    }

    /// Listens and reconnects with the `[1,2,5,10,30]` backoff until either
    /// the shutdown token fires or the attempt budget is exhausted. Replays
    /// the recorded stream subscriptions after every successful reconnect.
    pub async fn run_listen(
        self: &Arc<Self>,
        dispatcher: Arc<dyn StreamDispatcher>,
        shutdown: CancellationToken,
    ) -> MonitorResult<()> {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                result = self.listen(&dispatcher) => result?,
            }
            if shutdown.is_cancelled() {
                return Ok(());
            }

            loop {
                let attempt = self.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
                if attempt > MAX_RECONNECT_ATTEMPTS {
                    error!(
                        "max reconnection attempts ({MAX_RECONNECT_ATTEMPTS}) reached, giving up"
                    );
                    return Err(MonitorError::ReconnectExhausted(MAX_RECONNECT_ATTEMPTS));
                }
                let index = (attempt as usize - 1).min(RECONNECT_BACKOFF_SECS.len() - 1);
                let delay = Duration::from_secs(RECONNECT_BACKOFF_SECS[index]);
                warn!(
                    attempt,
                    max = MAX_RECONNECT_ATTEMPTS,
                    ?delay,
                    "websocket reconnection attempt"
                );
                tokio::select! {
                    _ = shutdown.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(delay) => {}
                }
                match self.connect().await {
                    Ok(()) => {
                        info!("reconnected, replaying stream subscriptions");
                        if let Err(err) = self.resubscribe().await {
                            error!("resubscription failed: {err}");
                            continue;
                        }
                        break;
                    }
                    Err(err) => {
                        error!("reconnection failed: {err}");
                    }
                }
            }
        }
    }

    // Typed request wrappers.

    /// `server_info` over the WebSocket; returns the `info` object.
    pub async fn get_server_info(&self) -> MonitorResult<Value> {
        let frame = self.request("server_info", json!({})).await?;
        if !frame.is_success() {
            return Err(MonitorError::RpcFailed {
                method: "server_info".to_string(),
                reason: frame.error_reason(),
            });
        }
        Ok(frame.result.get("info").cloned().unwrap_or(Value::Null))
    }

    /// `server_state` over the WebSocket; returns the `state` object. This is
    /// the accurate source for "proposing" while `server_info` over HTTP may
    /// still say "full".
    pub async fn get_server_state(&self) -> MonitorResult<Value> {
        let frame = self.request("server_state", json!({})).await?;
        if !frame.is_success() {
            return Err(MonitorError::RpcFailed {
                method: "server_state".to_string(),
                reason: frame.error_reason(),
            });
        }
        Ok(frame.result.get("state").cloned().unwrap_or(Value::Null))
    }

    /// `peers` via the HTTP admin API. The WebSocket surface rejects admin
    /// commands on some network configurations; the HTTP endpoint does not.
    pub async fn get_peers(&self) -> MonitorResult<Vec<Value>> {
        let envelope = self.json_rpc("peers").await?;
        if !envelope.is_success() {
            return Err(MonitorError::RpcFailed {
                method: "peers".to_string(),
                reason: envelope.result()["error"]
                    .as_str()
                    .unwrap_or("unknown error")
                    .to_string(),
            });
        }
        Ok(envelope.result()["peers"]
            .as_array()
            .cloned()
            .unwrap_or_default())
    }

    /// One-shot JSON-RPC call against the companion HTTP endpoint.
    pub async fn json_rpc(&self, method: &str) -> MonitorResult<JsonRpcEnvelope> {
        let response = self
            .http
            .post(&self.http_url)
            .json(&JsonRpcRequest::new(method))
            .send()
            .await
            .map_err(MonitorError::transport)?;
        if !response.status().is_success() {
            return Err(MonitorError::RpcFailed {
                method: method.to_string(),
                reason: format!("http status {}", response.status()),
            });
        }
        response
            .json::<JsonRpcEnvelope>()
            .await
            .map_err(MonitorError::protocol)
    }

    /// Connection health samples for the TSDB.
    pub async fn emit_health_metrics(&self, sink: &dyn MetricSink) {
        let timestamp = unix_millis_now();
        let mut samples = vec![
            MetricSample::gauge(
                "xrpl_websocket_connected",
                if self.is_connected() { 1.0 } else { 0.0 },
            )
            .at(timestamp),
            MetricSample::gauge(
                "xrpl_websocket_healthy",
                if self.is_healthy() { 1.0 } else { 0.0 },
            )
            .at(timestamp),
            MetricSample::gauge(
                "xrpl_websocket_heartbeat_failures",
                self.heartbeat_failures.load(Ordering::SeqCst) as f64,
            )
            .at(timestamp),
            MetricSample::gauge(
                "xrpl_websocket_reconnect_attempts",
                self.reconnect_attempts.load(Ordering::SeqCst) as f64,
            )
            .at(timestamp),
            MetricSample::gauge("xrpl_websocket_message_count", self.message_count() as f64)
                .at(timestamp),
        ];
        if let Some(last) = *self.last_message_time.lock() {
            samples.push(
                MetricSample::gauge(
                    "xrpl_websocket_last_message_age_seconds",
                    (unix_seconds_now() - last).max(0.0),
                )
                .at(timestamp),
            );
        }
        sink.write_batch(samples, false).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    struct RecordingDispatcher {
        events: mpsc::UnboundedSender<String>,
    }

    #[async_trait]
    impl StreamDispatcher for RecordingDispatcher {
        async fn dispatch(&self, message: NodeMessage) {
            let label = match message {
                NodeMessage::LedgerClosed(e) => format!("ledger:{}", e.ledger_index),
                NodeMessage::ServerStatus(e) => {
                    format!("server:{}", e.server_status.unwrap_or_default())
                }
                NodeMessage::ValidationReceived(e) => {
                    format!("validation:{}", e.ledger_index.unwrap_or_default())
                }
                other => format!("{other:?}"),
            };
            let _ = self.events.send(label);
        }
    }

    /// Minimal rippled stand-in: answers every request frame with a success
    /// response and records subscribe stream lists. Drops the connection
    /// after `drop_after` accepted requests when set.
    async fn spawn_stub_node(
        subscriptions: mpsc::UnboundedSender<Vec<String>>,
        drop_first_connection: bool,
    ) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut first = true;
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let drop_now = first && drop_first_connection;
                first = false;
                let subscriptions = subscriptions.clone();
                tokio::spawn(async move {
                    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                    while let Some(Ok(message)) = ws.next().await {
                        if let Message::Text(text) = message {
                            let frame: Value = serde_json::from_str(&text).unwrap();
                            if frame["command"] == "subscribe" {
                                let streams = frame["streams"]
                                    .as_array()
                                    .map(|arr| {
                                        arr.iter()
                                            .filter_map(|v| v.as_str().map(String::from))
                                            .collect()
                                    })
                                    .unwrap_or_default();
                                let _ = subscriptions.send(streams);
                            }
                            let reply = json!({
                                "type": "response",
                                "id": frame["id"],
                                "status": "success",
                                "result": {}
                            });
                            let _ = ws.send(Message::Text(reply.to_string())).await;
                            if drop_now && frame["command"] == "subscribe" {
                                // Hard drop to exercise the reconnect path.
                                return;
                            }
                        }
                    }
                });
            }
        });
        format!("ws://{addr}")
    }

    fn quiet_client(ws_url: &str) -> Arc<NodeClient> {
        // Long heartbeat so the probe never interferes with short tests.
        NodeClient::with_timings(
            ws_url,
            "http://127.0.0.1:1",
            Duration::from_secs(600),
            Duration::from_secs(2),
            Duration::from_secs(2),
        )
    }

    #[tokio::test]
    async fn subscribe_records_stream_list() {
        let (sub_tx, mut sub_rx) = mpsc::unbounded_channel();
        let url = spawn_stub_node(sub_tx, false).await;
        let client = quiet_client(&url);
        client.connect().await.unwrap();

        // Responses only flow while the listen loop is draining the socket.
        let (event_tx, _event_rx) = mpsc::unbounded_channel();
        let dispatcher: Arc<dyn StreamDispatcher> =
            Arc::new(RecordingDispatcher { events: event_tx });
        let shutdown = CancellationToken::new();
        let listen = {
            let client = client.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { client.run_listen(dispatcher, shutdown).await })
        };

        client
            .subscribe(&["ledger", "server", "validations"])
            .await
            .unwrap();
        assert_eq!(
            sub_rx.recv().await.unwrap(),
            vec!["ledger", "server", "validations"]
        );
        assert_eq!(*client.subscribed_streams.lock(), vec![
            "ledger".to_string(),
            "server".to_string(),
            "validations".to_string()
        ]);

        shutdown.cancel();
        client.disconnect().await;
        let _ = listen.await;
    }

    #[tokio::test]
    async fn reconnect_replays_recorded_subscriptions() {
        let (sub_tx, mut sub_rx) = mpsc::unbounded_channel();
        let url = spawn_stub_node(sub_tx, true).await;
        let client = quiet_client(&url);
        client.connect().await.unwrap();

        let (event_tx, _event_rx) = mpsc::unbounded_channel();
        let dispatcher: Arc<dyn StreamDispatcher> =
            Arc::new(RecordingDispatcher { events: event_tx });
        let shutdown = CancellationToken::new();
        let listen = {
            let client = client.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { client.run_listen(dispatcher, shutdown).await })
        };

        client
            .subscribe(&["ledger", "server", "validations"])
            .await
            .unwrap();
        assert_eq!(
            sub_rx.recv().await.unwrap(),
            vec!["ledger", "server", "validations"]
        );

        // The stub drops the first connection after the subscribe; within
        // backoff[0] = 1s the client reconnects and replays exactly the
        // recorded list.
        let replayed = tokio::time::timeout(Duration::from_secs(10), sub_rx.recv())
            .await
            .expect("reconnect did not resubscribe in time")
            .unwrap();
        assert_eq!(replayed, vec!["ledger", "server", "validations"]);

        // Counter resets on the successful reconnect.
        assert_eq!(client.reconnect_attempts(), 0);
        assert!(client.is_connected());

        shutdown.cancel();
        client.disconnect().await;
        let _ = listen.await;
    }

    #[tokio::test]
    async fn events_are_dispatched_in_wire_order() {
        let (sub_tx, _sub_rx) = mpsc::unbounded_channel::<Vec<String>>();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(sub_tx);
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            for frame in [
                json!({"type": "ledgerClosed", "ledger_index": 100, "ledger_hash": "A", "ledger_time": 1}),
                json!({"type": "serverStatus", "server_status": "proposing"}),
                json!({"type": "validationReceived", "ledger_index": 100, "ledger_hash": "A"}),
                json!({"type": "transaction", "engine_result": "tesSUCCESS"}),
            ] {
                ws.send(Message::Text(frame.to_string())).await.unwrap();
            }
        });

        let client = quiet_client(&format!("ws://{addr}"));
        client.connect().await.unwrap();

        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let dispatcher: Arc<dyn StreamDispatcher> =
            Arc::new(RecordingDispatcher { events: event_tx });
        let listen = {
            let client = client.clone();
            tokio::spawn(async move { client.listen(&dispatcher).await })
        };

        assert_eq!(event_rx.recv().await.unwrap(), "ledger:100");
        assert_eq!(event_rx.recv().await.unwrap(), "server:proposing");
        assert_eq!(event_rx.recv().await.unwrap(), "validation:100");
        // The unknown type is dropped, not dispatched; the stream then ends.
        let _ = listen.await;
        assert!(event_rx.recv().await.is_none());
        assert_eq!(client.message_count(), 4);
    }

    #[tokio::test]
    async fn request_without_connection_fails_fast() {
        let client = quiet_client("ws://127.0.0.1:1");
        let err = client.request("ping", json!({})).await.unwrap_err();
        assert!(matches!(err, MonitorError::NotConnected));
    }
}
