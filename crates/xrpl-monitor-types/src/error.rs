// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;
use thiserror::Error;

pub type MonitorResult<T> = Result<T, MonitorError>;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("not connected to rippled websocket")]
    NotConnected,

    #[error("websocket transport error: {0}")]
    Transport(String),

    #[error("rpc request `{method}` failed: {reason}")]
    RpcFailed { method: String, reason: String },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected message shape: {0}")]
    Protocol(String),

    #[error("tsdb write failed after {attempts} attempts, batch discarded")]
    TsdbWriteExhausted { attempts: u32 },

    #[error("tsdb query failed: {0}")]
    TsdbQuery(String),

    #[error("state directory is not writable: {0}")]
    StateDirUnwritable(String),

    #[error("reconnect attempts exhausted after {0} tries")]
    ReconnectExhausted(u32),
}

impl MonitorError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }

    pub fn protocol(err: impl std::fmt::Display) -> Self {
        Self::Protocol(err.to_string())
    }
}
