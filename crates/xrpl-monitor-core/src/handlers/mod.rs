// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

pub mod ledger;
pub mod server;

use crate::node_client::StreamDispatcher;
use crate::validations::ValidationsHandler;
use async_trait::async_trait;
use ledger::LedgerHandler;
use server::ServerHandler;
use std::sync::Arc;
use xrpl_monitor_types::events::NodeMessage;

/// The concrete handler set behind the node client's dispatch seam. One
/// variant per subscribed stream; responses never reach this point (the
/// client routes them to request waiters first).
pub struct StreamHandlers {
    pub ledger: Arc<LedgerHandler>,
    pub server: Arc<ServerHandler>,
    pub validations: Arc<ValidationsHandler>,
}

#[async_trait]
impl StreamDispatcher for StreamHandlers {
    async fn dispatch(&self, message: NodeMessage) {
        match message {
            NodeMessage::LedgerClosed(event) => self.ledger.handle(&event).await,
            NodeMessage::ServerStatus(event) => self.server.handle(&event).await,
            NodeMessage::ValidationReceived(event) => self.validations.handle(&event).await,
            NodeMessage::Response(_) | NodeMessage::Unknown => {}
        }
    }
}
