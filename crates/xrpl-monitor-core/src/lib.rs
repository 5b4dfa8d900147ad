// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

pub mod handlers;
pub mod node_client;
pub mod poller;
pub mod state;
pub mod tsdb;
pub mod validations;
