// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use std::fmt;

/// Operational state reported by rippled, plus `Down` for an unresponsive
/// node. The ordinal values are part of the external dashboard contract and
/// must not be reordered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidatorState {
    Down = 0,
    Disconnected = 1,
    Connected = 2,
    Syncing = 3,
    Tracking = 4,
    Full = 5,
    Validating = 6,
    Proposing = 7,
}

impl ValidatorState {
    pub const ALL: [ValidatorState; 8] = [
        ValidatorState::Down,
        ValidatorState::Disconnected,
        ValidatorState::Connected,
        ValidatorState::Syncing,
        ValidatorState::Tracking,
        ValidatorState::Full,
        ValidatorState::Validating,
        ValidatorState::Proposing,
    ];

    /// Numeric value written to the `xrpl_validator_state_value` gauge.
    pub fn value(self) -> u8 {
        self as u8
    }

    /// Maps a `server_state`/`server_status` string to a state. Unknown or
    /// null-ish strings map to `Down`, matching how an unresponsive node is
    /// reported.
    pub fn from_status(status: &str) -> ValidatorState {
        match status.to_ascii_lowercase().as_str() {
            "disconnected" => ValidatorState::Disconnected,
            "connected" => ValidatorState::Connected,
            "syncing" => ValidatorState::Syncing,
            "tracking" => ValidatorState::Tracking,
            "full" => ValidatorState::Full,
            "validating" => ValidatorState::Validating,
            "proposing" => ValidatorState::Proposing,
            _ => ValidatorState::Down,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ValidatorState::Down => "down",
            ValidatorState::Disconnected => "disconnected",
            ValidatorState::Connected => "connected",
            ValidatorState::Syncing => "syncing",
            ValidatorState::Tracking => "tracking",
            ValidatorState::Full => "full",
            ValidatorState::Validating => "validating",
            ValidatorState::Proposing => "proposing",
        }
    }
}

impl fmt::Display for ValidatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the monitored node is configured as a validator. rippled reports
/// `pubkey_validator: "none"` for stock nodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeMode {
    Validator,
    StockNode,
    Unknown,
}

impl NodeMode {
    pub const ALL: [NodeMode; 3] = [NodeMode::Validator, NodeMode::StockNode, NodeMode::Unknown];

    pub fn from_pubkey_validator(pubkey: &str) -> NodeMode {
        if pubkey.is_empty() || pubkey.eq_ignore_ascii_case("none") {
            NodeMode::StockNode
        } else {
            NodeMode::Validator
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeMode::Validator => "validator",
            NodeMode::StockNode => "stock_node",
            NodeMode::Unknown => "unknown",
        }
    }
}

impl fmt::Display for NodeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn state_ordinals_are_stable() {
        // The dashboard maps these numbers back to names; they are a contract.
        let expected: [(ValidatorState, u8); 8] = [
            (ValidatorState::Down, 0),
            (ValidatorState::Disconnected, 1),
            (ValidatorState::Connected, 2),
            (ValidatorState::Syncing, 3),
            (ValidatorState::Tracking, 4),
            (ValidatorState::Full, 5),
            (ValidatorState::Validating, 6),
            (ValidatorState::Proposing, 7),
        ];
        for (state, value) in expected {
            assert_eq!(state.value(), value);
        }
    }

    #[test]
    fn status_parsing_is_case_insensitive_and_defaults_down() {
        assert_eq!(ValidatorState::from_status("Proposing"), ValidatorState::Proposing);
        assert_eq!(ValidatorState::from_status("FULL"), ValidatorState::Full);
        assert_eq!(ValidatorState::from_status("null"), ValidatorState::Down);
        assert_eq!(ValidatorState::from_status(""), ValidatorState::Down);
        assert_eq!(ValidatorState::from_status("wat"), ValidatorState::Down);
    }

    #[test]
    fn state_round_trips_through_name() {
        for state in ValidatorState::ALL {
            assert_eq!(ValidatorState::from_status(state.as_str()), state);
        }
    }

    #[test]
    fn node_mode_from_pubkey() {
        assert_eq!(NodeMode::from_pubkey_validator("none"), NodeMode::StockNode);
        assert_eq!(NodeMode::from_pubkey_validator(""), NodeMode::StockNode);
        assert_eq!(
            NodeMode::from_pubkey_validator("nHUkp7WhouVMobBUKGrV5FNqjsdD9zKP5jpGnnLLnYxUQSGAwrZ6"),
            NodeMode::Validator
        );
    }
}
