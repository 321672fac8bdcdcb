//! Network modes and transition records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Network personality of the wireless interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Not yet evaluated
    Unknown,
    /// Associated to an upstream network via the supplicant
    Client,
    /// Broadcasting our own network via hostapd + DHCP
    AccessPoint,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Unknown => write!(f, "unknown"),
            Mode::Client => write!(f, "client"),
            Mode::AccessPoint => write!(f, "access-point"),
        }
    }
}

/// What an evaluation did to the daemons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionAction {
    /// Nothing was started or stopped
    None,
    /// The interface was switched to a different mode
    Transitioned,
}

/// Outcome of a successful evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionResult {
    pub mode: Mode,
    pub action: TransitionAction,
}

impl TransitionResult {
    pub fn unchanged(mode: Mode) -> Self {
        Self { mode, action: TransitionAction::None }
    }

    pub fn transitioned(mode: Mode) -> Self {
        Self { mode, action: TransitionAction::Transitioned }
    }
}

/// Observed state of the wireless interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WirelessInterface {
    /// Interface name
    pub name: String,
    /// Current mode
    pub mode: Mode,
    /// Whether the interface is associated to some SSID
    pub associated: bool,
}

impl WirelessInterface {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode: Mode::Unknown,
            associated: false,
        }
    }
}

/// Audit record of a mode change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeTransition {
    pub from: Mode,
    pub to: Mode,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

impl ModeTransition {
    pub fn now(from: Mode, to: Mode, reason: impl Into<String>) -> Self {
        Self {
            from,
            to,
            timestamp: Utc::now(),
            reason: reason.into(),
        }
    }
}
