//! Error types for netmode

use crate::daemon::Daemon;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetmodeError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Command execution failed
    #[error("Command '{cmd}' failed{}: {stderr}", exit_code_suffix(.code))]
    CommandFailed { cmd: String, code: Option<i32>, stderr: String },

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Service error (hostapd, dnsmasq, wpa_supplicant)
    #[error("Service error: {0}")]
    ServiceError(String),

    /// A process-control call did not finish in time
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Association status could not be determined
    #[error("Status query failed: {0}")]
    StatusQuery(String),

    /// A daemon could not be stopped
    #[error("Failed to stop {daemon}: {reason}")]
    DaemonStop { daemon: Daemon, reason: String },

    /// A daemon could not be started
    #[error("Failed to start {daemon}: {reason}")]
    DaemonStart { daemon: Daemon, reason: String },

    /// A transition failed and the previous mode could not be restored
    #[error("No network available: {cause}; restoring previous mode also failed: {rollback}")]
    NoNetworkAvailable { cause: String, rollback: String },

    /// Another controller instance holds the lock
    #[error("Another instance is already running (lock held on {})", .0.display())]
    AlreadyRunning(PathBuf),
}

fn exit_code_suffix(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!(" with code {}", code),
        None => String::new(),
    }
}

impl NetmodeError {
    /// Whether this error came from starting or stopping a daemon
    pub fn is_daemon_failure(&self) -> bool {
        matches!(
            self,
            NetmodeError::DaemonStart { .. } | NetmodeError::DaemonStop { .. }
        )
    }
}

pub type NetmodeResult<T> = Result<T, NetmodeError>;
