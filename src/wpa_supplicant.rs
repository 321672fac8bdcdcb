//! WPA Supplicant control
//!
//! The supplicant owns the radio in client mode. This module queries its
//! association state through `wpa_cli` and starts/stops it directly when the
//! `direct` backend is in use.

use crate::error::{NetmodeError, NetmodeResult};
use crate::process;
use crate::validation;
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Control interface directory for wpa_supplicant
const CTRL_INTERFACE: &str = "/var/run/wpa_supplicant";

/// WPA Supplicant connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WpaState {
    Disconnected,
    Inactive,
    Scanning,
    Authenticating,
    Associating,
    Associated,
    FourWayHandshake,
    GroupHandshake,
    Completed,
    Unknown,
}

impl From<&str> for WpaState {
    fn from(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "DISCONNECTED" => WpaState::Disconnected,
            "INACTIVE" | "INTERFACE_DISABLED" => WpaState::Inactive,
            "SCANNING" => WpaState::Scanning,
            "AUTHENTICATING" => WpaState::Authenticating,
            "ASSOCIATING" => WpaState::Associating,
            "ASSOCIATED" => WpaState::Associated,
            "4WAY_HANDSHAKE" => WpaState::FourWayHandshake,
            "GROUP_HANDSHAKE" => WpaState::GroupHandshake,
            "COMPLETED" => WpaState::Completed,
            _ => WpaState::Unknown,
        }
    }
}

/// Connection status from wpa_supplicant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WpaStatus {
    pub state: WpaState,
    pub ssid: Option<String>,
    pub bssid: Option<String>,
    pub ip_address: Option<String>,
}

impl WpaStatus {
    /// Parse `wpa_cli status` output
    pub fn parse(output: &str) -> Self {
        let mut status = WpaStatus {
            state: WpaState::Unknown,
            ssid: None,
            bssid: None,
            ip_address: None,
        };

        for line in output.lines() {
            if let Some((key, value)) = line.split_once('=') {
                match key {
                    "wpa_state" => status.state = WpaState::from(value),
                    "ssid" => status.ssid = Some(value.to_string()),
                    "bssid" => status.bssid = Some(value.to_string()),
                    "ip_address" => status.ip_address = Some(value.to_string()),
                    _ => {}
                }
            }
        }

        status
    }

    /// Joined to a network with the 4-way handshake finished
    pub fn is_associated(&self) -> bool {
        self.state == WpaState::Completed
    }
}

/// WPA Supplicant controller
pub struct WpaSupplicantController {
    /// Path to wpa_supplicant binary
    wpa_bin: PathBuf,
    /// Path to wpa_cli binary
    wpa_cli_bin: PathBuf,
    /// Configuration directory
    config_dir: PathBuf,
    /// Control interface directory
    ctrl_interface: PathBuf,
    timeout: Duration,
}

impl WpaSupplicantController {
    pub fn new(timeout: Duration) -> Self {
        Self {
            wpa_bin: PathBuf::from("/usr/sbin/wpa_supplicant"),
            wpa_cli_bin: PathBuf::from("/usr/sbin/wpa_cli"),
            config_dir: PathBuf::from("/etc/wpa_supplicant"),
            ctrl_interface: PathBuf::from(CTRL_INTERFACE),
            timeout,
        }
    }

    /// Config file used by the direct backend
    ///
    /// Prefers the per-interface file, falling back to the distribution's
    /// shared `wpa_supplicant.conf`.
    pub fn config_path(&self, interface: &str) -> PathBuf {
        let per_iface = self.config_dir.join(format!("wpa_supplicant-{}.conf", interface));
        if per_iface.exists() {
            per_iface
        } else {
            self.config_dir.join("wpa_supplicant.conf")
        }
    }

    /// Whether the control socket for `interface` exists and answers
    pub async fn is_running(&self, interface: &str) -> bool {
        if validation::validate_interface_name(interface).is_err() {
            return false;
        }

        if tokio::fs::metadata(self.ctrl_interface.join(interface)).await.is_err() {
            return false;
        }

        self.wpa_cli(interface, &["ping"]).await.is_ok()
    }

    /// Get connection status
    pub async fn status(&self, interface: &str) -> NetmodeResult<WpaStatus> {
        validation::validate_interface_name(interface)?;
        let output = self.wpa_cli(interface, &["status"]).await?;
        Ok(WpaStatus::parse(&output))
    }

    /// Start wpa_supplicant on an interface
    pub async fn start(&self, interface: &str) -> NetmodeResult<()> {
        validation::validate_interface_name(interface)?;

        if self.is_running(interface).await {
            debug!("wpa_supplicant already running on {}", interface);
            return Ok(());
        }

        info!("Starting wpa_supplicant on {}", interface);
        let config_path = self.config_path(interface);
        process::run(
            &self.wpa_bin,
            [
                OsStr::new("-B"),
                OsStr::new("-D"),
                OsStr::new("nl80211,wext"),
                OsStr::new("-i"),
                OsStr::new(interface),
                OsStr::new("-c"),
                config_path.as_os_str(),
            ],
            self.timeout,
        )
        .await?;

        // Wait for control socket to be ready
        let deadline = Instant::now() + self.timeout;
        while Instant::now() < deadline {
            if self.is_running(interface).await {
                info!("wpa_supplicant started on {}", interface);
                return Ok(());
            }
            sleep(Duration::from_millis(200)).await;
        }

        Err(NetmodeError::ServiceError(format!(
            "wpa_supplicant started but control socket not ready on {}",
            interface
        )))
    }

    /// Stop wpa_supplicant on an interface
    pub async fn stop(&self, interface: &str) -> NetmodeResult<()> {
        validation::validate_interface_name(interface)?;

        if !self.is_running(interface).await {
            debug!("wpa_supplicant not running on {}", interface);
            return Ok(());
        }

        info!("Stopping wpa_supplicant on {}", interface);
        let _ = self.wpa_cli(interface, &["terminate"]).await;

        let deadline = Instant::now() + self.timeout;
        while Instant::now() < deadline {
            sleep(Duration::from_millis(200)).await;
            if !self.is_running(interface).await {
                return Ok(());
            }
        }

        warn!("wpa_supplicant didn't terminate gracefully, forcing kill");
        let pattern = format!("wpa_supplicant.*-i\\s*{}", interface);
        let _ = process::run(
            std::path::Path::new("/usr/bin/pkill"),
            ["-f", pattern.as_str()],
            self.timeout,
        )
        .await;

        if self.is_running(interface).await {
            return Err(NetmodeError::Timeout(format!(
                "wpa_supplicant on {} did not stop",
                interface
            )));
        }
        Ok(())
    }

    /// Run wpa_cli command
    async fn wpa_cli(&self, interface: &str, args: &[&str]) -> NetmodeResult<String> {
        let mut argv = vec!["-i", interface];
        argv.extend_from_slice(args);
        let stdout = process::run(&self.wpa_cli_bin, argv, self.timeout).await?;

        // wpa_cli returns "FAIL" on errors even with exit code 0
        if stdout.trim() == "FAIL" {
            return Err(NetmodeError::CommandFailed {
                cmd: format!("wpa_cli -i {} {}", interface, args.join(" ")),
                code: None,
                stderr: "wpa_cli returned FAIL".to_string(),
            });
        }

        Ok(stdout)
    }
}
