//! Configuration management for netmode

use crate::dnsmasq::DhcpLeasePool;
use crate::error::{NetmodeError, NetmodeResult};
use crate::hostapd::AccessPointProfile;
use crate::systemd;
use crate::validation;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/netmode/netmode.toml";

/// Upper bound for one `netmoded run`; `TimeoutStartSec=` in netmoded.service matches it
pub const MAX_RUN_SECS: u64 = 600;

/// Worst-case number of timed commands in a failed transition plus its rollback
const COMMANDS_PER_RUN: u64 = 12;

/// Main netmode configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetmodeConfig {
    #[serde(default)]
    pub controller: ControllerSettings,
    #[serde(default)]
    pub reconcile: ReconcileSettings,
    #[serde(default)]
    pub access_point: AccessPointProfile,
    #[serde(default)]
    pub dhcp: DhcpLeasePool,
    #[serde(default)]
    pub paths: ConfigPaths,
    #[serde(default)]
    pub units: UnitNames,
}

/// How daemons are started and stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Through `systemctl` units
    Systemd,
    /// By spawning the daemons ourselves and tracking pid files
    Direct,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerSettings {
    /// Wireless interface to manage
    #[serde(default = "default_interface")]
    pub interface: String,
    /// Time to wait for association before deciding (seconds)
    #[serde(default = "default_grace_period")]
    pub grace_period_secs: u64,
    /// Upper bound for every external command (seconds)
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_lock_file")]
    pub lock_file: PathBuf,
    #[serde(default = "default_backend")]
    pub backend: Backend,
    /// Try to restore the previous mode when a transition fails halfway
    #[serde(default = "default_rollback")]
    pub rollback_on_failure: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileSettings {
    /// Keep re-evaluating after the boot-time decision
    #[serde(default)]
    pub enabled: bool,
    /// Association check period in client mode, and initial recovery back-off
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    /// Ceiling for the recovery back-off in access-point mode
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigPaths {
    /// Rendered daemon configs and pid files
    #[serde(default = "default_runtime_dir")]
    pub runtime_dir: PathBuf,
}

/// systemd unit names; `{iface}` expands to the controller interface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitNames {
    #[serde(default = "default_supplicant_unit")]
    pub supplicant: String,
    #[serde(default = "default_hostapd_unit")]
    pub access_point: String,
    #[serde(default = "default_dnsmasq_unit")]
    pub dhcp_server: String,
}

fn default_interface() -> String {
    "wlan0".to_string()
}

fn default_grace_period() -> u64 {
    60
}

fn default_command_timeout() -> u64 {
    20
}

fn default_lock_file() -> PathBuf {
    PathBuf::from("/run/netmode/netmoded.lock")
}

fn default_backend() -> Backend {
    Backend::Systemd
}

fn default_rollback() -> bool {
    true
}

fn default_interval() -> u64 {
    60
}

fn default_max_backoff() -> u64 {
    900
}

fn default_runtime_dir() -> PathBuf {
    PathBuf::from("/run/netmode")
}

fn default_supplicant_unit() -> String {
    "wpa_supplicant@{iface}.service".to_string()
}

fn default_hostapd_unit() -> String {
    "hostapd.service".to_string()
}

fn default_dnsmasq_unit() -> String {
    "dnsmasq.service".to_string()
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            interface: default_interface(),
            grace_period_secs: default_grace_period(),
            command_timeout_secs: default_command_timeout(),
            lock_file: default_lock_file(),
            backend: default_backend(),
            rollback_on_failure: default_rollback(),
        }
    }
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_interval(),
            max_backoff_secs: default_max_backoff(),
        }
    }
}

impl Default for ConfigPaths {
    fn default() -> Self {
        Self {
            runtime_dir: default_runtime_dir(),
        }
    }
}

impl Default for UnitNames {
    fn default() -> Self {
        Self {
            supplicant: default_supplicant_unit(),
            access_point: default_hostapd_unit(),
            dhcp_server: default_dnsmasq_unit(),
        }
    }
}

impl ControllerSettings {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

impl ReconcileSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }
}

impl NetmodeConfig {
    /// Load and validate configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> NetmodeResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| NetmodeError::ConfigError(format!("Failed to read config: {}", e)))?;
        Self::from_toml(&content)
    }

    /// Load from `path` if it exists, otherwise fall back to defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> NetmodeResult<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            let config = Self::default();
            config.validate()?;
            Ok(config)
        }
    }

    pub fn from_toml(content: &str) -> NetmodeResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| NetmodeError::ConfigError(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> NetmodeResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| NetmodeError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| NetmodeError::ConfigError(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    pub fn validate(&self) -> NetmodeResult<()> {
        let c = &self.controller;
        validation::validate_interface_name(&c.interface)
            .map_err(|e| NetmodeError::ConfigError(format!("controller.interface: {}", e)))?;

        if c.grace_period_secs == 0 {
            return Err(NetmodeError::ConfigError(
                "controller.grace_period_secs must be positive".to_string(),
            ));
        }
        if c.command_timeout_secs == 0 {
            return Err(NetmodeError::ConfigError(
                "controller.command_timeout_secs must be positive".to_string(),
            ));
        }
        let worst_case = c
            .grace_period_secs
            .saturating_add(c.command_timeout_secs.saturating_mul(COMMANDS_PER_RUN));
        if worst_case > MAX_RUN_SECS {
            return Err(NetmodeError::ConfigError(format!(
                "controller.grace_period_secs ({}) plus {} x command_timeout_secs ({}) exceeds {}s",
                c.grace_period_secs, COMMANDS_PER_RUN, c.command_timeout_secs, MAX_RUN_SECS
            )));
        }

        let r = &self.reconcile;
        if r.interval_secs == 0 {
            return Err(NetmodeError::ConfigError(
                "reconcile.interval_secs must be positive".to_string(),
            ));
        }
        if r.max_backoff_secs < r.interval_secs {
            return Err(NetmodeError::ConfigError(format!(
                "reconcile.max_backoff_secs ({}) is below interval_secs ({})",
                r.max_backoff_secs, r.interval_secs
            )));
        }

        self.access_point
            .validate()
            .map_err(|e| NetmodeError::ConfigError(format!("access_point: {}", e)))?;
        self.dhcp
            .validate()
            .map_err(|e| NetmodeError::ConfigError(format!("dhcp: {}", e)))?;

        for unit in [&self.units.supplicant, &self.units.access_point, &self.units.dhcp_server] {
            systemd::validate_unit_name(&systemd::expand_unit(unit, &c.interface))
                .map_err(|e| NetmodeError::ConfigError(format!("units: {}", e)))?;
        }

        Ok(())
    }
}
