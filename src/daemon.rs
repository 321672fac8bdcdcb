//! Process-control boundary for the network daemons
//!
//! The mode controller never touches processes directly; it drives a
//! [`NetworkDaemonController`], which the binary backs with
//! [`SystemDaemonController`] and tests back with fakes.

use crate::config::{Backend, NetmodeConfig, UnitNames};
use crate::dnsmasq::{DhcpLeasePool, DnsmasqController};
use crate::error::{NetmodeError, NetmodeResult};
use crate::hostapd::{AccessPointProfile, HostapdController};
use crate::systemd::{self, SystemctlController};
use crate::wpa_supplicant::WpaSupplicantController;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// The long-running services competing for the radio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Daemon {
    /// wpa_supplicant (client mode)
    Supplicant,
    /// hostapd (access-point mode)
    AccessPoint,
    /// dnsmasq (access-point mode)
    DhcpServer,
}

impl fmt::Display for Daemon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Daemon::Supplicant => write!(f, "client supplicant"),
            Daemon::AccessPoint => write!(f, "access-point daemon"),
            Daemon::DhcpServer => write!(f, "DHCP server"),
        }
    }
}

/// Capability set the mode controller is written against
#[async_trait]
pub trait NetworkDaemonController: Send + Sync {
    /// Start a daemon; a no-op if it is already running
    async fn start(&self, daemon: Daemon) -> NetmodeResult<()>;

    /// Stop a daemon; a no-op if it is not running
    async fn stop(&self, daemon: Daemon) -> NetmodeResult<()>;

    /// Whether a daemon is currently running
    async fn is_running(&self, daemon: Daemon) -> NetmodeResult<bool>;

    /// Whether `interface` is associated to a WiFi network
    async fn is_associated(&self, interface: &str) -> NetmodeResult<bool>;
}

/// Real daemon control through systemd units or directly spawned processes
pub struct SystemDaemonController {
    interface: String,
    backend: Backend,
    units: UnitNames,
    profile: AccessPointProfile,
    pool: DhcpLeasePool,
    systemctl: SystemctlController,
    hostapd: HostapdController,
    dnsmasq: DnsmasqController,
    wpa: WpaSupplicantController,
}

impl SystemDaemonController {
    pub fn from_config(config: &NetmodeConfig) -> Self {
        let timeout = config.controller.command_timeout();
        let runtime_dir = config.paths.runtime_dir.clone();

        Self {
            interface: config.controller.interface.clone(),
            backend: config.controller.backend,
            units: config.units.clone(),
            profile: config.access_point.clone(),
            pool: config.dhcp.clone(),
            systemctl: SystemctlController::new(timeout),
            hostapd: HostapdController::new(runtime_dir.clone(), timeout),
            dnsmasq: DnsmasqController::new(runtime_dir, timeout),
            wpa: WpaSupplicantController::new(timeout),
        }
    }

    fn unit(&self, daemon: Daemon) -> String {
        let template = match daemon {
            Daemon::Supplicant => &self.units.supplicant,
            Daemon::AccessPoint => &self.units.access_point,
            Daemon::DhcpServer => &self.units.dhcp_server,
        };
        systemd::expand_unit(template, &self.interface)
    }

    async fn start_dhcp_unit(&self) -> NetmodeResult<()> {
        self.dnsmasq.write_config(&self.pool, &self.interface).await?;
        self.systemctl.start(&self.unit(Daemon::DhcpServer)).await
    }
}

#[async_trait]
impl NetworkDaemonController for SystemDaemonController {
    async fn start(&self, daemon: Daemon) -> NetmodeResult<()> {
        debug!("Starting {} ({:?} backend)", daemon, self.backend);
        match (daemon, self.backend) {
            (Daemon::Supplicant, Backend::Systemd) => self.systemctl.start(&self.unit(daemon)).await,
            (Daemon::Supplicant, Backend::Direct) => self.wpa.start(&self.interface).await,
            (Daemon::AccessPoint, Backend::Systemd) => {
                // hostapd.service is pointed at the runtime dir by a drop-in
                self.hostapd.write_config(&self.profile, &self.interface).await?;
                self.systemctl.start(&self.unit(daemon)).await
            }
            (Daemon::AccessPoint, Backend::Direct) => {
                self.hostapd.start(&self.profile, &self.interface).await
            }
            (Daemon::DhcpServer, backend) => {
                self.dnsmasq.assign_gateway(&self.pool, &self.interface).await?;
                let started = match backend {
                    Backend::Systemd => self.start_dhcp_unit().await,
                    Backend::Direct => self.dnsmasq.start(&self.pool, &self.interface).await,
                };
                if started.is_err() {
                    self.dnsmasq.release_gateway(&self.pool, &self.interface).await;
                }
                started
            }
        }
    }

    async fn stop(&self, daemon: Daemon) -> NetmodeResult<()> {
        debug!("Stopping {} ({:?} backend)", daemon, self.backend);
        match (daemon, self.backend) {
            (Daemon::Supplicant, Backend::Systemd) => self.systemctl.stop(&self.unit(daemon)).await,
            (Daemon::Supplicant, Backend::Direct) => self.wpa.stop(&self.interface).await,
            (Daemon::AccessPoint, Backend::Systemd) => self.systemctl.stop(&self.unit(daemon)).await,
            (Daemon::AccessPoint, Backend::Direct) => self.hostapd.stop().await,
            (Daemon::DhcpServer, backend) => {
                match backend {
                    Backend::Systemd => self.systemctl.stop(&self.unit(daemon)).await?,
                    Backend::Direct => self.dnsmasq.stop().await?,
                }
                self.dnsmasq.release_gateway(&self.pool, &self.interface).await;
                Ok(())
            }
        }
    }

    async fn is_running(&self, daemon: Daemon) -> NetmodeResult<bool> {
        match (daemon, self.backend) {
            (_, Backend::Systemd) => self.systemctl.is_active(&self.unit(daemon)).await,
            (Daemon::Supplicant, Backend::Direct) => Ok(self.wpa.is_running(&self.interface).await),
            (Daemon::AccessPoint, Backend::Direct) => Ok(self.hostapd.is_running().await),
            (Daemon::DhcpServer, Backend::Direct) => Ok(self.dnsmasq.is_running().await),
        }
    }

    async fn is_associated(&self, interface: &str) -> NetmodeResult<bool> {
        let status = self
            .wpa
            .status(interface)
            .await
            .map_err(|e| NetmodeError::StatusQuery(e.to_string()))?;
        debug!("{}: wpa_state={:?} ssid={:?}", interface, status.state, status.ssid);
        Ok(status.is_associated())
    }
}
