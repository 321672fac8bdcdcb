//! DHCP server management via dnsmasq
//!
//! dnsmasq runs in DHCP-only mode (`port=0`) bound to the wireless interface
//! while the device is an access point.

use crate::error::{NetmodeError, NetmodeResult};
use crate::process::{self, PidFile};
use crate::validation;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info, warn};

/// Address pool served to access-point clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DhcpLeasePool {
    /// Interface to bind to; the controller's interface when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
    /// Address the interface itself takes in access-point mode
    #[serde(default = "default_gateway")]
    pub gateway: Ipv4Addr,
    #[serde(default = "default_range_start")]
    pub range_start: Ipv4Addr,
    #[serde(default = "default_range_end")]
    pub range_end: Ipv4Addr,
    #[serde(default = "default_netmask")]
    pub netmask: Ipv4Addr,
    /// Lease duration (seconds)
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u32,
}

fn default_gateway() -> Ipv4Addr {
    Ipv4Addr::new(192, 168, 4, 1)
}

fn default_range_start() -> Ipv4Addr {
    Ipv4Addr::new(192, 168, 4, 2)
}

fn default_range_end() -> Ipv4Addr {
    Ipv4Addr::new(192, 168, 4, 20)
}

fn default_netmask() -> Ipv4Addr {
    Ipv4Addr::new(255, 255, 255, 0)
}

fn default_lease_secs() -> u32 {
    86400
}

impl Default for DhcpLeasePool {
    fn default() -> Self {
        Self {
            interface: None,
            gateway: default_gateway(),
            range_start: default_range_start(),
            range_end: default_range_end(),
            netmask: default_netmask(),
            lease_secs: default_lease_secs(),
        }
    }
}

impl DhcpLeasePool {
    /// Interface the pool is served on
    pub fn bound_interface<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.interface.as_deref().unwrap_or(fallback)
    }

    pub fn prefix_len(&self) -> u32 {
        u32::from(self.netmask).leading_ones()
    }

    pub fn validate(&self) -> NetmodeResult<()> {
        if let Some(ref iface) = self.interface {
            validation::validate_interface_name(iface)?;
        }
        validation::validate_lease_range(self.range_start, self.range_end, self.gateway, self.netmask)?;
        if self.lease_secs == 0 {
            return Err(NetmodeError::InvalidParameter(
                "DHCP lease duration must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Generate dnsmasq configuration
    pub fn render(&self, fallback_interface: &str) -> NetmodeResult<String> {
        self.validate()?;
        let interface = self.bound_interface(fallback_interface);
        validation::validate_interface_name(interface)?;

        let mut conf = String::new();
        conf.push_str(&format!("interface={}\n", interface));
        conf.push_str("bind-interfaces\n");
        conf.push_str("port=0\n");
        conf.push_str(&format!(
            "dhcp-range={},{},{},{}\n",
            self.range_start, self.range_end, self.netmask, self.lease_secs
        ));
        conf.push_str(&format!("dhcp-option=option:router,{}\n", self.gateway));
        conf.push_str("dhcp-authoritative\n");
        Ok(conf)
    }
}

/// dnsmasq controller
pub struct DnsmasqController {
    dnsmasq_bin: PathBuf,
    ip_bin: PathBuf,
    config_dir: PathBuf,
    pid_file: PidFile,
    timeout: Duration,
}

impl DnsmasqController {
    pub fn new(config_dir: PathBuf, timeout: Duration) -> Self {
        Self {
            dnsmasq_bin: PathBuf::from("/usr/sbin/dnsmasq"),
            ip_bin: PathBuf::from("/sbin/ip"),
            pid_file: PidFile::new(config_dir.join("dnsmasq.pid")),
            config_dir,
            timeout,
        }
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join("dnsmasq.conf")
    }

    pub async fn write_config(&self, pool: &DhcpLeasePool, interface: &str) -> NetmodeResult<PathBuf> {
        let conf = pool.render(interface)?;
        let conf_path = self.config_path();
        fs::create_dir_all(&self.config_dir).await?;
        fs::write(&conf_path, conf).await?;
        debug!("Wrote dnsmasq config to {}", conf_path.display());
        Ok(conf_path)
    }

    /// Give the interface its gateway address so dnsmasq can bind to it
    pub async fn assign_gateway(&self, pool: &DhcpLeasePool, interface: &str) -> NetmodeResult<()> {
        let iface = pool.bound_interface(interface);
        let cidr = format!("{}/{}", pool.gateway, pool.prefix_len());
        info!("Assigning {} to {}", cidr, iface);
        process::run(&self.ip_bin, ["addr", "replace", cidr.as_str(), "dev", iface], self.timeout).await?;
        process::run(&self.ip_bin, ["link", "set", iface, "up"], self.timeout).await?;
        Ok(())
    }

    /// Drop the gateway address; the supplicant's DHCP client takes over
    pub async fn release_gateway(&self, pool: &DhcpLeasePool, interface: &str) {
        let iface = pool.bound_interface(interface);
        let cidr = format!("{}/{}", pool.gateway, pool.prefix_len());
        if let Err(e) = process::run(&self.ip_bin, ["addr", "del", cidr.as_str(), "dev", iface], self.timeout).await {
            debug!("Removing {} from {}: {}", cidr, iface, e);
        }
    }

    pub async fn start(&self, pool: &DhcpLeasePool, interface: &str) -> NetmodeResult<()> {
        if self.is_running().await {
            debug!("dnsmasq already running");
            return Ok(());
        }

        let conf_path = self.write_config(pool, interface).await?;
        info!(
            "Starting dnsmasq on {} ({} - {})",
            pool.bound_interface(interface),
            pool.range_start,
            pool.range_end
        );

        let conf_arg = format!("--conf-file={}", conf_path.display());
        let pid_arg = format!("--pid-file={}", self.pid_file.path().display());
        process::run(&self.dnsmasq_bin, [conf_arg.as_str(), pid_arg.as_str()], self.timeout).await?;

        if !self.pid_file.wait_until_running(self.timeout).await {
            warn!("dnsmasq exited right after start");
            return Err(NetmodeError::ServiceError(
                "dnsmasq process did not start successfully".to_string(),
            ));
        }
        Ok(())
    }

    pub async fn stop(&self) -> NetmodeResult<()> {
        self.pid_file.terminate(self.timeout).await
    }

    pub async fn is_running(&self) -> bool {
        self.pid_file.is_running().await
    }
}
