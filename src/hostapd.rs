//! hostapd management for the fallback access point
//!
//! Configuration generation and control for hostapd

use crate::error::{NetmodeError, NetmodeResult};
use crate::process::{self, PidFile};
use crate::validation;
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info};

/// WPA key management suites hostapd understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyManagement {
    #[serde(rename = "WPA-PSK")]
    WpaPsk,
    #[serde(rename = "SAE")]
    Sae,
    #[serde(rename = "WPA-PSK SAE")]
    WpaPskSae,
}

impl KeyManagement {
    fn as_str(&self) -> &'static str {
        match self {
            KeyManagement::WpaPsk => "WPA-PSK",
            KeyManagement::Sae => "SAE",
            KeyManagement::WpaPskSae => "WPA-PSK SAE",
        }
    }
}

/// Pairwise cipher suites
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Cipher {
    Ccmp,
    Tkip,
}

impl Cipher {
    fn as_str(&self) -> &'static str {
        match self {
            Cipher::Ccmp => "CCMP",
            Cipher::Tkip => "TKIP",
        }
    }
}

/// Security parameters of the access point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityParams {
    /// Authentication algorithm bitmask (1 = open system, 2 = shared key)
    #[serde(default = "default_auth_algs")]
    pub auth_algs: u8,
    /// WPA version bitmask (1 = WPA, 2 = WPA2)
    #[serde(default = "default_wpa")]
    pub wpa: u8,
    #[serde(default = "default_key_mgmt")]
    pub key_mgmt: KeyManagement,
    #[serde(default = "default_cipher")]
    pub pairwise: Cipher,
}

fn default_auth_algs() -> u8 {
    1
}

fn default_wpa() -> u8 {
    2
}

fn default_key_mgmt() -> KeyManagement {
    KeyManagement::WpaPsk
}

fn default_cipher() -> Cipher {
    Cipher::Ccmp
}

impl Default for SecurityParams {
    fn default() -> Self {
        Self {
            auth_algs: default_auth_algs(),
            wpa: default_wpa(),
            key_mgmt: default_key_mgmt(),
            pairwise: default_cipher(),
        }
    }
}

/// Access point the device broadcasts when no known network is reachable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPointProfile {
    /// SSID
    #[serde(default = "default_ssid")]
    pub ssid: String,
    /// Passphrase (WPA2), None for an open network
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
    /// Channel number
    #[serde(default = "default_channel")]
    pub channel: u8,
    /// Band: "2.4GHz" or "5GHz"
    #[serde(default = "default_band")]
    pub band: String,
    /// Country code (regulatory domain)
    #[serde(default = "default_country_code")]
    pub country_code: String,
    /// Hide the SSID from beacons
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub security: SecurityParams,
}

fn default_ssid() -> String {
    "ECLIPSEMONITOR".to_string()
}

fn default_channel() -> u8 {
    7
}

fn default_band() -> String {
    "2.4GHz".to_string()
}

fn default_country_code() -> String {
    "US".to_string()
}

impl Default for AccessPointProfile {
    fn default() -> Self {
        Self {
            ssid: default_ssid(),
            passphrase: None,
            channel: default_channel(),
            band: default_band(),
            country_code: default_country_code(),
            hidden: false,
            security: SecurityParams::default(),
        }
    }
}

impl AccessPointProfile {
    pub fn validate(&self) -> NetmodeResult<()> {
        validation::validate_ssid(&self.ssid)?;
        validation::validate_wifi_channel(self.channel, &self.band)?;
        validation::validate_country_code(&self.country_code)?;
        if let Some(ref passphrase) = self.passphrase {
            validation::validate_wifi_password(passphrase)?;
        }
        if !(1..=3).contains(&self.security.auth_algs) {
            return Err(NetmodeError::InvalidParameter(format!(
                "auth_algs must be 1, 2 or 3, got {}",
                self.security.auth_algs
            )));
        }
        if !(1..=3).contains(&self.security.wpa) {
            return Err(NetmodeError::InvalidParameter(format!(
                "wpa must be 1, 2 or 3, got {}",
                self.security.wpa
            )));
        }
        Ok(())
    }

    /// Generate hostapd configuration for `interface`
    pub fn render(&self, interface: &str) -> NetmodeResult<String> {
        validation::validate_interface_name(interface)?;
        self.validate()?;

        let mut conf = String::new();

        conf.push_str(&format!("interface={}\n", interface));
        conf.push_str("driver=nl80211\n");
        conf.push_str(&format!("ssid={}\n", self.ssid));
        conf.push_str(&format!("country_code={}\n", self.country_code.to_uppercase()));

        let hw_mode = if self.band == "5GHz" { "a" } else { "g" };
        conf.push_str(&format!("hw_mode={}\n", hw_mode));
        conf.push_str(&format!("channel={}\n", self.channel));
        conf.push_str("wmm_enabled=0\nmacaddr_acl=0\n");
        conf.push_str(&format!("auth_algs={}\n", self.security.auth_algs));
        conf.push_str(&format!(
            "ignore_broadcast_ssid={}\n",
            if self.hidden { 1 } else { 0 }
        ));

        if let Some(ref passphrase) = self.passphrase {
            conf.push_str(&format!("wpa={}\n", self.security.wpa));
            conf.push_str(&format!("wpa_passphrase={}\n", passphrase));
            conf.push_str(&format!("wpa_key_mgmt={}\n", self.security.key_mgmt.as_str()));
            conf.push_str(&format!("wpa_pairwise={}\n", self.security.pairwise.as_str()));
            conf.push_str(&format!("rsn_pairwise={}\n", self.security.pairwise.as_str()));
        }

        Ok(conf)
    }
}

/// hostapd controller
pub struct HostapdController {
    hostapd_bin: PathBuf,
    config_dir: PathBuf,
    pid_file: PidFile,
    timeout: Duration,
}

impl HostapdController {
    pub fn new(config_dir: PathBuf, timeout: Duration) -> Self {
        Self {
            hostapd_bin: PathBuf::from("/usr/sbin/hostapd"),
            pid_file: PidFile::new(config_dir.join("hostapd.pid")),
            config_dir,
            timeout,
        }
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join("hostapd.conf")
    }

    pub async fn write_config(
        &self,
        profile: &AccessPointProfile,
        interface: &str,
    ) -> NetmodeResult<PathBuf> {
        let conf = profile.render(interface)?;
        let conf_path = self.config_path();
        fs::create_dir_all(&self.config_dir).await?;
        fs::write(&conf_path, conf).await?;
        debug!("Wrote hostapd config to {}", conf_path.display());
        Ok(conf_path)
    }

    /// Start hostapd in the background with a freshly rendered config
    pub async fn start(&self, profile: &AccessPointProfile, interface: &str) -> NetmodeResult<()> {
        if self.is_running().await {
            debug!("hostapd already running");
            return Ok(());
        }

        let conf_path = self.write_config(profile, interface).await?;
        info!("Starting hostapd on {} (ssid {})", interface, profile.ssid);

        process::run(
            &self.hostapd_bin,
            [
                OsStr::new("-B"),
                OsStr::new("-P"),
                self.pid_file.path().as_os_str(),
                conf_path.as_os_str(),
            ],
            self.timeout,
        )
        .await?;

        if !self.pid_file.wait_until_running(self.timeout).await {
            return Err(NetmodeError::ServiceError(
                "hostapd process did not start successfully".to_string(),
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
