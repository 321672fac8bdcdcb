//! systemd unit control via systemctl

use crate::error::{NetmodeError, NetmodeResult};
use crate::process;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

pub struct SystemctlController {
    systemctl_bin: PathBuf,
    timeout: Duration,
}

impl SystemctlController {
    pub fn new(timeout: Duration) -> Self {
        Self {
            systemctl_bin: PathBuf::from("/bin/systemctl"),
            timeout,
        }
    }

    #[cfg(test)]
    fn with_binary(systemctl_bin: PathBuf, timeout: Duration) -> Self {
        Self {
            systemctl_bin,
            timeout,
        }
    }

    /// Start a unit and confirm it came up
    ///
    /// `systemctl start` exits 0 for a unit skipped by a failed `Condition*=`,
    /// so the unit state is checked afterwards.
    pub async fn start(&self, unit: &str) -> NetmodeResult<()> {
        validate_unit_name(unit)?;
        info!("systemctl start {}", unit);
        process::run(&self.systemctl_bin, ["start", unit], self.timeout).await?;

        if !self.is_active(unit).await? {
            return Err(NetmodeError::ServiceError(format!(
                "{} is not active after start (unit condition failed?)",
                unit
            )));
        }
        Ok(())
    }

    pub async fn stop(&self, unit: &str) -> NetmodeResult<()> {
        validate_unit_name(unit)?;
        info!("systemctl stop {}", unit);
        process::run(&self.systemctl_bin, ["stop", unit], self.timeout).await?;
        Ok(())
    }

    /// `systemctl is-active` exits non-zero for anything but "active"
    pub async fn is_active(&self, unit: &str) -> NetmodeResult<bool> {
        validate_unit_name(unit)?;
        match process::run(&self.systemctl_bin, ["is-active", "--quiet", unit], self.timeout).await {
            Ok(_) => Ok(true),
            Err(NetmodeError::CommandFailed { code: Some(_), .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Unit names go straight onto the command line
pub fn validate_unit_name(unit: &str) -> NetmodeResult<()> {
    let valid = !unit.is_empty()
        && !unit.starts_with('-')
        && unit
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "@._-:\\".contains(c));
    if !valid {
        return Err(NetmodeError::InvalidParameter(format!(
            "Invalid systemd unit name: '{}'",
            unit
        )));
    }
    Ok(())
}

/// Expand the `{iface}` placeholder in a unit template
pub fn expand_unit(template: &str, interface: &str) -> String {
    template.replace("{iface}", interface)
}
