//! Input validation
//!
//! Everything that ends up in a rendered daemon config or on a command line
//! goes through here first.

use crate::error::{NetmodeError, NetmodeResult};
use std::net::Ipv4Addr;

/// Maximum length for interface names (Linux kernel limit is 15)
const MAX_INTERFACE_NAME_LEN: usize = 15;

/// Maximum SSID length in bytes (IEEE 802.11)
const MAX_SSID_LEN: usize = 32;

/// Validate interface name to prevent command injection
///
/// Interface names must be alphanumeric with optional dashes and underscores,
/// and no longer than 15 characters (Linux kernel limit)
pub fn validate_interface_name(name: &str) -> NetmodeResult<()> {
    if name.is_empty() {
        return Err(NetmodeError::InvalidParameter(
            "Interface name cannot be empty".to_string(),
        ));
    }

    if name.len() > MAX_INTERFACE_NAME_LEN {
        return Err(NetmodeError::InvalidParameter(format!(
            "Interface name too long (max {} characters)",
            MAX_INTERFACE_NAME_LEN
        )));
    }

    if name.starts_with('-') {
        return Err(NetmodeError::InvalidParameter(
            "Interface name cannot start with dash".to_string(),
        ));
    }

    if let Some(c) = name
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && *c != '-' && *c != '_')
    {
        return Err(NetmodeError::InvalidParameter(format!(
            "Invalid interface name '{}': contains invalid character '{}'",
            name, c
        )));
    }

    Ok(())
}

/// Validate a netmask: contiguous ones followed by contiguous zeros
pub fn validate_netmask(mask: Ipv4Addr) -> NetmodeResult<()> {
    let bits = u32::from(mask);
    if bits == 0 || bits.leading_ones() + bits.trailing_zeros() != 32 {
        return Err(NetmodeError::InvalidParameter(format!(
            "Invalid netmask: {}",
            mask
        )));
    }
    Ok(())
}

/// Validate a DHCP range against the gateway address and mask
///
/// `start..=end` must be ordered, and start, end and gateway must share one
/// subnet. The gateway must not fall inside the range it hands out.
pub fn validate_lease_range(
    start: Ipv4Addr,
    end: Ipv4Addr,
    gateway: Ipv4Addr,
    mask: Ipv4Addr,
) -> NetmodeResult<()> {
    validate_netmask(mask)?;

    if u32::from(start) > u32::from(end) {
        return Err(NetmodeError::InvalidParameter(format!(
            "DHCP range start {} is after end {}",
            start, end
        )));
    }

    let mask_bits = u32::from(mask);
    let network = u32::from(gateway) & mask_bits;
    for addr in [start, end] {
        if u32::from(addr) & mask_bits != network {
            return Err(NetmodeError::InvalidParameter(format!(
                "DHCP address {} is outside the gateway subnet {}/{}",
                addr,
                Ipv4Addr::from(network),
                mask_bits.leading_ones()
            )));
        }
    }

    if (u32::from(start)..=u32::from(end)).contains(&u32::from(gateway)) {
        return Err(NetmodeError::InvalidParameter(format!(
            "Gateway {} lies inside the DHCP range",
            gateway
        )));
    }

    Ok(())
}

/// Validate WiFi SSID
pub fn validate_ssid(ssid: &str) -> NetmodeResult<()> {
    if ssid.is_empty() {
        return Err(NetmodeError::InvalidParameter(
            "SSID cannot be empty".to_string(),
        ));
    }

    if ssid.len() > MAX_SSID_LEN {
        return Err(NetmodeError::InvalidParameter(format!(
            "SSID cannot exceed {} bytes",
            MAX_SSID_LEN
        )));
    }

    // Newlines would break hostapd.conf
    if ssid.chars().any(|c| c.is_control()) {
        return Err(NetmodeError::InvalidParameter(
            "SSID contains invalid control characters".to_string(),
        ));
    }

    Ok(())
}

/// Validate WiFi passphrase (WPA2: 8-63 ASCII characters)
pub fn validate_wifi_password(password: &str) -> NetmodeResult<()> {
    if password.len() < 8 {
        return Err(NetmodeError::InvalidParameter(
            "WiFi password must be at least 8 characters".to_string(),
        ));
    }

    if password.len() > 63 {
        return Err(NetmodeError::InvalidParameter(
            "WiFi password cannot exceed 63 characters".to_string(),
        ));
    }

    if !password.is_ascii() {
        return Err(NetmodeError::InvalidParameter(
            "WiFi password must contain only ASCII characters".to_string(),
        ));
    }

    if password.chars().any(|c| c.is_control()) {
        return Err(NetmodeError::InvalidParameter(
            "WiFi password contains invalid control characters".to_string(),
        ));
    }

    Ok(())
}

/// Validate country code (ISO 3166-1 alpha-2 shape)
pub fn validate_country_code(code: &str) -> NetmodeResult<()> {
    if code.len() != 2 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(NetmodeError::InvalidParameter(format!(
            "Country code must be two letters, got '{}'",
            code
        )));
    }
    Ok(())
}

/// Validate WiFi channel for a given band
pub fn validate_wifi_channel(channel: u8, band: &str) -> NetmodeResult<()> {
    let valid_channels: &[u8] = match band {
        "2.4GHz" => &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13],
        "5GHz" => &[
            36, 40, 44, 48, 52, 56, 60, 64, 100, 104, 108, 112, 116, 120, 124, 128, 132, 136,
            140, 149, 153, 157, 161, 165,
        ],
        _ => {
            return Err(NetmodeError::InvalidParameter(format!(
                "Invalid band: {}",
                band
            )))
        }
    };

    if !valid_channels.contains(&channel) {
        return Err(NetmodeError::InvalidParameter(format!(
            "Invalid channel {} for band {}",
            channel, band
        )));
    }

    Ok(())
}
