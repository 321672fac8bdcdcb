//! netmode - WiFi client / access-point fallback
//!
//! Boot-time network mode controller for headless devices:
//! - Association check against wpa_supplicant
//! - Access point fallback (hostapd)
//! - DHCP for access-point clients (dnsmasq)
//! - systemd or direct process control
//! - Optional reconciliation loop with back-off
//!
//! The policy lives in [`controller`]; everything it does to the system goes
//! through the [`daemon::NetworkDaemonController`] trait.

pub mod error;
pub mod validation;
pub mod config;
pub mod mode;
pub mod process;
pub mod hostapd;
pub mod dnsmasq;
pub mod wpa_supplicant;
pub mod systemd;
pub mod daemon;
pub mod lock;
pub mod controller;

// Re-export commonly used types
pub use error::{NetmodeError, NetmodeResult};
pub use config::{Backend, NetmodeConfig, DEFAULT_CONFIG_PATH, MAX_RUN_SECS};
pub use mode::{Mode, ModeTransition, TransitionAction, TransitionResult, WirelessInterface};
pub use hostapd::{AccessPointProfile, HostapdController, SecurityParams};
pub use dnsmasq::{DhcpLeasePool, DnsmasqController};
pub use wpa_supplicant::{WpaState, WpaStatus, WpaSupplicantController};
pub use daemon::{Daemon, NetworkDaemonController, SystemDaemonController};
pub use lock::InstanceLock;
pub use controller::{NetworkModeController, ReconcilePolicy};
