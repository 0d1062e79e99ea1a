//! Platform-specific Bluetooth tuning for command sessions.
//!
//! | Platform | BLE Stack | Address Format | Notes |
//! |----------|-----------|----------------|-------|
//! | macOS | CoreBluetooth | UUID | Peripherals must be seen in a scan before connecting |
//! | Linux | BlueZ | MAC Address | Connect can take a few seconds longer |
//! | Windows | WinRT | MAC Address | Generally reliable defaults |
//!
//! The values here are resolved once, when a transport or session config is
//! built, and never re-checked on the write path.

use std::time::Duration;

use crate::transport::TransportCapabilities;

/// Platform identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// macOS with CoreBluetooth
    MacOS,
    /// Linux with BlueZ
    Linux,
    /// Windows with WinRT
    Windows,
    /// Unknown or unsupported platform
    Unknown,
}

impl Platform {
    /// Detect the current platform.
    pub fn current() -> Self {
        #[cfg(target_os = "macos")]
        {
            Platform::MacOS
        }
        #[cfg(target_os = "linux")]
        {
            Platform::Linux
        }
        #[cfg(target_os = "windows")]
        {
            Platform::Windows
        }
        #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
        {
            Platform::Unknown
        }
    }
}

/// Platform-specific BLE configuration.
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    /// The platform this configuration is for.
    pub platform: Platform,

    /// Recommended wall-clock budget for one command session.
    pub recommended_deadline: Duration,

    /// How long to wait for a link to report down after a session
    /// resolves before the handle is released anyway.
    pub teardown_grace: Duration,

    /// Scan time spent locating a peripheral the adapter has not seen yet.
    pub lookup_scan_duration: Duration,

    /// Whether the stack reports write-with-response acknowledgements.
    pub acknowledged_writes: bool,

    /// Whether the platform exposes MAC addresses (false on macOS).
    pub exposes_mac_address: bool,
}

impl PlatformConfig {
    /// Get the configuration for the current platform.
    pub fn for_current_platform() -> Self {
        Self::for_platform(Platform::current())
    }

    /// Get the configuration for a specific platform.
    pub fn for_platform(platform: Platform) -> Self {
        match platform {
            Platform::MacOS => Self::macos(),
            Platform::Linux => Self::linux(),
            Platform::Windows => Self::windows(),
            Platform::Unknown => Self::default(),
        }
    }

    /// Configuration for macOS with CoreBluetooth.
    pub fn macos() -> Self {
        Self {
            platform: Platform::MacOS,
            recommended_deadline: Duration::from_secs(5),
            teardown_grace: Duration::from_millis(500),
            // Peripherals are only connectable once CoreBluetooth has seen them
            lookup_scan_duration: Duration::from_secs(3),
            acknowledged_writes: true,
            exposes_mac_address: false,
        }
    }

    /// Configuration for Linux with BlueZ.
    pub fn linux() -> Self {
        Self {
            platform: Platform::Linux,
            // BlueZ connects are slower; leave room for discovery
            recommended_deadline: Duration::from_secs(8),
            teardown_grace: Duration::from_millis(750),
            lookup_scan_duration: Duration::from_secs(2),
            acknowledged_writes: true,
            exposes_mac_address: true,
        }
    }

    /// Configuration for Windows with WinRT.
    pub fn windows() -> Self {
        Self {
            platform: Platform::Windows,
            recommended_deadline: Duration::from_secs(6),
            teardown_grace: Duration::from_millis(500),
            lookup_scan_duration: Duration::from_secs(2),
            acknowledged_writes: true,
            exposes_mac_address: true,
        }
    }

    /// Transport capabilities implied by this platform.
    pub fn capabilities(&self) -> TransportCapabilities {
        TransportCapabilities {
            acknowledged_writes: self.acknowledged_writes,
        }
    }
}

impl Default for PlatformConfig {
    /// Conservative configuration for unknown stacks: plain writes only.
    fn default() -> Self {
        Self {
            platform: Platform::Unknown,
            recommended_deadline: Duration::from_secs(5),
            teardown_grace: Duration::from_millis(500),
            lookup_scan_duration: Duration::from_secs(3),
            acknowledged_writes: false,
            exposes_mac_address: true,
        }
    }
}
