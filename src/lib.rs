#![cfg_attr(not(test), no_std)]

//! ESP32-C3 Sensor Web Server Library
//!
//! This library provides the pieces of a single-socket HTTP endpoint: a DHCP
//! lease manager, a transport adapter over one TCP socket, the per-socket
//! session state machine and the HTML response composer that embeds a live
//! analog sensor reading.

pub mod clock;
pub mod lease;
pub mod net;
pub mod response;
pub mod sensor;
pub mod session;
pub mod transport;

#[cfg(feature = "firmware")]
pub mod board;
#[cfg(feature = "firmware")]
pub mod wifi;

#[cfg(test)]
pub(crate) mod testing;

/// Project version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration constants
pub mod config {
    use crate::lease::LeaseMode;
    use core::net::Ipv4Addr;

    /// TCP port served by the web server
    pub const HTTP_PORT: u16 = 80;

    /// Socket handle number printed in connection log lines
    pub const SERVER_SOCKET: u8 = 1;

    /// Capacity of the request receive buffer
    pub const RX_BUFFER_SIZE: usize = 2048;

    /// Capacity of the TCP transmit ring
    pub const TX_BUFFER_SIZE: usize = 2048;

    /// Station MAC address
    pub const MAC_ADDRESS: [u8; 6] = [0x00, 0x08, 0xDC, 0x01, 0x02, 0x03];

    /// How the board obtains its IPv4 configuration
    pub const LEASE_MODE: LeaseMode = LeaseMode::Dhcp;

    /// Identity used when `LEASE_MODE` is `Static`
    pub const STATIC_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 12);
    pub const STATIC_GATEWAY: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);
    pub const STATIC_SUBNET: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);
    pub const STATIC_DNS: Ipv4Addr = Ipv4Addr::new(8, 8, 8, 8);

    /// Consecutive failed DHCP attempts tolerated before giving up
    pub const DHCP_MAX_RETRIES: u8 = 3;

    /// One DHCP attempt reports failure after this long without a lease
    pub const DHCP_ATTEMPT_TIMEOUT_MS: u64 = 10_000;

    /// Pause between DHCP protocol steps while acquiring a lease
    pub const DHCP_POLL_INTERVAL_MS: u32 = 10;

    /// Upper bound for pushing one response chunk into the socket
    pub const SEND_TIMEOUT_MS: u64 = 3_000;

    /// ADC1 channel sampled for the page (GPIO2 on ESP32-C3)
    pub const SENSOR_CHANNEL: u8 = 2;

    /// WiFi configuration
    /// Read from environment variables at compile time
    pub const WIFI_SSID: &str = env!("WIFI_SSID");
    pub const WIFI_PASSWORD: &str = env!("WIFI_PASSWORD");

    /// WiFi connection timeout in milliseconds
    pub const WIFI_CONNECT_TIMEOUT_MS: u32 = 10000;
}

/// Error types for board bring-up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardError {
    /// WiFi connection error
    WiFiError,
}

impl core::fmt::Display for BoardError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            BoardError::WiFiError => f.write_str("wifi link unavailable"),
        }
    }
}
