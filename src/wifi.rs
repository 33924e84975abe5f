//! WiFi link for ESP32-C3 board
//!
//! Brings the station interface up and keeps track of association. Addressing
//! is not handled here; the smoltcp stack in `net` owns DHCP.

use crate::clock::{self, Clock};
use crate::{BoardError, config};
use esp_wifi::wifi::{AuthMethod, ClientConfiguration, Configuration, WifiController};
use log::{info, warn};

/// WiFi manager for the station link
pub struct WiFiManager<'a> {
    controller: WifiController<'a>,
    is_connected: bool,
}

impl<'a> WiFiManager<'a> {
    pub fn new(controller: WifiController<'a>) -> Self {
        Self {
            controller,
            is_connected: false,
        }
    }

    /// Associate with `ssid`, waiting up to `WIFI_CONNECT_TIMEOUT_MS`.
    pub fn connect<C: Clock>(&mut self, ssid: &str, password: &str, clock: &C) -> Result<(), BoardError> {
        info!("[WIFI] Connecting to WiFi network: {}", ssid);

        let auth_method = if password.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };
        let client_config = ClientConfiguration {
            ssid: ssid.try_into().map_err(|_| BoardError::WiFiError)?,
            password: password.try_into().map_err(|_| BoardError::WiFiError)?,
            auth_method,
            ..Default::default()
        };

        self.controller
            .set_configuration(&Configuration::Client(client_config))
            .map_err(|_| BoardError::WiFiError)?;
        self.controller.start().map_err(|_| BoardError::WiFiError)?;
        self.controller.connect().map_err(|_| BoardError::WiFiError)?;

        let started = clock.now_ms();
        while !self.controller.is_connected().unwrap_or(false) {
            if clock::elapsed(clock, started, u64::from(config::WIFI_CONNECT_TIMEOUT_MS)) {
                warn!("[WIFI] Failed to connect within {} ms", config::WIFI_CONNECT_TIMEOUT_MS);
                return Err(BoardError::WiFiError);
            }
            clock.sleep_ms(100);
        }

        self.is_connected = true;
        info!("[WIFI] Link up");
        Ok(())
    }

    /// Check if WiFi is connected
    pub fn is_connected(&self) -> bool {
        self.is_connected && self.controller.is_connected().unwrap_or(false)
    }

    /// Log link changes; returns the current link state.
    pub fn monitor_connection(&mut self) -> bool {
        let current = self.controller.is_connected().unwrap_or(false);

        if self.is_connected && !current {
            warn!("[WIFI] WiFi connection lost!");
        } else if !self.is_connected && current {
            info!("[WIFI] WiFi connection restored!");
        }
        self.is_connected = current;
        current
    }
}
