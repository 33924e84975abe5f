//! ESP32-C3 bindings for the hardware seams: system timer clock and ADC1 sensor.

use crate::clock::Clock;
use crate::config;
use crate::sensor::{AnalogSensor, SensorReading};
use esp_hal::Blocking;
use esp_hal::analog::adc::{Adc, AdcPin};
use esp_hal::delay::Delay;
use esp_hal::peripherals::{ADC1, GPIO2};
use esp_hal::time::Instant;
use log::warn;

/// Millisecond clock backed by the system timer
pub struct BoardClock {
    delay: Delay,
}

impl BoardClock {
    pub fn new() -> Self {
        Self {
            delay: Delay::new(),
        }
    }
}

impl Default for BoardClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for BoardClock {
    fn now_ms(&self) -> u64 {
        Instant::now().duration_since_epoch().as_millis()
    }

    fn sleep_ms(&self, ms: u32) {
        self.delay.delay_millis(ms);
    }
}

pub type SensorAdc = Adc<'static, ADC1<'static>, Blocking>;
pub type SensorPin = AdcPin<GPIO2<'static>, ADC1<'static>>;

// oneshot conversions finish in a few microseconds
const CONVERSION_SPIN_LIMIT: u32 = 10_000;

/// One-shot reads of ADC1 channel 2 (GPIO2)
pub struct AdcSensor {
    adc: SensorAdc,
    pin: SensorPin,
    last: u16,
}

impl AdcSensor {
    pub fn new(adc: SensorAdc, pin: SensorPin) -> Self {
        Self { adc, pin, last: 0 }
    }
}

impl AnalogSensor for AdcSensor {
    fn sample(&mut self) -> SensorReading {
        let mut spins = 0;
        let raw = loop {
            match self.adc.read_oneshot(&mut self.pin) {
                Ok(raw) => break raw,
                Err(_) if spins < CONVERSION_SPIN_LIMIT => spins += 1,
                Err(_) => {
                    warn!("[ADC] Conversion did not finish, reusing {}", self.last);
                    break self.last;
                }
            }
        };
        self.last = raw;

        SensorReading {
            channel: config::SENSOR_CHANNEL,
            raw,
        }
    }
}
