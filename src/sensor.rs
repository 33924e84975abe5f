//! Analog sensor seam

/// One ADC conversion taken for a single request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorReading {
    pub channel: u8,
    pub raw: u16,
}

impl SensorReading {
    /// Value used for both gauge gradient stops
    pub fn half(&self) -> u16 {
        self.raw / 2
    }
}

/// Source of fresh sensor readings
pub trait AnalogSensor {
    /// Sample the configured channel once.
    fn sample(&mut self) -> SensorReading;
}
