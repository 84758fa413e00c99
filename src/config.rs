//! SPI bus configuration value object.
//!
//! Assigns pins, speeds and DMA mode for one bus instance. A functional
//! default exists so a caller may omit the configuration entirely. The value
//! is consumed once by [`init_serial_protocol`](crate::spi::SpiScheduler::init_serial_protocol)
//! and is immutable for the instance's lifetime.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Sentinel for the optional quad-mode pins: -1 means "not routed".
pub const QUAD_PIN_DISABLED: i32 = -1;

/// Upper clock bound: 80 MHz on the dedicated SPI pins (GPIO-matrix-routed
/// pins top out at 40 MHz, which the driver clamps on its own).
pub const MAX_CLOCK_HZ: u32 = 80_000_000;

/// General-purpose SPI hosts on the ESP32 (SPI1 is flash-reserved).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpiHost {
    Spi2,
    Spi3,
}

/// DMA channel selection, mirroring `spi_bus_initialize()`'s `dma_chan`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DmaMode {
    Disabled,
    Channel1,
    Channel2,
    /// Let the driver pick a free channel.
    Auto,
}

/// Config data for the serial bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpiBusConfig {
    /// Bus host peripheral.
    pub host: SpiHost,
    pub mosi_gpio: i32,
    pub miso_gpio: i32,
    pub sclk_gpio: i32,
    /// QUADWP pin ([`QUAD_PIN_DISABLED`] if not applied).
    pub quadwp_gpio: i32,
    /// QUADHD pin ([`QUAD_PIN_DISABLED`] if not applied).
    pub quadhd_gpio: i32,
    /// Chip-select pin for the attached slave.
    pub cs_gpio: i32,
    pub dma: DmaMode,
    /// Bus speed in Hz.
    pub clock_hz: u32,
    /// Duty cycle in nth of 256: 128 is 50%.
    pub duty_cycle_pos: u16,
}

impl Default for SpiBusConfig {
    fn default() -> Self {
        Self {
            host: SpiHost::Spi2,
            mosi_gpio: 12,
            miso_gpio: 13,
            sclk_gpio: 15,
            quadwp_gpio: QUAD_PIN_DISABLED,
            quadhd_gpio: QUAD_PIN_DISABLED,
            cs_gpio: 14,
            dma: DmaMode::Auto,
            clock_hz: 5_000_000,
            duty_cycle_pos: 128,
        }
    }
}

impl SpiBusConfig {
    /// Reject configurations the bus driver would fail on anyway, so the
    /// caller gets a typed error instead of a raw driver return code.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.clock_hz == 0 || self.clock_hz > MAX_CLOCK_HZ {
            return Err(ConfigError::InvalidClockSpeed);
        }
        if self.duty_cycle_pos > 256 {
            return Err(ConfigError::InvalidDutyCycle);
        }

        let mut pins = heapless::Vec::<i32, 6>::new();
        let enabled = [
            self.mosi_gpio,
            self.miso_gpio,
            self.sclk_gpio,
            self.cs_gpio,
            self.quadwp_gpio,
            self.quadhd_gpio,
        ];
        for pin in enabled {
            if pin == QUAD_PIN_DISABLED {
                continue;
            }
            if pins.contains(&pin) {
                return Err(ConfigError::PinConflict);
            }
            let _ = pins.push(pin);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_sane() {
        let c = SpiBusConfig::default();
        assert_eq!(c.host, SpiHost::Spi2);
        assert_eq!(c.quadwp_gpio, QUAD_PIN_DISABLED);
        assert_eq!(c.quadhd_gpio, QUAD_PIN_DISABLED);
        assert!(c.clock_hz > 0 && c.clock_hz <= MAX_CLOCK_HZ);
        assert!(c.duty_cycle_pos <= 256);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn serde_roundtrip() {
        let c = SpiBusConfig::default();
        let json = serde_json::to_string(&c).unwrap();
        let c2: SpiBusConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(c, c2);
    }

    #[test]
    fn duplicate_pins_rejected() {
        let c = SpiBusConfig {
            miso_gpio: 12, // collides with default MOSI
            ..SpiBusConfig::default()
        };
        assert_eq!(c.validate(), Err(ConfigError::PinConflict));
    }

    #[test]
    fn disabled_quad_pins_do_not_conflict() {
        // Both quad pins carry the sentinel; that is not a collision.
        let c = SpiBusConfig::default();
        assert_eq!(c.quadwp_gpio, c.quadhd_gpio);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn quad_pin_collision_rejected() {
        let c = SpiBusConfig {
            quadwp_gpio: 14, // collides with default CS
            ..SpiBusConfig::default()
        };
        assert_eq!(c.validate(), Err(ConfigError::PinConflict));
    }

    #[test]
    fn clock_bounds_enforced() {
        let zero = SpiBusConfig {
            clock_hz: 0,
            ..SpiBusConfig::default()
        };
        assert_eq!(zero.validate(), Err(ConfigError::InvalidClockSpeed));

        let fast = SpiBusConfig {
            clock_hz: MAX_CLOCK_HZ + 1,
            ..SpiBusConfig::default()
        };
        assert_eq!(fast.validate(), Err(ConfigError::InvalidClockSpeed));
    }

    #[test]
    fn duty_cycle_bound_enforced() {
        let c = SpiBusConfig {
            duty_cycle_pos: 257,
            ..SpiBusConfig::default()
        };
        assert_eq!(c.validate(), Err(ConfigError::InvalidDutyCycle));

        let full = SpiBusConfig {
            duty_cycle_pos: 256,
            ..SpiBusConfig::default()
        };
        assert!(full.validate().is_ok());
    }
}
