//! Interrupt-to-task event core for ESP32 device drivers.
//!
//! Converts two classes of asynchronous hardware events — digital pin
//! transitions and periodic SPI transactions — into deterministic,
//! task-level callbacks. Interrupt-context code is bounded, non-blocking
//! and allocation-free; everything else (debouncing, dispatch, arming,
//! freeing) runs in one blocking consumer task per subsystem.
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ GPIO ISR    │────▶│  Wake queue  │────▶│ consumer task│──▶ EdgeDelegate
//! │ Timer cb    │────▶│  (counting)  │────▶│ consumer task│──▶ SerialDelegate
//! └─────────────┘     └──────────────┘     └──────────────┘
//! ```
//!
//! All ESP-IDF-specific code is guarded by `#[cfg(target_os = "espidf")]`;
//! host builds get a simulation fallback per module, so the full test suite
//! runs without the ESP toolchain.

#![deny(unused_must_use)]

pub mod config;
pub mod error;
pub mod pin;
pub mod spi;
pub mod time;

mod notify;
mod task;

pub use config::{DmaMode, SpiBusConfig, SpiHost, MAX_CLOCK_HZ, QUAD_PIN_DISABLED};
pub use error::{CapacityError, ConfigError, Error, LifecycleError, Result};
pub use pin::{DebounceFilter, EdgeDelegate, EdgePin, InputMode, TriggerMode};
pub use spi::{SerialDelegate, SerialStats, Slot, SpiScheduler, MAX_FRAME_LEN};
pub use task::{TaskOptions, DEFAULT_PRIORITY, DEFAULT_STACK_BYTES};
