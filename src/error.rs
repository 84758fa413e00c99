//! Unified error types for the event core.
//!
//! A single `Error` enum that every fallible operation funnels into, keeping
//! caller-side handling uniform. All variants are `Copy` so they can be
//! passed between tasks without allocation.
//!
//! Interrupt-context code never constructs these: bus-level transceive
//! failures inside the firing path have no safe reporting channel and are
//! only counted (see [`SerialStats`](crate::spi::SerialStats)).

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible task-context operation in the crate funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The bus configuration was rejected or the bus is already active.
    Config(ConfigError),
    /// A fixed resource (transaction slot, frame buffer) is exhausted.
    Capacity(CapacityError),
    /// An operation was called out of lifecycle order.
    Lifecycle(LifecycleError),
    /// Platform peripheral initialisation failed.
    Init(&'static str),
    /// Consumer task creation failed.
    Spawn,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Capacity(e) => write!(f, "capacity: {e}"),
            Self::Lifecycle(e) => write!(f, "lifecycle: {e}"),
            Self::Init(msg) => write!(f, "init: {msg}"),
            Self::Spawn => write!(f, "consumer task spawn failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// `init_serial_protocol` was called on an already-initialised instance.
    AlreadyInitialized,
    /// Two enabled bus signals are mapped to the same GPIO.
    PinConflict,
    /// Clock speed is zero or above the bus maximum.
    InvalidClockSpeed,
    /// Duty cycle exceeds 256 parts.
    InvalidDutyCycle,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyInitialized => write!(f, "bus already initialised"),
            Self::PinConflict => write!(f, "conflicting pin assignment"),
            Self::InvalidClockSpeed => write!(f, "clock speed out of range"),
            Self::InvalidDutyCycle => write!(f, "duty cycle out of range"),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

// ---------------------------------------------------------------------------
// Capacity errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityError {
    /// Both periodic timer slots are armed; free one first.
    NoFreePeriodicSlot,
    /// The one-shot slot still holds a transaction awaiting completion.
    OneShotPending,
    /// Payload exceeds [`MAX_FRAME_LEN`](crate::spi::MAX_FRAME_LEN).
    FrameTooLong,
}

impl fmt::Display for CapacityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoFreePeriodicSlot => write!(f, "no free periodic slot"),
            Self::OneShotPending => write!(f, "one-shot slot still pending"),
            Self::FrameTooLong => write!(f, "frame exceeds buffer capacity"),
        }
    }
}

impl From<CapacityError> for Error {
    fn from(e: CapacityError) -> Self {
        Self::Capacity(e)
    }
}

// ---------------------------------------------------------------------------
// Lifecycle errors
// ---------------------------------------------------------------------------

/// Lifecycle misuse is an explicit failure or a safe no-op, never UB:
/// double-stop and stop-before-start are no-ops, double-start and
/// operate-before-init return these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleError {
    /// `set_transaction_periodic` before a successful `init_serial_protocol`.
    NotInitialized,
    /// `start_tasks` called while the consumer task is already running.
    TaskAlreadyStarted,
}

impl fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInitialized => write!(f, "not initialised"),
            Self::TaskAlreadyStarted => write!(f, "consumer task already started"),
        }
    }
}

impl From<LifecycleError> for Error {
    fn from(e: LifecycleError) -> Self {
        Self::Lifecycle(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
