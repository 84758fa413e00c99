//! Monotonic millisecond clock shared by both execution contexts.
//!
//! - **`target_os = "espidf"`** — wraps `esp_timer_get_time()` from the
//!   ESP-IDF high-resolution timer (microsecond precision, monotonic,
//!   readable from ISR context).
//! - **`not(target_os = "espidf")`** — uses `std::time::Instant` for
//!   host-side testing and simulation.
//!
//! The value truncates to `u32` and wraps after ~49.7 days; consumers
//! compare timestamps with `wrapping_sub`, never direct ordering.

/// Milliseconds since boot (monotonic, wraps at `u32::MAX`).
#[cfg(target_os = "espidf")]
pub fn now_ms() -> u32 {
    // SAFETY: esp_timer_get_time is a monotonic counter read; safe in any
    // context including ISRs.
    ((unsafe { esp_idf_svc::sys::esp_timer_get_time() }) / 1_000) as u32
}

/// Milliseconds since first call (monotonic, wraps at `u32::MAX`).
#[cfg(not(target_os = "espidf"))]
pub fn now_ms() -> u32 {
    use std::sync::OnceLock;
    use std::time::Instant;

    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now).elapsed().as_millis() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_within_wrap_window() {
        let a = now_ms();
        let b = now_ms();
        // Within one test run the clock cannot wrap; wrapping_sub is the
        // contract consumers use.
        assert!(b.wrapping_sub(a) < 1_000);
    }
}
