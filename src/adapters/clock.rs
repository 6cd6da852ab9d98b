//! System clock adapter.
//!
//! Implements [`ClockPort`] for both targets:
//!
//! - **`target_os = "espidf"`** — `esp_timer_get_time()` for the monotonic
//!   side (microsecond precision since boot) and `gettimeofday` /
//!   `settimeofday` for the wall clock.  Deep sleep resets the wall clock,
//!   so the boot path re-seeds it from the newest persisted timestamp.
//! - **`not(target_os = "espidf")`** — `std::time::Instant` plus an explicit
//!   epoch offset for host-side testing and simulation.

use crate::app::ports::ClockPort;

/// Time source backed by the platform clock.
pub struct SystemClock {
    #[cfg(not(target_os = "espidf"))]
    start: std::time::Instant,
    /// Wall-clock value that corresponds to `start`.
    #[cfg(not(target_os = "espidf"))]
    epoch_at_start: u32,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            #[cfg(not(target_os = "espidf"))]
            start: std::time::Instant::now(),
            #[cfg(not(target_os = "espidf"))]
            epoch_at_start: 0,
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn elapsed_secs(&self) -> u32 {
        u32::try_from(self.start.elapsed().as_secs()).unwrap_or(u32::MAX)
    }
}

#[cfg(target_os = "espidf")]
impl ClockPort for SystemClock {
    fn monotonic_ms(&self) -> u64 {
        (unsafe { esp_idf_svc::sys::esp_timer_get_time() }) as u64 / 1_000
    }

    fn epoch_seconds(&self) -> u32 {
        let mut tv = esp_idf_svc::sys::timeval {
            tv_sec: 0,
            tv_usec: 0,
        };
        if unsafe { esp_idf_svc::sys::gettimeofday(&mut tv, core::ptr::null_mut()) } != 0 {
            return 0;
        }
        u32::try_from(tv.tv_sec).unwrap_or(0)
    }

    fn set_epoch_seconds(&mut self, epoch: u32) {
        let tv = esp_idf_svc::sys::timeval {
            tv_sec: epoch as _,
            tv_usec: 0,
        };
        unsafe {
            esp_idf_svc::sys::settimeofday(&tv, core::ptr::null());
        }
    }
}

#[cfg(not(target_os = "espidf"))]
impl ClockPort for SystemClock {
    fn monotonic_ms(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn epoch_seconds(&self) -> u32 {
        self.epoch_at_start.saturating_add(self.elapsed_secs())
    }

    fn set_epoch_seconds(&mut self, epoch: u32) {
        self.epoch_at_start = epoch.saturating_sub(self.elapsed_secs());
    }
}
