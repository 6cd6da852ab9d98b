//! Task Watchdog Timer (TWDT) driver.
//!
//! Resets the device if the main loop stalls for longer than
//! [`crate::config::WATCHDOG_TIMEOUT_MS`] — two orders of magnitude above
//! the poll cadence, so only a genuine hang (flash driver deadlock, BLE
//! stack lockup) trips it. `trigger_panic` routes the trip through the
//! panic hook, which lands a line in the diagnostic ring before the reset.
//!
//! The main loop must call `feed()` on every iteration. On the host the
//! driver counts its feeds instead, so tests can assert the loop honours
//! that contract.

use crate::config::WATCHDOG_TIMEOUT_MS;

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

#[cfg(target_os = "espidf")]
use log::info;

pub struct Watchdog {
    #[cfg(target_os = "espidf")]
    subscribed: bool,
    #[cfg(not(target_os = "espidf"))]
    feeds: core::cell::Cell<u32>,
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new()
    }
}

impl Watchdog {
    /// Initialise and subscribe the current task to the TWDT.
    pub fn new() -> Self {
        #[cfg(target_os = "espidf")]
        {
            unsafe {
                let cfg = esp_task_wdt_config_t {
                    timeout_ms: WATCHDOG_TIMEOUT_MS,
                    idle_core_mask: 0,
                    trigger_panic: true,
                };
                let ret = esp_task_wdt_reconfigure(&cfg);
                if ret != ESP_OK {
                    log::warn!("watchdog: reconfigure returned {} (may already be configured)", ret);
                }

                let ret = esp_task_wdt_add(core::ptr::null_mut());
                let subscribed = ret == ESP_OK;
                if subscribed {
                    info!(
                        "watchdog: subscribed ({} ms timeout, panic on trigger)",
                        WATCHDOG_TIMEOUT_MS
                    );
                } else {
                    log::warn!("watchdog: failed to subscribe ({})", ret);
                }

                Self { subscribed }
            }
        }

        #[cfg(not(target_os = "espidf"))]
        {
            log::info!("watchdog(sim): counting feeds ({} ms budget)", WATCHDOG_TIMEOUT_MS);
            Self {
                feeds: core::cell::Cell::new(0),
            }
        }
    }

    /// Feed the watchdog. Must be called more often than the timeout.
    pub fn feed(&self) {
        #[cfg(target_os = "espidf")]
        {
            if self.subscribed {
                unsafe {
                    esp_task_wdt_reset();
                }
            }
        }

        #[cfg(not(target_os = "espidf"))]
        self.feeds.set(self.feeds.get().saturating_add(1));
    }

    /// Feeds seen so far (host only; the device side has no readback).
    #[cfg(not(target_os = "espidf"))]
    pub fn feeds(&self) -> u32 {
        self.feeds.get()
    }
}
