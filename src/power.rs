//! Deep-sleep orchestration and wake-cause reporting.
//!
//! The device spends most of its life asleep: when the link has been idle
//! past its timeout the main loop checkpoints state and calls [`suspend`],
//! which arms an EXT0 wake on the airflow switch and enters deep sleep.
//! The next draw pulls the pin low and boots the firmware fresh; the
//! record log replays persisted state and the seeded airflow edge counts
//! the waking draw.

use crate::pins;

/// Why this boot happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    /// Cold boot: power applied, brown-out, or firmware flash.
    PowerOn,
    /// Deep-sleep wake via the airflow switch (a draw started).
    Draw,
    /// Any other wake source (raw cause code preserved for the log).
    Other(u32),
}

impl core::fmt::Display for WakeReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::PowerOn => write!(f, "power-on reset"),
            Self::Draw => write!(f, "airflow draw (EXT0)"),
            Self::Other(cause) => write!(f, "other ({})", cause),
        }
    }
}

/// Decode the wake cause left behind by the ROM bootloader.
#[cfg(target_os = "espidf")]
pub fn wake_reason() -> WakeReason {
    use esp_idf_svc::sys::*;
    let cause = unsafe { esp_sleep_get_wakeup_cause() };
    #[allow(non_upper_case_globals)]
    match cause {
        esp_sleep_source_t_ESP_SLEEP_WAKEUP_EXT0 => WakeReason::Draw,
        esp_sleep_source_t_ESP_SLEEP_WAKEUP_UNDEFINED => WakeReason::PowerOn,
        other => WakeReason::Other(other),
    }
}

/// Simulation: every start is a cold boot.
#[cfg(not(target_os = "espidf"))]
pub fn wake_reason() -> WakeReason {
    WakeReason::PowerOn
}

/// Arm the airflow wake source and enter deep sleep.  Does not return;
/// the next wake goes through reset and `main()`.
#[cfg(target_os = "espidf")]
pub fn suspend() -> ! {
    use esp_idf_svc::sys::*;

    log::info!("entering deep sleep (wake on draw)");

    // The normal GPIO matrix powers down in deep sleep; the RTC domain
    // has to hold the pull-up or the floating pin would wake us at once.
    unsafe {
        rtc_gpio_pullup_en(pins::AIRFLOW_SWITCH_GPIO);
        rtc_gpio_pulldown_dis(pins::AIRFLOW_SWITCH_GPIO);
        esp_sleep_enable_ext0_wakeup(pins::AIRFLOW_SWITCH_GPIO, pins::AIRFLOW_ACTIVE_LEVEL);
        esp_deep_sleep_start();
    }
    unreachable!("esp_deep_sleep_start does not return")
}

/// Simulation: a process has no deep sleep; exit cleanly instead.
#[cfg(not(target_os = "espidf"))]
pub fn suspend() -> ! {
    log::info!("suspend(sim): exiting");
    std::process::exit(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sim_boot_is_power_on() {
        assert_eq!(wake_reason(), WakeReason::PowerOn);
    }

    #[test]
    fn wake_reason_display() {
        assert_eq!(WakeReason::PowerOn.to_string(), "power-on reset");
        assert_eq!(WakeReason::Draw.to_string(), "airflow draw (EXT0)");
        assert_eq!(WakeReason::Other(4).to_string(), "other (4)");
    }
}
