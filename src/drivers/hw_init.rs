//! One-shot hardware peripheral initialization.
//!
//! Configures the two wisp GPIOs (airflow switch input, coil gate output)
//! and the edge interrupt on the airflow pin using raw ESP-IDF sys calls.
//! Called once from `main()` before the event loop starts.

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

// ── Error type ────────────────────────────────────────────────

/// Errors during one-shot peripheral initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwInitError {
    GpioConfigFailed(i32),
    IsrInstallFailed(i32),
}

impl core::fmt::Display for HwInitError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::GpioConfigFailed(rc) => write!(f, "GPIO config failed (rc={})", rc),
            Self::IsrInstallFailed(rc) => write!(f, "GPIO ISR service install failed (rc={})", rc),
        }
    }
}

#[cfg(target_os = "espidf")]
use log::info;

use crate::pins;

#[cfg(target_os = "espidf")]
pub fn init_peripherals() -> Result<(), HwInitError> {
    // SAFETY: Called once from main() before event loop; single-threaded.
    unsafe {
        init_airflow_input()?;
        init_coil_output()?;
    }
    info!("hw_init: all peripherals configured");
    Ok(())
}

#[cfg(not(target_os = "espidf"))]
pub fn init_peripherals() -> Result<(), HwInitError> {
    log::info!("hw_init(sim): peripheral init skipped");
    Ok(())
}

// ── Airflow switch input ──────────────────────────────────────

#[cfg(target_os = "espidf")]
unsafe fn init_airflow_input() -> Result<(), HwInitError> {
    // Internal pull-up keeps the pin HIGH while idle; the diaphragm switch
    // shorts it to ground during a draw.  Edge type is set later, when the
    // ISR service comes up.
    let cfg = gpio_config_t {
        pin_bit_mask: 1u64 << pins::AIRFLOW_SWITCH_GPIO,
        mode: gpio_mode_t_GPIO_MODE_INPUT,
        pull_up_en: gpio_pullup_t_GPIO_PULLUP_ENABLE,
        pull_down_en: gpio_pulldown_t_GPIO_PULLDOWN_DISABLE,
        intr_type: gpio_int_type_t_GPIO_INTR_DISABLE,
    };
    let ret = unsafe { gpio_config(&cfg) };
    if ret != ESP_OK as i32 {
        return Err(HwInitError::GpioConfigFailed(ret));
    }

    info!("hw_init: airflow input configured");
    Ok(())
}

// ── Coil gate output ──────────────────────────────────────────

#[cfg(target_os = "espidf")]
unsafe fn init_coil_output() -> Result<(), HwInitError> {
    let cfg = gpio_config_t {
        pin_bit_mask: 1u64 << pins::COIL_ENABLE_GPIO,
        mode: gpio_mode_t_GPIO_MODE_OUTPUT,
        pull_up_en: gpio_pullup_t_GPIO_PULLUP_DISABLE,
        pull_down_en: gpio_pulldown_t_GPIO_PULLDOWN_DISABLE,
        intr_type: gpio_int_type_t_GPIO_INTR_DISABLE,
    };
    let ret = unsafe { gpio_config(&cfg) };
    if ret != ESP_OK as i32 {
        return Err(HwInitError::GpioConfigFailed(ret));
    }

    // The gate stays closed until the usage policy has been consulted.
    unsafe { gpio_set_level(pins::COIL_ENABLE_GPIO, 0) };

    info!("hw_init: coil gate output configured (held LOW)");
    Ok(())
}

// ── GPIO helpers ──────────────────────────────────────────────

#[cfg(target_os = "espidf")]
pub fn gpio_read(pin: i32) -> bool {
    // SAFETY: gpio_get_level is a read-only register access on an
    // already-configured input pin; safe to call from main context.
    (unsafe { gpio_get_level(pin) }) != 0
}

#[cfg(not(target_os = "espidf"))]
pub fn gpio_read(_pin: i32) -> bool {
    true
}

#[cfg(target_os = "espidf")]
pub fn gpio_write(pin: i32, high: bool) {
    // SAFETY: gpio_set_level writes to an already-configured output pin;
    // pin was validated during init_coil_output(). Main-loop only.
    unsafe {
        gpio_set_level(pin, if high { 1 } else { 0 });
    }
}

#[cfg(not(target_os = "espidf"))]
pub fn gpio_write(_pin: i32, _high: bool) {}

/// Whether the airflow switch currently reads active (draw in progress).
pub fn airflow_active() -> bool {
    gpio_read(pins::AIRFLOW_SWITCH_GPIO) == (pins::AIRFLOW_ACTIVE_LEVEL != 0)
}

// ── GPIO ISR Service ──────────────────────────────────────────

#[cfg(target_os = "espidf")]
use crate::events::{push_event, Event};

#[cfg(target_os = "espidf")]
unsafe extern "C" fn airflow_gpio_isr(_arg: *mut core::ffi::c_void) {
    // The switch fires on both edges; the level read inside the ISR
    // classifies which one this is.  LOW = drawing.
    // SAFETY: gpio_get_level is a register read; safe in ISR context.
    let drawing = unsafe { gpio_get_level(pins::AIRFLOW_SWITCH_GPIO) } == pins::AIRFLOW_ACTIVE_LEVEL;
    push_event(if drawing {
        Event::AirflowRising
    } else {
        Event::AirflowFalling
    });
}

/// Install the per-pin GPIO ISR service and register the airflow handler.
/// Call after init_peripherals() and before the event loop.
#[cfg(target_os = "espidf")]
pub fn init_isr_service() -> Result<(), HwInitError> {
    // SAFETY: gpio_install_isr_service is idempotent; ESP_ERR_INVALID_STATE
    // means it was already installed (acceptable). The handler registered
    // below is a static function that only pushes to the lock-free event
    // queue.
    unsafe {
        let ret = gpio_install_isr_service(0);
        if ret != ESP_OK && ret != ESP_ERR_INVALID_STATE {
            return Err(HwInitError::IsrInstallFailed(ret));
        }

        // Airflow switch: any edge (draw start and draw end)
        gpio_set_intr_type(pins::AIRFLOW_SWITCH_GPIO, gpio_int_type_t_GPIO_INTR_ANYEDGE);
        gpio_isr_handler_add(
            pins::AIRFLOW_SWITCH_GPIO,
            Some(airflow_gpio_isr),
            core::ptr::null_mut(),
        );
        gpio_intr_enable(pins::AIRFLOW_SWITCH_GPIO);

        // A draw may already be in progress when interrupts come up (deep
        // sleep wakes on the airflow pin, and a reset can land mid-draw).
        // Seed the queue with the edge the hardware has already produced.
        if gpio_get_level(pins::AIRFLOW_SWITCH_GPIO) == pins::AIRFLOW_ACTIVE_LEVEL {
            push_event(Event::AirflowRising);
        }

        info!("hw_init: ISR service installed (airflow)");
    }
    Ok(())
}

#[cfg(not(target_os = "espidf"))]
pub fn init_isr_service() -> Result<(), HwInitError> {
    log::info!("hw_init(sim): ISR service skipped");
    Ok(())
}
