//! GPIO / peripheral pin assignments for the wisp main board.
//!
//! Single source of truth — every driver references this module rather than
//! hard-coding pin numbers.  Change a pin here and it propagates everywhere.

// ---------------------------------------------------------------------------
// Airflow switch (pressure-activated, draw detection)
// ---------------------------------------------------------------------------

/// Digital input: diaphragm airflow switch closes to ground while the user
/// draws.  LOW = drawing, HIGH = idle (internal pull-up).  Interrupt-driven
/// on both edges; also the RTC wake source for deep sleep.
pub const AIRFLOW_SWITCH_GPIO: i32 = 4;

/// Level the airflow switch sits at while a draw is in progress.
pub const AIRFLOW_ACTIVE_LEVEL: i32 = 0;

// ---------------------------------------------------------------------------
// Coil power gate (load-switch enable)
// ---------------------------------------------------------------------------

/// Digital output: HIGH permits the coil driver to fire, LOW inhibits it.
/// Held LOW from reset until the usage policy has been consulted, and for
/// the whole of any lockdown window.
pub const COIL_ENABLE_GPIO: i32 = 5;

// ---------------------------------------------------------------------------
// UART debug
// ---------------------------------------------------------------------------

pub const UART_TX_GPIO: i32 = 17;
pub const UART_RX_GPIO: i32 = 18;
