//! Coil power-gate adapter.
//!
//! Implements [`CoilPort`] over the enable pin of the coil load switch.
//! The main loop re-asserts the lockdown state every tick, so the adapter
//! tracks the last commanded level and only touches the GPIO (and the log)
//! on an actual change.
//!
//! The pin is configured LOW at boot by `hw_init`, which means the gate
//! stays closed until the usage policy has been consulted for the first
//! time.  Fail-safe: an early crash leaves the coil inhibited.

use crate::app::ports::CoilPort;
use crate::drivers::hw_init;
use crate::pins;

/// Hardware enable gate in front of the heating coil.
pub struct CoilGate {
    /// Last commanded state; `None` until the first `set_locked` call.
    locked: Option<bool>,
}

impl Default for CoilGate {
    fn default() -> Self {
        Self::new()
    }
}

impl CoilGate {
    pub fn new() -> Self {
        Self { locked: None }
    }
}

impl CoilPort for CoilGate {
    fn set_locked(&mut self, locked: bool) {
        if self.locked == Some(locked) {
            return;
        }
        self.locked = Some(locked);

        // Gate is active-HIGH: locked drives the enable pin low.
        hw_init::gpio_write(pins::COIL_ENABLE_GPIO, !locked);
        if locked {
            log::warn!("coil gate closed (lockdown)");
        } else {
            log::info!("coil gate open");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_command_always_applies() {
        let mut gate = CoilGate::new();
        gate.set_locked(false);
        assert_eq!(gate.locked, Some(false));
    }

    #[test]
    fn repeated_commands_are_absorbed() {
        let mut gate = CoilGate::new();
        gate.set_locked(true);
        gate.set_locked(true);
        gate.set_locked(false);
        assert_eq!(gate.locked, Some(false));
    }
}
