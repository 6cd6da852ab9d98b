//! Adapters — concrete implementations of the hexagonal port traits.
//!
//! | Adapter     | Implements   | Connects to                       |
//! |-------------|--------------|-----------------------------------|
//! | `clock`     | ClockPort    | esp_timer + RTC / `Instant` (sim) |
//! | `coil`      | CoilPort     | load-switch enable GPIO           |
//! | `gatt`      | LinkPort     | Bluedroid GATT server / stub      |
//! | `nvs`       | StoragePort  | NVS flash / in-memory map (sim)   |
//!
//! `device_id` has no port: it derives the advertising identity from the
//! factory MAC and feeds it to the `gatt` adapter at construction.

pub mod clock;
pub mod coil;
pub mod device_id;
pub mod gatt;
pub mod nvs;
