//! wisp firmware library.
//!
//! Exposes the pure-logic modules (usage tracking, record store, link
//! protocol) for integration testing and external inspection. All
//! ESP-IDF-specific code is guarded by `#[cfg(target_os = "espidf")]`
//! within each module.

#![deny(unused_must_use)]

pub mod app;
pub mod config;
pub mod diagnostics;
pub mod events;
pub mod link;
pub mod power;
pub mod records;
pub mod store;
pub mod tracker;

mod pins;

// Platform adapters and drivers; the device implementations are guarded
// by cfg attributes inside, with simulation stand-ins for the host.
pub mod adapters;
pub mod drivers;
