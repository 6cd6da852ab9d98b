//! Application core — pure domain logic, zero I/O.
//!
//! This module ties the puff/phase tracker to the durable record log and
//! exposes the commit and query surface the rest of the firmware uses.
//! All interaction with hardware happens through **port traits** defined
//! in [`ports`], keeping this layer fully testable without real
//! peripherals.

pub mod ports;
pub mod service;

pub use service::AppService;
