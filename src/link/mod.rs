//! BLE protocol surface.
//!
//! [`frames`] packs and parses the wire format, [`session`] tracks the
//! peer's subscriptions and idle state, and [`engine::LinkEngine`] is the
//! single dispatcher every inbound write funnels through, keyed by stream.
//! Transport specifics (GATT handles, MTU negotiation) stay out of this
//! module; adapters feed bytes in through [`crate::app::ports::LinkPort`].

pub mod engine;
pub mod frames;
pub mod session;

pub use engine::LinkEngine;
pub use session::{Delivery, StreamId};
