//! Port traits — the hexagonal boundary between domain logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ AppService (domain)
//! ```
//!
//! Driven adapters (storage, clock, coil gate, wireless link, log drain)
//! implement these traits.  The [`AppService`](super::service::AppService)
//! and the link engine consume them via generics, so the domain core never
//! touches hardware directly.

use crate::link::session::{Delivery, StreamId};

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: domain ↔ NVS / flash)
// ───────────────────────────────────────────────────────────────

/// Persistent key-value blob storage.
///
/// - Keys are namespaced to prevent collisions between subsystems.
/// - Write operations MUST be atomic — no partial writes on power loss.
///   The ESP-IDF NVS API guarantees this natively; in-memory simulation
///   achieves it trivially.
pub trait StoragePort {
    /// Read a value.  Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Write a value atomically.
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key.  Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    /// Check whether a key exists without reading it.
    fn exists(&self, namespace: &str, key: &str) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Clock port (driven adapter: domain ↔ wall clock / monotonic timer)
// ───────────────────────────────────────────────────────────────

/// Time source: monotonic milliseconds for durations and timeouts, epoch
/// seconds for record timestamps.
pub trait ClockPort {
    /// Milliseconds since boot (or wake).  Monotonic, never jumps.
    fn monotonic_ms(&self) -> u64;

    /// Wall-clock seconds since the Unix epoch.  May be nonsense until
    /// restored from storage or set over the link.
    fn epoch_seconds(&self) -> u32;

    /// Advance the wall clock.  Implementations only move it forward;
    /// backward sets are the caller's policy to reject.
    fn set_epoch_seconds(&mut self, epoch: u32);
}

// ───────────────────────────────────────────────────────────────
// Coil port (driven adapter: domain → heating-element gate)
// ───────────────────────────────────────────────────────────────

/// The hardware enable gate in front of the heating coil.  The domain drives
/// it from policy state every loop iteration; the adapter owns the pin.
pub trait CoilPort {
    /// `true` blocks activation (lockdown), `false` permits it.
    fn set_locked(&mut self, locked: bool);
}

// ───────────────────────────────────────────────────────────────
// Link port (driven adapter: protocol → wireless transport)
// ───────────────────────────────────────────────────────────────

/// Outbound side of the wireless transport.  The protocol engine hands a
/// fully encoded frame to the adapter; the adapter maps the stream to its
/// characteristic and pushes it with the requested delivery mode.
pub trait LinkPort {
    /// Deliver one frame.  Returns `false` when the transport rejected it
    /// (no connection, stack queue full); the engine logs and drops.
    fn deliver(&mut self, stream: StreamId, delivery: Delivery, frame: &[u8]) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Log drain port (driven adapter: diagnostics ring → protocol)
// ───────────────────────────────────────────────────────────────

/// Pull interface over the queued diagnostic log lines.  The protocol
/// engine drains a bounded burst per tick while the log stream has a
/// subscriber.
pub trait LogDrain {
    /// Pop the oldest queued line, or `None` when the ring is empty.
    fn pop_line(&mut self) -> Option<heapless::String<{ crate::diagnostics::LOG_LINE_MAX }>>;
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`StoragePort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Storage partition is full.
    Full,
    /// Generic I/O error.
    IoError,
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}
