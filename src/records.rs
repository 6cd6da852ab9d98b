//! Persisted record types
//!
//! Both channels store fixed-size records with hand-packed little-endian
//! layouts. The stored forms are part of the flash schema and never change
//! without a metadata version bump.

/// One committed inhalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PuffRecord {
    /// 1-based, strictly increasing, never reused.
    pub puff_number: u16,
    /// Epoch seconds at puff start.
    pub timestamp_sec: u32,
    /// Measured length in milliseconds.
    pub duration_ms: u32,
    /// Phase the puff was taken in.
    pub phase_index: u8,
}

impl PuffRecord {
    /// Stored size: number (2) + timestamp (4) + duration (4) + phase (1).
    pub const STORED_LEN: usize = 11;

    pub fn to_bytes(&self) -> [u8; Self::STORED_LEN] {
        let mut buf = [0u8; Self::STORED_LEN];
        buf[0..2].copy_from_slice(&self.puff_number.to_le_bytes());
        buf[2..6].copy_from_slice(&self.timestamp_sec.to_le_bytes());
        buf[6..10].copy_from_slice(&self.duration_ms.to_le_bytes());
        buf[10] = self.phase_index;
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::STORED_LEN {
            return None;
        }
        Some(Self {
            puff_number: u16::from_le_bytes([buf[0], buf[1]]),
            timestamp_sec: u32::from_le_bytes([buf[2], buf[3], buf[4], buf[5]]),
            duration_ms: u32::from_le_bytes([buf[6], buf[7], buf[8], buf[9]]),
            phase_index: buf[10],
        })
    }
}

/// One phase-start marker plus its running puff counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseRecord {
    /// 0-based, monotonic non-decreasing over the device lifetime.
    pub phase_index: u8,
    /// Epoch seconds when the phase began (0 = never stamped).
    pub start_sec: u32,
    /// Puff allowance for the phase.
    pub max_puffs: u16,
    /// Puffs committed so far in the phase.
    pub puffs_taken: u16,
}

impl PhaseRecord {
    /// Stored size: phase (1) + start (4) + max (2) + taken (2).
    pub const STORED_LEN: usize = 9;

    pub fn to_bytes(&self) -> [u8; Self::STORED_LEN] {
        let mut buf = [0u8; Self::STORED_LEN];
        buf[0] = self.phase_index;
        buf[1..5].copy_from_slice(&self.start_sec.to_le_bytes());
        buf[5..7].copy_from_slice(&self.max_puffs.to_le_bytes());
        buf[7..9].copy_from_slice(&self.puffs_taken.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::STORED_LEN {
            return None;
        }
        Some(Self {
            phase_index: buf[0],
            start_sec: u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]),
            max_puffs: u16::from_le_bytes([buf[5], buf[6]]),
            puffs_taken: u16::from_le_bytes([buf[7], buf[8]]),
        })
    }
}
