//! Wire frames for the telemetry service.
//!
//! Everything on the air is little-endian and hand-packed:
//!
//! ```text
//! request   ┌──────┬──────────────────┬─────────────┐
//!           │ 0x10 │ startAfter u16 LE│ maxCount u8 │   exactly 4 bytes
//!           └──────┴──────────────────┴─────────────┘
//! batch     ┌──────┬──────────────────┬──────────┬─────────────────┐
//!           │ 0x01 │ firstId u16 LE   │ count u8 │ count × entry   │
//!           └──────┴──────────────────┴──────────┴─────────────────┘
//! done      ┌──────┐
//!           │ 0x02 │
//!           └──────┘
//! ```
//!
//! Puff entry (9 B): number u16, timestamp u32, duration-seconds u16,
//! phase u8. Phase entry (5 B): phase u8, start u32. Durations are
//! truncated to whole seconds on the wire; the stored record keeps
//! millisecond resolution.

use crate::config::PEER_MTU;
use crate::records::{PhaseRecord, PuffRecord};

pub const OP_HISTORY_REQUEST: u8 = 0x10;
pub const OP_BATCH: u8 = 0x01;
pub const OP_DONE: u8 = 0x02;

/// Request frames are fixed-size; anything else is rejected outright.
pub const REQUEST_LEN: usize = 4;
pub const BATCH_HEADER_LEN: usize = 4;
pub const PUFF_ENTRY_LEN: usize = 9;
pub const PHASE_ENTRY_LEN: usize = 5;

/// ATT opcode + handle overhead per notification/indication.
pub const ATT_HEADER_LEN: usize = 3;
/// Usable payload per outbound frame under the negotiated MTU.
pub const MAX_PAYLOAD: usize = PEER_MTU - ATT_HEADER_LEN;

/// Entries of the given size that fit one batch frame.
pub const fn entries_per_frame(entry_len: usize) -> usize {
    (MAX_PAYLOAD - BATCH_HEADER_LEN) / entry_len
}

pub const PUFFS_PER_FRAME: usize = entries_per_frame(PUFF_ENTRY_LEN);
pub const PHASES_PER_FRAME: usize = entries_per_frame(PHASE_ENTRY_LEN);

/// Fixed answer on the liveness characteristic.
pub const KEEPALIVE_RESPONSE: [u8; 2] = [0x01, 0x00];

/// One fully encoded outbound payload.
pub type FrameBuf = heapless::Vec<u8, MAX_PAYLOAD>;

/// A decoded history request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryRequest {
    /// Records strictly after this id are returned.
    pub start_after: u16,
    /// 0 = as many as fit one frame.
    pub max_count: u8,
}

/// Why an inbound frame was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Wrong size for the expected frame.
    Length { got: usize },
    /// Leading byte is not a known opcode.
    Opcode { got: u8 },
}

impl core::fmt::Display for FrameError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Length { got } => write!(f, "bad frame length {got}"),
            Self::Opcode { got } => write!(f, "bad opcode 0x{got:02X}"),
        }
    }
}

/// Strict parse of a 4-byte history request.
pub fn parse_history_request(data: &[u8]) -> Result<HistoryRequest, FrameError> {
    if data.len() != REQUEST_LEN {
        return Err(FrameError::Length { got: data.len() });
    }
    if data[0] != OP_HISTORY_REQUEST {
        return Err(FrameError::Opcode { got: data[0] });
    }
    Ok(HistoryRequest {
        start_after: u16::from_le_bytes([data[1], data[2]]),
        max_count: data[3],
    })
}

/// Encode a puff batch. At most [`PUFFS_PER_FRAME`] entries are taken;
/// `first_id` comes from the first record.
pub fn encode_puff_batch(puffs: &[PuffRecord]) -> FrameBuf {
    let puffs = &puffs[..puffs.len().min(PUFFS_PER_FRAME)];
    debug_assert!(!puffs.is_empty());
    let mut frame = batch_header(puffs.first().map_or(0, |p| p.puff_number), puffs.len());
    for p in puffs {
        let duration_secs = (p.duration_ms / 1000).min(u32::from(u16::MAX)) as u16;
        let _ = frame.extend_from_slice(&p.puff_number.to_le_bytes());
        let _ = frame.extend_from_slice(&p.timestamp_sec.to_le_bytes());
        let _ = frame.extend_from_slice(&duration_secs.to_le_bytes());
        let _ = frame.push(p.phase_index);
    }
    frame
}

/// Encode a phase batch. At most [`PHASES_PER_FRAME`] entries are taken.
pub fn encode_phase_batch(phases: &[PhaseRecord]) -> FrameBuf {
    let phases = &phases[..phases.len().min(PHASES_PER_FRAME)];
    debug_assert!(!phases.is_empty());
    let mut frame = batch_header(
        phases.first().map_or(0, |p| u16::from(p.phase_index)),
        phases.len(),
    );
    for p in phases {
        let _ = frame.push(p.phase_index);
        let _ = frame.extend_from_slice(&p.start_sec.to_le_bytes());
    }
    frame
}

/// The 1-byte end-of-data marker.
pub fn done_frame() -> FrameBuf {
    let mut frame = FrameBuf::new();
    let _ = frame.push(OP_DONE);
    frame
}

fn batch_header(first_id: u16, count: usize) -> FrameBuf {
    let mut frame = FrameBuf::new();
    let _ = frame.push(OP_BATCH);
    let _ = frame.extend_from_slice(&first_id.to_le_bytes());
    let _ = frame.push(count as u8);
    frame
}
