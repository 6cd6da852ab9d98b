//! Durable-log metadata block
//!
//! One fixed 36-byte region describes both record channels. Everything is
//! little-endian and covered by a trailing CRC-32; any mismatch on load
//! (magic, version, channel count, checksum, size) means the region is
//! treated as absent and the whole store reinitializes.

/// `"WISP"` interpreted as a big-endian u32.
pub const META_MAGIC: u32 = 0x5749_5350;
/// Bumped on any stored-layout change.
pub const META_VERSION: u16 = 1;
/// Fixed: puffs and phases.
pub const CHANNEL_COUNT: usize = 2;

pub const CHANNEL_PUFFS: usize = 0;
pub const CHANNEL_PHASES: usize = 1;

/// Bookkeeping for one record channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelMeta {
    /// Bytes per stored record.
    pub record_size: u16,
    /// Records per block.
    pub block_capacity: u16,
    /// Highest (currently writable) block index.
    pub active_block: u16,
    /// Records committed in the active block.
    pub active_count: u16,
    /// Records committed across all blocks; never decreases.
    pub total_records: u32,
}

impl ChannelMeta {
    pub const STORED_LEN: usize = 12;

    pub fn new(record_size: u16, block_capacity: u16) -> Self {
        Self {
            record_size,
            block_capacity,
            active_block: 0,
            active_count: 0,
            total_records: 0,
        }
    }

    fn encode_into(&self, buf: &mut [u8]) {
        buf[0..2].copy_from_slice(&self.record_size.to_le_bytes());
        buf[2..4].copy_from_slice(&self.block_capacity.to_le_bytes());
        buf[4..6].copy_from_slice(&self.active_block.to_le_bytes());
        buf[6..8].copy_from_slice(&self.active_count.to_le_bytes());
        buf[8..12].copy_from_slice(&self.total_records.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        Self {
            record_size: u16::from_le_bytes([buf[0], buf[1]]),
            block_capacity: u16::from_le_bytes([buf[2], buf[3]]),
            active_block: u16::from_le_bytes([buf[4], buf[5]]),
            active_count: u16::from_le_bytes([buf[6], buf[7]]),
            total_records: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
        }
    }
}

/// The global metadata region.
///
/// Layout: magic u32, version u16, channel count u16, two [`ChannelMeta`]
/// blocks, CRC-32 over everything preceding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreMeta {
    pub channels: [ChannelMeta; CHANNEL_COUNT],
}

impl StoreMeta {
    pub const STORED_LEN: usize = 8 + CHANNEL_COUNT * ChannelMeta::STORED_LEN + 4;

    pub fn new(channels: [ChannelMeta; CHANNEL_COUNT]) -> Self {
        Self { channels }
    }

    pub fn to_bytes(&self) -> [u8; Self::STORED_LEN] {
        let mut buf = [0u8; Self::STORED_LEN];
        buf[0..4].copy_from_slice(&META_MAGIC.to_le_bytes());
        buf[4..6].copy_from_slice(&META_VERSION.to_le_bytes());
        buf[6..8].copy_from_slice(&(CHANNEL_COUNT as u16).to_le_bytes());
        let mut offset = 8;
        for channel in &self.channels {
            channel.encode_into(&mut buf[offset..offset + ChannelMeta::STORED_LEN]);
            offset += ChannelMeta::STORED_LEN;
        }
        let crc = crc32(&buf[..offset]);
        buf[offset..offset + 4].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decode and validate. `None` means the region is unusable and the
    /// store must reinitialize.
    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::STORED_LEN {
            return None;
        }
        let magic = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if magic != META_MAGIC {
            return None;
        }
        let version = u16::from_le_bytes([buf[4], buf[5]]);
        if version != META_VERSION {
            return None;
        }
        let count = u16::from_le_bytes([buf[6], buf[7]]);
        if usize::from(count) != CHANNEL_COUNT {
            return None;
        }
        let body_len = 8 + CHANNEL_COUNT * ChannelMeta::STORED_LEN;
        let stored_crc = u32::from_le_bytes([
            buf[body_len],
            buf[body_len + 1],
            buf[body_len + 2],
            buf[body_len + 3],
        ]);
        if crc32(&buf[..body_len]) != stored_crc {
            return None;
        }
        let mut channels = [ChannelMeta::new(0, 0); CHANNEL_COUNT];
        for (i, channel) in channels.iter_mut().enumerate() {
            let offset = 8 + i * ChannelMeta::STORED_LEN;
            *channel = ChannelMeta::decode(&buf[offset..offset + ChannelMeta::STORED_LEN]);
        }
        Some(Self { channels })
    }
}

/// CRC-32 (reflected, polynomial 0xEDB88320), bitwise.
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFF_FFFF;
    for &byte in data {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xEDB8_8320;
            } else {
                crc >>= 1;
            }
        }
    }
    !crc
}
