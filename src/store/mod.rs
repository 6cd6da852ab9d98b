//! Durable record log
//!
//! Two channels (puffs, phases) of fixed-size records, each stored as a
//! sequence of fixed-capacity blocks in namespaced key-value flash. Only the
//! active block of each channel is held in memory; rotated blocks are
//! immutable. Every commit persists the active block and then the metadata
//! region synchronously, so an uncontrolled reset costs at most the commit
//! in flight.
//!
//! Recovery policy: the metadata region is gated by magic, version and
//! CRC-32; any mismatch reinitializes the whole store to empty. Individual
//! block reads that come back missing or short are skipped during replay
//! (sealed blocks) or zero-filled and rewritten (active block).

pub mod meta;

use core::fmt::Write as _;

use log::{error, info, warn};

use crate::app::ports::{StorageError, StoragePort};
use crate::config::StoreLayout;
use crate::records::{PhaseRecord, PuffRecord};
use meta::{CHANNEL_COUNT, CHANNEL_PHASES, CHANNEL_PUFFS, ChannelMeta, StoreMeta};

/// NVS namespace holding everything the log owns.
pub const STORE_NAMESPACE: &str = "usage";
/// Key of the global metadata region.
pub const META_KEY: &str = "meta";
/// Key of the auxiliary last-known-epoch entry.
pub const EPOCH_KEY: &str = "epoch";

/// `c{channel}b{block:02}` — short enough for NVS key limits.
fn block_key(channel: usize, block: u16) -> heapless::String<16> {
    let mut key = heapless::String::new();
    let _ = write!(key, "c{channel}b{block:02}");
    key
}

/// The block-rotating record log over a [`StoragePort`].
pub struct RecordLog<S: StoragePort> {
    store: S,
    meta: StoreMeta,
    /// Active block contents per channel, `block_capacity * record_size`
    /// bytes each. Mirrors flash exactly after every commit.
    blocks: [Vec<u8>; CHANNEL_COUNT],
}

impl<S: StoragePort> RecordLog<S> {
    /// Load the log from storage, reinitializing to empty on any metadata
    /// mismatch (absent, corrupt, wrong version, wrong geometry).
    pub fn open(store: S, layout: StoreLayout) -> Self {
        let expected = [
            ChannelMeta::new(PuffRecord::STORED_LEN as u16, layout.puff_block_capacity),
            ChannelMeta::new(PhaseRecord::STORED_LEN as u16, layout.phase_block_capacity),
        ];

        let mut log = Self {
            store,
            meta: StoreMeta::new(expected),
            blocks: [Vec::new(), Vec::new()],
        };

        let mut buf = [0u8; StoreMeta::STORED_LEN];
        let loaded = match log.store.read(STORE_NAMESPACE, META_KEY, &mut buf) {
            Ok(n) => {
                let decoded = StoreMeta::from_bytes(&buf[..n]);
                if decoded.is_none() {
                    warn!("store: metadata failed validation, reinitializing");
                }
                decoded
            }
            Err(StorageError::NotFound) => {
                info!("store: no metadata found, initializing empty log");
                None
            }
            Err(e) => {
                error!("store: metadata read failed ({e}), reinitializing");
                None
            }
        };

        match loaded {
            Some(meta) if Self::geometry_matches(&meta, &expected) => {
                log.meta = meta;
                log.load_active_blocks();
            }
            Some(_) => {
                warn!("store: metadata geometry does not match build, reinitializing");
                log.reinitialize();
            }
            None => log.reinitialize(),
        }

        log
    }

    fn geometry_matches(meta: &StoreMeta, expected: &[ChannelMeta; CHANNEL_COUNT]) -> bool {
        meta.channels.iter().zip(expected).all(|(got, want)| {
            got.record_size == want.record_size
                && got.block_capacity == want.block_capacity
                && got.active_count <= got.block_capacity
        })
    }

    /// Reset both channels to block 0, zero the blocks, persist everything.
    fn reinitialize(&mut self) {
        for channel in 0..CHANNEL_COUNT {
            let ch = &mut self.meta.channels[channel];
            ch.active_block = 0;
            ch.active_count = 0;
            ch.total_records = 0;
            let len = usize::from(ch.block_capacity) * usize::from(ch.record_size);
            self.blocks[channel] = vec![0u8; len];
            if let Err(e) = self.write_active_block(channel) {
                error!("store: block init write failed ({e})");
            }
        }
        if let Err(e) = self.save_meta() {
            error!("store: metadata init write failed ({e})");
        }
    }

    /// Pull each channel's active block into memory, zero-filling and
    /// rewriting any that comes back missing or short.
    fn load_active_blocks(&mut self) {
        for channel in 0..CHANNEL_COUNT {
            let ch = self.meta.channels[channel];
            let len = usize::from(ch.block_capacity) * usize::from(ch.record_size);
            let mut block = vec![0u8; len];
            let key = block_key(channel, ch.active_block);
            let healthy = match self.store.read(STORE_NAMESPACE, &key, &mut block) {
                Ok(n) if n >= len => true,
                Ok(n) => {
                    error!("store: active block {key} short ({n} of {len} bytes), zero-filling");
                    false
                }
                Err(e) => {
                    error!("store: active block {key} unreadable ({e}), zero-filling");
                    false
                }
            };
            if !healthy {
                block.fill(0);
                if let Err(e) = self.store.write(STORE_NAMESPACE, &key, &block) {
                    error!("store: active block repair write failed ({e})");
                }
            }
            self.blocks[channel] = block;
        }
    }

    /// Persist the active block of `channel` exactly as held in memory.
    fn write_active_block(&mut self, channel: usize) -> Result<(), StorageError> {
        let key = block_key(channel, self.meta.channels[channel].active_block);
        self.store.write(STORE_NAMESPACE, &key, &self.blocks[channel])
    }

    /// Persist the metadata region.
    fn save_meta(&mut self) -> Result<(), StorageError> {
        self.store
            .write(STORE_NAMESPACE, META_KEY, &self.meta.to_bytes())
    }

    // ───────────────────────────────────────────────────────────────
    // Commits
    // ───────────────────────────────────────────────────────────────

    pub fn append_puff(&mut self, record: &PuffRecord) -> Result<(), StorageError> {
        self.append(CHANNEL_PUFFS, &record.to_bytes())
    }

    pub fn append_phase(&mut self, record: &PhaseRecord) -> Result<(), StorageError> {
        self.append(CHANNEL_PHASES, &record.to_bytes())
    }

    fn append(&mut self, channel: usize, record: &[u8]) -> Result<(), StorageError> {
        debug_assert_eq!(
            record.len(),
            usize::from(self.meta.channels[channel].record_size)
        );
        if self.meta.channels[channel].active_count >= self.meta.channels[channel].block_capacity {
            self.rotate(channel)?;
        }
        let ch = self.meta.channels[channel];
        let size = usize::from(ch.record_size);
        let offset = usize::from(ch.active_count) * size;
        self.blocks[channel][offset..offset + size].copy_from_slice(record);
        self.meta.channels[channel].active_count += 1;
        self.meta.channels[channel].total_records += 1;
        self.write_active_block(channel)?;
        self.save_meta()
    }

    /// Seal the current block and open the next one, persisting the fresh
    /// empty block and the advanced metadata.
    fn rotate(&mut self, channel: usize) -> Result<(), StorageError> {
        let next = self.meta.channels[channel]
            .active_block
            .checked_add(1)
            .ok_or(StorageError::Full)?;
        info!("store: channel {channel} rotating to block {next}");
        self.meta.channels[channel].active_block = next;
        self.meta.channels[channel].active_count = 0;
        self.blocks[channel].fill(0);
        self.write_active_block(channel)?;
        self.save_meta()
    }

    /// Overwrite the most recently appended phase record iff it carries the
    /// same phase index. A mismatch (or an empty active block, right after a
    /// rotation) is silently skipped; callers tolerate a stale counter and
    /// reconstruction recounts it from the puff channel.
    pub fn update_last_phase(&mut self, updated: &PhaseRecord) -> Result<(), StorageError> {
        let ch = self.meta.channels[CHANNEL_PHASES];
        if ch.active_count == 0 {
            return Ok(());
        }
        let size = usize::from(ch.record_size);
        let offset = usize::from(ch.active_count - 1) * size;
        match PhaseRecord::from_bytes(&self.blocks[CHANNEL_PHASES][offset..offset + size]) {
            Some(last) if last.phase_index == updated.phase_index => {
                self.blocks[CHANNEL_PHASES][offset..offset + size]
                    .copy_from_slice(&updated.to_bytes());
                self.write_active_block(CHANNEL_PHASES)
            }
            _ => Ok(()),
        }
    }

    // ───────────────────────────────────────────────────────────────
    // Replay
    // ───────────────────────────────────────────────────────────────

    /// Visit every committed puff record in log order (best-effort: sealed
    /// blocks that no longer read back are skipped).
    pub fn replay_puffs<F: FnMut(PuffRecord)>(&self, mut visit: F) {
        self.replay(CHANNEL_PUFFS, |bytes| {
            if let Some(record) = PuffRecord::from_bytes(bytes) {
                visit(record);
            }
        });
    }

    /// Visit every committed phase record in log order.
    pub fn replay_phases<F: FnMut(PhaseRecord)>(&self, mut visit: F) {
        self.replay(CHANNEL_PHASES, |bytes| {
            if let Some(record) = PhaseRecord::from_bytes(bytes) {
                visit(record);
            }
        });
    }

    fn replay<F: FnMut(&[u8])>(&self, channel: usize, mut visit: F) {
        let ch = self.meta.channels[channel];
        let size = usize::from(ch.record_size);
        let block_len = usize::from(ch.block_capacity) * size;
        let mut buf = vec![0u8; block_len];
        for block in 0..=ch.active_block {
            let is_active = block == ch.active_block;
            let count = if is_active {
                ch.active_count
            } else {
                ch.block_capacity
            };
            let records: &[u8] = if is_active {
                &self.blocks[channel]
            } else {
                let key = block_key(channel, block);
                match self.store.read(STORE_NAMESPACE, &key, &mut buf) {
                    Ok(n) if n >= usize::from(count) * size => &buf,
                    Ok(n) => {
                        warn!("store: replay skipping short block {key} ({n} bytes)");
                        continue;
                    }
                    Err(e) => {
                        warn!("store: replay skipping block {key} ({e})");
                        continue;
                    }
                }
            };
            for i in 0..usize::from(count) {
                visit(&records[i * size..(i + 1) * size]);
            }
        }
    }

    // ───────────────────────────────────────────────────────────────
    // Auxiliary epoch entry
    // ───────────────────────────────────────────────────────────────

    /// Persist the last-known wall clock (outside the record channels).
    pub fn record_epoch(&mut self, epoch: u32) -> Result<(), StorageError> {
        self.store
            .write(STORE_NAMESPACE, EPOCH_KEY, &epoch.to_le_bytes())
    }

    /// Last persisted wall clock, or `fallback` when absent/unreadable.
    pub fn last_epoch(&self, fallback: u32) -> u32 {
        let mut buf = [0u8; 4];
        match self.store.read(STORE_NAMESPACE, EPOCH_KEY, &mut buf) {
            Ok(4) => u32::from_le_bytes(buf),
            _ => fallback,
        }
    }

    // ───────────────────────────────────────────────────────────────
    // Accessors
    // ───────────────────────────────────────────────────────────────

    pub fn meta(&self) -> &StoreMeta {
        &self.meta
    }

    /// Hand the storage back (tests reopen the log over mutated storage).
    pub fn into_storage(self) -> S {
        self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::nvs::NvsStore;

    fn small_layout() -> StoreLayout {
        StoreLayout {
            puff_block_capacity: 4,
            phase_block_capacity: 2,
        }
    }

    fn mem() -> NvsStore {
        NvsStore::new().unwrap()
    }

    fn puff(n: u16) -> PuffRecord {
        PuffRecord {
            puff_number: n,
            timestamp_sec: 1_800_000_000 + u32::from(n),
            duration_ms: 1500,
            phase_index: 0,
        }
    }

    fn collect_puffs<S: StoragePort>(log: &RecordLog<S>) -> Vec<PuffRecord> {
        let mut out = Vec::new();
        log.replay_puffs(|r| out.push(r));
        out
    }

    #[test]
    fn fresh_store_is_empty() {
        let log = RecordLog::open(mem(), small_layout());
        assert_eq!(log.meta().channels[CHANNEL_PUFFS].total_records, 0);
        assert_eq!(log.meta().channels[CHANNEL_PUFFS].active_block, 0);
        assert!(collect_puffs(&log).is_empty());
    }

    #[test]
    fn append_then_replay_preserves_order() {
        let mut log = RecordLog::open(mem(), small_layout());
        for n in 1..=3 {
            log.append_puff(&puff(n)).unwrap();
        }
        let replayed = collect_puffs(&log);
        assert_eq!(replayed, vec![puff(1), puff(2), puff(3)]);
    }

    #[test]
    fn fifth_append_rotates_into_block_one() {
        let mut log = RecordLog::open(mem(), small_layout());
        for n in 1..=5 {
            log.append_puff(&puff(n)).unwrap();
        }
        let ch = log.meta().channels[CHANNEL_PUFFS];
        assert_eq!(ch.active_block, 1);
        assert_eq!(ch.active_count, 1);
        assert_eq!(ch.total_records, 5);
        assert_eq!(collect_puffs(&log).len(), 5);
        // Record 5 sits at offset 0 of block 1.
        let store = log.into_storage();
        let mut buf = [0u8; PuffRecord::STORED_LEN];
        let n = store.read(STORE_NAMESPACE, "c0b01", &mut buf).unwrap();
        assert_eq!(n, PuffRecord::STORED_LEN);
        assert_eq!(PuffRecord::from_bytes(&buf), Some(puff(5)));
    }

    #[test]
    fn survives_reopen_across_rotation() {
        let mut log = RecordLog::open(mem(), small_layout());
        for n in 1..=11 {
            log.append_puff(&puff(n)).unwrap();
        }
        let reopened = RecordLog::open(log.into_storage(), small_layout());
        let replayed = collect_puffs(&reopened);
        assert_eq!(replayed.len(), 11);
        assert_eq!(replayed.first().map(|r| r.puff_number), Some(1));
        assert_eq!(replayed.last().map(|r| r.puff_number), Some(11));
    }

    #[test]
    fn corrupt_metadata_reinitializes_empty() {
        let mut log = RecordLog::open(mem(), small_layout());
        for n in 1..=3 {
            log.append_puff(&puff(n)).unwrap();
        }
        let mut store = log.into_storage();
        let mut raw = [0u8; StoreMeta::STORED_LEN];
        let n = store.read(STORE_NAMESPACE, META_KEY, &mut raw).unwrap();
        raw[9] ^= 0xFF;
        store.write(STORE_NAMESPACE, META_KEY, &raw[..n]).unwrap();

        let reopened = RecordLog::open(store, small_layout());
        assert_eq!(reopened.meta().channels[CHANNEL_PUFFS].total_records, 0);
        assert!(collect_puffs(&reopened).is_empty());
    }

    #[test]
    fn geometry_change_reinitializes() {
        let mut log = RecordLog::open(mem(), small_layout());
        log.append_puff(&puff(1)).unwrap();
        let bigger = StoreLayout {
            puff_block_capacity: 8,
            phase_block_capacity: 2,
        };
        let reopened = RecordLog::open(log.into_storage(), bigger);
        assert_eq!(reopened.meta().channels[CHANNEL_PUFFS].total_records, 0);
    }

    #[test]
    fn update_last_phase_overwrites_matching_record() {
        let mut log = RecordLog::open(mem(), small_layout());
        let mut rec = PhaseRecord {
            phase_index: 0,
            start_sec: 1_800_000_000,
            max_puffs: 20,
            puffs_taken: 0,
        };
        log.append_phase(&rec).unwrap();
        rec.puffs_taken = 5;
        log.update_last_phase(&rec).unwrap();

        let mut seen = Vec::new();
        log.replay_phases(|r| seen.push(r));
        assert_eq!(seen, vec![rec]);
    }

    #[test]
    fn update_last_phase_skips_on_mismatch_or_empty() {
        let mut log = RecordLog::open(mem(), small_layout());
        // Empty active block: nothing to update.
        let stale = PhaseRecord {
            phase_index: 0,
            start_sec: 1,
            max_puffs: 20,
            puffs_taken: 9,
        };
        log.update_last_phase(&stale).unwrap();
        assert_eq!(log.meta().channels[CHANNEL_PHASES].total_records, 0);

        // Last record belongs to a newer phase: stale update is dropped.
        let p0 = PhaseRecord {
            phase_index: 0,
            start_sec: 1,
            max_puffs: 20,
            puffs_taken: 0,
        };
        let p1 = PhaseRecord {
            phase_index: 1,
            start_sec: 2,
            max_puffs: 20,
            puffs_taken: 0,
        };
        log.append_phase(&p0).unwrap();
        log.append_phase(&p1).unwrap();
        log.update_last_phase(&stale).unwrap();

        let mut seen = Vec::new();
        log.replay_phases(|r| seen.push(r));
        assert_eq!(seen, vec![p0, p1]);
    }

    #[test]
    fn replay_skips_missing_sealed_block() {
        let mut log = RecordLog::open(mem(), small_layout());
        for n in 1..=6 {
            log.append_puff(&puff(n)).unwrap();
        }
        let mut store = log.into_storage();
        store.delete(STORE_NAMESPACE, "c0b00").unwrap();

        let reopened = RecordLog::open(store, small_layout());
        let replayed = collect_puffs(&reopened);
        // Block 0 (records 1-4) is gone; block 1 still replays.
        assert_eq!(
            replayed.iter().map(|r| r.puff_number).collect::<Vec<_>>(),
            vec![5, 6]
        );
    }

    #[test]
    fn missing_active_block_is_zero_filled_and_rewritten() {
        let mut log = RecordLog::open(mem(), small_layout());
        log.append_puff(&puff(1)).unwrap();
        log.append_puff(&puff(2)).unwrap();
        let mut store = log.into_storage();
        store.delete(STORE_NAMESPACE, "c0b00").unwrap();

        let reopened = RecordLog::open(store, small_layout());
        // Counts survive (metadata was intact) but the slots read as blank.
        let replayed = collect_puffs(&reopened);
        assert_eq!(replayed.len(), 2);
        assert!(replayed.iter().all(|r| r.puff_number == 0));
        // The repair wrote the block back.
        assert!(reopened.into_storage().exists(STORE_NAMESPACE, "c0b00"));
    }

    #[test]
    fn epoch_roundtrip_and_fallback() {
        let mut log = RecordLog::open(mem(), small_layout());
        assert_eq!(log.last_epoch(42), 42);
        log.record_epoch(1_800_000_123).unwrap();
        assert_eq!(log.last_epoch(42), 1_800_000_123);
    }
}
