//! Application service — the hexagonal core.
//!
//! [`AppService`] owns the puff tracker and the durable record log and is
//! the only writer of either. It exposes a clean, hardware-agnostic API:
//! edges come in, committed records come out, queries answer from memory.
//! All I/O flows through port traits injected at call sites, making the
//! entire service testable with mock adapters.
//!
//! ```text
//!  airflow edges ──▶ ┌───────────────────────────┐ ──▶ live push records
//!                    │        AppService          │
//!     ClockPort ───▶ │  PuffTracker · RecordLog   │ ──▶ StoragePort
//!                    └───────────────────────────┘
//! ```
//!
//! Storage failures inside commit paths are logged and tolerated: the
//! in-memory state stays consistent and the next boot replays whatever
//! did reach flash.

use log::{error, info};

use crate::config::{EPOCH_MIN_VALID, UsagePolicy};
use crate::records::{PhaseRecord, PuffRecord};
use crate::store::RecordLog;
use crate::tracker::{PuffCommit, PuffTracker, RunState};

use super::ports::{ClockPort, StoragePort};

/// The application service orchestrates all domain logic.
pub struct AppService<S: StoragePort> {
    tracker: PuffTracker,
    store: RecordLog<S>,
}

impl<S: StoragePort> AppService<S> {
    /// Construct the service over an opened record log.
    ///
    /// Does **not** replay anything — call [`AppService::start`] next.
    pub fn new(policy: UsagePolicy, store: RecordLog<S>) -> Self {
        Self {
            tracker: PuffTracker::new(policy),
            store,
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Boot sequence: restore the wall clock from the auxiliary epoch
    /// entry (forward only), rebuild the tracker from the record log, and
    /// on a true first boot stamp and persist phase 0's start.
    pub fn start<C: ClockPort>(&mut self, clock: &mut C) {
        let persisted = self.store.last_epoch(EPOCH_MIN_VALID);
        if persisted > clock.epoch_seconds() {
            info!("restoring wall clock from storage: epoch {persisted}");
            clock.set_epoch_seconds(persisted);
        }

        let store = &self.store;
        let tracker = &mut self.tracker;
        store.replay_phases(|record| tracker.replay_phase(record));
        store.replay_puffs(|record| tracker.replay_puff(record));
        tracker.finalize_replay();

        if let Some(record) = self.tracker.begin(clock.epoch_seconds()) {
            if let Err(e) = self.store.append_phase(&record) {
                error!("first phase record persist failed: {e}");
            }
        }
    }

    // ── Edge commits ──────────────────────────────────────────

    /// Airflow opened: open a pending puff and refresh the stored epoch.
    pub fn handle_rising_edge<C: ClockPort>(&mut self, clock: &C) {
        let epoch = clock.epoch_seconds();
        if self.tracker.on_rising_edge(clock.monotonic_ms(), epoch) {
            self.note_epoch(epoch);
        }
    }

    /// Airflow closed: validate and commit. The returned commit carries the
    /// freshly persisted record for the live push.
    pub fn handle_falling_edge<C: ClockPort>(&mut self, clock: &C) -> Option<PuffCommit> {
        let commit = self.tracker.on_falling_edge(clock.monotonic_ms())?;
        if let Err(e) = self.store.append_puff(&commit.record) {
            error!("puff record persist failed: {e}");
        }
        if let Err(e) = self.store.update_last_phase(&commit.phase) {
            error!("phase counter persist failed: {e}");
        }
        Some(commit)
    }

    /// Phase timing: advance when due, persisting the new phase-start
    /// record and refreshing the stored epoch.
    pub fn advance_phase<C: ClockPort>(&mut self, clock: &C) -> Option<PhaseRecord> {
        let record = self.tracker.advance_phase_if_due(clock.epoch_seconds())?;
        if let Err(e) = self.store.append_phase(&record) {
            error!("phase record persist failed: {e}");
        }
        self.note_epoch(record.start_sec);
        Some(record)
    }

    // ── Auxiliary epoch ───────────────────────────────────────

    /// Refresh the auxiliary last-known-epoch entry.
    pub fn note_epoch(&mut self, epoch: u32) {
        if let Err(e) = self.store.record_epoch(epoch) {
            error!("epoch persist failed: {e}");
        }
    }

    /// Final checkpoint before the host suspends.
    pub fn checkpoint<C: ClockPort>(&mut self, clock: &C) {
        self.note_epoch(clock.epoch_seconds());
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn puffs_after(&self, cursor: u16, limit: usize) -> &[PuffRecord] {
        self.tracker.puffs_after(cursor, limit)
    }

    pub fn phases_after(&self, cursor: u8, limit: usize) -> Vec<PhaseRecord> {
        self.tracker.phases_after(cursor, limit)
    }

    pub fn current_puff(&self) -> Option<&PuffRecord> {
        self.tracker.current_puff()
    }

    pub fn current_phase_record(&self) -> PhaseRecord {
        self.tracker.current_phase_record()
    }

    pub fn state(&self) -> RunState {
        self.tracker.state()
    }

    /// `true` while the coil must stay gated.
    pub fn locked(&self) -> bool {
        self.tracker.state() == RunState::Lockdown
    }

    pub fn tracker(&self) -> &PuffTracker {
        &self.tracker
    }

    /// Hand the record log back (tests simulate reboots by reopening it).
    pub fn into_store(self) -> RecordLog<S> {
        self.store
    }
}
