//! Puff/phase state machine.
//!
//! Converts debounced airflow edges into validated puff records, walks the
//! device through its time-boxed phases, and enforces the per-phase puff
//! allowance. The tracker is pure domain state: it never touches hardware
//! or storage. Commit paths hand fully formed records back to the caller
//! ([`AppService`](crate::app::service::AppService)), which persists them
//! and drives the live push.
//!
//! All in-memory state here is derived and rebuildable: the durable log is
//! authoritative, and [`PuffTracker::replay_puff`] /
//! [`PuffTracker::replay_phase`] / [`PuffTracker::finalize_replay`] rebuild
//! an equivalent tracker after an uncontrolled reset.

use log::{debug, error, info, warn};

use crate::config::UsagePolicy;
use crate::records::{PhaseRecord, PuffRecord};

/// Top-level run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Edges are accepted and counted.
    PuffCounting,
    /// The phase allowance is spent; the coil stays gated until the phase
    /// timer moves on.
    Lockdown,
}

/// One slot in the phase table.
#[derive(Debug, Clone, Copy)]
pub struct Phase {
    pub index: u8,
    /// Epoch seconds when the phase began; 0 = never stamped.
    pub start_sec: u32,
    pub duration_secs: u32,
    pub max_puffs: u16,
    pub puffs_taken: u16,
}

/// An airflow channel that opened but has not yet closed.
#[derive(Debug, Clone, Copy)]
struct PendingPuff {
    phase_index: u8,
    started_epoch_sec: u32,
    opened_ms: u64,
}

/// Everything a committed puff requires downstream: the record to append,
/// the refreshed phase record for the counter update, and whether the
/// commit tripped the allowance.
#[derive(Debug, Clone, Copy)]
pub struct PuffCommit {
    pub record: PuffRecord,
    pub phase: PhaseRecord,
    pub entered_lockdown: bool,
}

pub struct PuffTracker {
    policy: UsagePolicy,
    /// `num_phases + 1` slots; the extra slot is the terminal phase the
    /// cursor parks in once the program completes.
    phases: Vec<Phase>,
    /// Every committed puff, ascending by number.
    puffs: Vec<PuffRecord>,
    /// Index into `phases`.
    current: usize,
    state: RunState,
    pending: Option<PendingPuff>,
    /// Replay saw at least one phase record.
    phase_replayed: bool,
    /// The terminal-phase notice fired; cleared on any state change.
    final_phase_noted: bool,
}

impl PuffTracker {
    pub fn new(policy: UsagePolicy) -> Self {
        let phases = (0..=policy.num_phases)
            .map(|index| Phase {
                index,
                start_sec: 0,
                duration_secs: policy.phase_duration_secs,
                max_puffs: policy.max_puffs,
                puffs_taken: 0,
            })
            .collect();
        Self {
            policy,
            phases,
            puffs: Vec::new(),
            current: 0,
            state: RunState::PuffCounting,
            pending: None,
            phase_replayed: false,
            final_phase_noted: false,
        }
    }

    // ───────────────────────────────────────────────────────────────
    // Edge handling
    // ───────────────────────────────────────────────────────────────

    /// Airflow opened. Opens a pending puff stamped with the current phase
    /// and wall clock. Returns whether a puff actually opened (a rejected
    /// edge in lockdown does not).
    pub fn on_rising_edge(&mut self, now_ms: u64, epoch_sec: u32) -> bool {
        if self.state == RunState::Lockdown {
            error!("airflow opened during lockdown; coil is gated, not counting");
            return false;
        }
        if self.pending.is_some() {
            warn!("airflow rising edge with a puff already open; restarting measurement");
        }
        self.pending = Some(PendingPuff {
            phase_index: self.phases[self.current].index,
            started_epoch_sec: epoch_sec,
            opened_ms: now_ms,
        });
        debug!("puff opened in phase {}", self.current);
        true
    }

    /// Airflow closed. Validates the pending puff and, if it passes the
    /// minimum-duration check, commits it.
    pub fn on_falling_edge(&mut self, now_ms: u64) -> Option<PuffCommit> {
        if self.state == RunState::Lockdown {
            error!("airflow closed during lockdown; ignoring");
            return None;
        }
        let Some(pending) = self.pending.take() else {
            warn!("airflow falling edge with no open puff; ignoring");
            return None;
        };

        let duration_ms = if now_ms < pending.opened_ms {
            warn!("clock moved backward during puff; recording zero duration");
            0
        } else {
            now_ms - pending.opened_ms
        };
        if duration_ms < u64::from(self.policy.min_puff_duration_ms) {
            info!(
                "discarding {duration_ms} ms puff (minimum {} ms)",
                self.policy.min_puff_duration_ms
            );
            return None;
        }

        let puff_number = self
            .puffs
            .last()
            .map_or(1, |p| p.puff_number.saturating_add(1));
        let record = PuffRecord {
            puff_number,
            timestamp_sec: pending.started_epoch_sec,
            duration_ms: duration_ms as u32,
            phase_index: pending.phase_index,
        };
        self.puffs.push(record);

        let slot = &mut self.phases[self.current];
        slot.puffs_taken += 1;
        let taken = slot.puffs_taken;
        let max = slot.max_puffs;
        info!(
            "puff {puff_number} committed ({duration_ms} ms, phase {}, {taken} of {max})",
            slot.index
        );

        let mut entered_lockdown = false;
        if taken == max {
            info!("phase {} allowance spent; locking down", slot.index);
            self.state = RunState::Lockdown;
            self.final_phase_noted = false;
            entered_lockdown = true;
        } else if taken > max {
            error!(
                "phase {} counted {taken} puffs against an allowance of {max}; \
                 malfunction, locking down",
                slot.index
            );
            self.state = RunState::Lockdown;
            self.final_phase_noted = false;
            entered_lockdown = true;
        }

        let phase = self.phase_record_at(self.current);
        Some(PuffCommit {
            record,
            phase,
            entered_lockdown,
        })
    }

    // ───────────────────────────────────────────────────────────────
    // Phase timing
    // ───────────────────────────────────────────────────────────────

    /// Called every service tick. When the current phase's time is up the
    /// machine always returns to counting; if a next slot exists the cursor
    /// moves into it and the returned record must be persisted.
    pub fn advance_phase_if_due(&mut self, now_sec: u32) -> Option<PhaseRecord> {
        self.guard_cursor();
        let phase = self.phases[self.current];
        if now_sec.saturating_sub(phase.start_sec) < phase.duration_secs {
            return None;
        }

        if self.state != RunState::PuffCounting {
            info!("phase {} timer expired; lockdown lifted", phase.index);
            self.state = RunState::PuffCounting;
            self.final_phase_noted = false;
        }

        if self.current + 1 >= self.phases.len() {
            if !self.final_phase_noted {
                warn!("terminal phase {} complete; nothing to advance into", phase.index);
                self.final_phase_noted = true;
            }
            return None;
        }

        self.current += 1;
        let slot = &mut self.phases[self.current];
        slot.start_sec = now_sec;
        slot.puffs_taken = 0;
        info!(
            "phase advanced to {} of {}",
            slot.index, self.policy.num_phases
        );
        Some(self.phase_record_at(self.current))
    }

    // ───────────────────────────────────────────────────────────────
    // Queries
    // ───────────────────────────────────────────────────────────────

    /// Up to `limit` puffs with `puff_number > cursor`, ascending.
    pub fn puffs_after(&self, cursor: u16, limit: usize) -> &[PuffRecord] {
        let start = self.puffs.partition_point(|p| p.puff_number <= cursor);
        let end = start.saturating_add(limit).min(self.puffs.len());
        &self.puffs[start..end]
    }

    /// Up to `limit` phase records with `cursor < index <= current`,
    /// ascending. Future phases are never exposed.
    pub fn phases_after(&self, cursor: u8, limit: usize) -> Vec<PhaseRecord> {
        self.phases
            .iter()
            .filter(|p| p.index > cursor && usize::from(p.index) <= self.current)
            .take(limit)
            .map(|p| PhaseRecord {
                phase_index: p.index,
                start_sec: p.start_sec,
                max_puffs: p.max_puffs,
                puffs_taken: p.puffs_taken,
            })
            .collect()
    }

    pub fn current_puff(&self) -> Option<&PuffRecord> {
        self.puffs.last()
    }

    pub fn current_phase(&self) -> &Phase {
        &self.phases[self.current]
    }

    pub fn current_phase_record(&self) -> PhaseRecord {
        self.phase_record_at(self.current)
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn total_puffs(&self) -> usize {
        self.puffs.len()
    }

    // ───────────────────────────────────────────────────────────────
    // Replay
    // ───────────────────────────────────────────────────────────────

    /// Absorb one replayed phase record; the latest record per index wins
    /// and the cursor follows the most recently replayed one.
    pub fn replay_phase(&mut self, record: PhaseRecord) {
        if record.max_puffs == 0 {
            // Blank slot from a zero-filled block repair.
            return;
        }
        let index = usize::from(record.phase_index);
        if index >= self.phases.len() {
            warn!(
                "replay: discarding phase record with out-of-range index {}",
                record.phase_index
            );
            return;
        }
        let slot = &mut self.phases[index];
        slot.start_sec = record.start_sec;
        slot.max_puffs = record.max_puffs;
        slot.puffs_taken = record.puffs_taken;
        self.current = index;
        self.phase_replayed = true;
    }

    /// Absorb one replayed puff record, in log order.
    pub fn replay_puff(&mut self, record: PuffRecord) {
        if record.puff_number == 0 {
            // Blank slot from a zero-filled block repair.
            return;
        }
        self.puffs.push(record);
    }

    /// Reconcile the two channels and resolve the run state. Called once
    /// after both replays.
    ///
    /// The puff channel wins disagreements: a puff referencing a phase past
    /// the cursor moves the cursor (its phase-start record was the write
    /// lost in the crash), and the current phase's counter is recounted
    /// from the puff list because the in-place counter update is skipped
    /// after a rotation.
    pub fn finalize_replay(&mut self) {
        self.guard_cursor();

        if let Some(last) = self.puffs.last().copied() {
            let puff_phase = usize::from(last.phase_index);
            if puff_phase > self.current && puff_phase < self.phases.len() {
                warn!(
                    "replay: puff log is in phase {} but phase cursor is {}; adopting {}",
                    last.phase_index, self.current, last.phase_index
                );
                self.current = puff_phase;
                if self.phases[puff_phase].start_sec == 0 {
                    if let Some(first) = self
                        .puffs
                        .iter()
                        .find(|p| usize::from(p.phase_index) == puff_phase)
                    {
                        self.phases[puff_phase].start_sec = first.timestamp_sec;
                    }
                }
            }

            let counted = self
                .puffs
                .iter()
                .filter(|p| usize::from(p.phase_index) == self.current)
                .count() as u16;
            let slot = &mut self.phases[self.current];
            if counted > slot.puffs_taken {
                warn!(
                    "replay: phase {} counter behind puff log ({} recorded, {counted} counted); repairing",
                    slot.index, slot.puffs_taken
                );
                slot.puffs_taken = counted;
            }
        }

        let slot = self.phases[self.current];
        self.state = if slot.puffs_taken >= slot.max_puffs {
            RunState::Lockdown
        } else {
            RunState::PuffCounting
        };
        info!(
            "reconstructed {} puffs; phase {} ({} of {} taken), state {:?}",
            self.puffs.len(),
            slot.index,
            slot.puffs_taken,
            slot.max_puffs,
            self.state
        );
    }

    /// First-boot hook: with no phase record ever persisted, stamp the
    /// current phase's start and hand the record back for persistence.
    pub fn begin(&mut self, now_sec: u32) -> Option<PhaseRecord> {
        if self.phase_replayed {
            return None;
        }
        if self.phases[self.current].start_sec == 0 {
            self.phases[self.current].start_sec = now_sec;
        }
        info!("phase {} opened at epoch {now_sec}", self.current);
        Some(self.phase_record_at(self.current))
    }

    // ───────────────────────────────────────────────────────────────
    // Internal
    // ───────────────────────────────────────────────────────────────

    fn phase_record_at(&self, index: usize) -> PhaseRecord {
        let p = self.phases[index];
        PhaseRecord {
            phase_index: p.index,
            start_sec: p.start_sec,
            max_puffs: p.max_puffs,
            puffs_taken: p.puffs_taken,
        }
    }

    fn guard_cursor(&mut self) {
        if self.current >= self.phases.len() {
            error!("phase cursor {} out of range; resetting to phase 0", self.current);
            self.current = 0;
        }
    }
}
