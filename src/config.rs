//! System configuration parameters
//!
//! All tunable parameters for the Wisp firmware. Everything here is a
//! compile-time default; the structs exist so tests can inject reduced
//! geometries (small blocks, short phases) without touching the constants.

// --- Usage policy ---

/// Number of usable phases. The phase table holds one extra slot so the
/// cursor can sit past the last usable phase once the program completes.
pub const NUM_PHASES: u8 = 5;
/// Wall-clock length of each phase in seconds.
pub const PHASE_DURATION_SECS: u32 = 3600;
/// Puffs allowed per phase before lockdown.
pub const MAX_PUFFS_PER_PHASE: u16 = 20;
/// Inhalations shorter than this are discarded as accidental triggers.
pub const MIN_PUFF_DURATION_MS: u32 = 1000;

// --- Persistence geometry ---

/// Records per puff-channel block.
pub const PUFF_BLOCK_CAPACITY: u16 = 32;
/// Records per phase-channel block.
pub const PHASE_BLOCK_CAPACITY: u16 = 16;

// --- Link ---

/// MTU negotiated with the peer; payloads get 3 bytes less (ATT header).
pub const PEER_MTU: usize = 185;
/// Tear the service down after this long with no peer interaction.
pub const LINK_IDLE_TIMEOUT_MS: u64 = 60_000;
/// Log lines pushed per service tick while the log stream is subscribed.
pub const LOG_BURST_PER_TICK: usize = 5;

// --- Timing ---

/// Main service loop period in milliseconds.
pub const LOOP_DELAY_MS: u64 = 100;

/// Task-watchdog timeout. The loop feeds once per tick, so this is the
/// stall budget before the device resets through the panic hook.
pub const WATCHDOG_TIMEOUT_MS: u32 = 10_000;

/// Earliest epoch the firmware accepts as a plausible wall clock
/// (2025-01-01T00:00:00Z). Anything below it means the clock was never set.
pub const EPOCH_MIN_VALID: u32 = 1_735_689_600;

/// Puff/phase policy knobs.
#[derive(Debug, Clone, Copy)]
pub struct UsagePolicy {
    /// Usable phase count (table gets one extra slot).
    pub num_phases: u8,
    /// Seconds per phase.
    pub phase_duration_secs: u32,
    /// Puffs allowed per phase.
    pub max_puffs: u16,
    /// Minimum valid inhalation length in milliseconds.
    pub min_puff_duration_ms: u32,
}

impl Default for UsagePolicy {
    fn default() -> Self {
        Self {
            num_phases: NUM_PHASES,
            phase_duration_secs: PHASE_DURATION_SECS,
            max_puffs: MAX_PUFFS_PER_PHASE,
            min_puff_duration_ms: MIN_PUFF_DURATION_MS,
        }
    }
}

/// Flash log geometry.
#[derive(Debug, Clone, Copy)]
pub struct StoreLayout {
    pub puff_block_capacity: u16,
    pub phase_block_capacity: u16,
}

impl Default for StoreLayout {
    fn default() -> Self {
        Self {
            puff_block_capacity: PUFF_BLOCK_CAPACITY,
            phase_block_capacity: PHASE_BLOCK_CAPACITY,
        }
    }
}

/// Link/session tunables.
#[derive(Debug, Clone, Copy)]
pub struct LinkConfig {
    pub idle_timeout_ms: u64,
    pub log_burst: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: LINK_IDLE_TIMEOUT_MS,
            log_burst: LOG_BURST_PER_TICK,
        }
    }
}
