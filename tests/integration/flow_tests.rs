//! End-to-end tests of the metering core: airflow edges in, persisted
//! records and gate commands out.
//!
//! Each test wires the real `AppService`, record log and in-memory NVS
//! adapter together the same way the firmware entrypoint does, then checks
//! that policy state survives whatever the scenario throws at it.

use wisp::adapters::nvs::NvsStore;
use wisp::app::AppService;
use wisp::app::ports::{CoilPort, StoragePort};
use wisp::config::{StoreLayout, UsagePolicy};
use wisp::store::{META_KEY, RecordLog, STORE_NAMESPACE};

use crate::mock_env::{CoilSpy, FakeClock};

const T0: u32 = 1_800_000_000;

fn policy() -> UsagePolicy {
    UsagePolicy {
        num_phases: 2,
        phase_duration_secs: 600,
        max_puffs: 3,
        min_puff_duration_ms: 1000,
    }
}

fn layout() -> StoreLayout {
    StoreLayout {
        puff_block_capacity: 4,
        phase_block_capacity: 2,
    }
}

fn boot(storage: NvsStore, clock: &mut FakeClock) -> AppService<NvsStore> {
    let mut app = AppService::new(policy(), RecordLog::open(storage, layout()));
    app.start(clock);
    app
}

/// One draw: valve opens, stays open 1.5 s, closes, then 3.5 s of rest.
/// Returns whether the draw committed.
fn draw(app: &mut AppService<NvsStore>, clock: &mut FakeClock) -> bool {
    app.handle_rising_edge(clock);
    clock.advance_ms(1_500);
    let committed = app.handle_falling_edge(clock).is_some();
    clock.advance_ms(3_500);
    committed
}

// ── Allowance → lockdown → phase turn ─────────────────────────

#[test]
fn allowance_spent_gates_coil_until_the_phase_turns() {
    let mut clock = FakeClock::at(T0);
    let mut app = boot(NvsStore::new().unwrap(), &mut clock);
    let mut coil = CoilSpy::new();
    coil.set_locked(app.locked());

    for _ in 0..3 {
        assert!(draw(&mut app, &mut clock));
        coil.set_locked(app.locked());
    }
    assert_eq!(coil.locked(), Some(true), "third draw must close the gate");

    // Edges during lockdown change nothing.
    assert!(!draw(&mut app, &mut clock));
    coil.set_locked(app.locked());
    assert_eq!(app.current_puff().map(|p| p.puff_number), Some(3));

    // The phase timer, not the peer, reopens the gate.
    clock.epoch = T0 + 600;
    let turned = app.advance_phase(&clock);
    coil.set_locked(app.locked());
    assert_eq!(turned.map(|p| p.phase_index), Some(1));
    assert_eq!(coil.transitions(), vec![false, true, false]);
}

// ── Crash recovery ────────────────────────────────────────────

#[test]
fn counting_resumes_where_the_crash_left_it() {
    let mut clock = FakeClock::at(T0);
    let mut app = boot(NvsStore::new().unwrap(), &mut clock);
    assert!(draw(&mut app, &mut clock));
    assert!(draw(&mut app, &mut clock));

    // Uncontrolled reset: nothing but flash survives.
    let storage = app.into_store().into_storage();
    let mut cold = FakeClock::at(0);
    let mut app = boot(storage, &mut cold);

    assert!(cold.epoch >= T0, "wall clock must be restored from flash");
    assert_eq!(app.current_puff().map(|p| p.puff_number), Some(2));
    assert_eq!(app.current_phase_record().puffs_taken, 2);
    assert!(!app.locked());

    // The next draw continues the numbering, stamped with the restored
    // clock.
    app.handle_rising_edge(&cold);
    cold.advance_ms(2_000);
    let commit = app.handle_falling_edge(&cold).unwrap();
    assert_eq!(commit.record.puff_number, 3);
    assert!(commit.record.timestamp_sec >= T0);
    assert!(commit.entered_lockdown);
}

#[test]
fn lockdown_survives_power_loss() {
    let mut clock = FakeClock::at(T0);
    let mut app = boot(NvsStore::new().unwrap(), &mut clock);
    for _ in 0..3 {
        assert!(draw(&mut app, &mut clock));
    }
    assert!(app.locked());

    let storage = app.into_store().into_storage();
    let mut cold = FakeClock::at(0);
    let mut app = boot(storage, &mut cold);
    let mut coil = CoilSpy::new();
    coil.set_locked(app.locked());

    assert!(app.locked(), "a reboot must not refill the allowance");
    assert_eq!(coil.locked(), Some(true));

    // It still lifts on schedule after the reboot.
    cold.epoch = T0 + 600;
    assert!(app.advance_phase(&cold).is_some());
    assert!(!app.locked());
}

#[test]
fn history_replays_across_block_rotation() {
    // Eleven puffs at four per block: two sealed blocks plus a partial.
    let generous = UsagePolicy {
        max_puffs: 50,
        ..policy()
    };
    let mut clock = FakeClock::at(T0);
    let mut app = AppService::new(generous, RecordLog::open(NvsStore::new().unwrap(), layout()));
    app.start(&mut clock);
    for _ in 0..11 {
        assert!(draw(&mut app, &mut clock));
    }

    let storage = app.into_store().into_storage();
    let mut cold = FakeClock::at(0);
    let mut app = AppService::new(generous, RecordLog::open(storage, layout()));
    app.start(&mut cold);

    let all = app.puffs_after(0, usize::MAX);
    assert_eq!(all.len(), 11);
    assert!(
        all.windows(2)
            .all(|w| w[1].puff_number == w[0].puff_number + 1)
    );
    assert_eq!(app.current_phase_record().puffs_taken, 11);
}

#[test]
fn corrupt_metadata_starts_a_fresh_history() {
    let mut clock = FakeClock::at(T0);
    let mut app = boot(NvsStore::new().unwrap(), &mut clock);
    assert!(draw(&mut app, &mut clock));
    assert!(draw(&mut app, &mut clock));

    // One flipped bit in the metadata region.
    let mut storage = app.into_store().into_storage();
    let mut raw = [0u8; 64];
    let n = storage
        .read(STORE_NAMESPACE, META_KEY, &mut raw)
        .unwrap();
    raw[6] ^= 0x10;
    storage.write(STORE_NAMESPACE, META_KEY, &raw[..n]).unwrap();

    let mut cold = FakeClock::at(T0 + 60);
    let mut app = boot(storage, &mut cold);

    // History is gone but the device keeps metering from a clean slate.
    assert!(app.puffs_after(0, usize::MAX).is_empty());
    assert!(draw(&mut app, &mut cold));
    assert_eq!(app.current_puff().map(|p| p.puff_number), Some(1));
}

// ── Suspend / wake ────────────────────────────────────────────

#[test]
fn checkpoint_carries_the_clock_through_suspend() {
    let mut clock = FakeClock::at(T0);
    let mut app = boot(NvsStore::new().unwrap(), &mut clock);
    clock.advance_ms(90_000);
    app.checkpoint(&clock);

    // Deep sleep drops the RTC domain; the next boot starts from zero.
    let storage = app.into_store().into_storage();
    let mut woke = FakeClock::at(0);
    let app = boot(storage, &mut woke);

    assert_eq!(woke.epoch, T0 + 90);
    assert_eq!(app.current_phase_record().start_sec, T0);
}
