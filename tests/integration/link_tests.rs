//! Tests of a full peer session: history paging, subscriptions, time sync
//! and the log stream, driven through the same engine calls the firmware
//! loop makes.

use wisp::adapters::nvs::NvsStore;
use wisp::app::AppService;
use wisp::config::{LinkConfig, StoreLayout, UsagePolicy};
use wisp::link::{Delivery, LinkEngine, StreamId, frames};
use wisp::records::PuffRecord;
use wisp::store::RecordLog;

use crate::mock_env::{FakeClock, MockLink, QueueDrain};

const T0: u32 = 1_800_000_000;

fn policy() -> UsagePolicy {
    UsagePolicy {
        num_phases: 4,
        phase_duration_secs: 600,
        max_puffs: 100,
        min_puff_duration_ms: 1000,
    }
}

fn bench() -> (AppService<NvsStore>, LinkEngine, FakeClock, MockLink) {
    let store = RecordLog::open(NvsStore::new().unwrap(), StoreLayout::default());
    let mut app = AppService::new(policy(), store);
    let mut clock = FakeClock::at(T0);
    app.start(&mut clock);
    let mut engine = LinkEngine::new(LinkConfig::default());
    engine.on_connected(clock.ms);
    (app, engine, clock, MockLink::new())
}

/// One committed draw; hands back the record the firmware loop would push.
fn draw(app: &mut AppService<NvsStore>, clock: &mut FakeClock) -> PuffRecord {
    app.handle_rising_edge(clock);
    clock.advance_ms(1_500);
    let commit = app.handle_falling_edge(clock).unwrap();
    clock.advance_ms(500);
    commit.record
}

fn request(start_after: u16, max_count: u8) -> [u8; 4] {
    let id = start_after.to_le_bytes();
    [frames::OP_HISTORY_REQUEST, id[0], id[1], max_count]
}

// ── History paging ────────────────────────────────────────────

#[test]
fn peer_pages_puff_history_to_completion() {
    let (mut app, mut engine, mut clock, mut link) = bench();
    for _ in 0..8 {
        draw(&mut app, &mut clock);
    }

    // Page 1: everything after id 0, at most five per page.
    engine.handle_write(
        StreamId::Puffs,
        &request(0, 5),
        clock.ms,
        &mut app,
        &mut clock,
        &mut link,
    );
    // Page 2: resume after the highest id seen.
    engine.handle_write(
        StreamId::Puffs,
        &request(5, 5),
        clock.ms,
        &mut app,
        &mut clock,
        &mut link,
    );
    // Page 3: nothing left.
    engine.handle_write(
        StreamId::Puffs,
        &request(8, 5),
        clock.ms,
        &mut app,
        &mut clock,
        &mut link,
    );

    let pages = link.frames_on(StreamId::Puffs);
    assert_eq!(pages.len(), 3);
    assert_eq!(&pages[0][..4], &[0x01, 0x01, 0x00, 5]);
    assert_eq!(pages[0].len(), 4 + 5 * frames::PUFF_ENTRY_LEN);
    assert_eq!(&pages[1][..4], &[0x01, 0x06, 0x00, 3]);
    assert_eq!(pages[1].len(), 4 + 3 * frames::PUFF_ENTRY_LEN);
    assert_eq!(pages[2], &[frames::OP_DONE]);

    // First entry: puff 1, taken at T0, one whole second long, phase 0.
    let mut entry = vec![0x01, 0x00];
    entry.extend_from_slice(&T0.to_le_bytes());
    entry.extend_from_slice(&[0x01, 0x00, 0x00]);
    assert_eq!(&pages[0][4..13], entry.as_slice());
}

#[test]
fn junk_writes_never_produce_replies() {
    let (mut app, mut engine, mut clock, mut link) = bench();
    draw(&mut app, &mut clock);
    let epoch_before = clock.epoch;

    let streams = [
        StreamId::TimeSync,
        StreamId::Puffs,
        StreamId::Phases,
        StreamId::Log,
        StreamId::Liveness,
    ];
    for stream in streams {
        for junk in [&[][..], &[0xFF][..], &[0x10, 0x00][..], &[0x00; 20][..]] {
            engine.handle_write(stream, junk, clock.ms, &mut app, &mut clock, &mut link);
        }
    }

    assert!(link.sent.is_empty());
    assert_eq!(clock.epoch, epoch_before);
}

// ── Subscriptions and live pushes ─────────────────────────────

#[test]
fn subscription_gets_snapshot_then_live_pushes() {
    let (mut app, mut engine, mut clock, mut link) = bench();
    draw(&mut app, &mut clock);

    // Arming notifications pushes the newest record straight away.
    engine.handle_cccd_write(StreamId::Puffs, 0x0001, clock.ms, &app, &mut link);
    assert_eq!(link.sent.len(), 1);
    assert_eq!(link.sent[0].1, Delivery::Notify);
    assert_eq!(&link.sent[0].2[..4], &[0x01, 0x01, 0x00, 1]);

    // Each commit now flows out as it happens, exactly as the firmware
    // loop forwards it.
    let record = draw(&mut app, &mut clock);
    engine.push_puff(&record, &mut link);
    assert_eq!(link.sent.len(), 2);
    assert_eq!(&link.sent[1].2[..4], &[0x01, 0x02, 0x00, 1]);

    // Disarming stops the stream.
    engine.handle_cccd_write(StreamId::Puffs, 0x0000, clock.ms, &app, &mut link);
    engine.push_puff(&record, &mut link);
    assert_eq!(link.sent.len(), 2);
}

#[test]
fn phase_turns_stream_to_an_indicating_peer() {
    let (mut app, mut engine, mut clock, mut link) = bench();
    engine.handle_cccd_write(StreamId::Phases, 0x0002, clock.ms, &app, &mut link);

    // Snapshot of the running phase arrives on subscribe.
    assert_eq!(link.sent.len(), 1);
    assert_eq!(link.sent[0].1, Delivery::Indicate);
    let mut snapshot = vec![0x01, 0x00, 0x00, 0x01, 0x00];
    snapshot.extend_from_slice(&T0.to_le_bytes());
    assert_eq!(link.sent[0].2, snapshot);

    // The turn itself goes out when the timer fires.
    clock.epoch = T0 + 600;
    let turned = app.advance_phase(&clock).unwrap();
    engine.push_phase(&turned, &mut link);
    assert_eq!(link.sent.len(), 2);
    assert_eq!(link.sent[1].1, Delivery::Indicate);
    let mut update = vec![0x01, 0x01, 0x00, 0x01, 0x01];
    update.extend_from_slice(&(T0 + 600).to_le_bytes());
    assert_eq!(link.sent[1].2, update);
}

// ── Time sync ─────────────────────────────────────────────────

#[test]
fn time_sync_moves_the_clock_forward_only() {
    let (mut app, mut engine, mut clock, mut link) = bench();

    engine.handle_write(
        StreamId::TimeSync,
        &(T0 - 1).to_le_bytes(),
        clock.ms,
        &mut app,
        &mut clock,
        &mut link,
    );
    assert_eq!(clock.epoch, T0, "a stale peer must not rewind the clock");

    engine.handle_write(
        StreamId::TimeSync,
        &(T0 + 9_000).to_le_bytes(),
        clock.ms,
        &mut app,
        &mut clock,
        &mut link,
    );
    assert_eq!(clock.epoch, T0 + 9_000);
    assert!(link.sent.is_empty(), "time sync never echoes anything");

    // Records taken after the sync carry the corrected clock, and the
    // correction is already durable.
    let record = draw(&mut app, &mut clock);
    assert_eq!(record.timestamp_sec, T0 + 9_000);
    assert_eq!(app.into_store().last_epoch(0), T0 + 9_000);
}

// ── Log stream ────────────────────────────────────────────────

#[test]
fn log_stream_is_gated_and_burst_limited() {
    let (app, mut engine, clock, mut link) = bench();
    let mut drain = QueueDrain::with(&[
        "boot",
        "policy loaded",
        "peer hello",
        "draw 1",
        "draw 2",
        "draw 3",
        "phase turn",
    ]);

    // Nobody subscribed: lines stay queued.
    engine.pump_logs(&mut drain, &mut link);
    assert!(link.sent.is_empty());
    assert_eq!(drain.lines.len(), 7);

    engine.handle_cccd_write(StreamId::Log, 0x0001, clock.ms, &app, &mut link);
    engine.pump_logs(&mut drain, &mut link);
    assert_eq!(
        link.frames_on(StreamId::Log).len(),
        5,
        "one burst per tick"
    );
    assert_eq!(drain.lines.len(), 2);

    engine.pump_logs(&mut drain, &mut link);
    let lines = link.frames_on(StreamId::Log);
    assert_eq!(lines.len(), 7);
    assert_eq!(lines[0], b"boot");
    assert_eq!(lines[6], b"phase turn");
}

// ── Connection lifecycle ──────────────────────────────────────

#[test]
fn idle_disconnect_leads_to_suspend_and_clean_rearm() {
    let (mut app, mut engine, mut clock, mut link) = bench();
    let record = draw(&mut app, &mut clock);
    engine.handle_cccd_write(StreamId::Puffs, 0x0001, clock.ms, &app, &mut link);
    link.sent.clear();

    // A connected peer, however quiet, holds the device awake.
    assert!(!engine.should_suspend(clock.ms + 3_600_000));

    engine.on_disconnected(clock.ms);
    // A keepalive-style interaction restarts the countdown.
    engine.on_interaction(clock.ms + 30_000);
    assert!(!engine.should_suspend(clock.ms + 89_999));
    assert!(engine.should_suspend(clock.ms + 90_000));

    // The old subscription must not leak into the next connection.
    engine.on_connected(clock.ms + 95_000);
    engine.push_puff(&record, &mut link);
    assert!(link.sent.is_empty());
    assert!(!engine.should_suspend(clock.ms + 3_700_000));
}
