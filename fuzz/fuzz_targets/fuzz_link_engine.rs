//! Fuzz target: protocol dispatcher
//!
//! Replays arbitrary inbound traffic — data writes, subscription writes,
//! stray opcodes, junk lengths — against a live engine over an in-memory
//! device.  Verifies:
//! - No panics for any byte sequence on any stream
//! - Every outbound frame respects the MTU payload budget
//! - The wall clock never moves backward
//!
//! cargo fuzz run fuzz_link_engine

#![no_main]

use libfuzzer_sys::fuzz_target;
use wisp::adapters::nvs::NvsStore;
use wisp::app::AppService;
use wisp::app::ports::{ClockPort, LinkPort};
use wisp::config::{LinkConfig, StoreLayout, UsagePolicy};
use wisp::link::frames::MAX_PAYLOAD;
use wisp::link::{Delivery, LinkEngine, StreamId};
use wisp::store::RecordLog;

struct FuzzClock {
    ms: u64,
    epoch: u32,
}

impl ClockPort for FuzzClock {
    fn monotonic_ms(&self) -> u64 {
        self.ms
    }
    fn epoch_seconds(&self) -> u32 {
        self.epoch
    }
    fn set_epoch_seconds(&mut self, epoch: u32) {
        self.epoch = epoch;
    }
}

/// Accepts everything but audits the size budget on the way past.
struct BudgetLink;

impl LinkPort for BudgetLink {
    fn deliver(&mut self, _stream: StreamId, _delivery: Delivery, frame: &[u8]) -> bool {
        assert!(frame.len() <= MAX_PAYLOAD, "outbound frame exceeds the MTU budget");
        assert!(!frame.is_empty(), "empty frame pushed");
        true
    }
}

fuzz_target!(|data: &[u8]| {
    let store = RecordLog::open(NvsStore::new().unwrap(), StoreLayout::default());
    let mut app = AppService::new(UsagePolicy::default(), store);
    let mut clock = FuzzClock {
        ms: 0,
        epoch: 1_800_000_000,
    };
    app.start(&mut clock);

    let mut engine = LinkEngine::new(LinkConfig::default());
    let mut link = BudgetLink;
    engine.on_connected(clock.ms);

    // A few committed records give the history paths something to serve.
    for _ in 0..3 {
        app.handle_rising_edge(&clock);
        clock.ms += 1_500;
        let _ = app.handle_falling_edge(&clock);
        clock.ms += 500;
    }

    // Interpret the input as a sequence of [selector, len, payload…]
    // records: low selector bits pick the stream, the top bit picks a
    // subscription write over a data write.
    let mut floor = clock.epoch;
    let mut rest = data;
    while rest.len() >= 2 {
        let selector = rest[0];
        let len = usize::from(rest[1]).min(rest.len() - 2);
        let payload = &rest[2..2 + len];
        let Some(stream) = StreamId::from_raw(selector % 5) else {
            break;
        };
        clock.ms += 100;

        if selector & 0x80 != 0 {
            let raw = u16::from_le_bytes([
                payload.first().copied().unwrap_or(0),
                payload.get(1).copied().unwrap_or(0),
            ]);
            engine.handle_cccd_write(stream, raw, clock.ms, &app, &mut link);
        } else {
            engine.handle_write(stream, payload, clock.ms, &mut app, &mut clock, &mut link);
        }

        assert!(clock.epoch >= floor, "wall clock moved backward");
        floor = clock.epoch;
        rest = &rest[2 + len..];
    }
});
