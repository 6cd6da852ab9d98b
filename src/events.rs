//! Interrupt-to-main-loop event queue.
//!
//! Events are produced by:
//! - the airflow switch GPIO ISR (puff edges)
//! - BLE stack callbacks (connect, disconnect, inbound writes, reads)
//!
//! and consumed one at a time by the main loop. Edge events carry no
//! payload; inbound BLE bytes wait in the GATT inbox and the queue only
//! signals that there is something to drain.
//!
//! ```text
//! ┌──────────────┐     ┌───────────────┐     ┌──────────────┐
//! │ GPIO ISR     │────▶│  Event Queue  │────▶│  Main Loop   │
//! │ GATT cbs     │────▶│  (lock-free)  │     │  (consumer)  │
//! └──────────────┘     └───────────────┘     └──────────────┘
//! ```

use core::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

/// Maximum number of pending events.
/// Power of 2 for cheap ring buffer modulo.
const EVENT_QUEUE_CAP: usize = 32;

/// System event types. Lower discriminant = higher priority group;
/// within the queue, order stays FIFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Event {
    // ── Puff edges (highest priority, timing-sensitive) ───
    /// Airflow switch closed; a draw is starting.
    AirflowRising = 0,
    /// Airflow switch opened; the draw ended.
    AirflowFalling = 1,

    // ── Link traffic ──────────────────────────────────────
    /// A characteristic or CCCD write landed in the GATT inbox.
    LinkInbound = 10,

    // ── Connection lifecycle ──────────────────────────────
    /// A central connected.
    PeerConnected = 20,
    /// The central went away.
    PeerDisconnected = 21,
    /// The keepalive characteristic was read.
    KeepaliveRead = 22,
}

// ── Lock-free MPSC ring buffer ────────────────────────────────
//
// Two producer contexts write concurrently (the GPIO ISR and the
// Bluedroid task's callbacks); the main loop is the only reader.
// A producer claims its slot by compare-exchanging the head, then
// publishes the value with a Release store; `SLOT_EMPTY` marks a
// claimed slot whose value has not landed yet, so the consumer
// never reads a half-pushed entry. Slots are atomics, so no
// reference to shared mutable state ever exists.

/// Reserved slot value: claimed by a producer, value not yet stored.
/// Not a valid `Event` discriminant.
const SLOT_EMPTY: u8 = 0xFF;

static EVENT_HEAD: AtomicUsize = AtomicUsize::new(0);
static EVENT_TAIL: AtomicUsize = AtomicUsize::new(0);
static EVENT_SLOTS: [AtomicU8; EVENT_QUEUE_CAP] =
    [const { AtomicU8::new(SLOT_EMPTY) }; EVENT_QUEUE_CAP];

/// Push an event into the queue.
/// Safe to call from ISR context and from the BLE stack's task
/// concurrently (lock-free; the head CAS claims a slot per producer).
/// Returns `false` if the queue is full (event dropped).
pub fn push_event(event: Event) -> bool {
    let mut head = EVENT_HEAD.load(Ordering::Relaxed);
    loop {
        let next_head = (head + 1) % EVENT_QUEUE_CAP;
        if next_head == EVENT_TAIL.load(Ordering::Acquire) {
            return false; // Queue full, event dropped.
        }

        match EVENT_HEAD.compare_exchange_weak(
            head,
            next_head,
            Ordering::AcqRel,
            Ordering::Relaxed,
        ) {
            Ok(_) => {
                EVENT_SLOTS[head].store(event as u8, Ordering::Release);
                return true;
            }
            // Another producer claimed this slot first; retry on the
            // updated head.
            Err(current) => head = current,
        }
    }
}

/// Pop the next event from the queue.
/// Called from the main loop (single consumer).
pub fn pop_event() -> Option<Event> {
    let tail = EVENT_TAIL.load(Ordering::Relaxed);
    if tail == EVENT_HEAD.load(Ordering::Acquire) {
        return None; // Empty.
    }

    let raw = EVENT_SLOTS[tail].swap(SLOT_EMPTY, Ordering::AcqRel);
    if raw == SLOT_EMPTY {
        // The slot is claimed but its producer has not finished the
        // store. Leave the tail alone; the value is there next tick.
        return None;
    }

    EVENT_TAIL.store((tail + 1) % EVENT_QUEUE_CAP, Ordering::Release);
    event_from_u8(raw)
}

/// Drain pending events into a callback, FIFO order. Stops early at a
/// slot whose producer is mid-push; that event surfaces on the next
/// drain.
pub fn drain_events(mut handler: impl FnMut(Event)) {
    while let Some(event) = pop_event() {
        handler(event);
    }
}

/// Number of pending events.
pub fn queue_len() -> usize {
    let head = EVENT_HEAD.load(Ordering::Relaxed);
    let tail = EVENT_TAIL.load(Ordering::Relaxed);
    (head + EVENT_QUEUE_CAP - tail) % EVENT_QUEUE_CAP
}

// ── Internal ──────────────────────────────────────────────────

fn event_from_u8(raw: u8) -> Option<Event> {
    match raw {
        0 => Some(Event::AirflowRising),
        1 => Some(Event::AirflowFalling),
        10 => Some(Event::LinkInbound),
        20 => Some(Event::PeerConnected),
        21 => Some(Event::PeerDisconnected),
        22 => Some(Event::KeepaliveRead),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The queue is a process-wide static; tests that move it serialize
    // on this lock to keep the harness's parallelism out.
    static QUEUE_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    #[test]
    fn queue_roundtrip_and_overflow() {
        let _guard = QUEUE_LOCK.lock().unwrap();
        drain_events(|_| {});

        assert_eq!(queue_len(), 0);
        assert!(pop_event().is_none());

        assert!(push_event(Event::AirflowRising));
        assert!(push_event(Event::AirflowFalling));
        assert!(push_event(Event::LinkInbound));
        assert_eq!(queue_len(), 3);

        assert_eq!(pop_event(), Some(Event::AirflowRising));
        assert_eq!(pop_event(), Some(Event::AirflowFalling));
        assert_eq!(pop_event(), Some(Event::LinkInbound));
        assert!(pop_event().is_none());

        // One slot stays open to tell full from empty.
        for _ in 0..EVENT_QUEUE_CAP - 1 {
            assert!(push_event(Event::KeepaliveRead));
        }
        assert!(!push_event(Event::PeerConnected));

        let mut drained = 0;
        drain_events(|event| {
            assert_eq!(event, Event::KeepaliveRead);
            drained += 1;
        });
        assert_eq!(drained, EVENT_QUEUE_CAP - 1);
        assert_eq!(queue_len(), 0);
    }

    /// Two producers racing on the head must never lose an accepted
    /// event: everything `push_event` said yes to comes out exactly
    /// once. Mirrors the device topology — the GPIO ISR and the
    /// Bluedroid task pushing while the main loop drains.
    #[test]
    fn racing_producers_lose_no_accepted_events() {
        let _guard = QUEUE_LOCK.lock().unwrap();
        drain_events(|_| {});

        const PUSHES: usize = 4_000;
        let barrier = std::sync::Arc::new(std::sync::Barrier::new(2));
        let their_barrier = barrier.clone();
        let edge_producer = std::thread::spawn(move || {
            their_barrier.wait();
            (0..PUSHES)
                .filter(|_| push_event(Event::AirflowRising))
                .count()
        });

        let mut accepted_inbound = 0usize;
        let mut seen_rising = 0usize;
        let mut seen_inbound = 0usize;
        let mut tally = |event: Event| match event {
            Event::AirflowRising => seen_rising += 1,
            Event::LinkInbound => seen_inbound += 1,
            other => panic!("foreign event {other:?} in the queue"),
        };

        barrier.wait();
        for _ in 0..PUSHES {
            if push_event(Event::LinkInbound) {
                accepted_inbound += 1;
            }
            drain_events(&mut tally);
        }
        let accepted_rising = edge_producer.join().unwrap();
        drain_events(&mut tally);

        assert_eq!(seen_rising, accepted_rising);
        assert_eq!(seen_inbound, accepted_inbound);
        assert_eq!(queue_len(), 0);
    }

    #[test]
    fn unknown_discriminant_decodes_to_none() {
        assert_eq!(event_from_u8(10), Some(Event::LinkInbound));
        assert_eq!(event_from_u8(7), None);
        assert_eq!(event_from_u8(SLOT_EMPTY), None);
    }
}
