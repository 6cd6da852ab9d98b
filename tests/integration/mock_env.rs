//! Mock adapters for integration tests.
//!
//! Every port the firmware core consumes has a scripted stand-in here, so
//! tests can drive the whole edge → commit → push pipeline and assert on
//! the complete command history without touching real hardware.

use std::collections::VecDeque;

use wisp::app::ports::{ClockPort, CoilPort, LinkPort, LogDrain};
use wisp::diagnostics::LOG_LINE_MAX;
use wisp::link::{Delivery, StreamId};

// ── FakeClock ─────────────────────────────────────────────────

/// Manually stepped time source. [`FakeClock::advance_ms`] moves both
/// timebases together the way real time passes; tests that need them to
/// disagree poke the fields directly.
pub struct FakeClock {
    pub ms: u64,
    pub epoch: u32,
}

#[allow(dead_code)]
impl FakeClock {
    pub fn at(epoch: u32) -> Self {
        Self { ms: 0, epoch }
    }

    pub fn advance_ms(&mut self, delta: u64) {
        self.ms += delta;
        self.epoch += (delta / 1000) as u32;
    }
}

impl ClockPort for FakeClock {
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

// ── CoilSpy ───────────────────────────────────────────────────

/// Records every gate command in order.
#[derive(Default)]
pub struct CoilSpy {
    pub commands: Vec<bool>,
}

#[allow(dead_code)]
impl CoilSpy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gate position after the last command, `None` before any.
    pub fn locked(&self) -> Option<bool> {
        self.commands.last().copied()
    }

    /// Command history with consecutive repeats collapsed — the loop
    /// re-asserts the gate every tick, so raw history is mostly echo.
    pub fn transitions(&self) -> Vec<bool> {
        let mut out: Vec<bool> = Vec::new();
        for &cmd in &self.commands {
            if out.last() != Some(&cmd) {
                out.push(cmd);
            }
        }
        out
    }
}

impl CoilPort for CoilSpy {
    fn set_locked(&mut self, locked: bool) {
        self.commands.push(locked);
    }
}

// ── MockLink ──────────────────────────────────────────────────

/// Captures every outbound frame; flip `accept` off to model a saturated
/// transport.
pub struct MockLink {
    pub sent: Vec<(StreamId, Delivery, Vec<u8>)>,
    pub accept: bool,
}

impl Default for MockLink {
    fn default() -> Self {
        Self {
            sent: Vec::new(),
            accept: true,
        }
    }
}

#[allow(dead_code)]
impl MockLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames sent on one stream, in order.
    pub fn frames_on(&self, stream: StreamId) -> Vec<&[u8]> {
        self.sent
            .iter()
            .filter(|(s, _, _)| *s == stream)
            .map(|(_, _, frame)| frame.as_slice())
            .collect()
    }

    pub fn last_frame(&self) -> Option<&[u8]> {
        self.sent.last().map(|(_, _, frame)| frame.as_slice())
    }
}

impl LinkPort for MockLink {
    fn deliver(&mut self, stream: StreamId, delivery: Delivery, frame: &[u8]) -> bool {
        if !self.accept {
            return false;
        }
        self.sent.push((stream, delivery, frame.to_vec()));
        true
    }
}

// ── QueueDrain ────────────────────────────────────────────────

/// Scripted log source for the streaming tests.
pub struct QueueDrain {
    pub lines: VecDeque<heapless::String<LOG_LINE_MAX>>,
}

#[allow(dead_code)]
impl QueueDrain {
    pub fn with(lines: &[&str]) -> Self {
        Self {
            lines: lines
                .iter()
                .map(|s| heapless::String::try_from(*s).unwrap())
                .collect(),
        }
    }
}

impl LogDrain for QueueDrain {
    fn pop_line(&mut self) -> Option<heapless::String<LOG_LINE_MAX>> {
        self.lines.pop_front()
    }
}
