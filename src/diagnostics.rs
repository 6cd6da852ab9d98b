//! Logging tee and in-memory log ring.
//!
//! The firmware logs through the standard [`log`] facade. Our logger writes
//! every line to the console (UART / USB-CDC in production) and mirrors it
//! into a fixed-capacity ring so a connected peer can stream recent lines
//! over BLE. When the ring is full the oldest line is dropped; a counter
//! keeps track of how many lines were lost that way.

use std::fmt::{self, Write as _};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

use log::{LevelFilter, Metadata, Record};

use crate::app::ports::LogDrain;

/// Longest retained log line; anything past this is cut at a char boundary.
pub const LOG_LINE_MAX: usize = 192;
/// Lines retained for streaming before the oldest is dropped.
pub const LOG_RING_CAPACITY: usize = 64;

pub type LogLine = heapless::String<LOG_LINE_MAX>;

static RING: Mutex<LogRing> = Mutex::new(LogRing::new());
static LOGGER: RingLogger = RingLogger;
static START: OnceLock<Instant> = OnceLock::new();

/// Install the tee logger. Safe to call more than once; only the first
/// call takes effect.
pub fn install() {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(LevelFilter::Info);
    }
}

/// Install a panic hook that routes the panic message through the logger,
/// so the reason survives in the ring for the next peer to pull.
pub fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let reason = if let Some(msg) = info.payload().downcast_ref::<&str>() {
            *msg
        } else if let Some(msg) = info.payload().downcast_ref::<String>() {
            msg.as_str()
        } else {
            "unknown panic"
        };
        log::error!("PANIC: {reason}");
    }));
}

/// Drains the shared ring, oldest line first.
pub struct SharedLogDrain;

impl LogDrain for SharedLogDrain {
    fn pop_line(&mut self) -> Option<LogLine> {
        RING.lock().ok().and_then(|mut ring| ring.pop())
    }
}

/// Fixed-capacity line buffer with drop-oldest overflow.
pub struct LogRing {
    lines: heapless::Deque<LogLine, LOG_RING_CAPACITY>,
    dropped: u32,
}

impl LogRing {
    pub const fn new() -> Self {
        Self {
            lines: heapless::Deque::new(),
            dropped: 0,
        }
    }

    pub fn push(&mut self, line: LogLine) {
        if self.lines.is_full() {
            let _ = self.lines.pop_front();
            self.dropped = self.dropped.saturating_add(1);
        }
        let _ = self.lines.push_back(line);
    }

    pub fn pop(&mut self) -> Option<LogLine> {
        self.lines.pop_front()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Lines lost to overflow since boot.
    pub fn dropped(&self) -> u32 {
        self.dropped
    }
}

impl Default for LogRing {
    fn default() -> Self {
        Self::new()
    }
}

struct RingLogger;

impl log::Log for RingLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format_line(uptime_ms(), record);
        println!("{line}");
        if let Ok(mut ring) = RING.lock() {
            ring.push(line);
        }
    }

    fn flush(&self) {}
}

fn uptime_ms() -> u128 {
    START.get_or_init(Instant::now).elapsed().as_millis()
}

fn format_line(uptime_ms: u128, record: &Record) -> LogLine {
    let mut line = LogLine::new();
    let _ = write!(
        Truncating(&mut line),
        "{uptime_ms:>6} {:5} {}: {}",
        record.level(),
        record.target(),
        record.args()
    );
    line
}

/// Writes as much as fits and silently drops the rest, so one oversized
/// message never aborts formatting halfway through an argument.
struct Truncating<'a>(&'a mut LogLine);

impl fmt::Write for Truncating<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let space = self.0.capacity() - self.0.len();
        if space == 0 {
            return Ok(());
        }
        let mut end = s.len().min(space);
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        let _ = self.0.push_str(&s[..end]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt::Write as _;

    fn line(s: &str) -> LogLine {
        LogLine::try_from(s).unwrap()
    }

    #[test]
    fn ring_pops_oldest_first() {
        let mut ring = LogRing::new();
        ring.push(line("one"));
        ring.push(line("two"));

        assert_eq!(ring.pop().unwrap().as_str(), "one");
        assert_eq!(ring.pop().unwrap().as_str(), "two");
        assert!(ring.pop().is_none());
    }

    #[test]
    fn full_ring_drops_oldest() {
        let mut ring = LogRing::new();
        for i in 0..LOG_RING_CAPACITY + 3 {
            let mut l = LogLine::new();
            let _ = write!(l, "line {i}");
            ring.push(l);
        }

        assert_eq!(ring.len(), LOG_RING_CAPACITY);
        assert_eq!(ring.dropped(), 3);
        assert_eq!(ring.pop().unwrap().as_str(), "line 3");
    }

    #[test]
    fn formatted_line_carries_level_and_target() {
        let formatted = format_line(
            42,
            &Record::builder()
                .args(format_args!("hello {}", 7))
                .level(log::Level::Warn)
                .target("wisp::link")
                .build(),
        );

        assert_eq!(formatted.as_str(), "    42 WARN  wisp::link: hello 7");
    }

    #[test]
    fn oversized_message_is_cut_not_lost() {
        let big = "x".repeat(LOG_LINE_MAX * 2);
        let formatted = format_line(
            0,
            &Record::builder()
                .args(format_args!("{big}"))
                .level(log::Level::Info)
                .target("wisp")
                .build(),
        );

        assert_eq!(formatted.len(), LOG_LINE_MAX);
        assert!(formatted.as_str().starts_with("     0 INFO  wisp: xxx"));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let mut l = LogLine::new();
        // 191 ASCII bytes, then a 2-byte char that cannot fit whole.
        let _ = write!(Truncating(&mut l), "{}", "a".repeat(LOG_LINE_MAX - 1));
        let _ = write!(Truncating(&mut l), "é");

        assert_eq!(l.len(), LOG_LINE_MAX - 1);
        assert!(l.as_str().is_char_boundary(l.len()));
    }
}
