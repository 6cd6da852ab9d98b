//! Protocol dispatcher.
//!
//! Every inbound GATT write lands here, tagged with the [`StreamId`] of the
//! characteristic it arrived on. The engine owns the [`LinkSession`], decides
//! what goes back out and how, and stays transport-agnostic: frames leave
//! through whatever [`LinkPort`] the caller hands in.

use log::{info, warn};

use crate::app::ports::{ClockPort, LinkPort, LogDrain, StoragePort};
use crate::app::AppService;
use crate::config::LinkConfig;
use crate::link::frames;
use crate::link::session::{Delivery, LinkSession, StreamId, SubscriptionFlags};
use crate::records::{PhaseRecord, PuffRecord};

pub struct LinkEngine {
    session: LinkSession,
    log_burst: usize,
}

impl LinkEngine {
    pub fn new(config: LinkConfig) -> Self {
        Self {
            session: LinkSession::new(config),
            log_burst: config.log_burst,
        }
    }

    pub fn session(&self) -> &LinkSession {
        &self.session
    }

    // ── connection lifecycle ────────────────────────────────────────────

    pub fn on_connected(&mut self, now_ms: u64) {
        self.session.on_connected(now_ms);
    }

    pub fn on_disconnected(&mut self, now_ms: u64) {
        self.session.on_disconnected(now_ms);
    }

    /// Any peer activity that is not a write, e.g. a keepalive read.
    pub fn on_interaction(&mut self, now_ms: u64) {
        self.session.touch(now_ms);
    }

    pub fn should_suspend(&self, now_ms: u64) -> bool {
        self.session.should_suspend(now_ms)
    }

    // ── inbound writes ──────────────────────────────────────────────────

    /// Dispatch one characteristic write.
    pub fn handle_write<S, C, L>(
        &mut self,
        stream: StreamId,
        data: &[u8],
        now_ms: u64,
        app: &mut AppService<S>,
        clock: &mut C,
        link: &mut L,
    ) where
        S: StoragePort,
        C: ClockPort,
        L: LinkPort,
    {
        self.session.touch(now_ms);
        match stream {
            StreamId::TimeSync => self.handle_time_sync(data, app, clock),
            StreamId::Puffs => self.serve_puff_history(data, app, link),
            StreamId::Phases => self.serve_phase_history(data, app, link),
            StreamId::Log | StreamId::Liveness => {
                warn!(
                    "link: unexpected write on {:?} ({} bytes); dropped",
                    stream,
                    data.len()
                );
            }
        }
    }

    /// Dispatch one CCCD write. Subscribing to a data stream gets the
    /// current state pushed immediately so a reconnecting peer needs no
    /// separate poll.
    pub fn handle_cccd_write<S, L>(
        &mut self,
        stream: StreamId,
        raw: u16,
        now_ms: u64,
        app: &AppService<S>,
        link: &mut L,
    ) where
        S: StoragePort,
        L: LinkPort,
    {
        self.session.touch(now_ms);
        if matches!(stream, StreamId::TimeSync | StreamId::Liveness) {
            warn!("link: subscription write on {stream:?}; ignored");
            return;
        }

        let flags = SubscriptionFlags::from_cccd(raw);
        self.session.set_subscription(stream, flags);
        info!(
            "link: {:?} subscription now {:?}",
            stream,
            flags.delivery()
        );
        if flags.delivery().is_none() {
            return;
        }

        match stream {
            StreamId::Puffs => {
                if let Some(puff) = app.current_puff() {
                    let frame = frames::encode_puff_batch(std::slice::from_ref(puff));
                    self.send(StreamId::Puffs, &frame, link);
                }
            }
            StreamId::Phases => {
                let record = app.current_phase_record();
                let frame = frames::encode_phase_batch(std::slice::from_ref(&record));
                self.send(StreamId::Phases, &frame, link);
            }
            _ => {}
        }
    }

    fn handle_time_sync<S, C>(&mut self, data: &[u8], app: &mut AppService<S>, clock: &mut C)
    where
        S: StoragePort,
        C: ClockPort,
    {
        let Ok(bytes) = <[u8; 4]>::try_from(data) else {
            warn!("link: time sync payload of {} bytes; ignored", data.len());
            return;
        };
        let epoch = u32::from_le_bytes(bytes);
        let current = clock.epoch_seconds();
        // The clock only moves forward; a stale peer must not rewind history.
        if epoch <= current {
            warn!("link: time sync epoch {epoch} not ahead of {current}; ignored");
            return;
        }
        clock.set_epoch_seconds(epoch);
        app.note_epoch(epoch);
        info!("link: wall clock set to epoch {epoch}");
    }

    fn serve_puff_history<S, L>(&self, data: &[u8], app: &AppService<S>, link: &mut L)
    where
        S: StoragePort,
        L: LinkPort,
    {
        let req = match frames::parse_history_request(data) {
            Ok(req) => req,
            Err(err) => {
                warn!("link: rejected puff history request: {err}");
                return;
            }
        };
        let limit = effective_count(req.max_count, frames::PUFFS_PER_FRAME);
        let puffs = app.puffs_after(req.start_after, limit);
        if puffs.is_empty() {
            self.send_done(StreamId::Puffs, link);
        } else {
            let frame = frames::encode_puff_batch(puffs);
            self.send(StreamId::Puffs, &frame, link);
        }
    }

    fn serve_phase_history<S, L>(&self, data: &[u8], app: &AppService<S>, link: &mut L)
    where
        S: StoragePort,
        L: LinkPort,
    {
        let req = match frames::parse_history_request(data) {
            Ok(req) => req,
            Err(err) => {
                warn!("link: rejected phase history request: {err}");
                return;
            }
        };
        let cursor = u8::try_from(req.start_after).unwrap_or(u8::MAX);
        let limit = effective_count(req.max_count, frames::PHASES_PER_FRAME);
        let phases = app.phases_after(cursor, limit);
        if phases.is_empty() {
            self.send_done(StreamId::Phases, link);
        } else {
            let frame = frames::encode_phase_batch(&phases);
            self.send(StreamId::Phases, &frame, link);
        }
    }

    // ── outbound pushes ─────────────────────────────────────────────────

    /// Push a freshly committed puff to a subscribed peer. No subscription,
    /// no traffic.
    pub fn push_puff<L: LinkPort>(&self, puff: &PuffRecord, link: &mut L) {
        let Some(delivery) = self.session.delivery_for(StreamId::Puffs) else {
            return;
        };
        let frame = frames::encode_puff_batch(std::slice::from_ref(puff));
        if !link.deliver(StreamId::Puffs, delivery, &frame) {
            warn!("link: live puff push failed");
        }
    }

    /// Push a phase transition to a subscribed peer.
    pub fn push_phase<L: LinkPort>(&self, phase: &PhaseRecord, link: &mut L) {
        let Some(delivery) = self.session.delivery_for(StreamId::Phases) else {
            return;
        };
        let frame = frames::encode_phase_batch(std::slice::from_ref(phase));
        if !link.deliver(StreamId::Phases, delivery, &frame) {
            warn!("link: live phase push failed");
        }
    }

    /// Drain buffered log lines to a subscribed peer, at most `log_burst`
    /// frames per call. A line longer than one payload goes out in several
    /// chunks and each chunk spends budget, so a burst never floats far
    /// above the configured cap.
    pub fn pump_logs<D, L>(&self, drain: &mut D, link: &mut L)
    where
        D: LogDrain,
        L: LinkPort,
    {
        let Some(delivery) = self.session.delivery_for(StreamId::Log) else {
            return;
        };
        let mut budget = self.log_burst;
        while budget > 0 {
            let Some(line) = drain.pop_line() else {
                break;
            };
            for chunk in line.as_bytes().chunks(frames::MAX_PAYLOAD) {
                // Best effort. Nothing is logged from in here: the pump
                // must never feed its own queue.
                if !link.deliver(StreamId::Log, delivery, chunk) {
                    return;
                }
                budget = budget.saturating_sub(1);
            }
        }
    }

    fn send<L: LinkPort>(&self, stream: StreamId, frame: &[u8], link: &mut L) {
        let delivery = self
            .session
            .delivery_for(stream)
            .unwrap_or(Delivery::Notify);
        if !link.deliver(stream, delivery, frame) {
            warn!("link: delivery failed on {stream:?}");
        }
    }

    fn send_done<L: LinkPort>(&self, stream: StreamId, link: &mut L) {
        // End-of-data always goes out as a plain notification.
        if !link.deliver(stream, Delivery::Notify, &frames::done_frame()) {
            warn!("link: delivery failed on {stream:?}");
        }
    }
}

/// `max_count` of zero means "fill the frame"; anything larger than the
/// frame holds is clamped down to it.
fn effective_count(max_count: u8, frame_capacity: usize) -> usize {
    if max_count == 0 {
        frame_capacity
    } else {
        frame_capacity.min(usize::from(max_count))
    }
}
