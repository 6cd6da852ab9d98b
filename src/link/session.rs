//! Link session state.
//!
//! Tracks what the peer is entitled to receive (per-stream subscription
//! flags with CCCD semantics) and when the host may give up on it (the
//! idle-interaction timer). Pure state — the engine in
//! [`link`](crate::link) mutates it and the adapters never see it.

use crate::config::LinkConfig;

/// The five logical streams of the telemetry service. The GATT adapter
/// maps each to one characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamId {
    /// Write-only: 4-byte LE epoch seconds.
    TimeSync = 0,
    /// Write request / pushed batch responses, plus live push.
    Puffs = 1,
    /// Same shape as `Puffs` for phase records.
    Phases = 2,
    /// One-way diagnostic line stream.
    Log = 3,
    /// Read-only liveness constant.
    Liveness = 4,
}

impl StreamId {
    pub const COUNT: usize = 5;

    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::TimeSync),
            1 => Some(Self::Puffs),
            2 => Some(Self::Phases),
            3 => Some(Self::Log),
            4 => Some(Self::Liveness),
            _ => None,
        }
    }

    pub fn raw(self) -> u8 {
        self as u8
    }
}

/// How a frame leaves the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Unacknowledged push.
    Notify,
    /// Acknowledged push.
    Indicate,
}

/// Decoded CCCD value: bit0 notify, bit1 indicate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionFlags {
    pub notify: bool,
    pub indicate: bool,
}

impl SubscriptionFlags {
    pub fn from_cccd(raw: u16) -> Self {
        Self {
            notify: raw & 0x0001 != 0,
            indicate: raw & 0x0002 != 0,
        }
    }

    /// The delivery mode this subscription asks for; indicate wins when
    /// both bits are set.
    pub fn delivery(self) -> Option<Delivery> {
        if self.indicate {
            Some(Delivery::Indicate)
        } else if self.notify {
            Some(Delivery::Notify)
        } else {
            None
        }
    }
}

/// Per-connection state with the idle-timeout policy.
pub struct LinkSession {
    connected: bool,
    subs: [SubscriptionFlags; StreamId::COUNT],
    last_interaction_ms: u64,
    idle_timeout_ms: u64,
}

impl LinkSession {
    pub fn new(config: LinkConfig) -> Self {
        Self {
            connected: false,
            subs: [SubscriptionFlags::default(); StreamId::COUNT],
            last_interaction_ms: 0,
            idle_timeout_ms: config.idle_timeout_ms,
        }
    }

    /// Any read, write, connect or edge counts as interaction.
    pub fn touch(&mut self, now_ms: u64) {
        self.last_interaction_ms = now_ms;
    }

    pub fn on_connected(&mut self, now_ms: u64) {
        self.connected = true;
        self.touch(now_ms);
    }

    /// Disconnection wipes the subscription flags; the peer re-arms them
    /// on its next connection.
    pub fn on_disconnected(&mut self, now_ms: u64) {
        self.connected = false;
        self.subs = [SubscriptionFlags::default(); StreamId::COUNT];
        self.touch(now_ms);
    }

    pub fn set_subscription(&mut self, stream: StreamId, flags: SubscriptionFlags) {
        self.subs[stream as usize] = flags;
    }

    pub fn subscription(&self, stream: StreamId) -> SubscriptionFlags {
        self.subs[stream as usize]
    }

    pub fn delivery_for(&self, stream: StreamId) -> Option<Delivery> {
        self.subs[stream as usize].delivery()
    }

    pub fn connected(&self) -> bool {
        self.connected
    }

    /// `true` once no peer is attached and the idle window has fully
    /// elapsed — the host may tear the service down.
    pub fn should_suspend(&self, now_ms: u64) -> bool {
        !self.connected
            && now_ms.saturating_sub(self.last_interaction_ms) >= self.idle_timeout_ms
    }
}
