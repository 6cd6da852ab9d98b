//! wisp Firmware — Main Entry Point
//!
//! Hexagonal architecture with event-driven execution and deep-sleep
//! suspend.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  NvsStore       SystemClock      CoilGate       BleLink        │
//! │  (StoragePort)  (ClockPort)      (CoilPort)     (LinkPort)     │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │  AppService (puff tracker · record log)                │    │
//! │  │  LinkEngine (framing · session · history paging)       │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  events (ISR queue) · power (deep-sleep lifecycle)             │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

// ── Module declarations ───────────────────────────────────────
pub mod config;
mod events;
mod pins;
pub mod power;

pub mod app;
pub mod diagnostics;
pub mod link;
pub mod records;
pub mod store;
pub mod tracker;

pub mod adapters;
pub mod drivers;

// ── Imports ───────────────────────────────────────────────────
use anyhow::Result;
use log::info;

use adapters::clock::SystemClock;
use adapters::coil::CoilGate;
use adapters::device_id;
use adapters::gatt::{self, BleLink, Inbound};
use adapters::nvs::NvsStore;
use app::ports::{ClockPort, CoilPort};
use app::service::AppService;
use config::{LinkConfig, StoreLayout, UsagePolicy};
use diagnostics::SharedLogDrain;
use events::Event;
use link::LinkEngine;
use power::WakeReason;
use store::RecordLog;

// ── Main ──────────────────────────────────────────────────────

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    #[cfg(target_os = "espidf")]
    esp_idf_svc::sys::link_patches();
    diagnostics::install();
    diagnostics::install_panic_hook();

    info!("╔══════════════════════════════════════╗");
    info!("║  wisp v{}                         ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    // ── 2. Hardware init ──────────────────────────────────────
    if let Err(e) = drivers::hw_init::init_peripherals() {
        // Peripheral init failure is critical — log and halt.
        // In production this triggers the watchdog reset after timeout.
        log::error!("HAL init failed: {} — halting", e);
        #[allow(clippy::empty_loop)]
        loop {}
    }
    let watchdog = drivers::watchdog::Watchdog::new();
    if let Err(e) = drivers::hw_init::init_isr_service() {
        log::error!("ISR service init failed: {} — continuing without draw detection", e);
    }

    // ── 3. Wake reason ────────────────────────────────────────
    let wake = power::wake_reason();
    match wake {
        WakeReason::Draw => info!("Boot: deep-sleep wake by draw"),
        WakeReason::PowerOn => info!("Boot: power-on"),
        other => info!("Boot: {}", other),
    }

    // ── 4. Storage + domain service ───────────────────────────
    let storage = match NvsStore::new() {
        Ok(s) => s,
        Err(e) => {
            // Without persistence the usage policy cannot be trusted
            // across reboots; halt and let the watchdog retry via reset.
            log::error!("NVS init failed: {} — halting", e);
            #[allow(clippy::empty_loop)]
            loop {}
        }
    };

    let mut clock = SystemClock::new();
    let store = RecordLog::open(storage, StoreLayout::default());
    let mut app = AppService::new(UsagePolicy::default(), store);
    app.start(&mut clock);

    // ── 5. Coil gate ──────────────────────────────────────────
    // hw_init left the gate closed; open it only once the replayed
    // policy state says we are not in lockdown.
    let mut coil = CoilGate::new();
    coil.set_locked(app.locked());

    // ── 6. Device identity + BLE link ─────────────────────────
    let mac = device_id::read_mac();
    info!("Device ID: {}", device_id::device_id(&mac));

    let mut ble = BleLink::new(device_id::ble_name(&mac));
    if let Err(e) = ble.start() {
        // The device still meters draws without a link; history uploads
        // resume after the next successful boot.
        log::error!("BLE start failed: {} — running unlinked", e);
    }

    // ── 7. Link engine ────────────────────────────────────────
    let mut engine = LinkEngine::new(LinkConfig::default());
    let mut drain = SharedLogDrain;

    info!("System ready. Entering event loop.");

    // ── 8. Event loop ─────────────────────────────────────────
    loop {
        // The airflow ISR and the Bluedroid task produce events; this
        // loop is the single consumer, polling at a fixed cadence.
        std::thread::sleep(std::time::Duration::from_millis(config::LOOP_DELAY_MS));

        let now_ms = clock.monotonic_ms();

        events::drain_events(|event| match event {
            Event::AirflowRising => {
                engine.on_interaction(now_ms);
                app.handle_rising_edge(&clock);
            }

            Event::AirflowFalling => {
                engine.on_interaction(now_ms);
                if let Some(commit) = app.handle_falling_edge(&clock) {
                    engine.push_puff(&commit.record, &mut ble);
                }
            }

            Event::LinkInbound => {
                while let Some(item) = gatt::take_inbound() {
                    match item {
                        Inbound::Data { stream, bytes } => {
                            engine.handle_write(
                                stream, &bytes, now_ms, &mut app, &mut clock, &mut ble,
                            );
                        }
                        Inbound::Cccd { stream, value } => {
                            engine.handle_cccd_write(stream, value, now_ms, &app, &mut ble);
                        }
                    }
                }
            }

            Event::PeerConnected => engine.on_connected(now_ms),
            Event::PeerDisconnected => engine.on_disconnected(now_ms),
            Event::KeepaliveRead => engine.on_interaction(now_ms),
        });

        // Phase clock: roll the usage window when its hour is up.
        if let Some(record) = app.advance_phase(&clock) {
            engine.push_phase(&record, &mut ble);
        }

        // Coil gate follows lockdown state.
        coil.set_locked(app.locked());

        // Stream queued log lines to a subscribed central.
        engine.pump_logs(&mut drain, &mut ble);

        // Feed watchdog on every iteration.
        watchdog.feed();

        // Idle suspend: no central and nothing happening on the mouthpiece.
        if engine.should_suspend(clock.monotonic_ms()) {
            info!("link idle — checkpointing and suspending");
            app.checkpoint(&clock);
            coil.set_locked(true);
            ble.stop();
            power::suspend();
        }
    }
}
