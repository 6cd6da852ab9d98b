//! BLE GATT link adapter.
//!
//! Implements [`LinkPort`] — the outbound half of the wireless link — and
//! feeds inbound characteristic writes to the protocol engine through a
//! bounded inbox.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: Bluedroid BLE GATT server via raw
//!   `esp_idf_svc::sys` calls.
//! - **all other targets**: simulation stubs for host-side tests.
//!
//! ## GATT Service Layout
//!
//! | Characteristic | UUID                      | Props                      |
//! |----------------|---------------------------|----------------------------|
//! | Time Sync      | `57730002-…-2f61c83e4a10` | Write                      |
//! | Puff History   | `57730003-…-2f61c83e4a10` | Write + Notify/Indicate    |
//! | Phase History  | `57730004-…-2f61c83e4a10` | Write + Notify/Indicate    |
//! | Log Stream     | `57730005-…-2f61c83e4a10` | Notify                     |
//! | Liveness       | `57730006-…-2f61c83e4a10` | Read                       |
//!
//! The three subscribable characteristics each carry a standard CCCD
//! (0x2902); its value routes through the engine, which owns subscription
//! state and the notify/indicate preference.

use core::fmt;
use log::{info, warn};

use crate::app::ports::LinkPort;
use crate::link::session::{Delivery, StreamId};

// ───────────────────────────────────────────────────────────────
// Constants
// ───────────────────────────────────────────────────────────────

pub const SERVICE_UUID: u128 = 0x57730001_9c4d_4a63_8bd0_2f61c83e4a10;
pub const CHAR_TIME_SYNC: u128 = 0x57730002_9c4d_4a63_8bd0_2f61c83e4a10;
pub const CHAR_PUFFS: u128 = 0x57730003_9c4d_4a63_8bd0_2f61c83e4a10;
pub const CHAR_PHASES: u128 = 0x57730004_9c4d_4a63_8bd0_2f61c83e4a10;
pub const CHAR_LOG: u128 = 0x57730005_9c4d_4a63_8bd0_2f61c83e4a10;
pub const CHAR_LIVENESS: u128 = 0x57730006_9c4d_4a63_8bd0_2f61c83e4a10;

/// Longest inbound payload the protocol defines (history request: 4 bytes,
/// time sync: 4 bytes).  Anything longer is garbage; the copy clamps and
/// the engine rejects the leftover on length.
pub const INBOUND_MAX: usize = 16;

/// Writes queued between main-loop ticks.  The Bluedroid task produces,
/// the main loop consumes; centrals that outrun this lose newest-first.
pub const INBOX_CAPACITY: usize = 8;

// ───────────────────────────────────────────────────────────────
// Error type
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BleError {
    /// The Bluedroid bring-up sequence failed at the named stage.
    StackInitFailed(&'static str, i32),
}

impl fmt::Display for BleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StackInitFailed(stage, rc) => {
                write!(f, "BLE stack init failed at {} (rc={})", stage, rc)
            }
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Inbound queue (Bluedroid task → main loop)
// ───────────────────────────────────────────────────────────────

/// One inbound item from a central.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A characteristic value write (request or time-sync payload).
    Data {
        stream: StreamId,
        bytes: heapless::Vec<u8, INBOUND_MAX>,
    },
    /// A CCCD write (subscription change).
    Cccd { stream: StreamId, value: u16 },
}

// GATTS callbacks run in the Bluedroid task (not ISR), so std Mutex is safe.
static INBOX: std::sync::Mutex<heapless::Deque<Inbound, INBOX_CAPACITY>> =
    std::sync::Mutex::new(heapless::Deque::new());

/// Queue an inbound item for the main loop.  Returns `false` (and drops
/// the item) when the inbox is full.
pub fn push_inbound(item: Inbound) -> bool {
    let Ok(mut inbox) = INBOX.lock() else {
        return false;
    };
    if inbox.push_back(item).is_err() {
        warn!("BLE: inbox full, dropping inbound write");
        return false;
    }
    true
}

/// Consume the oldest queued inbound item.
pub fn take_inbound() -> Option<Inbound> {
    INBOX.lock().ok().and_then(|mut inbox| inbox.pop_front())
}

/// Clamp a raw characteristic write to the inbox payload size.
pub fn clamp_inbound(data: &[u8]) -> heapless::Vec<u8, INBOUND_MAX> {
    let mut bytes = heapless::Vec::new();
    let take = data.len().min(INBOUND_MAX);
    let _ = bytes.extend_from_slice(&data[..take]);
    bytes
}

// ───────────────────────────────────────────────────────────────
// ESP-IDF BLE static state
// ───────────────────────────────────────────────────────────────
//
// Bluedroid callbacks are C function pointers that cannot capture Rust
// closures. These atomics bridge the callback context to the adapter.

#[cfg(target_os = "espidf")]
use core::sync::atomic::{AtomicBool, AtomicU16, AtomicU8, Ordering as AtomicOrdering};

#[cfg(target_os = "espidf")]
static BLE_GATTS_IF: AtomicU8 = AtomicU8::new(0);
#[cfg(target_os = "espidf")]
static BLE_CONN_ID: AtomicU16 = AtomicU16::new(0);
// conn_id 0 is a valid Bluedroid id, so connection state gets its own flag.
#[cfg(target_os = "espidf")]
static BLE_CONNECTED: AtomicBool = AtomicBool::new(false);
#[cfg(target_os = "espidf")]
static BLE_SVC_HANDLE: AtomicU16 = AtomicU16::new(0);
#[cfg(target_os = "espidf")]
static BLE_CHAR_STEP: AtomicU8 = AtomicU8::new(0);

#[cfg(target_os = "espidf")]
static BLE_TIME_SYNC_HANDLE: AtomicU16 = AtomicU16::new(0);
#[cfg(target_os = "espidf")]
static BLE_PUFFS_HANDLE: AtomicU16 = AtomicU16::new(0);
#[cfg(target_os = "espidf")]
static BLE_PUFFS_CCCD_HANDLE: AtomicU16 = AtomicU16::new(0);
#[cfg(target_os = "espidf")]
static BLE_PHASES_HANDLE: AtomicU16 = AtomicU16::new(0);
#[cfg(target_os = "espidf")]
static BLE_PHASES_CCCD_HANDLE: AtomicU16 = AtomicU16::new(0);
#[cfg(target_os = "espidf")]
static BLE_LOG_HANDLE: AtomicU16 = AtomicU16::new(0);
#[cfg(target_os = "espidf")]
static BLE_LOG_CCCD_HANDLE: AtomicU16 = AtomicU16::new(0);
#[cfg(target_os = "espidf")]
static BLE_LIVENESS_HANDLE: AtomicU16 = AtomicU16::new(0);

// CCCD shadow values so descriptor reads can be answered without
// round-tripping through the engine.
#[cfg(target_os = "espidf")]
static BLE_PUFFS_CCCD_VALUE: AtomicU16 = AtomicU16::new(0);
#[cfg(target_os = "espidf")]
static BLE_PHASES_CCCD_VALUE: AtomicU16 = AtomicU16::new(0);
#[cfg(target_os = "espidf")]
static BLE_LOG_CCCD_VALUE: AtomicU16 = AtomicU16::new(0);

/// Handles allocated by `esp_ble_gatts_create_service`: service declaration,
/// five characteristics (declaration + value each), three descriptors.
#[cfg(target_os = "espidf")]
const GATT_NUM_HANDLES: u16 = 16;

#[cfg(target_os = "espidf")]
const BLE_APP_ID: u16 = 0x0057;

#[cfg(target_os = "espidf")]
fn uuid128_to_esp(uuid: u128) -> esp_idf_svc::sys::esp_bt_uuid_t {
    let mut t: esp_idf_svc::sys::esp_bt_uuid_t = unsafe { core::mem::zeroed() };
    t.len = 16;
    unsafe {
        t.uuid.uuid128 = uuid.to_le_bytes();
    }
    t
}

#[cfg(target_os = "espidf")]
fn uuid16_to_esp(uuid: u16) -> esp_idf_svc::sys::esp_bt_uuid_t {
    let mut t: esp_idf_svc::sys::esp_bt_uuid_t = unsafe { core::mem::zeroed() };
    t.len = 2;
    unsafe {
        t.uuid.uuid16 = uuid;
    }
    t
}

#[cfg(target_os = "espidf")]
unsafe fn add_gatt_char(svc_handle: u16, uuid: u128, perm: u32, prop: u32) {
    use esp_idf_svc::sys::*;
    let mut char_uuid = uuid128_to_esp(uuid);
    unsafe {
        esp_ble_gatts_add_char(
            svc_handle,
            &mut char_uuid,
            perm as esp_gatt_perm_t,
            prop as esp_gatt_char_prop_t,
            core::ptr::null_mut(),
            core::ptr::null_mut(),
        );
    }
}

#[cfg(target_os = "espidf")]
unsafe fn add_gatt_cccd(svc_handle: u16) {
    use esp_idf_svc::sys::*;
    let mut descr_uuid = uuid16_to_esp(ESP_GATT_UUID_CHAR_CLIENT_CONFIG as u16);
    unsafe {
        esp_ble_gatts_add_char_descr(
            svc_handle,
            &mut descr_uuid,
            (ESP_GATT_PERM_READ | ESP_GATT_PERM_WRITE) as esp_gatt_perm_t,
            core::ptr::null_mut(),
            core::ptr::null_mut(),
        );
    }
}

#[cfg(target_os = "espidf")]
unsafe fn start_advertising() {
    use esp_idf_svc::sys::*;
    let mut adv_params = esp_ble_adv_params_t {
        adv_int_min: 0x20,
        adv_int_max: 0x40,
        adv_type: esp_ble_adv_type_t_ADV_TYPE_IND,
        own_addr_type: esp_ble_addr_type_t_BLE_ADDR_TYPE_PUBLIC,
        channel_map: esp_ble_adv_channel_t_ADV_CHNL_ALL,
        adv_filter_policy: esp_ble_adv_filter_t_ADV_FILTER_ALLOW_SCAN_ANY_CON_ANY,
        ..unsafe { core::mem::zeroed() }
    };
    unsafe {
        esp_ble_gap_start_advertising(&mut adv_params);
    }
}

// ───────────────────────────────────────────────────────────────
// GAP / GATTS callbacks
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
unsafe extern "C" fn ble_gap_event_handler(
    event: esp_idf_svc::sys::esp_gap_ble_cb_event_t,
    _param: *mut esp_idf_svc::sys::esp_ble_gap_cb_param_t,
) {
    use esp_idf_svc::sys::*;
    match event {
        esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_DATA_SET_COMPLETE_EVT => {
            // Advertising payload is in place; go visible.
            unsafe { start_advertising() };
        }
        esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_START_COMPLETE_EVT => {
            log::info!("BLE GAP: advertising started");
        }
        esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_STOP_COMPLETE_EVT => {
            log::info!("BLE GAP: advertising stopped");
        }
        _ => {}
    }
}

#[cfg(target_os = "espidf")]
unsafe extern "C" fn ble_gatts_event_handler(
    event: esp_idf_svc::sys::esp_gatts_cb_event_t,
    gatts_if: esp_idf_svc::sys::esp_gatt_if_t,
    param: *mut esp_idf_svc::sys::esp_ble_gatts_cb_param_t,
) {
    use esp_idf_svc::sys::*;

    BLE_GATTS_IF.store(gatts_if, AtomicOrdering::Relaxed);

    match event {
        esp_gatts_cb_event_t_ESP_GATTS_REG_EVT => {
            log::info!("BLE GATTS: app registered (if={})", gatts_if);
            let svc_uuid = uuid128_to_esp(SERVICE_UUID);
            let mut svc_id = esp_gatt_srvc_id_t {
                id: esp_gatt_id_t {
                    uuid: svc_uuid,
                    inst_id: 0,
                },
                is_primary: true,
            };
            unsafe {
                esp_ble_gatts_create_service(gatts_if, &mut svc_id, GATT_NUM_HANDLES);
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_CREATE_EVT => {
            let p = unsafe { &(*param).create };
            let svc_handle = p.service_handle;
            BLE_SVC_HANDLE.store(svc_handle, AtomicOrdering::Relaxed);
            log::info!("BLE GATTS: service created (handle={})", svc_handle);
            unsafe {
                esp_ble_gatts_start_service(svc_handle);
            }
            // Characteristics and descriptors register one at a time; the
            // step counter sequences the ADD_CHAR / ADD_CHAR_DESCR events.
            BLE_CHAR_STEP.store(1, AtomicOrdering::Relaxed);
            unsafe {
                add_gatt_char(
                    svc_handle,
                    CHAR_TIME_SYNC,
                    ESP_GATT_PERM_WRITE,
                    ESP_GATT_CHAR_PROP_BIT_WRITE,
                );
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_ADD_CHAR_EVT => {
            let p = unsafe { &(*param).add_char };
            let handle = p.attr_handle;
            let step = BLE_CHAR_STEP.load(AtomicOrdering::Relaxed);
            let svc_handle = BLE_SVC_HANDLE.load(AtomicOrdering::Relaxed);
            match step {
                1 => {
                    BLE_TIME_SYNC_HANDLE.store(handle, AtomicOrdering::Relaxed);
                    BLE_CHAR_STEP.store(2, AtomicOrdering::Relaxed);
                    unsafe {
                        add_gatt_char(
                            svc_handle,
                            CHAR_PUFFS,
                            ESP_GATT_PERM_WRITE,
                            ESP_GATT_CHAR_PROP_BIT_WRITE
                                | ESP_GATT_CHAR_PROP_BIT_NOTIFY
                                | ESP_GATT_CHAR_PROP_BIT_INDICATE,
                        );
                    }
                }
                2 => {
                    BLE_PUFFS_HANDLE.store(handle, AtomicOrdering::Relaxed);
                    BLE_CHAR_STEP.store(3, AtomicOrdering::Relaxed);
                    unsafe { add_gatt_cccd(svc_handle) };
                }
                4 => {
                    BLE_PHASES_HANDLE.store(handle, AtomicOrdering::Relaxed);
                    BLE_CHAR_STEP.store(5, AtomicOrdering::Relaxed);
                    unsafe { add_gatt_cccd(svc_handle) };
                }
                6 => {
                    BLE_LOG_HANDLE.store(handle, AtomicOrdering::Relaxed);
                    BLE_CHAR_STEP.store(7, AtomicOrdering::Relaxed);
                    unsafe { add_gatt_cccd(svc_handle) };
                }
                8 => {
                    BLE_LIVENESS_HANDLE.store(handle, AtomicOrdering::Relaxed);
                    BLE_CHAR_STEP.store(9, AtomicOrdering::Relaxed);
                    log::info!("BLE GATTS: GATT table complete (liveness handle={})", handle);
                }
                _ => {}
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_ADD_CHAR_DESCR_EVT => {
            let p = unsafe { &(*param).add_char_descr };
            let handle = p.attr_handle;
            let step = BLE_CHAR_STEP.load(AtomicOrdering::Relaxed);
            let svc_handle = BLE_SVC_HANDLE.load(AtomicOrdering::Relaxed);
            match step {
                3 => {
                    BLE_PUFFS_CCCD_HANDLE.store(handle, AtomicOrdering::Relaxed);
                    BLE_CHAR_STEP.store(4, AtomicOrdering::Relaxed);
                    unsafe {
                        add_gatt_char(
                            svc_handle,
                            CHAR_PHASES,
                            ESP_GATT_PERM_WRITE,
                            ESP_GATT_CHAR_PROP_BIT_WRITE
                                | ESP_GATT_CHAR_PROP_BIT_NOTIFY
                                | ESP_GATT_CHAR_PROP_BIT_INDICATE,
                        );
                    }
                }
                5 => {
                    BLE_PHASES_CCCD_HANDLE.store(handle, AtomicOrdering::Relaxed);
                    BLE_CHAR_STEP.store(6, AtomicOrdering::Relaxed);
                    unsafe {
                        add_gatt_char(svc_handle, CHAR_LOG, 0, ESP_GATT_CHAR_PROP_BIT_NOTIFY);
                    }
                }
                7 => {
                    BLE_LOG_CCCD_HANDLE.store(handle, AtomicOrdering::Relaxed);
                    BLE_CHAR_STEP.store(8, AtomicOrdering::Relaxed);
                    unsafe {
                        add_gatt_char(
                            svc_handle,
                            CHAR_LIVENESS,
                            ESP_GATT_PERM_READ,
                            ESP_GATT_CHAR_PROP_BIT_READ,
                        );
                    }
                }
                _ => {}
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_CONNECT_EVT => {
            let p = unsafe { &(*param).connect };
            BLE_CONN_ID.store(p.conn_id, AtomicOrdering::Relaxed);
            BLE_CONNECTED.store(true, AtomicOrdering::Relaxed);
            log::info!("BLE GATTS: central connected (conn_id={})", p.conn_id);
            crate::events::push_event(crate::events::Event::PeerConnected);
        }
        esp_gatts_cb_event_t_ESP_GATTS_DISCONNECT_EVT => {
            let p = unsafe { &(*param).disconnect };
            BLE_CONNECTED.store(false, AtomicOrdering::Relaxed);
            // Stale CCCD state must not leak into the next connection.
            BLE_PUFFS_CCCD_VALUE.store(0, AtomicOrdering::Relaxed);
            BLE_PHASES_CCCD_VALUE.store(0, AtomicOrdering::Relaxed);
            BLE_LOG_CCCD_VALUE.store(0, AtomicOrdering::Relaxed);
            log::info!("BLE GATTS: central disconnected (reason=0x{:02x})", p.reason);
            crate::events::push_event(crate::events::Event::PeerDisconnected);
            // Restart advertising so the next central can find us.
            unsafe { start_advertising() };
        }
        esp_gatts_cb_event_t_ESP_GATTS_MTU_EVT => {
            let p = unsafe { &(*param).mtu };
            log::info!("BLE GATTS: MTU exchanged ({})", p.mtu);
        }
        esp_gatts_cb_event_t_ESP_GATTS_WRITE_EVT => {
            let p = unsafe { &(*param).write };
            let handle = p.handle;
            let data = unsafe { core::slice::from_raw_parts(p.value, p.len as usize) };

            if handle == BLE_TIME_SYNC_HANDLE.load(AtomicOrdering::Relaxed) {
                push_inbound(Inbound::Data {
                    stream: StreamId::TimeSync,
                    bytes: clamp_inbound(data),
                });
                crate::events::push_event(crate::events::Event::LinkInbound);
            } else if handle == BLE_PUFFS_HANDLE.load(AtomicOrdering::Relaxed) {
                push_inbound(Inbound::Data {
                    stream: StreamId::Puffs,
                    bytes: clamp_inbound(data),
                });
                crate::events::push_event(crate::events::Event::LinkInbound);
            } else if handle == BLE_PHASES_HANDLE.load(AtomicOrdering::Relaxed) {
                push_inbound(Inbound::Data {
                    stream: StreamId::Phases,
                    bytes: clamp_inbound(data),
                });
                crate::events::push_event(crate::events::Event::LinkInbound);
            } else if handle == BLE_PUFFS_CCCD_HANDLE.load(AtomicOrdering::Relaxed) {
                if let Some(value) = cccd_value(data) {
                    BLE_PUFFS_CCCD_VALUE.store(value, AtomicOrdering::Relaxed);
                    push_inbound(Inbound::Cccd {
                        stream: StreamId::Puffs,
                        value,
                    });
                    crate::events::push_event(crate::events::Event::LinkInbound);
                }
            } else if handle == BLE_PHASES_CCCD_HANDLE.load(AtomicOrdering::Relaxed) {
                if let Some(value) = cccd_value(data) {
                    BLE_PHASES_CCCD_VALUE.store(value, AtomicOrdering::Relaxed);
                    push_inbound(Inbound::Cccd {
                        stream: StreamId::Phases,
                        value,
                    });
                    crate::events::push_event(crate::events::Event::LinkInbound);
                }
            } else if handle == BLE_LOG_CCCD_HANDLE.load(AtomicOrdering::Relaxed) {
                if let Some(value) = cccd_value(data) {
                    BLE_LOG_CCCD_VALUE.store(value, AtomicOrdering::Relaxed);
                    push_inbound(Inbound::Cccd {
                        stream: StreamId::Log,
                        value,
                    });
                    crate::events::push_event(crate::events::Event::LinkInbound);
                }
            }

            // CCCD writes always arrive as Write With Response; requests may
            // too, depending on the central.
            if p.need_rsp {
                unsafe {
                    esp_ble_gatts_send_response(
                        gatts_if,
                        p.conn_id,
                        p.trans_id,
                        esp_gatt_status_t_ESP_GATT_OK,
                        core::ptr::null_mut(),
                    );
                }
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_READ_EVT => {
            let p = unsafe { &(*param).read };
            let handle = p.handle;

            let payload: Option<heapless::Vec<u8, 4>> =
                if handle == BLE_LIVENESS_HANDLE.load(AtomicOrdering::Relaxed) {
                    crate::events::push_event(crate::events::Event::KeepaliveRead);
                    heapless::Vec::from_slice(&crate::link::frames::KEEPALIVE_RESPONSE).ok()
                } else if handle == BLE_PUFFS_CCCD_HANDLE.load(AtomicOrdering::Relaxed) {
                    let v = BLE_PUFFS_CCCD_VALUE.load(AtomicOrdering::Relaxed);
                    heapless::Vec::from_slice(&v.to_le_bytes()).ok()
                } else if handle == BLE_PHASES_CCCD_HANDLE.load(AtomicOrdering::Relaxed) {
                    let v = BLE_PHASES_CCCD_VALUE.load(AtomicOrdering::Relaxed);
                    heapless::Vec::from_slice(&v.to_le_bytes()).ok()
                } else if handle == BLE_LOG_CCCD_HANDLE.load(AtomicOrdering::Relaxed) {
                    let v = BLE_LOG_CCCD_VALUE.load(AtomicOrdering::Relaxed);
                    heapless::Vec::from_slice(&v.to_le_bytes()).ok()
                } else {
                    None
                };

            if let Some(bytes) = payload {
                let mut rsp: esp_gatt_rsp_t = unsafe { core::mem::zeroed() };
                // esp_gatt_rsp_t is a C union; attr_value is the only arm
                // this server ever fills.
                unsafe {
                    rsp.attr_value.handle = handle;
                    rsp.attr_value.len = bytes.len() as u16;
                    rsp.attr_value.value[..bytes.len()].copy_from_slice(&bytes);
                }
                unsafe {
                    esp_ble_gatts_send_response(
                        gatts_if,
                        p.conn_id,
                        p.trans_id,
                        esp_gatt_status_t_ESP_GATT_OK,
                        &mut rsp,
                    );
                }
            }
        }
        _ => {}
    }
}

/// Decode a CCCD write payload (2-byte little-endian bitfield).
#[cfg(target_os = "espidf")]
fn cccd_value(data: &[u8]) -> Option<u16> {
    if data.len() < 2 {
        log::warn!("BLE: short CCCD write ({} bytes), ignored", data.len());
        return None;
    }
    Some(u16::from_le_bytes([data[0], data[1]]))
}

// ───────────────────────────────────────────────────────────────
// Link adapter
// ───────────────────────────────────────────────────────────────

/// The BLE side of the link: owns stack lifecycle and outbound delivery.
pub struct BleLink {
    device_name: heapless::String<24>,
    active: bool,
}

impl BleLink {
    pub fn new(device_name: heapless::String<24>) -> Self {
        Self {
            device_name,
            active: false,
        }
    }

    /// Bring up the stack and start advertising.
    pub fn start(&mut self) -> Result<(), BleError> {
        info!("BLE: starting, advertising as '{}'", self.device_name);
        self.platform_start()?;
        self.active = true;
        Ok(())
    }

    /// Tear the stack down (idle-suspend path: radio off before deep sleep).
    pub fn stop(&mut self) {
        if !self.active {
            return;
        }
        self.platform_stop();
        self.active = false;
        info!("BLE: stopped");
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    // ── Platform-specific ─────────────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_start(&mut self) -> Result<(), BleError> {
        use esp_idf_svc::sys::*;
        unsafe {
            // Release classic BT memory (BLE-only mode saves ~30 KB).
            esp_bt_controller_mem_release(esp_bt_mode_t_ESP_BT_MODE_CLASSIC_BT);

            let mut bt_cfg = esp_bt_controller_config_t::default();
            let ret = esp_bt_controller_init(&mut bt_cfg);
            if ret != ESP_OK {
                return Err(BleError::StackInitFailed("bt_controller_init", ret));
            }

            let ret = esp_bt_controller_enable(esp_bt_mode_t_ESP_BT_MODE_BLE);
            if ret != ESP_OK {
                return Err(BleError::StackInitFailed("bt_controller_enable", ret));
            }

            let ret = esp_bluedroid_init();
            if ret != ESP_OK {
                return Err(BleError::StackInitFailed("bluedroid_init", ret));
            }

            let ret = esp_bluedroid_enable();
            if ret != ESP_OK {
                return Err(BleError::StackInitFailed("bluedroid_enable", ret));
            }

            // Static callbacks bridge Bluedroid events into the inbox and
            // the main event queue.
            esp_ble_gap_register_callback(Some(ble_gap_event_handler));
            esp_ble_gatts_register_callback(Some(ble_gatts_event_handler));
            esp_ble_gatts_app_register(BLE_APP_ID);

            // The framing layer budgets frames against this MTU.
            esp_ble_gatt_set_local_mtu(crate::config::PEER_MTU as u16);

            // Set device name, then push the advertising payload; the GAP
            // ADV_DATA_SET_COMPLETE event starts advertising.
            let name = self.device_name.as_bytes();
            esp_ble_gap_set_device_name(name.as_ptr() as *const _);

            let mut adv_data = esp_ble_adv_data_t {
                set_scan_rsp: false,
                include_name: true,
                include_txpower: false,
                appearance: 0,
                flag: (ESP_BLE_ADV_FLAG_GEN_DISC | ESP_BLE_ADV_FLAG_BREDR_NOT_SPT) as u8,
                ..core::mem::zeroed()
            };
            esp_ble_gap_config_adv_data(&mut adv_data);
        }

        log::info!(
            "BLE(espidf): Bluedroid stack initialized, advertising as '{}'",
            self.device_name
        );
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_start(&mut self) -> Result<(), BleError> {
        info!(
            "BLE(sim): advertising '{}' (service {:032x})",
            self.device_name, SERVICE_UUID
        );
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_stop(&mut self) {
        use esp_idf_svc::sys::*;
        unsafe {
            esp_ble_gap_stop_advertising();
            esp_bluedroid_disable();
            esp_bluedroid_deinit();
            esp_bt_controller_disable();
            esp_bt_controller_deinit();
        }
        log::info!("BLE(espidf): stack shut down");
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_stop(&mut self) {
        info!("BLE(sim): stopped");
    }

    #[cfg(target_os = "espidf")]
    fn platform_deliver(&mut self, stream: StreamId, delivery: Delivery, frame: &[u8]) -> bool {
        use esp_idf_svc::sys::*;

        if !BLE_CONNECTED.load(AtomicOrdering::Relaxed) {
            return false;
        }
        let handle = match stream {
            StreamId::TimeSync => BLE_TIME_SYNC_HANDLE.load(AtomicOrdering::Relaxed),
            StreamId::Puffs => BLE_PUFFS_HANDLE.load(AtomicOrdering::Relaxed),
            StreamId::Phases => BLE_PHASES_HANDLE.load(AtomicOrdering::Relaxed),
            StreamId::Log => BLE_LOG_HANDLE.load(AtomicOrdering::Relaxed),
            StreamId::Liveness => BLE_LIVENESS_HANDLE.load(AtomicOrdering::Relaxed),
        };
        if handle == 0 {
            return false;
        }

        let ret = unsafe {
            esp_ble_gatts_send_indicate(
                BLE_GATTS_IF.load(AtomicOrdering::Relaxed),
                BLE_CONN_ID.load(AtomicOrdering::Relaxed),
                handle,
                frame.len() as u16,
                frame.as_ptr() as *mut u8,
                matches!(delivery, Delivery::Indicate),
            )
        };
        ret == ESP_OK
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_deliver(&mut self, stream: StreamId, delivery: Delivery, frame: &[u8]) -> bool {
        log::debug!(
            "BLE(sim): {:?} {:?} {} bytes",
            stream,
            delivery,
            frame.len()
        );
        true
    }
}

impl LinkPort for BleLink {
    fn deliver(&mut self, stream: StreamId, delivery: Delivery, frame: &[u8]) -> bool {
        self.platform_deliver(stream, delivery, frame)
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // The inbox is process-global, so every mutation lives in one test to
    // keep parallel test threads off each other's backs.
    #[test]
    fn inbox_fifo_and_overflow() {
        while take_inbound().is_some() {}

        let data = Inbound::Data {
            stream: StreamId::Puffs,
            bytes: heapless::Vec::from_slice(&[0x10, 0x00, 0x00, 0x05]).unwrap(),
        };
        let cccd = Inbound::Cccd {
            stream: StreamId::Log,
            value: 0x0001,
        };
        assert!(push_inbound(data.clone()));
        assert!(push_inbound(cccd.clone()));
        assert_eq!(take_inbound(), Some(data));
        assert_eq!(take_inbound(), Some(cccd));
        assert_eq!(take_inbound(), None);

        for i in 0..INBOX_CAPACITY {
            assert!(push_inbound(Inbound::Cccd {
                stream: StreamId::Puffs,
                value: i as u16,
            }));
        }
        // Full: the newest item is the one that gets dropped.
        assert!(!push_inbound(Inbound::Cccd {
            stream: StreamId::Puffs,
            value: 0xFFFF,
        }));
        assert_eq!(
            take_inbound(),
            Some(Inbound::Cccd {
                stream: StreamId::Puffs,
                value: 0,
            })
        );

        while take_inbound().is_some() {}
    }

    #[test]
    fn oversized_write_is_clamped_not_dropped() {
        let oversized = [0xAA_u8; 64];
        let clamped = clamp_inbound(&oversized);
        assert_eq!(clamped.len(), INBOUND_MAX);

        let exact = clamp_inbound(&[0x10, 0x02, 0x00, 0x00]);
        assert_eq!(exact.as_slice(), &[0x10, 0x02, 0x00, 0x00]);
    }

    #[test]
    fn sim_lifecycle() {
        let mut name = heapless::String::<24>::new();
        name.push_str("wisp-test").ok();
        let mut link = BleLink::new(name);
        assert!(!link.is_active());
        link.start().unwrap();
        assert!(link.is_active());

        use crate::app::ports::LinkPort;
        assert!(link.deliver(StreamId::Puffs, Delivery::Notify, &[0x02]));

        link.stop();
        assert!(!link.is_active());
    }
}
