//! Device identity derived from the ESP32 factory MAC address.
//!
//! Produces a stable, human-readable device ID in the form `WSP-XXYYZZ`
//! (last 3 bytes of the 6-byte MAC in uppercase hex). This ID is:
//! - Deterministic across reboots (factory-burned eFuse MAC)
//! - Used as the BLE advertising local name (`wisp-XXYYZZ`)
//! - Logged in the boot banner so a bench unit can be told apart
//!
//! A blank eFuse (all-zero or all-FF MAC) still yields an ID — every unit
//! must boot and advertise — but the read path logs it so the bench catches
//! unprogrammed boards before they ship.

/// Fixed-size device ID string: "WSP-XXYYZZ" (10 chars max).
pub type DeviceIdString = heapless::String<16>;

/// Full 6-byte MAC address.
pub type MacAddress = [u8; 6];

/// True when the MAC came from a programmed eFuse block.
///
/// All-zero means the block was never burned; all-FF means it read back
/// erased. Either way the derived ID would collide across every such unit.
pub fn is_factory_programmed(mac: &MacAddress) -> bool {
    *mac != [0x00; 6] && *mac != [0xFF; 6]
}

/// Read the factory MAC address from eFuse.
#[cfg(target_os = "espidf")]
pub fn read_mac() -> MacAddress {
    let mut mac: MacAddress = [0u8; 6];
    let ret = unsafe { esp_idf_svc::sys::esp_efuse_mac_get_default(mac.as_mut_ptr()) };
    if ret != esp_idf_svc::sys::ESP_OK {
        log::warn!("device_id: eFuse MAC read returned {}", ret);
    } else if !is_factory_programmed(&mac) {
        log::warn!("device_id: eFuse MAC is blank, ID will not be unique");
    }
    mac
}

/// Simulation: returns a deterministic fake MAC.
#[cfg(not(target_os = "espidf"))]
pub fn read_mac() -> MacAddress {
    [0xDE, 0xAD, 0xBE, 0xEF, 0xCA, 0xFE]
}

/// Derive the short device ID from the last 3 MAC bytes.
/// Format: `WSP-XXYYZZ` (e.g., `WSP-EFCAFE`).
pub fn device_id(mac: &MacAddress) -> DeviceIdString {
    let mut id = DeviceIdString::new();
    use core::fmt::Write;
    let _ = write!(id, "WSP-{:02X}{:02X}{:02X}", mac[3], mac[4], mac[5]);
    id
}

/// Derive the BLE advertising local name from the last 3 MAC bytes.
/// Format: `wisp-XXYYZZ` (11 chars, fits a 31-byte ADV payload with room
/// for flags and the service UUID).
pub fn ble_name(mac: &MacAddress) -> heapless::String<24> {
    let mut name = heapless::String::<24>::new();
    use core::fmt::Write;
    let _ = write!(name, "wisp-{:02X}{:02X}{:02X}", mac[3], mac[4], mac[5]);
    name
}
