//! Device registry
//! Devices discovered during the current scan, keyed by normalised address.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use log::debug;

use crate::core::bluetooth::constants::UNNAMED_DEVICE;
use crate::core::bluetooth::types::{Advertisement, ConnectionState, DeviceRecord};
use crate::core::events::FoundDevice;
use crate::utils::normalize_address;

#[derive(Clone, Default)]
pub struct DeviceRegistry {
    devices: Arc<Mutex<HashMap<String, DeviceRecord>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an advertisement. Returns the device to announce the first
    /// time an address is seen, `None` on later sightings.
    pub fn record_discovery(&self, adv: &Advertisement) -> Option<FoundDevice> {
        let address = normalize_address(&adv.address);
        let now = Utc::now();
        let mut devices = self.devices.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(record) = devices.get_mut(&address) {
            record.last_seen = now;
            if adv.rssi.is_some() {
                record.rssi = adv.rssi;
            }
            if let Some(name) = &adv.name {
                record.name = name.clone();
            }
            return None;
        }

        let name = adv.name.clone().unwrap_or_else(|| UNNAMED_DEVICE.to_string());
        debug!("New device {} ({}), RSSI: {:?}", address, name, adv.rssi);
        devices.insert(
            address.clone(),
            DeviceRecord {
                address: address.clone(),
                name: name.clone(),
                rssi: adv.rssi,
                discovered_at: now,
                last_seen: now,
                connection_state: ConnectionState::Idle,
            },
        );
        Some(FoundDevice {
            address,
            name,
            rssi: adv.rssi,
        })
    }

    /// Forgets every device except `keep`.
    pub fn clear_except(&self, keep: Option<&str>) {
        let mut devices = self.devices.lock().unwrap_or_else(|e| e.into_inner());
        devices.retain(|address, _| Some(address.as_str()) == keep);
    }

    pub fn contains(&self, address: &str) -> bool {
        let devices = self.devices.lock().unwrap_or_else(|e| e.into_inner());
        devices.contains_key(&normalize_address(address))
    }

    pub fn get(&self, address: &str) -> Option<DeviceRecord> {
        let devices = self.devices.lock().unwrap_or_else(|e| e.into_inner());
        devices.get(&normalize_address(address)).cloned()
    }

    pub fn set_state(&self, address: &str, state: ConnectionState) {
        let mut devices = self.devices.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(record) = devices.get_mut(&normalize_address(address)) {
            record.connection_state = state;
        }
    }

    /// Snapshot of all records, ordered by discovery time.
    pub fn devices(&self) -> Vec<DeviceRecord> {
        let devices = self.devices.lock().unwrap_or_else(|e| e.into_inner());
        let mut records: Vec<DeviceRecord> = devices.values().cloned().collect();
        records.sort_by_key(|r| r.discovered_at);
        records
    }
}
