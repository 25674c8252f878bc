use std::path::Path;
use std::sync::LazyLock;

use anyhow::Result;
use log::{debug, error};
use regex::Regex;
use tokio::fs;

static MAC_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})").expect("static MAC pattern")
});

/// Asynchronously ensures that a directory exists, creating it if it does not.
/// This function is idempotent.
pub async fn ensure_directory_exists<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    if !path.exists() {
        if let Err(e) = fs::create_dir_all(path).await {
            error!("Failed to create directory at {:?}: {}", path, e);
            return Err(e.into());
        }
        debug!("Created directory at: {:?}", path);
    }
    Ok(())
}

/// Pulls the last MAC address out of a platform device id, upper-cased with `:` separators.
pub fn extract_mac_address(device_id: &str) -> Option<String> {
    MAC_ADDRESS
        .find_iter(device_id)
        .last()
        .map(|m| m.as_str().to_uppercase().replace('-', ":"))
}

/// Canonical form of a device address used as registry and session key.
///
/// Platform ids that embed a MAC collapse to that MAC; anything else
/// (e.g. the UUIDs CoreBluetooth hands out) is trimmed and upper-cased.
pub fn normalize_address(raw: &str) -> String {
    extract_mac_address(raw).unwrap_or_else(|| raw.trim().to_uppercase())
}
