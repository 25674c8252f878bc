use serde::{Deserialize, Serialize};

/// Discovery settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Advertisements weaker than this RSSI (dBm) are ignored. `None` accepts all.
    pub min_rssi: Option<i16>,
    /// Only devices whose name contains this text are reported.
    pub name_filter: Option<String>,
    /// Stop scanning automatically after this many seconds. `None` scans until stopped.
    pub duration_secs: Option<u64>,
}

impl ScanConfig {
    /// Returns true if an advertisement passes the configured filters.
    pub fn accepts(&self, name: Option<&str>, rssi: Option<i16>) -> bool {
        let strong_enough = match (self.min_rssi, rssi) {
            (Some(min), Some(rssi)) => rssi >= min,
            (Some(_), None) => false,
            (None, _) => true,
        };
        let name_matches = match &self.name_filter {
            Some(filter) => name.map(|n| n.contains(filter.as_str())).unwrap_or(false),
            None => true,
        };
        strong_enough && name_matches
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_accepts_everything() {
        assert!(ScanConfig::default().accepts(None, None));
    }

    #[test]
    fn test_filters() {
        let config = ScanConfig {
            min_rssi: Some(-70),
            name_filter: Some("TxRx".into()),
            duration_secs: None,
        };
        assert!(config.accepts(Some("TxRx-01"), Some(-60)));
        assert!(!config.accepts(Some("TxRx-01"), Some(-80)));
        assert!(!config.accepts(Some("Speaker"), Some(-60)));
        assert!(!config.accepts(None, Some(-60)));
        assert!(!config.accepts(Some("TxRx-01"), None));
    }
}
