//! Accessory configuration
//!
//! Process-wide identity and advertisement state: device id, setup code,
//! category, status flags, configuration number, and the human-readable
//! strings surfaced by the Accessory Information service. The persistence
//! snapshot joins this with the long-term keys and the pairings table.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::pairings::PairingRecord;

/// Bonjour status flags (`sf` TXT record)
pub mod status_flags {
    /// Accessory has no pairings
    pub const NOT_PAIRED: u8 = 0x01;
    /// Accessory has not joined a Wi-Fi network
    pub const NOT_CONFIGURED_FOR_WIFI: u8 = 0x02;
    /// Accessory has detected a problem
    pub const PROBLEM_DETECTED: u8 = 0x04;
}

/// Bonjour feature flags (`ff` TXT record)
pub mod feature_flags {
    /// Accessory supports HAP pairing
    pub const SUPPORTS_HAP_PAIRING: u8 = 0x01;
}

/// Accessory configuration
#[derive(Debug, Clone)]
pub struct AccessoryConfig {
    /// Accessory name, also the initial Bonjour instance name
    pub name: String,
    /// Model name
    pub model: String,
    /// Manufacturer name
    pub manufacturer: String,
    /// Serial number, arbitrary format
    pub serial_number: String,
    /// Firmware revision, `major[.minor[.revision]]`
    pub firmware_revision: String,
    /// Device id `XX:XX:XX:XX:XX:XX`, regenerated on factory reset
    pub device_id: String,
    /// Configuration number, incremented on attribute-database change
    pub config_number: u32,
    /// HAP accessory category identifier
    pub category_id: u8,
    /// Bonjour status flags
    pub status_flags: u8,
    /// Setup code `XXX-XX-XXX` shown to the user
    pub setup_code: String,
    /// TCP port of the HAP service
    pub port: u16,
}

impl AccessoryConfig {
    /// Start building a configuration for the named accessory
    #[must_use]
    pub fn builder(name: impl Into<String>) -> AccessoryConfigBuilder {
        AccessoryConfigBuilder::new(name)
    }

    /// Regenerate identity state: new device id, pairings wiped by the
    /// caller alongside
    pub fn factory_reset(&mut self) {
        self.device_id = random_device_id();
        self.status_flags |= status_flags::NOT_PAIRED;
    }

    /// Bump the configuration number after an attribute-database change
    pub fn bump_config_number(&mut self) {
        self.config_number = self.config_number.wrapping_add(1).max(1);
    }

    /// Re-assert the `NotPaired` status bit; returns whether it changed
    pub fn sync_paired_flag(&mut self, paired: bool) -> bool {
        let before = self.status_flags;
        if paired {
            self.status_flags &= !status_flags::NOT_PAIRED;
        } else {
            self.status_flags |= status_flags::NOT_PAIRED;
        }
        self.status_flags != before
    }
}

/// Builder for [`AccessoryConfig`]
#[derive(Debug)]
pub struct AccessoryConfigBuilder {
    config: AccessoryConfig,
}

impl AccessoryConfigBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            config: AccessoryConfig {
                name: name.into(),
                model: "Model".to_string(),
                manufacturer: "Maker".to_string(),
                serial_number: "0001".to_string(),
                firmware_revision: "0.1".to_string(),
                device_id: random_device_id(),
                config_number: 1,
                category_id: 5,
                status_flags: status_flags::NOT_PAIRED | status_flags::NOT_CONFIGURED_FOR_WIFI,
                setup_code: random_setup_code(),
                port: 7000,
            },
        }
    }

    /// Set the model name
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    /// Set the manufacturer name
    #[must_use]
    pub fn manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.config.manufacturer = manufacturer.into();
        self
    }

    /// Set the serial number
    #[must_use]
    pub fn serial_number(mut self, serial: impl Into<String>) -> Self {
        self.config.serial_number = serial.into();
        self
    }

    /// Set the firmware revision
    #[must_use]
    pub fn firmware_revision(mut self, firmware: impl Into<String>) -> Self {
        self.config.firmware_revision = firmware.into();
        self
    }

    /// Set the accessory category
    #[must_use]
    pub fn category(mut self, category_id: u8) -> Self {
        self.config.category_id = category_id;
        self
    }

    /// Set the setup code (`XXX-XX-XXX`)
    #[must_use]
    pub fn setup_code(mut self, code: impl Into<String>) -> Self {
        self.config.setup_code = code.into();
        self
    }

    /// Set the service port
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Finish building
    #[must_use]
    pub fn build(self) -> AccessoryConfig {
        self.config
    }
}

/// Generate a random `XX:XX:XX:XX:XX:XX` device id
#[must_use]
pub fn random_device_id() -> String {
    let mut octets = [0u8; 6];
    rand::thread_rng().fill(&mut octets);
    octets
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Generate a random `XXX-XX-XXX` setup code
#[must_use]
pub fn random_setup_code() -> String {
    let mut rng = rand::thread_rng();
    loop {
        let digits: Vec<u8> = (0..8).map(|_| rng.gen_range(0..=9)).collect();
        // reject the trivial codes controllers refuse to accept
        if digits.windows(2).all(|w| w[0] == w[1]) {
            continue;
        }
        let code = format!(
            "{}{}{}-{}{}-{}{}{}",
            digits[0], digits[1], digits[2], digits[3], digits[4], digits[5], digits[6], digits[7]
        );
        return code;
    }
}

/// Validate a `XXX-XX-XXX` setup code
#[must_use]
pub fn is_valid_setup_code(code: &str) -> bool {
    let bytes = code.as_bytes();
    bytes.len() == 10
        && bytes[3] == b'-'
        && bytes[6] == b'-'
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| matches!(i, 3 | 6) || b.is_ascii_digit())
}

/// Complete persistable state of an accessory server
///
/// Field names match the on-disk format; the storage medium is opaque to
/// the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Accessory name
    pub name: String,
    /// Model name
    pub model: String,
    /// Manufacturer name
    pub manufacturer: String,
    /// Serial number
    pub serial: String,
    /// Firmware revision
    pub firmware: String,
    /// Device id
    #[serde(rename = "deviceId")]
    pub device_id: String,
    /// Configuration number
    pub config: u32,
    /// Category identifier
    pub category: u8,
    /// Status flags
    pub status: u8,
    /// Setup code
    pub setup: String,
    /// Service port
    pub port: u16,
    /// `[ltpk_hex, ltsk_hex]`
    pub keys: [String; 2],
    /// Pairing records
    pub pairings: Vec<PairingRecord>,
}

impl Snapshot {
    /// Rebuild the configuration part of the snapshot
    #[must_use]
    pub fn to_config(&self) -> AccessoryConfig {
        AccessoryConfig {
            name: self.name.clone(),
            model: self.model.clone(),
            manufacturer: self.manufacturer.clone(),
            serial_number: self.serial.clone(),
            firmware_revision: self.firmware.clone(),
            device_id: self.device_id.clone(),
            config_number: self.config,
            category_id: self.category,
            status_flags: self.status,
            setup_code: self.setup.clone(),
            port: self.port,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = AccessoryConfig::builder("Bridge").build();
        assert_eq!(config.name, "Bridge");
        assert_eq!(config.config_number, 1);
        assert_ne!(config.status_flags & status_flags::NOT_PAIRED, 0);
        assert!(is_valid_setup_code(&config.setup_code));
    }

    #[test]
    fn test_device_id_format() {
        let id = random_device_id();
        assert_eq!(id.len(), 17);
        assert_eq!(id.matches(':').count(), 5);
        for part in id.split(':') {
            assert_eq!(part.len(), 2);
            assert!(u8::from_str_radix(part, 16).is_ok());
        }
    }

    #[test]
    fn test_setup_code_validation() {
        assert!(is_valid_setup_code("031-45-154"));
        assert!(!is_valid_setup_code("03145154"));
        assert!(!is_valid_setup_code("031-45-15a"));
        assert!(!is_valid_setup_code("0314-5-154"));
    }

    #[test]
    fn test_factory_reset_changes_device_id() {
        let mut config = AccessoryConfig::builder("Bridge").build();
        let before = config.device_id.clone();
        config.status_flags &= !status_flags::NOT_PAIRED;
        config.factory_reset();
        assert_ne!(config.device_id, before);
        assert_ne!(config.status_flags & status_flags::NOT_PAIRED, 0);
    }

    #[test]
    fn test_sync_paired_flag() {
        let mut config = AccessoryConfig::builder("Bridge").build();
        assert!(config.sync_paired_flag(true));
        assert_eq!(config.status_flags & status_flags::NOT_PAIRED, 0);
        assert!(!config.sync_paired_flag(true));
        assert!(config.sync_paired_flag(false));
    }

    #[test]
    fn test_snapshot_json_field_names() {
        let snapshot = Snapshot {
            name: "Bridge".into(),
            model: "M1".into(),
            manufacturer: "Maker".into(),
            serial: "0001".into(),
            firmware: "0.1".into(),
            device_id: "AA:BB:CC:DD:EE:FF".into(),
            config: 3,
            category: 5,
            status: 1,
            setup: "031-45-154".into(),
            port: 7000,
            keys: [String::new(), String::new()],
            pairings: Vec::new(),
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["deviceId"], "AA:BB:CC:DD:EE:FF");
        assert_eq!(json["config"], 3);
        assert_eq!(json["setup"], "031-45-154");
    }
}
