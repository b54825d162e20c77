//! Bonjour advertisement data
//!
//! The core does not speak mDNS; it only produces the `_hap._tcp` TXT
//! record fields for an external advertiser, and the configuration update
//! callback tells that advertiser when to re-register.

use crate::config::{feature_flags, AccessoryConfig};

/// Build the HAP TXT record key/value pairs for an advertiser
#[must_use]
pub fn txt_records(config: &AccessoryConfig) -> Vec<(String, String)> {
    vec![
        ("c#".to_string(), config.config_number.to_string()),
        (
            "ff".to_string(),
            feature_flags::SUPPORTS_HAP_PAIRING.to_string(),
        ),
        ("id".to_string(), config.device_id.clone()),
        ("md".to_string(), config.model.clone()),
        ("pv".to_string(), "1.0".to_string()),
        ("s#".to_string(), "1".to_string()),
        ("sf".to_string(), config.status_flags.to_string()),
        ("ci".to_string(), config.category_id.to_string()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::status_flags;

    #[test]
    fn test_txt_record_fields() {
        let mut config = AccessoryConfig::builder("Bridge")
            .model("TestModel")
            .category(5)
            .build();
        config.config_number = 7;
        config.status_flags = status_flags::NOT_PAIRED;

        let txt = txt_records(&config);
        let get = |key: &str| {
            txt.iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
                .unwrap()
        };

        assert_eq!(get("c#"), "7");
        assert_eq!(get("ff"), "1");
        assert_eq!(get("md"), "TestModel");
        assert_eq!(get("pv"), "1.0");
        assert_eq!(get("s#"), "1");
        assert_eq!(get("sf"), "1");
        assert_eq!(get("ci"), "5");
        assert_eq!(get("id"), config.device_id);
    }
}
