use super::characteristic::{perms, Characteristic, Format, Value};
use super::Iid;

/// HAP short type UUIDs for the services and characteristics the crate
/// ships constructors for
pub mod types {
    /// Accessory Information service
    pub const ACCESSORY_INFORMATION: &str = "3E";
    /// Lightbulb service
    pub const LIGHTBULB: &str = "43";
    /// Switch service
    pub const SWITCH: &str = "49";

    /// Identify characteristic
    pub const IDENTIFY: &str = "14";
    /// Manufacturer characteristic
    pub const MANUFACTURER: &str = "20";
    /// Model characteristic
    pub const MODEL: &str = "21";
    /// Name characteristic
    pub const NAME: &str = "23";
    /// Serial Number characteristic
    pub const SERIAL_NUMBER: &str = "30";
    /// Firmware Revision characteristic
    pub const FIRMWARE_REVISION: &str = "52";
    /// On characteristic
    pub const ON: &str = "25";
    /// Brightness characteristic
    pub const BRIGHTNESS: &str = "8";
}

/// A service: identity descriptor plus characteristic slots
#[derive(Debug, Clone)]
pub struct Service {
    /// Instance id, assigned when the accessory joins a database
    pub iid: Iid,
    /// Short-form HAP type UUID
    pub type_id: String,
    /// Whether this is the accessory's primary service
    pub primary: bool,
    /// Whether the service is hidden from users
    pub hidden: bool,
    /// Characteristic slots
    pub characteristics: Vec<Characteristic>,
}

impl Service {
    /// Create an empty service of the given type
    #[must_use]
    pub fn new(type_id: &str) -> Self {
        Self {
            iid: 0,
            type_id: type_id.to_string(),
            primary: false,
            hidden: false,
            characteristics: Vec::new(),
        }
    }

    /// Mark as the primary service
    #[must_use]
    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    /// Append a characteristic slot
    #[must_use]
    pub fn with_characteristic(mut self, characteristic: Characteristic) -> Self {
        self.characteristics.push(characteristic);
        self
    }

    /// The mandatory Accessory Information service
    #[must_use]
    pub fn accessory_information(
        name: &str,
        manufacturer: &str,
        model: &str,
        serial_number: &str,
        firmware_revision: &str,
    ) -> Self {
        let read_only = |type_id: &str, value: &str| {
            Characteristic::new(
                type_id,
                Format::Str,
                perms::PAIRED_READ,
                Value::Str(value.to_string()),
            )
        };

        Self::new(types::ACCESSORY_INFORMATION)
            .with_characteristic(Characteristic::new(
                types::IDENTIFY,
                Format::Bool,
                perms::PAIRED_WRITE,
                Value::Bool(false),
            ))
            .with_characteristic(read_only(types::MANUFACTURER, manufacturer))
            .with_characteristic(read_only(types::MODEL, model))
            .with_characteristic(read_only(types::NAME, name))
            .with_characteristic(read_only(types::SERIAL_NUMBER, serial_number))
            .with_characteristic(read_only(types::FIRMWARE_REVISION, firmware_revision))
    }

    /// A lightbulb with an On characteristic
    #[must_use]
    pub fn lightbulb(name: &str) -> Self {
        Self::new(types::LIGHTBULB)
            .with_characteristic(Characteristic::new(
                types::ON,
                Format::Bool,
                perms::PAIRED_READ | perms::PAIRED_WRITE | perms::EVENTS,
                Value::Bool(false),
            ))
            .with_characteristic(Characteristic::new(
                types::NAME,
                Format::Str,
                perms::PAIRED_READ,
                Value::Str(name.to_string()),
            ))
    }

    /// The Brightness characteristic, for dimmable lightbulbs
    #[must_use]
    pub fn brightness() -> Characteristic {
        Characteristic::new(
            types::BRIGHTNESS,
            Format::Int,
            perms::PAIRED_READ | perms::PAIRED_WRITE | perms::EVENTS,
            Value::Int(100),
        )
        .with_range(0.0, 100.0, 1.0)
        .with_unit("percentage")
    }
}
