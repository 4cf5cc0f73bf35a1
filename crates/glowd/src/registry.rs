//! Device registry
//!
//! Static mapping from light identifier to vendor, connection parameters and
//! capabilities. Built once from configuration and never mutated afterwards.

use std::collections::HashMap;

use serde::Deserialize;
use serde::Serialize;

use crate::error::ControlError;

/// Lighting ecosystem a light is controlled through.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Vendor {
    /// Lutron Caseta, reached through the Smart Bridge
    Caseta,
    /// Tuya / Smart Life, reached directly over the LAN
    Tuya,
}

/// Something a light can do.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Capability {
    Brightness,
    Color,
}

/// Which set of data points a Tuya bulb exposes.
///
/// Older firmware uses DPS 1-5 with 8-bit brightness, newer firmware DPS
/// 20-24 with brightness and HSV components scaled to 0-1000.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DpsLayout {
    A,
    #[default]
    B,
}

/// Vendor specific connection parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum Connection {
    Caseta { zone: u32 },
    Tuya(TuyaConnection),
}

#[derive(Clone, PartialEq)]
pub struct TuyaConnection {
    pub device_id: String,
    /// 16 byte AES key negotiated when the device was paired
    pub local_key: String,
    /// Device IP address or host name
    pub address: String,
    pub layout: DpsLayout,
}

impl std::fmt::Debug for TuyaConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TuyaConnection")
            .field("device_id", &self.device_id)
            .field("local_key", &"<redacted>")
            .field("address", &self.address)
            .field("layout", &self.layout)
            .finish()
    }
}

/// A light known to the daemon.
#[derive(Debug, Clone, PartialEq)]
pub struct Light {
    pub id: String,
    pub name: String,
    pub connection: Connection,
    pub capabilities: Vec<Capability>,
}

impl Light {
    pub fn vendor(&self) -> Vendor {
        match self.connection {
            Connection::Caseta { .. } => Vendor::Caseta,
            Connection::Tuya(_) => Vendor::Tuya,
        }
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Lookup table of all configured lights, in configuration order.
#[derive(Debug, Default)]
pub struct Registry {
    lights: Vec<Light>,
    index: HashMap<String, usize>,
}

impl Registry {
    /// Build a registry. Later duplicates of an id are ignored; config
    /// validation rejects them before we get here.
    pub fn new(lights: Vec<Light>) -> Self {
        let mut index = HashMap::with_capacity(lights.len());
        let mut unique = Vec::with_capacity(lights.len());
        for light in lights {
            if index.contains_key(&light.id) {
                continue;
            }
            index.insert(light.id.clone(), unique.len());
            unique.push(light);
        }

        Self {
            lights: unique,
            index,
        }
    }

    pub fn lookup(&self, id: &str) -> Result<&Light, ControlError> {
        self.index
            .get(id)
            .map(|&i| &self.lights[i])
            .ok_or_else(|| ControlError::LightNotFound(id.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Light> {
        self.lights.iter()
    }

    pub fn len(&self) -> usize {
        self.lights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lights.is_empty()
    }

    /// True if any light is controlled through `vendor`
    pub fn uses(&self, vendor: Vendor) -> bool {
        self.lights.iter().any(|l| l.vendor() == vendor)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn dimmer(id: &str, zone: u32) -> Light {
        Light {
            id: id.to_string(),
            name: format!("Dimmer {}", id),
            connection: Connection::Caseta { zone },
            capabilities: vec![Capability::Brightness],
        }
    }

    pub(crate) fn bulb(id: &str) -> Light {
        Light {
            id: id.to_string(),
            name: format!("Bulb {}", id),
            connection: Connection::Tuya(TuyaConnection {
                device_id: format!("{}_device", id),
                local_key: "0123456789abcdef".to_string(),
                address: "192.0.2.10".to_string(),
                layout: DpsLayout::B,
            }),
            capabilities: vec![Capability::Brightness, Capability::Color],
        }
    }

    #[test]
    fn test_lookup() {
        let registry = Registry::new(vec![dimmer("parlor", 5), bulb("kitchen_left")]);

        let light = registry.lookup("kitchen_left").unwrap();
        assert_eq!(light.vendor(), Vendor::Tuya);
        assert!(light.supports(Capability::Color));

        assert!(matches!(
            registry.lookup("porch"),
            Err(ControlError::LightNotFound(id)) if id == "porch"
        ));
    }

    #[test]
    fn test_preserves_configuration_order() {
        let registry = Registry::new(vec![
            dimmer("parlor", 5),
            dimmer("octagon", 4),
            bulb("kitchen_left"),
            dimmer("parlor", 9),
        ]);

        let ids: Vec<_> = registry.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, ["parlor", "octagon", "kitchen_left"]);
        assert_eq!(
            registry.lookup("parlor").unwrap().connection,
            Connection::Caseta { zone: 5 }
        );
        assert!(registry.uses(Vendor::Caseta));
    }

    #[test]
    fn test_local_key_not_in_debug_output() {
        let light = bulb("kitchen_left");
        let rendered = format!("{:?}", light);
        assert!(!rendered.contains("0123456789abcdef"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_vendor_names() {
        assert_eq!(Vendor::Caseta.to_string(), "caseta");
        assert_eq!("tuya".parse::<Vendor>().unwrap(), Vendor::Tuya);
        assert_eq!(Capability::Color.as_ref(), "color");
    }
}
