//! Vendor adapters
//!
//! Each adapter translates uniform brightness/colour commands into calls on one
//! vendor's local protocol. Adapters are stateless from the engine's point of
//! view: the device is the source of truth and every call is one round-trip.

#[cfg(feature = "vendor_caseta")]
mod caseta;
#[cfg(test)]
pub(crate) mod mock;
#[cfg(feature = "vendor_tuya")]
mod tuya;

use std::collections::HashMap;

use async_trait::async_trait;
use linkme::distributed_slice;
use tracing::error;
use tracing::info;

use crate::config::Config;
use crate::engine::LightState;
use crate::engine::Rgb;
use crate::error::VendorError;
use crate::registry::Light;
use crate::registry::Vendor;

/// Result type for adapter factory functions
pub type AdapterFactoryResult = anyhow::Result<Option<Box<dyn Adapter>>>;

pub struct AdapterContext<'a> {
    pub config: &'a Config,
}

/// Factories for every adapter compiled into the binary. A factory returns
/// `Ok(None)` when no configured light needs it.
#[distributed_slice]
pub static REGISTRY: [fn(&AdapterContext) -> AdapterFactoryResult];

/// Adapter trait that every vendor implements
#[async_trait]
pub trait Adapter: Send + Sync {
    /// The vendor whose lights this adapter drives
    fn vendor(&self) -> Vendor;

    /// Set brightness as a percentage; 0 switches the light off
    async fn set_brightness(&self, light: &Light, brightness: u8) -> Result<(), VendorError>;

    /// Set colour, optionally together with a brightness percentage
    ///
    /// Without a brightness the level follows the colour's HSV value.
    async fn set_color(
        &self,
        light: &Light,
        color: Rgb,
        brightness: Option<u8>,
    ) -> Result<(), VendorError>;

    /// Query the live state of a light
    async fn status(&self, light: &Light) -> Result<LightState, VendorError>;
}

/// The adapters available to the engine, keyed by vendor.
#[derive(Default)]
pub struct Adapters {
    by_vendor: HashMap<Vendor, Box<dyn Adapter>>,
}

impl Adapters {
    /// Instantiate every registered adapter the configuration needs
    pub fn from_config(config: &Config) -> Self {
        let ctx = AdapterContext { config };
        let mut adapters = Self::default();
        for factory in REGISTRY {
            match factory(&ctx) {
                Ok(Some(adapter)) => {
                    info!("Adapter ready: {}", adapter.vendor());
                    adapters.insert(adapter);
                }
                Ok(None) => continue,
                Err(e) => error!("failed to set up adapter: {:#}", e),
            }
        }
        adapters
    }

    pub fn insert(&mut self, adapter: Box<dyn Adapter>) {
        self.by_vendor.insert(adapter.vendor(), adapter);
    }

    pub fn get(&self, vendor: Vendor) -> Result<&dyn Adapter, VendorError> {
        self.by_vendor
            .get(&vendor)
            .map(|a| &**a)
            .ok_or(VendorError::NoAdapter(vendor))
    }

    pub fn len(&self) -> usize {
        self.by_vendor.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_vendor.is_empty()
    }
}
