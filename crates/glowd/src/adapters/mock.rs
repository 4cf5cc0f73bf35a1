use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;

use super::Adapter;
use crate::engine::LightState;
use crate::engine::Rgb;
use crate::error::VendorError;
use crate::registry::Light;
use crate::registry::Vendor;

/// A call received by [`MockAdapter`]
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    SetBrightness {
        light: String,
        brightness: u8,
    },
    SetColor {
        light: String,
        color: Rgb,
        brightness: Option<u8>,
    },
    Status {
        light: String,
    },
}

/// Mock adapter for testing
///
/// Records every call and keeps an in-memory "device" state per light.
/// Clones share their recordings, so a test can keep one clone after handing
/// another to the engine.
#[derive(Debug, Clone)]
pub struct MockAdapter {
    vendor: Vendor,
    pub calls: Arc<Mutex<Vec<Call>>>,
    pub devices: Arc<Mutex<HashMap<String, LightState>>>,
    pub failing: Arc<Mutex<HashSet<String>>>,
}

impl MockAdapter {
    pub fn new(vendor: Vendor) -> Self {
        Self {
            vendor,
            calls: Arc::default(),
            devices: Arc::default(),
            failing: Arc::default(),
        }
    }

    /// Make every call for `light_id` fail with an I/O error
    pub fn fail(&self, light_id: &str) {
        self.failing.lock().unwrap().insert(light_id.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls that change device state
    pub fn commands(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, Call::Status { .. }))
            .collect()
    }

    pub fn device(&self, light_id: &str) -> Option<LightState> {
        self.devices.lock().unwrap().get(light_id).copied()
    }

    fn record(&self, call: Call, light_id: &str) -> Result<(), VendorError> {
        self.calls.lock().unwrap().push(call);
        if self.failing.lock().unwrap().contains(light_id) {
            return Err(VendorError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("{} unreachable", light_id),
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Adapter for MockAdapter {
    fn vendor(&self) -> Vendor {
        self.vendor
    }

    async fn set_brightness(&self, light: &Light, brightness: u8) -> Result<(), VendorError> {
        self.record(
            Call::SetBrightness {
                light: light.id.clone(),
                brightness,
            },
            &light.id,
        )?;
        self.devices
            .lock()
            .unwrap()
            .insert(light.id.clone(), LightState::dimmed(brightness));
        Ok(())
    }

    async fn set_color(
        &self,
        light: &Light,
        color: Rgb,
        brightness: Option<u8>,
    ) -> Result<(), VendorError> {
        self.record(
            Call::SetColor {
                light: light.id.clone(),
                color,
                brightness,
            },
            &light.id,
        )?;
        if self.vendor == Vendor::Caseta {
            return Err(VendorError::Unsupported(
                crate::registry::Capability::Color,
                Vendor::Caseta,
            ));
        }

        let brightness = brightness.unwrap_or_else(|| {
            let (_, _, value) = color.to_hsv();
            (value * 100.0).round() as u8
        });
        self.devices.lock().unwrap().insert(
            light.id.clone(),
            LightState {
                brightness,
                color: Some(color),
            },
        );
        Ok(())
    }

    async fn status(&self, light: &Light) -> Result<LightState, VendorError> {
        self.record(
            Call::Status {
                light: light.id.clone(),
            },
            &light.id,
        )?;
        Ok(self.device(&light.id).unwrap_or_default())
    }
}
