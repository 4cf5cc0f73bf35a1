use std::time::Duration;

use crate::registry::Capability;
use crate::registry::Vendor;

/// Failure reaching or talking to a vendor bridge or device.
#[derive(Debug, thiserror::Error)]
pub enum VendorError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("{0} is not supported by {1} lights")]
    Unsupported(Capability, Vendor),

    #[error("no adapter available for {0} lights")]
    NoAdapter(Vendor),
}

/// Errors surfaced by light, preset and score operations.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("Unknown light: {0}")]
    LightNotFound(String),

    #[error("Unknown preset: {0}")]
    PresetNotFound(String),

    #[error("Light '{light}' does not support {capability}")]
    UnsupportedCapability {
        light: String,
        capability: Capability,
    },

    #[error("Light '{light}': {source}")]
    Vendor {
        light: String,
        #[source]
        source: VendorError,
    },

    #[error("Preset '{preset}' failed on {} light(s)", failures.len())]
    PartialFailure {
        preset: String,
        failures: Vec<(String, ControlError)>,
    },

    #[error("Engine is not running")]
    EngineStopped,
}

impl ControlError {
    /// Short machine readable name, used in API error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            ControlError::LightNotFound(_) | ControlError::PresetNotFound(_) => "not_found",
            ControlError::UnsupportedCapability { .. } => "unsupported_capability",
            ControlError::Vendor { .. } => "vendor_error",
            ControlError::PartialFailure { .. } => "partial_failure",
            ControlError::EngineStopped => "unavailable",
        }
    }

    pub(crate) fn vendor(light: &str, source: VendorError) -> Self {
        match source {
            VendorError::Unsupported(capability, _) => ControlError::UnsupportedCapability {
                light: light.to_string(),
                capability,
            },
            source => ControlError::Vendor {
                light: light.to_string(),
                source,
            },
        }
    }
}
