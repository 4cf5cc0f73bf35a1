//! Requests handled by the engine task
//!
//! Each request carries a oneshot sender for its reply. The engine handles
//! requests strictly one at a time.

use serde::Serialize;
use tokio::sync::oneshot;

use super::preset::Preset;
use super::scores::Alert;
use super::state::LightState;
use super::state::Rgb;
use crate::error::ControlError;
use crate::registry::Capability;
use crate::registry::Vendor;

pub type Reply<T> = oneshot::Sender<T>;

pub enum Request {
    ListLights {
        reply: Reply<Vec<LightStatus>>,
    },
    SetBrightness {
        light: String,
        brightness: u8,
        reply: Reply<Result<LightState, ControlError>>,
    },
    SetColor {
        light: String,
        color: Rgb,
        reply: Reply<Result<LightState, ControlError>>,
    },
    ListPresets {
        reply: Reply<Vec<Preset>>,
    },
    ApplyPreset {
        preset: String,
        reply: Reply<Result<(), ControlError>>,
    },
    ScoreUpdate {
        alert: Alert,
        reply: Reply<u64>,
    },
    AlertsSince {
        since: u64,
        reply: Reply<Vec<Alert>>,
    },
    TestAlert {
        reply: Reply<u64>,
    },
    Info {
        reply: Reply<EngineInfo>,
    },
}

/// A light as reported by `GET /lights`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LightStatus {
    pub id: String,
    pub name: String,
    pub vendor: Vendor,
    pub capabilities: Vec<Capability>,
    pub on: bool,
    pub brightness: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<Rgb>,
    /// Why the live status could not be read
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Counts reported by `GET /info`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EngineInfo {
    pub lights: usize,
    pub presets: usize,
}
