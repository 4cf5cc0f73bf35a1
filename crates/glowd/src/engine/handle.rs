use tokio::sync::mpsc;
use tokio::sync::oneshot;

use super::message::EngineInfo;
use super::message::LightStatus;
use super::message::Request;
use super::preset::Preset;
use super::scores::Alert;
use super::state::LightState;
use super::state::Rgb;
use crate::error::ControlError;

/// Capacity of the API→engine request queue
pub const REQUEST_CHANNEL_SIZE: usize = 64;

/// Cloneable client for the engine task
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<Request>,
}

impl EngineHandle {
    pub(super) fn new(tx: mpsc::Sender<Request>) -> Self {
        Self { tx }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Request,
    ) -> Result<T, ControlError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| ControlError::EngineStopped)?;
        rx.await.map_err(|_| ControlError::EngineStopped)
    }

    pub async fn list_lights(&self) -> Result<Vec<LightStatus>, ControlError> {
        self.request(|reply| Request::ListLights { reply }).await
    }

    pub async fn set_brightness(
        &self,
        light: &str,
        brightness: u8,
    ) -> Result<LightState, ControlError> {
        self.request(|reply| Request::SetBrightness {
            light: light.to_string(),
            brightness,
            reply,
        })
        .await?
    }

    pub async fn set_color(&self, light: &str, color: Rgb) -> Result<LightState, ControlError> {
        self.request(|reply| Request::SetColor {
            light: light.to_string(),
            color,
            reply,
        })
        .await?
    }

    pub async fn list_presets(&self) -> Result<Vec<Preset>, ControlError> {
        self.request(|reply| Request::ListPresets { reply }).await
    }

    pub async fn apply_preset(&self, preset: &str) -> Result<(), ControlError> {
        self.request(|reply| Request::ApplyPreset {
            preset: preset.to_string(),
            reply,
        })
        .await?
    }

    /// Store a score alert; returns its id
    pub async fn score_update(&self, alert: Alert) -> Result<u64, ControlError> {
        self.request(|reply| Request::ScoreUpdate { alert, reply })
            .await
    }

    pub async fn alerts_since(&self, since: u64) -> Result<Vec<Alert>, ControlError> {
        self.request(|reply| Request::AlertsSince { since, reply })
            .await
    }

    pub async fn test_alert(&self) -> Result<u64, ControlError> {
        self.request(|reply| Request::TestAlert { reply }).await
    }

    pub async fn info(&self) -> Result<EngineInfo, ControlError> {
        self.request(|reply| Request::Info { reply }).await
    }
}
