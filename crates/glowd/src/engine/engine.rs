use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::handle::EngineHandle;
use super::handle::REQUEST_CHANNEL_SIZE;
use super::message::EngineInfo;
use super::message::LightStatus;
use super::message::Request;
use super::preset::Preset;
use super::preset::PresetTable;
use super::preset::PresetTarget;
use super::scores;
use super::scores::Alert;
use super::scores::ScoreBoard;
use super::state::LightState;
use super::state::Rgb;
use super::state::StateStore;
use super::state::MAX_BRIGHTNESS;
use crate::adapters::Adapters;
use crate::config::Config;
use crate::config::ControlConfig;
use crate::config::ScoresConfig;
use crate::error::ControlError;
use crate::error::VendorError;
use crate::registry::Capability;
use crate::registry::Light;
use crate::registry::Registry;

/// glowd engine
///
/// Owns everything mutable: the status cache and the score board, plus the
/// adapters that reach the actual lights. It runs as a single task and
/// handles one request to completion before taking the next, so none of its
/// state needs locking.
pub struct Engine {
    registry: Registry,
    presets: PresetTable,
    adapters: Adapters,
    store: StateStore,
    scoreboard: ScoreBoard,

    /// (home, away) lights for score sync
    score_lights: Option<(String, String)>,

    vendor_timeout: Duration,
}

/// Run a vendor call, giving up after `limit`
async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, VendorError>>,
) -> Result<T, VendorError> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| VendorError::Timeout(limit))?
}

impl Engine {
    pub fn new(
        registry: Registry,
        presets: PresetTable,
        adapters: Adapters,
        control: &ControlConfig,
        scores: &ScoresConfig,
    ) -> Self {
        Self {
            registry,
            presets,
            adapters,
            store: StateStore::new(control.status_ttl),
            scoreboard: ScoreBoard::new(),
            score_lights: scores
                .lights()
                .map(|(home, away)| (home.to_string(), away.to_string())),
            vendor_timeout: control.vendor_timeout,
        }
    }

    /// Build the engine and its adapters from validated configuration
    pub fn from_config(config: &Config) -> Self {
        let registry = Registry::new(config.lights.clone());
        let presets = PresetTable::new(config.presets.clone(), &registry);
        let adapters = Adapters::from_config(config);
        info!(
            "Engine ready: {} light(s), {} preset(s), {} adapter(s)",
            registry.len(),
            presets.len(),
            adapters.len()
        );
        Self::new(registry, presets, adapters, &config.control, &config.scores)
    }

    /// Start the engine task
    pub fn spawn(self) -> (EngineHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(REQUEST_CHANNEL_SIZE);
        let task = tokio::spawn(self.run(rx));
        (EngineHandle::new(tx), task)
    }

    /// Handle requests until every handle has been dropped
    pub async fn run(mut self, mut rx: mpsc::Receiver<Request>) {
        info!("Engine starting");
        while let Some(request) = rx.recv().await {
            self.handle(request).await;
        }
        info!("Engine shutting down");
    }

    async fn handle(&mut self, request: Request) {
        // A dropped reply receiver means the client went away; nothing to do
        match request {
            Request::ListLights { reply } => {
                let _ = reply.send(self.list_lights().await);
            }
            Request::SetBrightness {
                light,
                brightness,
                reply,
            } => {
                let _ = reply.send(self.set_brightness(&light, brightness).await);
            }
            Request::SetColor {
                light,
                color,
                reply,
            } => {
                let _ = reply.send(self.set_color(&light, color).await);
            }
            Request::ListPresets { reply } => {
                let _ = reply.send(self.list_presets());
            }
            Request::ApplyPreset { preset, reply } => {
                let _ = reply.send(self.apply_preset(&preset).await);
            }
            Request::ScoreUpdate { alert, reply } => {
                let _ = reply.send(self.score_update(alert).await);
            }
            Request::AlertsSince { since, reply } => {
                let _ = reply.send(self.alerts_since(since));
            }
            Request::TestAlert { reply } => {
                let _ = reply.send(self.test_alert());
            }
            Request::Info { reply } => {
                let _ = reply.send(EngineInfo {
                    lights: self.registry.len(),
                    presets: self.presets.len(),
                });
            }
        }
    }

    /// Status of every light, in configuration order
    ///
    /// Fresh cache entries are served as is; everything else is queried. A
    /// light that cannot be queried is reported off with an error.
    pub async fn list_lights(&mut self) -> Vec<LightStatus> {
        let mut statuses = Vec::with_capacity(self.registry.len());
        for light in self.registry.iter() {
            let state = match self.store.get(&light.id) {
                Some(state) => Ok(state),
                None => match self.adapters.get(light.vendor()) {
                    Ok(adapter) => bounded(self.vendor_timeout, adapter.status(light)).await,
                    Err(e) => Err(e),
                },
            };

            let status = match state {
                Ok(state) => {
                    self.store.record(&light.id, state);
                    status(light, state, None)
                }
                Err(e) => {
                    warn!("Status query for '{}' failed: {}", light.id, e);
                    status(light, LightState::off(), Some(e.to_string()))
                }
            };
            statuses.push(status);
        }
        statuses
    }

    pub async fn set_brightness(
        &mut self,
        light_id: &str,
        brightness: u8,
    ) -> Result<LightState, ControlError> {
        let light = self.registry.lookup(light_id)?;
        let brightness = brightness.min(MAX_BRIGHTNESS);

        let result = match self.adapters.get(light.vendor()) {
            Ok(adapter) => {
                bounded(self.vendor_timeout, adapter.set_brightness(light, brightness)).await
            }
            Err(e) => Err(e),
        };
        self.settle(light_id, result, LightState::dimmed(brightness))
    }

    /// Set a colour; the level follows the colour's HSV value
    pub async fn set_color(&mut self, light_id: &str, color: Rgb) -> Result<LightState, ControlError> {
        let light = self.registry.lookup(light_id)?;
        if !light.supports(Capability::Color) {
            return Err(ControlError::UnsupportedCapability {
                light: light_id.to_string(),
                capability: Capability::Color,
            });
        }

        let result = match self.adapters.get(light.vendor()) {
            Ok(adapter) => bounded(self.vendor_timeout, adapter.set_color(light, color, None)).await,
            Err(e) => Err(e),
        };
        let brightness = (color.to_hsv().2 * 100.0).round() as u8;
        self.settle(
            light_id,
            result,
            LightState {
                brightness,
                color: Some(color.at_full_value()),
            },
        )
    }

    /// Record the outcome of a command in the status cache
    fn settle(
        &mut self,
        light_id: &str,
        result: Result<(), VendorError>,
        state: LightState,
    ) -> Result<LightState, ControlError> {
        match result {
            Ok(()) => {
                info!(
                    "Light '{}' set to {}%{}",
                    light_id,
                    state.brightness,
                    state
                        .color
                        .map(|c| format!(" ({}, {}, {})", c.r, c.g, c.b))
                        .unwrap_or_default()
                );
                self.store.record(light_id, state);
                Ok(state)
            }
            Err(e) => {
                warn!("Command for '{}' failed: {}", light_id, e);
                self.store.invalidate(light_id);
                Err(ControlError::vendor(light_id, e))
            }
        }
    }

    pub fn list_presets(&self) -> Vec<Preset> {
        self.presets.iter().cloned().collect()
    }

    /// Apply a preset, one adapter call per target in preset order
    ///
    /// Targets that fail are collected; the rest are still applied and
    /// nothing is rolled back.
    pub async fn apply_preset(&mut self, preset_id: &str) -> Result<(), ControlError> {
        let preset = self.presets.lookup(preset_id)?.clone();
        info!("Applying preset '{}'", preset.id);

        let mut failures = Vec::new();
        for target in &preset.targets {
            if let Err(e) = self.apply_target(target).await {
                failures.push((target.light.clone(), e));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ControlError::PartialFailure {
                preset: preset.id,
                failures,
            })
        }
    }

    async fn apply_target(&mut self, target: &PresetTarget) -> Result<LightState, ControlError> {
        let light = self.registry.lookup(&target.light)?;
        let LightState { brightness, color } = target.state;
        // A colour at brightness 0 is just off
        let color = color.filter(|_| brightness > 0);
        let state = LightState {
            brightness,
            color: color.map(Rgb::at_full_value),
        };

        let result = match (self.adapters.get(light.vendor()), color) {
            (Err(e), _) => Err(e),
            (Ok(adapter), Some(color)) => {
                bounded(
                    self.vendor_timeout,
                    adapter.set_color(light, color, Some(brightness)),
                )
                .await
            }
            (Ok(adapter), None) => {
                bounded(self.vendor_timeout, adapter.set_brightness(light, brightness)).await
            }
        };
        self.settle(&target.light, result, state)
    }

    /// Store a score alert and, during a single live game, mirror the score
    /// on the configured lights
    pub async fn score_update(&mut self, alert: Alert) -> u64 {
        let summary = scores::summary(&alert);
        let home = scores::score(&alert, "home_score");
        let away = scores::score(&alert, "away_score");
        let is_final = scores::is_final(&alert);

        let alert_id = self.scoreboard.record(alert);
        info!("Alert #{} {}", alert_id, summary);

        if is_final {
            return alert_id;
        }
        let live_games = self.scoreboard.live_games();
        if live_games != 1 {
            debug!("Score sync skipped: {} live games", live_games);
            return alert_id;
        }
        let Some((home_light, away_light)) = self.score_lights.clone() else {
            return alert_id;
        };

        let (home_level, away_level) = scores::score_brightness(home, away);
        for (light, level) in [(&home_light, home_level), (&away_light, away_level)] {
            if let Err(e) = self.set_brightness(light, level).await {
                warn!("Score sync for '{}' failed: {}", light, e);
            }
        }
        info!(
            "Score sync: {}={}%, {}={}% (delta={})",
            home_light,
            home_level,
            away_light,
            away_level,
            home.saturating_sub(away)
        );

        alert_id
    }

    pub fn alerts_since(&self, since: u64) -> Vec<Alert> {
        self.scoreboard.since(since)
    }

    pub fn test_alert(&mut self) -> u64 {
        let alert_id = self.scoreboard.test_alert();
        info!("Test alert #{} UNC 70 @ DUKE 72", alert_id);
        alert_id
    }
}

fn status(light: &Light, state: LightState, error: Option<String>) -> LightStatus {
    LightStatus {
        id: light.id.clone(),
        name: light.name.clone(),
        vendor: light.vendor(),
        capabilities: light.capabilities.clone(),
        on: state.on(),
        brightness: state.brightness,
        color: state.color.filter(|_| light.supports(Capability::Color)),
        error,
    }
}
