use std::collections::HashMap;
use std::collections::HashSet;
use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use toml::Spanned;
use tracing_subscriber::filter::LevelFilter;

use super::diagnostics::Diagnostic;
use super::diagnostics::Diagnostics;
use super::diagnostics::Error;
use super::diagnostics::LoadError;
use super::diagnostics::SourceInfo;
use super::diagnostics::ValidationError;
use super::diagnostics::Warning;
use super::partial::PartialCasetaConfig;
use super::partial::PartialConfig;
use super::partial::PartialLight;
use super::partial::PartialPreset;
use crate::engine::LightState;
use crate::engine::Preset;
use crate::engine::PresetTarget;
use crate::engine::MAX_BRIGHTNESS;
use crate::engine::OFF_PRESET;
use crate::registry::Capability;
use crate::registry::Connection;
use crate::registry::Light;
use crate::registry::TuyaConnection;
use crate::registry::Vendor;

#[derive(Debug, Default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub server: ServerConfig,
    pub control: ControlConfig,
    pub caseta: Option<CasetaConfig>,
    pub location: Option<Location>,
    pub weather: WeatherConfig,
    pub scores: ScoresConfig,
    pub display: DisplayConfig,

    /// Lights in configuration order
    pub lights: Vec<Light>,

    /// Presets in configuration order, without the synthesized `off`
    pub presets: Vec<Preset>,
}

// LogLevel needs Deserialize because it's used in PartialLoggingConfig with toml::Spanned
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Default)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: LogLevel,

    /// Per-target levels, e.g. `"glowd::adapters" = "debug"`
    pub overrides: HashMap<String, LogLevel>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerConfig {
    pub listen: IpAddr,
    pub port: u16,
}

impl ServerConfig {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 5000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlConfig {
    /// Upper bound on a single vendor round-trip
    pub vendor_timeout: Duration,

    /// How long a queried light status is served from cache
    pub status_ttl: Duration,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            vendor_timeout: Duration::from_millis(3000),
            status_ttl: Duration::from_secs(5),
        }
    }
}

/// Lutron Smart Bridge connection
#[derive(Debug, Clone, PartialEq)]
pub struct CasetaConfig {
    pub host: String,
    pub port: u16,
    /// Client certificate (PEM) issued by the bridge during pairing
    pub cert: PathBuf,
    /// Client private key (PEM)
    pub key: PathBuf,
    /// Bridge CA certificate (PEM)
    pub ca: PathBuf,
}

pub const DEFAULT_CASETA_PORT: u16 = 8081;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Location {
    /// Latitude in decimal degrees
    pub latitude: f64,

    /// Longitude in decimal degrees
    pub longitude: f64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnit {
    Celsius,
    #[default]
    Fahrenheit,
}

impl TemperatureUnit {
    pub fn as_str(self) -> &'static str {
        match self {
            TemperatureUnit::Celsius => "celsius",
            TemperatureUnit::Fahrenheit => "fahrenheit",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeatherConfig {
    pub enabled: bool,
    pub refresh: Duration,
    pub temperature_unit: TemperatureUnit,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            refresh: Duration::from_secs(900),
            temperature_unit: TemperatureUnit::default(),
        }
    }
}

/// Lights driven by the live score; sync is off unless both are set
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScoresConfig {
    pub home_light: Option<String>,
    pub away_light: Option<String>,
}

impl ScoresConfig {
    pub fn lights(&self) -> Option<(&str, &str)> {
        Some((self.home_light.as_deref()?, self.away_light.as_deref()?))
    }
}

/// Commands (argv) that switch the attached display on and off
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DisplayConfig {
    pub on_command: Option<Vec<String>>,
    pub off_command: Option<Vec<String>>,
}

/// Configuration could not be loaded
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("{0}")]
    Invalid(Diagnostics),
}

/// Collects validation errors while converting partial configs
struct Validator<'a> {
    origins: &'a HashMap<String, SourceInfo>,
    errors: Vec<ValidationError>,
}

impl Validator<'_> {
    fn error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    /// Error located at a top-level field recorded during merge
    fn field_error<T>(&mut self, path: &str, value: &Spanned<T>, message: impl Into<String>) {
        let error = ValidationError::new(path, message).at(value.span(), self.origins.get(path));
        self.errors.push(error);
    }
}

impl Config {
    /// Load configuration from one or more TOML files
    ///
    /// Imports are resolved, files merged first-wins, and the result
    /// validated. All merge and validation problems are collected before
    /// failing. On success the returned diagnostics hold only warnings.
    pub fn from_files(paths: &[PathBuf]) -> Result<(Self, Diagnostics), ConfigError> {
        let configs = PartialConfig::load_with_imports(paths)?;
        let (partial, diagnostics) = PartialConfig::merge(configs);
        Self::from_partial(partial, diagnostics)
    }

    /// Convert a merged PartialConfig to a Config, validating all fields
    pub fn from_partial(
        partial: PartialConfig,
        mut diagnostics: Vec<Diagnostic>,
    ) -> Result<(Self, Diagnostics), ConfigError> {
        let mut v = Validator {
            origins: &partial.origins,
            errors: Vec::new(),
        };

        let logging = partial
            .logging
            .map(|logging| LoggingConfig {
                level: logging.level.map(Spanned::into_inner).unwrap_or_default(),
                overrides: logging
                    .overrides
                    .unwrap_or_default()
                    .into_iter()
                    .map(|(target, level)| (target, level.into_inner()))
                    .collect(),
            })
            .unwrap_or_default();

        let mut server = ServerConfig::default();
        if let Some(partial_server) = partial.server {
            if let Some(listen) = partial_server.listen {
                match listen.get_ref().parse() {
                    Ok(addr) => server.listen = addr,
                    Err(_) => v.field_error(
                        "server.listen",
                        &listen,
                        format!("'{}' is not an IP address", listen.get_ref()),
                    ),
                }
            }
            if let Some(port) = partial_server.port {
                server.port = port.into_inner();
            }
        }

        let mut control = ControlConfig::default();
        if let Some(partial_control) = partial.control {
            if let Some(timeout) = partial_control.vendor_timeout_ms {
                if *timeout.get_ref() == 0 {
                    v.field_error(
                        "control.vendor_timeout_ms",
                        &timeout,
                        "timeout must be greater than zero",
                    );
                }
                control.vendor_timeout = Duration::from_millis(timeout.into_inner());
            }
            if let Some(ttl) = partial_control.status_ttl_secs {
                control.status_ttl = Duration::from_secs(ttl.into_inner());
            }
        }

        let caseta = partial
            .caseta
            .and_then(|caseta| Self::validate_caseta(caseta, &mut v));

        let location = partial.location.and_then(|location| {
            match (location.latitude, location.longitude) {
                (Some(latitude), Some(longitude)) => {
                    if !(-90.0..=90.0).contains(latitude.get_ref()) {
                        v.field_error(
                            "location.latitude",
                            &latitude,
                            "latitude must be between -90 and 90",
                        );
                    }
                    if !(-180.0..=180.0).contains(longitude.get_ref()) {
                        v.field_error(
                            "location.longitude",
                            &longitude,
                            "longitude must be between -180 and 180",
                        );
                    }
                    Some(Location {
                        latitude: latitude.into_inner(),
                        longitude: longitude.into_inner(),
                    })
                }
                _ => {
                    v.error(ValidationError::new(
                        "location",
                        "both latitude and longitude are required",
                    ));
                    None
                }
            }
        });

        let mut weather = WeatherConfig::default();
        if let Some(partial_weather) = partial.weather {
            if let Some(enabled) = partial_weather.enabled {
                weather.enabled = enabled.into_inner();
            }
            if let Some(refresh) = partial_weather.refresh_secs {
                weather.refresh = Duration::from_secs(refresh.into_inner());
            }
            if let Some(unit) = partial_weather.temperature_unit {
                weather.temperature_unit = unit.into_inner();
            }
        }

        let mut display = DisplayConfig::default();
        if let Some(partial_display) = partial.display {
            for (path, command, slot) in [
                (
                    "display.on_command",
                    partial_display.on_command,
                    &mut display.on_command,
                ),
                (
                    "display.off_command",
                    partial_display.off_command,
                    &mut display.off_command,
                ),
            ] {
                let Some(command) = command else { continue };
                if command.get_ref().is_empty() {
                    v.field_error(path, &command, "command must not be empty");
                } else {
                    *slot = Some(command.into_inner());
                }
            }
        }

        let lights: Vec<Light> = partial
            .lights
            .into_iter()
            .filter_map(|light| Self::validate_light(light, caseta.is_some(), &mut v))
            .collect();
        let by_id: HashMap<&str, &Light> = lights.iter().map(|l| (l.id.as_str(), l)).collect();

        let mut scores = ScoresConfig::default();
        if let Some(partial_scores) = partial.scores {
            for (path, light, slot) in [
                (
                    "scores.home_light",
                    partial_scores.home_light,
                    &mut scores.home_light,
                ),
                (
                    "scores.away_light",
                    partial_scores.away_light,
                    &mut scores.away_light,
                ),
            ] {
                let Some(light) = light else { continue };
                if by_id.contains_key(light.get_ref().as_str()) {
                    *slot = Some(light.into_inner());
                } else {
                    let message = format!("unknown light '{}'", light.get_ref());
                    v.field_error(path, &light, message);
                }
            }
            if scores.home_light.is_some() != scores.away_light.is_some() {
                v.error(ValidationError::new(
                    "scores",
                    "score sync needs both home_light and away_light",
                ));
            }
        }

        let presets: Vec<Preset> = partial
            .presets
            .into_iter()
            .filter_map(|preset| Self::validate_preset(preset, &by_id, &mut v))
            .collect();

        if let Some(off) = presets.iter().find(|p| p.id == OFF_PRESET) {
            let targeted: HashSet<&str> = off
                .targets
                .iter()
                .filter(|t| t.state == LightState::off())
                .map(|t| t.light.as_str())
                .collect();
            let all_off = off.targets.iter().all(|t| t.state == LightState::off())
                && lights.iter().all(|l| targeted.contains(l.id.as_str()));
            if !all_off {
                v.error(ValidationError::new(
                    "presets.off",
                    "the 'off' preset must set every light to brightness 0",
                ));
            }
        }

        if lights.is_empty() {
            diagnostics.push(Diagnostic::Warning(Warning::NoLights));
        }

        diagnostics.extend(
            v.errors
                .into_iter()
                .map(|e| Diagnostic::Error(Error::Validation(e))),
        );
        let diagnostics = Diagnostics(diagnostics);
        if diagnostics.has_errors() {
            return Err(ConfigError::Invalid(diagnostics));
        }

        let config = Config {
            logging,
            server,
            control,
            caseta,
            location,
            weather,
            scores,
            display,
            lights,
            presets,
        };
        Ok((config, diagnostics))
    }

    fn validate_caseta(partial: PartialCasetaConfig, v: &mut Validator) -> Option<CasetaConfig> {
        let mut missing = Vec::new();
        if partial.host.is_none() {
            missing.push("host");
        }
        if partial.cert.is_none() {
            missing.push("cert");
        }
        if partial.key.is_none() {
            missing.push("key");
        }
        if partial.ca.is_none() {
            missing.push("ca");
        }
        if !missing.is_empty() {
            v.error(ValidationError::new(
                "caseta",
                format!("missing required field(s): {}", missing.join(", ")),
            ));
            return None;
        }

        Some(CasetaConfig {
            host: partial.host?.into_inner(),
            port: partial
                .port
                .map(Spanned::into_inner)
                .unwrap_or(DEFAULT_CASETA_PORT),
            cert: partial.cert?.into_inner(),
            key: partial.key?.into_inner(),
            ca: partial.ca?.into_inner(),
        })
    }

    /// Validate a partial light and convert it to a registry entry
    fn validate_light(partial: PartialLight, have_caseta: bool, v: &mut Validator) -> Option<Light> {
        let id = partial.id.get_ref().clone();
        let source = partial.source.as_ref();
        let errors_before = v.errors.len();
        let missing = |field: &str| {
            ValidationError::new(
                format!("lights.{}.{}", id, field),
                format!("{} lights need '{}'", partial.vendor.get_ref(), field),
            )
            .at(partial.id.span(), source)
        };

        let mut capabilities = vec![Capability::Brightness];
        if let Some(declared) = &partial.capabilities {
            capabilities.extend(declared.get_ref().iter().copied());
        }
        capabilities.sort();
        capabilities.dedup();

        let connection = match partial.vendor.get_ref() {
            Vendor::Caseta => {
                if !have_caseta {
                    v.error(
                        ValidationError::new(
                            format!("lights.{}.vendor", id),
                            "Caseta lights need a [caseta] bridge section",
                        )
                        .at(partial.vendor.span(), source),
                    );
                }
                if capabilities.contains(&Capability::Color) {
                    let span = partial
                        .capabilities
                        .as_ref()
                        .map(Spanned::span)
                        .unwrap_or_else(|| partial.id.span());
                    v.error(
                        ValidationError::new(
                            format!("lights.{}.capabilities", id),
                            "Caseta dimmers do not support color",
                        )
                        .at(span, source),
                    );
                }
                match partial.zone {
                    Some(zone) => Some(Connection::Caseta { zone }),
                    None => {
                        v.error(missing("zone"));
                        None
                    }
                }
            }
            Vendor::Tuya => {
                if let Some(version) = &partial.protocol_version {
                    let supported = match version.get_ref() {
                        toml::Value::String(s) => s == "3.3",
                        toml::Value::Float(f) => (*f - 3.3).abs() < f64::EPSILON,
                        _ => false,
                    };
                    if !supported {
                        v.error(
                            ValidationError::new(
                                format!("lights.{}.protocol_version", id),
                                "only Tuya protocol 3.3 is supported",
                            )
                            .at(version.span(), source),
                        );
                    }
                }
                if let Some(key) = &partial.local_key {
                    if key.get_ref().len() != 16 {
                        v.error(
                            ValidationError::new(
                                format!("lights.{}.local_key", id),
                                format!(
                                    "local_key must be 16 characters, got {}",
                                    key.get_ref().len()
                                ),
                            )
                            .at(key.span(), source),
                        );
                    }
                }

                if partial.device_id.is_none() {
                    v.error(missing("device_id"));
                }
                if partial.local_key.is_none() {
                    v.error(missing("local_key"));
                }
                if partial.address.is_none() {
                    v.error(missing("address"));
                }
                match (&partial.device_id, &partial.local_key, &partial.address) {
                    (Some(device_id), Some(local_key), Some(address)) => {
                        Some(Connection::Tuya(TuyaConnection {
                            device_id: device_id.clone(),
                            local_key: local_key.get_ref().clone(),
                            address: address.clone(),
                            layout: partial.dps_layout.unwrap_or_default(),
                        }))
                    }
                    _ => None,
                }
            }
        };

        if v.errors.len() > errors_before {
            return None;
        }
        Some(Light {
            name: partial.name.clone().unwrap_or_else(|| id.clone()),
            id,
            connection: connection?,
            capabilities,
        })
    }

    fn validate_preset(
        partial: PartialPreset,
        lights: &HashMap<&str, &Light>,
        v: &mut Validator,
    ) -> Option<Preset> {
        let id = partial.id.get_ref().clone();
        let source = partial.source.as_ref();
        let errors_before = v.errors.len();

        let mut targets = Vec::with_capacity(partial.targets.len());
        let mut seen = HashSet::new();
        for target in partial.targets {
            let light_id = target.light.get_ref().clone();
            let path = format!("presets.{}.{}", id, light_id);

            let Some(light) = lights.get(light_id.as_str()) else {
                v.error(
                    ValidationError::new(path, format!("unknown light '{}'", light_id))
                        .at(target.light.span(), source),
                );
                continue;
            };
            if !seen.insert(light_id.clone()) {
                v.error(
                    ValidationError::new(path, "light is targeted more than once")
                        .at(target.light.span(), source),
                );
                continue;
            }

            if let Some(color) = &target.color {
                if !light.supports(Capability::Color) {
                    v.error(
                        ValidationError::new(
                            format!("{}.color", path),
                            format!("light '{}' does not support color", light_id),
                        )
                        .at(color.span(), source),
                    );
                }
            }

            let brightness = match (&target.brightness, &target.color) {
                (Some(brightness), _) => {
                    if *brightness.get_ref() > MAX_BRIGHTNESS {
                        v.error(
                            ValidationError::new(
                                format!("{}.brightness", path),
                                format!(
                                    "brightness must be 0-{}, got {}",
                                    MAX_BRIGHTNESS,
                                    brightness.get_ref()
                                ),
                            )
                            .at(brightness.span(), source),
                        );
                    }
                    *brightness.get_ref()
                }
                (None, Some(color)) => (color.get_ref().to_hsv().2 * 100.0).round() as u8,
                (None, None) => {
                    v.error(
                        ValidationError::new(path, "target needs a brightness or a color")
                            .at(target.light.span(), source),
                    );
                    continue;
                }
            };

            targets.push(PresetTarget {
                light: light_id,
                state: LightState {
                    brightness,
                    color: target.color.map(Spanned::into_inner),
                },
            });
        }

        if v.errors.len() > errors_before {
            return None;
        }
        Some(Preset {
            name: partial.name.unwrap_or_else(|| id.clone()),
            id,
            targets,
        })
    }
}
