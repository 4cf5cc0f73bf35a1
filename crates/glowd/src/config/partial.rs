use std::collections::HashMap;
use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use toml::Spanned;

use super::diagnostics::Diagnostic;
use super::diagnostics::Error;
use super::diagnostics::LoadError;
use super::diagnostics::MergeConflictLocation;
use super::diagnostics::MergeError;
use super::diagnostics::SourceInfo;
use super::diagnostics::Warning;
use super::LogLevel;
use super::TemperatureUnit;
use crate::engine::Rgb;
use crate::registry::Capability;
use crate::registry::DpsLayout;
use crate::registry::Vendor;

/// One configuration file as written, every field optional.
#[derive(Debug, Default, Deserialize)]
pub struct PartialConfig {
    #[serde(default)]
    pub imports: Vec<String>,

    pub logging: Option<PartialLoggingConfig>,
    pub server: Option<PartialServerConfig>,
    pub control: Option<PartialControlConfig>,
    pub caseta: Option<PartialCasetaConfig>,
    pub location: Option<PartialLocation>,
    pub weather: Option<PartialWeatherConfig>,
    pub scores: Option<PartialScoresConfig>,
    pub display: Option<PartialDisplayConfig>,

    #[serde(default)]
    pub lights: Vec<PartialLight>,
    #[serde(default)]
    pub presets: Vec<PartialPreset>,

    /// Source information for error reporting (not serialized)
    #[serde(skip)]
    pub source: Option<SourceInfo>,

    /// After merging: the file each scalar field was taken from, by field path
    #[serde(skip)]
    pub origins: HashMap<String, SourceInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialLoggingConfig {
    pub level: Option<Spanned<LogLevel>>,
    pub overrides: Option<HashMap<String, Spanned<LogLevel>>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialServerConfig {
    pub listen: Option<Spanned<String>>,
    pub port: Option<Spanned<u16>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialControlConfig {
    pub vendor_timeout_ms: Option<Spanned<u64>>,
    pub status_ttl_secs: Option<Spanned<u64>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialCasetaConfig {
    pub host: Option<Spanned<String>>,
    pub port: Option<Spanned<u16>>,
    pub cert: Option<Spanned<PathBuf>>,
    pub key: Option<Spanned<PathBuf>>,
    pub ca: Option<Spanned<PathBuf>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialLocation {
    pub latitude: Option<Spanned<f64>>,
    pub longitude: Option<Spanned<f64>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialWeatherConfig {
    pub enabled: Option<Spanned<bool>>,
    pub refresh_secs: Option<Spanned<u64>>,
    pub temperature_unit: Option<Spanned<TemperatureUnit>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialScoresConfig {
    pub home_light: Option<Spanned<String>>,
    pub away_light: Option<Spanned<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialDisplayConfig {
    pub on_command: Option<Spanned<Vec<String>>>,
    pub off_command: Option<Spanned<Vec<String>>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartialLight {
    pub id: Spanned<String>,
    pub name: Option<String>,
    pub vendor: Spanned<Vendor>,
    pub capabilities: Option<Spanned<Vec<Capability>>>,

    // caseta
    pub zone: Option<u32>,

    // tuya
    pub device_id: Option<String>,
    pub local_key: Option<Spanned<String>>,
    pub address: Option<String>,
    pub protocol_version: Option<Spanned<toml::Value>>,
    pub dps_layout: Option<DpsLayout>,

    #[serde(skip)]
    pub source: Option<SourceInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartialPreset {
    pub id: Spanned<String>,
    pub name: Option<String>,
    #[serde(default)]
    pub targets: Vec<PartialTarget>,

    #[serde(skip)]
    pub source: Option<SourceInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartialTarget {
    pub light: Spanned<String>,
    pub brightness: Option<Spanned<u8>>,
    pub color: Option<Spanned<Rgb>>,
}

impl PartialConfig {
    /// Load a single config file without processing imports
    pub fn from_file(path: &Path) -> Result<Self, LoadError> {
        let content = std::fs::read_to_string(path).map_err(|e| LoadError::Io {
            path: path.to_path_buf(),
            error: e,
        })?;

        let mut config: PartialConfig = toml::from_str(&content).map_err(|e| LoadError::Parse {
            path: path.to_path_buf(),
            error: e,
        })?;

        let source = SourceInfo {
            file_path: path.to_path_buf(),
            content,
        };
        for light in &mut config.lights {
            light.source = Some(source.clone());
        }
        for preset in &mut config.presets {
            preset.source = Some(source.clone());
        }
        config.source = Some(source);

        Ok(config)
    }

    /// Load config files with import resolution
    ///
    /// Imports are resolved relative to the importing file and loaded before
    /// it, depth first. Returns every loaded file in that order.
    pub fn load_with_imports(paths: &[PathBuf]) -> Result<Vec<Self>, LoadError> {
        let mut visiting = HashSet::new();
        let mut all_configs = Vec::new();

        for path in paths {
            Self::load_recursive(path, &mut visiting, &mut all_configs)?;
        }

        Ok(all_configs)
    }

    fn load_recursive(
        path: &Path,
        visiting: &mut HashSet<PathBuf>,
        configs: &mut Vec<Self>,
    ) -> Result<(), LoadError> {
        let canonical_path = path
            .canonicalize()
            .unwrap_or_else(|_| path.to_path_buf());

        if visiting.contains(&canonical_path) {
            return Err(LoadError::ImportCycle {
                path: canonical_path,
                cycle: visiting.iter().cloned().collect(),
            });
        }
        visiting.insert(canonical_path.clone());

        let config = Self::from_file(path)?;
        for import in &config.imports {
            let import = PathBuf::from(import);
            let resolved = if import.is_absolute() {
                import
            } else {
                path.parent().unwrap_or_else(|| Path::new(".")).join(import)
            };
            Self::load_recursive(&resolved, visiting, configs)?;
        }

        configs.push(config);

        // Siblings may import the same file
        visiting.remove(&canonical_path);

        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.imports.is_empty()
            && self.logging.is_none()
            && self.server.is_none()
            && self.control.is_none()
            && self.caseta.is_none()
            && self.location.is_none()
            && self.weather.is_none()
            && self.scores.is_none()
            && self.display.is_none()
            && self.lights.is_empty()
            && self.presets.is_empty()
    }

    /// Merge multiple partial configs together
    ///
    /// First-wins: a scalar set in more than one file, or a light or preset id
    /// defined twice, keeps its first definition and records a merge error.
    /// Merging carries on so every conflict is reported at once. Lights and
    /// presets keep file order.
    pub fn merge<I>(configs: I) -> (Self, Vec<Diagnostic>)
    where
        I: IntoIterator<Item = Self>,
    {
        let mut result = PartialConfig::default();
        let mut merger = Merger::default();

        for config in configs {
            let source = config.source.clone().unwrap_or_else(|| SourceInfo {
                file_path: PathBuf::from("<unknown>"),
                content: String::new(),
            });

            if config.is_empty() {
                merger
                    .diagnostics
                    .push(Diagnostic::Warning(Warning::EmptyConfig {
                        file_path: source.file_path.clone(),
                    }));
            }
            result.imports.extend(config.imports);

            if let Some(logging) = config.logging {
                let into = result.logging.get_or_insert_with(Default::default);
                merger.field(&source, "logging.level", &mut into.level, logging.level);

                let overrides = into.overrides.get_or_insert_with(HashMap::new);
                for (target, level) in logging.overrides.unwrap_or_default() {
                    let path = format!("logging.overrides.{}", target);
                    let mut slot = overrides.remove(&target);
                    merger.field(&source, &path, &mut slot, Some(level));
                    if let Some(level) = slot {
                        overrides.insert(target, level);
                    }
                }
            }

            if let Some(server) = config.server {
                let into = result.server.get_or_insert_with(Default::default);
                merger.field(&source, "server.listen", &mut into.listen, server.listen);
                merger.field(&source, "server.port", &mut into.port, server.port);
            }

            if let Some(control) = config.control {
                let into = result.control.get_or_insert_with(Default::default);
                merger.field(
                    &source,
                    "control.vendor_timeout_ms",
                    &mut into.vendor_timeout_ms,
                    control.vendor_timeout_ms,
                );
                merger.field(
                    &source,
                    "control.status_ttl_secs",
                    &mut into.status_ttl_secs,
                    control.status_ttl_secs,
                );
            }

            if let Some(caseta) = config.caseta {
                let into = result.caseta.get_or_insert_with(Default::default);
                merger.field(&source, "caseta.host", &mut into.host, caseta.host);
                merger.field(&source, "caseta.port", &mut into.port, caseta.port);
                merger.field(&source, "caseta.cert", &mut into.cert, caseta.cert);
                merger.field(&source, "caseta.key", &mut into.key, caseta.key);
                merger.field(&source, "caseta.ca", &mut into.ca, caseta.ca);
            }

            if let Some(location) = config.location {
                let into = result.location.get_or_insert_with(Default::default);
                merger.field(
                    &source,
                    "location.latitude",
                    &mut into.latitude,
                    location.latitude,
                );
                merger.field(
                    &source,
                    "location.longitude",
                    &mut into.longitude,
                    location.longitude,
                );
            }

            if let Some(weather) = config.weather {
                let into = result.weather.get_or_insert_with(Default::default);
                merger.field(&source, "weather.enabled", &mut into.enabled, weather.enabled);
                merger.field(
                    &source,
                    "weather.refresh_secs",
                    &mut into.refresh_secs,
                    weather.refresh_secs,
                );
                merger.field(
                    &source,
                    "weather.temperature_unit",
                    &mut into.temperature_unit,
                    weather.temperature_unit,
                );
            }

            if let Some(scores) = config.scores {
                let into = result.scores.get_or_insert_with(Default::default);
                merger.field(
                    &source,
                    "scores.home_light",
                    &mut into.home_light,
                    scores.home_light,
                );
                merger.field(
                    &source,
                    "scores.away_light",
                    &mut into.away_light,
                    scores.away_light,
                );
            }

            if let Some(display) = config.display {
                let into = result.display.get_or_insert_with(Default::default);
                merger.field(
                    &source,
                    "display.on_command",
                    &mut into.on_command,
                    display.on_command,
                );
                merger.field(
                    &source,
                    "display.off_command",
                    &mut into.off_command,
                    display.off_command,
                );
            }

            for light in config.lights {
                let path = format!("lights.{}", light.id.get_ref());
                if merger.definition(&source, &path, "Light", light.id.get_ref(), light.id.span()) {
                    result.lights.push(light);
                }
            }

            for preset in config.presets {
                let path = format!("presets.{}", preset.id.get_ref());
                if merger.definition(&source, &path, "Preset", preset.id.get_ref(), preset.id.span())
                {
                    result.presets.push(preset);
                }
            }
        }

        result.origins = merger.origins;
        (result, merger.diagnostics)
    }
}

/// Bookkeeping for first-wins merging
#[derive(Default)]
struct Merger {
    diagnostics: Vec<Diagnostic>,
    seen: HashMap<String, MergeConflictLocation>,
    origins: HashMap<String, SourceInfo>,
}

impl Merger {
    /// Take `value` into `slot` unless the field was already set
    fn field<T>(
        &mut self,
        source: &SourceInfo,
        path: &str,
        slot: &mut Option<Spanned<T>>,
        value: Option<Spanned<T>>,
    ) {
        let Some(value) = value else {
            return;
        };

        let location = MergeConflictLocation {
            file_path: source.file_path.clone(),
            span: value.span(),
            content: source.content.clone(),
        };

        if let Some(previous) = self.seen.get(path) {
            self.diagnostics.push(Diagnostic::Error(Error::Merge(MergeError {
                field_path: path.to_string(),
                message: format!("'{}' is defined in multiple config files", path),
                conflicts: vec![previous.clone(), location],
            })));
        } else {
            *slot = Some(value);
            self.seen.insert(path.to_string(), location);
            self.origins.insert(path.to_string(), source.clone());
        }
    }

    /// Record a light or preset definition; false if the id is taken
    fn definition(
        &mut self,
        source: &SourceInfo,
        path: &str,
        what: &str,
        id: &str,
        span: std::ops::Range<usize>,
    ) -> bool {
        let location = MergeConflictLocation {
            file_path: source.file_path.clone(),
            span,
            content: source.content.clone(),
        };

        if let Some(previous) = self.seen.get(path) {
            self.diagnostics.push(Diagnostic::Error(Error::Merge(MergeError {
                field_path: path.to_string(),
                message: format!("{} '{}' is defined more than once", what, id),
                conflicts: vec![previous.clone(), location],
            })));
            false
        } else {
            self.seen.insert(path.to_string(), location);
            true
        }
    }
}
