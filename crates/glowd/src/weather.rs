//! Weather for the score display
//!
//! Current conditions and tomorrow's forecast from Open-Meteo. The location
//! comes from configuration or, failing that, IP geolocation. Reports are
//! cached; when a refresh fails the last report is served instead.

use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::info;
use tracing::warn;

use crate::config::Location;
use crate::config::TemperatureUnit;
use crate::config::WeatherConfig;

const GEOLOCATION_URL: &str = "http://ip-api.com/json/?fields=lat,lon";
const FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";
const HTTP_TIMEOUT: Duration = Duration::from_secs(8);

#[derive(Debug, thiserror::Error)]
pub enum WeatherError {
    #[error("weather is disabled")]
    Disabled,

    #[error("weather request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected forecast: {0}")]
    Format(String),
}

/// Condition name and display animation for a WMO weather code
pub fn wmo(code: u16) -> (&'static str, &'static str) {
    match code {
        0 | 1 => ("Clear", "clear"),
        2 => ("Cloudy", "cloudy"),
        3 => ("Overcast", "overcast"),
        45 | 48 => ("Fog", "fog"),
        51 | 53 | 55 => ("Drizzle", "drizzle"),
        56 | 57 | 66 | 67 => ("F.Rain", "rain"),
        61 | 63 | 65 => ("Rain", "rain"),
        71 | 73 | 75 | 77 | 85 | 86 => ("Snow", "snow"),
        80..=82 => ("Showers", "rain"),
        95 | 96 | 99 => ("Storm", "storm"),
        _ => ("?", "cloudy"),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherReport {
    pub location: Location,
    pub current: Current,
    pub tomorrow: Tomorrow,
    pub unit: TemperatureUnit,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Current {
    pub temperature: i64,
    pub code: u16,
    pub condition: &'static str,
    pub animation: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tomorrow {
    pub date: String,
    pub weekday: String,
    pub high: i64,
    pub low: i64,
    pub code: u16,
    pub condition: &'static str,
    pub animation: &'static str,
    pub precipitation_probability: u8,
}

#[derive(Debug, Deserialize)]
struct Geolocation {
    lat: f64,
    lon: f64,
}

#[derive(Debug, Deserialize)]
struct Forecast {
    current_weather: CurrentWeather,
    daily: Daily,
}

#[derive(Debug, Deserialize)]
struct CurrentWeather {
    temperature: f64,
    weathercode: u16,
}

#[derive(Debug, Deserialize)]
struct Daily {
    time: Vec<String>,
    weathercode: Vec<u16>,
    temperature_2m_max: Vec<f64>,
    temperature_2m_min: Vec<f64>,
    #[serde(default)]
    precipitation_probability_max: Vec<Option<f64>>,
}

impl Forecast {
    fn into_report(self, location: Location, unit: TemperatureUnit) -> Result<WeatherReport, WeatherError> {
        let daily = self.daily;
        let tomorrow = |what: &str| WeatherError::Format(format!("no {} for tomorrow", what));

        let date = daily.time.get(1).cloned().ok_or_else(|| tomorrow("date"))?;
        let weekday = chrono::NaiveDate::parse_from_str(&date, "%Y-%m-%d")
            .map(|d| d.format("%a").to_string())
            .map_err(|e| WeatherError::Format(format!("bad date '{}': {}", date, e)))?;
        let code = *daily.weathercode.get(1).ok_or_else(|| tomorrow("weathercode"))?;
        let high = *daily.temperature_2m_max.get(1).ok_or_else(|| tomorrow("high"))?;
        let low = *daily.temperature_2m_min.get(1).ok_or_else(|| tomorrow("low"))?;
        let precipitation = daily
            .precipitation_probability_max
            .get(1)
            .copied()
            .flatten()
            .unwrap_or(0.0);

        let (condition, animation) = wmo(self.current_weather.weathercode);
        let current = Current {
            temperature: self.current_weather.temperature.round() as i64,
            code: self.current_weather.weathercode,
            condition,
            animation,
        };

        let (condition, animation) = wmo(code);
        Ok(WeatherReport {
            location,
            current,
            tomorrow: Tomorrow {
                date,
                weekday,
                high: high.round() as i64,
                low: low.round() as i64,
                code,
                condition,
                animation,
                precipitation_probability: precipitation.round().clamp(0.0, 100.0) as u8,
            },
            unit,
        })
    }
}

struct Cached {
    report: WeatherReport,
    fetched_at: Instant,
}

pub struct WeatherClient {
    http: reqwest::Client,
    config: WeatherConfig,
    location: Option<Location>,
    geolocation_url: String,
    forecast_url: String,
    cache: Mutex<Option<Cached>>,
}

impl WeatherClient {
    pub fn new(config: WeatherConfig, location: Option<Location>) -> Result<Self, WeatherError> {
        Self::with_endpoints(config, location, GEOLOCATION_URL, FORECAST_URL)
    }

    pub fn with_endpoints(
        config: WeatherConfig,
        location: Option<Location>,
        geolocation_url: &str,
        forecast_url: &str,
    ) -> Result<Self, WeatherError> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("glowd/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            config,
            location,
            geolocation_url: geolocation_url.to_string(),
            forecast_url: forecast_url.to_string(),
            cache: Mutex::new(None),
        })
    }

    /// Current report, refreshed when older than the configured interval
    pub async fn report(&self) -> Result<WeatherReport, WeatherError> {
        if !self.config.enabled {
            return Err(WeatherError::Disabled);
        }

        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if cached.fetched_at.elapsed() < self.config.refresh {
                return Ok(cached.report.clone());
            }
        }

        match self.fetch().await {
            Ok(report) => {
                info!(
                    "Weather: now {}° {} | {}: {}/{}° {}",
                    report.current.temperature,
                    report.current.condition,
                    report.tomorrow.weekday,
                    report.tomorrow.high,
                    report.tomorrow.low,
                    report.tomorrow.condition
                );
                *cache = Some(Cached {
                    report: report.clone(),
                    fetched_at: Instant::now(),
                });
                Ok(report)
            }
            Err(e) => match cache.as_ref() {
                Some(stale) => {
                    warn!("Weather refresh failed, serving stale report: {}", e);
                    Ok(stale.report.clone())
                }
                None => Err(e),
            },
        }
    }

    async fn locate(&self) -> Result<Location, WeatherError> {
        if let Some(location) = self.location {
            return Ok(location);
        }
        let geo: Geolocation = self
            .http
            .get(&self.geolocation_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(Location {
            latitude: geo.lat,
            longitude: geo.lon,
        })
    }

    async fn fetch(&self) -> Result<WeatherReport, WeatherError> {
        let location = self.locate().await?;
        let unit = self.config.temperature_unit;

        let forecast: Forecast = self
            .http
            .get(&self.forecast_url)
            .query(&[
                ("latitude", location.latitude.to_string()),
                ("longitude", location.longitude.to_string()),
                (
                    "daily",
                    "weathercode,temperature_2m_max,temperature_2m_min,precipitation_probability_max"
                        .to_string(),
                ),
                ("current_weather", "true".to_string()),
                ("temperature_unit", unit.as_str().to_string()),
                ("timezone", "auto".to_string()),
                ("forecast_days", "3".to_string()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        forecast.into_report(location, unit)
    }
}
