use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use tokio::time::Instant;

/// Highest brightness percentage a light accepts.
pub const MAX_BRIGHTNESS: u8 = 100;

/// An sRGB colour, serialized as `[r, g, b]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[u8; 3]", into = "[u8; 3]")]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const WHITE: Rgb = Rgb::new(255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Hue in degrees (0-360), saturation and value in 0.0-1.0.
    pub fn to_hsv(self) -> (f64, f64, f64) {
        let r = f64::from(self.r) / 255.0;
        let g = f64::from(self.g) / 255.0;
        let b = f64::from(self.b) / 255.0;

        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let delta = max - min;

        let hue = if delta == 0.0 {
            0.0
        } else if max == r {
            60.0 * ((g - b) / delta).rem_euclid(6.0)
        } else if max == g {
            60.0 * ((b - r) / delta + 2.0)
        } else {
            60.0 * ((r - g) / delta + 4.0)
        };
        let saturation = if max == 0.0 { 0.0 } else { delta / max };

        (hue, saturation, max)
    }

    /// The same hue and saturation at full value
    ///
    /// Brightness is carried separately, so this is the form a colour is
    /// stored and reported in.
    pub fn at_full_value(self) -> Self {
        let (hue, saturation, _) = self.to_hsv();
        Self::from_hsv(hue, saturation, 1.0)
    }

    pub fn from_hsv(hue: f64, saturation: f64, value: f64) -> Self {
        let hue = hue.rem_euclid(360.0);
        let saturation = saturation.clamp(0.0, 1.0);
        let value = value.clamp(0.0, 1.0);

        let c = value * saturation;
        let x = c * (1.0 - ((hue / 60.0).rem_euclid(2.0) - 1.0).abs());
        let m = value - c;

        let (r, g, b) = match hue {
            h if h < 60.0 => (c, x, 0.0),
            h if h < 120.0 => (x, c, 0.0),
            h if h < 180.0 => (0.0, c, x),
            h if h < 240.0 => (0.0, x, c),
            h if h < 300.0 => (x, 0.0, c),
            _ => (c, 0.0, x),
        };

        let channel = |v: f64| ((v + m) * 255.0).round().clamp(0.0, 255.0) as u8;
        Self::new(channel(r), channel(g), channel(b))
    }
}

impl From<[u8; 3]> for Rgb {
    fn from([r, g, b]: [u8; 3]) -> Self {
        Self::new(r, g, b)
    }
}

impl From<Rgb> for [u8; 3] {
    fn from(rgb: Rgb) -> Self {
        [rgb.r, rgb.g, rgb.b]
    }
}

/// State of a single light as last reported by (or sent to) its vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LightState {
    /// Brightness percentage, 0 means off
    pub brightness: u8,

    /// Colour, only for colour capable lights in colour mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Rgb>,
}

impl LightState {
    pub fn off() -> Self {
        Self::default()
    }

    pub fn dimmed(brightness: u8) -> Self {
        Self {
            brightness,
            color: None,
        }
    }

    pub fn on(&self) -> bool {
        self.brightness > 0
    }
}

#[derive(Debug)]
struct CachedState {
    state: LightState,
    recorded_at: Instant,
}

/// Live status cache.
///
/// Owned by the engine task for the lifetime of the process. Entries expire
/// after `ttl`, after which the vendor device is queried again.
#[derive(Debug)]
pub struct StateStore {
    ttl: Duration,
    entries: HashMap<String, CachedState>,
}

impl StateStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    /// Cached state for `light_id`, if it is still fresh
    pub fn get(&self, light_id: &str) -> Option<LightState> {
        self.entries
            .get(light_id)
            .filter(|cached| cached.recorded_at.elapsed() < self.ttl)
            .map(|cached| cached.state)
    }

    /// Cached state regardless of age
    pub fn last_known(&self, light_id: &str) -> Option<LightState> {
        self.entries.get(light_id).map(|cached| cached.state)
    }

    pub fn record(&mut self, light_id: &str, state: LightState) {
        self.entries.insert(
            light_id.to_string(),
            CachedState {
                state,
                recorded_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&mut self, light_id: &str) {
        self.entries.remove(light_id);
    }
}
