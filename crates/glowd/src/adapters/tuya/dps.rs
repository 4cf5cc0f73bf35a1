//! Data point (DPS) encoding for Tuya bulbs

use serde_json::json;
use serde_json::Map;
use serde_json::Value;

use crate::engine::LightState;
use crate::engine::Rgb;
use crate::engine::MAX_BRIGHTNESS;
use crate::error::VendorError;
use crate::registry::DpsLayout;

struct Keys {
    switch: &'static str,
    mode: &'static str,
    brightness: &'static str,
    colour: &'static str,
}

const LAYOUT_A: Keys = Keys {
    switch: "1",
    mode: "2",
    brightness: "3",
    colour: "5",
};

const LAYOUT_B: Keys = Keys {
    switch: "20",
    mode: "21",
    brightness: "22",
    colour: "24",
};

fn keys(layout: DpsLayout) -> &'static Keys {
    match layout {
        DpsLayout::A => &LAYOUT_A,
        DpsLayout::B => &LAYOUT_B,
    }
}

/// Device brightness value for a percentage (1-100)
pub fn scale_brightness(layout: DpsLayout, percent: u8) -> u32 {
    let percent = u32::from(percent.min(MAX_BRIGHTNESS));
    match layout {
        DpsLayout::A => (percent * 255 / 100).max(25),
        DpsLayout::B => (percent * 10).max(10),
    }
}

fn unscale_brightness(layout: DpsLayout, raw: u64) -> u8 {
    let percent = match layout {
        DpsLayout::A => (raw * 100 + 127) / 255,
        DpsLayout::B => raw / 10,
    };
    percent.min(u64::from(MAX_BRIGHTNESS)) as u8
}

/// Colour data point value for `color` at `value` (0.0-1.0)
pub fn encode_colour(layout: DpsLayout, color: Rgb, value: f64) -> String {
    let (hue, saturation, _) = color.to_hsv();
    let hue = hue.round() as u32 % 360;
    match layout {
        DpsLayout::A => {
            let Rgb { r, g, b } = Rgb::from_hsv(f64::from(hue), saturation, value);
            format!(
                "{:02x}{:02x}{:02x}{:04x}{:02x}{:02x}",
                r,
                g,
                b,
                hue,
                (saturation * 255.0).round() as u32,
                (value * 255.0).round() as u32
            )
        }
        DpsLayout::B => format!(
            "{:04x}{:04x}{:04x}",
            hue,
            (saturation * 1000.0).round() as u32,
            (value * 1000.0).round() as u32
        ),
    }
}

/// Decode a colour data point into a full-value colour and its value (0.0-1.0)
pub fn decode_colour(layout: DpsLayout, data: &str) -> Option<(Rgb, f64)> {
    let field = |range: std::ops::Range<usize>| {
        data.get(range)
            .and_then(|hex| u32::from_str_radix(hex, 16).ok())
    };

    let (hue, saturation, value) = match layout {
        DpsLayout::A if data.len() == 14 => (
            field(6..10)?,
            f64::from(field(10..12)?) / 255.0,
            f64::from(field(12..14)?) / 255.0,
        ),
        DpsLayout::B if data.len() == 12 => (
            field(0..4)?,
            f64::from(field(4..8)?) / 1000.0,
            f64::from(field(8..12)?) / 1000.0,
        ),
        _ => return None,
    };

    Some((
        Rgb::from_hsv(f64::from(hue), saturation, 1.0),
        value.clamp(0.0, 1.0),
    ))
}

/// Data points for a brightness command; 0 switches the bulb off
pub fn brightness_command(layout: DpsLayout, percent: u8) -> Value {
    let keys = keys(layout);
    let mut dps = Map::new();
    if percent == 0 {
        dps.insert(keys.switch.to_string(), json!(false));
    } else {
        dps.insert(keys.switch.to_string(), json!(true));
        dps.insert(keys.mode.to_string(), json!("white"));
        dps.insert(
            keys.brightness.to_string(),
            json!(scale_brightness(layout, percent)),
        );
    }
    Value::Object(dps)
}

/// Data points for a colour command
///
/// The HSV value comes from `brightness` when given, otherwise from the
/// colour itself. A brightness of 0 switches the bulb off.
pub fn colour_command(layout: DpsLayout, color: Rgb, brightness: Option<u8>) -> Value {
    if brightness == Some(0) {
        return brightness_command(layout, 0);
    }
    let keys = keys(layout);
    let value = match brightness {
        Some(percent) => f64::from(percent.min(MAX_BRIGHTNESS)) / 100.0,
        None => color.to_hsv().2,
    };

    let mut dps = Map::new();
    dps.insert(keys.switch.to_string(), json!(true));
    dps.insert(keys.mode.to_string(), json!("colour"));
    dps.insert(
        keys.colour.to_string(),
        json!(encode_colour(layout, color, value)),
    );
    Value::Object(dps)
}

/// Interpret the `dps` object of a status reply
pub fn parse_status(layout: DpsLayout, dps: &Value) -> Result<LightState, VendorError> {
    let keys = keys(layout);
    let dps = dps
        .as_object()
        .ok_or_else(|| VendorError::Protocol("status reply has no dps object".to_string()))?;

    let on = dps
        .get(keys.switch)
        .and_then(Value::as_bool)
        .ok_or_else(|| {
            VendorError::Protocol(format!("status reply is missing switch dps {}", keys.switch))
        })?;
    if !on {
        return Ok(LightState::off());
    }

    let mode = dps.get(keys.mode).and_then(Value::as_str).unwrap_or("white");
    if mode == "colour" {
        if let Some((color, value)) = dps
            .get(keys.colour)
            .and_then(Value::as_str)
            .and_then(|data| decode_colour(layout, data))
        {
            return Ok(LightState {
                brightness: (value * 100.0).round() as u8,
                color: Some(color),
            });
        }
    }

    let brightness = dps
        .get(keys.brightness)
        .and_then(Value::as_u64)
        .map(|raw| unscale_brightness(layout, raw))
        .unwrap_or(MAX_BRIGHTNESS);
    Ok(LightState::dimmed(brightness))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_brightness_scaling() {
        assert_eq!(scale_brightness(DpsLayout::B, 1), 10);
        assert_eq!(scale_brightness(DpsLayout::B, 55), 550);
        assert_eq!(scale_brightness(DpsLayout::B, 100), 1000);

        assert_eq!(scale_brightness(DpsLayout::A, 1), 25);
        assert_eq!(scale_brightness(DpsLayout::A, 100), 255);

        assert_eq!(unscale_brightness(DpsLayout::B, 550), 55);
        assert_eq!(unscale_brightness(DpsLayout::A, 255), 100);
    }

    #[test]
    fn test_off_command_only_touches_switch() {
        assert_eq!(
            brightness_command(DpsLayout::B, 0),
            json!({"20": false})
        );
        assert_eq!(
            brightness_command(DpsLayout::A, 40),
            json!({"1": true, "2": "white", "3": 102})
        );
    }

    #[test]
    fn test_colour_encoding_layout_b() {
        // Pure red at 40% brightness: hue 0, saturation 1000, value 400
        assert_eq!(
            colour_command(DpsLayout::B, Rgb::new(255, 0, 0), Some(40)),
            json!({"20": true, "21": "colour", "24": "000003e80190"})
        );
    }

    #[test]
    fn test_colour_encoding_layout_a() {
        // Blue, value taken from the colour
        assert_eq!(
            encode_colour(DpsLayout::A, Rgb::new(0, 0, 255), 1.0),
            "0000ff00f0ffff"
        );
    }

    #[test]
    fn test_colour_at_zero_brightness_switches_off() {
        for layout in [DpsLayout::A, DpsLayout::B] {
            assert_eq!(
                colour_command(layout, Rgb::new(255, 147, 41), Some(0)),
                brightness_command(layout, 0)
            );
        }
        assert_eq!(
            colour_command(DpsLayout::B, Rgb::new(255, 147, 41), Some(0)),
            json!({"20": false})
        );
    }

    #[test]
    fn test_colour_brightness_defaults_to_colour_value() {
        let dps = colour_command(DpsLayout::B, Rgb::new(128, 0, 0), None);
        // 128/255 = 0.502 -> 502
        assert_eq!(dps["24"], "000003e801f6");
    }

    #[test]
    fn test_parse_colour_status() {
        let dps = json!({"20": true, "21": "colour", "22": 1000, "24": "007803e80190"});
        let state = parse_status(DpsLayout::B, &dps).unwrap();
        assert_eq!(state.brightness, 40);
        assert_eq!(state.color, Some(Rgb::new(0, 255, 0)));
    }

    #[test]
    fn test_parse_white_and_off_status() {
        let white = json!({"20": true, "21": "white", "22": 730});
        assert_eq!(
            parse_status(DpsLayout::B, &white).unwrap(),
            LightState::dimmed(73)
        );

        let off = json!({"20": false, "21": "colour", "24": "007803e80190"});
        assert_eq!(parse_status(DpsLayout::B, &off).unwrap(), LightState::off());

        let layout_a = json!({"1": true, "2": "white", "3": 255});
        assert_eq!(
            parse_status(DpsLayout::A, &layout_a).unwrap(),
            LightState::dimmed(100)
        );
    }

    #[test]
    fn test_parse_status_needs_switch() {
        let dps = json!({"22": 500});
        assert!(matches!(
            parse_status(DpsLayout::B, &dps),
            Err(VendorError::Protocol(_))
        ));
    }

    #[test]
    fn test_layout_a_colour_roundtrip_keeps_hue() {
        let encoded = encode_colour(DpsLayout::A, Rgb::new(255, 0, 0), 0.5);
        let (color, value) = decode_colour(DpsLayout::A, &encoded).unwrap();
        assert_eq!(color, Rgb::new(255, 0, 0));
        assert!((value - 0.5).abs() < 0.01);
    }
}
