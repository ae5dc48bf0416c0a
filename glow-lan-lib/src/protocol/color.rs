use std::str::FromStr;

use anyhow::anyhow;
use bytes::{Buf, BufMut, BytesMut};
use clap::ValueEnum;
use palette::{FromColor, Hsv, Srgb};
use serde::{Deserialize, Serialize};

use crate::protocol::payload::Payload;

/// Color temperature used when a color is built from RGB.
pub const DEFAULT_KELVIN: u16 = 3500;

/// The protocol's color model: hue, saturation, brightness and kelvin, each a `u16`.
///
/// Hue maps `0..=65535` onto `0..360` degrees. Kelvin only matters when
/// saturation is low.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Hsbk {
    pub hue: u16,
    pub saturation: u16,
    pub brightness: u16,
    pub kelvin: u16,
}

impl Hsbk {
    pub fn new(hue: u16, saturation: u16, brightness: u16, kelvin: u16) -> Self {
        Hsbk {
            hue,
            saturation,
            brightness,
            kelvin,
        }
    }

    /// Hue in degrees, `0.0..360.0`.
    pub fn hue_degrees(&self) -> f32 {
        self.hue as f32 / 65536.0 * 360.0
    }

    pub fn to_rgb(&self) -> RGB {
        let hsv = Hsv::new(
            self.hue_degrees(),
            self.saturation as f32 / u16::MAX as f32,
            self.brightness as f32 / u16::MAX as f32,
        );
        let srgb: Srgb = Srgb::from_color(hsv);
        let (r, g, b) = srgb.into_components();
        RGB {
            red: unit_to_u8(r),
            green: unit_to_u8(g),
            blue: unit_to_u8(b),
        }
    }
}

fn unit_to_u8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn unit_to_u16(value: f32) -> u16 {
    (value.clamp(0.0, 1.0) * u16::MAX as f32).round() as u16
}

impl From<RGB> for Hsbk {
    fn from(rgb: RGB) -> Self {
        let srgb = Srgb::new(
            rgb.red as f32 / 255.0,
            rgb.green as f32 / 255.0,
            rgb.blue as f32 / 255.0,
        );
        let hsv: Hsv = Hsv::from_color(srgb);
        let hue = (hsv.hue.into_positive_degrees() / 360.0 * 65536.0).round();
        Hsbk {
            hue: (hue as u32 % 65536) as u16,
            saturation: unit_to_u16(hsv.saturation),
            brightness: unit_to_u16(hsv.value),
            kelvin: DEFAULT_KELVIN,
        }
    }
}

impl Payload for Hsbk {
    const SIZE: usize = 8;

    fn write(&self, buffer: &mut BytesMut) {
        buffer.put_u16_le(self.hue);
        buffer.put_u16_le(self.saturation);
        buffer.put_u16_le(self.brightness);
        buffer.put_u16_le(self.kelvin);
    }

    fn read(buffer: &mut &[u8]) -> Self {
        Hsbk {
            hue: buffer.get_u16_le(),
            saturation: buffer.get_u16_le(),
            brightness: buffer.get_u16_le(),
            kelvin: buffer.get_u16_le(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RGB {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl From<(u8, u8, u8)> for RGB {
    fn from((red, green, blue): (u8, u8, u8)) -> Self {
        RGB { red, green, blue }
    }
}

impl From<RGB> for (u8, u8, u8) {
    fn from(rgb: RGB) -> Self {
        (rgb.red, rgb.green, rgb.blue)
    }
}

/// Named colors accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum NamedColor {
    Red,
    Green,
    Blue,
    Yellow,
    Orange,
    Purple,
    Cyan,
    Magenta,
    Pink,
    Teal,
    Lavender,
    Warm,
    White,
}

impl FromStr for NamedColor {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <NamedColor as ValueEnum>::from_str(s, true).map_err(|_| anyhow!("Invalid color: {}", s))
    }
}

impl From<NamedColor> for Hsbk {
    fn from(color: NamedColor) -> Self {
        let rgb = |red, green, blue| Hsbk::from(RGB { red, green, blue });
        match color {
            NamedColor::Red => rgb(255, 0, 0),
            NamedColor::Green => rgb(0, 255, 0),
            NamedColor::Blue => rgb(0, 0, 255),
            NamedColor::Yellow => rgb(255, 255, 0),
            NamedColor::Orange => rgb(255, 165, 0),
            NamedColor::Purple => rgb(128, 0, 128),
            NamedColor::Cyan => rgb(0, 255, 255),
            NamedColor::Magenta => rgb(255, 0, 255),
            NamedColor::Pink => rgb(255, 192, 203),
            NamedColor::Teal => rgb(0, 128, 128),
            NamedColor::Lavender => rgb(230, 230, 250),
            // whites are expressed through kelvin, not hue
            NamedColor::Warm => Hsbk::new(0, 0, u16::MAX, 2700),
            NamedColor::White => Hsbk::new(0, 0, u16::MAX, 5000),
        }
    }
}
