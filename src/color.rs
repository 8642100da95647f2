//! Color-space conversions used by the color sandbox card.
//!
//! Every space converts through sRGB. XYZ and LAB use the D65 white point.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// D65 reference white, scaled so that Y = 100.
pub const D65_WHITE: (f64, f64, f64) = (95.047, 100.0, 108.883);

const LAB_EPSILON: f64 = 0.008856;
const LAB_KAPPA: f64 = 7.787;

/// Errors produced while validating or parsing colors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ColorError {
    #[error("channel {channel} out of range: {value}")]
    OutOfRange { channel: &'static str, value: f64 },
    #[error("invalid hex color: {0}")]
    InvalidHex(String),
}

/// An 8-bit sRGB color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// Hue in degrees, saturation and lightness in percent
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hsl {
    pub h: f64,
    pub s: f64,
    pub l: f64,
}

/// Hue in degrees, saturation and value in percent
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hsv {
    pub h: f64,
    pub s: f64,
    pub v: f64,
}

/// Ink coverage in percent
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cmyk {
    pub c: f64,
    pub m: f64,
    pub y: f64,
    pub k: f64,
}

/// CIE 1931 XYZ, D65, white has Y = 100
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Xyz {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// CIE L*a*b*, D65
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Lab {
    pub l: f64,
    pub a: f64,
    pub b: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorSpace {
    Rgb,
    Hsl,
    Hsv,
    Cmyk,
    Xyz,
    Lab,
}

/// A color in any of the supported spaces
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    Rgb(Rgb),
    Hsl(Hsl),
    Hsv(Hsv),
    Cmyk(Cmyk),
    Xyz(Xyz),
    Lab(Lab),
}

/// The same color expressed in every space at once
#[derive(Debug, Clone, Serialize)]
pub struct ColorReport {
    pub hex: String,
    pub rgb: Rgb,
    pub hsl: Hsl,
    pub hsv: Hsv,
    pub cmyk: Cmyk,
    pub xyz: Xyz,
    pub lab: Lab,
}

impl Rgb {
    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Rgb { r, g, b }
    }

    /// Parse `#rrggbb`, `rrggbb`, `#rgb` or `rgb`
    pub fn from_hex(input: &str) -> Result<Self, ColorError> {
        let digits = input.trim().trim_start_matches('#');
        if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ColorError::InvalidHex(input.to_string()));
        }

        let expanded: String = match digits.len() {
            3 => digits.chars().flat_map(|c| [c, c]).collect(),
            6 => digits.to_string(),
            _ => return Err(ColorError::InvalidHex(input.to_string())),
        };

        let channel = |i: usize| {
            u8::from_str_radix(&expanded[i..i + 2], 16)
                .map_err(|_| ColorError::InvalidHex(input.to_string()))
        };

        Ok(Rgb {
            r: channel(0)?,
            g: channel(2)?,
            b: channel(4)?,
        })
    }

    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    fn unit(&self) -> (f64, f64, f64) {
        (
            self.r as f64 / 255.0,
            self.g as f64 / 255.0,
            self.b as f64 / 255.0,
        )
    }

    fn from_unit(r: f64, g: f64, b: f64) -> Self {
        Rgb {
            r: unit_to_byte(r),
            g: unit_to_byte(g),
            b: unit_to_byte(b),
        }
    }
}

impl Hsl {
    /// The color on the opposite side of the hue wheel
    pub fn complement(&self) -> Hsl {
        Hsl {
            h: (self.h + 180.0) % 360.0,
            ..*self
        }
    }

    /// Shift lightness by `delta` percent, clamped to 0..=100
    pub fn lighten(&self, delta: f64) -> Hsl {
        Hsl {
            l: (self.l + delta).clamp(0.0, 100.0),
            ..*self
        }
    }
}

impl Color {
    pub fn space(&self) -> ColorSpace {
        match self {
            Color::Rgb(_) => ColorSpace::Rgb,
            Color::Hsl(_) => ColorSpace::Hsl,
            Color::Hsv(_) => ColorSpace::Hsv,
            Color::Cmyk(_) => ColorSpace::Cmyk,
            Color::Xyz(_) => ColorSpace::Xyz,
            Color::Lab(_) => ColorSpace::Lab,
        }
    }

    /// Check that every channel lies within the range of its space
    ///
    /// # Returns
    /// * `Result<(), ColorError>` - The first channel found out of range
    pub fn validate(&self) -> Result<(), ColorError> {
        match self {
            Color::Rgb(_) => Ok(()),
            Color::Hsl(c) => {
                check("h", c.h, 0.0, 360.0)?;
                check("s", c.s, 0.0, 100.0)?;
                check("l", c.l, 0.0, 100.0)
            }
            Color::Hsv(c) => {
                check("h", c.h, 0.0, 360.0)?;
                check("s", c.s, 0.0, 100.0)?;
                check("v", c.v, 0.0, 100.0)
            }
            Color::Cmyk(c) => {
                check("c", c.c, 0.0, 100.0)?;
                check("m", c.m, 0.0, 100.0)?;
                check("y", c.y, 0.0, 100.0)?;
                check("k", c.k, 0.0, 100.0)
            }
            Color::Xyz(c) => {
                check("x", c.x, 0.0, D65_WHITE.0 + 0.5)?;
                check("y", c.y, 0.0, D65_WHITE.1 + 0.5)?;
                check("z", c.z, 0.0, D65_WHITE.2 + 0.5)
            }
            Color::Lab(c) => {
                check("l", c.l, 0.0, 100.0)?;
                check("a", c.a, -128.0, 127.0)?;
                check("b", c.b, -128.0, 127.0)
            }
        }
    }

    pub fn to_rgb(&self) -> Rgb {
        match *self {
            Color::Rgb(c) => c,
            Color::Hsl(c) => hsl_to_rgb(c),
            Color::Hsv(c) => hsv_to_rgb(c),
            Color::Cmyk(c) => cmyk_to_rgb(c),
            Color::Xyz(c) => xyz_to_rgb(c),
            Color::Lab(c) => lab_to_rgb(c),
        }
    }
}

fn check(channel: &'static str, value: f64, min: f64, max: f64) -> Result<(), ColorError> {
    if value.is_finite() && value >= min && value <= max {
        Ok(())
    } else {
        Err(ColorError::OutOfRange { channel, value })
    }
}

fn unit_to_byte(v: f64) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Convert a color into the target space
///
/// Same-space conversions return the input untouched. Cross-space
/// conversions go through 8-bit sRGB, except XYZ <-> LAB which is direct.
pub fn convert(color: Color, target: ColorSpace) -> Result<Color, ColorError> {
    color.validate()?;

    if color.space() == target {
        return Ok(color);
    }

    let converted = match (color, target) {
        (Color::Xyz(xyz), ColorSpace::Lab) => Color::Lab(xyz_to_lab(xyz)),
        (Color::Lab(lab), ColorSpace::Xyz) => Color::Xyz(lab_to_xyz(lab)),
        (other, target) => {
            let rgb = other.to_rgb();
            match target {
                ColorSpace::Rgb => Color::Rgb(rgb),
                ColorSpace::Hsl => Color::Hsl(rgb_to_hsl(rgb)),
                ColorSpace::Hsv => Color::Hsv(rgb_to_hsv(rgb)),
                ColorSpace::Cmyk => Color::Cmyk(rgb_to_cmyk(rgb)),
                ColorSpace::Xyz => Color::Xyz(rgb_to_xyz(rgb)),
                ColorSpace::Lab => Color::Lab(rgb_to_lab(rgb)),
            }
        }
    };

    Ok(converted)
}

/// Express a color in every supported space
pub fn convert_all(color: Color) -> Result<ColorReport, ColorError> {
    color.validate()?;
    let rgb = color.to_rgb();
    let xyz = rgb_to_xyz(rgb);

    Ok(ColorReport {
        hex: rgb.to_hex(),
        rgb,
        hsl: rgb_to_hsl(rgb),
        hsv: rgb_to_hsv(rgb),
        cmyk: rgb_to_cmyk(rgb),
        xyz,
        lab: xyz_to_lab(xyz),
    })
}

// Shared by HSL and HSV: hue in degrees from unit RGB and its extremes.
fn hue(r: f64, g: f64, b: f64, max: f64, delta: f64) -> f64 {
    if delta == 0.0 {
        return 0.0;
    }
    let h = if max == r {
        ((g - b) / delta).rem_euclid(6.0)
    } else if max == g {
        (b - r) / delta + 2.0
    } else {
        (r - g) / delta + 4.0
    };
    (h * 60.0).rem_euclid(360.0)
}

// Inverse of `hue`: unit RGB from hue, chroma and the offset added to every channel.
fn from_hue(h: f64, chroma: f64, m: f64) -> Rgb {
    let h = h.rem_euclid(360.0) / 60.0;
    let x = chroma * (1.0 - (h % 2.0 - 1.0).abs());
    let (r, g, b) = match h as u32 {
        0 => (chroma, x, 0.0),
        1 => (x, chroma, 0.0),
        2 => (0.0, chroma, x),
        3 => (0.0, x, chroma),
        4 => (x, 0.0, chroma),
        _ => (chroma, 0.0, x),
    };
    Rgb::from_unit(r + m, g + m, b + m)
}

pub fn rgb_to_hsl(rgb: Rgb) -> Hsl {
    let (r, g, b) = rgb.unit();
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;
    let l = (max + min) / 2.0;

    let s = if delta == 0.0 {
        0.0
    } else {
        delta / (1.0 - (2.0 * l - 1.0).abs())
    };

    Hsl {
        h: hue(r, g, b, max, delta),
        s: s * 100.0,
        l: l * 100.0,
    }
}

pub fn hsl_to_rgb(hsl: Hsl) -> Rgb {
    let s = hsl.s / 100.0;
    let l = hsl.l / 100.0;
    let chroma = (1.0 - (2.0 * l - 1.0).abs()) * s;
    from_hue(hsl.h, chroma, l - chroma / 2.0)
}

pub fn rgb_to_hsv(rgb: Rgb) -> Hsv {
    let (r, g, b) = rgb.unit();
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let s = if max == 0.0 { 0.0 } else { delta / max };

    Hsv {
        h: hue(r, g, b, max, delta),
        s: s * 100.0,
        v: max * 100.0,
    }
}

pub fn hsv_to_rgb(hsv: Hsv) -> Rgb {
    let v = hsv.v / 100.0;
    let chroma = v * hsv.s / 100.0;
    from_hue(hsv.h, chroma, v - chroma)
}

pub fn rgb_to_cmyk(rgb: Rgb) -> Cmyk {
    let (r, g, b) = rgb.unit();
    let k = 1.0 - r.max(g).max(b);
    if k >= 1.0 {
        return Cmyk {
            c: 0.0,
            m: 0.0,
            y: 0.0,
            k: 100.0,
        };
    }

    Cmyk {
        c: (1.0 - r - k) / (1.0 - k) * 100.0,
        m: (1.0 - g - k) / (1.0 - k) * 100.0,
        y: (1.0 - b - k) / (1.0 - k) * 100.0,
        k: k * 100.0,
    }
}

pub fn cmyk_to_rgb(cmyk: Cmyk) -> Rgb {
    let k = 1.0 - cmyk.k / 100.0;
    Rgb::from_unit(
        (1.0 - cmyk.c / 100.0) * k,
        (1.0 - cmyk.m / 100.0) * k,
        (1.0 - cmyk.y / 100.0) * k,
    )
}

fn srgb_to_linear(c: f64) -> f64 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

fn linear_to_srgb(c: f64) -> f64 {
    if c <= 0.0031308 {
        12.92 * c
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

pub fn rgb_to_xyz(rgb: Rgb) -> Xyz {
    let (r, g, b) = rgb.unit();
    let (r, g, b) = (srgb_to_linear(r), srgb_to_linear(g), srgb_to_linear(b));

    Xyz {
        x: (0.4124564 * r + 0.3575761 * g + 0.1804375 * b) * 100.0,
        y: (0.2126729 * r + 0.7151522 * g + 0.0721750 * b) * 100.0,
        z: (0.0193339 * r + 0.1191920 * g + 0.9503041 * b) * 100.0,
    }
}

pub fn xyz_to_rgb(xyz: Xyz) -> Rgb {
    let (x, y, z) = (xyz.x / 100.0, xyz.y / 100.0, xyz.z / 100.0);

    let r = 3.2404542 * x - 1.5371385 * y - 0.4985314 * z;
    let g = -0.9692660 * x + 1.8760108 * y + 0.0415560 * z;
    let b = 0.0556434 * x - 0.2040259 * y + 1.0572252 * z;

    Rgb::from_unit(linear_to_srgb(r), linear_to_srgb(g), linear_to_srgb(b))
}

fn lab_f(t: f64) -> f64 {
    if t > LAB_EPSILON {
        t.cbrt()
    } else {
        LAB_KAPPA * t + 16.0 / 116.0
    }
}

fn lab_f_inv(t: f64) -> f64 {
    let cube = t * t * t;
    if cube > LAB_EPSILON {
        cube
    } else {
        (t - 16.0 / 116.0) / LAB_KAPPA
    }
}

pub fn xyz_to_lab(xyz: Xyz) -> Lab {
    let fx = lab_f(xyz.x / D65_WHITE.0);
    let fy = lab_f(xyz.y / D65_WHITE.1);
    let fz = lab_f(xyz.z / D65_WHITE.2);

    Lab {
        l: 116.0 * fy - 16.0,
        a: 500.0 * (fx - fy),
        b: 200.0 * (fy - fz),
    }
}

pub fn lab_to_xyz(lab: Lab) -> Xyz {
    let fy = (lab.l + 16.0) / 116.0;
    let fx = fy + lab.a / 500.0;
    let fz = fy - lab.b / 200.0;

    Xyz {
        x: lab_f_inv(fx) * D65_WHITE.0,
        y: lab_f_inv(fy) * D65_WHITE.1,
        z: lab_f_inv(fz) * D65_WHITE.2,
    }
}

pub fn rgb_to_lab(rgb: Rgb) -> Lab {
    xyz_to_lab(rgb_to_xyz(rgb))
}

pub fn lab_to_rgb(lab: Lab) -> Rgb {
    xyz_to_rgb(lab_to_xyz(lab))
}
