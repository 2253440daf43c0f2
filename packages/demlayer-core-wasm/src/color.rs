// Color strings to normalized RGBA
use nalgebra::Vector4;

use crate::error::TileError;

/// Straight-alpha color, every channel in [0, 1].
pub type Rgba = Vector4<f32>;

const NAMED: &[(&str, [u8; 3])] = &[
    ("black", [0, 0, 0]),
    ("white", [255, 255, 255]),
    ("red", [255, 0, 0]),
    ("green", [0, 128, 0]),
    ("lime", [0, 255, 0]),
    ("blue", [0, 0, 255]),
    ("yellow", [255, 255, 0]),
    ("cyan", [0, 255, 255]),
    ("aqua", [0, 255, 255]),
    ("magenta", [255, 0, 255]),
    ("orange", [255, 165, 0]),
    ("gray", [128, 128, 128]),
    ("grey", [128, 128, 128]),
    ("navy", [0, 0, 128]),
    ("brown", [165, 42, 42]),
];

/// Parses `#rgb`, `#rgba`, `#rrggbb`, `#rrggbbaa` or a basic CSS color name.
pub fn parse_color(input: &str) -> Result<Rgba, TileError> {
    let trimmed = input.trim();
    let lower = trimmed.to_ascii_lowercase();

    if lower == "transparent" {
        return Ok(Rgba::zeros());
    }
    if let Some((_, [r, g, b])) = NAMED.iter().find(|(name, _)| *name == lower) {
        return Ok(from_bytes(*r, *g, *b, 255));
    }

    let hex = lower
        .strip_prefix('#')
        .ok_or_else(|| TileError::InvalidColor(input.to_string()))?;
    let digits: Vec<u8> = hex
        .chars()
        .map(|c| c.to_digit(16).map(|d| d as u8))
        .collect::<Option<_>>()
        .ok_or_else(|| TileError::InvalidColor(input.to_string()))?;

    let channels: Vec<u8> = match digits.len() {
        3 | 4 => digits.iter().map(|d| d * 17).collect(),
        6 | 8 => digits.chunks(2).map(|pair| pair[0] * 16 + pair[1]).collect(),
        _ => return Err(TileError::InvalidColor(input.to_string())),
    };
    let alpha = channels.get(3).copied().unwrap_or(255);
    Ok(from_bytes(channels[0], channels[1], channels[2], alpha))
}

pub fn from_bytes(r: u8, g: u8, b: u8, a: u8) -> Rgba {
    Rgba::new(r as f32, g as f32, b as f32, a as f32) / 255.0
}

/// Clamps to [0, 1] and quantizes the way a framebuffer write does.
pub fn to_bytes(color: &Rgba) -> [u8; 4] {
    let q = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    [q(color.x), q(color.y), q(color.z), q(color.w)]
}
