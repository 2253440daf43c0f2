//! Named palettes and the 256-entry color ramps built from them.
//!
//! A ramp is generated once per `(palette, reverse)` pair and then shared
//! read-only (see [`crate::cache_manager::ColorRampCache`]).

use std::sync::Arc;

use nalgebra::Vector3;

use crate::error::TileError;

/// Number of entries in every ramp.
pub const RAMP_SIZE: usize = 256;

/// Produces `steps` RGB colors for a palette name.
pub trait PaletteSource: Send + Sync {
    fn generate(&self, name: &str, steps: usize) -> Result<Vec<[u8; 3]>, TileError>;
}

type Stop = (f32, [u8; 3]);

// Stops are (position, color) pairs in ascending position, first 0 and last 1.
const PALETTES: &[(&str, &[Stop])] = &[
    (
        "jet",
        &[
            (0.0, [0, 0, 131]),
            (0.125, [0, 60, 170]),
            (0.375, [5, 255, 255]),
            (0.625, [255, 255, 0]),
            (0.875, [250, 0, 0]),
            (1.0, [128, 0, 0]),
        ],
    ),
    (
        "hot",
        &[
            (0.0, [0, 0, 0]),
            (0.3, [230, 0, 0]),
            (0.6, [255, 210, 0]),
            (1.0, [255, 255, 255]),
        ],
    ),
    ("greys", &[(0.0, [0, 0, 0]), (1.0, [255, 255, 255])]),
    (
        "bone",
        &[
            (0.0, [0, 0, 0]),
            (0.376, [84, 84, 116]),
            (0.753, [169, 200, 200]),
            (1.0, [255, 255, 255]),
        ],
    ),
    ("copper", &[(0.0, [0, 0, 0]), (0.804, [255, 160, 102]), (1.0, [255, 199, 127])]),
    (
        "cool",
        &[
            (0.0, [125, 0, 179]),
            (0.13, [116, 0, 218]),
            (0.25, [98, 74, 237]),
            (0.38, [68, 146, 231]),
            (0.5, [0, 204, 197]),
            (0.63, [0, 247, 146]),
            (0.75, [0, 255, 88]),
            (0.88, [40, 255, 8]),
            (1.0, [147, 255, 0]),
        ],
    ),
    (
        "warm",
        &[
            (0.0, [125, 0, 179]),
            (0.13, [172, 0, 187]),
            (0.25, [219, 0, 170]),
            (0.38, [255, 0, 130]),
            (0.5, [255, 63, 74]),
            (0.63, [255, 123, 0]),
            (0.75, [234, 176, 0]),
            (0.88, [190, 228, 0]),
            (1.0, [147, 255, 0]),
        ],
    ),
    (
        "viridis",
        &[
            (0.0, [68, 1, 84]),
            (0.13, [71, 44, 122]),
            (0.25, [59, 81, 139]),
            (0.38, [44, 113, 142]),
            (0.5, [33, 144, 141]),
            (0.63, [39, 173, 129]),
            (0.75, [92, 200, 99]),
            (0.88, [170, 220, 50]),
            (1.0, [253, 231, 37]),
        ],
    ),
    (
        "magma",
        &[
            (0.0, [0, 0, 4]),
            (0.13, [28, 16, 68]),
            (0.25, [79, 18, 123]),
            (0.38, [129, 37, 129]),
            (0.5, [181, 54, 122]),
            (0.63, [229, 80, 100]),
            (0.75, [251, 135, 97]),
            (0.88, [254, 194, 135]),
            (1.0, [252, 253, 191]),
        ],
    ),
    (
        "inferno",
        &[
            (0.0, [0, 0, 4]),
            (0.13, [31, 12, 72]),
            (0.25, [85, 15, 109]),
            (0.38, [136, 34, 106]),
            (0.5, [186, 54, 85]),
            (0.63, [227, 89, 51]),
            (0.75, [249, 140, 10]),
            (0.88, [249, 201, 50]),
            (1.0, [252, 255, 164]),
        ],
    ),
    (
        "plasma",
        &[
            (0.0, [13, 8, 135]),
            (0.13, [75, 3, 161]),
            (0.25, [125, 3, 168]),
            (0.38, [168, 34, 150]),
            (0.5, [203, 70, 121]),
            (0.63, [229, 107, 93]),
            (0.75, [248, 148, 65]),
            (0.88, [253, 195, 40]),
            (1.0, [240, 249, 33]),
        ],
    ),
    (
        "earth",
        &[
            (0.0, [0, 0, 130]),
            (0.1, [0, 180, 180]),
            (0.2, [40, 210, 40]),
            (0.4, [230, 230, 50]),
            (0.6, [120, 70, 20]),
            (1.0, [255, 255, 255]),
        ],
    ),
    ("bluered", &[(0.0, [0, 0, 255]), (1.0, [255, 0, 0])]),
    (
        "rdbu",
        &[
            (0.0, [5, 10, 172]),
            (0.35, [106, 137, 247]),
            (0.5, [190, 190, 190]),
            (0.6, [220, 170, 132]),
            (0.7, [230, 145, 90]),
            (1.0, [178, 10, 28]),
        ],
    ),
    (
        "bathymetry",
        &[
            (0.0, [40, 26, 44]),
            (0.13, [59, 49, 90]),
            (0.25, [64, 76, 139]),
            (0.38, [63, 110, 151]),
            (0.5, [72, 142, 158]),
            (0.63, [85, 174, 163]),
            (0.75, [120, 206, 163]),
            (0.88, [187, 230, 172]),
            (1.0, [253, 254, 204]),
        ],
    ),
    (
        "phase",
        &[
            (0.0, [145, 105, 18]),
            (0.13, [184, 71, 38]),
            (0.25, [186, 58, 115]),
            (0.38, [160, 71, 185]),
            (0.5, [110, 97, 218]),
            (0.63, [50, 123, 164]),
            (0.75, [31, 131, 110]),
            (0.88, [77, 129, 34]),
            (1.0, [145, 105, 18]),
        ],
    ),
];

/// Palettes compiled into the crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct BuiltinPalettes;

impl BuiltinPalettes {
    pub fn names() -> impl Iterator<Item = &'static str> {
        PALETTES.iter().map(|(name, _)| *name)
    }
}

impl PaletteSource for BuiltinPalettes {
    fn generate(&self, name: &str, steps: usize) -> Result<Vec<[u8; 3]>, TileError> {
        let stops = PALETTES
            .iter()
            .find(|(candidate, _)| *candidate == name)
            .map(|(_, stops)| *stops)
            .ok_or_else(|| TileError::UnknownPalette(name.to_string()))?;
        Ok((0..steps)
            .map(|i| {
                let t = if steps > 1 { i as f32 / (steps - 1) as f32 } else { 0.0 };
                interpolate_stops(stops, t)
            })
            .collect())
    }
}

fn interpolate_stops(stops: &[Stop], t: f32) -> [u8; 3] {
    let upper = stops
        .iter()
        .position(|(pos, _)| *pos >= t)
        .unwrap_or(stops.len() - 1);
    if upper == 0 {
        return stops[0].1;
    }
    let (p0, c0) = stops[upper - 1];
    let (p1, c1) = stops[upper];
    let f = if p1 > p0 { (t - p0) / (p1 - p0) } else { 0.0 };
    let mix = |a: u8, b: u8| (a as f32 + (b as f32 - a as f32) * f).round() as u8;
    [mix(c0[0], c1[0]), mix(c0[1], c1[1]), mix(c0[2], c1[2])]
}

/// Immutable 256x1 RGB lookup table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColorRamp {
    entries: Arc<[u8]>,
}

impl ColorRamp {
    pub fn generate(source: &dyn PaletteSource, palette: &str, reverse: bool) -> Result<Self, TileError> {
        let mut colors = source.generate(palette, RAMP_SIZE)?;
        if colors.len() != RAMP_SIZE {
            return Err(TileError::UnknownPalette(format!(
                "{} produced {} colors",
                palette,
                colors.len()
            )));
        }
        if reverse {
            colors.reverse();
        }
        let entries: Vec<u8> = colors.into_iter().flatten().collect();
        Ok(Self {
            entries: entries.into(),
        })
    }

    /// Raw RGB bytes, 3 per entry.
    pub fn as_bytes(&self) -> &[u8] {
        &self.entries
    }

    pub fn entry(&self, index: usize) -> [u8; 3] {
        let i = index.min(RAMP_SIZE - 1) * 3;
        [self.entries[i], self.entries[i + 1], self.entries[i + 2]]
    }

    /// Linear lookup at `t` in [0, 1], texel centers at (i + 0.5) / 256.
    pub fn sample(&self, t: f32) -> Vector3<f32> {
        let pos = (t.clamp(0.0, 1.0) * RAMP_SIZE as f32 - 0.5).clamp(0.0, (RAMP_SIZE - 1) as f32);
        let i0 = pos.floor() as usize;
        let i1 = (i0 + 1).min(RAMP_SIZE - 1);
        let f = pos - i0 as f32;
        let to_vec = |c: [u8; 3]| Vector3::new(c[0] as f32, c[1] as f32, c[2] as f32) / 255.0;
        to_vec(self.entry(i0)).lerp(&to_vec(self.entry(i1)), f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_builtin_generates_a_full_ramp() {
        for name in BuiltinPalettes::names() {
            let ramp = ColorRamp::generate(&BuiltinPalettes, name, false).expect(name);
            assert_eq!(ramp.as_bytes().len(), RAMP_SIZE * 3);
        }
    }

    #[test]
    fn ramp_ends_match_first_and_last_stop() {
        let ramp = ColorRamp::generate(&BuiltinPalettes, "jet", false).unwrap();
        assert_eq!(ramp.entry(0), [0, 0, 131]);
        assert_eq!(ramp.entry(255), [128, 0, 0]);
    }

    #[test]
    fn reverse_is_an_exact_reversal() {
        let forward = ColorRamp::generate(&BuiltinPalettes, "viridis", false).unwrap();
        let backward = ColorRamp::generate(&BuiltinPalettes, "viridis", true).unwrap();
        for i in 0..RAMP_SIZE {
            assert_eq!(forward.entry(i), backward.entry(RAMP_SIZE - 1 - i));
        }
    }

    #[test]
    fn unknown_palette_is_reported() {
        assert_eq!(
            ColorRamp::generate(&BuiltinPalettes, "nope", false),
            Err(TileError::UnknownPalette("nope".to_string()))
        );
    }

    #[test]
    fn sample_interpolates_between_texels() {
        let ramp = ColorRamp::generate(&BuiltinPalettes, "greys", false).unwrap();
        let mid = ramp.sample(0.5);
        let expected = (ramp.entry(127)[0] as f32 + ramp.entry(128)[0] as f32) / 2.0 / 255.0;
        assert!((mid.x - expected).abs() < 1e-6);
        assert_eq!(ramp.sample(0.0).x, ramp.entry(0)[0] as f32 / 255.0);
        assert_eq!(ramp.sample(1.0).x, ramp.entry(255)[0] as f32 / 255.0);
    }
}
