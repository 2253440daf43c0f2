// Height tile decoding: RGBA pixels to elevations in meters
use std::io::Cursor;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use crate::error::TileError;

/// Edge length of every height tile and every rendered tile.
pub const TILE_SIZE: usize = 256;

/// Value written into a height window for cells holding the NoData sentinel.
pub const NO_DATA_HEIGHT: f32 = -9999.0;

const GSI_WRAP: f64 = 16_777_216.0; // 2^24
const GSI_SIGN: f64 = 8_388_608.0; // 2^23

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct Rgba8 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba8 {
    pub const TRANSPARENT: Rgba8 = Rgba8 { r: 0, g: 0, b: 0, a: 0 };

    pub fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    fn packed_rgb(&self) -> u32 {
        (self.r as u32) * 65536 + (self.g as u32) * 256 + (self.b as u32)
    }
}

/// How an elevation is packed into the RGB channels of a height tile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodingScheme {
    /// Mapbox Terrain-RGB: 0.1 m steps from -10000 m.
    Mapbox,
    /// GSI elevation tiles: signed 24-bit, 0.01 m steps, (128, 0, 0) = no data.
    Gsi,
    /// Terrarium: R·256 + G + B/256 - 32768 m.
    Terrarium,
}

impl EncodingScheme {
    pub fn id(&self) -> u32 {
        match self {
            EncodingScheme::Mapbox => 0,
            EncodingScheme::Gsi => 1,
            EncodingScheme::Terrarium => 2,
        }
    }

    /// Accepts the numeric wire id or the scheme name used by tile URLs.
    pub fn parse(value: &str) -> Result<Self, TileError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mapbox" => Ok(EncodingScheme::Mapbox),
            "gsi" => Ok(EncodingScheme::Gsi),
            "terrarium" => Ok(EncodingScheme::Terrarium),
            other => {
                let id = other
                    .parse::<u32>()
                    .map_err(|_| TileError::Config(format!("unknown encoding '{}'", value)))?;
                EncodingScheme::try_from(id)
            }
        }
    }

    /// Decodes one pixel. `None` is the NoData sentinel (GSI only).
    pub fn decode(&self, px: Rgba8) -> Option<f32> {
        match self {
            EncodingScheme::Mapbox => Some((-10000.0 + px.packed_rgb() as f64 * 0.1) as f32),
            EncodingScheme::Gsi => {
                if px.r == 128 && px.g == 0 && px.b == 0 {
                    return None;
                }
                let total = px.packed_rgb() as f64;
                let signed = if total >= GSI_SIGN { total - GSI_WRAP } else { total };
                Some((signed * 0.01) as f32)
            }
            EncodingScheme::Terrarium => {
                let value =
                    px.r as f64 * 256.0 + px.g as f64 + px.b as f64 / 256.0 - 32768.0;
                Some(value as f32)
            }
        }
    }

    /// Height used inside a 3x3 window, with NoData mapped to [`NO_DATA_HEIGHT`].
    pub fn decode_or_sentinel(&self, px: Rgba8) -> f32 {
        self.decode(px).unwrap_or(NO_DATA_HEIGHT)
    }

    /// Forward mapping, used to build synthetic tiles. Out of range heights saturate.
    pub fn encode(&self, height: f32) -> [u8; 3] {
        let height = height as f64;
        let total: u32 = match self {
            EncodingScheme::Mapbox => ((height + 10000.0) / 0.1).round().clamp(0.0, GSI_WRAP - 1.0) as u32,
            EncodingScheme::Gsi => {
                let steps = (height / 0.01).round().clamp(-(GSI_SIGN - 1.0), GSI_SIGN - 1.0);
                if steps < 0.0 {
                    (steps + GSI_WRAP) as u32
                } else {
                    steps as u32
                }
            }
            EncodingScheme::Terrarium => {
                let value = (height + 32768.0).clamp(0.0, 65535.0 + 255.0 / 256.0);
                let whole = value.floor();
                let r = (whole / 256.0).floor();
                let g = whole - r * 256.0;
                let b = ((value - whole) * 256.0).round().min(255.0);
                return [r as u8, g as u8, b as u8];
            }
        };
        [(total >> 16) as u8, (total >> 8) as u8, total as u8]
    }
}

impl TryFrom<u32> for EncodingScheme {
    type Error = TileError;

    fn try_from(id: u32) -> Result<Self, Self::Error> {
        match id {
            0 => Ok(EncodingScheme::Mapbox),
            1 => Ok(EncodingScheme::Gsi),
            2 => Ok(EncodingScheme::Terrarium),
            other => Err(TileError::UnsupportedEncoding(other)),
        }
    }
}

/// RGBA8 raster, row-major, top row first.
#[derive(Clone, Debug, PartialEq)]
pub struct TileImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl TileImage {
    pub fn new(width: usize, height: usize, data: Vec<u8>) -> Result<Self, TileError> {
        if width == 0 || height == 0 || data.len() != width * height * 4 {
            return Err(TileError::ImageDecode(format!(
                "expected {}x{} RGBA buffer, got {} bytes",
                width,
                height,
                data.len()
            )));
        }
        Ok(Self { width, height, data })
    }

    /// 1x1 fully transparent stand-in for a neighbor that is missing.
    pub fn placeholder() -> Self {
        Self {
            width: 1,
            height: 1,
            data: vec![0; 4],
        }
    }

    pub fn filled(width: usize, height: usize, px: Rgba8) -> Self {
        let data = std::iter::repeat([px.r, px.g, px.b, px.a])
            .take(width * height)
            .flatten()
            .collect();
        Self { width, height, data }
    }

    /// Builds a 256x256 tile from a height function over (col, row).
    pub fn from_heights<F>(scheme: EncodingScheme, mut height_at: F) -> Self
    where
        F: FnMut(usize, usize) -> f32,
    {
        let mut data = Vec::with_capacity(TILE_SIZE * TILE_SIZE * 4);
        for row in 0..TILE_SIZE {
            for col in 0..TILE_SIZE {
                let [r, g, b] = scheme.encode(height_at(col, row));
                data.extend_from_slice(&[r, g, b, 255]);
            }
        }
        Self {
            width: TILE_SIZE,
            height: TILE_SIZE,
            data,
        }
    }

    pub fn from_png(bytes: &[u8]) -> Result<Self, TileError> {
        let decoded = image::load_from_memory(bytes)?.to_rgba8();
        let (width, height) = decoded.dimensions();
        Self::new(width as usize, height as usize, decoded.into_raw())
    }

    /// PNG at the image's own size.
    pub fn to_png(&self) -> Result<Vec<u8>, TileError> {
        write_png(self.width, self.height, self.data.clone())
    }

    pub fn into_shared(self) -> Arc<TileImage> {
        Arc::new(self)
    }

    pub fn is_placeholder(&self) -> bool {
        self.width == 1 && self.height == 1
    }

    pub fn pixels(&self) -> &[Rgba8] {
        bytemuck::cast_slice(&self.data)
    }

    /// Pixel at tile coordinates (0..256), scaled onto this image's own size.
    pub fn tile_pixel(&self, col: usize, row: usize) -> Rgba8 {
        let x = (col * self.width / TILE_SIZE).min(self.width - 1);
        let y = (row * self.height / TILE_SIZE).min(self.height - 1);
        self.pixels()[y * self.width + x]
    }
}

/// Encodes a raw 256x256 RGBA buffer as PNG.
pub fn encode_png(rgba: Vec<u8>) -> Result<Vec<u8>, TileError> {
    write_png(TILE_SIZE, TILE_SIZE, rgba)
}

fn write_png(width: usize, height: usize, rgba: Vec<u8>) -> Result<Vec<u8>, TileError> {
    let img = image::RgbaImage::from_raw(width as u32, height as u32, rgba)
        .ok_or_else(|| TileError::ImageEncode("buffer does not match image size".to_string()))?;
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .map_err(|e| TileError::ImageEncode(e.to_string()))?;
    Ok(bytes)
}
