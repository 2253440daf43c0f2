// Tile coordinates and the custom-protocol URL contracts:
// overlay: scheme://base?x={x}&y={y}&z={z}&demType={0|1|2|name}&maxzoom={n}
// terrain: scheme://{height tile url}?demType={0|1|2|name}
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::TileError;
use crate::height::EncodingScheme;

/// Deepest zoom whose tile count still fits the coordinate type.
pub const MAX_ZOOM_LEVEL: u8 = 30;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileCoord {
    pub x: u32,
    pub y: u32,
    pub z: u8,
}

impl TileCoord {
    pub fn new(x: u32, y: u32, z: u8) -> Result<Self, TileError> {
        if z > MAX_ZOOM_LEVEL || x >= Self::tiles_at(z) || y >= Self::tiles_at(z) {
            return Err(TileError::InvalidTileCoord { x, y, z });
        }
        Ok(Self { x, y, z })
    }

    fn tiles_at(z: u8) -> u32 {
        1u32 << z.min(MAX_ZOOM_LEVEL)
    }

    /// West neighbor, wrapping across the antimeridian.
    pub fn left(&self) -> TileCoord {
        let n = Self::tiles_at(self.z);
        TileCoord {
            x: (self.x + n - 1) % n,
            ..*self
        }
    }

    /// East neighbor, wrapping across the antimeridian.
    pub fn right(&self) -> TileCoord {
        let n = Self::tiles_at(self.z);
        TileCoord {
            x: (self.x + 1) % n,
            ..*self
        }
    }

    /// North neighbor; none on the top row.
    pub fn top(&self) -> Option<TileCoord> {
        self.y.checked_sub(1).map(|y| TileCoord { y, ..*self })
    }

    /// South neighbor; none on the bottom row.
    pub fn bottom(&self) -> Option<TileCoord> {
        let y = self.y + 1;
        (y < Self::tiles_at(self.z)).then_some(TileCoord { y, ..*self })
    }
}

/// A parsed protocol request. Absent values fall back to the orchestrator config.
#[derive(Clone, Debug, PartialEq)]
pub struct TileQuery {
    pub coord: TileCoord,
    pub encoding: Option<EncodingScheme>,
    pub maxzoom: Option<u8>,
}

impl TileQuery {
    pub fn new(coord: TileCoord) -> Self {
        Self {
            coord,
            encoding: None,
            maxzoom: None,
        }
    }

    pub fn parse(input: &str) -> Result<Self, TileError> {
        let invalid = |reason: String| TileError::InvalidTileUrl {
            url: input.to_string(),
            reason,
        };
        let url = Url::parse(input).map_err(|e| invalid(e.to_string()))?;

        let mut x = None;
        let mut y = None;
        let mut z = None;
        let mut encoding = None;
        let mut maxzoom = None;

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "x" => x = Some(parse_number::<u32>(&value).ok_or_else(|| invalid(format!("bad x '{}'", value)))?),
                "y" => y = Some(parse_number::<u32>(&value).ok_or_else(|| invalid(format!("bad y '{}'", value)))?),
                "z" => z = Some(parse_number::<u8>(&value).ok_or_else(|| invalid(format!("bad z '{}'", value)))?),
                "demType" => encoding = Some(EncodingScheme::parse(&value)?),
                "maxzoom" => {
                    maxzoom = Some(
                        parse_number::<u8>(&value)
                            .ok_or_else(|| invalid(format!("bad maxzoom '{}'", value)))?,
                    )
                }
                _ => {}
            }
        }

        let (x, y, z) = match (x, y, z) {
            (Some(x), Some(y), Some(z)) => (x, y, z),
            _ => return Err(invalid("x, y and z are required".to_string())),
        };

        Ok(Self {
            coord: TileCoord::new(x, y, z)?,
            encoding,
            maxzoom,
        })
    }
}

/// A terrain protocol request: one height tile to re-encode as Terrain-RGB.
#[derive(Clone, Debug, PartialEq)]
pub struct TerrainQuery {
    /// Height tile URL without the protocol prefix, query or fragment.
    pub image_url: String,
    pub encoding: Option<EncodingScheme>,
}

impl TerrainQuery {
    pub fn parse(input: &str) -> Result<Self, TileError> {
        let invalid = |reason: String| TileError::InvalidTileUrl {
            url: input.to_string(),
            reason,
        };
        // Strip our own scheme when it wraps a full URL.
        let target = match input.split_once("://") {
            Some((_, rest)) if rest.contains("://") => rest,
            _ => input,
        };
        let mut url = Url::parse(target).map_err(|e| invalid(e.to_string()))?;

        let mut encoding = None;
        for (key, value) in url.query_pairs() {
            if key == "demType" {
                encoding = Some(EncodingScheme::parse(&value)?);
            }
        }

        url.set_query(None);
        url.set_fragment(None);
        Ok(Self {
            image_url: url.to_string(),
            encoding,
        })
    }
}

fn parse_number<T: std::str::FromStr>(value: &str) -> Option<T> {
    value.trim().parse().ok()
}
