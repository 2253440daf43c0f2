// This is the models module containing data shared between the request path and the workers
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::colormap::ColorRamp;
use crate::height::{EncodingScheme, TileImage};
use crate::kernel::KernelInput;
use crate::layers::LayerParams;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub tile_count: usize,
    pub max_tiles: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub color_ramps: usize,
    pub textures: usize,
}

/// The three ramps a tile may sample from.
#[derive(Clone, Debug)]
pub struct LayerRamps {
    pub elevation: Arc<ColorRamp>,
    pub slope: Arc<ColorRamp>,
    pub aspect: Arc<ColorRamp>,
}

#[derive(Clone, Debug)]
pub enum JobInput {
    /// Analytic overlay for one tile and its neighbors.
    Overlay(KernelInput),
    /// One height tile, re-encoded as Terrain-RGB for 3D terrain.
    Terrain {
        image: Arc<TileImage>,
        encoding: EncodingScheme,
    },
}

/// Everything one worker invocation needs, tagged with the id its reply carries.
#[derive(Clone, Debug)]
pub struct WorkerJob {
    pub tile_id: String,
    pub input: JobInput,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WorkerReply {
    pub id: String,
    pub result: Result<Vec<u8>, String>,
}

impl WorkerReply {
    pub fn ok(id: String, png: Vec<u8>) -> Self {
        Self { id, result: Ok(png) }
    }

    pub fn error(id: String, message: String) -> Self {
        Self {
            id,
            result: Err(message),
        }
    }
}

/// A tile image handed over by the JS side: inline RGBA pixels, or the URL of
/// a tile stored earlier with `store_tile`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ImageRef {
    Inline {
        width: usize,
        height: usize,
        data: Vec<u8>,
    },
    Cached {
        url: String,
    },
}

/// Encoding given either by wire id or by name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DemType {
    Id(u32),
    Name(String),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderRequest {
    pub tile_id: String,
    pub center: ImageRef,
    #[serde(default)]
    pub left: Option<ImageRef>,
    #[serde(default)]
    pub right: Option<ImageRef>,
    #[serde(default)]
    pub top: Option<ImageRef>,
    #[serde(default)]
    pub bottom: Option<ImageRef>,
    pub z: u8,
    #[serde(default)]
    pub maxzoom: u8,
    pub dem_type: DemType,
    #[serde(default)]
    pub params: LayerParams,
    #[serde(default)]
    pub flood_texture: Option<ImageRef>,
    #[serde(default)]
    pub center_only: bool,
}
