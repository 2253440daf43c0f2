use std::sync::Arc;

use lazy_static::lazy_static;

use crate::cache_manager::{ColorRampCache, TileImageCache};
use crate::colormap::BuiltinPalettes;
use crate::error::TileError;
use crate::height::{EncodingScheme, TileImage};
use crate::kernel::KernelInput;
use crate::models::{CacheStats, DemType, ImageRef, JobInput, LayerRamps, RenderRequest, WorkerJob};
use crate::neighbors::NeighborSet;

// Caches shared by every call into the wasm bridge. Native callers build an
// Orchestrator with its own caches instead.
pub struct ModuleState {
    pub tiles: TileImageCache,
    pub ramps: ColorRampCache,
}

// Create a global static instance of the module state
lazy_static! {
    static ref MODULE_STATE: ModuleState = ModuleState::new();
}

impl DemType {
    pub fn scheme(&self) -> Result<EncodingScheme, TileError> {
        match self {
            DemType::Id(id) => EncodingScheme::try_from(*id),
            DemType::Name(name) => EncodingScheme::parse(name),
        }
    }
}

impl ModuleState {
    pub fn new() -> Self {
        ModuleState {
            tiles: TileImageCache::default(),
            ramps: ColorRampCache::new(Arc::new(BuiltinPalettes)),
        }
    }

    pub fn global() -> &'static ModuleState {
        &MODULE_STATE
    }

    pub fn store_tile(&self, url: &str, image: TileImage) {
        self.tiles.add(url.to_string(), image.into_shared());
    }

    fn resolve(&self, image: &ImageRef) -> Result<Arc<TileImage>, TileError> {
        match image {
            ImageRef::Inline {
                width,
                height,
                data,
            } => Ok(TileImage::new(*width, *height, data.clone())?.into_shared()),
            ImageRef::Cached { url } => self.tiles.get(url).ok_or_else(|| TileError::Fetch {
                url: url.clone(),
                reason: "tile is not cached".to_string(),
            }),
        }
    }

    // Missing or unusable neighbors fall back to the placeholder.
    fn resolve_neighbor(&self, image: Option<&ImageRef>) -> Arc<TileImage> {
        match image.map(|image| self.resolve(image)) {
            Some(Ok(tile)) => tile,
            Some(Err(err)) => {
                console_warn!("Neighbor tile unavailable, using placeholder: {}", err);
                TileImage::placeholder().into_shared()
            }
            None => TileImage::placeholder().into_shared(),
        }
    }

    /// Turns a bridge request into a kernel job, resolving ramps from the shared cache.
    pub fn build_job(&self, request: RenderRequest) -> Result<WorkerJob, TileError> {
        let encoding = request.dem_type.scheme()?;
        let center = self.resolve(&request.center)?;
        let images = if request.center_only {
            NeighborSet::center_only(center)
        } else {
            NeighborSet::new(
                center,
                self.resolve_neighbor(request.left.as_ref()),
                self.resolve_neighbor(request.right.as_ref()),
                self.resolve_neighbor(request.top.as_ref()),
                self.resolve_neighbor(request.bottom.as_ref()),
            )
        };

        let params = request.params;
        let ramps = LayerRamps {
            elevation: self
                .ramps
                .get_or_generate(&params.elevation.color_map.name, params.elevation.color_map.reverse)?,
            slope: self
                .ramps
                .get_or_generate(&params.slope.color_map.name, params.slope.color_map.reverse)?,
            aspect: self
                .ramps
                .get_or_generate(&params.aspect.color_map.name, params.aspect.color_map.reverse)?,
        };
        let flood_texture = match (&request.flood_texture, params.flooding.visible) {
            (Some(texture), true) => Some(self.resolve(texture)?),
            _ => None,
        };

        Ok(WorkerJob {
            tile_id: request.tile_id,
            input: JobInput::Overlay(KernelInput {
                images,
                zoom: request.z,
                maxzoom: request.maxzoom,
                encoding,
                params: Arc::new(params),
                ramps,
                flood_texture,
                center_only: request.center_only,
            }),
        })
    }

    pub fn stats(&self) -> CacheStats {
        let (hits, misses) = self.tiles.stats();
        let total = hits + misses;
        CacheStats {
            tile_count: self.tiles.len(),
            max_tiles: self.tiles.capacity(),
            hits,
            misses,
            hit_rate: if total > 0 { hits as f64 / total as f64 } else { 0.0 },
            color_ramps: self.ramps.len(),
            textures: 0,
        }
    }

    pub fn clear_all_caches(&self) {
        self.tiles.clear();
        self.ramps.clear();
    }
}

impl Default for ModuleState {
    fn default() -> Self {
        Self::new()
    }
}
