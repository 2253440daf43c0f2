//! Tile request orchestration.
//!
//! A request fetches the center tile and its four neighbors concurrently
//! (through the tile cache), resolves the color ramps and the optional flood
//! texture, hands one job to the worker pool and waits for the reply that
//! carries its job id. Terrain requests take the same path with a single
//! tile and a re-encode job. Cancellation aborts in-flight fetches and the
//! wait, but never a job that is already running on a worker.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::channel::oneshot;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::cache_keys::make_tile_url;
use crate::cache_manager::{
    ColorRampCache, TextureAssetCache, TileImageCache, DEFAULT_TILE_CACHE_CAPACITY,
};
use crate::cancellation::CancellationToken;
use crate::colormap::BuiltinPalettes;
use crate::error::TileError;
use crate::height::{EncodingScheme, TileImage};
use crate::kernel::KernelInput;
use crate::layers::{ColorMapParam, LayerParams};
use crate::models::{CacheStats, JobInput, LayerRamps, WorkerJob, WorkerReply};
use crate::neighbors::NeighborSet;
use crate::protocol::{TerrainQuery, TileCoord, TileQuery};
use crate::worker_pool::{ReplyHandler, WorkerPool, DEFAULT_POOL_SIZE};

/// Fetches one encoded height tile and decodes it.
pub trait TileLoader: Send + Sync {
    fn load(&self, url: &str) -> impl Future<Output = Result<TileImage, TileError>> + Send;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrchestratorConfig {
    /// Height tile URL with `{z}`, `{x}` and `{y}` placeholders.
    pub tile_url_template: String,
    /// Used when a request does not name its encoding.
    pub encoding: EncodingScheme,
    pub max_zoom: u8,
    /// Skip neighbor fetches and clamp sampling inside the center tile.
    pub center_only: bool,
    pub pool_size: usize,
    pub tile_cache_capacity: usize,
    /// Flood texture URLs by logical name.
    pub flood_textures: HashMap<String, String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            tile_url_template: String::new(),
            encoding: EncodingScheme::Mapbox,
            max_zoom: 15,
            center_only: false,
            pool_size: DEFAULT_POOL_SIZE,
            tile_cache_capacity: DEFAULT_TILE_CACHE_CAPACITY,
            flood_textures: HashMap::new(),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_json(json: &str) -> Result<Self, TileError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| TileError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TileError> {
        for placeholder in ["{z}", "{x}", "{y}"] {
            if !self.tile_url_template.contains(placeholder) {
                return Err(TileError::Config(format!(
                    "tile url template '{}' is missing {}",
                    self.tile_url_template, placeholder
                )));
            }
        }
        if self.pool_size == 0 {
            return Err(TileError::Config("pool size must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestState {
    Created,
    FetchingNeighbors,
    Dispatched,
    Resolved,
    Rejected,
    Cancelled,
}

impl RequestState {
    pub fn name(&self) -> &'static str {
        match self {
            RequestState::Created => "created",
            RequestState::FetchingNeighbors => "fetching-neighbors",
            RequestState::Dispatched => "dispatched",
            RequestState::Resolved => "resolved",
            RequestState::Rejected => "rejected",
            RequestState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestState::Resolved | RequestState::Rejected | RequestState::Cancelled
        )
    }

    fn can_become(&self, next: RequestState) -> bool {
        use RequestState::*;
        matches!(
            (self, next),
            (Created, FetchingNeighbors)
                | (FetchingNeighbors, Dispatched)
                | (Dispatched, Resolved)
                | (Created | FetchingNeighbors | Dispatched, Rejected)
                | (Created | FetchingNeighbors | Dispatched, Cancelled)
        )
    }
}

/// One in-flight request, identified by the URL of its center tile.
#[derive(Debug)]
pub struct TileRequest {
    pub id: String,
    pub token: CancellationToken,
    state: RequestState,
}

impl TileRequest {
    pub fn new(id: String, token: CancellationToken) -> Self {
        Self {
            id,
            token,
            state: RequestState::Created,
        }
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    /// Pending-map key and worker job id. Two requests for the same tile
    /// never share one, so each reply finds the request that posted it.
    pub fn job_id(&self) -> String {
        format!("{}#{}", self.id, self.token.id)
    }

    pub fn transition(&mut self, next: RequestState) -> Result<(), TileError> {
        if !self.state.can_become(next) {
            return Err(TileError::InvalidTransition {
                id: self.id.clone(),
                from: self.state.name(),
                to: next.name(),
            });
        }
        self.state = next;
        Ok(())
    }
}

struct PendingEntry {
    sender: oneshot::Sender<Result<Vec<u8>, String>>,
    token: CancellationToken,
}

type PendingMap = Arc<Mutex<HashMap<String, PendingEntry>>>;

/// Hands a worker reply to the request waiting on its job id.
/// Returns false (after a warning) when nobody is waiting any more.
fn route_reply(pending: &Mutex<HashMap<String, PendingEntry>>, reply: WorkerReply) -> bool {
    let entry = pending.lock().remove(&reply.id);
    match entry {
        Some(entry) => {
            // The receiver is gone only if the request was dropped mid-wait.
            let _ = entry.sender.send(reply.result);
            true
        }
        None => {
            console_warn!("Received reply for unknown job {}", reply.id);
            false
        }
    }
}

pub struct Orchestrator<L: TileLoader> {
    config: OrchestratorConfig,
    loader: L,
    tiles: Arc<TileImageCache>,
    ramps: Arc<ColorRampCache>,
    textures: Arc<TextureAssetCache>,
    params: RwLock<Arc<LayerParams>>,
    pending: PendingMap,
    active: Mutex<HashMap<String, CancellationToken>>,
    pool: WorkerPool,
}

impl<L: TileLoader> Orchestrator<L> {
    pub fn new(config: OrchestratorConfig, loader: L) -> Result<Self, TileError> {
        let tiles = Arc::new(TileImageCache::new(config.tile_cache_capacity));
        let ramps = Arc::new(ColorRampCache::new(Arc::new(BuiltinPalettes)));
        let textures = Arc::new(TextureAssetCache::new());
        Self::with_caches(config, loader, tiles, ramps, textures)
    }

    /// Builds an orchestrator around caches owned by the caller.
    pub fn with_caches(
        config: OrchestratorConfig,
        loader: L,
        tiles: Arc<TileImageCache>,
        ramps: Arc<ColorRampCache>,
        textures: Arc<TextureAssetCache>,
    ) -> Result<Self, TileError> {
        config.validate()?;
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let routes = pending.clone();
        let handler: ReplyHandler = Arc::new(move |reply: WorkerReply| {
            route_reply(&routes, reply);
        });
        let pool = WorkerPool::new(config.pool_size, handler)?;

        Ok(Self {
            config,
            loader,
            tiles,
            ramps,
            textures,
            params: RwLock::new(Arc::new(LayerParams::default())),
            pending,
            active: Mutex::new(HashMap::new()),
            pool,
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn tile_cache(&self) -> &Arc<TileImageCache> {
        &self.tiles
    }

    /// Parameters that later requests will render with.
    pub fn set_layer_params(&self, params: LayerParams) {
        *self.params.write() = Arc::new(params);
    }

    pub fn layer_params(&self) -> Arc<LayerParams> {
        self.params.read().clone()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Parses a protocol URL and renders the tile it names.
    pub async fn request_url(&self, url: &str, token: CancellationToken) -> Result<Vec<u8>, TileError> {
        let query = TileQuery::parse(url)?;
        self.request(query, token).await
    }

    /// Renders one tile to PNG bytes.
    pub async fn request(&self, query: TileQuery, token: CancellationToken) -> Result<Vec<u8>, TileError> {
        let id = make_tile_url(&self.config.tile_url_template, &query.coord);
        let mut request = self.begin(id, token);
        let outcome = self.run_request(&mut request, &query).await;
        self.finish(request, outcome)
    }

    /// Serves a terrain protocol URL: the single height tile it names,
    /// re-encoded as Mapbox Terrain-RGB PNG.
    pub async fn request_terrain(&self, url: &str, token: CancellationToken) -> Result<Vec<u8>, TileError> {
        let query = TerrainQuery::parse(url)?;
        let mut request = self.begin(query.image_url.clone(), token);
        let outcome = self.run_terrain(&mut request, &query).await;
        self.finish(request, outcome)
    }

    fn begin(&self, id: String, token: CancellationToken) -> TileRequest {
        self.active.lock().insert(token.id.clone(), token.clone());
        TileRequest::new(id, token)
    }

    fn finish(
        &self,
        mut request: TileRequest,
        outcome: Result<Vec<u8>, TileError>,
    ) -> Result<Vec<u8>, TileError> {
        self.active.lock().remove(&request.token.id);
        let next = match &outcome {
            Ok(_) => RequestState::Resolved,
            Err(err) if err.is_cancelled() => RequestState::Cancelled,
            Err(_) => RequestState::Rejected,
        };
        request.transition(next)?;
        outcome
    }

    async fn run_request(&self, request: &mut TileRequest, query: &TileQuery) -> Result<Vec<u8>, TileError> {
        let token = request.token.clone();
        let encoding = query.encoding.unwrap_or(self.config.encoding);
        let maxzoom = query.maxzoom.unwrap_or(self.config.max_zoom);

        request.transition(RequestState::FetchingNeighbors)?;
        let images = token.run(self.fetch_neighbors(&query.coord)).await??;

        let params = self.layer_params();
        let ramps = self.resolve_ramps(&params)?;
        let flood_texture = if params.flooding.visible {
            token.run(self.flood_texture(&params.flooding.texture)).await?
        } else {
            None
        };
        token.throw_if_cancelled()?;

        let input = JobInput::Overlay(KernelInput {
            images,
            zoom: query.coord.z,
            maxzoom,
            encoding,
            params,
            ramps,
            flood_texture,
            center_only: self.config.center_only,
        });
        self.dispatch_and_wait(request, input).await
    }

    async fn run_terrain(&self, request: &mut TileRequest, query: &TerrainQuery) -> Result<Vec<u8>, TileError> {
        let token = request.token.clone();
        request.transition(RequestState::FetchingNeighbors)?;
        let image = token.run(self.fetch_tile(&query.image_url)).await??;
        token.throw_if_cancelled()?;

        let input = JobInput::Terrain {
            image,
            encoding: query.encoding.unwrap_or(self.config.encoding),
        };
        self.dispatch_and_wait(request, input).await
    }

    async fn dispatch_and_wait(&self, request: &mut TileRequest, input: JobInput) -> Result<Vec<u8>, TileError> {
        let token = request.token.clone();
        let job_id = request.job_id();
        request.transition(RequestState::Dispatched)?;

        let (sender, receiver) = oneshot::channel();
        self.pending.lock().insert(
            job_id.clone(),
            PendingEntry {
                sender,
                token: token.clone(),
            },
        );

        let job = WorkerJob {
            tile_id: job_id.clone(),
            input,
        };
        if let Err(err) = self.pool.dispatch(job) {
            self.pending.lock().remove(&job_id);
            return Err(err);
        }

        match token.run(receiver).await {
            Ok(Ok(reply)) => reply.map_err(|message| TileError::Worker {
                id: request.id.clone(),
                message,
            }),
            // Sender dropped by cancel_all_requests.
            Ok(Err(oneshot::Canceled)) => Err(TileError::Cancelled(request.id.clone())),
            Err(err) => {
                self.pending.lock().remove(&job_id);
                Err(err)
            }
        }
    }

    async fn fetch_neighbors(&self, coord: &TileCoord) -> Result<NeighborSet, TileError> {
        let template = &self.config.tile_url_template;
        let center_url = make_tile_url(template, coord);

        if self.config.center_only {
            let center = self.fetch_tile(&center_url).await?;
            return Ok(NeighborSet::center_only(center));
        }

        let left_url = Some(make_tile_url(template, &coord.left()));
        let right_url = Some(make_tile_url(template, &coord.right()));
        let top_url = coord.top().map(|c| make_tile_url(template, &c));
        let bottom_url = coord.bottom().map(|c| make_tile_url(template, &c));

        let (center, left, right, top, bottom) = futures::join!(
            self.fetch_tile(&center_url),
            self.fetch_neighbor(left_url),
            self.fetch_neighbor(right_url),
            self.fetch_neighbor(top_url),
            self.fetch_neighbor(bottom_url),
        );

        Ok(NeighborSet::new(center?, left, right, top, bottom))
    }

    async fn fetch_neighbor(&self, url: Option<String>) -> Arc<TileImage> {
        let Some(url) = url else {
            return TileImage::placeholder().into_shared();
        };
        match self.fetch_tile(&url).await {
            Ok(tile) => tile,
            Err(err) => {
                console_warn!("Neighbor tile unavailable, using placeholder: {}", err);
                TileImage::placeholder().into_shared()
            }
        }
    }

    async fn fetch_tile(&self, url: &str) -> Result<Arc<TileImage>, TileError> {
        if self.tiles.has(url) {
            if let Some(tile) = self.tiles.get(url) {
                return Ok(tile);
            }
        }
        let tile = self.loader.load(url).await?.into_shared();
        self.tiles.add(url.to_string(), tile.clone());
        Ok(tile)
    }

    fn resolve_ramps(&self, params: &LayerParams) -> Result<LayerRamps, TileError> {
        let ramp = |map: &ColorMapParam| self.ramps.get_or_generate(&map.name, map.reverse);
        Ok(LayerRamps {
            elevation: ramp(&params.elevation.color_map)?,
            slope: ramp(&params.slope.color_map)?,
            aspect: ramp(&params.aspect.color_map)?,
        })
    }

    async fn flood_texture(&self, name: &str) -> Option<Arc<TileImage>> {
        let Some(url) = self.config.flood_textures.get(name) else {
            console_warn!("No flood texture registered as '{}'", name);
            return None;
        };
        match self
            .textures
            .get_or_load(name, || self.loader.load(url))
            .await
        {
            Ok(texture) => Some(texture),
            Err(err) => {
                console_warn!("Flood texture '{}' unavailable: {}", name, err);
                None
            }
        }
    }

    /// Rejects every request that is fetching or waiting on a worker.
    pub fn cancel_all_requests(&self) {
        let active: Vec<CancellationToken> = self.active.lock().values().cloned().collect();
        for token in active {
            token.cancel();
        }
        let pending: Vec<PendingEntry> = self.pending.lock().drain().map(|(_, entry)| entry).collect();
        for entry in pending {
            entry.token.cancel();
        }
        console_log!("All requests have been cancelled.");
    }

    pub fn clear_cache(&self) {
        self.tiles.clear();
    }

    pub fn cache_stats(&self) -> CacheStats {
        let (hits, misses) = self.tiles.stats();
        let total = hits + misses;
        CacheStats {
            tile_count: self.tiles.len(),
            max_tiles: self.tiles.capacity(),
            hits,
            misses,
            hit_rate: if total > 0 { hits as f64 / total as f64 } else { 0.0 },
            color_ramps: self.ramps.len(),
            textures: self.textures.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use std::collections::HashSet;

    const TEMPLATE: &str = "https://dem.test/{z}/{x}/{y}.png";

    #[derive(Default)]
    struct FakeLoader {
        tiles: HashMap<String, TileImage>,
        failing: HashSet<String>,
        hanging: HashSet<String>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeLoader {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    impl TileLoader for FakeLoader {
        fn load(&self, url: &str) -> impl Future<Output = Result<TileImage, TileError>> + Send {
            self.calls.lock().push(url.to_string());
            let hang = self.hanging.contains(url);
            let result = if self.failing.contains(url) {
                Err(TileError::Fetch {
                    url: url.to_string(),
                    reason: "404".to_string(),
                })
            } else {
                self.tiles.get(url).cloned().ok_or_else(|| TileError::Fetch {
                    url: url.to_string(),
                    reason: "not found".to_string(),
                })
            };
            async move {
                if hang {
                    futures::future::pending::<()>().await;
                }
                result
            }
        }
    }

    fn url(x: u32, y: u32, z: u8) -> String {
        make_tile_url(TEMPLATE, &TileCoord { x, y, z })
    }

    fn uniform(h: f32) -> TileImage {
        TileImage::from_heights(EncodingScheme::Mapbox, move |_, _| h)
    }

    // A 4x4 world at zoom 2, every tile flat at `h`.
    fn world(h: f32) -> FakeLoader {
        let mut loader = FakeLoader::default();
        for x in 0..4 {
            for y in 0..4 {
                loader.tiles.insert(url(x, y, 2), uniform(h));
            }
        }
        loader
    }

    fn config() -> OrchestratorConfig {
        OrchestratorConfig {
            tile_url_template: TEMPLATE.to_string(),
            pool_size: 2,
            ..OrchestratorConfig::default()
        }
    }

    fn query(x: u32, y: u32, z: u8) -> TileQuery {
        TileQuery::new(TileCoord::new(x, y, z).unwrap())
    }

    fn elevation_only() -> LayerParams {
        let mut params = LayerParams::hidden();
        params.elevation.visible = true;
        params.elevation.opacity = 1.0;
        params.elevation.min_height = 0.0;
        params.elevation.max_height = 1000.0;
        params
    }

    #[test]
    fn renders_a_uniform_tile_end_to_end() {
        let orchestrator = Orchestrator::new(config(), world(500.0)).unwrap();
        orchestrator.set_layer_params(elevation_only());

        let png = block_on(orchestrator.request(query(1, 1, 2), CancellationToken::random())).unwrap();
        let tile = TileImage::from_png(&png).unwrap();
        let first = tile.pixels()[0];
        assert_eq!(first.a, 255);
        assert!(tile.pixels().iter().all(|px| *px == first));
        assert_eq!(orchestrator.pending_count(), 0);
        assert_eq!(orchestrator.pool().dispatched_count(), 1);
    }

    #[test]
    fn fetches_wrapped_neighbors_and_skips_missing_rows() {
        let orchestrator = Orchestrator::new(config(), world(10.0)).unwrap();
        block_on(orchestrator.request(query(0, 0, 2), CancellationToken::random())).unwrap();

        let mut calls = orchestrator.loader.calls();
        calls.sort();
        let mut expected = vec![url(0, 0, 2), url(3, 0, 2), url(1, 0, 2), url(0, 1, 2)];
        expected.sort();
        assert_eq!(calls, expected);
    }

    #[test]
    fn second_request_is_served_from_the_tile_cache() {
        let orchestrator = Orchestrator::new(config(), world(10.0)).unwrap();
        block_on(orchestrator.request(query(1, 1, 2), CancellationToken::random())).unwrap();
        let after_first = orchestrator.loader.calls().len();
        block_on(orchestrator.request(query(1, 1, 2), CancellationToken::random())).unwrap();
        assert_eq!(orchestrator.loader.calls().len(), after_first);

        let stats = orchestrator.cache_stats();
        assert_eq!(stats.tile_count, 5);
        assert_eq!(stats.hits, 5);
        assert_eq!(stats.max_tiles, DEFAULT_TILE_CACHE_CAPACITY);

        orchestrator.clear_cache();
        assert_eq!(orchestrator.cache_stats().tile_count, 0);
    }

    #[test]
    fn failed_neighbor_degrades_to_placeholder() {
        let mut loader = world(10.0);
        loader.failing.insert(url(0, 1, 2));
        let orchestrator = Orchestrator::new(config(), loader).unwrap();
        let result = block_on(orchestrator.request(query(1, 1, 2), CancellationToken::random()));
        assert!(result.is_ok());
        // Failures are not cached.
        assert!(!orchestrator.tile_cache().has(&url(0, 1, 2)));
    }

    #[test]
    fn failed_center_rejects_without_dispatch() {
        let mut loader = world(10.0);
        loader.failing.insert(url(1, 1, 2));
        let orchestrator = Orchestrator::new(config(), loader).unwrap();
        let result = block_on(orchestrator.request(query(1, 1, 2), CancellationToken::random()));
        assert!(matches!(result, Err(TileError::Fetch { .. })));
        assert_eq!(orchestrator.pool().dispatched_count(), 0);
    }

    #[test]
    fn cancelling_during_fetch_posts_no_job() {
        let mut loader = world(10.0);
        loader.hanging.insert(url(2, 1, 2));
        let orchestrator = Orchestrator::new(config(), loader).unwrap();
        let token = CancellationToken::new("slow".to_string());

        let result = block_on(async {
            let request = orchestrator.request(query(1, 1, 2), token.clone());
            let cancel = async { token.cancel() };
            let (result, ()) = futures::join!(request, cancel);
            result
        });

        assert_eq!(result, Err(TileError::Cancelled("slow".to_string())));
        assert_eq!(orchestrator.pool().dispatched_count(), 0);
        assert_eq!(orchestrator.pending_count(), 0);
    }

    #[test]
    fn cancel_all_rejects_requests_in_flight() {
        let mut loader = world(10.0);
        loader.hanging.insert(url(1, 1, 2));
        let orchestrator = Orchestrator::new(config(), loader).unwrap();

        let result = block_on(async {
            let request = orchestrator.request(query(1, 1, 2), CancellationToken::random());
            let cancel = async { orchestrator.cancel_all_requests() };
            let (result, ()) = futures::join!(request, cancel);
            result
        });
        assert!(result.unwrap_err().is_cancelled());
    }

    #[test]
    fn center_only_fetches_a_single_tile() {
        let orchestrator = Orchestrator::new(
            OrchestratorConfig {
                center_only: true,
                ..config()
            },
            world(10.0),
        )
        .unwrap();
        block_on(orchestrator.request(query(2, 2, 2), CancellationToken::random())).unwrap();
        assert_eq!(orchestrator.loader.calls(), vec![url(2, 2, 2)]);
    }

    #[test]
    fn flood_texture_loads_once_when_flooding_is_visible() {
        let mut loader = world(10.0);
        loader
            .tiles
            .insert("https://dem.test/water.png".to_string(), uniform(0.0));
        let mut cfg = config();
        cfg.flood_textures
            .insert("water".to_string(), "https://dem.test/water.png".to_string());
        let orchestrator = Orchestrator::new(cfg, loader).unwrap();

        block_on(orchestrator.request(query(1, 1, 2), CancellationToken::random())).unwrap();
        assert!(!orchestrator
            .loader
            .calls()
            .contains(&"https://dem.test/water.png".to_string()));

        let mut params = LayerParams::default();
        params.flooding.visible = true;
        orchestrator.set_layer_params(params);
        block_on(orchestrator.request(query(1, 1, 2), CancellationToken::random())).unwrap();
        block_on(orchestrator.request(query(1, 2, 2), CancellationToken::random())).unwrap();
        let texture_loads = orchestrator
            .loader
            .calls()
            .iter()
            .filter(|u| u.ends_with("water.png"))
            .count();
        assert_eq!(texture_loads, 1);
        assert_eq!(orchestrator.cache_stats().textures, 1);
    }

    #[test]
    fn request_url_parses_the_protocol() {
        let orchestrator = Orchestrator::new(config(), world(10.0)).unwrap();
        let png = block_on(orchestrator.request_url(
            "demlayer://tiles?x=1&y=2&z=2&demType=mapbox&maxzoom=14",
            CancellationToken::random(),
        ));
        assert!(png.is_ok());
        let bad = block_on(orchestrator.request_url("demlayer://tiles?x=1", CancellationToken::random()));
        assert!(matches!(bad, Err(TileError::InvalidTileUrl { .. })));
    }

    #[test]
    fn unknown_palette_rejects_the_request() {
        let orchestrator = Orchestrator::new(config(), world(10.0)).unwrap();
        let mut params = LayerParams::default();
        params.slope.color_map.name = "nope".to_string();
        orchestrator.set_layer_params(params);
        let result = block_on(orchestrator.request(query(1, 1, 2), CancellationToken::random()));
        assert_eq!(result, Err(TileError::UnknownPalette("nope".to_string())));
    }

    #[test]
    fn orphaned_reply_is_ignored() {
        let pending: Mutex<HashMap<String, PendingEntry>> = Mutex::new(HashMap::new());
        assert!(!route_reply(&pending, WorkerReply::ok("ghost".to_string(), vec![1])));

        let (sender, mut receiver) = oneshot::channel();
        pending.lock().insert(
            "tile".to_string(),
            PendingEntry {
                sender,
                token: CancellationToken::random(),
            },
        );
        assert!(route_reply(&pending, WorkerReply::ok("tile".to_string(), vec![7])));
        assert_eq!(receiver.try_recv(), Ok(Some(Ok(vec![7]))));
        assert!(pending.lock().is_empty());
    }

    #[test]
    fn state_machine_rejects_illegal_moves() {
        let mut request = TileRequest::new("t".to_string(), CancellationToken::random());
        assert!(request.transition(RequestState::Dispatched).is_err());
        request.transition(RequestState::FetchingNeighbors).unwrap();
        request.transition(RequestState::Dispatched).unwrap();
        request.transition(RequestState::Resolved).unwrap();
        assert!(request.state().is_terminal());
        assert_eq!(
            request.transition(RequestState::Cancelled),
            Err(TileError::InvalidTransition {
                id: "t".to_string(),
                from: "resolved",
                to: "cancelled",
            })
        );

        let mut early = TileRequest::new("e".to_string(), CancellationToken::random());
        early.transition(RequestState::Cancelled).unwrap();
        assert_eq!(early.state(), RequestState::Cancelled);
    }

    #[test]
    fn config_requires_a_complete_template() {
        assert!(OrchestratorConfig::from_json(r#"{"tileUrlTemplate":"https://x/{z}/{x}.png"}"#).is_err());
        let cfg = OrchestratorConfig::from_json(
            r#"{"tileUrlTemplate":"https://x/{z}/{x}/{y}.png","encoding":"gsi","centerOnly":true}"#,
        )
        .unwrap();
        assert_eq!(cfg.encoding, EncodingScheme::Gsi);
        assert!(cfg.center_only);
        assert_eq!(cfg.pool_size, DEFAULT_POOL_SIZE);
    }

    #[test]
    fn concurrent_requests_for_one_tile_each_get_their_reply() {
        let orchestrator = Orchestrator::new(config(), world(500.0)).unwrap();
        orchestrator.set_layer_params(elevation_only());

        let first = CancellationToken::new("first".to_string());
        let second = CancellationToken::new("second".to_string());
        let (a, b) = block_on(async {
            futures::join!(
                orchestrator.request(query(1, 1, 2), first),
                orchestrator.request(query(1, 1, 2), second),
            )
        });

        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(orchestrator.pool().dispatched_count(), 2);
        assert_eq!(orchestrator.pending_count(), 0);
    }

    #[test]
    fn job_ids_carry_the_token() {
        let token = CancellationToken::new("abc".to_string());
        let request = TileRequest::new(url(1, 1, 2), token);
        assert_eq!(request.job_id(), format!("{}#abc", url(1, 1, 2)));
    }

    #[test]
    fn terrain_request_re_encodes_a_gsi_tile() {
        let gsi_url = "https://dem.test/gsi/2/1/1.png";
        let mut source = TileImage::from_heights(EncodingScheme::Gsi, |c, r| 120.0 + c as f32 - r as f32 * 0.5);
        source.data[..4].copy_from_slice(&[128, 0, 0, 255]);
        let mut loader = FakeLoader::default();
        loader.tiles.insert(gsi_url.to_string(), source);
        let orchestrator = Orchestrator::new(config(), loader).unwrap();

        let terrain_url = format!("terrain://{}?demType=gsi", gsi_url);
        let png = block_on(orchestrator.request_terrain(&terrain_url, CancellationToken::random())).unwrap();
        let tile = TileImage::from_png(&png).unwrap();

        let decode = |col, row| EncodingScheme::Mapbox.decode(tile.tile_pixel(col, row)).unwrap();
        assert_eq!(decode(0, 0), crate::kernel::TERRAIN_NO_DATA_HEIGHT);
        assert!((decode(10, 0) - 130.0).abs() <= 0.1);
        assert!((decode(255, 100) - 325.0).abs() <= 0.1);

        // Second call is a cache hit and fetches nothing.
        block_on(orchestrator.request_terrain(&terrain_url, CancellationToken::random())).unwrap();
        assert_eq!(orchestrator.loader.calls(), vec![gsi_url.to_string()]);
        assert_eq!(orchestrator.cache_stats().hits, 1);
        assert_eq!(orchestrator.pending_count(), 0);
    }

    #[test]
    fn terrain_request_fails_when_the_tile_is_missing() {
        let orchestrator = Orchestrator::new(config(), FakeLoader::default()).unwrap();
        let result = block_on(orchestrator.request_terrain(
            "terrain://https://dem.test/none.png?demType=mapbox",
            CancellationToken::random(),
        ));
        assert!(matches!(result, Err(TileError::Fetch { .. })));
        assert_eq!(orchestrator.pool().dispatched_count(), 0);
    }
}
