use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::cache_keys::make_color_ramp_key;
use crate::colormap::{ColorRamp, PaletteSource};
use crate::error::TileError;
use crate::height::TileImage;

/// Default number of decoded height tiles kept in memory.
pub const DEFAULT_TILE_CACHE_CAPACITY: usize = 500;

// Simple LRU cache implementation. A monotonically increasing tick stands in
// for a timestamp so that two touches never tie.
struct LruCache<T> {
    capacity: usize,
    tick: u64,
    data: HashMap<String, (T, u64)>, // value, last use
}

impl<T: Clone> LruCache<T> {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            tick: 0,
            data: HashMap::new(),
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn get(&mut self, key: &str) -> Option<T> {
        let tick = self.next_tick();
        self.data.get_mut(key).map(|(value, last_used)| {
            *last_used = tick;
            value.clone()
        })
    }

    fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    fn touch(&mut self, key: &str) -> bool {
        let tick = self.next_tick();
        match self.data.get_mut(key) {
            Some((_, last_used)) => {
                *last_used = tick;
                true
            }
            None => false,
        }
    }

    fn insert(&mut self, key: String, value: T) {
        // Evict oldest entries if at capacity
        if self.data.len() >= self.capacity && !self.data.contains_key(&key) {
            self.evict_oldest();
        }
        let tick = self.next_tick();
        self.data.insert(key, (value, tick));
    }

    fn evict_oldest(&mut self) {
        if let Some(oldest_key) = self
            .data
            .iter()
            .min_by_key(|(_, (_, last_used))| *last_used)
            .map(|(k, _)| k.clone())
        {
            self.data.remove(&oldest_key);
        }
    }

    fn len(&self) -> usize {
        self.data.len()
    }

    fn clear(&mut self) {
        self.data.clear();
    }
}

struct TileCacheInner {
    lru: LruCache<Arc<TileImage>>,
    hits: u64,
    misses: u64,
}

/// Decoded height tiles keyed by their URL, strict LRU.
pub struct TileImageCache {
    inner: Mutex<TileCacheInner>,
    capacity: usize,
}

impl TileImageCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(TileCacheInner {
                lru: LruCache::new(capacity),
                hits: 0,
                misses: 0,
            }),
            capacity: capacity.max(1),
        }
    }

    /// Returns the tile and marks it most recently used.
    pub fn get(&self, key: &str) -> Option<Arc<TileImage>> {
        let mut inner = self.inner.lock();
        let found = inner.lru.get(key);
        if found.is_some() {
            inner.hits += 1;
        } else {
            inner.misses += 1;
        }
        found
    }

    /// Presence check. Does not change recency.
    pub fn has(&self, key: &str) -> bool {
        self.inner.lock().lru.contains(key)
    }

    pub fn add(&self, key: String, tile: Arc<TileImage>) {
        self.inner.lock().lru.insert(key, tile);
    }

    /// Marks `key` most recently used. Returns false when absent.
    pub fn update_order(&self, key: &str) -> bool {
        self.inner.lock().lru.touch(key)
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.lru.clear();
        inner.hits = 0;
        inner.misses = 0;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// `(hits, misses)` since creation or the last clear.
    pub fn stats(&self) -> (u64, u64) {
        let inner = self.inner.lock();
        (inner.hits, inner.misses)
    }
}

impl Default for TileImageCache {
    fn default() -> Self {
        Self::new(DEFAULT_TILE_CACHE_CAPACITY)
    }
}

/// Generated ramps keyed by `(palette, reverse)`. Each is built once and shared.
pub struct ColorRampCache {
    source: Arc<dyn PaletteSource>,
    ramps: RwLock<HashMap<String, Arc<ColorRamp>>>,
}

impl ColorRampCache {
    pub fn new(source: Arc<dyn PaletteSource>) -> Self {
        Self {
            source,
            ramps: RwLock::new(HashMap::new()),
        }
    }

    pub fn get_or_generate(&self, palette: &str, reverse: bool) -> Result<Arc<ColorRamp>, TileError> {
        let key = make_color_ramp_key(palette, reverse);
        if let Some(ramp) = self.ramps.read().get(&key) {
            return Ok(ramp.clone());
        }

        let mut ramps = self.ramps.write();
        if let Some(ramp) = ramps.get(&key) {
            return Ok(ramp.clone());
        }
        let ramp = Arc::new(ColorRamp::generate(self.source.as_ref(), palette, reverse)?);
        ramps.insert(key, ramp.clone());
        Ok(ramp)
    }

    pub fn len(&self) -> usize {
        self.ramps.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.ramps.write().clear();
    }
}

/// Static image assets (flood textures) keyed by logical name.
#[derive(Default)]
pub struct TextureAssetCache {
    textures: RwLock<HashMap<String, Arc<TileImage>>>,
}

impl TextureAssetCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<TileImage>> {
        self.textures.read().get(name).cloned()
    }

    /// Returns the cached texture or runs `load` and keeps its result.
    ///
    /// Failures are not cached, so a later request retries the load.
    pub async fn get_or_load<F, Fut>(&self, name: &str, load: F) -> Result<Arc<TileImage>, TileError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<TileImage, TileError>>,
    {
        if let Some(texture) = self.get(name) {
            return Ok(texture);
        }
        let loaded = Arc::new(load().await?);
        // A concurrent load of the same name may have finished first; keep that one.
        let mut textures = self.textures.write();
        Ok(textures
            .entry(name.to_string())
            .or_insert(loaded)
            .clone())
    }

    pub fn len(&self) -> usize {
        self.textures.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.textures.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::colormap::BuiltinPalettes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn tile(tag: u8) -> Arc<TileImage> {
        Arc::new(TileImage::new(1, 1, vec![tag, 0, 0, 255]).unwrap())
    }

    #[test]
    fn evicts_least_recently_added_when_full() {
        let cache = TileImageCache::new(3);
        for key in ["a", "b", "c", "d"] {
            cache.add(key.to_string(), tile(0));
        }
        assert_eq!(cache.len(), 3);
        assert!(!cache.has("a"));
        assert!(cache.has("b") && cache.has("c") && cache.has("d"));
    }

    #[test]
    fn get_protects_an_entry_from_eviction() {
        let cache = TileImageCache::new(3);
        for key in ["a", "b", "c"] {
            cache.add(key.to_string(), tile(0));
        }
        assert!(cache.get("a").is_some());
        cache.add("d".to_string(), tile(0));
        assert!(cache.has("a"));
        assert!(!cache.has("b"));
    }

    #[test]
    fn has_does_not_refresh_but_update_order_does() {
        let cache = TileImageCache::new(2);
        cache.add("a".to_string(), tile(0));
        cache.add("b".to_string(), tile(0));
        assert!(cache.has("a"));
        cache.add("c".to_string(), tile(0));
        assert!(!cache.has("a"));

        assert!(cache.update_order("b"));
        assert!(!cache.update_order("missing"));
        cache.add("d".to_string(), tile(0));
        assert!(cache.has("b"));
        assert!(!cache.has("c"));
    }

    #[test]
    fn re_adding_replaces_without_eviction() {
        let cache = TileImageCache::new(2);
        cache.add("a".to_string(), tile(1));
        cache.add("b".to_string(), tile(1));
        cache.add("a".to_string(), tile(2));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a").unwrap().data[0], 2);
    }

    #[test]
    fn counts_hits_and_misses_until_cleared() {
        let cache = TileImageCache::default();
        assert_eq!(cache.capacity(), DEFAULT_TILE_CACHE_CAPACITY);
        cache.add("a".to_string(), tile(0));
        cache.get("a");
        cache.get("a");
        cache.get("zz");
        assert_eq!(cache.stats(), (2, 1));
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats(), (0, 0));
    }

    struct CountingPalettes(AtomicUsize);

    impl PaletteSource for CountingPalettes {
        fn generate(&self, name: &str, steps: usize) -> Result<Vec<[u8; 3]>, TileError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            BuiltinPalettes.generate(name, steps)
        }
    }

    #[test]
    fn ramps_are_generated_once_and_shared() {
        let source = Arc::new(CountingPalettes(AtomicUsize::new(0)));
        let cache = ColorRampCache::new(source.clone());

        let first = cache.get_or_generate("jet", false).unwrap();
        let second = cache.get_or_generate("jet", false).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(source.0.load(Ordering::SeqCst), 1);

        let reversed = cache.get_or_generate("jet", true).unwrap();
        assert!(!Arc::ptr_eq(&first, &reversed));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn unknown_palette_is_not_cached() {
        let cache = ColorRampCache::new(Arc::new(BuiltinPalettes));
        assert!(cache.get_or_generate("nope", false).is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn textures_load_once() {
        let cache = TextureAssetCache::new();
        let loads = AtomicUsize::new(0);
        let load = || async {
            loads.fetch_add(1, Ordering::SeqCst);
            Ok(TileImage::placeholder())
        };

        let a = futures::executor::block_on(cache.get_or_load("water", load)).unwrap();
        let b = futures::executor::block_on(cache.get_or_load("water", load)).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(loads.load(Ordering::SeqCst), 1);

        cache.clear();
        assert!(cache.get("water").is_none());
    }

    #[test]
    fn failed_texture_load_is_retried() {
        let cache = TextureAssetCache::new();
        let failed = futures::executor::block_on(cache.get_or_load("water", || async {
            Err(TileError::Fetch {
                url: "water.png".to_string(),
                reason: "offline".to_string(),
            })
        }));
        assert!(failed.is_err());
        assert!(cache.is_empty());
    }
}
