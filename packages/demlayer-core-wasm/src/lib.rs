use std::cell::RefCell;

use serde_wasm_bindgen::to_value;
use wasm_bindgen::prelude::*;

// Logging macros over the console module
#[macro_export]
macro_rules! console_log {
    ($($t:tt)*) => ($crate::console::log(&format!($($t)*)))
}

#[macro_export]
macro_rules! console_warn {
    ($($t:tt)*) => ($crate::console::warn(&format!($($t)*)))
}

#[macro_export]
macro_rules! console_error {
    ($($t:tt)*) => ($crate::console::error(&format!($($t)*)))
}

#[macro_export]
macro_rules! console_debug {
    ($($t:tt)*) => ($crate::console::debug(&format!($($t)*)))
}

// Create a console module for logging
pub mod console;
pub mod error;

// Height decoding and per-pixel terrain math
pub mod height;
pub mod neighbors;
pub mod terrain;
pub mod color;
pub mod colormap;
pub mod layers;
pub mod kernel;

// Request path: caching, cancellation, workers
pub mod cache_keys;
pub mod cache_manager;
pub mod cancellation;
pub mod models;
pub mod worker_pool;
pub mod orchestrator;
pub mod protocol;

mod module_state;

pub use error::TileError;
pub use height::{EncodingScheme, TileImage, TILE_SIZE};
pub use kernel::{compose_tile, KernelInput};
pub use layers::LayerParams;
pub use orchestrator::{Orchestrator, OrchestratorConfig, TileLoader};
pub use protocol::{TileCoord, TileQuery};

use height::Rgba8;
use models::RenderRequest;
use module_state::ModuleState;
use worker_pool::WorkerSlot;

// Enable better panic messages in console during development
#[cfg(feature = "console_error_panic_hook")]
pub use console_error_panic_hook::set_once as set_panic_hook;

use std::sync::Once;
static INIT: Once = Once::new();

thread_local! {
    // One compute slot per JS worker, set up on its first render.
    static WORKER_SLOT: RefCell<WorkerSlot> = RefCell::new(WorkerSlot::new(0, 0));
}

// This sets up the wasm_bindgen start functionality
#[wasm_bindgen(start)]
pub fn start() {
    INIT.call_once(|| {
        // Set the panic hook for better error messages
        #[cfg(feature = "console_error_panic_hook")]
        console_error_panic_hook::set_once();

        console_log!("WASM module initialized successfully");
    });
}

/// Decodes one encoded pixel. `undefined` for the GSI no-data value.
#[wasm_bindgen]
pub fn decode_height(r: u8, g: u8, b: u8, dem_type: u32) -> Result<Option<f32>, JsValue> {
    let scheme = EncodingScheme::try_from(dem_type)?;
    Ok(scheme.decode(Rgba8::new(r, g, b, 255)))
}

/// 256 RGB entries (768 bytes) for a palette.
#[wasm_bindgen]
pub fn color_ramp(palette: &str, reverse: bool) -> Result<Vec<u8>, JsValue> {
    let ramp = ModuleState::global().ramps.get_or_generate(palette, reverse)?;
    Ok(ramp.as_bytes().to_vec())
}

/// Keeps a decoded tile so later render requests can refer to it by URL.
#[wasm_bindgen]
pub fn store_tile(url: &str, width: usize, height: usize, data: &[u8]) -> Result<(), JsValue> {
    let image = TileImage::new(width, height, data.to_vec())?;
    ModuleState::global().store_tile(url, image);
    Ok(())
}

#[wasm_bindgen]
pub fn has_tile(url: &str) -> bool {
    ModuleState::global().tiles.has(url)
}

/// Renders one tile and returns PNG bytes. Called from inside a JS worker.
#[wasm_bindgen]
pub fn render_tile(request: JsValue) -> Result<Vec<u8>, JsValue> {
    let request: RenderRequest = serde_wasm_bindgen::from_value(request)?;
    let tile_id = request.tile_id.clone();
    let job = ModuleState::global().build_job(request)?;

    WORKER_SLOT
        .with(|slot| slot.borrow_mut().run(&job))
        .map_err(|e| {
            console_error!("Error processing tile {}: {}", tile_id, e);
            JsValue::from(e)
        })
}

/// Re-encodes one height tile as Mapbox Terrain-RGB PNG for 3D terrain.
#[wasm_bindgen]
pub fn render_terrain(width: usize, height: usize, data: &[u8], dem_type: u32) -> Result<Vec<u8>, JsValue> {
    let scheme = EncodingScheme::try_from(dem_type)?;
    let image = TileImage::new(width, height, data.to_vec())?;
    Ok(kernel::terrain_rgb(&image, scheme)?)
}

// Function to get cache statistics
#[wasm_bindgen]
pub fn get_cache_stats() -> Result<JsValue, JsValue> {
    let stats = ModuleState::global().stats();
    Ok(to_value(&stats)?)
}

// Function to clear all caches
#[wasm_bindgen]
pub fn clear_caches() -> bool {
    ModuleState::global().clear_all_caches();
    true
}
