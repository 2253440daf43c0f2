use thiserror::Error;
use wasm_bindgen::JsValue;

/// Errors surfaced by the tile engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TileError {
    #[error("unsupported height encoding id {0}")]
    UnsupportedEncoding(u32),

    #[error("tile coordinate {x}/{y} is outside zoom level {z}")]
    InvalidTileCoord { x: u32, y: u32, z: u8 },

    #[error("invalid tile url '{url}': {reason}")]
    InvalidTileUrl { url: String, reason: String },

    #[error("unknown color palette '{0}'")]
    UnknownPalette(String),

    #[error("invalid color '{0}'")]
    InvalidColor(String),

    #[error("failed to decode image: {0}")]
    ImageDecode(String),

    #[error("failed to encode image: {0}")]
    ImageEncode(String),

    #[error("failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("request {0} was cancelled")]
    Cancelled(String),

    #[error("worker failed on tile {id}: {message}")]
    Worker { id: String, message: String },

    #[error("worker {0} is no longer accepting jobs")]
    WorkerUnavailable(usize),

    #[error("request {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: &'static str,
        to: &'static str,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl TileError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TileError::Cancelled(_))
    }
}

impl From<image::ImageError> for TileError {
    fn from(err: image::ImageError) -> Self {
        TileError::ImageDecode(err.to_string())
    }
}

impl From<TileError> for JsValue {
    fn from(err: TileError) -> Self {
        JsValue::from_str(&err.to_string())
    }
}
