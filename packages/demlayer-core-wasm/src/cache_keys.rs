// Utility functions to generate consistent cache keys across the application.
use crate::protocol::TileCoord;

/// Fill a `{z}/{x}/{y}` tile URL template. The filled URL is also the tile cache key.
pub fn make_tile_url(template: &str, coord: &TileCoord) -> String {
    template
        .replace("{z}", &coord.z.to_string())
        .replace("{x}", &coord.x.to_string())
        .replace("{y}", &coord.y.to_string())
}

/// Generate a color ramp key: "palette_reversed" or "palette_normal".
pub fn make_color_ramp_key(palette: &str, reverse: bool) -> String {
    format!("{}_{}", palette, if reverse { "reversed" } else { "normal" })
}
