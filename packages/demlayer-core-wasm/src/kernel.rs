//! Per-tile compute kernel.
//!
//! Walks every pixel of the center tile, decodes its height, samples the
//! 3x3 neighborhood when a derivative-based layer needs it and composites
//! the visible layers in a fixed order:
//! elevation, slope, aspect, hillshade, curvature, edge, contour, flood.
//!
//! Rows are independent, so they are shaded in parallel with rayon.
//!
//! [`terrain_rgb`] is the second, much simpler job: it re-encodes a single
//! height tile of any scheme as Mapbox Terrain-RGB for 3D terrain rendering.

use std::sync::Arc;

use nalgebra::Vector3;
use rayon::prelude::*;

use crate::color::to_bytes;
use crate::error::TileError;
use crate::height::{encode_png, EncodingScheme, Rgba8, TileImage, NO_DATA_HEIGHT, TILE_SIZE};
use crate::layers::{
    aspect_color, contour_color, curvature_color, edge_color, elevation_color, flood_color,
    hillshade, slope_color, Accumulator, LayerParams, ResolvedStyle,
};
use crate::models::LayerRamps;
use crate::neighbors::{sample_window, NeighborSet};
use crate::terrain::terrain_sample;

const TRANSPARENT: [u8; 4] = [0, 0, 0, 0];

/// Height written for NoData pixels in re-encoded terrain tiles.
pub const TERRAIN_NO_DATA_HEIGHT: f32 = 0.0;

/// One fully parameterized kernel invocation.
#[derive(Clone, Debug)]
pub struct KernelInput {
    pub images: NeighborSet,
    pub zoom: u8,
    /// Source maximum zoom, carried through from the tile URL.
    pub maxzoom: u8,
    pub encoding: EncodingScheme,
    pub params: Arc<LayerParams>,
    pub ramps: LayerRamps,
    pub flood_texture: Option<Arc<TileImage>>,
    pub center_only: bool,
}

/// Shades the whole tile into a raw 256x256 RGBA buffer.
pub fn compose_tile(input: &KernelInput) -> Result<Vec<u8>, TileError> {
    let style = ResolvedStyle::resolve(&input.params)?;
    let row_bytes = TILE_SIZE * 4;
    let mut out = vec![0u8; TILE_SIZE * row_bytes];

    out.par_chunks_mut(row_bytes)
        .enumerate()
        .for_each(|(row, line)| {
            for (col, px) in line.chunks_exact_mut(4).enumerate() {
                px.copy_from_slice(&shade_pixel(input, &style, col, row));
            }
        });

    Ok(out)
}

/// [`compose_tile`] followed by PNG encoding.
pub fn render_tile(input: &KernelInput) -> Result<Vec<u8>, TileError> {
    encode_png(compose_tile(input)?)
}

/// Re-encodes `image` from `encoding` to Terrain-RGB, keeping its size.
/// Every output pixel is opaque; NoData becomes [`TERRAIN_NO_DATA_HEIGHT`].
pub fn terrain_rgb(image: &TileImage, encoding: EncodingScheme) -> Result<Vec<u8>, TileError> {
    let mut out = image.clone();
    out.data.par_chunks_mut(4).for_each(|px| {
        let raw = Rgba8::new(px[0], px[1], px[2], px[3]);
        let height = encoding.decode(raw).unwrap_or(TERRAIN_NO_DATA_HEIGHT);
        let [r, g, b] = EncodingScheme::Mapbox.encode(height);
        px.copy_from_slice(&[r, g, b, 255]);
    });
    out.to_png()
}

fn center_height(input: &KernelInput, col: usize, row: usize) -> f32 {
    let col = col.min(TILE_SIZE - 1);
    let row = row.min(TILE_SIZE - 1);
    input
        .encoding
        .decode_or_sentinel(input.images.center.tile_pixel(col, row))
}

fn shade_pixel(input: &KernelInput, style: &ResolvedStyle, col: usize, row: usize) -> [u8; 4] {
    let params = &input.params;
    let raw = input.images.center.tile_pixel(col, row);

    if raw.a == 0 {
        return TRANSPARENT;
    }
    if !params.any_visible() {
        return [raw.r, raw.g, raw.b, raw.a];
    }

    let decoded = input.encoding.decode(raw);
    if decoded.is_none() && params.needs_height() {
        return TRANSPARENT;
    }
    let height = decoded.unwrap_or(NO_DATA_HEIGHT);
    let zoom = input.zoom as f32;

    let mut acc = Accumulator::default();

    if params.elevation.visible {
        acc.blend(&elevation_color(&params.elevation, height, &input.ramps.elevation));
    }

    if params.needs_window() {
        let window = sample_window(&input.images, col, row, input.encoding, input.center_only);
        let terrain = terrain_sample(&window);

        if params.slope.visible {
            acc.blend(&slope_color(&params.slope, &terrain.normal, &input.ramps.slope));
        }
        if params.aspect.visible {
            acc.blend(&aspect_color(&params.aspect, &terrain.normal, &input.ramps.aspect));
        }
        if params.shadow.visible {
            acc.shade(&hillshade(&params.shadow, style, &terrain.normal));
        }
        if params.curvature.visible {
            if let Some(c) = curvature_color(&params.curvature, style, terrain.curvature, zoom) {
                acc.blend(&c);
            }
        }
        if params.edge.visible {
            acc.blend(&edge_color(&params.edge, style, &window, zoom));
        }
    }

    if params.contour.visible {
        let right = center_height(input, col + 1, row);
        let below = center_height(input, col, row + 1);
        if let Some(c) = contour_color(&params.contour, style, height, right, below) {
            acc.blend(&c);
        }
    }

    if params.flooding.visible {
        let texture_rgb = input.flood_texture.as_ref().map(|tex| {
            let p = tex.tile_pixel(col, row);
            Vector3::new(p.r as f32, p.g as f32, p.b as f32) / 255.0
        });
        if let Some(c) = flood_color(&params.flooding, height, texture_rgb) {
            acc.blend(&c);
        }
    }

    to_bytes(&acc.to_rgba())
}
