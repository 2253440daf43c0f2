// 3x3 height window around a pixel, stitched across the four adjacent tiles
use std::sync::Arc;

use crate::height::{EncodingScheme, Rgba8, TileImage, TILE_SIZE};

/// Row-major 3x3 window, `[row][col]`, row 0 is the northern row.
pub type HeightMatrix = [[f32; 3]; 3];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Center,
    Left,
    Right,
    Top,
    Bottom,
}

/// The center tile plus its four edge-sharing neighbors.
#[derive(Clone, Debug)]
pub struct NeighborSet {
    pub center: Arc<TileImage>,
    pub left: Arc<TileImage>,
    pub right: Arc<TileImage>,
    pub top: Arc<TileImage>,
    pub bottom: Arc<TileImage>,
}

impl NeighborSet {
    pub fn new(
        center: Arc<TileImage>,
        left: Arc<TileImage>,
        right: Arc<TileImage>,
        top: Arc<TileImage>,
        bottom: Arc<TileImage>,
    ) -> Self {
        Self {
            center,
            left,
            right,
            top,
            bottom,
        }
    }

    /// Only the center is real; every neighbor is the 1x1 placeholder.
    pub fn center_only(center: Arc<TileImage>) -> Self {
        let placeholder = Arc::new(TileImage::placeholder());
        Self {
            center,
            left: placeholder.clone(),
            right: placeholder.clone(),
            top: placeholder.clone(),
            bottom: placeholder,
        }
    }

    pub fn image(&self, side: Side) -> &TileImage {
        match side {
            Side::Center => &self.center,
            Side::Left => &self.left,
            Side::Right => &self.right,
            Side::Top => &self.top,
            Side::Bottom => &self.bottom,
        }
    }
}

/// Finds which tile holds the pixel at `(col + dx, row + dy)` and where.
///
/// Horizontal overflow wins at the corners: a diagonal cell is read from the
/// left/right tile with both axes wrapped, since no diagonal tile is fetched.
pub fn resolve_offset(
    col: usize,
    row: usize,
    dx: i32,
    dy: i32,
    center_only: bool,
) -> (Side, usize, usize) {
    let size = TILE_SIZE as i32;
    let c = col as i32 + dx;
    let r = row as i32 + dy;

    if center_only {
        return (
            Side::Center,
            c.clamp(0, size - 1) as usize,
            r.clamp(0, size - 1) as usize,
        );
    }

    let side = if c < 0 {
        Side::Left
    } else if c >= size {
        Side::Right
    } else if r < 0 {
        Side::Top
    } else if r >= size {
        Side::Bottom
    } else {
        Side::Center
    };

    (side, c.rem_euclid(size) as usize, r.rem_euclid(size) as usize)
}

/// A side holding the placeholder is read as if the center tile were clamped,
/// so a missing neighbor never decodes into a fake cliff at the seam.
pub fn sample_pixel(set: &NeighborSet, col: usize, row: usize, dx: i32, dy: i32, center_only: bool) -> Rgba8 {
    let (side, c, r) = resolve_offset(col, row, dx, dy, center_only);
    let image = set.image(side);
    if side != Side::Center && image.is_placeholder() {
        let (_, c, r) = resolve_offset(col, row, dx, dy, true);
        return set.center.tile_pixel(c, r);
    }
    image.tile_pixel(c, r)
}

pub fn sample_window(
    set: &NeighborSet,
    col: usize,
    row: usize,
    scheme: EncodingScheme,
    center_only: bool,
) -> HeightMatrix {
    let mut matrix = [[0.0; 3]; 3];
    for (i, matrix_row) in matrix.iter_mut().enumerate() {
        for (j, cell) in matrix_row.iter_mut().enumerate() {
            let px = sample_pixel(set, col, row, j as i32 - 1, i as i32 - 1, center_only);
            *cell = scheme.decode_or_sentinel(px);
        }
    }
    matrix
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEME: EncodingScheme = EncodingScheme::Gsi;

    // Distinct, non-linear heights per tile so that a wrong lookup shows up.
    fn tile(seed: f32) -> Arc<TileImage> {
        Arc::new(TileImage::from_heights(SCHEME, move |c, r| {
            seed * 1000.0 + (c as f32 * 0.37).sin() * 50.0 + r as f32 * 1.25 + c as f32 * 0.5
        }))
    }

    fn height(img: &TileImage, col: usize, row: usize) -> f32 {
        SCHEME.decode_or_sentinel(img.tile_pixel(col, row))
    }

    fn set() -> NeighborSet {
        NeighborSet::new(tile(1.0), tile(2.0), tile(3.0), tile(4.0), tile(5.0))
    }

    #[test]
    fn interior_offsets_stay_in_center() {
        assert_eq!(resolve_offset(10, 20, -1, -1, false), (Side::Center, 9, 19));
        assert_eq!(resolve_offset(10, 20, 1, 1, false), (Side::Center, 11, 21));
    }

    #[test]
    fn edges_reach_into_the_matching_neighbor() {
        assert_eq!(resolve_offset(0, 40, -1, 0, false), (Side::Left, 255, 40));
        assert_eq!(resolve_offset(255, 40, 1, 0, false), (Side::Right, 0, 40));
        assert_eq!(resolve_offset(40, 0, 0, -1, false), (Side::Top, 40, 255));
        assert_eq!(resolve_offset(40, 255, 0, 1, false), (Side::Bottom, 40, 0));
    }

    #[test]
    fn corners_reuse_horizontal_neighbor_wrapped_on_both_axes() {
        assert_eq!(resolve_offset(0, 0, -1, -1, false), (Side::Left, 255, 255));
        assert_eq!(resolve_offset(255, 0, 1, -1, false), (Side::Right, 0, 255));
        assert_eq!(resolve_offset(0, 255, -1, 1, false), (Side::Left, 255, 0));
        assert_eq!(resolve_offset(255, 255, 1, 1, false), (Side::Right, 0, 0));
        // Top edge but not a corner column: the top tile answers.
        assert_eq!(resolve_offset(5, 0, -1, -1, false), (Side::Top, 4, 255));
    }

    #[test]
    fn center_only_clamps_inside_center() {
        assert_eq!(resolve_offset(0, 0, -1, -1, true), (Side::Center, 0, 0));
        assert_eq!(resolve_offset(255, 255, 1, 1, true), (Side::Center, 255, 255));
        assert_eq!(resolve_offset(255, 7, 1, -1, true), (Side::Center, 255, 6));
    }

    #[test]
    fn left_stitch_matches_left_tile_own_pixels() {
        let set = set();
        for row in [0usize, 1, 77, 254, 255] {
            let stitched = sample_window(&set, 0, row, SCHEME, false);
            // Middle-left cell of the center tile's column 0 is the left tile's column 255.
            assert_eq!(stitched[1][0], height(&set.left, 255, row));

            // The left tile sampled directly at its column 255 sees the same column.
            let left_set = NeighborSet::new(
                set.left.clone(),
                tile(9.0),
                set.center.clone(),
                tile(8.0),
                tile(7.0),
            );
            let direct = sample_window(&left_set, 255, row, SCHEME, false);
            assert_eq!(direct[1][1], stitched[1][0]);
            assert_eq!(direct[1][2], stitched[1][1]);
        }
    }

    #[test]
    fn window_centre_is_the_pixel_itself() {
        let set = set();
        let m = sample_window(&set, 128, 64, SCHEME, false);
        assert_eq!(m[1][1], height(&set.center, 128, 64));
        assert_eq!(m[0][1], height(&set.center, 128, 63));
        assert_eq!(m[2][2], height(&set.center, 129, 65));
    }

    #[test]
    fn placeholder_neighbors_repeat_the_center_edge() {
        let center = tile(1.0);
        let set = NeighborSet::new(center.clone(), tile(2.0), tile(3.0), Arc::new(TileImage::placeholder()), tile(5.0));

        let m = sample_window(&set, 40, 0, SCHEME, false);
        assert_eq!(m[0], m[1]);
        assert_eq!(m[0][1], height(&center, 40, 0));

        // The corner cell still comes from the real left tile.
        let corner = sample_window(&set, 0, 0, SCHEME, false);
        assert_eq!(corner[0][0], height(&set.left, 255, 255));

        let lonely = NeighborSet::center_only(center.clone());
        for (col, row) in [(0, 10), (255, 0), (128, 255)] {
            assert_eq!(
                sample_window(&lonely, col, row, SCHEME, false),
                sample_window(&lonely, col, row, SCHEME, true)
            );
        }
    }
}
