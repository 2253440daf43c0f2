// Surface normal and curvature from a 3x3 height window
use nalgebra::Vector3;

use crate::height::TILE_SIZE;
use crate::neighbors::HeightMatrix;

const LAPLACIAN: HeightMatrix = [[0.0, -1.0, 0.0], [-1.0, 4.0, -1.0], [0.0, -1.0, 0.0]];

/// Vertical component of the unnormalized normal: 2 * pixel size * tile resolution.
pub const NORMAL_Z_SCALE: f32 = 2.0 * (1.0 / TILE_SIZE as f32) * TILE_SIZE as f32;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TerrainSample {
    pub normal: Vector3<f32>,
    pub curvature: f32,
}

pub fn surface_normal(m: &HeightMatrix) -> Vector3<f32> {
    let top: f32 = m[0].iter().sum();
    let bottom: f32 = m[2].iter().sum();
    let left = m[0][0] + m[1][0] + m[2][0];
    let right = m[0][2] + m[1][2] + m[2][2];
    Vector3::new(top - bottom, left - right, NORMAL_Z_SCALE).normalize()
}

/// Inner product of the window with the discrete Laplacian.
pub fn curvature(m: &HeightMatrix) -> f32 {
    m.iter()
        .zip(LAPLACIAN.iter())
        .flat_map(|(a, b)| a.iter().zip(b.iter()))
        .map(|(h, k)| h * k)
        .sum()
}

pub fn terrain_sample(m: &HeightMatrix) -> TerrainSample {
    TerrainSample {
        normal: surface_normal(m),
        curvature: curvature(m),
    }
}
