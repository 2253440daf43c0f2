// Layer parameters and the per-pixel compositors
use std::f32::consts::PI;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::color::{parse_color, Rgba};
use crate::colormap::ColorRamp;
use crate::error::TileError;
use crate::neighbors::HeightMatrix;

const CONTOUR_SMOOTHING: f32 = 0.5;
const CONTOUR_EDGE_THRESHOLD: f32 = 0.01;
const EDGE_ALPHA_CAP: f32 = 0.8;
const HIGHLIGHT_STRENGTH: f32 = 0.5;
const SPECULAR_EXPONENT: i32 = 16;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ColorMapParam {
    pub name: String,
    pub reverse: bool,
}

impl ColorMapParam {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            reverse: false,
        }
    }
}

impl Default for ColorMapParam {
    fn default() -> Self {
        Self::named("jet")
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ElevationLayer {
    pub visible: bool,
    pub opacity: f32,
    pub min_height: f32,
    pub max_height: f32,
    pub color_map: ColorMapParam,
}

impl Default for ElevationLayer {
    fn default() -> Self {
        Self {
            visible: true,
            opacity: 0.8,
            min_height: 0.0,
            max_height: 4000.0,
            color_map: ColorMapParam::named("cool"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SlopeLayer {
    pub visible: bool,
    pub opacity: f32,
    pub color_map: ColorMapParam,
}

impl Default for SlopeLayer {
    fn default() -> Self {
        Self {
            visible: false,
            opacity: 0.8,
            color_map: ColorMapParam::named("jet"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AspectLayer {
    pub visible: bool,
    pub opacity: f32,
    pub color_map: ColorMapParam,
}

impl Default for AspectLayer {
    fn default() -> Self {
        Self {
            visible: false,
            opacity: 0.8,
            color_map: ColorMapParam::named("phase"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShadowLayer {
    pub visible: bool,
    /// Shadow strength.
    pub opacity: f32,
    pub shadow_color: String,
    pub highlight_color: String,
    pub ambient: f32,
    /// Degrees clockwise from north.
    pub azimuth: f32,
    /// Degrees above the horizon.
    pub altitude: f32,
}

impl Default for ShadowLayer {
    fn default() -> Self {
        Self {
            visible: true,
            opacity: 0.7,
            shadow_color: "#000000".to_string(),
            highlight_color: "#ff3300".to_string(),
            ambient: 0.3,
            azimuth: 0.0,
            altitude: 30.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CurvatureLayer {
    pub visible: bool,
    pub opacity: f32,
    pub ridge_threshold: f32,
    pub valley_threshold: f32,
    pub ridge_color: String,
    pub valley_color: String,
}

impl Default for CurvatureLayer {
    fn default() -> Self {
        Self {
            visible: false,
            opacity: 1.0,
            ridge_threshold: 0.7,
            valley_threshold: 0.3,
            ridge_color: "#ffffff".to_string(),
            valley_color: "#000000".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EdgeLayer {
    pub visible: bool,
    pub opacity: f32,
    pub edge_intensity: f32,
    pub edge_color: String,
}

impl Default for EdgeLayer {
    fn default() -> Self {
        Self {
            visible: true,
            opacity: 0.8,
            edge_intensity: 0.4,
            edge_color: "#00fbff".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContourLayer {
    pub visible: bool,
    pub opacity: f32,
    pub max_height: f32,
    pub contour_count: f32,
    pub contour_color: String,
}

impl Default for ContourLayer {
    fn default() -> Self {
        Self {
            visible: false,
            opacity: 1.0,
            max_height: 4000.0,
            contour_count: 20.0,
            contour_color: "#000000".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FloodLayer {
    pub visible: bool,
    pub opacity: f32,
    pub water_level: f32,
    /// Logical texture asset name.
    pub texture: String,
}

impl Default for FloodLayer {
    fn default() -> Self {
        Self {
            visible: false,
            opacity: 0.8,
            water_level: 0.0,
            texture: "water".to_string(),
        }
    }
}

/// Snapshot of every overlay's settings for one tile.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LayerParams {
    pub elevation: ElevationLayer,
    pub slope: SlopeLayer,
    pub aspect: AspectLayer,
    pub shadow: ShadowLayer,
    pub curvature: CurvatureLayer,
    pub edge: EdgeLayer,
    pub contour: ContourLayer,
    pub flooding: FloodLayer,
}

impl LayerParams {
    /// Every layer switched off.
    pub fn hidden() -> Self {
        let mut params = Self::default();
        params.elevation.visible = false;
        params.slope.visible = false;
        params.aspect.visible = false;
        params.shadow.visible = false;
        params.curvature.visible = false;
        params.edge.visible = false;
        params.contour.visible = false;
        params.flooding.visible = false;
        params
    }

    pub fn from_json(json: &str) -> Result<Self, TileError> {
        serde_json::from_str(json).map_err(|e| TileError::Config(format!("layer params: {}", e)))
    }

    pub fn any_visible(&self) -> bool {
        self.elevation.visible
            || self.slope.visible
            || self.aspect.visible
            || self.shadow.visible
            || self.curvature.visible
            || self.edge.visible
            || self.contour.visible
            || self.flooding.visible
    }

    /// Layers that read the 3x3 window (normal, curvature or raw neighbors).
    pub fn needs_window(&self) -> bool {
        self.slope.visible
            || self.aspect.visible
            || self.shadow.visible
            || self.curvature.visible
            || self.edge.visible
    }

    /// Layers that cannot render over a NoData height.
    pub fn needs_height(&self) -> bool {
        self.elevation.visible || self.contour.visible || self.flooding.visible
    }
}

/// Light vector for a sun at `azimuth`/`altitude` degrees, north along -Z.
pub fn light_direction(azimuth: f32, altitude: f32) -> Vector3<f32> {
    let az = azimuth.to_radians();
    let alt = altitude.to_radians();
    Vector3::new(alt.cos() * az.sin(), alt.sin(), -alt.cos() * az.cos())
}

/// Colors parsed and vectors derived once per tile.
#[derive(Clone, Debug)]
pub struct ResolvedStyle {
    pub shadow_color: Rgba,
    pub highlight_color: Rgba,
    pub light_dir: Vector3<f32>,
    pub ridge_color: Rgba,
    pub valley_color: Rgba,
    pub edge_color: Rgba,
    pub contour_color: Rgba,
}

impl ResolvedStyle {
    pub fn resolve(params: &LayerParams) -> Result<Self, TileError> {
        Ok(Self {
            shadow_color: parse_color(&params.shadow.shadow_color)?,
            highlight_color: parse_color(&params.shadow.highlight_color)?,
            light_dir: light_direction(params.shadow.azimuth, params.shadow.altitude),
            ridge_color: parse_color(&params.curvature.ridge_color)?,
            valley_color: parse_color(&params.curvature.valley_color)?,
            edge_color: parse_color(&params.edge.edge_color)?,
            contour_color: parse_color(&params.contour.contour_color)?,
        })
    }
}

/// Running straight-alpha color of one output pixel.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Accumulator {
    pub rgb: Vector3<f32>,
    pub alpha: f32,
}

impl Accumulator {
    pub fn blend(&mut self, src: &Rgba) {
        self.rgb = self.rgb.lerp(&src.xyz(), src.w);
        self.alpha = self.alpha.max(src.w);
    }

    pub fn shade(&mut self, shade: &Shade) {
        self.rgb = self.rgb.lerp(&shade.shadow_rgb, shade.shadow_alpha) + shade.highlight;
        self.alpha = self.alpha * (1.0 - shade.shadow_alpha) + shade.shadow_alpha;
    }

    pub fn to_rgba(&self) -> Rgba {
        Rgba::new(self.rgb.x, self.rgb.y, self.rgb.z, self.alpha)
    }
}

fn with_alpha(rgb: Vector3<f32>, alpha: f32) -> Rgba {
    Rgba::new(rgb.x, rgb.y, rgb.z, alpha)
}

pub fn elevation_color(layer: &ElevationLayer, height: f32, ramp: &ColorRamp) -> Rgba {
    let t = ((height - layer.min_height) / (layer.max_height - layer.min_height)).clamp(0.0, 1.0);
    with_alpha(ramp.sample(t), layer.opacity)
}

pub fn slope_degrees(normal: &Vector3<f32>) -> f32 {
    normal.z.clamp(-1.0, 1.0).acos().to_degrees()
}

pub fn slope_color(layer: &SlopeLayer, normal: &Vector3<f32>, ramp: &ColorRamp) -> Rgba {
    let t = (slope_degrees(normal) / 90.0).clamp(0.0, 1.0);
    with_alpha(ramp.sample(t), layer.opacity)
}

pub fn aspect_color(layer: &AspectLayer, normal: &Vector3<f32>, ramp: &ColorRamp) -> Rgba {
    let t = (normal.y.atan2(normal.x) + PI) / (2.0 * PI);
    with_alpha(ramp.sample(t), layer.opacity)
}

/// Hillshade contribution: a shadow blended in plus an additive highlight.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Shade {
    pub shadow_rgb: Vector3<f32>,
    pub shadow_alpha: f32,
    pub highlight: Vector3<f32>,
}

fn reflect(incident: &Vector3<f32>, normal: &Vector3<f32>) -> Vector3<f32> {
    incident - normal * (2.0 * normal.dot(incident))
}

pub fn hillshade(layer: &ShadowLayer, style: &ResolvedStyle, normal: &Vector3<f32>) -> Shade {
    let light = &style.light_dir;
    let view = Vector3::new(0.0, 0.0, 1.0);

    let diffuse = normal.dot(light).max(0.0);
    let shadow_factor = layer.ambient + (1.0 - layer.ambient) * diffuse;
    let shadow_alpha = (1.0 - shadow_factor) * layer.opacity;

    let reflected = reflect(&-light, normal);
    let specular = view.dot(&reflected).max(0.0).powi(SPECULAR_EXPONENT);

    Shade {
        shadow_rgb: style.shadow_color.xyz(),
        shadow_alpha,
        highlight: style.highlight_color.xyz() * (HIGHLIGHT_STRENGTH * specular),
    }
}

/// Divisor applied to raw curvature at a zoom level.
pub fn curvature_scale(zoom: f32) -> f32 {
    10.0 * (14.0 - zoom).exp2()
}

pub fn curvature_color(
    layer: &CurvatureLayer,
    style: &ResolvedStyle,
    curvature: f32,
    zoom: f32,
) -> Option<Rgba> {
    let scaled = curvature / curvature_scale(zoom);
    let t = ((scaled + 1.0) / 2.0).clamp(0.0, 1.0);

    if t >= layer.ridge_threshold {
        let intensity = if layer.ridge_threshold < 1.0 {
            (t - layer.ridge_threshold) / (1.0 - layer.ridge_threshold)
        } else {
            0.0
        };
        Some(with_alpha(style.ridge_color.xyz(), intensity * layer.opacity))
    } else if t <= layer.valley_threshold {
        let intensity = if layer.valley_threshold > 0.0 {
            (layer.valley_threshold - t) / layer.valley_threshold
        } else {
            0.0
        };
        Some(with_alpha(style.valley_color.xyz(), intensity * layer.opacity))
    } else {
        None
    }
}

pub fn edge_zoom_factor(zoom: f32) -> f32 {
    0.5 * (zoom - 17.0).exp2()
}

pub fn edge_color(layer: &EdgeLayer, style: &ResolvedStyle, m: &HeightMatrix, zoom: f32) -> Rgba {
    let dx = (m[1][2] - m[1][0]).abs();
    let dy = (m[2][1] - m[0][1]).abs();
    let strength = (dx + dy) * edge_zoom_factor(zoom) * layer.edge_intensity;
    with_alpha(
        style.edge_color.xyz(),
        strength.clamp(0.0, EDGE_ALPHA_CAP) * layer.opacity,
    )
}

/// Smoothed banding of a normalized height into `count` steps.
pub fn contour_band(normalized: f32, count: f32) -> f32 {
    let stepped = ((normalized * (count - 0.001)).floor() / (count - 1.0)).clamp(0.0, 1.0);
    normalized * (1.0 - CONTOUR_SMOOTHING) + stepped * CONTOUR_SMOOTHING
}

pub fn contour_normalize(layer: &ContourLayer, height: f32) -> f32 {
    (height / layer.max_height).clamp(0.0, 1.0)
}

/// Outline color when the band changes toward the right or the next row.
pub fn contour_color(
    layer: &ContourLayer,
    style: &ResolvedStyle,
    height: f32,
    height_right: f32,
    height_next_row: f32,
) -> Option<Rgba> {
    let band = |h: f32| contour_band(contour_normalize(layer, h), layer.contour_count);
    let here = band(height);
    let outline = (here - band(height_right)).abs() >= CONTOUR_EDGE_THRESHOLD
        || (here - band(height_next_row)).abs() >= CONTOUR_EDGE_THRESHOLD;
    outline.then(|| with_alpha(style.contour_color.xyz(), layer.opacity))
}

pub fn flood_color(layer: &FloodLayer, height: f32, texture_rgb: Option<Vector3<f32>>) -> Option<Rgba> {
    if height >= layer.water_level {
        return None;
    }
    texture_rgb.map(|rgb| with_alpha(rgb, layer.opacity))
}
