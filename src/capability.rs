//! Boundary contracts for the external engines the core drives.
//!
//! Raster decoding, warping, tiling, basemap rendering and glyph
//! rasterization are done by collaborators behind these traits. The core
//! only sequences them and supplies the geometry.

use crate::types::{AnnotationPlan, GeoTransform, GeographicBounds, ProductResult, ProjectedRect};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

/// Decoded geocoded raster owned by the pipeline for one scene.
pub trait SceneRaster {
    /// Pixel dimensions `(width, height)`.
    fn size(&self) -> (usize, usize);

    fn geo_transform(&self) -> GeoTransform;

    /// Overwrite the geotransform. Only the rotation stage calls this.
    fn set_geo_transform(&mut self, transform: GeoTransform) -> ProductResult<()>;

    /// Spatial reference as WKT.
    fn crs_descriptor(&self) -> ProductResult<String>;

    /// Write the raster, with its current geotransform, somewhere external
    /// tools can read it. Returns the written path.
    fn materialize(&self, dir: &Path) -> ProductResult<PathBuf>;
}

/// Opens rasters by path.
pub trait RasterSource: Send + Sync {
    fn open(&self, path: &Path) -> ProductResult<Box<dyn SceneRaster>>;
}

/// Point transform from a projected CRS into geographic lon/lat.
pub trait CoordinateTransform {
    /// Returns `(lon, lat)` in degrees.
    fn to_geographic(&self, x: f64, y: f64) -> ProductResult<(f64, f64)>;
}

/// Builds point transforms for a source CRS.
pub trait TransformFactory: Send + Sync {
    fn geographic_from(&self, crs_descriptor: &str) -> ProductResult<Box<dyn CoordinateTransform>>;
}

/// Thread-count hint passed to multi-threaded external engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadHint {
    AllCpus,
    Count(usize),
}

impl ThreadHint {
    /// Value for GDAL's `NUM_THREADS` option.
    pub fn gdal_value(&self) -> String {
        match self {
            ThreadHint::AllCpus => "ALL_CPUS".to_string(),
            ThreadHint::Count(n) => n.to_string(),
        }
    }

    /// Concrete process count for tools that need a number.
    pub fn resolve(&self) -> usize {
        match self {
            ThreadHint::AllCpus => rayon::current_num_threads().max(1),
            ThreadHint::Count(n) => (*n).max(1),
        }
    }
}

/// Output pixel type of a warp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputType {
    Byte,
    Float32,
}

impl OutputType {
    pub fn gdal_name(&self) -> &'static str {
        match self {
            OutputType::Byte => "Byte",
            OutputType::Float32 => "Float32",
        }
    }
}

/// Output window of a warp, in the target CRS.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputBounds {
    Projected(ProjectedRect),
    Geographic(GeographicBounds),
}

/// Resample/reproject request.
#[derive(Debug, Clone, PartialEq)]
pub struct WarpRequest {
    pub output: PathBuf,
    pub target_crs: Option<String>,
    pub output_bounds: Option<OutputBounds>,
    pub output_type: Option<OutputType>,
    pub nodata: Option<f64>,
    pub threads: ThreadHint,
}

/// Resample/reproject engine.
pub trait Warper: Send + Sync {
    /// Warp `input` (a materialized raster path) as requested and return the
    /// output path.
    fn warp(&self, input: &Path, request: &WarpRequest) -> ProductResult<PathBuf>;
}

/// Builds a map-tile directory tree from a raster.
pub trait TilePyramid: Send + Sync {
    fn build(
        &self,
        raster: &Path,
        zoom: RangeInclusive<u8>,
        out_dir: &Path,
        threads: ThreadHint,
    ) -> ProductResult<PathBuf>;
}

/// Basemap projection for the preview map.
#[derive(Debug, Clone, PartialEq)]
pub enum MapProjection {
    Mercator { width_inches: f64 },
    Utm { zone: String, width_inches: f64 },
}

impl MapProjection {
    /// Projection string in the renderer's notation, e.g. `M6i` or `U5N/6i`.
    pub fn spec(&self) -> String {
        match self {
            MapProjection::Mercator { width_inches } => format!("M{}i", width_inches),
            MapProjection::Utm { zone, width_inches } => format!("U{}/{}i", zone, width_inches),
        }
    }
}

/// One pass of the map scale bar.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaleBarPass {
    /// Placement string, e.g. `jLB+w800e+o0.212i`.
    pub placement: String,
    pub font_color: String,
}

/// Everything the basemap renderer needs to draw the preview map.
#[derive(Debug, Clone, PartialEq)]
pub struct MapRenderRequest {
    pub grid: PathBuf,
    pub output: PathBuf,
    pub projection: MapProjection,
    pub region: GeographicBounds,
    pub frame: Vec<String>,
    pub colormap: String,
    pub color_range: (f64, f64),
    pub scale_bars: Vec<ScaleBarPass>,
    pub font_size_points: u32,
    pub dpi: u32,
}

/// Vector basemap renderer.
pub trait MapRenderer: Send + Sync {
    fn render(&self, request: &MapRenderRequest) -> ProductResult<PathBuf>;
}

/// Bounding box of laid-out text relative to its anchor point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextExtent {
    /// Offset of the box's left edge from the anchor
    pub x: f64,
    /// Offset of the box's top edge from the anchor
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Measures multi-line text at a given font size.
///
/// Width must be non-decreasing in `font_size` for a fixed text.
pub trait TextMeasurer: Send + Sync {
    fn measure(&self, text: &str, font_size: u32) -> ProductResult<TextExtent>;
}

/// Images drawn next to the annotations.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayAssets {
    pub logo: Option<PathBuf>,
    pub north_arrow_svg: String,
}

/// Draws an annotation plan onto a finished raster image.
pub trait OverlayRenderer: Send + Sync {
    /// Pixel size of an image file.
    fn image_size(&self, image: &Path) -> ProductResult<(u32, u32)>;

    /// Intrinsic size of an SVG glyph.
    fn glyph_size(&self, svg: &str) -> ProductResult<(f64, f64)>;

    /// Draw `plan` over `base` and write the result to `output`.
    ///
    /// `output` is only created once the whole composite succeeded.
    fn compose(
        &self,
        base: &Path,
        output: &Path,
        plan: &AnnotationPlan,
        assets: &OverlayAssets,
    ) -> ProductResult<()>;
}
