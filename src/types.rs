use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use regex::Regex;
use std::path::PathBuf;
use std::sync::OnceLock;

/// Axis and sign conventions shared by every geometry stage.
///
/// These are easy to invert silently, so code refers to them by name
/// instead of repeating the literal signs.
pub mod conventions {
    /// Projected Y decreases as pixel rows increase (north-up rasters have
    /// a negative pixel height).
    pub const PROJECTED_Y_DECREASES_DOWNWARD: bool = true;

    /// Positive rotation angles turn the pixel grid clockwise on screen
    /// (pixel Y points down, so the standard counter-clockwise matrix
    /// appears clockwise).
    pub const ROTATION_POSITIVE_CLOCKWISE_ON_SCREEN: bool = true;

    /// The north arrow is turned by the same signed angle as the pixel
    /// grid. Both live in a Y-down space.
    pub const NORTH_ARROW_ROTATION_SIGN: f64 = 1.0;

    /// Full turn in degrees.
    pub const FULL_TURN_DEGREES: f64 = 360.0;
}

/// Six-coefficient affine mapping from pixel to projected coordinates
/// (GDAL order).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform without rotation terms.
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            top_left_x,
            pixel_width,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height,
        }
    }

    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// Map a pixel coordinate to projected coordinates.
    pub fn apply(&self, px: f64, py: f64) -> (f64, f64) {
        (
            self.top_left_x + px * self.pixel_width + py * self.rotation_x,
            self.top_left_y + px * self.rotation_y + py * self.pixel_height,
        )
    }

    pub fn has_rotation(&self) -> bool {
        self.rotation_x != 0.0 || self.rotation_y != 0.0
    }
}

/// Axis-aligned rectangle in projected units, stored upper-left then
/// lower-right: `[min_x, max_y, max_x, min_y]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProjectedRect {
    pub min_x: f64,
    pub max_y: f64,
    pub max_x: f64,
    pub min_y: f64,
}

impl ProjectedRect {
    pub fn as_array(&self) -> [f64; 4] {
        [self.min_x, self.max_y, self.max_x, self.min_y]
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_x + self.max_x) / 2.0,
            (self.min_y + self.max_y) / 2.0,
        )
    }

    /// Corners clockwise from the upper-left.
    pub fn corners(&self) -> [(f64, f64); 4] {
        [
            (self.min_x, self.max_y),
            (self.max_x, self.max_y),
            (self.max_x, self.min_y),
            (self.min_x, self.min_y),
        ]
    }
}

/// Geographic bounding box in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeographicBounds {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl GeographicBounds {
    /// Region string in `west/east/south/north` order.
    pub fn to_region_string(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.min_lon, self.max_lon, self.min_lat, self.max_lat
        )
    }
}

/// How the crop window is chosen for one scene
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CropSpec {
    /// Square window around a projected point
    Centered {
        center_x: f64,
        center_y: f64,
        side_length: f64,
    },
    /// The raster's own extent
    FullExtent,
}

/// Scale bar units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScaleUnit {
    Meters,
    Kilometers,
}

impl ScaleUnit {
    /// Unit suffix understood by the basemap renderer.
    pub fn suffix(&self) -> &'static str {
        match self {
            ScaleUnit::Meters => "e",
            ScaleUnit::Kilometers => "k",
        }
    }
}

impl std::fmt::Display for ScaleUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScaleUnit::Meters => write!(f, "m"),
            ScaleUnit::Kilometers => write!(f, "km"),
        }
    }
}

/// Rounded map scale bar length
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleBar {
    pub length: f64,
    pub unit: ScaleUnit,
}

impl ScaleBar {
    /// Length and unit suffix, e.g. `800e` or `2k`.
    pub fn width_spec(&self) -> String {
        format!("{}{}", self.length, self.unit.suffix())
    }
}

/// Pixel position of a placed element's top-left corner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelPosition {
    pub x: i64,
    pub y: i64,
}

impl PixelPosition {
    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }

    pub fn offset(&self, dx: i64, dy: i64) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }
}

/// Placement of the rotated north arrow
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NorthArrowPlan {
    pub rotation_degrees: f64,
    pub scale_factor: f64,
    pub anchor_position: PixelPosition,
    /// Size of the rasterized arrow in pixels
    pub width: f64,
    pub height: f64,
}

/// Everything needed to draw the annotations on one output image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationPlan {
    pub title_text: String,
    pub title_font_size: u32,
    pub title_position: PixelPosition,
    pub copyright_text: String,
    pub copyright_font_size: u32,
    pub copyright_position: PixelPosition,
    pub logo_position: Option<PixelPosition>,
    pub north_arrow: Option<NorthArrowPlan>,
    pub shadow_offset: i64,
}

/// Satellite pass direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PassDirection {
    Ascending,
    Descending,
}

impl std::fmt::Display for PassDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PassDirection::Ascending => write!(f, "ASC"),
            PassDirection::Descending => write!(f, "DESC"),
        }
    }
}

/// Scene metadata extracted from the product XML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneMetadata {
    pub orbit: String,
    pub direction: PassDirection,
    pub mission_code: String,
    pub mission_name: String,
    pub scene_time: DateTime<Utc>,
    pub image_file_name: String,
    pub order_name: String,
    pub order_id: String,
}

impl SceneMetadata {
    /// Short identifier used in log lines and failure reports.
    pub fn label(&self) -> String {
        format!(
            "orbit {}-{} {}",
            self.orbit,
            self.direction,
            self.scene_time.format("%Y%m%d")
        )
    }
}

/// Per-target crop and display parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetParameters {
    pub target_name: String,
    #[serde(default)]
    pub center_x: Option<f64>,
    #[serde(default)]
    pub center_y: Option<f64>,
    #[serde(default)]
    pub side_length: Option<f64>,
    #[serde(default)]
    pub rotation_degrees: f64,
    #[serde(default)]
    pub zoomed: bool,
}

impl TargetParameters {
    /// Parameters used when no target record exists.
    pub fn fallback(target_name: impl Into<String>) -> Self {
        Self {
            target_name: target_name.into(),
            center_x: None,
            center_y: None,
            side_length: None,
            rotation_degrees: 0.0,
            zoomed: false,
        }
    }
}

/// Artifacts written for one scene
#[derive(Debug, Clone, PartialEq)]
pub struct SceneProducts {
    pub clean_product: PathBuf,
    pub tile_dir: PathBuf,
    /// Copy of the scene raster inside `tile_dir`
    pub published_raster: PathBuf,
    pub cropped_product: PathBuf,
    pub annotated_product: PathBuf,
    pub clean_bounds: GeographicBounds,
    pub crop_bounds: GeographicBounds,
    pub scale_bar: ScaleBar,
    pub annotation_plan: AnnotationPlan,
}

/// Pipeline stage, used to report where a scene failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Metadata,
    Decode,
    CleanProduct,
    Tiles,
    CropPlanning,
    Rotation,
    Warp,
    Bounds,
    Render,
    Annotation,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Metadata => "metadata",
            Stage::Decode => "raster decode",
            Stage::CleanProduct => "clean product",
            Stage::Tiles => "tile pyramid",
            Stage::CropPlanning => "crop planning",
            Stage::Rotation => "rotation",
            Stage::Warp => "warp",
            Stage::Bounds => "bounds",
            Stage::Render => "map render",
            Stage::Annotation => "annotation",
        };
        write!(f, "{}", name)
    }
}

/// Error types for map product generation
#[derive(Debug, thiserror::Error)]
pub enum ProductError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Geometry error: {0}")]
    Geometry(String),

    #[error("Upstream failure in {capability}: {message}")]
    Upstream { capability: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("XML parsing error: {0}")]
    XmlParsing(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProductError {
    pub fn upstream(capability: impl Into<String>, message: impl Into<String>) -> Self {
        ProductError::Upstream {
            capability: capability.into(),
            message: message.into(),
        }
    }
}

/// Compile `pattern` once into `cell` and hand out the cached regex.
pub(crate) fn cached_regex(
    cell: &'static OnceLock<Regex>,
    pattern: &str,
) -> ProductResult<&'static Regex> {
    if let Some(regex) = cell.get() {
        return Ok(regex);
    }
    let regex = Regex::new(pattern)
        .map_err(|e| ProductError::Configuration(format!("invalid pattern '{}': {}", pattern, e)))?;
    Ok(cell.get_or_init(|| regex))
}

/// Result type for map product operations
pub type ProductResult<T> = Result<T, ProductError>;

/// A scene that failed, with the stage it failed in
#[derive(Debug, thiserror::Error)]
#[error("scene {scene} failed during {stage}: {source}")]
pub struct SceneFailure {
    pub scene: String,
    pub stage: Stage,
    #[source]
    pub source: ProductError,
}

/// Attach scene and stage context to a result.
pub trait StageContext<T> {
    fn stage(self, scene: &str, stage: Stage) -> Result<T, SceneFailure>;
}

impl<T> StageContext<T> for ProductResult<T> {
    fn stage(self, scene: &str, stage: Stage) -> Result<T, SceneFailure> {
        self.map_err(|source| SceneFailure {
            scene: scene.to_string(),
            stage,
            source,
        })
    }
}
