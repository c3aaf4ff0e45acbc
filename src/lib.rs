//! sarmap: georeferenced map products from TerraSAR-X / TanDEM-X scenes
//!
//! This library turns a geocoded SAR raster into a clean web-mercator
//! product with a tile pyramid, plus a cropped, rotated and annotated
//! preview map. Warping, tiling, basemap rendering and glyph
//! rasterization are delegated to external engines behind the traits in
//! [`capability`].

pub mod capability;
pub mod config;
pub mod core;
pub mod io;
pub mod types;

#[cfg(feature = "python")]
mod python;

// Re-export main types and functions for easier access
pub use capability::{
    CoordinateTransform, MapRenderer, OverlayRenderer, RasterSource, SceneRaster, TextMeasurer,
    ThreadHint, TilePyramid, TransformFactory, Warper,
};
pub use config::{EngineConfig, MissingTargetPolicy, MissionTable};
pub use core::{Collaborators, SceneJob, ScenePipeline};
pub use types::{
    AnnotationPlan, CropSpec, GeoTransform, GeographicBounds, ProductError, ProductResult,
    ProjectedRect, ScaleBar, ScaleUnit, SceneFailure, SceneMetadata, SceneProducts, Stage,
    TargetParameters,
};
