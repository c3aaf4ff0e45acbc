//! Outer surfaces: product metadata, GDAL rasters, command-line engines
//! and annotation compositing

pub mod external;
pub mod metadata;
pub mod overlay;
pub mod raster;

pub use external::{Gdal2TilesCommand, GdalWarpCommand, GmtMapRenderer};
pub use metadata::{load_scene_job, parse_metadata_xml, resolve_target, TargetLookup, TargetTable};
pub use overlay::{SvgOverlayRenderer, SvgTextMeasurer};
pub use raster::{GdalRaster, GdalRasterSource, GdalTransformFactory};
