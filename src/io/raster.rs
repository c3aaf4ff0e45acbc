//! GDAL-backed raster handle and coordinate transforms.

use crate::capability::{CoordinateTransform, RasterSource, SceneRaster, TransformFactory};
use crate::types::{GeoTransform, ProductError, ProductResult};
use gdal::spatial_ref::{CoordTransform, SpatialRef};
use gdal::{Dataset, DriverManager};
use std::path::{Path, PathBuf};

/// Geographic CRS used for bounds. A PROJ string keeps lon/lat axis order.
pub const GEOGRAPHIC_DEFINITION: &str = "+proj=longlat +ellps=WGS84 +datum=WGS84 +no_defs";

/// Geocoded raster opened through GDAL.
///
/// Geotransform edits stay in memory; the source file is never written.
/// [`SceneRaster::materialize`] writes a VRT carrying the edited
/// geotransform when one is needed.
pub struct GdalRaster {
    path: PathBuf,
    dataset: Dataset,
    geo_transform: GeoTransform,
    modified: bool,
}

impl GdalRaster {
    pub fn open<P: AsRef<Path>>(path: P) -> ProductResult<Self> {
        let path = path.as_ref().to_path_buf();
        log::info!("Opening raster: {}", path.display());
        let dataset = Dataset::open(&path)?;
        let geo_transform = GeoTransform::from_gdal(dataset.geo_transform()?);
        let (width, height) = dataset.raster_size();
        log::debug!(
            "Raster {}x{}, geotransform {:?}",
            width,
            height,
            geo_transform.to_gdal()
        );
        Ok(Self {
            path,
            dataset,
            geo_transform,
            modified: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SceneRaster for GdalRaster {
    fn size(&self) -> (usize, usize) {
        self.dataset.raster_size()
    }

    fn geo_transform(&self) -> GeoTransform {
        self.geo_transform
    }

    fn set_geo_transform(&mut self, transform: GeoTransform) -> ProductResult<()> {
        if transform.to_gdal().iter().any(|c| !c.is_finite()) {
            return Err(ProductError::Geometry(format!(
                "refusing non-finite geotransform {:?}",
                transform.to_gdal()
            )));
        }
        self.modified = self.modified || transform != self.geo_transform;
        self.geo_transform = transform;
        Ok(())
    }

    fn crs_descriptor(&self) -> ProductResult<String> {
        let wkt = self.dataset.projection();
        if wkt.trim().is_empty() {
            return Err(ProductError::Metadata(format!(
                "raster {} has no spatial reference",
                self.path.display()
            )));
        }
        Ok(wkt)
    }

    fn materialize(&self, dir: &Path) -> ProductResult<PathBuf> {
        if !self.modified {
            return Ok(self.path.clone());
        }

        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "raster".to_string());
        let output = dir.join(format!("{}_rotated.vrt", stem));
        log::debug!("Writing rotated raster view to {}", output.display());

        let driver = DriverManager::get_driver_by_name("VRT")?;
        let mut copy = self.dataset.create_copy(&driver, &output, &[])?;
        copy.set_geo_transform(&self.geo_transform.to_gdal())?;
        // Dropping the dataset flushes the VRT to disk.
        drop(copy);
        Ok(output)
    }
}

/// Opens rasters with GDAL.
#[derive(Debug, Clone, Copy, Default)]
pub struct GdalRasterSource;

impl RasterSource for GdalRasterSource {
    fn open(&self, path: &Path) -> ProductResult<Box<dyn SceneRaster>> {
        Ok(Box::new(GdalRaster::open(path)?))
    }
}

fn traditional_order(srs: &SpatialRef) {
    srs.set_axis_mapping_strategy(gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER);
}

/// Projected to geographic point transform
pub struct GdalCoordinateTransform {
    transform: CoordTransform,
}

impl GdalCoordinateTransform {
    pub fn new(source_definition: &str, target_definition: &str) -> ProductResult<Self> {
        let source = if source_definition.trim_start().starts_with('+') {
            SpatialRef::from_proj4(source_definition)?
        } else {
            SpatialRef::from_wkt(source_definition)?
        };
        let target = SpatialRef::from_proj4(target_definition)?;
        traditional_order(&source);
        traditional_order(&target);
        Ok(Self {
            transform: CoordTransform::new(&source, &target)?,
        })
    }
}

impl CoordinateTransform for GdalCoordinateTransform {
    fn to_geographic(&self, x: f64, y: f64) -> ProductResult<(f64, f64)> {
        let mut xs = [x];
        let mut ys = [y];
        let mut zs = [0.0_f64];
        self.transform
            .transform_coords(&mut xs, &mut ys, &mut zs)
            .map_err(|e| ProductError::upstream("coordinate transform", e.to_string()))?;
        Ok((xs[0], ys[0]))
    }
}

/// Builds GDAL transforms into a fixed geographic CRS.
#[derive(Debug, Clone)]
pub struct GdalTransformFactory {
    target_definition: String,
}

impl GdalTransformFactory {
    pub fn new(target_definition: impl Into<String>) -> Self {
        Self {
            target_definition: target_definition.into(),
        }
    }
}

impl Default for GdalTransformFactory {
    fn default() -> Self {
        Self::new(GEOGRAPHIC_DEFINITION)
    }
}

impl TransformFactory for GdalTransformFactory {
    fn geographic_from(&self, crs_descriptor: &str) -> ProductResult<Box<dyn CoordinateTransform>> {
        Ok(Box::new(GdalCoordinateTransform::new(
            crs_descriptor,
            &self.target_definition,
        )?))
    }
}
