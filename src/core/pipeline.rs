//! Per-scene product pipeline.
//!
//! Runs the clean product and tile pyramid, then the cropped, rotated and
//! annotated preview for one scene. External engines are reached only
//! through the capability traits, so the whole sequence runs against fakes
//! in tests.

use crate::capability::{
    MapProjection, MapRenderRequest, MapRenderer, OutputBounds, OutputType, OverlayAssets,
    OverlayRenderer, RasterSource, ScaleBarPass, SceneRaster, TextMeasurer, TilePyramid,
    TransformFactory, WarpRequest, Warper,
};
use crate::config::{EngineConfig, MapConfig, ProjectionKind};
use crate::core::annotation::{copyright_text, layout, title_text, LayoutRequest};
use crate::core::crop::{crop_spec_for, plan_crop, raster_extent, scale_bar};
use crate::core::frame::{require_utm_zone, FrameAdapter};
use crate::core::rotation::rotate_raster;
use crate::types::{
    AnnotationPlan, GeographicBounds, ProductError, ProductResult, ScaleBar, SceneFailure,
    SceneMetadata, SceneProducts, Stage, StageContext, TargetParameters,
};
use chrono::Utc;
use std::path::{Path, PathBuf};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// North arrow drawn when the configuration names no other glyph.
pub const BUNDLED_NORTH_ARROW: &str = include_str!("../../assets/north_arrow.svg");

/// Clean product file name inside the scene work directory.
pub const CLEAN_PRODUCT_NAME: &str = "sar_image_clean.tiff";
/// Cropped product file name inside the scene work directory.
pub const CROPPED_PRODUCT_NAME: &str = "sar_image_cropped.tif";
/// Tile pyramid directory inside the scene work directory.
pub const TILE_DIR_NAME: &str = "mapTiles";

/// External engines the pipeline drives
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub rasters: &'a dyn RasterSource,
    pub transforms: &'a dyn TransformFactory,
    pub warper: &'a dyn Warper,
    pub tiles: &'a dyn TilePyramid,
    pub renderer: &'a dyn MapRenderer,
    pub measurer: &'a dyn TextMeasurer,
    pub overlay: &'a dyn OverlayRenderer,
}

/// One scene ready to run: raster location, metadata and target
#[derive(Debug, Clone, PartialEq)]
pub struct SceneJob {
    pub raster_path: PathBuf,
    pub metadata: SceneMetadata,
    pub target: TargetParameters,
    /// Intermediate products and the tile pyramid go here
    pub work_dir: PathBuf,
    /// The annotated preview goes here
    pub output_dir: PathBuf,
}

impl SceneJob {
    /// Name used in logs and failure reports.
    pub fn label(&self) -> String {
        format!("{} {}", self.target.target_name, self.metadata.label())
    }
}

/// File name of the annotated preview: `<target>_orb_<orbit>_<ASC|DESC>.png`.
pub fn annotated_file_name(target: &TargetParameters, metadata: &SceneMetadata) -> String {
    format!(
        "{}_orb_{}_{}.png",
        target.target_name, metadata.orbit, metadata.direction
    )
}

/// Copy the scene raster into the tile directory, keeping its file name.
pub fn publish_source(source: &Path, tile_dir: &Path) -> ProductResult<PathBuf> {
    let name = source.file_name().ok_or_else(|| {
        ProductError::Configuration(format!("raster path {} has no file name", source.display()))
    })?;
    std::fs::create_dir_all(tile_dir)?;
    let target = tile_dir.join(name);
    std::fs::copy(source, &target)?;
    log::debug!("Published {} to {}", source.display(), target.display());
    Ok(target)
}

/// Build the basemap render request for a cropped product.
pub fn map_render_request(
    map: &MapConfig,
    grid: PathBuf,
    output: PathBuf,
    projection: MapProjection,
    region: GeographicBounds,
    zoomed: bool,
    bar: &ScaleBar,
) -> MapRenderRequest {
    let mut frame = vec!["WSen+gblack".to_string()];
    if !zoomed {
        frame.push("a".to_string());
    }

    // Dark pass first, slightly offset, so the light bar reads as shadowed.
    let width = bar.width_spec();
    let scale_bars = vec![
        ScaleBarPass {
            placement: format!("jLB+w{}+o{}", width, map.scale_bar_shadow_offset),
            font_color: "black".to_string(),
        },
        ScaleBarPass {
            placement: format!("jLB+w{}+o{}", width, map.scale_bar_offset),
            font_color: "white".to_string(),
        },
    ];

    MapRenderRequest {
        grid,
        output,
        projection,
        region,
        frame,
        colormap: map.colormap.clone(),
        color_range: map.color_range,
        scale_bars,
        font_size_points: map.font_size_points,
        dpi: map.dpi,
    }
}

/// Sequences the geometry stages and external engines for each scene.
pub struct ScenePipeline<'a> {
    config: EngineConfig,
    assets: OverlayAssets,
    collaborators: Collaborators<'a>,
}

impl<'a> ScenePipeline<'a> {
    /// Validate the configuration and load the north-arrow glyph.
    pub fn new(config: EngineConfig, collaborators: Collaborators<'a>) -> ProductResult<Self> {
        config.validate()?;
        if config.annotation.logo.is_none() {
            log::warn!("No logo configured, annotated previews will carry none");
        }
        let north_arrow_svg = match &config.annotation.north_arrow_svg {
            Some(path) => std::fs::read_to_string(path)?,
            None => BUNDLED_NORTH_ARROW.to_string(),
        };
        let assets = OverlayAssets {
            logo: config.annotation.logo.clone(),
            north_arrow_svg,
        };
        Ok(Self {
            config,
            assets,
            collaborators,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Open and process one job.
    pub fn run(&self, job: &SceneJob) -> Result<SceneProducts, SceneFailure> {
        let label = job.label();
        let mut raster = self
            .collaborators
            .rasters
            .open(&job.raster_path)
            .stage(&label, Stage::Decode)?;
        self.process(
            raster.as_mut(),
            &job.metadata,
            &job.target,
            &job.work_dir,
            &job.output_dir,
        )
    }

    /// Process independent scenes, in parallel with the `parallel` feature.
    ///
    /// Results come back in job order; one scene failing does not stop
    /// the others.
    pub fn process_batch(&self, jobs: &[SceneJob]) -> Vec<Result<SceneProducts, SceneFailure>> {
        log::info!("Processing {} scene(s)", jobs.len());

        #[cfg(feature = "parallel")]
        let results: Vec<_> = jobs.par_iter().map(|job| self.run(job)).collect();
        #[cfg(not(feature = "parallel"))]
        let results: Vec<_> = jobs.iter().map(|job| self.run(job)).collect();

        for result in &results {
            if let Err(failure) = result {
                log::warn!("{}", failure);
            }
        }
        results
    }

    /// Produce every artifact for one decoded scene.
    ///
    /// The raster is borrowed mutably because the rotation stage rewrites
    /// its geotransform.
    pub fn process(
        &self,
        raster: &mut dyn SceneRaster,
        metadata: &SceneMetadata,
        target: &TargetParameters,
        work_dir: &Path,
        output_dir: &Path,
    ) -> Result<SceneProducts, SceneFailure> {
        let label = format!("{} {}", target.target_name, metadata.label());
        let c = &self.collaborators;
        let config = &self.config;
        log::info!("Processing scene {}", label);

        std::fs::create_dir_all(work_dir)
            .map_err(ProductError::from)
            .stage(&label, Stage::CleanProduct)?;

        // Geographic frame for everything below
        let crs = raster.crs_descriptor().stage(&label, Stage::Bounds)?;
        let transform = c
            .transforms
            .geographic_from(&crs)
            .stage(&label, Stage::Bounds)?;
        let frame = FrameAdapter::new(transform.as_ref(), config.bounds_densify);

        // Configuration errors surface before any external engine runs.
        let crop_spec =
            crop_spec_for(target, config.allow_full_extent).stage(&label, Stage::CropPlanning)?;
        let plan = plan_crop(&*raster, &crop_spec).stage(&label, Stage::CropPlanning)?;
        let projection = match config.map.projection {
            ProjectionKind::Mercator => MapProjection::Mercator {
                width_inches: config.map.width_inches,
            },
            ProjectionKind::Utm => MapProjection::Utm {
                zone: require_utm_zone(&crs)
                    .stage(&label, Stage::Render)?
                    .to_string(),
                width_inches: config.map.width_inches,
            },
        };

        // Step 1: clean product and tile pyramid
        log::info!("Generating clean product");
        let (width, height) = raster.size();
        let full_extent = raster_extent(&raster.geo_transform(), width, height);
        let clean_bounds = frame
            .transform_bounds(&full_extent)
            .stage(&label, Stage::Bounds)?;
        log::debug!("Clean product region {}", clean_bounds.to_region_string());

        let source_path = raster.materialize(work_dir).stage(&label, Stage::CleanProduct)?;
        let clean_request = WarpRequest {
            output: work_dir.join(CLEAN_PRODUCT_NAME),
            target_crs: Some(config.clean_crs.clone()),
            output_bounds: None,
            output_type: Some(OutputType::Byte),
            nodata: Some(config.clean_nodata),
            threads: config.threads,
        };
        let clean_product = c
            .warper
            .warp(&source_path, &clean_request)
            .stage(&label, Stage::CleanProduct)?;

        log::info!("Building tile pyramid");
        let tile_dir = c
            .tiles
            .build(
                &clean_product,
                config.tile_zoom.0..=config.tile_zoom.1,
                &work_dir.join(TILE_DIR_NAME),
                config.threads,
            )
            .stage(&label, Stage::Tiles)?;

        // The full-resolution source is published next to its tiles.
        let published_raster =
            publish_source(&source_path, &tile_dir).stage(&label, Stage::Tiles)?;

        // Step 2: cropped product
        log::info!("Generating cropped product");
        let crop_bounds = frame
            .transform_bounds(&plan.bounds)
            .stage(&label, Stage::Bounds)?;
        log::debug!("Cropped region {}", crop_bounds.to_region_string());

        if target.rotation_degrees != 0.0 {
            rotate_raster(raster, target.rotation_degrees, plan.pivot)
                .stage(&label, Stage::Rotation)?;
        }

        let crop_source = raster.materialize(work_dir).stage(&label, Stage::Warp)?;
        let crop_request = WarpRequest {
            output: work_dir.join(CROPPED_PRODUCT_NAME),
            target_crs: Some(config.geographic_crs.clone()),
            output_bounds: Some(OutputBounds::Geographic(crop_bounds)),
            output_type: None,
            nodata: None,
            threads: config.threads,
        };
        let cropped_product = c
            .warper
            .warp(&crop_source, &crop_request)
            .stage(&label, Stage::Warp)?;

        // Step 3: basemap
        let bar = scale_bar(plan.side_length);
        log::info!("Scale bar {} {}", bar.length, bar.unit);

        let file_name = annotated_file_name(target, metadata);
        let map_request = map_render_request(
            &config.map,
            cropped_product.clone(),
            work_dir.join(&file_name),
            projection,
            crop_bounds,
            target.zoomed,
            &bar,
        );
        let map_image = c
            .renderer
            .render(&map_request)
            .stage(&label, Stage::Render)?;

        // Step 4: annotations
        log::info!("Adding annotations");
        let annotated_product = output_dir.join(&file_name);
        let annotation_plan = self
            .annotate(&map_image, &annotated_product, metadata, target)
            .stage(&label, Stage::Annotation)?;

        log::info!("Scene {} complete: {}", label, annotated_product.display());
        Ok(SceneProducts {
            clean_product,
            tile_dir,
            published_raster,
            cropped_product,
            annotated_product,
            clean_bounds,
            crop_bounds,
            scale_bar: bar,
            annotation_plan,
        })
    }

    fn annotate(
        &self,
        map_image: &Path,
        output: &Path,
        metadata: &SceneMetadata,
        target: &TargetParameters,
    ) -> ProductResult<AnnotationPlan> {
        let c = &self.collaborators;
        let settings = &self.config.annotation;

        let canvas = c.overlay.image_size(map_image)?;
        let logo_size = match &self.assets.logo {
            Some(logo) => Some(c.overlay.image_size(logo)?),
            None => None,
        };
        let glyph_size = if target.rotation_degrees != 0.0 {
            c.overlay.glyph_size(&self.assets.north_arrow_svg)?
        } else {
            (0.0, 0.0)
        };

        let request = LayoutRequest {
            canvas,
            title: title_text(&target.target_name, metadata),
            copyright: copyright_text(
                &settings.copyright_holder,
                &settings.copyright_owner,
                Utc::now(),
            ),
            logo_size,
            zoomed: target.zoomed,
            rotation_degrees: target.rotation_degrees,
            glyph_size,
        };
        let plan = layout(c.measurer, &request, &settings.layout)?;

        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        c.overlay.compose(map_image, output, &plan, &self.assets)?;
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PassDirection, ScaleUnit};
    use chrono::TimeZone;

    fn region() -> GeographicBounds {
        GeographicBounds {
            min_lon: -153.5,
            max_lon: -153.4,
            min_lat: 59.3,
            max_lat: 59.4,
        }
    }

    #[test]
    fn test_map_request_zoomed() {
        let bar = ScaleBar {
            length: 800.0,
            unit: ScaleUnit::Meters,
        };
        let request = map_render_request(
            &MapConfig::default(),
            PathBuf::from("crop.tif"),
            PathBuf::from("map.png"),
            MapProjection::Mercator { width_inches: 6.0 },
            region(),
            true,
            &bar,
        );
        assert_eq!(request.frame, vec!["WSen+gblack".to_string()]);
        assert_eq!(request.projection.spec(), "M6i");
        assert_eq!(request.scale_bars.len(), 2);
        assert_eq!(request.scale_bars[0].placement, "jLB+w800e+o0.224i/0.2i");
        assert_eq!(request.scale_bars[0].font_color, "black");
        assert_eq!(request.scale_bars[1].placement, "jLB+w800e+o0.212i");
        assert_eq!(request.scale_bars[1].font_color, "white");
        assert_eq!(request.dpi, 300);
        assert_eq!(request.color_range, (0.0, 300.0));
    }

    #[test]
    fn test_map_request_full_extent_adds_annotations() {
        let bar = ScaleBar {
            length: 2.0,
            unit: ScaleUnit::Kilometers,
        };
        let request = map_render_request(
            &MapConfig::default(),
            PathBuf::from("crop.tif"),
            PathBuf::from("map.png"),
            MapProjection::Mercator { width_inches: 6.0 },
            region(),
            false,
            &bar,
        );
        assert_eq!(request.frame, vec!["WSen+gblack".to_string(), "a".to_string()]);
        assert!(request.scale_bars[1].placement.starts_with("jLB+w2k"));
    }

    #[test]
    fn test_annotated_file_name() {
        let metadata = SceneMetadata {
            orbit: "42".to_string(),
            direction: PassDirection::Descending,
            mission_code: "TDX-1".to_string(),
            mission_name: "TanDEM-X".to_string(),
            scene_time: Utc.with_ymd_and_hms(2024, 5, 1, 16, 20, 0).unwrap(),
            image_file_name: "IMAGE_HH_SRA_spot_047.tif".to_string(),
            order_name: "Augustine_20240501".to_string(),
            order_id: "Aug".to_string(),
        };
        let target = TargetParameters::fallback("Augustine");
        assert_eq!(
            annotated_file_name(&target, &metadata),
            "Augustine_orb_42_DESC.png"
        );
    }

    #[test]
    fn test_publish_source_copies_into_tile_dir() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("sar_image.tif");
        std::fs::write(&source, b"GeoTIFF bytes").unwrap();

        let tiles = dir.path().join("mapTiles");
        let published = publish_source(&source, &tiles).unwrap();
        assert_eq!(published, tiles.join("sar_image.tif"));
        assert_eq!(std::fs::read(&published).unwrap(), b"GeoTIFF bytes");
        assert!(source.exists());
    }

    #[test]
    fn test_publish_missing_source_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = publish_source(&dir.path().join("absent.tif"), dir.path()).unwrap_err();
        assert!(matches!(err, ProductError::Io(_)));
    }

    #[test]
    fn test_bundled_north_arrow_is_svg() {
        assert!(BUNDLED_NORTH_ARROW.contains("<svg"));
    }
}
