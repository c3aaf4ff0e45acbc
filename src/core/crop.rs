use crate::capability::SceneRaster;
use crate::types::{
    CropSpec, GeoTransform, ProductError, ProductResult, ProjectedRect, ScaleBar, ScaleUnit,
    TargetParameters,
};

/// The scale bar spans this fraction of the crop side.
pub const SCALE_BAR_FRACTION: f64 = 1.0 / 5.0;

/// Raw lengths at or above this many meters are shown in kilometers.
pub const KILOMETER_THRESHOLD_M: f64 = 1000.0;

/// Meter-scale bars snap to multiples of this length.
pub const METER_STEP_M: f64 = 50.0;

/// Kilometer-scale bars snap to multiples of this length (in meters).
pub const KILOMETER_STEP_M: f64 = 1000.0;

/// Result of crop planning
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropPlan {
    pub bounds: ProjectedRect,
    /// Side length of the window in projected units
    pub side_length: f64,
    /// Point the rotation turns about
    pub pivot: (f64, f64),
}

/// Extent of a raster in projected units.
///
/// Assumes a north-up geotransform: the far corner is the origin plus the
/// pixel sizes times the dimensions (pixel height is negative).
pub fn raster_extent(gt: &GeoTransform, width: usize, height: usize) -> ProjectedRect {
    let x_min = gt.top_left_x;
    let y_max = gt.top_left_y;
    let x_max = x_min + gt.pixel_width * width as f64;
    let y_min = y_max + gt.pixel_height * height as f64;
    ProjectedRect {
        min_x: x_min,
        max_y: y_max,
        max_x: x_max,
        min_y: y_min,
    }
}

/// Compute the projected crop window and its physical side length.
pub fn plan_crop(raster: &dyn SceneRaster, spec: &CropSpec) -> ProductResult<CropPlan> {
    let (width, height) = raster.size();
    plan_crop_for(&raster.geo_transform(), width, height, spec)
}

/// [`plan_crop`] on raw raster geometry.
pub fn plan_crop_for(
    gt: &GeoTransform,
    width: usize,
    height: usize,
    spec: &CropSpec,
) -> ProductResult<CropPlan> {
    match *spec {
        CropSpec::FullExtent => {
            if width == 0 || height == 0 {
                return Err(ProductError::Geometry(format!(
                    "raster has empty extent {}x{}",
                    width, height
                )));
            }
            let bounds = raster_extent(gt, width, height);
            let side_length = bounds.width();
            log::debug!("Full-extent crop: {:?}, side {:.1}", bounds.as_array(), side_length);
            Ok(CropPlan {
                bounds,
                side_length,
                pivot: bounds.center(),
            })
        }
        CropSpec::Centered {
            center_x,
            center_y,
            side_length,
        } => {
            validate_side(side_length)?;
            let half_side = side_length / 2.0;
            // Top of the box is the larger Y: projected Y falls as rows grow.
            let bounds = ProjectedRect {
                min_x: center_x - half_side,
                max_y: center_y + half_side,
                max_x: center_x + half_side,
                min_y: center_y - half_side,
            };
            log::debug!("Centered crop: {:?}", bounds.as_array());
            Ok(CropPlan {
                bounds,
                side_length,
                pivot: (center_x, center_y),
            })
        }
    }
}

fn validate_side(side_length: f64) -> ProductResult<()> {
    if !side_length.is_finite() || side_length <= 0.0 {
        return Err(ProductError::Configuration(format!(
            "crop side length must be positive, got {}",
            side_length
        )));
    }
    Ok(())
}

/// Derive the crop spec from target parameters.
///
/// A center and side give a centered window. Anything less falls back to
/// the full extent when allowed, otherwise it is a configuration error.
pub fn crop_spec_for(target: &TargetParameters, allow_full_extent: bool) -> ProductResult<CropSpec> {
    match (target.center_x, target.center_y, target.side_length) {
        (Some(center_x), Some(center_y), Some(side_length)) => {
            if !center_x.is_finite() || !center_y.is_finite() {
                return Err(ProductError::Configuration(format!(
                    "crop center for {} is not finite",
                    target.target_name
                )));
            }
            validate_side(side_length)?;
            Ok(CropSpec::Centered {
                center_x,
                center_y,
                side_length,
            })
        }
        _ if allow_full_extent => {
            log::info!(
                "No crop window for {}, using the full image extent",
                target.target_name
            );
            Ok(CropSpec::FullExtent)
        }
        _ => Err(ProductError::Configuration(format!(
            "missing crop center/size for {} and full-extent fallback is disabled",
            target.target_name
        ))),
    }
}

/// Round scale bar length for a crop side.
///
/// One fifth of the side, snapped to 50 m below 1000 m and to whole
/// kilometers from 1000 m up. Exact halves round to even.
pub fn scale_bar(physical_side_length: f64) -> ScaleBar {
    let raw = physical_side_length * SCALE_BAR_FRACTION;
    if raw < KILOMETER_THRESHOLD_M {
        ScaleBar {
            length: (raw / METER_STEP_M).round_ties_even() * METER_STEP_M,
            unit: ScaleUnit::Meters,
        }
    } else {
        let meters = (raw / KILOMETER_STEP_M).round_ties_even() * KILOMETER_STEP_M;
        ScaleBar {
            length: meters / 1000.0,
            unit: ScaleUnit::Kilometers,
        }
    }
}
