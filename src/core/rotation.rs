//! Rotation of a raster's geotransform about a physical point.
//!
//! The rotation is given in projected space but applied in pixel space,
//! since the geotransform maps pixel to projected coordinates:
//!
//! ```text
//! gt' = gt * (T(pivot) * R(angle) * T(-pivot))
//! ```
//!
//! where `pivot` is the projected pivot expressed in pixel coordinates.
//! The pixel grid is rotated about the pivot first, then mapped through the
//! original geotransform.

use crate::capability::SceneRaster;
use crate::types::conventions::FULL_TURN_DEGREES;
use crate::types::{GeoTransform, ProductError, ProductResult};
use kurbo::{Affine, Vec2};

/// Smallest determinant accepted for a geotransform.
const MIN_DETERMINANT: f64 = 1e-12;

/// Cosine and sine of an angle in degrees, exact at multiples of 90.
pub fn cos_sin_deg(degrees: f64) -> (f64, f64) {
    let normalized = degrees.rem_euclid(FULL_TURN_DEGREES);
    if normalized == 0.0 {
        (1.0, 0.0)
    } else if normalized == 90.0 {
        (0.0, 1.0)
    } else if normalized == 180.0 {
        (-1.0, 0.0)
    } else if normalized == 270.0 {
        (0.0, -1.0)
    } else {
        let (s, c) = normalized.to_radians().sin_cos();
        (c, s)
    }
}

/// Rotation by `degrees` about `pivot`.
pub fn rotation_about(degrees: f64, pivot: Vec2) -> Affine {
    let (c, s) = cos_sin_deg(degrees);
    let rotate = Affine::new([c, s, -s, c, 0.0, 0.0]);
    Affine::translate(pivot) * rotate * Affine::translate(-pivot)
}

/// kurbo stores `[a, b, c, d, e, f]` with `x' = a x + c y + e`,
/// `y' = b x + d y + f`.
pub fn geo_transform_to_affine(gt: &GeoTransform) -> Affine {
    Affine::new([
        gt.pixel_width,
        gt.rotation_y,
        gt.rotation_x,
        gt.pixel_height,
        gt.top_left_x,
        gt.top_left_y,
    ])
}

pub fn affine_to_geo_transform(affine: Affine) -> GeoTransform {
    let [a, b, c, d, e, f] = affine.as_coeffs();
    GeoTransform {
        top_left_x: e,
        pixel_width: a,
        rotation_x: c,
        top_left_y: f,
        rotation_y: b,
        pixel_height: d,
    }
}

/// Express a projected point in pixel coordinates.
///
/// North-up transforms divide by the pixel size directly. A transform that
/// already carries rotation terms (from an earlier rotation) is inverted in
/// full, so repeated rotations about one pivot keep the same pixel pivot.
pub fn pixel_pivot(gt: &GeoTransform, pivot: (f64, f64)) -> ProductResult<Vec2> {
    if gt.has_rotation() {
        let affine = geo_transform_to_affine(gt);
        if affine.determinant().abs() < MIN_DETERMINANT {
            return Err(ProductError::Geometry(
                "geotransform is singular and cannot be inverted".to_string(),
            ));
        }
        let p = affine.inverse() * kurbo::Point::new(pivot.0, pivot.1);
        return Ok(p.to_vec2());
    }

    if gt.pixel_width == 0.0 || gt.pixel_height == 0.0 {
        return Err(ProductError::Geometry(format!(
            "geotransform has zero pixel size ({}, {})",
            gt.pixel_width, gt.pixel_height
        )));
    }
    // The Y offset is negative for north-up rasters and so is the pixel
    // height; the quotient is a positive row.
    Ok(Vec2::new(
        (pivot.0 - gt.top_left_x) / gt.pixel_width,
        (pivot.1 - gt.top_left_y) / gt.pixel_height,
    ))
}

/// Rotate a geotransform by `angle_degrees` about a projected pivot point.
///
/// An angle of zero returns the input unchanged.
pub fn rotate_around(
    gt: &GeoTransform,
    angle_degrees: f64,
    pivot_projected: (f64, f64),
) -> ProductResult<GeoTransform> {
    if !angle_degrees.is_finite() {
        return Err(ProductError::Geometry(format!(
            "rotation angle is not finite: {}",
            angle_degrees
        )));
    }

    let pivot = pixel_pivot(gt, pivot_projected)?;
    let source = geo_transform_to_affine(gt);
    if source.determinant().abs() < MIN_DETERMINANT {
        return Err(ProductError::Geometry(
            "geotransform is singular and cannot be rotated".to_string(),
        ));
    }

    let composed = source * rotation_about(angle_degrees, pivot);
    Ok(affine_to_geo_transform(composed))
}

/// Rewrite a raster's geotransform in place.
///
/// Holds the raster exclusively for the duration of the call; this is the
/// only place a raster's geotransform is written.
pub fn rotate_raster(
    raster: &mut dyn SceneRaster,
    angle_degrees: f64,
    pivot_projected: (f64, f64),
) -> ProductResult<GeoTransform> {
    let current = raster.geo_transform();
    let rotated = rotate_around(&current, angle_degrees, pivot_projected)?;

    log::info!(
        "Rotating raster by {:.2} deg about ({:.1}, {:.1})",
        angle_degrees,
        pivot_projected.0,
        pivot_projected.1
    );
    log::debug!("Geotransform {:?} -> {:?}", current.to_gdal(), rotated.to_gdal());

    raster.set_geo_transform(rotated)?;
    Ok(rotated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn scene_gt() -> GeoTransform {
        GeoTransform::north_up(500_000.0, 7_000_000.0, 1.0, -1.0)
    }

    #[test]
    fn test_zero_rotation_is_identity() {
        let gt = GeoTransform {
            top_left_x: 567_000.0,
            pixel_width: 2.75,
            rotation_x: 0.1,
            top_left_y: 6_070_000.0,
            rotation_y: -0.05,
            pixel_height: -2.75,
        };
        let rotated = rotate_around(&gt, 0.0, (567_943.0, 6_067_874.0)).unwrap();
        assert_eq!(rotated, gt);
    }

    #[test]
    fn test_pivot_stays_fixed() {
        let gt = scene_gt();
        let pivot = (505_000.0, 6_996_000.0);
        let rotated = rotate_around(&gt, -110.0, pivot).unwrap();

        // The pivot pixel maps to the pivot before and after the rotation.
        let p = pixel_pivot(&gt, pivot).unwrap();
        let (x, y) = rotated.apply(p.x, p.y);
        assert_abs_diff_eq!(x, pivot.0, epsilon = 1e-6);
        assert_abs_diff_eq!(y, pivot.1, epsilon = 1e-6);
        assert!(rotated.has_rotation());
    }

    #[test]
    fn test_quarter_turn_is_exact() {
        let gt = scene_gt();
        let rotated = rotate_around(&gt, 90.0, (500_000.0, 7_000_000.0)).unwrap();
        assert_eq!(rotated.pixel_width, 0.0);
        assert_eq!(rotated.pixel_height, 0.0);
        assert_eq!(rotated.rotation_x.abs(), 1.0);
        assert_eq!(rotated.rotation_y.abs(), 1.0);
    }

    #[test]
    fn test_rotations_compose() {
        let gt = scene_gt();
        let pivot = (505_000.0, 6_996_000.0);
        let twice = rotate_around(&rotate_around(&gt, 30.0, pivot).unwrap(), 45.0, pivot).unwrap();
        let once = rotate_around(&gt, 75.0, pivot).unwrap();
        for (a, b) in twice.to_gdal().iter().zip(once.to_gdal().iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_zero_pixel_size_is_geometry_error() {
        let gt = GeoTransform::north_up(0.0, 0.0, 0.0, -1.0);
        let err = rotate_around(&gt, 10.0, (5.0, 5.0)).unwrap_err();
        assert!(matches!(err, ProductError::Geometry(_)));
    }

    #[test]
    fn test_cos_sin_deg_wraps_negative_angles() {
        assert_eq!(cos_sin_deg(-90.0), (0.0, -1.0));
        assert_eq!(cos_sin_deg(450.0), (0.0, 1.0));
        let (c, s) = cos_sin_deg(-110.0);
        assert_abs_diff_eq!(c, (-110.0f64).to_radians().cos(), epsilon = 1e-12);
        assert_abs_diff_eq!(s, (-110.0f64).to_radians().sin(), epsilon = 1e-12);
    }
}
