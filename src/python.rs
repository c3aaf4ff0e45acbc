//! Python bindings for the pure geometry operations.

use crate::core::crop::{plan_crop_for, scale_bar as compute_scale_bar};
use crate::core::frame::resolve_utm_zone;
use crate::core::rotation::rotate_around as rotate_geo_transform;
use crate::types::{CropSpec, GeoTransform, ProductError};
use pyo3::prelude::*;

fn to_py_err(err: ProductError) -> PyErr {
    match err {
        ProductError::Configuration(_) | ProductError::Geometry(_) => {
            PyErr::new::<pyo3::exceptions::PyValueError, _>(format!("{}", err))
        }
        _ => PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(format!("{}", err)),
    }
}

/// Python module definition
#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(scale_bar, m)?)?;
    m.add_function(wrap_pyfunction!(plan_crop, m)?)?;
    m.add_function(wrap_pyfunction!(rotate_around, m)?)?;
    m.add_function(wrap_pyfunction!(parse_utm_zone, m)?)?;
    Ok(())
}

/// Scale bar for a crop side in meters, as `(length, "m" | "km")`.
#[pyfunction]
fn scale_bar(side_length: f64) -> (f64, String) {
    let bar = compute_scale_bar(side_length);
    (bar.length, bar.unit.to_string())
}

/// Crop window `[min_x, max_y, max_x, min_y]` and side length.
///
/// Without `center` and `side_length` the raster's full extent is used.
#[pyfunction]
#[pyo3(signature = (geo_transform, width, height, center=None, side_length=None))]
fn plan_crop(
    geo_transform: [f64; 6],
    width: usize,
    height: usize,
    center: Option<(f64, f64)>,
    side_length: Option<f64>,
) -> PyResult<([f64; 4], f64)> {
    let spec = match (center, side_length) {
        (Some((center_x, center_y)), Some(side_length)) => CropSpec::Centered {
            center_x,
            center_y,
            side_length,
        },
        _ => CropSpec::FullExtent,
    };
    let plan = plan_crop_for(&GeoTransform::from_gdal(geo_transform), width, height, &spec)
        .map_err(to_py_err)?;
    Ok((plan.bounds.as_array(), plan.side_length))
}

/// Rotate a GDAL geotransform about a projected point.
#[pyfunction]
fn rotate_around(geo_transform: [f64; 6], angle: f64, pivot: (f64, f64)) -> PyResult<[f64; 6]> {
    let rotated = rotate_geo_transform(&GeoTransform::from_gdal(geo_transform), angle, pivot)
        .map_err(to_py_err)?;
    Ok(rotated.to_gdal())
}

/// UTM zone label such as `5N`, or `None` when the CRS names no zone.
#[pyfunction]
fn parse_utm_zone(crs: &str) -> Option<String> {
    resolve_utm_zone(crs).map(|zone| zone.to_string())
}
