use crate::capability::CoordinateTransform;
use crate::types::{cached_regex, GeographicBounds, ProductError, ProductResult, ProjectedRect};
use regex::Regex;
use std::sync::OnceLock;

static CRS_NAME_PATTERN: OnceLock<Regex> = OnceLock::new();
static UTM_ZONE_PATTERN: OnceLock<Regex> = OnceLock::new();

/// Hemisphere of a UTM zone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hemisphere {
    North,
    South,
}

/// UTM zone resolved from a projected CRS name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UtmZone {
    pub number: u8,
    pub hemisphere: Hemisphere,
}

impl std::fmt::Display for UtmZone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let h = match self.hemisphere {
            Hemisphere::North => 'N',
            Hemisphere::South => 'S',
        };
        write!(f, "{}{}", self.number, h)
    }
}

/// Converts projected rectangles into geographic bounds.
pub struct FrameAdapter<'a> {
    transform: &'a dyn CoordinateTransform,
    densify: u32,
}

impl<'a> FrameAdapter<'a> {
    /// `densify` intermediate points are sampled along every edge.
    pub fn new(transform: &'a dyn CoordinateTransform, densify: u32) -> Self {
        Self { transform, densify }
    }

    /// Transform a projected rectangle into geographic bounds.
    ///
    /// All four corners go through the transform (plus the densified edge
    /// points), and the result is the min/max over every transformed point.
    pub fn transform_bounds(&self, rect: &ProjectedRect) -> ProductResult<GeographicBounds> {
        let corners = rect.corners();
        let steps = self.densify + 1;

        let mut min_lon = f64::INFINITY;
        let mut max_lon = f64::NEG_INFINITY;
        let mut min_lat = f64::INFINITY;
        let mut max_lat = f64::NEG_INFINITY;

        for i in 0..corners.len() {
            let (x0, y0) = corners[i];
            let (x1, y1) = corners[(i + 1) % corners.len()];
            for k in 0..steps {
                let t = k as f64 / steps as f64;
                let x = x0 + (x1 - x0) * t;
                let y = y0 + (y1 - y0) * t;
                let (lon, lat) = self.transform.to_geographic(x, y)?;
                if !lon.is_finite() || !lat.is_finite() {
                    return Err(ProductError::upstream(
                        "coordinate transform",
                        format!("non-finite result for point ({}, {})", x, y),
                    ));
                }
                min_lon = min_lon.min(lon);
                max_lon = max_lon.max(lon);
                min_lat = min_lat.min(lat);
                max_lat = max_lat.max(lat);
            }
        }

        let bounds = GeographicBounds {
            min_lon,
            max_lon,
            min_lat,
            max_lat,
        };
        log::debug!("Projected {:?} -> geographic {:?}", rect.as_array(), bounds);
        Ok(bounds)
    }
}

/// Resolve the UTM zone from a CRS descriptor.
///
/// Accepts WKT (the projected CRS name is read from the leading
/// `PROJCS["..."]`/`PROJCRS["..."]`) or a bare name such as
/// `WGS 84 / UTM zone 5N`. Returns `None` when no zone can be parsed.
pub fn resolve_utm_zone(descriptor: &str) -> Option<UtmZone> {
    let name_pattern =
        cached_regex(&CRS_NAME_PATTERN, r#"^\s*PROJ(?:CS|CRS)\["([^"]+)""#).ok()?;
    let name = name_pattern
        .captures(descriptor)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(descriptor);

    let (_, zone_part) = name.split_once('/')?;
    let zone_pattern =
        cached_regex(&UTM_ZONE_PATTERN, r"^\s*UTM zone\s+(\d{1,2})\s*([NS])\s*$").ok()?;
    let captures = zone_pattern.captures(zone_part)?;

    let number: u8 = captures.get(1)?.as_str().parse().ok()?;
    if !(1..=60).contains(&number) {
        return None;
    }
    let hemisphere = match captures.get(2)?.as_str() {
        "N" => Hemisphere::North,
        _ => Hemisphere::South,
    };
    Some(UtmZone { number, hemisphere })
}

/// Like [`resolve_utm_zone`] but fails when the zone is unresolved.
pub fn require_utm_zone(descriptor: &str) -> ProductResult<UtmZone> {
    resolve_utm_zone(descriptor).ok_or_else(|| {
        let preview: String = descriptor.chars().take(80).collect();
        ProductError::Geometry(format!(
            "cannot resolve UTM zone from CRS descriptor '{}'",
            preview
        ))
    })
}
