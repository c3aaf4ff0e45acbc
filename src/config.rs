//! Engine configuration.
//!
//! Every field has a default equal to the values the production pipeline
//! has always used, so an empty JSON object is a valid configuration.

use crate::capability::ThreadHint;
use crate::core::annotation::LayoutParams;
use crate::types::{ProductError, ProductResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// What to do when no target record exists for a scene's order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingTargetPolicy {
    /// Fail the scene.
    Fail,
    /// Guess the target name from the order name and use the full extent
    /// without rotation.
    Fallback,
}

/// Mission code to display name, passed explicitly to the metadata reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissionTable {
    pub names: BTreeMap<String, String>,
    pub default_name: String,
}

impl Default for MissionTable {
    fn default() -> Self {
        let mut names = BTreeMap::new();
        names.insert("TDX-1".to_string(), "TanDEM-X".to_string());
        names.insert("TSX-1".to_string(), "TerraSAR-X".to_string());
        Self {
            names,
            default_name: "TerraSAR-X".to_string(),
        }
    }
}

impl MissionTable {
    pub fn name_for(&self, code: &str) -> &str {
        self.names
            .get(code)
            .map(String::as_str)
            .unwrap_or(&self.default_name)
    }
}

/// Basemap projection family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectionKind {
    Mercator,
    /// Requires the scene CRS to name its UTM zone
    Utm,
}

/// Preview map settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    pub projection: ProjectionKind,
    pub width_inches: f64,
    pub dpi: u32,
    pub colormap: String,
    pub color_range: (f64, f64),
    pub font_size_points: u32,
    /// Scale bar offset of the dark shadow pass
    pub scale_bar_shadow_offset: String,
    /// Scale bar offset of the light pass
    pub scale_bar_offset: String,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            projection: ProjectionKind::Mercator,
            width_inches: 6.0,
            dpi: 300,
            colormap: "gray".to_string(),
            color_range: (0.0, 300.0),
            font_size_points: 12,
            scale_bar_shadow_offset: "0.224i/0.2i".to_string(),
            scale_bar_offset: "0.212i".to_string(),
        }
    }
}

/// Annotation text and assets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationConfig {
    pub layout: LayoutParams,
    pub font_family: String,
    /// Extra directories searched for font files
    pub font_dirs: Vec<PathBuf>,
    pub copyright_holder: String,
    pub copyright_owner: String,
    /// Logo drawn left of the copyright block. No logo ships with the
    /// crate, so previews carry none unless this is set.
    pub logo: Option<PathBuf>,
    /// North-arrow SVG; the bundled arrow is used when unset
    pub north_arrow_svg: Option<PathBuf>,
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            layout: LayoutParams::default(),
            font_family: "Helvetica".to_string(),
            font_dirs: Vec::new(),
            copyright_holder: "TerraSAR-X/TanDEM-X".to_string(),
            copyright_owner: "DLR e.V.".to_string(),
            logo: None,
            north_arrow_svg: None,
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// CRS of the clean product the tile pyramid is cut from
    pub clean_crs: String,
    /// Geographic CRS the cropped product is warped into
    pub geographic_crs: String,
    pub clean_nodata: f64,
    pub tile_zoom: (u8, u8),
    pub threads: ThreadHint,
    /// Points sampled along each edge when transforming bounds
    pub bounds_densify: u32,
    pub allow_full_extent: bool,
    pub missing_target: MissingTargetPolicy,
    pub missions: MissionTable,
    pub map: MapConfig,
    pub annotation: AnnotationConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            clean_crs: "EPSG:3857".to_string(),
            geographic_crs: "+proj=longlat +ellps=WGS84 +datum=WGS84 +no_defs +over".to_string(),
            clean_nodata: 0.0,
            tile_zoom: (10, 17),
            threads: ThreadHint::AllCpus,
            bounds_densify: 21,
            allow_full_extent: true,
            missing_target: MissingTargetPolicy::Fallback,
            missions: MissionTable::default(),
            map: MapConfig::default(),
            annotation: AnnotationConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load a JSON configuration file and validate it.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ProductResult<Self> {
        log::info!("Loading configuration from {}", path.as_ref().display());
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> ProductResult<Self> {
        let config: EngineConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ProductResult<()> {
        let layout = &self.annotation.layout;
        if self.tile_zoom.0 > self.tile_zoom.1 {
            return Err(ProductError::Configuration(format!(
                "tile zoom range {}-{} is reversed",
                self.tile_zoom.0, self.tile_zoom.1
            )));
        }
        if layout.min_font_size == 0 || layout.min_font_size > layout.max_font_size {
            return Err(ProductError::Configuration(format!(
                "font size range {}-{} is invalid",
                layout.min_font_size, layout.max_font_size
            )));
        }
        if !(layout.title_width_fraction > 0.0 && layout.title_width_fraction <= 1.0) {
            return Err(ProductError::Configuration(format!(
                "title width fraction {} must be in (0, 1]",
                layout.title_width_fraction
            )));
        }
        if !(layout.north_arrow_width_fraction > 0.0 && layout.north_arrow_width_fraction <= 1.0) {
            return Err(ProductError::Configuration(format!(
                "north arrow width fraction {} must be in (0, 1]",
                layout.north_arrow_width_fraction
            )));
        }
        if !(layout.copyright_font_ratio > 0.0) {
            return Err(ProductError::Configuration(
                "copyright font ratio must be positive".to_string(),
            ));
        }
        if !(self.map.width_inches > 0.0) || self.map.dpi == 0 {
            return Err(ProductError::Configuration(
                "map width and dpi must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_gives_defaults() {
        let config = EngineConfig::from_json("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.annotation.layout.margin, 24);
        assert_eq!(config.tile_zoom, (10, 17));
        assert_eq!(config.missing_target, MissingTargetPolicy::Fallback);
    }

    #[test]
    fn test_partial_override() {
        let config = EngineConfig::from_json(
            r#"{"missing_target": "fail", "threads": {"count": 4}, "map": {"projection": "utm"}}"#,
        )
        .unwrap();
        assert_eq!(config.missing_target, MissingTargetPolicy::Fail);
        assert_eq!(config.threads, ThreadHint::Count(4));
        assert_eq!(config.map.projection, ProjectionKind::Utm);
        assert_eq!(config.map.dpi, 300);
    }

    #[test]
    fn test_partial_non_zoomed_override() {
        let config = EngineConfig::from_json(
            r#"{"annotation": {"layout": {"non_zoomed": {"extra_margin": 60}}}}"#,
        )
        .unwrap();
        let adjust = config.annotation.layout.non_zoomed;
        assert_eq!(adjust.extra_margin, 60);
        assert_eq!(adjust.logo_gutter, 25);
        assert_eq!(adjust.copyright_shift, 10);
        assert_eq!(config.annotation.layout.margin, 24);
    }

    #[test]
    fn test_invalid_zoom_rejected() {
        let err = EngineConfig::from_json(r#"{"tile_zoom": [17, 10]}"#).unwrap_err();
        assert!(matches!(err, ProductError::Configuration(_)));
    }

    #[test]
    fn test_mission_table_default() {
        let table = MissionTable::default();
        assert_eq!(table.name_for("TDX-1"), "TanDEM-X");
        assert_eq!(table.name_for("TSX-1"), "TerraSAR-X");
        assert_eq!(table.name_for("PAZ-1"), "TerraSAR-X");
    }
}
