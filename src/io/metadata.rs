use crate::config::{EngineConfig, MissingTargetPolicy, MissionTable};
use crate::core::pipeline::SceneJob;
use crate::types::{
    cached_regex, PassDirection, ProductError, ProductResult, SceneFailure, SceneMetadata, Stage,
    StageContext, TargetParameters,
};
use chrono::{NaiveDateTime, TimeZone, Utc};
use quick_xml::de::from_str;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static ORDER_DATE_PATTERN: OnceLock<Regex> = OnceLock::new();

/// Raster file name inside an extracted scene directory.
pub const SCENE_RASTER_NAME: &str = "sar_image.tif";
/// Metadata file name inside an extracted scene directory.
pub const SCENE_METADATA_NAME: &str = "metadata.xml";

/// Placeholder that replaces the order date in lookup keys.
pub const ORDER_DATE_PLACEHOLDER: &str = "YYYYMMDD";

/// TerraSAR-X / TanDEM-X L1B product metadata.
/// This represents the root <level1Product> element; only the fields the
/// map products need are read.
#[derive(Debug, Deserialize)]
pub struct Level1Product {
    #[serde(rename = "productInfo")]
    pub product_info: ProductInfo,
    #[serde(rename = "productComponents")]
    pub product_components: ProductComponents,
    pub setup: Setup,
}

#[derive(Debug, Deserialize)]
pub struct ProductInfo {
    #[serde(rename = "missionInfo")]
    pub mission_info: MissionInfo,
    #[serde(rename = "sceneInfo")]
    pub scene_info: SceneInfo,
}

#[derive(Debug, Deserialize)]
pub struct MissionInfo {
    pub mission: String,
    #[serde(rename = "relOrbit")]
    pub rel_orbit: String,
    #[serde(rename = "orbitDirection")]
    pub orbit_direction: String,
}

#[derive(Debug, Deserialize)]
pub struct SceneInfo {
    pub start: SceneTime,
}

#[derive(Debug, Deserialize)]
pub struct SceneTime {
    #[serde(rename = "timeUTC")]
    pub time_utc: String,
}

#[derive(Debug, Deserialize)]
pub struct ProductComponents {
    #[serde(rename = "imageData", default)]
    pub image_data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
pub struct ImageData {
    pub file: ComponentFile,
}

#[derive(Debug, Deserialize)]
pub struct ComponentFile {
    pub location: FileLocation,
}

#[derive(Debug, Deserialize)]
pub struct FileLocation {
    pub filename: String,
}

#[derive(Debug, Deserialize)]
pub struct Setup {
    #[serde(rename = "orderInfo")]
    pub order_info: OrderInfo,
}

#[derive(Debug, Deserialize)]
pub struct OrderInfo {
    #[serde(rename = "userData")]
    pub user_data: UserData,
}

#[derive(Debug, Deserialize)]
pub struct UserData {
    #[serde(rename = "customerOrderName")]
    pub customer_order_name: String,
    #[serde(rename = "customerOrderID")]
    pub customer_order_id: String,
}

/// Parse scene metadata from product XML.
pub fn parse_metadata_xml(xml: &str, missions: &MissionTable) -> ProductResult<SceneMetadata> {
    let product = from_str::<Level1Product>(xml)
        .map_err(|e| ProductError::XmlParsing(format!("Failed to parse product metadata: {}", e)))?;

    let mission_info = &product.product_info.mission_info;
    let mission_code = mission_info.mission.trim().to_string();
    let mission_name = missions.name_for(&mission_code).to_string();
    log::debug!("Mission {} ({})", mission_code, mission_name);

    let direction = if mission_info.orbit_direction.trim() == "ASCENDING" {
        PassDirection::Ascending
    } else {
        PassDirection::Descending
    };

    let time_text = product.product_info.scene_info.start.time_utc.trim();
    let naive = NaiveDateTime::parse_from_str(time_text, "%Y-%m-%dT%H:%M:%S%.fZ").map_err(|e| {
        ProductError::Metadata(format!("Invalid scene start time '{}': {}", time_text, e))
    })?;

    let image_file_name = product
        .product_components
        .image_data
        .first()
        .map(|data| data.file.location.filename.trim().to_string())
        .ok_or_else(|| ProductError::Metadata("No imageData entry in product metadata".to_string()))?;

    let user_data = &product.setup.order_info.user_data;
    Ok(SceneMetadata {
        orbit: mission_info.rel_orbit.trim().to_string(),
        direction,
        mission_code,
        mission_name,
        scene_time: Utc.from_utc_datetime(&naive),
        image_file_name,
        order_name: user_data.customer_order_name.trim().to_string(),
        order_id: user_data.customer_order_id.trim().to_string(),
    })
}

/// Read and parse `metadata.xml` from disk.
pub fn read_metadata<P: AsRef<Path>>(path: P, missions: &MissionTable) -> ProductResult<SceneMetadata> {
    let xml = std::fs::read_to_string(path.as_ref())?;
    parse_metadata_xml(&xml, missions)
}

/// Normalized order identifiers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderKey {
    /// Order name with the customer prefix removed
    pub stripped_name: String,
    /// Stripped name with the order date replaced by `YYYYMMDD`
    pub lookup_key: String,
}

fn common_prefix<'a>(a: &'a str, b: &str) -> &'a str {
    let end = a
        .char_indices()
        .zip(b.chars())
        .find(|((_, ca), cb)| ca != cb)
        .map(|((i, _), _)| i)
        .unwrap_or_else(|| a.len().min(b.len()));
    &a[..end]
}

/// Normalize an order name against its order ID.
///
/// The prefix both share is the customer number and is removed; the
/// 8-digit order date becomes a placeholder so every acquisition of a
/// recurring order maps to the same key.
pub fn normalize_order_key(order_name: &str, order_id: &str) -> ProductResult<OrderKey> {
    let prefix = common_prefix(order_name, order_id);
    let stripped_name = if prefix.is_empty() {
        order_name.to_string()
    } else {
        order_name.replace(prefix, "")
    };

    let date_pattern = cached_regex(&ORDER_DATE_PATTERN, r"\d{8}")?;
    let date = date_pattern
        .find(&stripped_name)
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| {
            ProductError::Metadata(format!("Order name '{}' contains no 8-digit date", order_name))
        })?;

    Ok(OrderKey {
        lookup_key: stripped_name.replace(&date, ORDER_DATE_PLACEHOLDER),
        stripped_name,
    })
}

/// Target name guessed from a stripped order name: its first `_` token.
pub fn fallback_target_name(stripped_name: &str) -> &str {
    stripped_name.split('_').next().unwrap_or(stripped_name)
}

/// Source of per-target crop and display parameters
pub trait TargetLookup: Send + Sync {
    fn lookup(&self, order_key: &str) -> ProductResult<Option<TargetParameters>>;
}

/// Target records keyed by normalized order key
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct TargetTable {
    targets: HashMap<String, TargetParameters>,
}

impl TargetTable {
    pub fn new(targets: HashMap<String, TargetParameters>) -> Self {
        Self { targets }
    }

    /// Load a JSON object mapping order keys to target records.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ProductResult<Self> {
        log::info!("Loading target table from {}", path.as_ref().display());
        let text = std::fs::read_to_string(path.as_ref())?;
        let table: TargetTable = serde_json::from_str(&text)?;
        log::info!("Loaded {} target record(s)", table.targets.len());
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

impl TargetLookup for TargetTable {
    fn lookup(&self, order_key: &str) -> ProductResult<Option<TargetParameters>> {
        Ok(self.targets.get(order_key).cloned())
    }
}

/// Find the target for a scene, applying the missing-target policy.
pub fn resolve_target(
    lookup: &dyn TargetLookup,
    metadata: &SceneMetadata,
    policy: MissingTargetPolicy,
) -> ProductResult<TargetParameters> {
    let key = normalize_order_key(&metadata.order_name, &metadata.order_id)?;
    if let Some(target) = lookup.lookup(&key.lookup_key)? {
        log::info!("Order {} -> target {}", key.lookup_key, target.target_name);
        return Ok(target);
    }

    match policy {
        MissingTargetPolicy::Fail => Err(ProductError::Metadata(format!(
            "No target record for order '{}'",
            key.lookup_key
        ))),
        MissingTargetPolicy::Fallback => {
            let name = fallback_target_name(&key.stripped_name);
            log::warn!(
                "Order {} not found in target table, using fallback parameters for {}",
                key.lookup_key,
                name
            );
            Ok(TargetParameters::fallback(name))
        }
    }
}

/// Publication directory for a scene: `Orbit <orbit>-<dir>/<YYYYMMDD>`.
pub fn publication_dir(metadata: &SceneMetadata) -> PathBuf {
    PathBuf::from(format!("Orbit {}-{}", metadata.orbit, metadata.direction))
        .join(metadata.scene_time.format("%Y%m%d").to_string())
}

/// Build a job from an extracted scene directory.
///
/// Expects `sar_image.tif` and `metadata.xml` side by side. Outputs go
/// under `output_root`, in the scene's publication directory; the tile
/// pyramid and intermediates land in a subdirectory named after the image.
pub fn load_scene_job(
    scene_dir: &Path,
    output_root: &Path,
    lookup: &dyn TargetLookup,
    config: &EngineConfig,
) -> Result<SceneJob, SceneFailure> {
    let label = scene_dir.display().to_string();
    let metadata = read_metadata(scene_dir.join(SCENE_METADATA_NAME), &config.missions)
        .stage(&label, Stage::Metadata)?;
    let target =
        resolve_target(lookup, &metadata, config.missing_target).stage(&label, Stage::Metadata)?;

    let output_dir = output_root.join(publication_dir(&metadata));
    let image_stem = Path::new(&metadata.image_file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "scene".to_string());

    Ok(SceneJob {
        raster_path: scene_dir.join(SCENE_RASTER_NAME),
        work_dir: output_dir.join(image_stem),
        output_dir,
        metadata,
        target,
    })
}
