//! Raster geometry and annotation engine

pub mod annotation;
pub mod crop;
pub mod frame;
pub mod pipeline;
pub mod rotation;

pub use annotation::{layout, fit_font_size, north_arrow_geometry, LayoutParams, LayoutRequest};
pub use crop::{crop_spec_for, plan_crop, scale_bar, CropPlan};
pub use frame::{require_utm_zone, resolve_utm_zone, FrameAdapter, UtmZone};
pub use pipeline::{Collaborators, SceneJob, ScenePipeline};
pub use rotation::{rotate_around, rotate_raster};
