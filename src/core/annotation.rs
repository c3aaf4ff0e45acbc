//! Annotation layout: title and copyright sizing, logo placement and the
//! north-arrow transform.
//!
//! Layout is pure; measuring text is delegated to a [`TextMeasurer`] and
//! drawing to an overlay renderer.

use crate::capability::{TextExtent, TextMeasurer};
use crate::core::rotation::{cos_sin_deg, rotation_about};
use crate::types::conventions::NORTH_ARROW_ROTATION_SIGN;
use crate::types::{
    AnnotationPlan, NorthArrowPlan, PixelPosition, ProductError, ProductResult, SceneMetadata,
};
use chrono::{DateTime, Utc};
use kurbo::{Affine, Vec2};
use serde::{Deserialize, Serialize};

/// Extra spacing used when the map is rendered without zoom.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NonZoomedAdjust {
    /// Added to the bottom and north-arrow margin
    pub extra_margin: i64,
    /// Replaces the logo gutter
    pub logo_gutter: i64,
    /// Moves the copyright block further left
    pub copyright_shift: i64,
}

impl Default for NonZoomedAdjust {
    fn default() -> Self {
        Self {
            extra_margin: 50,
            logo_gutter: 25,
            copyright_shift: 10,
        }
    }
}

/// Layout constants
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutParams {
    pub margin: i64,
    pub shadow_offset: i64,
    pub logo_gutter: i64,
    pub min_font_size: u32,
    pub max_font_size: u32,
    pub title_width_fraction: f64,
    pub copyright_font_ratio: f64,
    pub north_arrow_width_fraction: f64,
    pub non_zoomed: NonZoomedAdjust,
}

impl Default for LayoutParams {
    fn default() -> Self {
        Self {
            margin: 24,
            shadow_offset: 2,
            logo_gutter: 15,
            min_font_size: 8,
            max_font_size: 1000,
            title_width_fraction: 1.0 / 3.0,
            copyright_font_ratio: 1.6,
            north_arrow_width_fraction: 0.1,
            non_zoomed: NonZoomedAdjust::default(),
        }
    }
}

/// Inputs for laying out one image
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutRequest {
    /// Canvas `(width, height)` in pixels
    pub canvas: (u32, u32),
    pub title: String,
    pub copyright: String,
    /// Logo `(width, height)` in pixels, if a logo is drawn
    pub logo_size: Option<(u32, u32)>,
    pub zoomed: bool,
    pub rotation_degrees: f64,
    /// North-arrow glyph `(width, height)` in its own units
    pub glyph_size: (f64, f64),
}

/// Smallest font size whose text width reaches `target_width`.
///
/// Linear search upward from `min_size`; the returned size is the first
/// that meets the target, so it can overshoot by at most one step.
pub fn fit_font_size(
    measurer: &dyn TextMeasurer,
    text: &str,
    target_width: f64,
    min_size: u32,
    max_size: u32,
) -> ProductResult<(u32, TextExtent)> {
    let mut size = min_size.max(1);
    loop {
        let extent = measurer.measure(text, size)?;
        if extent.width >= target_width {
            log::debug!("Font size {} gives width {:.1} (target {:.1})", size, extent.width, target_width);
            return Ok((size, extent));
        }
        if size >= max_size {
            return Err(ProductError::upstream(
                "text measurer",
                format!(
                    "text width {:.1} still below target {:.1} at font size {}",
                    extent.width, target_width, size
                ),
            ));
        }
        size += 1;
    }
}

/// Geometry of the north arrow after rotation and scaling
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NorthArrowGeometry {
    /// Glyph space to output pixels: rotate about the center, move the
    /// rotated bounding box to the origin, then scale
    pub transform: Affine,
    pub rotated_width: f64,
    pub rotated_height: f64,
    pub scale_factor: f64,
    /// Output size in pixels
    pub width: f64,
    pub height: f64,
}

/// Axis-aligned bounding box of a `width` x `height` box rotated by
/// `degrees` about its center.
pub fn rotated_bbox(width: f64, height: f64, degrees: f64) -> (f64, f64) {
    let (c, s) = cos_sin_deg(degrees);
    let (c, s) = (c.abs(), s.abs());
    (width * c + height * s, width * s + height * c)
}

/// Compose the north-arrow transform for a glyph of the given size.
pub fn north_arrow_geometry(
    glyph_width: f64,
    glyph_height: f64,
    rotation_degrees: f64,
    target_width: f64,
) -> ProductResult<NorthArrowGeometry> {
    if !(glyph_width > 0.0 && glyph_height > 0.0) {
        return Err(ProductError::Geometry(format!(
            "north arrow glyph has invalid size {}x{}",
            glyph_width, glyph_height
        )));
    }
    if !(target_width > 0.0) {
        return Err(ProductError::Geometry(format!(
            "north arrow target width must be positive, got {}",
            target_width
        )));
    }

    let angle = rotation_degrees * NORTH_ARROW_ROTATION_SIGN;
    let center = Vec2::new(glyph_width / 2.0, glyph_height / 2.0);
    let (rotated_width, rotated_height) = rotated_bbox(glyph_width, glyph_height, angle);

    // Rotating about the center leaves the bbox centered on the glyph
    // center, so half the growth moves it back to the origin.
    let shift = Vec2::new(
        (rotated_width - glyph_width) / 2.0,
        (rotated_height - glyph_height) / 2.0,
    );
    let scale_factor = target_width / rotated_width;

    let transform =
        Affine::scale(scale_factor) * Affine::translate(shift) * rotation_about(angle, center);

    Ok(NorthArrowGeometry {
        transform,
        rotated_width,
        rotated_height,
        scale_factor,
        width: rotated_width * scale_factor,
        height: rotated_height * scale_factor,
    })
}

/// Lay out title, copyright, logo and north arrow on a canvas.
pub fn layout(
    measurer: &dyn TextMeasurer,
    request: &LayoutRequest,
    params: &LayoutParams,
) -> ProductResult<AnnotationPlan> {
    let (canvas_w, canvas_h) = (request.canvas.0 as i64, request.canvas.1 as i64);
    if canvas_w == 0 || canvas_h == 0 {
        return Err(ProductError::Geometry(format!(
            "cannot annotate an empty canvas {}x{}",
            canvas_w, canvas_h
        )));
    }

    let target_width = canvas_w as f64 * params.title_width_fraction;
    let (title_size, title_extent) = fit_font_size(
        measurer,
        &request.title,
        target_width,
        params.min_font_size,
        params.max_font_size,
    )?;
    log::info!("Using title font size {}", title_size);

    let margin = params.margin;
    let title_position = PixelPosition::new(
        canvas_w - title_extent.width.round() as i64 - margin,
        margin,
    );

    let copyright_size =
        ((title_size as f64 / params.copyright_font_ratio).round_ties_even() as u32).max(1);
    let cp_extent = measurer.measure(&request.copyright, copyright_size)?;
    let cp_w = cp_extent.width.round() as i64;
    let cp_h = cp_extent.height.round() as i64;
    let mut cp_left = canvas_w - cp_w - margin;

    let mut bottom_margin = margin;
    let mut gutter = params.logo_gutter;
    if !request.zoomed {
        bottom_margin += params.non_zoomed.extra_margin;
        gutter = params.non_zoomed.logo_gutter;
        cp_left -= params.non_zoomed.copyright_shift;
    }

    // Logo and copyright share the top edge of whichever is taller.
    let (cp_top, logo_position) = match request.logo_size {
        Some((logo_w, logo_h)) => {
            let (logo_w, logo_h) = (logo_w as i64, logo_h as i64);
            let top = if logo_h > cp_h {
                canvas_h - logo_h - bottom_margin
            } else {
                canvas_h - cp_h - bottom_margin
            };
            (top, Some(PixelPosition::new(cp_left - logo_w - gutter, top)))
        }
        None => (canvas_h - cp_h - bottom_margin, None),
    };

    let north_arrow = if request.rotation_degrees != 0.0 {
        let geometry = north_arrow_geometry(
            request.glyph_size.0,
            request.glyph_size.1,
            request.rotation_degrees,
            canvas_w as f64 * params.north_arrow_width_fraction,
        )?;
        Some(NorthArrowPlan {
            rotation_degrees: request.rotation_degrees,
            scale_factor: geometry.scale_factor,
            anchor_position: PixelPosition::new(bottom_margin, bottom_margin),
            width: geometry.width,
            height: geometry.height,
        })
    } else {
        None
    };

    Ok(AnnotationPlan {
        title_text: request.title.clone(),
        title_font_size: title_size,
        title_position,
        copyright_text: request.copyright.clone(),
        copyright_font_size: copyright_size,
        copyright_position: PixelPosition::new(cp_left, cp_top),
        logo_position,
        north_arrow,
        shadow_offset: params.shadow_offset,
    })
}

/// Two-line title: target and mission, then the scene time.
pub fn title_text(target_name: &str, metadata: &SceneMetadata) -> String {
    format!(
        "{} {}\n{} UTC",
        target_name,
        metadata.mission_name,
        metadata.scene_time.format("%Y-%m-%d %H:%M")
    )
}

/// Copyright block: the holder line, then `© <owner><year>`.
pub fn copyright_text(holder: &str, owner: &str, now: DateTime<Utc>) -> String {
    format!("{}\n© {}{}", holder, owner, now.format("%Y"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use kurbo::Point;

    /// Fixed-advance font: every glyph is 0.6 em wide, lines 1.2 em tall.
    struct MonoMeasurer;

    impl TextMeasurer for MonoMeasurer {
        fn measure(&self, text: &str, font_size: u32) -> ProductResult<TextExtent> {
            let longest = text.lines().map(|l| l.chars().count()).max().unwrap_or(0);
            let lines = text.lines().count().max(1);
            Ok(TextExtent {
                x: 0.0,
                y: -(font_size as f64),
                width: longest as f64 * font_size as f64 * 0.6,
                height: lines as f64 * font_size as f64 * 1.2,
            })
        }
    }

    struct BlankMeasurer;

    impl TextMeasurer for BlankMeasurer {
        fn measure(&self, _text: &str, _font_size: u32) -> ProductResult<TextExtent> {
            Ok(TextExtent {
                x: 0.0,
                y: 0.0,
                width: 0.0,
                height: 0.0,
            })
        }
    }

    fn request(zoomed: bool, rotation: f64) -> LayoutRequest {
        LayoutRequest {
            canvas: (1800, 1500),
            // 20 characters on the longest line
            title: "Augustine TerraSAR-X\n2024-05-01 16:20 UTC".to_string(),
            copyright: "TerraSAR-X/TanDEM-X\n© DLR e.V.2024".to_string(),
            logo_size: Some((120, 40)),
            zoomed,
            rotation_degrees: rotation,
            glyph_size: (100.0, 200.0),
        }
    }

    #[test]
    fn test_fit_font_size_is_smallest_meeting_target() {
        // 10 chars * 0.6 = 6 px per size unit; 100 px needs size 17 (102 px)
        let (size, extent) = fit_font_size(&MonoMeasurer, "0123456789", 100.0, 8, 1000).unwrap();
        assert_eq!(size, 17);
        assert!(extent.width >= 100.0);
        let below = MonoMeasurer.measure("0123456789", size - 1).unwrap();
        assert!(below.width < 100.0);
    }

    #[test]
    fn test_fit_font_size_respects_minimum() {
        let (size, _) = fit_font_size(&MonoMeasurer, "wide title text", 1.0, 8, 1000).unwrap();
        assert_eq!(size, 8);
    }

    #[test]
    fn test_fit_font_size_gives_up_at_maximum() {
        let err = fit_font_size(&BlankMeasurer, "title", 10.0, 8, 20).unwrap_err();
        assert!(matches!(err, ProductError::Upstream { .. }));
    }

    #[test]
    fn test_zoomed_layout_positions() {
        let params = LayoutParams::default();
        let plan = layout(&MonoMeasurer, &request(true, 0.0), &params).unwrap();

        // Target 600 px over 20 chars -> 12 px per size unit -> size 50
        assert_eq!(plan.title_font_size, 50);
        assert_eq!(plan.title_position, PixelPosition::new(1800 - 600 - 24, 24));

        // round(50 / 1.6) = round(31.25) = 31
        assert_eq!(plan.copyright_font_size, 31);
        // 19 chars * 0.6 * 31 = 353.4 -> 353; 2 lines * 1.2 * 31 = 74.4 -> 74
        let cp_left = 1800 - 353 - 24;
        assert_eq!(plan.copyright_position, PixelPosition::new(cp_left, 1500 - 74 - 24));
        // Copyright is taller than the logo, so both use its top
        assert_eq!(
            plan.logo_position,
            Some(PixelPosition::new(cp_left - 120 - 15, 1500 - 74 - 24))
        );
        assert!(plan.north_arrow.is_none());
    }

    #[test]
    fn test_non_zoomed_layout_enlarges_margins() {
        let params = LayoutParams::default();
        let plan = layout(&MonoMeasurer, &request(false, 30.0), &params).unwrap();

        let cp_left = 1800 - 353 - 24 - 10;
        let top = 1500 - 74 - 74;
        assert_eq!(plan.copyright_position, PixelPosition::new(cp_left, top));
        assert_eq!(plan.logo_position, Some(PixelPosition::new(cp_left - 120 - 25, top)));

        // Title keeps the normal margin; the arrow uses the enlarged one
        assert_eq!(plan.title_position.y, 24);
        let arrow = plan.north_arrow.unwrap();
        assert_eq!(arrow.anchor_position, PixelPosition::new(74, 74));
    }

    #[test]
    fn test_tall_logo_sets_shared_top() {
        let params = LayoutParams::default();
        let mut req = request(true, 0.0);
        req.logo_size = Some((90, 200));
        let plan = layout(&MonoMeasurer, &req, &params).unwrap();
        let top = 1500 - 200 - 24;
        assert_eq!(plan.copyright_position.y, top);
        assert_eq!(plan.logo_position.unwrap().y, top);
    }

    #[test]
    fn test_north_arrow_width_is_tenth_of_canvas() {
        let params = LayoutParams::default();
        let plan = layout(&MonoMeasurer, &request(true, -110.0), &params).unwrap();
        let arrow = plan.north_arrow.unwrap();
        assert_abs_diff_eq!(arrow.width, 180.0, epsilon = 1e-9);
        assert_eq!(arrow.anchor_position, PixelPosition::new(24, 24));
    }

    #[test]
    fn test_rotated_bbox_half_turn_invariant() {
        for theta in [0.0, 17.0, 45.0, 90.0, -110.0, 200.0] {
            let (w1, h1) = rotated_bbox(100.0, 200.0, theta);
            let (w2, h2) = rotated_bbox(100.0, 200.0, theta + 180.0);
            assert_abs_diff_eq!(w1, w2, epsilon = 1e-9);
            assert_abs_diff_eq!(h1, h2, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_north_arrow_keeps_visual_center() {
        let geometry = north_arrow_geometry(100.0, 100.0, 45.0, 50.0).unwrap();
        let center = geometry.transform * Point::new(50.0, 50.0);
        assert_abs_diff_eq!(center.x, geometry.width / 2.0, epsilon = 1e-9);
        assert_abs_diff_eq!(center.y, geometry.height / 2.0, epsilon = 1e-9);
        assert_abs_diff_eq!(geometry.width, 50.0, epsilon = 1e-9);
        assert_abs_diff_eq!(geometry.rotated_width, 100.0 * 2f64.sqrt(), epsilon = 1e-9);
    }

    #[test]
    fn test_north_arrow_corners_fit_output_box() {
        let geometry = north_arrow_geometry(60.0, 140.0, -110.0, 90.0).unwrap();
        for corner in [(0.0, 0.0), (60.0, 0.0), (60.0, 140.0), (0.0, 140.0)] {
            let p = geometry.transform * Point::new(corner.0, corner.1);
            assert!(p.x >= -1e-9 && p.x <= geometry.width + 1e-9);
            assert!(p.y >= -1e-9 && p.y <= geometry.height + 1e-9);
        }
    }

    #[test]
    fn test_copyright_text_uses_year() {
        let now = DateTime::parse_from_rfc3339("2025-03-04T05:06:07Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            copyright_text("TerraSAR-X/TanDEM-X", "DLR e.V.", now),
            "TerraSAR-X/TanDEM-X\n© DLR e.V.2025"
        );
    }
}
