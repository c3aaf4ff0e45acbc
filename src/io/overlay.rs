//! Text measurement and annotation compositing with usvg/resvg.
//!
//! Text is laid out as a small SVG document so measuring and drawing go
//! through the same shaping path and agree on the bounding box.

use crate::capability::{OverlayAssets, OverlayRenderer, TextExtent, TextMeasurer};
use crate::core::annotation::north_arrow_geometry;
use crate::types::{AnnotationPlan, NorthArrowPlan, PixelPosition, ProductError, ProductResult};
use resvg::tiny_skia::{IntSize, Pixmap, PixmapPaint, Transform};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Baseline-to-baseline distance in ems.
pub const LINE_HEIGHT_EM: f64 = 1.2;

/// Sans faces tried, in order, when the configured family is not installed.
const FALLBACK_FAMILIES: [&str; 5] = [
    "DejaVu Sans",
    "Liberation Sans",
    "Arial",
    "Noto Sans",
    "FreeSans",
];

const TEXT_FILL: &str = "#ffffff";
const SHADOW_FILL: &str = "#000000";

/// Horizontal alignment of multi-line text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextAlign {
    Left,
    Right,
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

/// SVG document holding `text` with its layout origin at (0, 0).
///
/// The first baseline sits one font size below the origin; each further
/// line is [`LINE_HEIGHT_EM`] lower. The family list ends in `sans-serif`
/// so a missing face falls through to the database's sans family.
pub fn text_svg(
    text: &str,
    font_family: &str,
    font_size: u32,
    align: TextAlign,
    fill: &str,
) -> String {
    let anchor = match align {
        TextAlign::Left => "start",
        TextAlign::Right => "end",
    };
    let size = font_size as f64;
    let mut svg = format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="1" height="1"><text font-family="'{}', sans-serif" font-size="{}" fill="{}" text-anchor="{}" xml:space="preserve">"#,
        escape_xml(&font_family.replace('\'', "")),
        font_size,
        fill,
        anchor
    );
    for (i, line) in text.lines().enumerate() {
        let baseline = size + LINE_HEIGHT_EM * size * i as f64;
        svg.push_str(&format!(
            r#"<tspan x="0" y="{}">{}</tspan>"#,
            baseline,
            escape_xml(line)
        ));
    }
    svg.push_str("</text></svg>");
    svg
}

fn has_family(db: &usvg::fontdb::Database, family: &str) -> bool {
    let families = [usvg::fontdb::Family::Name(family)];
    db.query(&usvg::fontdb::Query {
        families: &families,
        ..Default::default()
    })
    .is_some()
}

/// Point the generic sans family at `family`, or at the closest installed
/// substitute. Returns the family text will be set in, if any.
fn resolve_sans_family(db: &mut usvg::fontdb::Database, family: &str) -> Option<String> {
    let resolved = if has_family(db, family) {
        Some(family.to_string())
    } else {
        let substitute = FALLBACK_FAMILIES
            .iter()
            .find(|name| has_family(db, name))
            .map(|name| name.to_string())
            .or_else(|| {
                db.faces()
                    .find_map(|face| face.families.first().map(|(name, _)| name.clone()))
            });
        if let Some(name) = &substitute {
            log::warn!("Font family '{}' not installed, using '{}'", family, name);
        }
        substitute
    };
    if let Some(name) = &resolved {
        db.set_sans_serif_family(name.clone());
    }
    resolved
}

fn load_fonts(font_dirs: &[PathBuf]) -> usvg::fontdb::Database {
    let mut db = usvg::fontdb::Database::new();
    db.load_system_fonts();
    for dir in font_dirs {
        if dir.is_dir() {
            db.load_fonts_dir(dir);
        } else {
            log::warn!("Font directory {} does not exist", dir.display());
        }
    }
    log::debug!("Font database holds {} face(s)", db.faces().count());
    db
}

/// Shapes text with a font database and reports its bounding box.
#[derive(Clone)]
pub struct SvgTextMeasurer {
    fontdb: Arc<usvg::fontdb::Database>,
    font_family: String,
    resolved_family: Option<String>,
}

impl SvgTextMeasurer {
    /// System fonts plus any `.ttf`/`.otf` files in `font_dirs`.
    ///
    /// A family that is not installed falls back to a common sans face,
    /// then to any loaded face.
    pub fn new(font_family: impl Into<String>, font_dirs: &[PathBuf]) -> Self {
        let font_family = font_family.into();
        let mut fontdb = load_fonts(font_dirs);
        let resolved_family = resolve_sans_family(&mut fontdb, &font_family);
        Self {
            fontdb: Arc::new(fontdb),
            font_family,
            resolved_family,
        }
    }

    pub fn font_count(&self) -> usize {
        self.fontdb.faces().count()
    }

    /// Family text is actually set in; `None` when no font is loaded.
    pub fn resolved_family(&self) -> Option<&str> {
        self.resolved_family.as_deref()
    }

    fn options(&self) -> usvg::Options<'static> {
        usvg::Options {
            fontdb: self.fontdb.clone(),
            font_family: self
                .resolved_family
                .clone()
                .unwrap_or_else(|| self.font_family.clone()),
            ..Default::default()
        }
    }

    /// Parse a text block, failing when no glyphs could be produced.
    fn text_tree(
        &self,
        text: &str,
        font_size: u32,
        align: TextAlign,
        fill: &str,
    ) -> ProductResult<usvg::Tree> {
        let svg = text_svg(text, &self.font_family, font_size, align, fill);
        let tree = usvg::Tree::from_str(&svg, &self.options()).map_err(|e| {
            ProductError::upstream("text measurer", format!("text layout failed: {}", e))
        })?;
        if !tree.root().has_children() {
            return Err(ProductError::upstream(
                "text measurer",
                format!("no font resolved for family '{}'", self.font_family),
            ));
        }
        Ok(tree)
    }

    fn extent_of(tree: &usvg::Tree) -> TextExtent {
        let bbox = tree.root().abs_bounding_box();
        TextExtent {
            x: bbox.x() as f64,
            y: bbox.y() as f64,
            width: bbox.width() as f64,
            height: bbox.height() as f64,
        }
    }
}

impl TextMeasurer for SvgTextMeasurer {
    fn measure(&self, text: &str, font_size: u32) -> ProductResult<TextExtent> {
        let tree = self.text_tree(text, font_size, TextAlign::Left, TEXT_FILL)?;
        Ok(Self::extent_of(&tree))
    }
}

fn premultiply(data: &mut [u8]) {
    for px in data.chunks_exact_mut(4) {
        let a = px[3] as u32;
        if a < 255 {
            for c in &mut px[..3] {
                *c = ((*c as u32 * a + 127) / 255) as u8;
            }
        }
    }
}

fn demultiply(data: &mut [u8]) {
    for px in data.chunks_exact_mut(4) {
        let a = px[3] as u32;
        if a > 0 && a < 255 {
            for c in &mut px[..3] {
                *c = ((*c as u32 * 255 + a / 2) / a).min(255) as u8;
            }
        }
    }
}

fn load_pixmap(path: &Path) -> ProductResult<Pixmap> {
    let image = image::open(path)?.to_rgba8();
    let (width, height) = image.dimensions();
    let mut data = image.into_raw();
    premultiply(&mut data);
    let size = IntSize::from_wh(width, height).ok_or_else(|| {
        ProductError::Geometry(format!("image {} is empty", path.display()))
    })?;
    Pixmap::from_vec(data, size).ok_or_else(|| {
        ProductError::upstream("overlay", format!("cannot hold {} as a pixmap", path.display()))
    })
}

/// Draw the rotated, scaled north arrow with its top-left at the anchor.
pub fn draw_north_arrow(
    pixmap: &mut Pixmap,
    svg: &str,
    arrow: &NorthArrowPlan,
) -> ProductResult<()> {
    let tree = usvg::Tree::from_str(svg, &usvg::Options::default())
        .map_err(|e| ProductError::upstream("overlay", format!("north arrow SVG: {}", e)))?;
    let size = tree.size();
    let geometry = north_arrow_geometry(
        size.width() as f64,
        size.height() as f64,
        arrow.rotation_degrees,
        arrow.width,
    )?;
    let [a, b, c, d, e, f] = geometry.transform.as_coeffs();
    let transform = Transform::from_row(
        a as f32,
        b as f32,
        c as f32,
        d as f32,
        (e + arrow.anchor_position.x as f64) as f32,
        (f + arrow.anchor_position.y as f64) as f32,
    );
    resvg::render(&tree, transform, &mut pixmap.as_mut());
    Ok(())
}

/// Draws annotation plans onto PNG maps.
#[derive(Clone)]
pub struct SvgOverlayRenderer {
    text: SvgTextMeasurer,
}

impl SvgOverlayRenderer {
    pub fn new(text: SvgTextMeasurer) -> Self {
        Self { text }
    }

    /// Draw a text block so its bounding box starts at `position`, with a
    /// dark copy `shadow` pixels down-right underneath.
    fn draw_text(
        &self,
        pixmap: &mut Pixmap,
        text: &str,
        font_size: u32,
        position: PixelPosition,
        shadow: i64,
        align: TextAlign,
    ) -> ProductResult<()> {
        for (fill, offset) in [(SHADOW_FILL, shadow), (TEXT_FILL, 0)] {
            let tree = self.text.text_tree(text, font_size, align, fill)?;
            let extent = SvgTextMeasurer::extent_of(&tree);
            let dx = (position.x + offset) as f64 - extent.x;
            let dy = (position.y + offset) as f64 - extent.y;
            resvg::render(
                &tree,
                Transform::from_translate(dx as f32, dy as f32),
                &mut pixmap.as_mut(),
            );
        }
        Ok(())
    }

    fn write_png(pixmap: Pixmap, output: &Path) -> ProductResult<()> {
        let (width, height) = (pixmap.width(), pixmap.height());
        let mut data = pixmap.take();
        demultiply(&mut data);
        let image = image::RgbaImage::from_raw(width, height, data).ok_or_else(|| {
            ProductError::upstream("overlay", "composited buffer has the wrong size")
        })?;

        let dir = output
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut temp = tempfile::Builder::new()
            .prefix(".sarmap-")
            .suffix(".png")
            .tempfile_in(dir)?;
        image::DynamicImage::ImageRgba8(image)
            .write_to(temp.as_file_mut(), image::ImageFormat::Png)?;
        temp.persist(output).map_err(|e| ProductError::Io(e.error))?;
        Ok(())
    }
}

impl OverlayRenderer for SvgOverlayRenderer {
    fn image_size(&self, image: &Path) -> ProductResult<(u32, u32)> {
        Ok(image::image_dimensions(image)?)
    }

    fn glyph_size(&self, svg: &str) -> ProductResult<(f64, f64)> {
        let tree = usvg::Tree::from_str(svg, &usvg::Options::default())
            .map_err(|e| ProductError::upstream("overlay", format!("north arrow SVG: {}", e)))?;
        let size = tree.size();
        Ok((size.width() as f64, size.height() as f64))
    }

    fn compose(
        &self,
        base: &Path,
        output: &Path,
        plan: &AnnotationPlan,
        assets: &OverlayAssets,
    ) -> ProductResult<()> {
        log::info!("Compositing annotations onto {}", base.display());
        let mut pixmap = load_pixmap(base)?;

        self.draw_text(
            &mut pixmap,
            &plan.title_text,
            plan.title_font_size,
            plan.title_position,
            plan.shadow_offset,
            TextAlign::Right,
        )?;

        if let (Some(logo), Some(position)) = (&assets.logo, plan.logo_position) {
            let logo = load_pixmap(logo)?;
            pixmap.draw_pixmap(
                position.x as i32,
                position.y as i32,
                logo.as_ref(),
                &PixmapPaint::default(),
                Transform::identity(),
                None,
            );
        }

        self.draw_text(
            &mut pixmap,
            &plan.copyright_text,
            plan.copyright_font_size,
            plan.copyright_position,
            plan.shadow_offset,
            TextAlign::Left,
        )?;

        if let Some(arrow) = &plan.north_arrow {
            draw_north_arrow(&mut pixmap, &assets.north_arrow_svg, arrow)?;
        }

        Self::write_png(pixmap, output)
    }
}
