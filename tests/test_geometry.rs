use approx::assert_abs_diff_eq;
use sarmap::capability::{TextExtent, TextMeasurer};
use sarmap::core::annotation::{north_arrow_geometry, rotated_bbox};
use sarmap::core::crop::plan_crop_for;
use sarmap::core::{fit_font_size, rotate_around, scale_bar};
use sarmap::{CropSpec, GeoTransform, ProductResult, ScaleUnit};

fn scene_gt() -> GeoTransform {
    GeoTransform::north_up(500_000.0, 7_000_000.0, 1.0, -1.0)
}

fn assert_gt_close(a: &GeoTransform, b: &GeoTransform, eps: f64) {
    for (x, y) in a.to_gdal().iter().zip(b.to_gdal().iter()) {
        assert_abs_diff_eq!(*x, *y, epsilon = eps);
    }
}

#[test]
fn test_centered_crop_window() {
    let plan = plan_crop_for(
        &GeoTransform::north_up(0.0, 400.0, 1.0, -1.0),
        400,
        400,
        &CropSpec::Centered {
            center_x: 100.0,
            center_y: 200.0,
            side_length: 40.0,
        },
    )
    .unwrap();
    assert_eq!(plan.bounds.as_array(), [80.0, 220.0, 120.0, 180.0]);
    assert_eq!(plan.side_length, 40.0);
    assert_eq!(plan.pivot, (100.0, 200.0));
}

#[test]
fn test_scale_bar_rounding() {
    let bar = scale_bar(4000.0);
    assert_eq!((bar.length, bar.unit), (800.0, ScaleUnit::Meters));
    assert_eq!(bar.width_spec(), "800e");

    let bar = scale_bar(12_000.0);
    assert_eq!((bar.length, bar.unit), (2.0, ScaleUnit::Kilometers));
    assert_eq!(bar.width_spec(), "2k");

    // Exactly 1000 m raw is already kilometers
    let bar = scale_bar(5000.0);
    assert_eq!((bar.length, bar.unit), (1.0, ScaleUnit::Kilometers));
}

#[test]
fn test_rotation_moves_corners_about_center() {
    let gt = scene_gt();
    let rotated = rotate_around(&gt, 90.0, (505_000.0, 6_996_000.0)).unwrap();
    // Pixel (5000, 4000) is the pivot; one pixel right of it lands one
    // meter below after a quarter turn.
    let (x, y) = rotated.apply(5001.0, 4000.0);
    assert_abs_diff_eq!(x, 505_000.0, epsilon = 1e-9);
    assert_abs_diff_eq!(y, 6_995_999.0, epsilon = 1e-9);
}

struct MonoMeasurer;

impl TextMeasurer for MonoMeasurer {
    fn measure(&self, text: &str, font_size: u32) -> ProductResult<TextExtent> {
        let longest = text.lines().map(|l| l.chars().count()).max().unwrap_or(0);
        Ok(TextExtent {
            x: 0.0,
            y: 0.0,
            width: longest as f64 * font_size as f64 * 0.6,
            height: text.lines().count().max(1) as f64 * font_size as f64 * 1.2,
        })
    }
}

#[test]
fn test_fit_font_size_reports_unreachable_target() {
    let result = fit_font_size(&MonoMeasurer, "x", 10_000.0, 8, 50);
    assert!(result.is_err());
}

mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn angle_strategy() -> impl Strategy<Value = f64> {
        -720.0f64..720.0
    }

    fn pivot_strategy() -> impl Strategy<Value = (f64, f64)> {
        (500_000.0f64..510_000.0, 6_992_000.0f64..7_000_000.0)
    }

    proptest! {
        #[test]
        fn prop_pivot_stays_fixed(angle in angle_strategy(), pivot in pivot_strategy()) {
            let gt = scene_gt();
            let rotated = rotate_around(&gt, angle, pivot).unwrap();
            let px = pivot.0 - gt.top_left_x;
            let py = gt.top_left_y - pivot.1;
            let (x, y) = rotated.apply(px, py);
            prop_assert!((x - pivot.0).abs() < 1e-6);
            prop_assert!((y - pivot.1).abs() < 1e-6);
        }

        #[test]
        fn prop_rotations_add(a in angle_strategy(), b in angle_strategy(), pivot in pivot_strategy()) {
            let gt = scene_gt();
            let twice = rotate_around(&rotate_around(&gt, a, pivot).unwrap(), b, pivot).unwrap();
            let once = rotate_around(&gt, a + b, pivot).unwrap();
            assert_gt_close(&twice, &once, 1e-6);
        }

        #[test]
        fn prop_full_turn_is_identity(angle in angle_strategy(), pivot in pivot_strategy()) {
            let gt = scene_gt();
            let a = rotate_around(&gt, angle, pivot).unwrap();
            let b = rotate_around(&gt, angle + 360.0, pivot).unwrap();
            assert_gt_close(&a, &b, 1e-6);
        }

        #[test]
        fn prop_pixel_area_preserved(angle in angle_strategy(), pivot in pivot_strategy()) {
            let gt = rotate_around(&scene_gt(), angle, pivot).unwrap();
            let det = gt.pixel_width * gt.pixel_height - gt.rotation_x * gt.rotation_y;
            prop_assert!((det + 1.0).abs() < 1e-9);
        }

        #[test]
        fn prop_rotated_bbox_half_turn_symmetric(
            w in 1.0f64..500.0,
            h in 1.0f64..500.0,
            angle in angle_strategy(),
        ) {
            let (w1, h1) = rotated_bbox(w, h, angle);
            let (w2, h2) = rotated_bbox(w, h, angle + 180.0);
            prop_assert!((w1 - w2).abs() < 1e-6);
            prop_assert!((h1 - h2).abs() < 1e-6);
            prop_assert!(w1 >= w.min(h) - 1e-9);
        }

        #[test]
        fn prop_north_arrow_hits_target_width(
            angle in angle_strategy(),
            target in 20.0f64..400.0,
        ) {
            let geometry = north_arrow_geometry(60.0, 120.0, angle, target).unwrap();
            prop_assert!((geometry.width - target).abs() < 1e-6);
            // The glyph corners land inside the output box
            for (x, y) in [(0.0, 0.0), (60.0, 0.0), (60.0, 120.0), (0.0, 120.0)] {
                let p = geometry.transform * kurbo::Point::new(x, y);
                prop_assert!(p.x > -1e-6 && p.x < geometry.width + 1e-6);
                prop_assert!(p.y > -1e-6 && p.y < geometry.height + 1e-6);
            }
        }

        #[test]
        fn prop_font_size_is_smallest_fit(
            text in "[A-Za-z ]{1,40}",
            target in 10.0f64..2000.0,
        ) {
            let (size, extent) = fit_font_size(&MonoMeasurer, &text, target, 1, 100_000).unwrap();
            prop_assert!(extent.width >= target);
            if size > 1 {
                let smaller = MonoMeasurer.measure(&text, size - 1).unwrap();
                prop_assert!(smaller.width < target);
            }
        }

        #[test]
        fn prop_scale_bar_is_rounded(side in 100.0f64..200_000.0) {
            let bar = scale_bar(side);
            match bar.unit {
                ScaleUnit::Meters => {
                    prop_assert!(side / 5.0 < 1000.0);
                    prop_assert_eq!(bar.length % 50.0, 0.0);
                    prop_assert!((bar.length - side / 5.0).abs() <= 25.0);
                }
                ScaleUnit::Kilometers => {
                    prop_assert!(side / 5.0 >= 1000.0);
                    prop_assert_eq!(bar.length.fract(), 0.0);
                    prop_assert!((bar.length - side / 5000.0).abs() <= 0.5);
                }
            }
        }
    }
}
