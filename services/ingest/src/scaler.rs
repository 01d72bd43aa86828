//! Aspect-preserving dimension scaling

/// Scale `(width, height)` down to fit within the given bounds.
///
/// A missing bound is unbounded. Dimensions that already fit, or that contain
/// a zero, are returned unchanged. Each side is rounded independently.
pub fn scale_dimensions(
    width: u32,
    height: u32,
    max_width: Option<u32>,
    max_height: Option<u32>,
) -> (u32, u32) {
    let fits_width = max_width.is_none_or(|max| width <= max);
    let fits_height = max_height.is_none_or(|max| height <= max);

    if width == 0 || height == 0 || (fits_width && fits_height) {
        return (width, height);
    }

    let width_scale = max_width.map_or(f64::INFINITY, |max| f64::from(max) / f64::from(width));
    let height_scale = max_height.map_or(f64::INFINITY, |max| f64::from(max) / f64::from(height));
    let scale = width_scale.min(height_scale);

    (
        (f64::from(width) * scale).round() as u32,
        (f64::from(height) * scale).round() as u32,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fits_is_unchanged() {
        assert_eq!(scale_dimensions(100, 50, Some(150), Some(150)), (100, 50));
        assert_eq!(scale_dimensions(150, 150, Some(150), Some(150)), (150, 150));
        assert_eq!(scale_dimensions(4000, 3000, None, None), (4000, 3000));
    }

    #[test]
    fn test_scales_by_limiting_side() {
        assert_eq!(scale_dimensions(1000, 500, Some(150), Some(150)), (150, 75));
        assert_eq!(scale_dimensions(500, 1000, Some(150), Some(150)), (75, 150));
        assert_eq!(scale_dimensions(1920, 1080, Some(850), None), (850, 478));
        assert_eq!(scale_dimensions(1080, 1920, None, Some(180)), (101, 180));
    }

    #[test]
    fn test_rounds_each_side_independently() {
        assert_eq!(scale_dimensions(333, 201, Some(166), None), (166, 100));
        assert_eq!(scale_dimensions(333, 333, Some(150), Some(150)), (150, 150));
    }

    #[test]
    fn test_zero_dimensions_are_total() {
        assert_eq!(scale_dimensions(0, 0, Some(10), Some(10)), (0, 0));
        assert_eq!(scale_dimensions(0, 500, Some(10), Some(10)), (0, 500));
        assert_eq!(scale_dimensions(500, 0, Some(10), None), (500, 0));
    }

    #[test]
    fn test_never_upscales() {
        for (w, h) in [(1, 1), (10, 300), (299, 2), (300, 300)] {
            assert_eq!(scale_dimensions(w, h, Some(300), Some(300)), (w, h));
        }
    }

    #[test]
    fn test_preserves_aspect_ratio_up_to_rounding() {
        for (w, h) in [(1234, 567), (4000, 3000), (97, 2011), (640, 480), (5000, 7)] {
            let (sw, sh) = scale_dimensions(w, h, Some(250), Some(250));
            assert!(sw <= 250 && sh <= 250);

            let scale = (250.0 / f64::from(w)).min(250.0 / f64::from(h));
            assert!((f64::from(sw) - f64::from(w) * scale).abs() <= 0.5);
            assert!((f64::from(sh) - f64::from(h) * scale).abs() <= 0.5);
        }
    }
}
